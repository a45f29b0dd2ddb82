//! Shell glue printed by `ghostcoach-hook init`.
//!
//! The shell cannot hand its own fd 2 to another process, so the glue does the
//! rewiring itself: preexec saves fd 2 and points it at a process substitution
//! running `ghostcoach-hook tee`, precmd reads `$?` first, restores fd 2 and
//! calls `ghostcoach-hook report`. `tee` seals the capture file once it has
//! drained, and `report` reads only after the seal (or its timeout).
//!
//! Bash has no way to mark the saved descriptor close-on-exec, so commands
//! inherit it. The restore step checks it is still open before using it.

use clap::ValueEnum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Shell {
    Bash,
    Zsh,
}

const EXE_PLACEHOLDER: &str = "@GHOSTCOACH_EXE@";

const COMMON: &str = r#"__ghostcoach_exe=@GHOSTCOACH_EXE@
__ghostcoach_cmd=
__ghostcoach_capture=
__ghostcoach_saved=

__ghostcoach_begin() {
  __ghostcoach_capture=$(command mktemp "${TMPDIR:-/tmp}/ghostcoach.XXXXXX" 2>/dev/null) || {
    __ghostcoach_capture=
    return 0
  }
  if ! exec {__ghostcoach_saved}>&2; then
    command rm -f -- "$__ghostcoach_capture"
    __ghostcoach_capture=
    __ghostcoach_saved=
    return 0
  fi
  if ! exec 2> >("$__ghostcoach_exe" tee -- "$__ghostcoach_capture" 2>/dev/null >&"$__ghostcoach_saved"); then
    exec {__ghostcoach_saved}>&-
    __ghostcoach_saved=
    command rm -f -- "$__ghostcoach_capture"
    __ghostcoach_capture=
  fi
  return 0
}

# The saved descriptor is inherited by commands, so one of them may have
# closed it. Fall back to the terminal rather than leave fd 2 on the pipe.
__ghostcoach_restore() {
  if [ -e "/dev/fd/$__ghostcoach_saved" ] && exec 2>&"$__ghostcoach_saved"; then
    exec {__ghostcoach_saved}>&-
  elif { true >/dev/tty; } 2>/dev/null && exec 2>/dev/tty; then
    printf 'ghostcoach: saved stderr was closed; stderr reattached to the terminal\n' >&2
  else
    exec 2>&1
  fi
  __ghostcoach_saved=
}

__ghostcoach_precmd() {
  local rc=$?
  if [ -n "$__ghostcoach_saved" ]; then
    __ghostcoach_restore
  fi
  if [ -n "$__ghostcoach_capture" ]; then
    if [ -n "${GHOSTCOACH_DISABLE-}" ]; then
      command rm -f -- "$__ghostcoach_capture"
    else
      "$__ghostcoach_exe" report --exit-code "$rc" --cwd "$PWD" \
        --capture "$__ghostcoach_capture" --cmd="$__ghostcoach_cmd" 2>/dev/null
    fi
    __ghostcoach_capture=
  fi
  __ghostcoach_cmd=
  return $rc
}
"#;

const BASH: &str = r#"
__ghostcoach_armed=

# An empty line runs no command, but the DEBUG trap still fires for each
# PROMPT_COMMAND entry.
__ghostcoach_in_prompt_command() {
  local entry part
  local -a parts
  for entry in "${PROMPT_COMMAND[@]}"; do
    IFS=';' read -r -a parts <<< "${entry//$'\n'/;}"
    for part in "${parts[@]}"; do
      part="${part#"${part%%[![:space:]]*}"}"
      part="${part%"${part##*[![:space:]]}"}"
      [ "$part" = "$1" ] && return 0
    done
  done
  return 1
}

__ghostcoach_preexec() {
  [ -n "$__ghostcoach_armed" ] || return 0
  [ -z "${COMP_LINE-}" ] || return 0
  __ghostcoach_in_prompt_command "$BASH_COMMAND" && return 0
  __ghostcoach_armed=
  [ -z "${GHOSTCOACH_DISABLE-}" ] || return 0
  local line
  line=$(HISTTIMEFORMAT= builtin history 1)
  line="${line#"${line%%[![:space:]]*}"}"
  __ghostcoach_cmd="${line#*[0-9]  }"
  [ -n "$__ghostcoach_cmd" ] || __ghostcoach_cmd=$BASH_COMMAND
  __ghostcoach_begin
}

__ghostcoach_arm() {
  local rc=$?
  __ghostcoach_armed=1
  return $rc
}

__ghostcoach_remember_debug_trap() {
  __ghostcoach_prev_debug=${3-}
}

__ghostcoach_prev_debug=
eval "__ghostcoach_remember_debug_trap $(trap -p DEBUG)"
case "$__ghostcoach_prev_debug" in
  *__ghostcoach_preexec*) ;;
  # Keep `$_` intact for a DEBUG trap installed before this one.
  *) trap "__ghostcoach_last_arg=\$_; __ghostcoach_preexec; : \"\$__ghostcoach_last_arg\"${__ghostcoach_prev_debug:+; $__ghostcoach_prev_debug}" DEBUG ;;
esac
case ";${PROMPT_COMMAND-};" in
  *";__ghostcoach_precmd;"*) ;;
  *) PROMPT_COMMAND="__ghostcoach_precmd${PROMPT_COMMAND:+;$PROMPT_COMMAND};__ghostcoach_arm" ;;
esac
"#;

const ZSH: &str = r#"
__ghostcoach_preexec() {
  [[ -n "${GHOSTCOACH_DISABLE-}" ]] && return 0
  __ghostcoach_cmd=$1
  __ghostcoach_begin
}

autoload -Uz add-zsh-hook
add-zsh-hook preexec __ghostcoach_preexec
precmd_functions=(__ghostcoach_precmd ${precmd_functions:#__ghostcoach_precmd})
"#;

/// Render the integration script for `shell`, calling back into `exe`.
pub fn init_script(shell: Shell, exe: &str) -> String {
    let specific = match shell {
        Shell::Bash => BASH,
        Shell::Zsh => ZSH,
    };
    let header = match shell {
        Shell::Bash => "# ghostcoach hook for bash; add `eval \"$(ghostcoach-hook init bash)\"` to ~/.bashrc\n",
        Shell::Zsh => "# ghostcoach hook for zsh; add `eval \"$(ghostcoach-hook init zsh)\"` to ~/.zshrc\n",
    };
    let mut script = String::with_capacity(COMMON.len() + specific.len() + header.len());
    script.push_str(header);
    script.push_str(&COMMON.replace(EXE_PLACEHOLDER, &single_quote(exe)));
    script.push_str(specific);
    script
}

fn single_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
