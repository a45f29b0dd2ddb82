use crate::delivery::Deliver;
use crate::i18n::I18n;
use crate::session::{EndOutcome, Session};
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::{Command, ExitStatus, Stdio};
use tracing::debug;

/// Exit status a POSIX shell reports for a command that could not be found.
const NOT_FOUND: i32 = 127;
/// ... and for one that was found but could not be executed.
const NOT_EXECUTABLE: i32 = 126;

#[derive(Debug)]
pub struct Execution {
    pub exit_code: i32,
    pub outcome: EndOutcome,
}

pub struct CommandExecutor;

impl CommandExecutor {
    /// Run one command inside `session`. A single argument is handed to
    /// `sh -c`, several are executed directly. All stdio is inherited, so the
    /// command sees the interposed fd 2 and nothing else changes.
    pub fn execute<D: Deliver>(session: &mut Session<D>, argv: &[String], i18n: &I18n) -> Execution {
        let text = argv.join(" ");
        let mut command = match argv {
            [script] => {
                let mut command = Command::new("sh");
                command.arg("-c").arg(script);
                command
            }
            [program, args @ ..] => {
                let mut command = Command::new(program);
                command.args(args);
                command
            }
            [] => Command::new("true"),
        };
        command
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        session.on_command_start(&text);

        // Failures go to stderr while it is still captured, the way a shell
        // reports "command not found".
        let exit_code = match command.spawn() {
            Ok(mut child) => match child.wait() {
                Ok(status) => exit_code_of(status),
                Err(e) => {
                    eprintln!("ghostcoach-hook: {}: {}", i18n.t("error_wait"), e);
                    1
                }
            },
            Err(e) => {
                eprintln!("ghostcoach-hook: {}: {}: {}", i18n.t("error_spawn"), text, e);
                spawn_failure_code(&e)
            }
        };

        let outcome = session.on_command_end(exit_code);
        debug!(exit_code, outcome = ?outcome, "command finished");
        Execution { exit_code, outcome }
    }
}

/// Exit code as a shell would report it: the code itself, or 128 + signal.
pub fn exit_code_of(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    }
}

fn spawn_failure_code(e: &io::Error) -> i32 {
    match e.kind() {
        io::ErrorKind::NotFound => NOT_FOUND,
        _ => NOT_EXECUTABLE,
    }
}
