use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use ghostcoach_hook::config::{Config, Settings};
use ghostcoach_hook::delivery::probe_health;
use ghostcoach_hook::executor::CommandExecutor;
use ghostcoach_hook::i18n::I18n;
use ghostcoach_hook::kill_switch::{KillSwitch, DISABLE_ENV};
use ghostcoach_hook::relay::{self, TailSink};
use ghostcoach_hook::shell::{self, Shell};
use ghostcoach_hook::{logging, PendingCommand, Session};

/// The health probe gets a little more room than per-command delivery.
const MIN_PROBE_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(name = "ghostcoach-hook")]
#[command(version, about = "Shell hook that forwards each command's exit code and stderr tail to GhostCoach")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print shell integration code (eval it from your shell rc file)
    Init {
        #[arg(value_enum)]
        shell: Shell,
    },
    /// Relay stdin to stdout, keeping a bounded copy in CAPTURE
    Tee {
        /// Capture file created by the shell integration
        capture: PathBuf,
    },
    /// Finish a command started by the shell integration and send its record
    Report {
        /// Exit status of the finished command
        #[arg(long, allow_negative_numbers = true)]
        exit_code: i32,
        /// Command line as typed
        #[arg(long, default_value = "", allow_hyphen_values = true)]
        cmd: String,
        /// Capture file written by `tee`; removed afterwards
        #[arg(long)]
        capture: Option<PathBuf>,
        /// Working directory to report [default: current directory]
        #[arg(long)]
        cwd: Option<String>,
    },
    /// Run one command with its stderr captured and reported
    Exec {
        /// Command to run; a single argument is run through `sh -c`
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Check whether the coaching service is reachable
    Status,
    /// Show the effective configuration
    Config {
        /// Persist it to the config file
        #[arg(long)]
        write: bool,
    },
}

fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();

    let mut config = Config::load();
    config.apply_env();
    let settings = config.settings();
    let i18n = I18n::new(&settings.language);

    match cli.command {
        Commands::Init { shell } => {
            let exe = std::env::current_exe()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "ghostcoach-hook".to_string());
            print!("{}", shell::init_script(shell, &exe));
        }
        Commands::Tee { capture } => run_tee(&capture, &i18n)?,
        Commands::Report {
            exit_code,
            cmd,
            capture,
            cwd,
        } => run_report(exit_code, cmd, capture, cwd, &settings),
        Commands::Exec { command } => {
            if ctrlc::set_handler(|| {}).is_err() {
                eprintln!("{}", i18n.t("warning_signal_handler").yellow());
            }
            let mut session = Session::from_settings(&settings);
            let execution = CommandExecutor::execute(&mut session, &command, &i18n);
            std::process::exit(execution.exit_code);
        }
        Commands::Status => {
            let endpoint = format!("http://127.0.0.1:{}", settings.port);
            let label = if probe_health(settings.port, settings.timeout.max(MIN_PROBE_TIMEOUT)) {
                i18n.t("status_running").green().bold()
            } else {
                i18n.t("status_stopped").red().bold()
            };
            println!("{} {}", label, i18n.t_format("status_endpoint", &[&endpoint]).dimmed());
            if KillSwitch::default().is_active() {
                println!("{}", i18n.t_format("status_disabled", &[DISABLE_ENV]).yellow());
            }
        }
        Commands::Config { write } => {
            let rendered = toml::to_string_pretty(&config).context(i18n.t("error_render_config"))?;
            println!(
                "{}",
                i18n.t_format("config_path", &[&Config::get_config_path().display().to_string()]).dimmed()
            );
            print!("{}", rendered);
            if write {
                let path = config.save()?;
                println!("{}", i18n.t_format("config_written", &[&path.display().to_string()]).green());
            }
        }
    }

    Ok(())
}

fn run_tee(capture: &Path, i18n: &I18n) -> Result<()> {
    // ^C and ^\ are meant for the command; the relay must outlive them or the
    // command's next stderr write hits a closed pipe.
    for signal in [libc::SIGINT, libc::SIGQUIT] {
        // SAFETY: SIG_IGN installs no handler code, and no other thread is
        // running yet to race on the disposition.
        unsafe {
            libc::signal(signal, libc::SIG_IGN);
        }
    }

    let mut sink = match TailSink::open(capture) {
        Ok(sink) => Some(sink),
        Err(e) => {
            // Already reported or sealed: keep forwarding, capture nothing.
            debug!(error = %e, "{}", i18n.t_format("error_open_capture", &[&capture.display().to_string()]));
            None
        }
    };
    let relayed = relay::relay(io::stdin().lock(), io::stdout().lock(), sink.as_mut());
    // Seal even after a failed relay so `report` does not wait out its timeout.
    if let Some(sink) = sink {
        if let Err(e) = sink.seal() {
            debug!(error = %e, "could not seal capture");
        }
    }
    relayed.context(i18n.t("error_relay"))?;
    Ok(())
}

/// Never fails: whatever happens to the record, the shell sees exit status 0.
fn run_report(exit_code: i32, cmd: String, capture: Option<PathBuf>, cwd: Option<String>, settings: &Settings) {
    let mut session = Session::from_settings(settings);
    session.adopt(PendingCommand::external(cmd, capture));
    let outcome = match cwd {
        Some(cwd) => session.on_command_end_in(exit_code, &cwd),
        None => session.on_command_end(exit_code),
    };
    debug!(outcome = ?outcome, "report finished");
}
