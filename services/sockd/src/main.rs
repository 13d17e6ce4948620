//! CLI entry point for the `sockd` proxy core.
//!
//! Parses CLI args, loads the config file, builds a logger, then
//! constructs and runs the daemon for the life of the process. `sockd`
//! has no HTTP surface of its own.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use sloggers::types::Severity;

use sockd_core::{Daemon, DaemonConfig, NoopBlacklist, NoopStats};

/// Encrypted stream-relay proxy daemon.
#[derive(Parser, Debug)]
#[command(name = "sockd", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    config: String,

    /// Override the logging level from the config file.
    #[arg(long)]
    log_level: Option<String>,
}

fn parse_severity(level: &str) -> Severity {
    match level.to_ascii_lowercase().as_str() {
        "trace" => Severity::Trace,
        "debug" => Severity::Debug,
        "info" => Severity::Info,
        "warning" | "warn" => Severity::Warning,
        "error" | "critical" => Severity::Error,
        other => {
            eprintln!("unrecognized log level {other:?}, defaulting to info");
            Severity::Info
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match DaemonConfig::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error loading sockd configuration: {err}");
            return ExitCode::FAILURE;
        }
    };

    let level = parse_severity(cli.log_level.as_deref().unwrap_or(&config.log_level));
    let log = sockd_core::logging::init(level);

    // No external DNS daemon or stats sink is wired into this binary;
    // both collaborators are out of scope for the core.
    // An embedding deployment should replace these with real
    // implementations of `sockd_core::Blacklist`/`sockd_core::Stats`.
    let daemon = Arc::new(Daemon::new(config, Arc::new(NoopBlacklist), Arc::new(NoopStats), log.clone()));

    if let Err(err) = daemon.initialise() {
        slog::error!(log, "failed to initialise daemon"; "error" => %err);
        return ExitCode::FAILURE;
    }

    let daemon_for_signal = Arc::clone(&daemon);
    if let Err(err) = ctrlc::set_handler(move || {
        slog::info!(log, "received shutdown signal");
        daemon_for_signal.stop();
    }) {
        eprintln!("failed to install signal handler: {err}");
    }

    match daemon.start_and_block() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("sockd exited with error: {err}");
            ExitCode::FAILURE
        }
    }
}
