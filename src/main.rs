use ago::cli::{self, Cli};
use clap::Parser;
use std::process::ExitCode;

/// `ago daemon start` re-execs this same binary with a hidden flag rather
/// than forking a separate entry point, so the daemon and CLI share one
/// build and one set of dependencies.
const RUN_DAEMON_FLAG: &str = "--run-daemon";

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == RUN_DAEMON_FLAG) {
        return run_daemon().await;
    }

    let cli = Cli::parse();
    if let Err(e) = ago::logging::init(cli.log_level.as_deref(), None) {
        eprintln!("failed to initialise logging: {e}");
        return ExitCode::FAILURE;
    }

    cli::run(cli).await
}

async fn run_daemon() -> ExitCode {
    let base_dir = match ago::config::base_dir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("cannot resolve {}/$HOME/.ago: {e}", ago::config::AGO_HOME_ENV);
            return ExitCode::FAILURE;
        }
    };

    let log_path = base_dir.join("logs").join("daemon.log");
    if let Err(e) = ago::logging::init(None, Some(log_path)) {
        eprintln!("failed to initialise logging: {e}");
        return ExitCode::FAILURE;
    }

    match ago::daemon::run(base_dir).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "daemon exiting with an error");
            ExitCode::FAILURE
        }
    }
}
