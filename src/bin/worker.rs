//! `ago-worker`: the per-instance agent process spawned by the daemon's
//! process manager. Reads its handshake file, opens its own control socket,
//! and runs the turn loop until asked to shut down.

use ago::logging;
use ago::process_manager::WorkerHandshake;
use ago::reasoner::{HttpReasoner, Reasoner};
use ago::templates::Template;
use ago::tools::{CompositeToolInvoker, McpToolInvoker, NullToolInvoker, ToolInvoker};
use ago::worker::{self, WorkerRuntime};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixListener;

#[derive(Parser, Debug)]
#[command(name = "ago-worker")]
struct Args {
    #[arg(long)]
    socket_path: PathBuf,

    #[arg(long)]
    handshake: PathBuf,

    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let args = Args::parse();

    if let Err(e) = logging::init(args.log_level.as_deref(), None) {
        eprintln!("failed to initialise logging: {e}");
        return std::process::ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "worker exiting with an error");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let handshake_bytes = tokio::fs::read(&args.handshake).await?;
    let handshake: WorkerHandshake = serde_json::from_slice(&handshake_bytes)?;
    let template: Template = serde_yaml::from_str(&handshake.template_yaml)?;

    tracing::info!(instance_id = %handshake.instance_id, template = %handshake.template_name, "worker starting");

    let reasoner: Arc<dyn Reasoner> = build_reasoner(&template)?;
    let tools: Arc<dyn ToolInvoker> = build_tools().await;

    let worker_runtime = WorkerRuntime::new(handshake.instance_id.clone(), template, reasoner, tools);

    if args.socket_path.exists() {
        std::fs::remove_file(&args.socket_path)?;
    }
    let listener = UnixListener::bind(&args.socket_path)?;

    let shutdown = Arc::new(tokio::sync::Notify::new());
    let shutdown_for_signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = ago::signal::shutdown_signal().await {
            tracing::error!(error = %e, "signal handler install failed, shutting down worker");
        }
        shutdown_for_signal.notify_waiters();
    });

    let result = worker::serve(worker_runtime, listener, shutdown).await;
    let _ = std::fs::remove_file(&args.handshake);
    let _ = std::fs::remove_file(&args.socket_path);
    result.map_err(Into::into)
}

fn build_reasoner(template: &Template) -> anyhow::Result<Arc<dyn Reasoner>> {
    let endpoint = std::env::var("AGO_REASONER_ENDPOINT")
        .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".to_string());
    let api_key = std::env::var("AGO_REASONER_API_KEY").ok();
    let reasoner = HttpReasoner::new(endpoint, template.model.clone(), api_key, Duration::from_secs(60))?;
    Ok(Arc::new(reasoner))
}

async fn build_tools() -> Arc<dyn ToolInvoker> {
    let servers_env = std::env::var("AGO_TOOL_SERVERS").unwrap_or_default();
    let commands: Vec<&str> = servers_env.split(';').map(str::trim).filter(|s| !s.is_empty()).collect();
    if commands.is_empty() {
        return Arc::new(NullToolInvoker);
    }

    let mut spawned = Vec::new();
    for command in commands {
        match McpToolInvoker::spawn(command, ago::config::DEFAULT_TOOL_TIMEOUT).await {
            Ok(invoker) => spawned.push(invoker),
            Err(e) => tracing::warn!(command, error = %e, "failed to launch tool server, skipping"),
        }
    }
    Arc::new(CompositeToolInvoker::new(spawned))
}
