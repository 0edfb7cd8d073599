//! Daemon entry point (§C1, ambient): wires every component together behind
//! the control socket and drives the background health-check loop until a
//! shutdown signal (or an `Op::Shutdown` request) arrives.
//!
//! Grounded on the teacher's top-level `main` wiring (construct the shared
//! state once, hand `Arc` clones to whichever background tasks need them,
//! `tokio::select!` the accept loop against a shutdown future) generalised
//! from a single supervised child to the daemon's three concurrent duties:
//! serving control connections, ticking health checks, and reaping orphans
//! at startup.

use crate::config::{self, ConfigStore};
use crate::control::{self, Core};
use crate::error::AgoResult;
use crate::process_manager::ProcessManager;
use crate::registry_file::RegistryFile;
use crate::router::Router;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::UnixListener;
use tokio::sync::Mutex;

/// Run the daemon in the foreground: `ago daemon start` re-execs itself with
/// the hidden `--run-daemon` flag and redirects stdio into `logs/daemon.log`
/// before landing here.
pub async fn run(base_dir: PathBuf) -> AgoResult<()> {
    config::ensure_base_dir(&base_dir)?;

    let core = Arc::new(build_core(base_dir.clone())?);

    core.process_manager.orphan_cleanup().await?;

    let socket_path = base_dir.join("daemon.sock");
    let _ = std::fs::remove_file(&socket_path);
    let listener = UnixListener::bind(&socket_path)?;
    tracing::info!(socket = %socket_path.display(), "daemon listening");

    let health_core = core.clone();
    let health_task = tokio::spawn(async move { health_check_loop(health_core).await });

    tokio::select! {
        result = control::serve(core.clone(), listener) => {
            if let Err(e) = &result {
                tracing::error!(error = %e, "control server exited with an error");
            }
            result?;
        }
        signal_result = crate::signal::shutdown_signal() => {
            signal_result?;
            tracing::info!("shutdown signal received");
        }
        () = core.shutdown.notified() => {
            tracing::info!("shutdown requested over the control socket");
        }
    }

    health_task.abort();
    core.process_manager.stop_all().await?;
    let _ = std::fs::remove_file(&socket_path);
    tracing::info!("daemon stopped");
    Ok(())
}

fn build_core(base_dir: PathBuf) -> AgoResult<Core> {
    let config = ConfigStore::load(base_dir.clone(), current_project_dir())?;
    let local_templates = current_project_dir().unwrap_or_else(|| base_dir.clone());
    let pulled_templates = base_dir.join("registry").join("templates").join("pulled");
    let builtin_templates = base_dir.join("registry").join("templates").join("builtin");

    let registry_file = Arc::new(RegistryFile::new(base_dir.join("processes").join("registry.json")));
    let process_manager =
        Arc::new(ProcessManager::new(base_dir.clone(), registry_file.clone(), worker_binary_path()?));

    Ok(Core {
        base_dir: base_dir.clone(),
        config: Mutex::new(config),
        templates: crate::templates::TemplateRegistry::new(local_templates, pulled_templates, builtin_templates),
        registry_file,
        process_manager,
        router: Arc::new(Router::new(base_dir)),
        shutdown: tokio::sync::Notify::new(),
    })
}

/// Templates authored directly in a project's working directory take
/// precedence over pulled/builtin ones; `None` if the daemon itself has no
/// sensible notion of "current directory" (it always does, in practice).
fn current_project_dir() -> Option<PathBuf> {
    std::env::current_dir().ok()
}

/// Locate `ago-worker` as a sibling of the running `ago` binary.
fn worker_binary_path() -> AgoResult<PathBuf> {
    let exe = std::env::current_exe()?;
    let dir = exe.parent().unwrap_or_else(|| Path::new("."));
    let name = if cfg!(windows) { "ago-worker.exe" } else { "ago-worker" };
    Ok(dir.join(name))
}

async fn health_check_loop(core: Arc<Core>) {
    let mut interval = tokio::time::interval(core.process_manager.health_check_interval());
    loop {
        interval.tick().await;
        if let Err(e) = core.process_manager.health_check_tick().await {
            tracing::warn!(error = %e, "health check tick failed");
        }
    }
}
