//! Graceful-shutdown signal handling for the daemon and worker binaries.
//!
//! Both processes are long-running tokio event loops rather than a single
//! spawn-and-wait wrapper, so instead of the single-child `CHILD_PID`
//! handler a fixed pid is told to terminate, this waits on SIGINT/SIGTERM
//! and resolves a future the caller selects against in its main loop.

use crate::error::{AgoError, AgoResult};

#[cfg(unix)]
pub async fn shutdown_signal() -> AgoResult<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).map_err(|source| AgoError::SignalInstallFailed {
        signal: "SIGTERM",
        source,
    })?;
    let mut sigint = signal(SignalKind::interrupt()).map_err(|source| AgoError::SignalInstallFailed {
        signal: "SIGINT",
        source,
    })?;

    tokio::select! {
        _ = sigterm.recv() => tracing::info!("received SIGTERM"),
        _ = sigint.recv() => tracing::info!("received SIGINT"),
    }
    Ok(())
}

#[cfg(not(unix))]
pub async fn shutdown_signal() -> AgoResult<()> {
    tokio::signal::ctrl_c().await.map_err(|source| AgoError::SignalInstallFailed {
        signal: "ctrl-c",
        source,
    })?;
    tracing::info!("received ctrl-c");
    Ok(())
}
