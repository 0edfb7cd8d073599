//! Structured logging shared by the `ago` and `ago-worker` binaries.
//!
//! Verbosity is controlled by `RUST_LOG` (or an explicit `--log-level` flag
//! that takes precedence over it); an optional file path tees output to a
//! log under the base directory's `logs/` tree in addition to stdout.

use crate::error::{AgoError, AgoResult};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialise the global tracing subscriber. Call once, at process startup.
pub fn init(log_level: Option<&str>, log_file: Option<PathBuf>) -> AgoResult<()> {
    let env_filter = if let Some(level) = log_level {
        EnvFilter::try_new(level).map_err(|e| AgoError::ConfigInvalid {
            key: "log_level".into(),
            reason: e.to_string(),
        })?
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,ago=debug"))
    };

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_level(true)
        .compact();

    let registry = tracing_subscriber::registry().with(env_filter).with(fmt_layer);

    if let Some(log_path) = log_file {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        let file_layer = fmt::layer()
            .with_writer(std::sync::Arc::new(file))
            .with_target(true)
            .with_ansi(false)
            .with_level(true);

        registry.with(file_layer).init();
    } else {
        registry.init();
    }

    tracing::info!("logging initialised");
    Ok(())
}

/// Low-ceremony debug helper for spots (e.g. the platform shims) that don't
/// want to pull in a `tracing` span of their own.
pub fn debug(msg: impl Into<String>) {
    tracing::debug!("{}", msg.into());
}
