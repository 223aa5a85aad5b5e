//! Common utilities for both binaries
//!
//! Shared initialization, CLI parsing, PID files and shutdown wiring.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing::warn;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Common CLI arguments for both processes
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct CommonArgs {
    /// Path to the KEY=value configuration file
    #[arg(short = 'f', long, default_value = "garm.conf")]
    pub config: PathBuf,

    /// Log level
    #[arg(short, long, default_value = "info")]
    pub log_level: String,
}

/// Initialize tracing/logging
pub fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    Ok(())
}

/// PID file created on start and removed on clean shutdown
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn create(dir: impl AsRef<Path>, process_name: &str) -> Result<Self> {
        let path = dir.as_ref().join(format!("{process_name}.pid"));
        std::fs::write(&path, std::process::id().to_string())
            .with_context(|| format!("writing pid file {}", path.display()))?;
        Ok(Self { path })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Receiver that flips to `true` on SIGTERM or ctrl-c.
pub fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = tx.send(true);
    });
    rx
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            warn!("SIGTERM handler unavailable ({e}), falling back to ctrl-c only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
