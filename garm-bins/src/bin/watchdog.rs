//! Garm watchdog process
//!
//! Hosts the orders watchdog core loop: drains the request queue, polls
//! the exchange for every watched order, manages protective exits, and
//! persists its state across restarts. Independently restartable; on
//! startup it reconciles persisted state against the exchange.

use anyhow::Result;
use clap::Parser;
use garm_bins::common::{init_logging, shutdown_signal, CommonArgs, PidFile};
use garm_core::exchange::FilterCache;
use garm_core::notify::{build_notifier, notify_best_effort};
use garm_core::watchdog::{LoadSource, StateStore, WatchdogCore};
use garm_core::{ConfigHandle, ExchangeApi, FuturesRestClient, RecoveryCoordinator, RequestQueue};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let args = CommonArgs::parse();
    init_logging(&args.log_level)?;

    let config_handle = ConfigHandle::load(&args.config)?;
    let config = config_handle.snapshot();

    tracing::info!("=== Garm: orders watchdog ===");
    let _pid = PidFile::create(&config.paths.pid_dir, "garm-watchdog")?;

    let notifier = build_notifier(&config.notifier);
    let api: Arc<dyn ExchangeApi> = Arc::new(
        FuturesRestClient::new(&config.exchange)?.with_notifier(notifier.clone()),
    );
    let filters = Arc::new(FilterCache::new(api.clone()));

    // startup reconciliation; a failure here degrades to a plain start
    let recovery = RecoveryCoordinator::new(api.clone(), notifier.clone());
    if let Err(e) = recovery.reconcile(&config.paths.state_file).await {
        tracing::error!("startup reconciliation failed: {e:#}");
        notify_best_effort(
            notifier.as_ref(),
            &format!("Watchdog started without reconciliation: {e:#}"),
        )
        .await;
    }

    let (store, source) = StateStore::open(&config.paths.state_file);
    if source == LoadSource::Empty {
        notify_best_effort(
            notifier.as_ref(),
            "FAULT: watchdog state and backup were both unreadable; starting empty",
        )
        .await;
    }

    let queue = RequestQueue::new(&config.paths.requests_file);
    let mut core = WatchdogCore::new(api, filters, notifier, config_handle, store, queue);

    core.run(shutdown_signal()).await;
    Ok(())
}
