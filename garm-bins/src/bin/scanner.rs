//! Garm scanner process
//!
//! Hosts the order executor and the batch scheduler: every batch it
//! reloads the hot trading parameters and the ticker list, then runs the
//! analyzer over the list through a bounded worker pool. Admitted signals
//! become entry orders handed to the watchdog through the request queue.

use anyhow::{Context, Result};
use clap::Parser;
use garm_bins::common::{init_logging, shutdown_signal, CommonArgs, PidFile};
use garm_bins::{NullAnalyzer, SignalSource};
use garm_core::config::load_ticker_list;
use garm_core::exchange::FilterCache;
use garm_core::notify::build_notifier;
use garm_core::{
    AvailabilityTable, ConfigHandle, ExchangeApi, ExecutorError, FuturesRestClient, OrderExecutor,
    RecoveryCoordinator, RequestQueue,
};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

#[tokio::main]
async fn main() -> Result<()> {
    let args = CommonArgs::parse();
    init_logging(&args.log_level)?;

    let config_handle = ConfigHandle::load(&args.config)?;
    let config = config_handle.snapshot();

    tracing::info!("=== Garm: signal scanner ===");
    tracing::warn!("LIVE TRADING MODE - REAL FUNDS AT RISK");
    let _pid = PidFile::create(&config.paths.pid_dir, "garm-scanner")?;

    let notifier = build_notifier(&config.notifier);
    let api: Arc<dyn ExchangeApi> = Arc::new(
        FuturesRestClient::new(&config.exchange)?.with_notifier(notifier.clone()),
    );
    let filters = Arc::new(FilterCache::new(api.clone()));

    // the scanner computes its own availability table at startup
    let recovery = RecoveryCoordinator::new(api.clone(), notifier.clone());
    let availability = match recovery.reconcile(&config.paths.state_file).await {
        Ok((table, _report)) => Arc::new(table),
        Err(e) => {
            tracing::error!("startup reconciliation failed, starting unblocked: {e:#}");
            Arc::new(AvailabilityTable::new())
        }
    };

    let executor = Arc::new(OrderExecutor::new(
        api,
        filters,
        config_handle.clone(),
        RequestQueue::new(&config.paths.requests_file),
        notifier,
        availability,
        &config.paths.state_file,
    ));
    let analyzer: Arc<dyn SignalSource> = Arc::new(NullAnalyzer);
    tracing::warn!("no signal analyzer wired in; batches will scan without trading");

    let mut shutdown = shutdown_signal();
    loop {
        // batch boundary: hot-reload scalars and the ticker list
        config_handle.reload_trading();
        let batch_config = config_handle.snapshot();
        let tickers = match load_ticker_list(&batch_config.paths.ticker_list) {
            Ok(tickers) => tickers,
            Err(e) => {
                tracing::warn!("ticker list unavailable, skipping batch: {e}");
                Vec::new()
            }
        };
        tracing::info!(tickers = tickers.len(), "starting scan batch");

        let pool = Arc::new(Semaphore::new(batch_config.scanner.worker_pool_size));
        let mut workers = JoinSet::new();
        for symbol in tickers {
            let permit = pool
                .clone()
                .acquire_owned()
                .await
                .context("worker pool closed")?;
            let analyzer = analyzer.clone();
            let executor = executor.clone();
            workers.spawn(async move {
                let _permit = permit;
                let Some(signal) = analyzer.analyze(&symbol).await else {
                    return;
                };
                match executor.execute(&signal).await {
                    Ok(outcome) => {
                        tracing::info!(
                            symbol = %outcome.symbol,
                            order_id = %outcome.order_id,
                            "signal executed"
                        );
                    }
                    Err(ExecutorError::Admission(reason)) => {
                        tracing::info!(%symbol, %reason, "signal not admitted");
                    }
                    Err(e) => {
                        tracing::error!(%symbol, "signal execution failed: {e:#}");
                    }
                }
            });
        }
        while workers.join_next().await.is_some() {}

        let pause =
            std::time::Duration::from_secs(batch_config.scanner.batch_interval_seconds);
        tokio::select! {
            _ = tokio::time::sleep(pause) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    tracing::info!("scanner stopped");
    Ok(())
}
