//! Startup reconciliation against authoritative exchange state
//!
//! Each process runs this once at startup: load the persisted watched
//! orders, query positions and open orders, derive the per-symbol
//! trading-availability table, and compile a discrepancy report. The
//! report is observability, not a control surface; anomalies are expected
//! to be resolved by a human before they become consequential.

use crate::core::ExchangeOrderStatus;
use crate::exchange::ExchangeApi;
use crate::notify::{notify_best_effort, Notifier};
use crate::watchdog::{StateStore, WatchedOrder};
use anyhow::Result;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Whether the executor may open new exposure on a symbol
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolAvailability {
    Available,
    Blocked(String),
}

/// Per-symbol availability decisions, consulted by the executor before
/// admitting a signal. Symbols never seen are available.
#[derive(Default)]
pub struct AvailabilityTable {
    inner: DashMap<String, SymbolAvailability>,
}

impl AvailabilityTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn availability(&self, symbol: &str) -> SymbolAvailability {
        self.inner
            .get(symbol)
            .map(|entry| entry.value().clone())
            .unwrap_or(SymbolAvailability::Available)
    }

    pub fn block(&self, symbol: impl Into<String>, reason: impl Into<String>) {
        self.inner
            .insert(symbol.into(), SymbolAvailability::Blocked(reason.into()));
    }

    pub fn mark_available(&self, symbol: &str) {
        self.inner.remove(symbol);
    }

    pub fn blocked_symbols(&self) -> Vec<String> {
        self.inner
            .iter()
            .filter(|entry| matches!(entry.value(), SymbolAvailability::Blocked(_)))
            .map(|entry| entry.key().clone())
            .collect()
    }
}

/// How a stale watched-order reference resolved against exchange history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleClassification {
    Filled,
    Cancelled,
    Unknown,
}

/// A watched order whose entry order is not open on the exchange
#[derive(Debug, Clone)]
pub struct StaleWatched {
    pub order_id: String,
    pub symbol: String,
    pub classification: StaleClassification,
}

/// Per-symbol one-line brief for the startup summary
#[derive(Debug, Clone)]
pub struct SymbolBrief {
    pub symbol: String,
    pub position_size: Decimal,
    pub open_order_count: usize,
    pub watched_count: usize,
}

/// The reconciliation outcome
#[derive(Debug, Default)]
pub struct ReconciliationReport {
    pub watched_symbols: BTreeSet<String>,
    pub position_symbols: BTreeSet<String>,
    /// Symbols with open exchange orders but no watched order; commonly
    /// orphan exit legs after manual intervention. Never auto-adopted.
    pub orphan_symbols: BTreeSet<String>,
    pub stale_watched: Vec<StaleWatched>,
    pub briefs: Vec<SymbolBrief>,
    /// The persisted state could not be read by this process
    pub state_unreadable: bool,
}

impl fmt::Display for ReconciliationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Reconciliation: {} watched symbol(s), {} open position(s), {} orphan symbol(s), {} stale reference(s)",
            self.watched_symbols.len(),
            self.position_symbols.len(),
            self.orphan_symbols.len(),
            self.stale_watched.len(),
        )?;
        if self.state_unreadable {
            writeln!(f, "WARNING: persisted state was unreadable")?;
        }
        for brief in &self.briefs {
            writeln!(
                f,
                "  {}: position {}, {} open order(s), {} watched",
                brief.symbol, brief.position_size, brief.open_order_count, brief.watched_count
            )?;
        }
        for stale in &self.stale_watched {
            writeln!(
                f,
                "  stale: order {} ({}) resolved as {:?}",
                stale.order_id, stale.symbol, stale.classification
            )?;
        }
        for symbol in &self.orphan_symbols {
            writeln!(f, "  orphan exchange orders on {symbol} (not adopted)")?;
        }
        Ok(())
    }
}

/// Runs the startup reconciliation for one process.
pub struct RecoveryCoordinator {
    api: Arc<dyn ExchangeApi>,
    notifier: Arc<dyn Notifier>,
}

impl RecoveryCoordinator {
    pub fn new(api: Arc<dyn ExchangeApi>, notifier: Arc<dyn Notifier>) -> Self {
        Self { api, notifier }
    }

    /// Reconcile persisted state with the exchange and produce the
    /// availability table plus the discrepancy report. Emits the startup
    /// summary through the notifier.
    pub async fn reconcile(
        &self,
        state_path: impl AsRef<Path>,
    ) -> Result<(AvailabilityTable, ReconciliationReport)> {
        let (watched, state_unreadable) = match StateStore::read_only(state_path.as_ref()) {
            Ok(orders) => (orders, false),
            Err(e) => {
                warn!("reconciliation reads empty state: {e}");
                (BTreeMap::new(), true)
            }
        };
        let live: Vec<&WatchedOrder> = watched
            .values()
            .filter(|order| !order.status.is_terminal())
            .collect();

        let account = self.api.account().await?;
        let open_orders = self.api.open_orders(None).await?;

        let watched_symbols: BTreeSet<String> =
            live.iter().map(|order| order.symbol.clone()).collect();
        let position_symbols: BTreeSet<String> = account
            .positions
            .iter()
            .filter(|position| position.is_open())
            .map(|position| position.symbol.clone())
            .collect();

        // every exchange order id any watched order knows about
        let known_ids: BTreeSet<&str> = live
            .iter()
            .flat_map(|order| {
                [
                    Some(order.order_id.as_str()),
                    order.sl_order_id.as_deref(),
                    order.tp_order_id.as_deref(),
                ]
            })
            .flatten()
            .collect();
        let orphan_symbols: BTreeSet<String> = open_orders
            .iter()
            .filter(|open| !known_ids.contains(open.order_id.as_str()))
            .map(|open| open.symbol.clone())
            .collect();

        let open_ids: BTreeSet<&str> = open_orders
            .iter()
            .map(|open| open.order_id.as_str())
            .collect();
        let mut stale_watched = Vec::new();
        for order in &live {
            if order.status != crate::watchdog::WatchedOrderStatus::New
                && order.status != crate::watchdog::WatchedOrderStatus::PartiallyFilled
            {
                continue;
            }
            if open_ids.contains(order.order_id.as_str()) {
                continue;
            }
            let classification = match self
                .api
                .order_status(&order.symbol, &order.order_id)
                .await
            {
                Ok(info) if info.status == ExchangeOrderStatus::Filled => {
                    StaleClassification::Filled
                }
                Ok(info) if info.status.is_gone() => StaleClassification::Cancelled,
                _ => StaleClassification::Unknown,
            };
            stale_watched.push(StaleWatched {
                order_id: order.order_id.clone(),
                symbol: order.symbol.clone(),
                classification,
            });
        }

        let table = AvailabilityTable::new();
        for symbol in &position_symbols {
            table.block(symbol.clone(), "open position");
        }
        for symbol in &watched_symbols {
            table.block(symbol.clone(), "live watched order");
        }

        let mut brief_symbols: BTreeSet<String> = BTreeSet::new();
        brief_symbols.extend(watched_symbols.iter().cloned());
        brief_symbols.extend(position_symbols.iter().cloned());
        brief_symbols.extend(orphan_symbols.iter().cloned());
        let briefs = brief_symbols
            .into_iter()
            .map(|symbol| {
                let position_size: Decimal = account
                    .positions
                    .iter()
                    .filter(|p| p.symbol == symbol && p.is_open())
                    .map(|p| p.position_amt.abs())
                    .sum();
                SymbolBrief {
                    open_order_count: open_orders.iter().filter(|o| o.symbol == symbol).count(),
                    watched_count: live.iter().filter(|o| o.symbol == symbol).count(),
                    symbol,
                    position_size,
                }
            })
            .collect();

        let report = ReconciliationReport {
            watched_symbols,
            position_symbols,
            orphan_symbols,
            stale_watched,
            briefs,
            state_unreadable,
        };

        info!(
            blocked = table.blocked_symbols().len(),
            "startup reconciliation complete"
        );
        notify_best_effort(self.notifier.as_ref(), &report.to_string()).await;
        Ok((table, report))
    }
}
