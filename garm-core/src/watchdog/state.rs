//! Durable store of watched orders
//!
//! The watchdog process is the only writer. Every mutation rewrites the
//! whole live set through a temp file and an atomic rename, rotating the
//! previous generation into a single `.backup.json`. Load tries the
//! primary, then the backup, then starts empty; that last case is a fault
//! the caller must surface through the notifier.

use crate::core::{PositionSide, Side, SignalDirection, StateError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Lifecycle state of a watched order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WatchedOrderStatus {
    /// Entry order resting on the exchange, unfilled
    New,
    /// Entry order partially executed; exits still deferred
    PartiallyFilled,
    /// Entry fully executed; position open, exits being managed
    Filled,
    /// Position closed (SL, TP or external); terminal
    Closed,
    /// Entry order left the book without executing; terminal
    Cancelled,
    /// Exchange refused the entry order; terminal
    Rejected,
}

impl WatchedOrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WatchedOrderStatus::Closed
                | WatchedOrderStatus::Cancelled
                | WatchedOrderStatus::Rejected
        )
    }
}

/// One entry order and its exit management, the unit of persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchedOrder {
    /// Exchange-assigned id of the entry order; primary key
    pub order_id: String,
    /// Client-generated correlation id, set before submission so that a
    /// timed-out placement can be reconciled later
    #[serde(default)]
    pub client_order_id: String,
    pub symbol: String,
    /// Side of the entry order
    pub side: Side,
    pub position_side: PositionSide,
    /// Entry quantity, quantized
    pub quantity: Decimal,
    /// Entry limit price, quantized
    pub price: Decimal,
    pub status: WatchedOrderStatus,
    /// Strategic direction
    pub signal_type: SignalDirection,
    /// Target stop-loss price
    pub stop_loss: Decimal,
    /// Target take-profit price
    pub take_profit: Decimal,
    #[serde(default)]
    pub sl_order_id: Option<String>,
    #[serde(default)]
    pub tp_order_id: Option<String>,
    /// Average fill price, set on the FILLED transition
    #[serde(default)]
    pub entry_price_filled: Option<Decimal>,
    /// Quantity of the resulting position
    #[serde(default)]
    pub position_size: Option<Decimal>,
    /// One-shot latch for the trailing procedure
    #[serde(default)]
    pub trailing_triggered: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub filled_at: Option<DateTime<Utc>>,
    /// Exit-leg placement retries consumed
    #[serde(default)]
    pub sl_tp_attempts: u32,
}

impl WatchedOrder {
    /// Both exit legs are resting on the exchange
    pub fn has_exit_legs(&self) -> bool {
        self.sl_order_id.is_some() && self.tp_order_id.is_some()
    }

    /// Side that closes the position this order opened
    pub fn exit_side(&self) -> Side {
        self.side.opposite()
    }
}

/// Outcome of loading the store from disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    Primary,
    Backup,
    /// Neither file was usable; the store starts empty and the condition
    /// must be surfaced through the notifier
    Empty,
}

/// Keyed store of live watched orders with write-through persistence.
pub struct StateStore {
    path: PathBuf,
    orders: BTreeMap<String, WatchedOrder>,
}

impl StateStore {
    /// Open the store, reading the primary file, falling back to the
    /// backup, and starting empty when both are unusable.
    pub fn open(path: impl Into<PathBuf>) -> (Self, LoadSource) {
        let path = path.into();
        match Self::read_file(&path) {
            Ok(Some(orders)) => {
                info!(count = orders.len(), "loaded watchdog state");
                return (Self { path, orders }, LoadSource::Primary);
            }
            Ok(None) => {
                debug!("no state file yet, starting empty");
                return (
                    Self {
                        path,
                        orders: BTreeMap::new(),
                    },
                    LoadSource::Primary,
                );
            }
            Err(e) => {
                error!("state file unreadable: {e}");
            }
        }
        let backup = backup_path(&path);
        match Self::read_file(&backup) {
            Ok(Some(orders)) => {
                warn!(count = orders.len(), "recovered watchdog state from backup");
                (Self { path, orders }, LoadSource::Backup)
            }
            _ => {
                error!("backup also unusable, starting with empty state");
                (
                    Self {
                        path,
                        orders: BTreeMap::new(),
                    },
                    LoadSource::Empty,
                )
            }
        }
    }

    /// Read-only view of a state file, used by the scanner process and the
    /// recovery coordinator. Never writes, never falls back to the backup
    /// silently: a missing file is just an empty set.
    pub fn read_only(path: impl AsRef<Path>) -> Result<BTreeMap<String, WatchedOrder>, StateError> {
        match Self::read_file(path.as_ref()) {
            Ok(Some(orders)) => Ok(orders),
            Ok(None) => Ok(BTreeMap::new()),
            Err(e) => Err(e),
        }
    }

    fn read_file(path: &Path) -> Result<Option<BTreeMap<String, WatchedOrder>>, StateError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if raw.trim().is_empty() {
            return Err(StateError::LoadFailed(format!(
                "{} is empty",
                path.display()
            )));
        }
        let orders: BTreeMap<String, WatchedOrder> = serde_json::from_str(&raw)?;
        Ok(Some(orders))
    }

    /// Register a new watched order. Refuses a duplicate `order_id`; the
    /// duplicate is the producer's retry and must not clobber live state.
    pub fn insert(&mut self, order: WatchedOrder) -> Result<(), StateError> {
        if self.orders.contains_key(&order.order_id) {
            return Err(StateError::DuplicateOrder(order.order_id));
        }
        self.orders.insert(order.order_id.clone(), order);
        self.persist()
    }

    /// Apply a mutation to one order and persist the whole set.
    pub fn update<F>(&mut self, order_id: &str, mutate: F) -> Result<(), StateError>
    where
        F: FnOnce(&mut WatchedOrder),
    {
        match self.orders.get_mut(order_id) {
            Some(order) => {
                mutate(order);
                self.persist()
            }
            None => Err(StateError::LoadFailed(format!(
                "order {order_id} not in live set"
            ))),
        }
    }

    /// Remove a terminal order from the live set.
    pub fn remove(&mut self, order_id: &str) -> Result<Option<WatchedOrder>, StateError> {
        let removed = self.orders.remove(order_id);
        if removed.is_some() {
            self.persist()?;
        }
        Ok(removed)
    }

    pub fn get(&self, order_id: &str) -> Option<&WatchedOrder> {
        self.orders.get(order_id)
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WatchedOrder> {
        self.orders.values()
    }

    pub fn order_ids(&self) -> Vec<String> {
        self.orders.keys().cloned().collect()
    }

    /// Live orders for one symbol
    pub fn for_symbol<'a>(&'a self, symbol: &'a str) -> impl Iterator<Item = &'a WatchedOrder> {
        self.orders.values().filter(move |o| o.symbol == symbol)
    }

    /// Serialize the live set through a temp file, rotate the previous
    /// generation to the backup, then atomically rename into place.
    pub fn persist(&self) -> Result<(), StateError> {
        let tmp = self.path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(&self.orders)?;
        fs::write(&tmp, body)?;
        if self.path.exists() {
            fs::rename(&self.path, backup_path(&self.path))?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".backup.json");
    path.with_file_name(name)
}
