//! Garm - automated futures-trading orchestrator core
//!
//! Garm consumes trading signals, places entry limit orders on a
//! crypto-derivatives exchange, and autonomously manages everything that
//! follows: fill detection, protective stop-loss / take-profit legs,
//! a one-shot trailing procedure, and reconciliation against the
//! exchange's authoritative state.
//!
//! ## Architecture
//! Two independently restartable processes share nothing but two files:
//! - **Scanner** hosts the [`executor::OrderExecutor`] and a batch
//!   scheduler over the ticker list; it appends to the request queue.
//! - **Watchdog** hosts the [`watchdog::WatchdogCore`] poll loop; it
//!   drains the queue and exclusively owns the state file.
//!
//! ## Core Modules
//! - `core`: shared domain types, signals, error taxonomy
//! - `config`: `KEY=value` configuration with hot-reloadable scalars
//! - `exchange`: signed REST gateway, symbol filters, rate limiting
//! - `executor`: admission pipeline, sizing, submission, registration
//! - `watchdog`: durable state store, request channel, poll loop, trailing
//! - `recovery`: startup reconciliation and symbol availability
//! - `notify`: best-effort notifier capability
//! - `resilience`: exponential backoff

pub mod config;
pub mod core;
pub mod exchange;
pub mod executor;
pub mod notify;
pub mod recovery;
pub mod resilience;
pub mod watchdog;

// Re-export the types most callers need
pub use crate::core::{
    AdmissionError, ExchangeError, ExecutorError, Side, SignalDirection, TradingSignal,
};
pub use config::{Config, ConfigHandle};
pub use exchange::{ExchangeApi, FilterCache, FuturesRestClient};
pub use executor::{ExecutionOutcome, OrderExecutor};
pub use notify::Notifier;
pub use recovery::{AvailabilityTable, RecoveryCoordinator};
pub use watchdog::{RequestQueue, StateStore, WatchdogCore, WatchedOrder};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::{Config, ConfigHandle};
    pub use crate::core::{
        AdmissionError, ExchangeError, ExecutorError, Side, SignalDirection, TradingSignal,
    };
    pub use crate::exchange::{ExchangeApi, FilterCache, FuturesRestClient};
    pub use crate::executor::{ExecutionOutcome, OrderExecutor};
    pub use crate::notify::Notifier;
    pub use crate::recovery::{AvailabilityTable, RecoveryCoordinator};
    pub use crate::watchdog::{RequestQueue, StateStore, WatchdogCore, WatchedOrder};
}
