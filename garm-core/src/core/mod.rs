//! Shared domain types: sides, directions, order vocabulary, signals, errors

pub mod errors;
pub mod signal;
pub mod types;

pub use errors::{
    AdmissionError, ExchangeError, ExecutorError, NotifyError, QueueError, StateError,
};
pub use signal::{SignalError, TradingSignal};
pub use types::{
    ExchangeOrderStatus, OrderType, PositionSide, Side, SignalDirection, TimeInForce,
};
