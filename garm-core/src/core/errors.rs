//! Error taxonomy for admission, exchange, state and queue failures
//!
//! Admission and per-order errors are recovered locally; process-level
//! errors surface through the notifier and leave the process running
//! degraded. Nothing here is allowed to kill a process silently.

use rust_decimal::Decimal;
use std::time::Duration;
use thiserror::Error;

/// Admission pipeline failures. No exchange action has been taken when one
/// of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("{symbol} is blocked: {reason}")]
    SymbolBlocked { symbol: String, reason: String },

    #[error("{symbol}: {current} positions/orders at or above the limit of {limit}")]
    ConcurrencyLimitReached {
        symbol: String,
        current: usize,
        limit: usize,
    },

    #[error("{symbol}: entry {candidate} is not strictly better than existing reference {reference}")]
    PriceQualityRejected {
        symbol: String,
        candidate: Decimal,
        reference: Decimal,
    },

    #[error("{symbol}: notional {notional} below minimum {min_notional}")]
    UndersizedPosition {
        symbol: String,
        notional: Decimal,
        min_notional: Decimal,
    },
}

/// Failures at the exchange boundary
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExchangeError {
    /// The exchange explicitly rejected the request; terminal per operation
    #[error("exchange rejected request: code {code}: {message}")]
    Rejected { code: i64, message: String },

    /// Transport-level failure; transient, retried with backoff
    #[error("exchange unavailable: {0}")]
    Unavailable(String),

    /// 429/418 weight pressure; transient, backs off
    #[error("rate limited (HTTP {status})")]
    RateLimited { status: u16 },

    /// The exchange reports the symbol does not exist
    #[error("unknown symbol {0}")]
    UnknownSymbol(String),

    /// The request deadline elapsed; the outcome is unknown and must be
    /// reconciled by client order id on a later poll
    #[error("request timed out after {0:?}, outcome unknown")]
    Timeout(Duration),
}

impl ExchangeError {
    /// Transient errors are worth retrying on idempotent calls. Order
    /// placement handles `Timeout` separately: the outcome is unknown and
    /// a blind retry could double-place.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ExchangeError::Unavailable(_)
                | ExchangeError::RateLimited { .. }
                | ExchangeError::Timeout(_)
        )
    }
}

/// Durable-state failures (state file and its backup)
#[derive(Debug, Error)]
pub enum StateError {
    /// Both the state file and its backup were unreadable; the watchdog
    /// starts empty and the condition is surfaced via the notifier
    #[error("state load failed: {0}")]
    LoadFailed(String),

    /// `order_id` uniqueness violation; the second registration is refused
    #[error("order {0} is already watched")]
    DuplicateOrder(String),

    #[error("state io: {0}")]
    Io(#[from] std::io::Error),

    #[error("state serialization: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Request-queue failures
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("could not acquire queue lock at {path} within {waited:?}")]
    LockTimeout { path: String, waited: Duration },

    #[error("queue io: {0}")]
    Io(#[from] std::io::Error),

    #[error("queue serialization: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Notifier transport failure; best-effort, never blocks a trading decision
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notifier transport: {0}")]
    Transport(String),

    #[error("notifier rejected message (HTTP {0})")]
    Rejected(u16),
}

/// Executor-level failures, including the gravest: an order placed on the
/// exchange that could not be registered with the watchdog.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error("invalid signal: {0}")]
    Signal(#[from] super::signal::SignalError),

    /// Order {order_id} exists on the exchange but registration failed and
    /// the cancel attempt did not confirm; a human must resolve this
    #[error("order {order_id} on {symbol} placed but not registered (cancel attempted: {cancel_attempted})")]
    EnqueueFailedWithPlacedOrder {
        symbol: String,
        order_id: String,
        cancel_attempted: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ExchangeError::Unavailable("dns".into()).is_transient());
        assert!(ExchangeError::RateLimited { status: 429 }.is_transient());
        assert!(ExchangeError::Timeout(Duration::from_secs(10)).is_transient());
        assert!(!ExchangeError::Rejected {
            code: -2010,
            message: "insufficient balance".into()
        }
        .is_transient());
        assert!(!ExchangeError::UnknownSymbol("NOPEUSDT".into()).is_transient());
    }
}
