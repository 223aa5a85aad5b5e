//! Trading signals as consumed by the executor
//!
//! Signals are produced by an external analyzer, validated at the
//! constructor, consumed once, and never stored.

use super::SignalDirection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A signal failed structural validation before reaching admission
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SignalError {
    #[error("symbol must be non-empty and uppercase, got `{0}`")]
    BadSymbol(String),
    #[error("confidence {0} outside [0, 1]")]
    BadConfidence(f64),
    #[error("prices must be positive: entry={entry} sl={stop_loss} tp={take_profit}")]
    NonPositivePrice {
        entry: Decimal,
        stop_loss: Decimal,
        take_profit: Decimal,
    },
    #[error("{direction} signal requires {expected}, got entry={entry} sl={stop_loss} tp={take_profit}")]
    InvertedLevels {
        direction: SignalDirection,
        expected: &'static str,
        entry: Decimal,
        stop_loss: Decimal,
        take_profit: Decimal,
    },
}

/// One actionable trading signal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingSignal {
    pub symbol: String,
    pub direction: SignalDirection,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub confidence: f64,
    #[serde(default)]
    pub signal_id: Option<Uuid>,
    pub source: String,
}

impl TradingSignal {
    /// Build a validated signal.
    ///
    /// LONG requires `stop_loss < entry_price < take_profit`; SHORT requires
    /// `take_profit < entry_price < stop_loss`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: impl Into<String>,
        direction: SignalDirection,
        entry_price: Decimal,
        stop_loss: Decimal,
        take_profit: Decimal,
        confidence: f64,
        signal_id: Option<Uuid>,
        source: impl Into<String>,
    ) -> Result<Self, SignalError> {
        let symbol = symbol.into();
        if symbol.is_empty() || symbol.chars().any(|c| c.is_ascii_lowercase()) {
            return Err(SignalError::BadSymbol(symbol));
        }
        if !(0.0..=1.0).contains(&confidence) || confidence.is_nan() {
            return Err(SignalError::BadConfidence(confidence));
        }
        if entry_price <= Decimal::ZERO || stop_loss <= Decimal::ZERO || take_profit <= Decimal::ZERO
        {
            return Err(SignalError::NonPositivePrice {
                entry: entry_price,
                stop_loss,
                take_profit,
            });
        }
        let ordered = match direction {
            SignalDirection::Long => stop_loss < entry_price && entry_price < take_profit,
            SignalDirection::Short => take_profit < entry_price && entry_price < stop_loss,
        };
        if !ordered {
            return Err(SignalError::InvertedLevels {
                direction,
                expected: match direction {
                    SignalDirection::Long => "sl < entry < tp",
                    SignalDirection::Short => "tp < entry < sl",
                },
                entry: entry_price,
                stop_loss,
                take_profit,
            });
        }
        Ok(Self {
            symbol,
            direction,
            entry_price,
            stop_loss,
            take_profit,
            confidence,
            signal_id,
            source: source.into(),
        })
    }

    /// Full distance from entry to target, always positive for a valid signal
    pub fn target_distance(&self) -> Decimal {
        (self.take_profit - self.entry_price).abs()
    }
}
