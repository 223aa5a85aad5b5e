//! Binary support crate: CLI plumbing and the analyzer seam
//!
//! The signal analyzer is an external collaborator; the scanner only
//! depends on the [`SignalSource`] capability defined here.

pub mod common;

use async_trait::async_trait;
use garm_core::TradingSignal;

/// Produces at most one actionable signal per symbol per batch.
#[async_trait]
pub trait SignalSource: Send + Sync {
    async fn analyze(&self, symbol: &str) -> Option<TradingSignal>;
}

/// Placeholder analyzer used until a real signal engine is wired in.
/// Scans produce no signals; the orchestration around them still runs.
pub struct NullAnalyzer;

#[async_trait]
impl SignalSource for NullAnalyzer {
    async fn analyze(&self, _symbol: &str) -> Option<TradingSignal> {
        None
    }
}
