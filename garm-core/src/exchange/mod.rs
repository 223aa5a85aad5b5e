//! Typed gateway over the futures exchange REST API
//!
//! The [`ExchangeApi`] trait is the seam between trading logic and the
//! wire: the executor, watchdog and recovery layers only ever talk to the
//! trait, and tests substitute a scripted implementation. The production
//! implementation is [`FuturesRestClient`]: signed requests, bounded
//! timeouts, token-bucket pacing and retry-with-backoff for transient
//! failures.

pub mod client;
pub mod filters;
pub mod models;
pub mod rate_limit;

pub use client::FuturesRestClient;
pub use filters::{FilterCache, SymbolFilters};
pub use models::{
    canonical_decimal, AssetBalance, FuturesAccount, LeverageAck, MarkPrice, OrderAck, OrderInfo,
    OrderRequest, PositionInfo, SymbolInfo,
};
pub use rate_limit::TokenBucket;

use crate::core::ExchangeError;
use async_trait::async_trait;

/// Required exchange capabilities.
///
/// Order placement is deliberately not retried by implementations: a
/// timed-out placement has an unknown outcome and is reconciled through
/// its client order id on a later poll.
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    /// Balances and positions
    async fn account(&self) -> Result<FuturesAccount, ExchangeError>;

    /// Open orders, optionally restricted to one symbol
    async fn open_orders(&self, symbol: Option<&str>) -> Result<Vec<OrderInfo>, ExchangeError>;

    /// Place an order; numeric fields must already be quantized
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderAck, ExchangeError>;

    /// Cancel an order by exchange id
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), ExchangeError>;

    /// Change per-symbol leverage; the response may omit the echo
    async fn change_leverage(&self, symbol: &str, leverage: u32)
        -> Result<LeverageAck, ExchangeError>;

    /// Symbol metadata (precision filters)
    async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, ExchangeError>;

    /// Status of one order by exchange id
    async fn order_status(&self, symbol: &str, order_id: &str)
        -> Result<OrderInfo, ExchangeError>;

    /// Look up an order by the client-generated correlation id; `None`
    /// when the exchange has never seen it
    async fn order_by_client_id(
        &self,
        symbol: &str,
        client_order_id: &str,
    ) -> Result<Option<OrderInfo>, ExchangeError>;

    /// Current mark price for a symbol
    async fn mark_price(&self, symbol: &str) -> Result<MarkPrice, ExchangeError>;
}
