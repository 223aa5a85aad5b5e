use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Scalar trading parameters, re-read at batch boundaries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Risk budget per trade as percent of available quote balance
    pub risk_percent: Decimal,

    /// Per-symbol leverage to apply
    pub leverage: u32,

    /// Per-symbol cap on (positions + live entry orders), exit legs excluded
    pub max_concurrent_orders: usize,

    /// Watchdog poll cadence
    pub poll_interval_seconds: u64,

    /// Bound on SL/TP placement retries per watched order
    pub max_sl_tp_attempts: u32,

    /// Fraction of path-to-TP at which trailing engages
    pub trailing_trigger_fraction: Decimal,

    /// Fraction of the position closed when trailing engages
    pub trailing_close_fraction: Decimal,

    /// Fraction of path-to-TP where the new stop is placed
    pub trailing_sl_fraction: Decimal,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            risk_percent: Decimal::TWO,
            leverage: 10,
            max_concurrent_orders: 1,
            poll_interval_seconds: 30,
            max_sl_tp_attempts: 3,
            trailing_trigger_fraction: Decimal::new(80, 2),
            trailing_close_fraction: Decimal::new(80, 2),
            trailing_sl_fraction: Decimal::new(50, 2),
        }
    }
}

impl TradingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }
}

/// Exchange connection settings; changing these requires a restart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub rest_url: String,
    pub api_key: String,
    pub secret_key: String,
    /// Quote asset whose available balance funds new positions
    pub quote_asset: String,
    /// Request deadline for exchange calls
    pub http_timeout_seconds: u64,
    /// Documented request-weight budget per minute
    pub weight_budget_per_minute: u32,
    /// Fraction of the weight budget the gateway actually spends
    pub weight_safety_margin: Decimal,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            rest_url: "https://fapi.binance.com".to_string(),
            api_key: String::new(),
            secret_key: String::new(),
            quote_asset: "USDT".to_string(),
            http_timeout_seconds: 10,
            weight_budget_per_minute: 2400,
            weight_safety_margin: Decimal::new(50, 2),
        }
    }
}

/// File locations shared between the two processes; restart-only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    pub state_file: PathBuf,
    pub requests_file: PathBuf,
    pub ticker_list: PathBuf,
    pub pid_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from("orders_watchdog_state.json"),
            requests_file: PathBuf::from("orders_watchdog_requests.json"),
            ticker_list: PathBuf::from("tickers.txt"),
            pid_dir: PathBuf::from("."),
        }
    }
}

/// Notifier transport settings; restart-only. Unset means log-only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotifierConfig {
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
}

/// Scanner worker pool; restart-only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Bounded worker pool size for the ticker batch
    pub worker_pool_size: usize,
    /// Pause between ticker batches
    pub batch_interval_seconds: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 8,
            batch_interval_seconds: 60,
        }
    }
}

/// Complete process configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub trading: TradingConfig,
    pub exchange: ExchangeConfig,
    pub paths: PathsConfig,
    pub notifier: NotifierConfig,
    pub scanner: ScannerConfig,
}
