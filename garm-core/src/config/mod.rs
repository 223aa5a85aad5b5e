//! Configuration loading and hot-reload surface
//!
//! Configuration is a plain-text `KEY=value` file loaded once at startup.
//! The scalar trading parameters are re-read at each batch boundary and
//! published as an atomically swapped [`Config`] snapshot; everything else
//! (endpoint, credentials, file paths, notifier target) requires a restart.
//!
//! Components take one snapshot at the top of a decision and use it for the
//! whole decision, so a reload never changes parameters mid-admission.

pub mod types;

pub use types::{
    Config, ExchangeConfig, NotifierConfig, PathsConfig, ScannerConfig, TradingConfig,
};

use anyhow::{bail, Context, Result};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

/// Parse a `KEY=value` file into a map. `#` starts a comment; blank lines
/// are ignored; values may be quoted.
fn parse_kv(raw: &str) -> Result<HashMap<String, String>> {
    let mut out = HashMap::new();
    for (lineno, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            bail!("line {}: expected KEY=value, got `{}`", lineno + 1, line);
        };
        let value = value.trim().trim_matches('"').trim_matches('\'');
        out.insert(key.trim().to_string(), value.to_string());
    }
    Ok(out)
}

fn get_parsed<T: FromStr>(kv: &HashMap<String, String>, key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match kv.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{key}: cannot parse `{raw}`: {e}")),
    }
}

fn get_string(kv: &HashMap<String, String>, key: &str, default: &str) -> String {
    kv.get(key).cloned().unwrap_or_else(|| default.to_string())
}

fn trading_from_kv(kv: &HashMap<String, String>, base: &TradingConfig) -> Result<TradingConfig> {
    Ok(TradingConfig {
        risk_percent: get_parsed(kv, "RISK_PERCENT", base.risk_percent)?,
        leverage: get_parsed(kv, "LEVERAGE", base.leverage)?,
        max_concurrent_orders: get_parsed(kv, "MAX_CONCURRENT_ORDERS", base.max_concurrent_orders)?,
        poll_interval_seconds: get_parsed(kv, "POLL_INTERVAL_SECONDS", base.poll_interval_seconds)?,
        max_sl_tp_attempts: get_parsed(kv, "MAX_SL_TP_ATTEMPTS", base.max_sl_tp_attempts)?,
        trailing_trigger_fraction: get_parsed(
            kv,
            "TRAILING_TRIGGER_FRACTION",
            base.trailing_trigger_fraction,
        )?,
        trailing_close_fraction: get_parsed(
            kv,
            "TRAILING_CLOSE_FRACTION",
            base.trailing_close_fraction,
        )?,
        trailing_sl_fraction: get_parsed(kv, "TRAILING_SL_FRACTION", base.trailing_sl_fraction)?,
    })
}

impl Config {
    /// Load a full configuration from a `KEY=value` file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let kv = parse_kv(&raw)?;
        let defaults = Config::default();

        let config = Config {
            trading: trading_from_kv(&kv, &defaults.trading)?,
            exchange: ExchangeConfig {
                rest_url: get_string(&kv, "REST_URL", &defaults.exchange.rest_url),
                api_key: get_string(&kv, "API_KEY", ""),
                secret_key: get_string(&kv, "SECRET_KEY", ""),
                quote_asset: get_string(&kv, "QUOTE_ASSET", &defaults.exchange.quote_asset),
                http_timeout_seconds: get_parsed(
                    &kv,
                    "HTTP_TIMEOUT_SECONDS",
                    defaults.exchange.http_timeout_seconds,
                )?,
                weight_budget_per_minute: get_parsed(
                    &kv,
                    "WEIGHT_BUDGET_PER_MINUTE",
                    defaults.exchange.weight_budget_per_minute,
                )?,
                weight_safety_margin: get_parsed(
                    &kv,
                    "WEIGHT_SAFETY_MARGIN",
                    defaults.exchange.weight_safety_margin,
                )?,
            },
            paths: PathsConfig {
                state_file: PathBuf::from(get_string(
                    &kv,
                    "STATE_FILE",
                    defaults.paths.state_file.to_str().unwrap_or_default(),
                )),
                requests_file: PathBuf::from(get_string(
                    &kv,
                    "REQUESTS_FILE",
                    defaults.paths.requests_file.to_str().unwrap_or_default(),
                )),
                ticker_list: PathBuf::from(get_string(
                    &kv,
                    "TICKER_LIST",
                    defaults.paths.ticker_list.to_str().unwrap_or_default(),
                )),
                pid_dir: PathBuf::from(get_string(
                    &kv,
                    "PID_DIR",
                    defaults.paths.pid_dir.to_str().unwrap_or_default(),
                )),
            },
            notifier: NotifierConfig {
                telegram_bot_token: kv.get("TELEGRAM_BOT_TOKEN").cloned(),
                telegram_chat_id: kv.get("TELEGRAM_CHAT_ID").cloned(),
            },
            scanner: ScannerConfig {
                worker_pool_size: get_parsed(
                    &kv,
                    "WORKER_POOL_SIZE",
                    defaults.scanner.worker_pool_size,
                )?,
                batch_interval_seconds: get_parsed(
                    &kv,
                    "BATCH_INTERVAL_SECONDS",
                    defaults.scanner.batch_interval_seconds,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.trading;
        if t.risk_percent <= Decimal::ZERO || t.risk_percent > Decimal::ONE_HUNDRED {
            bail!("RISK_PERCENT must be in (0, 100], got {}", t.risk_percent);
        }
        if t.leverage == 0 {
            bail!("LEVERAGE must be at least 1");
        }
        if t.max_concurrent_orders == 0 {
            bail!("MAX_CONCURRENT_ORDERS must be at least 1");
        }
        if t.poll_interval_seconds == 0 {
            bail!("POLL_INTERVAL_SECONDS must be positive");
        }
        for (key, value) in [
            ("TRAILING_TRIGGER_FRACTION", t.trailing_trigger_fraction),
            ("TRAILING_CLOSE_FRACTION", t.trailing_close_fraction),
            ("TRAILING_SL_FRACTION", t.trailing_sl_fraction),
        ] {
            if value <= Decimal::ZERO || value >= Decimal::ONE {
                bail!("{key} must be in (0, 1), got {value}");
            }
        }
        if self.exchange.weight_safety_margin <= Decimal::ZERO
            || self.exchange.weight_safety_margin > Decimal::ONE
        {
            bail!(
                "WEIGHT_SAFETY_MARGIN must be in (0, 1], got {}",
                self.exchange.weight_safety_margin
            );
        }
        Ok(())
    }
}

/// Shared handle to the current configuration snapshot.
///
/// `snapshot()` is cheap (one Arc clone); `reload_trading()` re-reads only
/// the hot-reloadable scalars and swaps the snapshot atomically.
#[derive(Clone)]
pub struct ConfigHandle {
    current: Arc<RwLock<Arc<Config>>>,
    path: PathBuf,
}

impl ConfigHandle {
    pub fn new(config: Config, path: impl Into<PathBuf>) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(config))),
            path: path.into(),
        }
    }

    /// Load from file and wrap in a handle.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let config = Config::load(&path)?;
        Ok(Self::new(config, path))
    }

    /// The current snapshot. Hold it for the duration of one decision.
    pub fn snapshot(&self) -> Arc<Config> {
        self.current.read().clone()
    }

    /// Re-read the hot-reloadable trading scalars from the config file and
    /// publish a new snapshot if anything changed. Restart-only sections
    /// keep their startup values. Returns whether a new snapshot was
    /// published; a missing or malformed file keeps the old snapshot.
    pub fn reload_trading(&self) -> bool {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("config reload skipped, cannot read {}: {e}", self.path.display());
                return false;
            }
        };
        let kv = match parse_kv(&raw) {
            Ok(kv) => kv,
            Err(e) => {
                warn!("config reload skipped, parse error: {e}");
                return false;
            }
        };
        let old = self.snapshot();
        let trading = match trading_from_kv(&kv, &old.trading) {
            Ok(trading) => trading,
            Err(e) => {
                warn!("config reload skipped: {e}");
                return false;
            }
        };
        if trading == old.trading {
            return false;
        }
        let mut updated = (*old).clone();
        updated.trading = trading;
        if let Err(e) = updated.validate() {
            warn!("config reload skipped, validation failed: {e}");
            return false;
        }
        info!("trading config reloaded: {:?}", updated.trading);
        *self.current.write() = Arc::new(updated);
        true
    }
}

/// Read the ticker list: one uppercase symbol per line, `#` comments.
pub fn load_ticker_list(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading ticker list {}", path.display()))?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.to_uppercase())
        .collect())
}
