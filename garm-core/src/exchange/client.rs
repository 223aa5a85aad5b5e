//! Signed REST client for the futures exchange
//!
//! HMAC-SHA256 over the query string, api key header, hard request
//! deadline, token-bucket pacing, and exponential backoff on transient
//! failures for idempotent reads. Mutating calls are sent exactly once;
//! an unknown outcome is resolved by the watchdog through the client
//! order id.

use super::models::{
    ApiErrorBody, ExchangeInfo, FuturesAccount, LeverageAck, MarkPrice, OrderAck, OrderInfo,
    OrderRequest, SymbolInfo,
};
use super::rate_limit::TokenBucket;
use super::ExchangeApi;
use crate::config::ExchangeConfig;
use crate::core::ExchangeError;
use crate::notify::{notify_best_effort, Notifier};
use crate::resilience::{BackoffConfig, ExponentialBackoff};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Method, StatusCode};
use rust_decimal::prelude::ToPrimitive;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

/// Exchange error code for an unknown symbol
const CODE_INVALID_SYMBOL: i64 = -1121;
/// Exchange error code for "order does not exist"
pub const CODE_UNKNOWN_ORDER: i64 = -2013;

const RECV_WINDOW_MS: u32 = 5_000;

pub struct FuturesRestClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    secret_key: String,
    timeout: Duration,
    limiter: TokenBucket,
    notifier: Option<std::sync::Arc<dyn Notifier>>,
}

impl FuturesRestClient {
    pub fn new(config: &ExchangeConfig) -> Result<Self, ExchangeError> {
        let timeout = Duration::from_secs(config.http_timeout_seconds);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExchangeError::Unavailable(format!("building http client: {e}")))?;
        let margin = config
            .weight_safety_margin
            .to_f64()
            .unwrap_or(0.5)
            .clamp(0.01, 1.0);
        Ok(Self {
            http,
            base_url: config.rest_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            secret_key: config.secret_key.clone(),
            timeout,
            limiter: TokenBucket::new(config.weight_budget_per_minute, margin),
            notifier: None,
        })
    }

    /// Attach a notifier for the alerts the gateway raises itself
    /// (persistent rate limiting).
    pub fn with_notifier(mut self, notifier: std::sync::Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    fn sign(&self, query: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn build_query(params: &[(&str, String)]) -> String {
        params
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join("&")
    }

    fn signed_query(&self, params: &[(&str, String)]) -> String {
        let mut query = Self::build_query(params);
        let suffix = format!(
            "recvWindow={RECV_WINDOW_MS}&timestamp={}",
            Utc::now().timestamp_millis()
        );
        if query.is_empty() {
            query = suffix;
        } else {
            query = format!("{query}&{suffix}");
        }
        let signature = self.sign(&query);
        format!("{query}&signature={signature}")
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        signed: bool,
        weight: u32,
    ) -> Result<T, ExchangeError> {
        self.limiter.acquire(weight).await;

        let query = if signed {
            self.signed_query(params)
        } else {
            Self::build_query(params)
        };
        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };

        debug!(%path, ?method, "exchange request");
        let mut request = self.http.request(method, &url);
        if signed {
            request = request.header("X-MBX-APIKEY", &self.api_key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ExchangeError::Timeout(self.timeout)
            } else {
                ExchangeError::Unavailable(e.to_string())
            }
        })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
            return Err(ExchangeError::RateLimited {
                status: status.as_u16(),
            });
        }
        let body = response
            .text()
            .await
            .map_err(|e| ExchangeError::Unavailable(format!("reading response body: {e}")))?;

        if !status.is_success() {
            if status.is_server_error() {
                return Err(ExchangeError::Unavailable(format!("HTTP {status}: {body}")));
            }
            return Err(match serde_json::from_str::<ApiErrorBody>(&body) {
                Ok(err) if err.code == CODE_INVALID_SYMBOL => {
                    ExchangeError::UnknownSymbol(extract_symbol(params))
                }
                Ok(err) => ExchangeError::Rejected {
                    code: err.code,
                    message: err.msg,
                },
                Err(_) => ExchangeError::Rejected {
                    code: i64::from(status.as_u16()),
                    message: body,
                },
            });
        }

        serde_json::from_str(&body)
            .map_err(|e| ExchangeError::Unavailable(format!("decoding response: {e}")))
    }

    /// Idempotent read with bounded backoff on transient failures.
    async fn get_with_retry<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
        signed: bool,
        weight: u32,
    ) -> Result<T, ExchangeError> {
        let mut backoff = ExponentialBackoff::with_config(BackoffConfig::bounded(3));
        loop {
            match self
                .send::<T>(Method::GET, path, params, signed, weight)
                .await
            {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => match backoff.next_delay() {
                    Some(delay) => {
                        warn!(%path, error = %e, ?delay, "transient exchange error, backing off");
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        if matches!(e, ExchangeError::RateLimited { .. }) {
                            if let Some(notifier) = &self.notifier {
                                notify_best_effort(
                                    notifier.as_ref(),
                                    "Exchange rate limiting persists after repeated back-off",
                                )
                                .await;
                            }
                        }
                        return Err(e);
                    }
                },
                Err(e) => return Err(e),
            }
        }
    }
}

fn extract_symbol(params: &[(&str, String)]) -> String {
    params
        .iter()
        .find(|(key, _)| *key == "symbol")
        .map(|(_, value)| value.clone())
        .unwrap_or_default()
}

#[async_trait]
impl ExchangeApi for FuturesRestClient {
    async fn account(&self) -> Result<FuturesAccount, ExchangeError> {
        self.get_with_retry("/fapi/v2/account", &[], true, 5).await
    }

    async fn open_orders(&self, symbol: Option<&str>) -> Result<Vec<OrderInfo>, ExchangeError> {
        match symbol {
            Some(symbol) => {
                let params = [("symbol", symbol.to_string())];
                self.get_with_retry("/fapi/v1/openOrders", &params, true, 1)
                    .await
            }
            None => {
                self.get_with_retry("/fapi/v1/openOrders", &[], true, 40)
                    .await
            }
        }
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderAck, ExchangeError> {
        // single attempt: a retry after a timeout could double-place
        let params = request.to_params();
        self.send(Method::POST, "/fapi/v1/order", &params, true, 1)
            .await
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), ExchangeError> {
        let params = [
            ("symbol", symbol.to_string()),
            ("orderId", order_id.to_string()),
        ];
        self.send::<OrderInfo>(Method::DELETE, "/fapi/v1/order", &params, true, 1)
            .await
            .map(|_| ())
    }

    async fn change_leverage(
        &self,
        symbol: &str,
        leverage: u32,
    ) -> Result<LeverageAck, ExchangeError> {
        let params = [
            ("symbol", symbol.to_string()),
            ("leverage", leverage.to_string()),
        ];
        self.send(Method::POST, "/fapi/v1/leverage", &params, true, 1)
            .await
    }

    async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, ExchangeError> {
        let params = [("symbol", symbol.to_string())];
        let info: ExchangeInfo = self
            .get_with_retry("/fapi/v1/exchangeInfo", &params, false, 1)
            .await?;
        info.symbols
            .into_iter()
            .find(|s| s.symbol == symbol)
            .ok_or_else(|| ExchangeError::UnknownSymbol(symbol.to_string()))
    }

    async fn order_status(
        &self,
        symbol: &str,
        order_id: &str,
    ) -> Result<OrderInfo, ExchangeError> {
        let params = [
            ("symbol", symbol.to_string()),
            ("orderId", order_id.to_string()),
        ];
        self.get_with_retry("/fapi/v1/order", &params, true, 1).await
    }

    async fn order_by_client_id(
        &self,
        symbol: &str,
        client_order_id: &str,
    ) -> Result<Option<OrderInfo>, ExchangeError> {
        let params = [
            ("symbol", symbol.to_string()),
            ("origClientOrderId", client_order_id.to_string()),
        ];
        match self
            .get_with_retry::<OrderInfo>("/fapi/v1/order", &params, true, 1)
            .await
        {
            Ok(order) => Ok(Some(order)),
            Err(ExchangeError::Rejected { code, .. }) if code == CODE_UNKNOWN_ORDER => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn mark_price(&self, symbol: &str) -> Result<MarkPrice, ExchangeError> {
        let params = [("symbol", symbol.to_string())];
        self.get_with_retry("/fapi/v1/premiumIndex", &params, false, 1)
            .await
    }
}
