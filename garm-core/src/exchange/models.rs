//! Wire models for the futures REST API
//!
//! All decimal fields arrive and leave as strings; `rust_decimal`'s serde
//! keeps them exact. Exchange-assigned order ids are numeric on the wire
//! but handled as strings everywhere else in the system.

use crate::core::{ExchangeOrderStatus, OrderType, PositionSide, Side, TimeInForce};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

/// Exchange order ids arrive as JSON numbers; everything downstream keys on
/// strings, so convert at the boundary.
pub(crate) fn order_id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrStr {
        Num(u64),
        Str(String),
    }
    Ok(match NumOrStr::deserialize(deserializer)? {
        NumOrStr::Num(n) => n.to_string(),
        NumOrStr::Str(s) => s,
    })
}

/// Canonical decimal representation for outbound order fields: no exponent,
/// no trailing zeros beyond the value itself.
pub fn canonical_decimal(value: Decimal) -> String {
    value.normalize().to_string()
}

/// One asset balance inside the account snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetBalance {
    pub asset: String,
    pub available_balance: Decimal,
    pub wallet_balance: Decimal,
}

/// One position inside the account snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionInfo {
    pub symbol: String,
    /// Signed quantity; zero means flat
    pub position_amt: Decimal,
    pub entry_price: Decimal,
    #[serde(default)]
    pub unrealized_profit: Decimal,
    pub position_side: PositionSide,
}

impl PositionInfo {
    pub fn is_open(&self) -> bool {
        !self.position_amt.is_zero()
    }

    /// Absolute position quantity
    pub fn size(&self) -> Decimal {
        self.position_amt.abs()
    }
}

/// Account snapshot: balances and positions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FuturesAccount {
    #[serde(default)]
    pub assets: Vec<AssetBalance>,
    #[serde(default)]
    pub positions: Vec<PositionInfo>,
}

impl FuturesAccount {
    /// Available balance of the given quote asset, zero if absent
    pub fn available_balance(&self, asset: &str) -> Decimal {
        self.assets
            .iter()
            .find(|b| b.asset == asset)
            .map(|b| b.available_balance)
            .unwrap_or(Decimal::ZERO)
    }

    /// Open (nonzero) positions for a symbol
    pub fn open_positions<'a>(&'a self, symbol: &'a str) -> impl Iterator<Item = &'a PositionInfo> {
        self.positions
            .iter()
            .filter(move |p| p.symbol == symbol && p.is_open())
    }

    /// The open position for a symbol on one side of a hedge-mode account
    pub fn position(&self, symbol: &str, side: PositionSide) -> Option<&PositionInfo> {
        self.positions
            .iter()
            .find(|p| p.symbol == symbol && p.position_side == side && p.is_open())
    }
}

/// An order as reported by `openOrders` / `order` queries
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderInfo {
    #[serde(deserialize_with = "order_id_string")]
    pub order_id: String,
    #[serde(default)]
    pub client_order_id: String,
    pub symbol: String,
    pub side: Side,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    #[serde(default)]
    pub price: Decimal,
    #[serde(default)]
    pub stop_price: Decimal,
    pub orig_qty: Decimal,
    #[serde(default)]
    pub executed_qty: Decimal,
    pub status: ExchangeOrderStatus,
    #[serde(default)]
    pub avg_price: Decimal,
    /// Kept as a string on ingest; manually placed orders may carry
    /// vocabulary this system never sends (e.g. GTX)
    #[serde(default)]
    pub time_in_force: Option<String>,
    #[serde(default)]
    pub reduce_only: bool,
    pub position_side: PositionSide,
}

impl OrderInfo {
    /// Exit legs are reduce-only stop/take orders
    pub fn is_exit_leg(&self) -> bool {
        self.reduce_only
            || matches!(
                self.order_type,
                OrderType::StopMarket | OrderType::TakeProfitMarket
            )
    }
}

/// Acknowledgement returned by order placement
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAck {
    #[serde(deserialize_with = "order_id_string")]
    pub order_id: String,
    #[serde(default)]
    pub client_order_id: String,
    pub symbol: String,
    pub status: ExchangeOrderStatus,
}

/// Acknowledgement of a leverage change. The exchange may omit the echo;
/// that still counts as success.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeverageAck {
    pub symbol: String,
    #[serde(default)]
    pub leverage: Option<u32>,
}

/// Mark price snapshot, used for the trailing trigger comparison
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkPrice {
    pub symbol: String,
    pub mark_price: Decimal,
}

/// One entry of the `filters` array in symbol metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "filterType")]
pub enum RawSymbolFilter {
    #[serde(rename = "PRICE_FILTER", rename_all = "camelCase")]
    Price { tick_size: Decimal },
    #[serde(rename = "LOT_SIZE", rename_all = "camelCase")]
    LotSize { step_size: Decimal },
    #[serde(rename = "MIN_NOTIONAL", rename_all = "camelCase")]
    MinNotional { notional: Decimal },
    #[serde(other)]
    Other,
}

/// Per-symbol metadata subset of `exchangeInfo`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub symbol: String,
    #[serde(default)]
    pub filters: Vec<RawSymbolFilter>,
}

/// `exchangeInfo` response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeInfo {
    #[serde(default)]
    pub symbols: Vec<SymbolInfo>,
}

/// Error body the exchange attaches to non-2xx responses
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub code: i64,
    pub msg: String,
}

/// A fully specified outbound order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub position_side: PositionSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub time_in_force: Option<TimeInForce>,
    pub reduce_only: bool,
    pub client_order_id: Option<String>,
}

impl OrderRequest {
    /// LIMIT GTC entry order. All prices and quantities must already be
    /// quantized to the symbol's grid.
    pub fn limit_entry(
        symbol: impl Into<String>,
        side: Side,
        position_side: PositionSide,
        quantity: Decimal,
        price: Decimal,
        client_order_id: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            position_side,
            order_type: OrderType::Limit,
            quantity,
            price: Some(price),
            stop_price: None,
            time_in_force: Some(TimeInForce::GTC),
            reduce_only: false,
            client_order_id: Some(client_order_id.into()),
        }
    }

    /// Reduce-only STOP_MARKET exit leg
    pub fn stop_market(
        symbol: impl Into<String>,
        side: Side,
        position_side: PositionSide,
        quantity: Decimal,
        stop_price: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            position_side,
            order_type: OrderType::StopMarket,
            quantity,
            price: None,
            stop_price: Some(stop_price),
            time_in_force: Some(TimeInForce::GTC),
            reduce_only: true,
            client_order_id: None,
        }
    }

    /// Reduce-only TAKE_PROFIT_MARKET exit leg
    pub fn take_profit_market(
        symbol: impl Into<String>,
        side: Side,
        position_side: PositionSide,
        quantity: Decimal,
        stop_price: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            position_side,
            order_type: OrderType::TakeProfitMarket,
            quantity,
            price: None,
            stop_price: Some(stop_price),
            time_in_force: Some(TimeInForce::GTC),
            reduce_only: true,
            client_order_id: None,
        }
    }

    /// Reduce-only MARKET order, used for the trailing partial close and
    /// for manual position closes
    pub fn market_reduce(
        symbol: impl Into<String>,
        side: Side,
        position_side: PositionSide,
        quantity: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            position_side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            stop_price: None,
            time_in_force: None,
            reduce_only: true,
            client_order_id: None,
        }
    }

    /// Request parameters in wire form. Numeric fields are canonical
    /// decimal strings.
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params: Vec<(&'static str, String)> = vec![
            ("symbol", self.symbol.clone()),
            ("side", self.side.as_str().to_string()),
            ("positionSide", self.position_side.as_str().to_string()),
            ("type", self.order_type.as_str().to_string()),
            ("quantity", canonical_decimal(self.quantity)),
        ];
        if let Some(price) = self.price {
            params.push(("price", canonical_decimal(price)));
        }
        if let Some(stop_price) = self.stop_price {
            params.push(("stopPrice", canonical_decimal(stop_price)));
        }
        if let Some(tif) = self.time_in_force {
            params.push(("timeInForce", tif.as_str().to_string()));
        }
        if self.reduce_only {
            params.push(("reduceOnly", "true".to_string()));
        }
        if let Some(ref cid) = self.client_order_id {
            params.push(("newClientOrderId", cid.clone()));
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn canonical_decimal_has_no_exponent_or_trailing_zeros() {
        assert_eq!(canonical_decimal(dec!(45000.0)), "45000");
        assert_eq!(canonical_decimal(dec!(0.00440)), "0.0044");
        assert_eq!(canonical_decimal(dec!(117991.9)), "117991.9");
    }

    #[test]
    fn order_id_accepts_number_and_string() {
        let ack: OrderAck = serde_json::from_str(
            r#"{"orderId": 283194212, "clientOrderId": "garm-1", "symbol": "BTCUSDT", "status": "NEW"}"#,
        )
        .unwrap();
        assert_eq!(ack.order_id, "283194212");

        let ack: OrderAck = serde_json::from_str(
            r#"{"orderId": "283194213", "symbol": "BTCUSDT", "status": "NEW"}"#,
        )
        .unwrap();
        assert_eq!(ack.order_id, "283194213");
    }

    #[test]
    fn limit_entry_params_are_canonical_strings() {
        let request = OrderRequest::limit_entry(
            "BTCUSDT",
            Side::Buy,
            PositionSide::Long,
            dec!(0.004),
            dec!(45000.0),
            "garm-abc",
        );
        let params = request.to_params();
        let get = |key: &str| {
            params
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("type"), Some("LIMIT"));
        assert_eq!(get("quantity"), Some("0.004"));
        assert_eq!(get("price"), Some("45000"));
        assert_eq!(get("timeInForce"), Some("GTC"));
        assert_eq!(get("positionSide"), Some("LONG"));
        assert_eq!(get("newClientOrderId"), Some("garm-abc"));
        assert_eq!(get("reduceOnly"), None);
    }

    #[test]
    fn exit_legs_are_reduce_only() {
        let sl = OrderRequest::stop_market(
            "BTCUSDT",
            Side::Sell,
            PositionSide::Long,
            dec!(0.004),
            dec!(44000),
        );
        assert!(sl.reduce_only);
        let params = sl.to_params();
        assert!(params.iter().any(|(k, v)| *k == "reduceOnly" && v == "true"));
        assert!(params.iter().any(|(k, v)| *k == "stopPrice" && v == "44000"));
    }

    #[test]
    fn unknown_symbol_filters_are_tolerated() {
        let raw = r#"{
            "symbol": "BTCUSDT",
            "filters": [
                {"filterType": "PRICE_FILTER", "tickSize": "0.10", "minPrice": "556.80"},
                {"filterType": "PERCENT_PRICE", "multiplierUp": "1.15"},
                {"filterType": "LOT_SIZE", "stepSize": "0.001", "minQty": "0.001"},
                {"filterType": "MIN_NOTIONAL", "notional": "5"}
            ]
        }"#;
        let info: SymbolInfo = serde_json::from_str(raw).unwrap();
        assert_eq!(info.filters.len(), 4);
        assert!(matches!(info.filters[1], RawSymbolFilter::Other));
    }

    #[test]
    fn position_helpers() {
        let account: FuturesAccount = serde_json::from_str(
            r#"{
                "assets": [{"asset": "USDT", "availableBalance": "1000", "walletBalance": "1200"}],
                "positions": [
                    {"symbol": "BTCUSDT", "positionAmt": "0.025", "entryPrice": "117992.0", "positionSide": "LONG"},
                    {"symbol": "BTCUSDT", "positionAmt": "0", "entryPrice": "0", "positionSide": "SHORT"}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(account.available_balance("USDT"), dec!(1000));
        assert_eq!(account.available_balance("BUSD"), Decimal::ZERO);
        assert_eq!(account.open_positions("BTCUSDT").count(), 1);
        assert!(account.position("BTCUSDT", PositionSide::Long).is_some());
        assert!(account.position("BTCUSDT", PositionSide::Short).is_none());
    }
}
