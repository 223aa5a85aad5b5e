//! Shared test doubles: a scripted exchange and a capturing notifier.
#![allow(dead_code)]

use async_trait::async_trait;
use garm_core::core::{
    ExchangeError, ExchangeOrderStatus, NotifyError, OrderType, PositionSide,
};
use garm_core::exchange::{
    ExchangeApi, FuturesAccount, LeverageAck, MarkPrice, OrderAck, OrderInfo, OrderRequest,
    SymbolInfo,
};
use garm_core::notify::Notifier;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Default)]
struct MockState {
    account: FuturesAccount,
    orders: HashMap<String, OrderInfo>,
    mark_prices: HashMap<String, Decimal>,
    symbols: HashMap<String, SymbolInfo>,
    next_order_id: u64,
    placed: Vec<OrderRequest>,
    cancelled: Vec<(String, String)>,
    leverage_calls: Vec<(String, u32)>,
    fail_order_types: HashSet<OrderType>,
}

/// In-memory exchange with scripted state and full call recording.
pub struct MockExchange {
    state: Mutex<MockState>,
}

impl MockExchange {
    /// BTCUSDT with tick 0.1 / step 0.001 / min notional 5, and
    /// 1000 USDT available. Matches the worked scenarios in the tests.
    pub fn with_default_symbol() -> Arc<Self> {
        let mock = Arc::new(Self {
            state: Mutex::new(MockState {
                next_order_id: 1000,
                ..MockState::default()
            }),
        });
        mock.add_symbol("BTCUSDT", dec!(0.1), dec!(0.001), dec!(5));
        mock.set_balance("USDT", dec!(1000));
        mock
    }

    pub fn add_symbol(
        &self,
        symbol: &str,
        tick_size: Decimal,
        step_size: Decimal,
        min_notional: Decimal,
    ) {
        let raw = serde_json::json!({
            "symbol": symbol,
            "filters": [
                {"filterType": "PRICE_FILTER", "tickSize": tick_size.to_string()},
                {"filterType": "LOT_SIZE", "stepSize": step_size.to_string()},
                {"filterType": "MIN_NOTIONAL", "notional": min_notional.to_string()},
            ],
        });
        let info: SymbolInfo = serde_json::from_value(raw).unwrap();
        self.state.lock().symbols.insert(symbol.to_string(), info);
    }

    pub fn set_balance(&self, asset: &str, available: Decimal) {
        let mut state = self.state.lock();
        state.account.assets.retain(|b| b.asset != asset);
        let balance = serde_json::json!({
            "asset": asset,
            "availableBalance": available.to_string(),
            "walletBalance": available.to_string(),
        });
        state
            .account
            .assets
            .push(serde_json::from_value(balance).unwrap());
    }

    pub fn set_position(
        &self,
        symbol: &str,
        side: PositionSide,
        amount: Decimal,
        entry_price: Decimal,
    ) {
        let mut state = self.state.lock();
        state
            .account
            .positions
            .retain(|p| !(p.symbol == symbol && p.position_side == side));
        let position = serde_json::json!({
            "symbol": symbol,
            "positionAmt": amount.to_string(),
            "entryPrice": entry_price.to_string(),
            "positionSide": side,
        });
        state
            .account
            .positions
            .push(serde_json::from_value(position).unwrap());
    }

    pub fn clear_position(&self, symbol: &str, side: PositionSide) {
        self.state
            .lock()
            .account
            .positions
            .retain(|p| !(p.symbol == symbol && p.position_side == side));
    }

    /// Script the status (and fill information) of one order.
    pub fn set_order_status(
        &self,
        order_id: &str,
        status: ExchangeOrderStatus,
        executed_qty: Decimal,
        avg_price: Decimal,
    ) {
        let mut state = self.state.lock();
        let order = state
            .orders
            .get_mut(order_id)
            .unwrap_or_else(|| panic!("no such mock order {order_id}"));
        order.status = status;
        order.executed_qty = executed_qty;
        order.avg_price = avg_price;
    }

    /// Make an order disappear entirely, as if it never existed.
    pub fn remove_order(&self, order_id: &str) {
        self.state.lock().orders.remove(order_id);
    }

    pub fn set_mark_price(&self, symbol: &str, price: Decimal) {
        self.state
            .lock()
            .mark_prices
            .insert(symbol.to_string(), price);
    }

    /// Reject every placement of the given order type.
    pub fn fail_order_type(&self, order_type: OrderType) {
        self.state.lock().fail_order_types.insert(order_type);
    }

    pub fn clear_failures(&self) {
        self.state.lock().fail_order_types.clear();
    }

    pub fn placed(&self) -> Vec<OrderRequest> {
        self.state.lock().placed.clone()
    }

    pub fn placed_of_type(&self, order_type: OrderType) -> Vec<OrderRequest> {
        self.state
            .lock()
            .placed
            .iter()
            .filter(|r| r.order_type == order_type)
            .cloned()
            .collect()
    }

    pub fn cancelled(&self) -> Vec<(String, String)> {
        self.state.lock().cancelled.clone()
    }

    pub fn leverage_calls(&self) -> Vec<(String, u32)> {
        self.state.lock().leverage_calls.clone()
    }

    pub fn order(&self, order_id: &str) -> Option<OrderInfo> {
        self.state.lock().orders.get(order_id).cloned()
    }

    pub fn last_order_id(&self) -> String {
        let state = self.state.lock();
        (state.next_order_id - 1).to_string()
    }
}

#[async_trait]
impl ExchangeApi for MockExchange {
    async fn account(&self) -> Result<FuturesAccount, ExchangeError> {
        Ok(self.state.lock().account.clone())
    }

    async fn open_orders(&self, symbol: Option<&str>) -> Result<Vec<OrderInfo>, ExchangeError> {
        Ok(self
            .state
            .lock()
            .orders
            .values()
            .filter(|o| o.status.is_open())
            .filter(|o| symbol.map_or(true, |s| o.symbol == s))
            .cloned()
            .collect())
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderAck, ExchangeError> {
        let mut state = self.state.lock();
        if state.fail_order_types.contains(&request.order_type) {
            return Err(ExchangeError::Rejected {
                code: -2010,
                message: format!("{} placement scripted to fail", request.order_type),
            });
        }
        let order_id = state.next_order_id.to_string();
        state.next_order_id += 1;
        state.placed.push(request.clone());

        let info = OrderInfo {
            order_id: order_id.clone(),
            client_order_id: request.client_order_id.clone().unwrap_or_default(),
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            price: request.price.unwrap_or_default(),
            stop_price: request.stop_price.unwrap_or_default(),
            orig_qty: request.quantity,
            executed_qty: Decimal::ZERO,
            status: ExchangeOrderStatus::New,
            avg_price: Decimal::ZERO,
            time_in_force: request.time_in_force.map(|t| t.as_str().to_string()),
            reduce_only: request.reduce_only,
            position_side: request.position_side,
        };
        state.orders.insert(order_id.clone(), info);
        Ok(OrderAck {
            order_id,
            client_order_id: request.client_order_id.clone().unwrap_or_default(),
            symbol: request.symbol.clone(),
            status: ExchangeOrderStatus::New,
        })
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), ExchangeError> {
        let mut state = self.state.lock();
        match state.orders.get_mut(order_id) {
            Some(order) if order.status.is_open() => {
                order.status = ExchangeOrderStatus::Canceled;
                state
                    .cancelled
                    .push((symbol.to_string(), order_id.to_string()));
                Ok(())
            }
            _ => Err(ExchangeError::Rejected {
                code: -2013,
                message: "Order does not exist.".to_string(),
            }),
        }
    }

    async fn change_leverage(
        &self,
        symbol: &str,
        leverage: u32,
    ) -> Result<LeverageAck, ExchangeError> {
        self.state
            .lock()
            .leverage_calls
            .push((symbol.to_string(), leverage));
        // the echo is deliberately omitted; callers must treat that as ok
        Ok(LeverageAck {
            symbol: symbol.to_string(),
            leverage: None,
        })
    }

    async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, ExchangeError> {
        self.state
            .lock()
            .symbols
            .get(symbol)
            .cloned()
            .ok_or_else(|| ExchangeError::UnknownSymbol(symbol.to_string()))
    }

    async fn order_status(
        &self,
        _symbol: &str,
        order_id: &str,
    ) -> Result<OrderInfo, ExchangeError> {
        self.state
            .lock()
            .orders
            .get(order_id)
            .cloned()
            .ok_or(ExchangeError::Rejected {
                code: -2013,
                message: "Order does not exist.".to_string(),
            })
    }

    async fn order_by_client_id(
        &self,
        _symbol: &str,
        client_order_id: &str,
    ) -> Result<Option<OrderInfo>, ExchangeError> {
        Ok(self
            .state
            .lock()
            .orders
            .values()
            .find(|o| o.client_order_id == client_order_id)
            .cloned())
    }

    async fn mark_price(&self, symbol: &str) -> Result<MarkPrice, ExchangeError> {
        let price = self
            .state
            .lock()
            .mark_prices
            .get(symbol)
            .copied()
            .unwrap_or(Decimal::ZERO);
        Ok(MarkPrice {
            symbol: symbol.to_string(),
            mark_price: price,
        })
    }
}

/// Notifier that records every message for assertions.
#[derive(Default)]
pub struct CapturingNotifier {
    messages: Mutex<Vec<String>>,
}

impl CapturingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.messages.lock().iter().any(|m| m.contains(needle))
    }
}

#[async_trait]
impl Notifier for CapturingNotifier {
    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        self.messages.lock().push(text.to_string());
        Ok(())
    }
}
