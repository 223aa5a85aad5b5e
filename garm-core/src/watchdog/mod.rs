//! Orders watchdog: the single writer for every order after submission
//!
//! The loop drains the request channel, polls the exchange for each live
//! order, drives the state machine
//! `NEW -> PARTIALLY_FILLED -> FILLED -> CLOSED` (side branches
//! `CANCELLED` / `REJECTED`), places and repairs the protective exit legs,
//! simulates OCO between them, runs the one-shot trailing procedure, and
//! persists the store after every mutation. All per-order failures are
//! contained: one bad order or one bad poll never stops the loop.

pub mod requests;
pub mod state;
pub mod trailing;

pub use requests::{QueuedRequest, RequestPayload, RequestQueue};
pub use state::{LoadSource, StateStore, WatchedOrder, WatchedOrderStatus};
pub use trailing::{TrailingParams, TrailingPlan};

use crate::config::ConfigHandle;
use crate::core::{ExchangeError, ExchangeOrderStatus};
use crate::exchange::{ExchangeApi, FilterCache, OrderRequest};
use crate::notify::{notify_best_effort, Notifier};
use anyhow::Result;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Exchange error code for "order does not exist"
const CODE_UNKNOWN_ORDER: i64 = -2013;

/// The watchdog process core. Owns the state store exclusively; every
/// mutation flows through this value on the loop task.
pub struct WatchdogCore {
    api: Arc<dyn ExchangeApi>,
    filters: Arc<FilterCache>,
    notifier: Arc<dyn Notifier>,
    config: ConfigHandle,
    store: StateStore,
    queue: RequestQueue,
}

impl WatchdogCore {
    pub fn new(
        api: Arc<dyn ExchangeApi>,
        filters: Arc<FilterCache>,
        notifier: Arc<dyn Notifier>,
        config: ConfigHandle,
        store: StateStore,
        queue: RequestQueue,
    ) -> Self {
        Self {
            api,
            filters,
            notifier,
            config,
            store,
            queue,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Run until the shutdown signal flips, then persist one final time.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(orders = self.store.len(), "watchdog loop started");
        loop {
            self.drain_requests().await;
            self.poll_once().await;

            let interval = self.config.snapshot().trading.poll_interval();
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        if let Err(e) = self.store.persist() {
            error!("final state persist failed: {e}");
        }
        info!("watchdog loop stopped");
    }

    /// Take every pending request from the channel and apply it. Poison
    /// items were already removed by the drain; they are only reported.
    pub async fn drain_requests(&mut self) {
        let drained = match self.queue.drain() {
            Ok(drained) => drained,
            Err(e) => {
                error!("request queue drain failed: {e}");
                return;
            }
        };
        for poison in &drained.poison {
            notify_best_effort(
                self.notifier.as_ref(),
                &format!("Watchdog dropped an unparseable request: {poison}"),
            )
            .await;
        }
        for request in drained.requests {
            if let Err(e) = self.apply_request(request).await {
                error!("request processing failed: {e:#}");
                notify_best_effort(
                    self.notifier.as_ref(),
                    &format!("Watchdog request failed: {e:#}"),
                )
                .await;
            }
        }
    }

    async fn apply_request(&mut self, request: QueuedRequest) -> Result<()> {
        match request.payload {
            RequestPayload::AddOrder(seed) => {
                let order_id = seed.order_id.clone();
                let symbol = seed.symbol.clone();
                match self.store.insert(*seed) {
                    Ok(()) => {
                        info!(%order_id, %symbol, "accepted ownership of entry order");
                    }
                    Err(crate::core::StateError::DuplicateOrder(_)) => {
                        // at-least-once delivery; the retry is dropped here
                        debug!(%order_id, "duplicate add_order ignored");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            RequestPayload::RemoveOrder { order_id } => {
                if let Some(order) = self.store.get(&order_id).cloned() {
                    self.cancel_exit_legs(&order).await;
                    self.store.remove(&order_id)?;
                    notify_best_effort(
                        self.notifier.as_ref(),
                        &format!("Stopped watching order {order_id} ({})", order.symbol),
                    )
                    .await;
                } else {
                    warn!(%order_id, "remove_order for unknown order");
                }
            }
            RequestPayload::ManualClose { order_id } => {
                if let Some(order) = self.store.get(&order_id).cloned() {
                    self.manual_close(order).await?;
                } else {
                    warn!(%order_id, "manual_close for unknown order");
                }
            }
        }
        Ok(())
    }

    async fn manual_close(&mut self, order: WatchedOrder) -> Result<()> {
        if order.status == WatchedOrderStatus::Filled {
            let qty = order.position_size.unwrap_or(order.quantity);
            let close = OrderRequest::market_reduce(
                order.symbol.clone(),
                order.exit_side(),
                order.position_side,
                qty,
            );
            self.api.place_order(&close).await?;
        } else {
            // entry never filled; just take it off the book
            if let Err(e) = self.api.cancel_order(&order.symbol, &order.order_id).await {
                if !is_unknown_order(&e) {
                    return Err(e.into());
                }
            }
        }
        self.cancel_exit_legs(&order).await;
        self.store.remove(&order.order_id)?;
        notify_best_effort(
            self.notifier.as_ref(),
            &format!(
                "Manual close executed for {} (order {})",
                order.symbol, order.order_id
            ),
        )
        .await;
        Ok(())
    }

    /// One polling pass over every live order.
    pub async fn poll_once(&mut self) {
        for order_id in self.store.order_ids() {
            if let Err(e) = self.handle_order(&order_id).await {
                error!(%order_id, "poll iteration failed: {e:#}");
            }
        }
    }

    async fn handle_order(&mut self, order_id: &str) -> Result<()> {
        let Some(order) = self.store.get(order_id).cloned() else {
            return Ok(());
        };
        match order.status {
            WatchedOrderStatus::New | WatchedOrderStatus::PartiallyFilled => {
                self.poll_entry(order).await
            }
            WatchedOrderStatus::Filled => self.manage_position(order).await,
            status => {
                // terminal records never stay in the live set
                warn!(%order_id, ?status, "terminal order still in live set, removing");
                self.store.remove(order_id)?;
                Ok(())
            }
        }
    }

    /// Track an entry order that has not fully filled yet.
    async fn poll_entry(&mut self, order: WatchedOrder) -> Result<()> {
        let info = match self.api.order_status(&order.symbol, &order.order_id).await {
            Ok(info) => info,
            Err(e) if is_unknown_order(&e) => {
                // gone from the exchange with no fill information
                return self
                    .finish(
                        &order,
                        WatchedOrderStatus::Cancelled,
                        &format!(
                            "Entry order {} ({}) no longer exists at the exchange",
                            order.order_id, order.symbol
                        ),
                    )
                    .await;
            }
            Err(e) if e.is_transient() => {
                debug!(order_id = %order.order_id, "entry poll skipped: {e}");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        match info.status {
            ExchangeOrderStatus::New => Ok(()),
            ExchangeOrderStatus::PartiallyFilled => {
                if order.status == WatchedOrderStatus::New {
                    info!(order_id = %order.order_id, "entry order partially filled");
                    self.store.update(&order.order_id, |o| {
                        o.status = WatchedOrderStatus::PartiallyFilled;
                    })?;
                }
                Ok(())
            }
            ExchangeOrderStatus::Filled => {
                let fill_price = if info.avg_price.is_zero() {
                    order.price
                } else {
                    info.avg_price
                };
                let fill_qty = if info.executed_qty.is_zero() {
                    order.quantity
                } else {
                    info.executed_qty
                };
                info!(
                    order_id = %order.order_id,
                    symbol = %order.symbol,
                    price = %fill_price,
                    qty = %fill_qty,
                    "entry order filled"
                );
                self.store.update(&order.order_id, |o| {
                    o.status = WatchedOrderStatus::Filled;
                    o.entry_price_filled = Some(fill_price);
                    o.position_size = Some(fill_qty);
                    o.filled_at = Some(Utc::now());
                })?;
                notify_best_effort(
                    self.notifier.as_ref(),
                    &format!(
                        "Entry filled: {} {} {} @ {}",
                        order.symbol, order.side, fill_qty, fill_price
                    ),
                )
                .await;
                // place the exit legs in the same tick
                self.ensure_exit_legs(&order.order_id).await
            }
            ExchangeOrderStatus::Canceled | ExchangeOrderStatus::Expired => {
                self.finish(
                    &order,
                    WatchedOrderStatus::Cancelled,
                    &format!("Entry order {} ({}) was cancelled", order.order_id, order.symbol),
                )
                .await
            }
            ExchangeOrderStatus::Rejected => {
                self.finish(
                    &order,
                    WatchedOrderStatus::Rejected,
                    &format!("Entry order {} ({}) was rejected", order.order_id, order.symbol),
                )
                .await
            }
        }
    }

    /// Manage a filled order: simulate OCO and detect external closes
    /// first, then repair missing exit legs, then run the trailing check.
    async fn manage_position(&mut self, order: WatchedOrder) -> Result<()> {
        if self.resolve_exits(&order).await? {
            return Ok(());
        }
        // resolve_exits may have cleared a vanished leg id
        let Some(order) = self.store.get(&order.order_id).cloned() else {
            return Ok(());
        };
        if !order.has_exit_legs() {
            self.ensure_exit_legs(&order.order_id).await?;
        }
        let Some(order) = self.store.get(&order.order_id).cloned() else {
            return Ok(());
        };
        if order.has_exit_legs() && !order.trailing_triggered {
            self.maybe_trail(order).await?;
        }
        Ok(())
    }

    /// Place any missing exit leg, bounded by `MAX_SL_TP_ATTEMPTS`.
    async fn ensure_exit_legs(&mut self, order_id: &str) -> Result<()> {
        let Some(order) = self.store.get(order_id).cloned() else {
            return Ok(());
        };
        let max_attempts = self.config.snapshot().trading.max_sl_tp_attempts;
        if order.has_exit_legs() {
            return Ok(());
        }
        if order.sl_tp_attempts >= max_attempts {
            // already exhausted and surfaced; waiting for a human
            return Ok(());
        }

        let filters = self.filters.get(&order.symbol).await?;
        let qty = order.position_size.unwrap_or(order.quantity);
        let exit_side = order.exit_side();
        let mut sl_order_id = order.sl_order_id.clone();
        let mut tp_order_id = order.tp_order_id.clone();
        let mut leg_failed = false;

        if sl_order_id.is_none() {
            let request = OrderRequest::stop_market(
                order.symbol.clone(),
                exit_side,
                order.position_side,
                qty,
                filters.quantize_price(order.stop_loss),
            );
            match self.api.place_order(&request).await {
                Ok(ack) => {
                    info!(order_id = %order.order_id, sl = %ack.order_id, "stop-loss leg placed");
                    sl_order_id = Some(ack.order_id);
                }
                Err(e) => {
                    warn!(order_id = %order.order_id, "stop-loss placement failed: {e}");
                    leg_failed = true;
                }
            }
        }
        if tp_order_id.is_none() {
            let request = OrderRequest::take_profit_market(
                order.symbol.clone(),
                exit_side,
                order.position_side,
                qty,
                filters.quantize_price(order.take_profit),
            );
            match self.api.place_order(&request).await {
                Ok(ack) => {
                    info!(order_id = %order.order_id, tp = %ack.order_id, "take-profit leg placed");
                    tp_order_id = Some(ack.order_id);
                }
                Err(e) => {
                    warn!(order_id = %order.order_id, "take-profit placement failed: {e}");
                    leg_failed = true;
                }
            }
        }

        let attempts = if leg_failed {
            order.sl_tp_attempts + 1
        } else {
            order.sl_tp_attempts
        };
        self.store.update(&order.order_id, |o| {
            o.sl_order_id = sl_order_id;
            o.tp_order_id = tp_order_id;
            o.sl_tp_attempts = attempts;
        })?;

        if leg_failed && attempts >= max_attempts {
            notify_best_effort(
                self.notifier.as_ref(),
                &format!(
                    "FAULT: could not place protective exits for {} (order {}) after {} attempts; \
                     position is unprotected and needs manual resolution",
                    order.symbol, order.order_id, attempts
                ),
            )
            .await;
        }
        Ok(())
    }

    /// Look at whatever exit legs exist and at the position itself.
    /// Closes the order out when either leg filled (cancelling the
    /// survivor, the simulated OCO) or when the position is flat with
    /// neither leg filled (external close). Returns whether the order
    /// reached a terminal state.
    async fn resolve_exits(&mut self, order: &WatchedOrder) -> Result<bool> {
        let sl_status = match &order.sl_order_id {
            Some(id) => self.leg_status(&order.symbol, id).await?,
            None => LegStatus::Missing,
        };
        if sl_status == LegStatus::Filled {
            if let Some(tp_id) = &order.tp_order_id {
                self.cancel_leg(&order.symbol, tp_id).await;
            }
            self.finish(
                order,
                WatchedOrderStatus::Closed,
                &format!("Stop loss hit for {} (order {})", order.symbol, order.order_id),
            )
            .await?;
            return Ok(true);
        }

        let tp_status = match &order.tp_order_id {
            Some(id) => self.leg_status(&order.symbol, id).await?,
            None => LegStatus::Missing,
        };
        if tp_status == LegStatus::Filled {
            if let Some(sl_id) = &order.sl_order_id {
                self.cancel_leg(&order.symbol, sl_id).await;
            }
            self.finish(
                order,
                WatchedOrderStatus::Closed,
                &format!(
                    "Take profit hit for {} (order {})",
                    order.symbol, order.order_id
                ),
            )
            .await?;
            return Ok(true);
        }

        // a leg that vanished without filling was cancelled externally;
        // clear it so the repair path re-places it
        if sl_status == LegStatus::Gone || tp_status == LegStatus::Gone {
            warn!(order_id = %order.order_id, "exit leg disappeared without filling");
            self.store.update(&order.order_id, |o| {
                if sl_status == LegStatus::Gone {
                    o.sl_order_id = None;
                }
                if tp_status == LegStatus::Gone {
                    o.tp_order_id = None;
                }
            })?;
        }

        // neither leg filled; a flat position means the close came from
        // outside this system (manual intervention)
        let account = match self.api.account().await {
            Ok(account) => account,
            Err(e) if e.is_transient() => {
                debug!("position check skipped: {e}");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };
        let flat = account
            .position(&order.symbol, order.position_side)
            .is_none();
        if flat {
            self.cancel_exit_legs(order).await;
            self.finish(
                order,
                WatchedOrderStatus::Closed,
                &format!("External close detected for {}", order.symbol),
            )
            .await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// The one-shot 80/80/50 trailing step.
    async fn maybe_trail(&mut self, order: WatchedOrder) -> Result<()> {
        let (Some(entry), Some(position_size)) = (order.entry_price_filled, order.position_size)
        else {
            return Ok(());
        };
        let mark = match self.api.mark_price(&order.symbol).await {
            Ok(mark) => mark.mark_price,
            Err(e) if e.is_transient() => {
                debug!("mark price unavailable, trailing check skipped: {e}");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let trading = self.config.snapshot().trading.clone();
        let params = TrailingParams {
            trigger_fraction: trading.trailing_trigger_fraction,
            close_fraction: trading.trailing_close_fraction,
            sl_fraction: trading.trailing_sl_fraction,
        };
        let filters = self.filters.get(&order.symbol).await?;
        let take_profit = filters.quantize_price(order.take_profit);
        let Some(plan) = trailing::plan(
            &params,
            order.signal_type,
            entry,
            take_profit,
            position_size,
            mark,
            &filters,
        ) else {
            return Ok(());
        };

        info!(
            order_id = %order.order_id,
            mark = %mark,
            close = %plan.close_qty,
            new_sl = %plan.new_stop_price,
            "trailing trigger reached"
        );

        // Step 1: realize profit on the bulk of the position. This is the
        // irreversible step; once it succeeds the latch is set and the
        // remaining leg surgery converges through the repair path.
        let close = OrderRequest::market_reduce(
            order.symbol.clone(),
            order.exit_side(),
            order.position_side,
            plan.close_qty,
        );
        if let Err(e) = self.api.place_order(&close).await {
            warn!(order_id = %order.order_id, "trailing close failed, will retry: {e}");
            return Ok(());
        }
        self.store.update(&order.order_id, |o| {
            o.trailing_triggered = true;
            o.position_size = Some(plan.remaining_qty);
            o.stop_loss = plan.new_stop_price;
        })?;

        // Step 2-3: move the stop to the locked-in level
        let mut sl_replaced = false;
        if let Some(sl_id) = &order.sl_order_id {
            self.cancel_leg(&order.symbol, sl_id).await;
        }
        self.store.update(&order.order_id, |o| {
            o.sl_order_id = None;
        })?;
        let new_sl = OrderRequest::stop_market(
            order.symbol.clone(),
            order.exit_side(),
            order.position_side,
            plan.remaining_qty,
            plan.new_stop_price,
        );
        match self.api.place_order(&new_sl).await {
            Ok(ack) => {
                self.store.update(&order.order_id, |o| {
                    o.sl_order_id = Some(ack.order_id);
                })?;
                sl_replaced = true;
            }
            Err(e) => {
                notify_best_effort(
                    self.notifier.as_ref(),
                    &format!(
                        "URGENT: {} position reduced but new stop placement failed ({e}); \
                         retrying every poll",
                        order.symbol
                    ),
                )
                .await;
            }
        }

        // Step 4: shrink the take-profit leg to the runner quantity
        if let Some(tp_id) = &order.tp_order_id {
            self.cancel_leg(&order.symbol, tp_id).await;
        }
        self.store.update(&order.order_id, |o| {
            o.tp_order_id = None;
        })?;
        let new_tp = OrderRequest::take_profit_market(
            order.symbol.clone(),
            order.exit_side(),
            order.position_side,
            plan.remaining_qty,
            take_profit,
        );
        match self.api.place_order(&new_tp).await {
            Ok(ack) => {
                self.store.update(&order.order_id, |o| {
                    o.tp_order_id = Some(ack.order_id);
                })?;
            }
            Err(e) => {
                warn!(order_id = %order.order_id, "take-profit replace failed, repair path will retry: {e}");
            }
        }

        if sl_replaced {
            notify_best_effort(
                self.notifier.as_ref(),
                &format!(
                    "Trailing engaged for {}: {} closed at ~{}, new SL = {}",
                    order.symbol, plan.close_qty, mark, plan.new_stop_price
                ),
            )
            .await;
        }
        Ok(())
    }

    /// Move an order to a terminal state: notify, then drop it from the
    /// live set.
    async fn finish(
        &mut self,
        order: &WatchedOrder,
        status: WatchedOrderStatus,
        message: &str,
    ) -> Result<()> {
        debug_assert!(status.is_terminal());
        info!(order_id = %order.order_id, ?status, "order reached terminal state");
        notify_best_effort(self.notifier.as_ref(), message).await;
        self.store.remove(&order.order_id)?;
        Ok(())
    }

    /// Status of one exit leg, collapsing transport noise conservatively.
    async fn leg_status(&self, symbol: &str, order_id: &str) -> Result<LegStatus> {
        match self.api.order_status(symbol, order_id).await {
            Ok(info) if info.status == ExchangeOrderStatus::Filled => Ok(LegStatus::Filled),
            Ok(info) if info.status.is_open() => Ok(LegStatus::Open),
            Ok(_) => Ok(LegStatus::Gone),
            Err(e) if is_unknown_order(&e) => Ok(LegStatus::Gone),
            Err(e) if e.is_transient() => Ok(LegStatus::Open),
            Err(e) => Err(e.into()),
        }
    }

    /// Best-effort cancel; an already-gone order is a no-op.
    async fn cancel_leg(&self, symbol: &str, order_id: &str) {
        match self.api.cancel_order(symbol, order_id).await {
            Ok(()) => debug!(%order_id, "exit leg cancelled"),
            Err(e) if is_unknown_order(&e) => {}
            Err(e) => warn!(%order_id, "exit leg cancel failed: {e}"),
        }
    }

    async fn cancel_exit_legs(&self, order: &WatchedOrder) {
        if let Some(sl_id) = &order.sl_order_id {
            self.cancel_leg(&order.symbol, sl_id).await;
        }
        if let Some(tp_id) = &order.tp_order_id {
            self.cancel_leg(&order.symbol, tp_id).await;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LegStatus {
    Open,
    Filled,
    /// Cancelled or expired without filling, or unknown to the exchange
    Gone,
    Missing,
}

fn is_unknown_order(error: &ExchangeError) -> bool {
    matches!(error, ExchangeError::Rejected { code, .. } if *code == CODE_UNKNOWN_ORDER)
}

/// Seed a [`WatchedOrder`] for a freshly placed entry order. Used by the
/// executor before enqueueing the `add_order` request.
#[allow(clippy::too_many_arguments)]
pub fn seed_watched_order(
    order_id: String,
    client_order_id: String,
    symbol: String,
    signal_type: crate::core::SignalDirection,
    quantity: Decimal,
    price: Decimal,
    stop_loss: Decimal,
    take_profit: Decimal,
) -> WatchedOrder {
    WatchedOrder {
        order_id,
        client_order_id,
        symbol,
        side: signal_type.entry_side(),
        position_side: signal_type.position_side(),
        quantity,
        price,
        status: WatchedOrderStatus::New,
        signal_type,
        stop_loss,
        take_profit,
        sl_order_id: None,
        tp_order_id: None,
        entry_price_filled: None,
        position_size: None,
        trailing_triggered: false,
        created_at: Utc::now(),
        filled_at: None,
        sl_tp_attempts: 0,
    }
}
