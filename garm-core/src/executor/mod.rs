//! Order executor: admission control, sizing, submission, registration
//!
//! The pipeline is a sequence of `Result`-returning steps that
//! short-circuits on the first failure: availability, concurrency,
//! price-quality, sizing, leverage, quantization, submission,
//! registration. Admission failures cost nothing at the exchange; the
//! one failure mode that matters is an order placed but not registered,
//! and that path ends in a cancel attempt plus a persistent notification.
//!
//! Admission for the same symbol is serialized through a keyed mutex so
//! two workers cannot admit conflicting entries; distinct symbols proceed
//! in parallel.

use crate::config::ConfigHandle;
use crate::core::{AdmissionError, ExchangeError, ExecutorError, SignalDirection, TradingSignal};
use crate::exchange::{canonical_decimal, ExchangeApi, FilterCache, OrderRequest};
use crate::notify::{notify_best_effort, Notifier};
use crate::recovery::{AvailabilityTable, SymbolAvailability};
use crate::watchdog::{seed_watched_order, RequestPayload, RequestQueue, WatchedOrder};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Bounded retry budget for registering a placed order with the watchdog
const ENQUEUE_ATTEMPTS: u32 = 3;
const ENQUEUE_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Successful submission summary
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub order_id: String,
    pub client_order_id: String,
    pub symbol: String,
    pub quantity: Decimal,
    pub price: Decimal,
}

pub struct OrderExecutor {
    api: Arc<dyn ExchangeApi>,
    filters: Arc<FilterCache>,
    config: ConfigHandle,
    queue: RequestQueue,
    notifier: Arc<dyn Notifier>,
    availability: Arc<AvailabilityTable>,
    /// Read-only view of the watchdog's persisted state
    state_path: PathBuf,
    /// Orders this process has placed that the watchdog may not have
    /// drained yet; merged into every admission view
    pending: DashMap<String, WatchedOrder>,
    symbol_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl OrderExecutor {
    pub fn new(
        api: Arc<dyn ExchangeApi>,
        filters: Arc<FilterCache>,
        config: ConfigHandle,
        queue: RequestQueue,
        notifier: Arc<dyn Notifier>,
        availability: Arc<AvailabilityTable>,
        state_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            api,
            filters,
            config,
            queue,
            notifier,
            availability,
            state_path: state_path.into(),
            pending: DashMap::new(),
            symbol_locks: DashMap::new(),
        }
    }

    fn symbol_lock(&self, symbol: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.symbol_locks
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Live watched orders for a symbol: the watchdog's persisted view
    /// merged with this process's not-yet-drained submissions.
    fn live_watched(&self, symbol: &str) -> Vec<WatchedOrder> {
        let persisted = crate::watchdog::StateStore::read_only(&self.state_path)
            .unwrap_or_else(|e| {
                warn!("admission reads empty watchdog state: {e}");
                Default::default()
            });

        // once an order shows up in the watchdog's state, ours is stale
        for entry in persisted.keys() {
            self.pending.remove(entry);
        }

        let mut live: Vec<WatchedOrder> = persisted
            .into_values()
            .filter(|order| order.symbol == symbol && !order.status.is_terminal())
            .collect();
        for entry in self.pending.iter() {
            if entry.value().symbol == symbol {
                live.push(entry.value().clone());
            }
        }
        live
    }

    /// Run the full admission pipeline and, if admitted, place the entry
    /// order and hand it to the watchdog.
    pub async fn execute(&self, signal: &TradingSignal) -> Result<ExecutionOutcome, ExecutorError> {
        let config = self.config.snapshot();
        let trading = &config.trading;
        let symbol = signal.symbol.as_str();

        let lock = self.symbol_lock(symbol);
        let _guard = lock.lock().await;

        // 1. symbol availability
        if let SymbolAvailability::Blocked(reason) = self.availability.availability(symbol) {
            return Err(AdmissionError::SymbolBlocked {
                symbol: symbol.to_string(),
                reason,
            }
            .into());
        }

        let account = self.api.account().await?;
        let watched = self.live_watched(symbol);

        // 2. concurrency: nonzero positions + live entry orders, exit legs
        // excluded by construction (watched orders are entry orders)
        let open_positions = account.open_positions(symbol).count();
        let current = open_positions + watched.len();
        if current >= trading.max_concurrent_orders {
            return Err(AdmissionError::ConcurrencyLimitReached {
                symbol: symbol.to_string(),
                current,
                limit: trading.max_concurrent_orders,
            }
            .into());
        }

        // 3. price-quality gate: the new entry must strictly improve on
        // every live same-direction reference
        self.check_price_quality(signal, &account, &watched)?;

        // 4. position sizing from the available quote balance
        let filters = self.filters.get(symbol).await?;
        let balance = account.available_balance(&config.exchange.quote_asset);
        let risk_amount = balance * trading.risk_percent / Decimal::ONE_HUNDRED;
        let raw_qty = risk_amount * Decimal::from(trading.leverage) / signal.entry_price;
        let quantity = filters.quantize_qty(raw_qty);
        let entry_price = filters.quantize_price(signal.entry_price);
        let notional = quantity * entry_price;
        if quantity.is_zero() || notional < filters.min_notional {
            return Err(AdmissionError::UndersizedPosition {
                symbol: symbol.to_string(),
                notional,
                min_notional: filters.min_notional,
            }
            .into());
        }

        // 5. leverage; a success response without an echo still counts
        self.api.change_leverage(symbol, trading.leverage).await?;

        // 6. quantize the protective levels before they are stored
        let stop_loss = filters.quantize_price(signal.stop_loss);
        let take_profit = filters.quantize_price(signal.take_profit);

        // 7. submit the entry order with a correlation id generated first,
        // so a timed-out placement can still be found
        let client_order_id = format!("garm-{}", Uuid::new_v4().simple());
        let request = OrderRequest::limit_entry(
            symbol,
            signal.direction.entry_side(),
            signal.direction.position_side(),
            quantity,
            entry_price,
            client_order_id.clone(),
        );
        let order_id = match self.api.place_order(&request).await {
            Ok(ack) => ack.order_id,
            Err(ExchangeError::Timeout(_)) => {
                self.resolve_timed_out_placement(symbol, &client_order_id)
                    .await?
            }
            Err(e) => return Err(e.into()),
        };
        info!(
            %symbol,
            %order_id,
            qty = %canonical_decimal(quantity),
            price = %canonical_decimal(entry_price),
            "entry order placed"
        );

        // 8. register with the watchdog; failure here is the gravest path
        let seed = seed_watched_order(
            order_id.clone(),
            client_order_id.clone(),
            symbol.to_string(),
            signal.direction,
            quantity,
            entry_price,
            stop_loss,
            take_profit,
        );
        self.register(seed).await?;

        self.availability.block(symbol, "live watched order");
        notify_best_effort(
            self.notifier.as_ref(),
            &format!(
                "Entry placed: {} {} {} @ {} (SL {}, TP {})",
                symbol,
                signal.direction,
                canonical_decimal(quantity),
                canonical_decimal(entry_price),
                canonical_decimal(stop_loss),
                canonical_decimal(take_profit),
            ),
        )
        .await;

        Ok(ExecutionOutcome {
            order_id,
            client_order_id,
            symbol: symbol.to_string(),
            quantity,
            price: entry_price,
        })
    }

    fn check_price_quality(
        &self,
        signal: &TradingSignal,
        account: &crate::exchange::FuturesAccount,
        watched: &[WatchedOrder],
    ) -> Result<(), AdmissionError> {
        let mut refs: Vec<Decimal> = watched
            .iter()
            .filter(|order| order.signal_type == signal.direction)
            .map(|order| order.price)
            .collect();
        if let Some(position) = account.position(
            &signal.symbol,
            signal.direction.position_side(),
        ) {
            refs.push(position.entry_price);
        }
        let Some(reference) = (match signal.direction {
            SignalDirection::Long => refs.iter().min().copied(),
            SignalDirection::Short => refs.iter().max().copied(),
        }) else {
            return Ok(());
        };
        let admissible = match signal.direction {
            SignalDirection::Long => signal.entry_price < reference,
            SignalDirection::Short => signal.entry_price > reference,
        };
        if admissible {
            Ok(())
        } else {
            Err(AdmissionError::PriceQualityRejected {
                symbol: signal.symbol.clone(),
                candidate: signal.entry_price,
                reference,
            })
        }
    }

    /// A placement that timed out has an unknown outcome. Look the order
    /// up by its correlation id; found means placed, not found means the
    /// request never landed.
    async fn resolve_timed_out_placement(
        &self,
        symbol: &str,
        client_order_id: &str,
    ) -> Result<String, ExecutorError> {
        warn!(%symbol, %client_order_id, "placement timed out, reconciling by client id");
        match self.api.order_by_client_id(symbol, client_order_id).await {
            Ok(Some(order)) => Ok(order.order_id),
            Ok(None) => Err(ExchangeError::Timeout(Duration::ZERO).into()),
            Err(e) => Err(e.into()),
        }
    }

    /// Enqueue the `add_order` request, bounded by a retry budget. On
    /// final failure: cancel the placed order, notify persistently, and
    /// surface `EnqueueFailedWithPlacedOrder`.
    async fn register(&self, seed: WatchedOrder) -> Result<(), ExecutorError> {
        let order_id = seed.order_id.clone();
        let symbol = seed.symbol.clone();
        self.pending.insert(order_id.clone(), seed.clone());

        let mut last_error = None;
        for attempt in 1..=ENQUEUE_ATTEMPTS {
            match self
                .queue
                .enqueue(RequestPayload::AddOrder(Box::new(seed.clone())))
            {
                Ok(()) => {
                    debug!(%order_id, "watchdog registration enqueued");
                    return Ok(());
                }
                Err(e) => {
                    warn!(%order_id, attempt, "registration enqueue failed: {e}");
                    last_error = Some(e);
                    tokio::time::sleep(ENQUEUE_RETRY_DELAY).await;
                }
            }
        }

        // orphan prevention: the exchange order exists but nobody watches
        // it; take it back off the book
        error!(%order_id, %symbol, "registration failed after retries, cancelling order");
        self.pending.remove(&order_id);
        let cancel_attempted = match self.api.cancel_order(&symbol, &order_id).await {
            Ok(()) => true,
            Err(e) => {
                error!(%order_id, "orphan cancel failed: {e}");
                false
            }
        };
        notify_best_effort(
            self.notifier.as_ref(),
            &format!(
                "CRITICAL: order {order_id} on {symbol} was placed but could not be handed to \
                 the watchdog ({}); cancel {}",
                last_error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
                if cancel_attempted {
                    "succeeded"
                } else {
                    "FAILED - manual intervention required"
                },
            ),
        )
        .await;
        Err(ExecutorError::EnqueueFailedWithPlacedOrder {
            symbol,
            order_id,
            cancel_attempted,
        })
    }
}
