//! Admission pipeline scenarios against the scripted exchange.

mod common;

use common::{CapturingNotifier, MockExchange};
use garm_core::config::Config;
use garm_core::core::{AdmissionError, ExecutorError, OrderType, PositionSide, SignalDirection};
use garm_core::exchange::{ExchangeApi, FilterCache};
use garm_core::recovery::AvailabilityTable;
use garm_core::watchdog::{RequestPayload, RequestQueue, StateStore, WatchedOrderStatus};
use garm_core::{ConfigHandle, OrderExecutor, TradingSignal};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::path::PathBuf;
use std::sync::Arc;

struct Harness {
    mock: Arc<MockExchange>,
    notifier: Arc<CapturingNotifier>,
    availability: Arc<AvailabilityTable>,
    executor: Arc<OrderExecutor>,
    state_path: PathBuf,
    queue_path: PathBuf,
    _dir: tempfile::TempDir,
}

fn test_config(max_concurrent_orders: usize) -> Config {
    let mut config = Config::default();
    config.trading.risk_percent = dec!(2);
    config.trading.leverage = 10;
    config.trading.max_concurrent_orders = max_concurrent_orders;
    config
}

fn harness_with(config: Config, queue_in_missing_dir: bool) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("state.json");
    let queue_path = if queue_in_missing_dir {
        dir.path().join("missing").join("requests.json")
    } else {
        dir.path().join("requests.json")
    };
    let mock = MockExchange::with_default_symbol();
    let notifier = CapturingNotifier::new();
    let availability = Arc::new(AvailabilityTable::new());
    let api: Arc<dyn ExchangeApi> = mock.clone();
    let executor = Arc::new(OrderExecutor::new(
        api.clone(),
        Arc::new(FilterCache::new(api)),
        ConfigHandle::new(config, dir.path().join("garm.conf")),
        RequestQueue::new(&queue_path),
        notifier.clone(),
        availability.clone(),
        &state_path,
    ));
    Harness {
        mock,
        notifier,
        availability,
        executor,
        state_path,
        queue_path,
        _dir: dir,
    }
}

fn harness(max_concurrent_orders: usize) -> Harness {
    harness_with(test_config(max_concurrent_orders), false)
}

fn long_signal(entry: Decimal) -> TradingSignal {
    TradingSignal::new(
        "BTCUSDT",
        SignalDirection::Long,
        entry,
        dec!(44000),
        dec!(47000),
        0.8,
        None,
        "test",
    )
    .unwrap()
}

/// Register a live watched order in the state file the executor reads.
fn seed_watched(state_path: &PathBuf, order_id: &str, price: Decimal) {
    let (mut store, _) = StateStore::open(state_path);
    let mut order = garm_core::watchdog::seed_watched_order(
        order_id.to_string(),
        format!("garm-{order_id}"),
        "BTCUSDT".to_string(),
        SignalDirection::Long,
        dec!(0.004),
        price,
        dec!(44000),
        dec!(47000),
    );
    order.status = WatchedOrderStatus::New;
    store.insert(order).unwrap();
}

#[tokio::test]
async fn happy_path_long_sizing_and_submission() {
    let harness = harness(2);
    let outcome = harness.executor.execute(&long_signal(dec!(45000))).await.unwrap();

    // balance 1000, risk 2% -> 20 USDT, x10 leverage / 45000 -> 0.00444..,
    // quantized down to 0.004; notional 180 >= 5
    assert_eq!(outcome.quantity, dec!(0.004));
    assert_eq!(outcome.price, dec!(45000));
    assert!(outcome.client_order_id.starts_with("garm-"));

    let placed = harness.mock.placed_of_type(OrderType::Limit);
    assert_eq!(placed.len(), 1);
    let entry = &placed[0];
    assert_eq!(entry.symbol, "BTCUSDT");
    assert_eq!(entry.quantity, dec!(0.004));
    assert_eq!(entry.price, Some(dec!(45000)));
    assert_eq!(entry.position_side, PositionSide::Long);
    assert!(!entry.reduce_only);

    // leverage applied even though the mock omits the echo
    assert_eq!(harness.mock.leverage_calls(), vec![("BTCUSDT".to_string(), 10)]);

    // the watchdog seed is on the queue with the protective levels
    let drained = RequestQueue::new(&harness.queue_path).drain().unwrap();
    assert_eq!(drained.requests.len(), 1);
    match &drained.requests[0].payload {
        RequestPayload::AddOrder(seed) => {
            assert_eq!(seed.order_id, outcome.order_id);
            assert_eq!(seed.stop_loss, dec!(44000));
            assert_eq!(seed.take_profit, dec!(47000));
            assert_eq!(seed.status, WatchedOrderStatus::New);
        }
        other => panic!("unexpected request {other:?}"),
    }

    // the symbol is now blocked for the rest of the batch
    assert!(matches!(
        harness.availability.availability("BTCUSDT"),
        garm_core::recovery::SymbolAvailability::Blocked(_)
    ));
}

#[tokio::test]
async fn entry_price_off_tick_is_quantized_before_submission() {
    let harness = harness(2);
    let outcome = harness
        .executor
        .execute(&long_signal(dec!(45000.04)))
        .await
        .unwrap();
    assert_eq!(outcome.price, dec!(45000));
}

#[tokio::test]
async fn price_quality_gate_requires_strict_improvement() {
    let harness = harness(2);
    seed_watched(&harness.state_path, "9001", dec!(45000));

    // worse than the live 45000 reference
    let err = harness
        .executor
        .execute(&long_signal(dec!(45100)))
        .await
        .unwrap_err();
    match err {
        ExecutorError::Admission(AdmissionError::PriceQualityRejected {
            candidate,
            reference,
            ..
        }) => {
            assert_eq!(candidate, dec!(45100));
            assert_eq!(reference, dec!(45000));
        }
        other => panic!("unexpected error {other:?}"),
    }

    // equal is not strictly better either
    assert!(matches!(
        harness.executor.execute(&long_signal(dec!(45000))).await,
        Err(ExecutorError::Admission(
            AdmissionError::PriceQualityRejected { .. }
        ))
    ));

    // strictly better is admitted
    let outcome = harness
        .executor
        .execute(&long_signal(dec!(44900)))
        .await
        .unwrap();
    assert_eq!(outcome.price, dec!(44900));
}

#[tokio::test]
async fn price_gate_uses_position_entry_as_reference() {
    let harness = harness(3);
    harness
        .mock
        .set_position("BTCUSDT", PositionSide::Long, dec!(0.01), dec!(44500));

    assert!(matches!(
        harness.executor.execute(&long_signal(dec!(44800))).await,
        Err(ExecutorError::Admission(
            AdmissionError::PriceQualityRejected { .. }
        ))
    ));
    assert!(harness
        .executor
        .execute(&long_signal(dec!(44400)))
        .await
        .is_ok());
}

#[tokio::test]
async fn concurrency_cap_counts_positions_and_live_orders() {
    let harness = harness(2);
    harness
        .mock
        .set_position("BTCUSDT", PositionSide::Long, dec!(0.01), dec!(44000));
    seed_watched(&harness.state_path, "9001", dec!(44500));

    let err = harness
        .executor
        .execute(&long_signal(dec!(44200)))
        .await
        .unwrap_err();
    match err {
        ExecutorError::Admission(AdmissionError::ConcurrencyLimitReached {
            current, limit, ..
        }) => {
            assert_eq!(current, 2);
            assert_eq!(limit, 2);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(harness.mock.placed().is_empty());
}

#[tokio::test]
async fn two_simultaneous_signals_admit_exactly_one() {
    let harness = harness(1);
    let first = harness.executor.clone();
    let second = harness.executor.clone();
    let first_signal = long_signal(dec!(45000));
    let second_signal = long_signal(dec!(44900));
    let (a, b) = tokio::join!(
        first.execute(&first_signal),
        second.execute(&second_signal),
    );
    let admitted = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(admitted, 1);
    assert_eq!(harness.mock.placed_of_type(OrderType::Limit).len(), 1);
}

#[tokio::test]
async fn undersized_position_is_rejected_before_any_exchange_write() {
    let harness = harness(2);
    harness.mock.set_balance("USDT", dec!(10));

    let err = harness
        .executor
        .execute(&long_signal(dec!(45000)))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ExecutorError::Admission(AdmissionError::UndersizedPosition { .. })
    ));
    assert!(harness.mock.placed().is_empty());
    assert!(harness.mock.leverage_calls().is_empty());
}

#[tokio::test]
async fn blocked_symbol_short_circuits_the_pipeline() {
    let harness = harness(2);
    harness.availability.block("BTCUSDT", "open position");

    let err = harness
        .executor
        .execute(&long_signal(dec!(45000)))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ExecutorError::Admission(AdmissionError::SymbolBlocked { .. })
    ));
    assert!(harness.mock.placed().is_empty());
}

#[tokio::test]
async fn enqueue_failure_cancels_the_placed_order() {
    // queue path points into a directory that does not exist, so every
    // enqueue attempt fails after the order was placed
    let harness = harness_with(test_config(2), true);

    let err = harness
        .executor
        .execute(&long_signal(dec!(45000)))
        .await
        .unwrap_err();
    match err {
        ExecutorError::EnqueueFailedWithPlacedOrder {
            order_id,
            cancel_attempted,
            ..
        } => {
            assert!(cancel_attempted);
            // the orphan was taken back off the book
            let cancelled = harness.mock.cancelled();
            assert_eq!(cancelled.len(), 1);
            assert_eq!(cancelled[0].1, order_id);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(harness.notifier.contains("CRITICAL"));
}

#[tokio::test]
async fn short_signal_places_sell_entry() {
    let harness = harness(2);
    let signal = TradingSignal::new(
        "BTCUSDT",
        SignalDirection::Short,
        dec!(45000),
        dec!(46000),
        dec!(43000),
        0.7,
        None,
        "test",
    )
    .unwrap();
    harness.executor.execute(&signal).await.unwrap();
    let placed = harness.mock.placed_of_type(OrderType::Limit);
    assert_eq!(placed[0].side, garm_core::Side::Sell);
    assert_eq!(placed[0].position_side, PositionSide::Short);
}
