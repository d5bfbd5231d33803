//! Risk accounting and circuit-breaker scenarios.

mod support;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use bookedge::core::book::{BookLevel, BookStore};
use bookedge::core::domain::{
    EngineState, FillRecord, Intent, MarketId, Side, TimeInForce, TokenId,
};
use bookedge::core::risk::{RiskConfig, RiskManager};

use support::{MARKET, YES};

fn base_config() -> RiskConfig {
    RiskConfig {
        max_position_per_market: dec!(10000),
        max_total_exposure: dec!(100000),
        max_hourly_loss: dec!(1000),
        max_daily_loss: dec!(2000),
        max_open_orders_per_market: 10,
        p95_latency_ms_limit: 10000.0,
        reject_rate_limit: 10.0,
        drawdown_limit: dec!(100000),
        ws_health_timeout_sec: 100,
        picked_off_spike_count: 100,
        picked_off_window_sec: 60,
        picked_off_freshness_ms: 250,
        adverse_move_bps: dec!(30),
    }
}

fn fill(side: Side, price: Decimal, size: Decimal) -> FillRecord {
    FillRecord::new(
        MarketId::from(MARKET),
        TokenId::from(YES),
        side,
        price,
        size,
        Utc::now(),
    )
}

#[test]
fn round_trip_pnl_from_initial_cash() {
    let mut risk = RiskManager::with_initial_cash(base_config(), dec!(1000));
    risk.on_fill(&fill(Side::Buy, dec!(0.5), dec!(1000)));
    risk.on_fill(&fill(Side::Sell, dec!(0.6), dec!(1000)));

    assert_eq!(risk.cash(), dec!(1100));
    assert_eq!(risk.realized_pnl(), dec!(100));
    let position = risk
        .position(&MarketId::from(MARKET), &TokenId::from(YES))
        .unwrap();
    assert!(position.is_flat());
}

#[test]
fn mark_to_market_moves_unrealized_only() {
    let mut risk = RiskManager::with_initial_cash(base_config(), dec!(1000));
    risk.on_fill(&fill(Side::Buy, dec!(0.5), dec!(1)));
    let cash_before = risk.cash();

    let mut books = BookStore::new();
    books
        .upsert(
            MarketId::from(MARKET),
            TokenId::from(YES),
            vec![BookLevel::new(dec!(0.7), dec!(10))],
            vec![BookLevel::new(dec!(0.8), dec!(10))],
            Utc::now(),
            None,
            true,
            false,
        )
        .unwrap();
    risk.mark_to_market(&books);

    assert_eq!(risk.cash(), cash_before);
    assert!(risk.unrealized_pnl() > Decimal::ZERO);
    assert_eq!(risk.equity(), risk.cash() + risk.unrealized_pnl());
}

#[test]
fn hourly_loss_trips_breaker_with_fee() {
    let mut config = base_config();
    config.max_hourly_loss = dec!(0.1);
    let mut risk = RiskManager::new(config);
    risk.set_initial_state(EngineState::Running);
    risk.on_ws_health(Utc::now());

    risk.on_fill(&fill(Side::Buy, dec!(0.7), dec!(1)));
    risk.on_fill(&fill(Side::Sell, dec!(0.55), dec!(1)).with_fee(dec!(0.01)));

    let now = Utc::now();
    let snapshot = risk.snapshot(now);
    assert!(snapshot.hourly_pnl < dec!(-0.1));
    let (tripped, reason) = risk.evaluate_circuit_breakers(now);
    assert!(tripped);
    assert_eq!(reason, "hourly_loss");
}

#[test]
fn breaker_priority_is_stable() {
    // Trip everything; the report must name p95 latency first.
    let mut config = base_config();
    config.p95_latency_ms_limit = 1.0;
    config.drawdown_limit = dec!(0);
    config.max_hourly_loss = dec!(0.0001);
    let mut risk = RiskManager::new(config);
    risk.set_initial_state(EngineState::Running);
    for _ in 0..10 {
        risk.on_latency(100.0);
    }
    risk.on_fill(&fill(Side::Buy, dec!(0.7), dec!(1)));
    risk.on_fill(&fill(Side::Sell, dec!(0.1), dec!(1)));

    let (tripped, reason) = risk.evaluate_circuit_breakers(Utc::now());
    assert!(tripped);
    assert_eq!(reason, "p95_latency");
}

#[test]
fn can_place_walks_the_gate_list_in_order() {
    let mut config = base_config();
    config.max_open_orders_per_market = 1;
    let mut risk = RiskManager::new(config);
    risk.set_initial_state(EngineState::Running);
    risk.on_ws_health(Utc::now());

    let intent = Intent::place(
        MarketId::from(MARKET),
        TokenId::from(YES),
        Side::Buy,
        dec!(0.5),
        dec!(1),
        None,
        TimeInForce::Maker,
        "test",
    );

    let (ok, reason) = risk.can_place(&intent, Utc::now());
    assert!(ok, "{reason}");

    risk.set_open_orders(MarketId::from(MARKET), 1);
    let (ok, reason) = risk.can_place(&intent, Utc::now());
    assert!(!ok);
    assert_eq!(reason, "too_many_open_orders");
}

#[test]
fn drawdown_is_never_negative() {
    let mut risk = RiskManager::with_initial_cash(base_config(), dec!(100));
    risk.on_fill(&fill(Side::Buy, dec!(0.4), dec!(10)));
    risk.on_fill(&fill(Side::Sell, dec!(0.6), dec!(10)));
    let snapshot = risk.snapshot(Utc::now());
    assert!(snapshot.drawdown >= Decimal::ZERO);
    assert_eq!(risk.peak_equity(), risk.equity());

    // A losing round trip now creates positive drawdown.
    risk.on_fill(&fill(Side::Buy, dec!(0.6), dec!(10)));
    risk.on_fill(&fill(Side::Sell, dec!(0.4), dec!(10)));
    let snapshot = risk.snapshot(Utc::now());
    assert!(snapshot.drawdown > Decimal::ZERO);
}

#[test]
fn flatten_lifecycle_reaches_safe_and_stays() {
    let mut risk = RiskManager::new(base_config());
    risk.set_initial_state(EngineState::Running);
    risk.transition(EngineState::Flattening);
    assert_eq!(risk.state(), EngineState::Flattening);
    risk.transition(EngineState::Safe);
    assert_eq!(risk.state(), EngineState::Safe);
    // SAFE ignores resume attempts; only PAUSED is reachable.
    risk.transition(EngineState::Running);
    assert_eq!(risk.state(), EngineState::Safe);
    risk.transition(EngineState::Paused);
    assert_eq!(risk.state(), EngineState::Paused);
}
