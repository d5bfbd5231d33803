//! Risk and PnL engine.
//!
//! Owns positions, cash, realized/unrealized PnL, the engine lifecycle FSM,
//! and every pre-trade gate and circuit breaker. Cash moves only when PnL is
//! realized; equity is cash plus mark-to-market unrealized PnL.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::warn;

use crate::core::book::BookStore;
use crate::core::domain::{
    EngineState, FillRecord, Intent, IntentKind, MarketId, Position, Side,
};
use crate::core::metrics::percentile;

const LATENCY_WINDOW: usize = 2000;
const REJECT_WINDOW_SEC: i64 = 60;
const HOUR_SEC: i64 = 3600;
const DAY_SEC: i64 = 86400;

fn default_adverse_move_bps() -> Decimal {
    Decimal::from(30)
}

/// Risk limits and breaker thresholds.
#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    pub max_position_per_market: Decimal,
    pub max_total_exposure: Decimal,
    pub max_hourly_loss: Decimal,
    pub max_daily_loss: Decimal,
    pub max_open_orders_per_market: usize,
    pub p95_latency_ms_limit: f64,
    /// Rejects per second over the trailing minute.
    pub reject_rate_limit: f64,
    pub drawdown_limit: Decimal,
    pub ws_health_timeout_sec: i64,
    pub picked_off_spike_count: usize,
    pub picked_off_window_sec: i64,
    pub picked_off_freshness_ms: i64,
    #[serde(default = "default_adverse_move_bps")]
    pub adverse_move_bps: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_per_market: Decimal::from(100),
            max_total_exposure: Decimal::from(1000),
            max_hourly_loss: Decimal::from(50),
            max_daily_loss: Decimal::from(100),
            max_open_orders_per_market: 8,
            p95_latency_ms_limit: 1000.0,
            reject_rate_limit: 0.5,
            drawdown_limit: Decimal::from(100),
            ws_health_timeout_sec: 30,
            picked_off_spike_count: 5,
            picked_off_window_sec: 60,
            picked_off_freshness_ms: 250,
            adverse_move_bps: default_adverse_move_bps(),
        }
    }
}

/// Point-in-time view of the risk surface.
#[derive(Debug, Clone)]
pub struct RiskSnapshot {
    pub exposure: Decimal,
    pub hourly_pnl: Decimal,
    pub daily_pnl: Decimal,
    pub reject_rate: f64,
    pub p95_latency_ms: f64,
    pub drawdown: Decimal,
    pub ws_healthy: bool,
    pub picked_off_spike: bool,
    pub cash: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub equity: Decimal,
}

/// Single-writer risk state. Mutated only by the engine task.
pub struct RiskManager {
    cfg: RiskConfig,
    state: EngineState,
    positions: HashMap<String, Position>,
    open_orders_per_market: HashMap<MarketId, usize>,
    pnl_hour: VecDeque<(DateTime<Utc>, Decimal)>,
    pnl_day: VecDeque<(DateTime<Utc>, Decimal)>,
    rejects: VecDeque<DateTime<Utc>>,
    latencies_ms: VecDeque<f64>,
    picked_off: VecDeque<DateTime<Utc>>,
    ws_last_seen: Option<DateTime<Utc>>,
    cash: Decimal,
    realized_pnl: Decimal,
    unrealized_pnl: Decimal,
    peak_equity: Decimal,
}

impl RiskManager {
    #[must_use]
    pub fn new(cfg: RiskConfig) -> Self {
        Self::with_initial_cash(cfg, Decimal::ZERO)
    }

    /// Start with a cash balance (used by the backtester).
    #[must_use]
    pub fn with_initial_cash(cfg: RiskConfig, cash: Decimal) -> Self {
        Self {
            cfg,
            state: EngineState::Paused,
            positions: HashMap::new(),
            open_orders_per_market: HashMap::new(),
            pnl_hour: VecDeque::new(),
            pnl_day: VecDeque::new(),
            rejects: VecDeque::new(),
            latencies_ms: VecDeque::new(),
            picked_off: VecDeque::new(),
            ws_last_seen: None,
            cash,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            peak_equity: cash,
        }
    }

    #[must_use]
    pub fn config(&self) -> &RiskConfig {
        &self.cfg
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Apply a state transition; illegal transitions are ignored.
    pub fn transition(&mut self, target: EngineState) {
        if self.state.can_transition_to(target) {
            self.state = target;
        } else if self.state != target {
            warn!(from = %self.state, to = %target, "Ignoring illegal engine state transition");
        }
    }

    /// Force the initial state at startup, bypassing the transition table.
    pub fn set_initial_state(&mut self, state: EngineState) {
        self.state = state;
    }

    #[must_use]
    pub fn positions(&self) -> &HashMap<String, Position> {
        &self.positions
    }

    #[must_use]
    pub fn position(&self, market_id: &MarketId, token_id: &crate::core::domain::TokenId) -> Option<&Position> {
        self.positions.get(&format!("{market_id}:{token_id}"))
    }

    #[must_use]
    pub fn cash(&self) -> Decimal {
        self.cash
    }

    #[must_use]
    pub fn realized_pnl(&self) -> Decimal {
        self.realized_pnl
    }

    #[must_use]
    pub fn unrealized_pnl(&self) -> Decimal {
        self.unrealized_pnl
    }

    #[must_use]
    pub fn equity(&self) -> Decimal {
        self.cash + self.unrealized_pnl
    }

    #[must_use]
    pub fn peak_equity(&self) -> Decimal {
        self.peak_equity
    }

    pub fn on_ws_health(&mut self, ts: DateTime<Utc>) {
        self.ws_last_seen = Some(ts);
    }

    pub fn on_latency(&mut self, latency_ms: f64) {
        self.latencies_ms.push_back(latency_ms);
        while self.latencies_ms.len() > LATENCY_WINDOW {
            self.latencies_ms.pop_front();
        }
    }

    pub fn on_reject(&mut self, ts: DateTime<Utc>) {
        self.rejects.push_back(ts);
        trim_instants(&mut self.rejects, ts, REJECT_WINDOW_SEC);
    }

    pub fn on_picked_off(&mut self, ts: DateTime<Utc>) {
        self.picked_off.push_back(ts);
        trim_instants(&mut self.picked_off, ts, self.cfg.picked_off_window_sec);
    }

    pub fn set_open_orders(&mut self, market_id: MarketId, count: usize) {
        self.open_orders_per_market.insert(market_id, count);
    }

    /// Apply a fill to the position book.
    ///
    /// Same-direction fills blend the average price and realize nothing.
    /// Reducing fills keep the average, realize `(price − avg)·closed·sign`
    /// net of fee into cash, and record the delta in the loss windows.
    /// Flips realize the closed quantity first, then reopen at the fill
    /// price. Returns the realized delta.
    pub fn on_fill(&mut self, fill: &FillRecord) -> Decimal {
        let key = format!("{}:{}", fill.market_id, fill.token_id);
        let pos = self
            .positions
            .entry(key)
            .or_insert_with(|| Position::flat(fill.market_id.clone(), fill.token_id.clone()));

        let sign = fill.side.sign();
        let old_qty = pos.qty;
        let new_qty = old_qty + sign * fill.size;

        let mut realized = Decimal::ZERO;
        let mut reduced = false;

        if (sign * old_qty) >= Decimal::ZERO {
            // Opening or adding in the same direction: weighted average.
            let total = old_qty.abs() + fill.size;
            if !total.is_zero() {
                pos.avg_price =
                    (pos.avg_price * old_qty.abs() + fill.price * fill.size) / total;
            }
            pos.qty = new_qty;
        } else {
            reduced = true;
            let closed = old_qty.abs().min(fill.size);
            let direction = if old_qty > Decimal::ZERO {
                Decimal::ONE
            } else {
                -Decimal::ONE
            };
            realized = (fill.price - pos.avg_price) * closed * direction - fill.fee;

            if new_qty.is_zero() {
                pos.qty = Decimal::ZERO;
                pos.avg_price = Decimal::ZERO;
            } else if (new_qty * old_qty) > Decimal::ZERO {
                // Reduced without flipping: average unchanged.
                pos.qty = new_qty;
            } else {
                // Flipped through zero: reopen at the fill price.
                pos.qty = new_qty;
                pos.avg_price = fill.price;
            }
        }

        if reduced {
            self.cash += realized;
            self.realized_pnl += realized;
            self.record_pnl(realized, fill.ts);
        }
        self.peak_equity = self.peak_equity.max(self.equity());
        realized
    }

    fn record_pnl(&mut self, delta: Decimal, ts: DateTime<Utc>) {
        self.pnl_hour.push_back((ts, delta));
        self.pnl_day.push_back((ts, delta));
        trim_events(&mut self.pnl_hour, ts, HOUR_SEC);
        trim_events(&mut self.pnl_day, ts, DAY_SEC);
    }

    /// Recompute unrealized PnL against book midpoints. Cash is untouched.
    pub fn mark_to_market(&mut self, books: &BookStore) {
        let mut unrealized = Decimal::ZERO;
        for pos in self.positions.values() {
            if pos.is_flat() {
                continue;
            }
            if let Some(mid) = books
                .get(&pos.market_id, &pos.token_id)
                .and_then(crate::core::book::BookState::mid)
            {
                unrealized += pos.qty * (mid - pos.avg_price);
            }
        }
        self.unrealized_pnl = unrealized;
        self.peak_equity = self.peak_equity.max(self.equity());
    }

    /// Gross exposure of all open positions.
    #[must_use]
    pub fn exposure(&self) -> Decimal {
        self.positions
            .values()
            .map(|p| (p.qty * p.avg_price).abs())
            .sum()
    }

    /// Pre-trade gate. Cancels and noops always pass; places run the full
    /// check list in a fixed order, returning the first failing reason.
    pub fn can_place(&mut self, intent: &Intent, now: DateTime<Utc>) -> (bool, String) {
        if self.state != EngineState::Running {
            return (false, format!("state={}", self.state));
        }
        let IntentKind::Place { side, price, size, .. } = &intent.kind else {
            return (true, "ok".into());
        };

        let open_count = self
            .open_orders_per_market
            .get(&intent.market_id)
            .copied()
            .unwrap_or(0);
        if open_count >= self.cfg.max_open_orders_per_market {
            return (false, "too_many_open_orders".into());
        }

        let key = format!("{}:{}", intent.market_id, intent.token_id);
        let current_qty = self
            .positions
            .get(&key)
            .map_or(Decimal::ZERO, |p| p.qty);
        let projected = current_qty
            + match side {
                Side::Buy => *size,
                Side::Sell => -*size,
            };
        if projected.abs() > self.cfg.max_position_per_market {
            return (false, "max_position_per_market".into());
        }

        if self.exposure() + (*price * *size).abs() > self.cfg.max_total_exposure {
            return (false, "max_total_exposure".into());
        }

        let snap = self.snapshot(now);
        if snap.hourly_pnl.abs() > self.cfg.max_hourly_loss {
            return (false, "max_hourly_loss".into());
        }
        if snap.daily_pnl.abs() > self.cfg.max_daily_loss {
            return (false, "max_daily_loss".into());
        }
        if snap.reject_rate > self.cfg.reject_rate_limit {
            return (false, "reject_rate_limit".into());
        }
        if snap.p95_latency_ms > self.cfg.p95_latency_ms_limit {
            return (false, "latency_limit".into());
        }
        if snap.drawdown > self.cfg.drawdown_limit {
            return (false, "drawdown_limit".into());
        }
        if snap.picked_off_spike {
            return (false, "picked_off_spike".into());
        }
        if !snap.ws_healthy {
            return (false, "ws_unhealthy".into());
        }
        (true, "ok".into())
    }

    /// Evaluate every breaker in fixed priority; the first trip wins.
    pub fn evaluate_circuit_breakers(&mut self, now: DateTime<Utc>) -> (bool, &'static str) {
        let snap = self.snapshot(now);
        if snap.p95_latency_ms > self.cfg.p95_latency_ms_limit {
            return (true, "p95_latency");
        }
        if snap.reject_rate > self.cfg.reject_rate_limit {
            return (true, "reject_rate");
        }
        if snap.drawdown > self.cfg.drawdown_limit {
            return (true, "drawdown");
        }
        if snap.picked_off_spike {
            return (true, "picked_off_spike");
        }
        if !snap.ws_healthy {
            return (true, "ws_health");
        }
        if snap.hourly_pnl.abs() > self.cfg.max_hourly_loss {
            return (true, "hourly_loss");
        }
        if snap.daily_pnl.abs() > self.cfg.max_daily_loss {
            return (true, "daily_loss");
        }
        (false, "ok")
    }

    /// Trim windows and summarize the current risk surface.
    pub fn snapshot(&mut self, now: DateTime<Utc>) -> RiskSnapshot {
        trim_events(&mut self.pnl_hour, now, HOUR_SEC);
        trim_events(&mut self.pnl_day, now, DAY_SEC);
        trim_instants(&mut self.rejects, now, REJECT_WINDOW_SEC);
        trim_instants(&mut self.picked_off, now, self.cfg.picked_off_window_sec);

        let mut sorted: Vec<f64> = self.latencies_ms.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let ws_healthy = self
            .ws_last_seen
            .is_some_and(|ts| (now - ts).num_seconds() <= self.cfg.ws_health_timeout_sec);

        RiskSnapshot {
            exposure: self.exposure(),
            hourly_pnl: self.pnl_hour.iter().map(|(_, d)| *d).sum(),
            daily_pnl: self.pnl_day.iter().map(|(_, d)| *d).sum(),
            reject_rate: self.rejects.len() as f64 / REJECT_WINDOW_SEC as f64,
            p95_latency_ms: percentile(&sorted, 0.95),
            drawdown: self.peak_equity - self.equity(),
            ws_healthy,
            picked_off_spike: self.picked_off.len() >= self.cfg.picked_off_spike_count,
            cash: self.cash,
            realized_pnl: self.realized_pnl,
            unrealized_pnl: self.unrealized_pnl,
            equity: self.equity(),
        }
    }
}

fn trim_events(buf: &mut VecDeque<(DateTime<Utc>, Decimal)>, now: DateTime<Utc>, window_sec: i64) {
    let cutoff = now - Duration::seconds(window_sec);
    while buf.front().is_some_and(|(ts, _)| *ts < cutoff) {
        buf.pop_front();
    }
}

fn trim_instants(buf: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>, window_sec: i64) {
    let cutoff = now - Duration::seconds(window_sec);
    while buf.front().is_some_and(|ts| *ts < cutoff) {
        buf.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::book::BookLevel;
    use crate::core::domain::{TimeInForce, TokenId};
    use rust_decimal_macros::dec;

    fn cfg() -> RiskConfig {
        RiskConfig {
            max_position_per_market: dec!(100),
            max_total_exposure: dec!(10000),
            max_hourly_loss: dec!(1000),
            max_daily_loss: dec!(2000),
            max_open_orders_per_market: 10,
            p95_latency_ms_limit: 1000.0,
            reject_rate_limit: 1.0,
            drawdown_limit: dec!(10000),
            ws_health_timeout_sec: 100,
            picked_off_spike_count: 100,
            picked_off_window_sec: 60,
            picked_off_freshness_ms: 250,
            adverse_move_bps: dec!(30),
        }
    }

    fn fill(side: Side, price: Decimal, size: Decimal) -> FillRecord {
        FillRecord::new(
            MarketId::from("m"),
            TokenId::from("t"),
            side,
            price,
            size,
            Utc::now(),
        )
    }

    fn running(cfg: RiskConfig) -> RiskManager {
        let mut rm = RiskManager::new(cfg);
        rm.set_initial_state(EngineState::Running);
        rm.on_ws_health(Utc::now());
        rm
    }

    #[test]
    fn open_and_add_long_updates_weighted_average() {
        let mut rm = RiskManager::new(cfg());
        rm.on_fill(&fill(Side::Buy, dec!(0.4), dec!(2)));
        rm.on_fill(&fill(Side::Buy, dec!(0.6), dec!(2)));
        let pos = rm.position(&MarketId::from("m"), &TokenId::from("t")).unwrap();
        assert_eq!(pos.qty, dec!(4));
        assert_eq!(pos.avg_price, dec!(0.5));
        assert_eq!(rm.realized_pnl(), Decimal::ZERO);
    }

    #[test]
    fn reduce_long_keeps_average_and_realizes() {
        let mut rm = RiskManager::new(cfg());
        rm.on_fill(&fill(Side::Buy, dec!(0.5), dec!(4)));
        let realized = rm.on_fill(&fill(Side::Sell, dec!(0.7), dec!(1)));
        let pos = rm.position(&MarketId::from("m"), &TokenId::from("t")).unwrap();
        assert_eq!(pos.qty, dec!(3));
        assert_eq!(pos.avg_price, dec!(0.5));
        assert_eq!(realized, dec!(0.2));
        assert_eq!(rm.realized_pnl(), dec!(0.2));
    }

    #[test]
    fn flip_long_to_short_reopens_at_fill_price() {
        let mut rm = RiskManager::new(cfg());
        rm.on_fill(&fill(Side::Buy, dec!(0.5), dec!(2)));
        rm.on_fill(&fill(Side::Sell, dec!(0.4), dec!(5)));
        let pos = rm.position(&MarketId::from("m"), &TokenId::from("t")).unwrap();
        assert_eq!(pos.qty, dec!(-3));
        assert_eq!(pos.avg_price, dec!(0.4));
        // Realized on the closed 2 @ (0.4 - 0.5).
        assert_eq!(rm.realized_pnl(), dec!(-0.2));
    }

    #[test]
    fn open_and_add_short_updates_weighted_average() {
        let mut rm = RiskManager::new(cfg());
        rm.on_fill(&fill(Side::Sell, dec!(0.6), dec!(2)));
        rm.on_fill(&fill(Side::Sell, dec!(0.4), dec!(2)));
        let pos = rm.position(&MarketId::from("m"), &TokenId::from("t")).unwrap();
        assert_eq!(pos.qty, dec!(-4));
        assert_eq!(pos.avg_price, dec!(0.5));
    }

    #[test]
    fn cover_short_keeps_average_and_realizes() {
        let mut rm = RiskManager::new(cfg());
        rm.on_fill(&fill(Side::Sell, dec!(0.5), dec!(4)));
        let realized = rm.on_fill(&fill(Side::Buy, dec!(0.3), dec!(1)));
        let pos = rm.position(&MarketId::from("m"), &TokenId::from("t")).unwrap();
        assert_eq!(pos.qty, dec!(-3));
        assert_eq!(pos.avg_price, dec!(0.5));
        assert_eq!(realized, dec!(0.2));
    }

    #[test]
    fn flip_short_to_long_reopens_at_fill_price() {
        let mut rm = RiskManager::new(cfg());
        rm.on_fill(&fill(Side::Sell, dec!(0.5), dec!(2)));
        rm.on_fill(&fill(Side::Buy, dec!(0.6), dec!(5)));
        let pos = rm.position(&MarketId::from("m"), &TokenId::from("t")).unwrap();
        assert_eq!(pos.qty, dec!(3));
        assert_eq!(pos.avg_price, dec!(0.6));
    }

    #[test]
    fn round_trip_moves_cash_by_price_difference_times_size() {
        let mut rm = RiskManager::with_initial_cash(cfg(), dec!(1000));
        rm.on_fill(&fill(Side::Buy, dec!(0.5), dec!(1000)));
        assert_eq!(rm.cash(), dec!(1000));
        rm.on_fill(&fill(Side::Sell, dec!(0.6), dec!(1000)));
        assert_eq!(rm.cash(), dec!(1100));
        assert_eq!(rm.realized_pnl(), dec!(100));
        let pos = rm.position(&MarketId::from("m"), &TokenId::from("t")).unwrap();
        assert!(pos.is_flat());
    }

    #[test]
    fn mark_to_market_changes_unrealized_not_cash() {
        let mut rm = RiskManager::with_initial_cash(cfg(), dec!(1000));
        rm.on_fill(&fill(Side::Buy, dec!(0.5), dec!(1)));
        let cash_before = rm.cash();

        let mut books = BookStore::new();
        books
            .upsert(
                MarketId::from("m"),
                TokenId::from("t"),
                vec![BookLevel::new(dec!(0.7), dec!(10))],
                vec![BookLevel::new(dec!(0.8), dec!(10))],
                Utc::now(),
                None,
                true,
                false,
            )
            .unwrap();
        rm.mark_to_market(&books);

        assert_eq!(rm.cash(), cash_before);
        // mid 0.75 vs avg 0.5 on qty 1.
        assert_eq!(rm.unrealized_pnl(), dec!(0.25));
        assert_eq!(rm.equity(), cash_before + dec!(0.25));
    }

    #[test]
    fn equity_identity_holds_across_fills() {
        let mut rm = RiskManager::with_initial_cash(cfg(), dec!(100));
        rm.on_fill(&fill(Side::Buy, dec!(0.4), dec!(2)));
        rm.on_fill(&fill(Side::Sell, dec!(0.5), dec!(1)));
        assert_eq!(rm.equity(), rm.cash() + rm.unrealized_pnl());
        assert!(rm.peak_equity() >= rm.equity());
        let snap = rm.snapshot(Utc::now());
        assert!(snap.drawdown >= Decimal::ZERO);
    }

    #[test]
    fn hourly_loss_breaker_trips_with_fee() {
        let mut limits = cfg();
        limits.max_hourly_loss = dec!(0.1);
        let mut rm = running(limits);
        let ts = Utc::now();
        rm.on_fill(&fill(Side::Buy, dec!(0.7), dec!(1)));
        rm.on_fill(&fill(Side::Sell, dec!(0.55), dec!(1)).with_fee(dec!(0.01)));

        let snap = rm.snapshot(ts);
        assert!(snap.hourly_pnl < dec!(-0.1));
        assert_eq!(snap.hourly_pnl, rm.realized_pnl());
        let (tripped, reason) = rm.evaluate_circuit_breakers(ts);
        assert!(tripped);
        assert_eq!(reason, "hourly_loss");
    }

    #[test]
    fn daily_loss_breaker_trips_on_short_cover_loss() {
        let mut limits = cfg();
        limits.max_hourly_loss = dec!(999);
        limits.max_daily_loss = dec!(0.15);
        let mut rm = running(limits);
        let ts = Utc::now();
        rm.on_fill(&fill(Side::Sell, dec!(0.3), dec!(1)));
        rm.on_fill(&fill(Side::Buy, dec!(0.55), dec!(1)).with_fee(dec!(0.01)));

        let snap = rm.snapshot(ts);
        assert!(snap.daily_pnl < dec!(-0.15));
        let (tripped, reason) = rm.evaluate_circuit_breakers(ts);
        assert!(tripped);
        assert_eq!(reason, "daily_loss");
    }

    #[test]
    fn flip_records_exactly_one_pnl_event() {
        let mut limits = cfg();
        limits.max_hourly_loss = dec!(0.1);
        let mut rm = running(limits);
        rm.on_fill(&fill(Side::Buy, dec!(0.6), dec!(1)));
        rm.on_fill(&fill(Side::Sell, dec!(0.4), dec!(2)).with_fee(dec!(0.02)));
        assert_eq!(rm.pnl_hour.len(), 1);
        let (tripped, reason) = rm.evaluate_circuit_breakers(Utc::now());
        assert!(tripped);
        assert_eq!(reason, "hourly_loss");
    }

    #[test]
    fn ws_silence_trips_breaker() {
        let mut rm = running(cfg());
        rm.ws_last_seen = Some(Utc::now() - Duration::seconds(1000));
        let (tripped, reason) = rm.evaluate_circuit_breakers(Utc::now());
        assert!(tripped);
        assert_eq!(reason, "ws_health");
    }

    #[test]
    fn latency_breaker_has_top_priority() {
        let mut rm = running(cfg());
        rm.ws_last_seen = None;
        for _ in 0..100 {
            rm.on_latency(5000.0);
        }
        let (tripped, reason) = rm.evaluate_circuit_breakers(Utc::now());
        assert!(tripped);
        assert_eq!(reason, "p95_latency");
    }

    fn place_intent(size: Decimal) -> Intent {
        Intent::place(
            MarketId::from("m"),
            TokenId::from("t"),
            Side::Buy,
            dec!(0.5),
            size,
            None,
            TimeInForce::Maker,
            "test",
        )
    }

    #[test]
    fn can_place_rejects_when_not_running() {
        let mut rm = RiskManager::new(cfg());
        let (ok, reason) = rm.can_place(&place_intent(dec!(1)), Utc::now());
        assert!(!ok);
        assert_eq!(reason, "state=PAUSED");
    }

    #[test]
    fn can_place_enforces_open_order_cap() {
        let mut rm = running(cfg());
        rm.set_open_orders(MarketId::from("m"), 10);
        let (ok, reason) = rm.can_place(&place_intent(dec!(1)), Utc::now());
        assert!(!ok);
        assert_eq!(reason, "too_many_open_orders");
    }

    #[test]
    fn can_place_enforces_position_limit() {
        let mut rm = running(cfg());
        let (ok, reason) = rm.can_place(&place_intent(dec!(101)), Utc::now());
        assert!(!ok);
        assert_eq!(reason, "max_position_per_market");
    }

    #[test]
    fn can_place_enforces_exposure_limit() {
        let mut limits = cfg();
        limits.max_position_per_market = dec!(1000000);
        limits.max_total_exposure = dec!(10);
        let mut rm = running(limits);
        let (ok, reason) = rm.can_place(&place_intent(dec!(100)), Utc::now());
        assert!(!ok);
        assert_eq!(reason, "max_total_exposure");
    }

    #[test]
    fn can_place_passes_cancels_through() {
        let mut rm = RiskManager::new(cfg());
        rm.set_initial_state(EngineState::Running);
        let cancel = Intent::cancel(MarketId::from("m"), TokenId::from("t"), "ref", "test");
        let (ok, _) = rm.can_place(&cancel, Utc::now());
        assert!(ok);
    }

    #[test]
    fn can_place_accepts_healthy_state() {
        let mut rm = running(cfg());
        let (ok, reason) = rm.can_place(&place_intent(dec!(1)), Utc::now());
        assert!(ok, "{reason}");
    }

    #[test]
    fn illegal_transition_is_ignored() {
        let mut rm = RiskManager::new(cfg());
        rm.set_initial_state(EngineState::Safe);
        rm.transition(EngineState::Running);
        assert_eq!(rm.state(), EngineState::Safe);
        rm.transition(EngineState::Paused);
        assert_eq!(rm.state(), EngineState::Paused);
    }

    #[test]
    fn picked_off_spike_trips_breaker() {
        let mut limits = cfg();
        limits.picked_off_spike_count = 3;
        let mut rm = running(limits);
        let now = Utc::now();
        for _ in 0..3 {
            rm.on_picked_off(now);
        }
        let (tripped, reason) = rm.evaluate_circuit_breakers(now);
        assert!(tripped);
        assert_eq!(reason, "picked_off_spike");
    }
}
