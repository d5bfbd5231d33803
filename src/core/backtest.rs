//! Backtest driver.
//!
//! Replays the persisted event log through the same book store, strategy,
//! order state machine and risk engine as live trading, with a simulated
//! execution adapter that fills against the top of the replayed book.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

use crate::core::book::BookStore;
use crate::core::db::DbPool;
use crate::core::domain::{
    EngineState, EventKind, FillRecord, MarketId, Side, TokenId,
};
use crate::core::exchange::{ExecutionClient, ExecutionResponse, PlaceOrderRequest};
use crate::core::market::{MarketRegistry, MarketRules};
use crate::core::metrics::Metrics;
use crate::core::normalize::{parse_levels, Normalizer};
use crate::core::order::{OrderConfig, OrderManager};
use crate::core::ratelimit::{RateLimitConfig, RateLimiter};
use crate::core::risk::{RiskConfig, RiskManager};
use crate::core::store::{load_events_for_replay, ReplayEvent};
use crate::core::strategy::{Strategy, StrategyParams};
use crate::error::Result;

/// Deterministic execution stand-in: every call succeeds immediately.
struct SimExecution;

#[async_trait]
impl ExecutionClient for SimExecution {
    async fn place_order(&self, request: PlaceOrderRequest) -> ExecutionResponse {
        ExecutionResponse {
            ok: true,
            status_code: 200,
            order_id: Some(format!("sim-{}", request.client_order_id)),
            client_order_id: Some(request.client_order_id),
            sent_ts: Utc::now(),
            error: None,
        }
    }

    async fn cancel_order(&self, order_ref: &str) -> ExecutionResponse {
        ExecutionResponse {
            ok: true,
            status_code: 200,
            order_id: Some(order_ref.to_string()),
            client_order_id: None,
            sent_ts: Utc::now(),
            error: None,
        }
    }
}

/// Summary of one replay run.
#[derive(Debug, Clone, Serialize)]
pub struct BacktestReport {
    pub events_replayed: usize,
    pub orders_total: usize,
    pub open_orders: usize,
    pub fills: u64,
    pub partial_fills: u64,
    pub rejects: u64,
    pub sent: u64,
    pub edge_capture_rate: f64,
    pub cash: Decimal,
    pub equity: Decimal,
    pub realized_pnl: Decimal,
}

impl std::fmt::Display for BacktestReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(f, "{self:?}"),
        }
    }
}

/// Replays persisted events through the live subsystems.
pub struct Backtester {
    pool: DbPool,
    books: BookStore,
    risk: RiskManager,
    order_manager: OrderManager,
    strategy: Strategy,
    metrics: Metrics,
    require_nonempty_active_book: bool,
    market_tokens: HashMap<MarketId, BTreeSet<TokenId>>,
}

impl Backtester {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        pool: DbPool,
        registry: MarketRegistry,
        risk_cfg: RiskConfig,
        order_cfg: OrderConfig,
        rate_cfg: RateLimitConfig,
        params: StrategyParams,
        default_fee_rate: Decimal,
        initial_capital: Decimal,
        require_nonempty_active_book: bool,
    ) -> Self {
        let registry = Arc::new(parking_lot::RwLock::new(registry));
        let rules = MarketRules::new(registry, default_fee_rate);
        let normalizer = Normalizer::new(rules.clone());
        let mut risk = RiskManager::with_initial_cash(risk_cfg, initial_capital);
        risk.set_initial_state(EngineState::Running);
        risk.on_ws_health(Utc::now());
        Self {
            pool,
            books: BookStore::new(),
            risk,
            order_manager: OrderManager::new(
                order_cfg,
                Arc::new(SimExecution),
                RateLimiter::new(rate_cfg),
                normalizer,
            ),
            strategy: Strategy::new(params, rules),
            metrics: Metrics::new(),
            require_nonempty_active_book,
            market_tokens: HashMap::new(),
        }
    }

    /// Build from the app config, as the `backtest` command does.
    #[must_use]
    pub fn from_config(cfg: &crate::app::config::Config, pool: DbPool) -> Self {
        Self::new(
            pool,
            cfg.build_registry(),
            cfg.risk.clone(),
            cfg.order.clone(),
            cfg.rate_limits.to_config(),
            StrategyParams {
                min_edge_threshold: cfg.thresholds.min_edge_threshold,
                failure_buffer: cfg.thresholds.failure_buffer,
                max_slippage_bps: cfg.thresholds.max_slippage_bps,
                ttl_ms: cfg.order.default_ttl_ms,
            },
            cfg.thresholds.default_fee_rate,
            cfg.backtest.initial_capital,
            cfg.snapshot.require_nonempty_active_book,
        )
    }

    /// Replay the whole event log and report.
    pub async fn run(mut self) -> Result<BacktestReport> {
        let events = load_events_for_replay(&self.pool, None, None)?;
        let total = events.len();
        info!(events = total, "Backtest replay starting");

        for event in events {
            self.step(&event).await;
        }
        self.mark_to_market();

        let report = BacktestReport {
            events_replayed: total,
            orders_total: self.order_manager.orders().count(),
            open_orders: self.order_manager.live_open_orders_count(None),
            fills: self.metrics.counter("fill"),
            partial_fills: self.metrics.counter("partial_fill"),
            rejects: self.metrics.counter("reject"),
            sent: self.metrics.counter("sent"),
            edge_capture_rate: self.metrics.ratio("fill", "sent"),
            cash: self.risk.cash(),
            equity: self.risk.equity(),
            realized_pnl: self.risk.realized_pnl(),
        };
        Ok(report)
    }

    async fn step(&mut self, event: &ReplayEvent) {
        let Some(kind) = EventKind::parse(&event.event_type) else {
            return;
        };
        let recv_ts = from_epoch(event.ts);
        let market_id = MarketId::from(event.market_id.clone().unwrap_or_default());

        match kind {
            EventKind::OrderBookUpdate => {
                let Some(token) = event.token_id.clone().map(TokenId::from) else {
                    return;
                };
                let bids = parse_levels(event.payload.get("bids"));
                let asks = parse_levels(event.payload.get("asks"));
                self.market_tokens
                    .entry(market_id.clone())
                    .or_default()
                    .insert(token.clone());
                if self
                    .books
                    .upsert(
                        market_id.clone(),
                        token,
                        bids,
                        asks,
                        recv_ts,
                        None,
                        true,
                        self.require_nonempty_active_book,
                    )
                    .is_err()
                {
                    self.metrics.inc("book_anomaly");
                    return;
                }
                self.run_cycle(&market_id).await;
            }
            EventKind::Fill => {
                self.metrics.inc("fill");
                let fill = FillRecord {
                    market_id,
                    token_id: TokenId::from(event.token_id.clone().unwrap_or_default()),
                    side: event
                        .payload
                        .get("side")
                        .and_then(|v| v.as_str())
                        .and_then(Side::parse)
                        .unwrap_or(Side::Buy),
                    price: decimal_field(event, "price"),
                    size: decimal_field(event, "size"),
                    ts: recv_ts,
                    fee: decimal_field(event, "fee"),
                    order_id: str_field(event, "order_id"),
                    client_order_id: str_field(event, "client_order_id"),
                };
                self.apply_fill(&fill);
            }
            EventKind::Reject => self.metrics.inc("reject"),
            EventKind::Cancel => self.metrics.inc("cancel"),
            EventKind::OrderAck | EventKind::WsHealth => {}
        }
    }

    /// Apply a replayed or simulated fill to both the order SM and risk.
    pub fn apply_fill(&mut self, fill: &FillRecord) {
        if let Some(client_order_id) = &fill.client_order_id {
            self.order_manager.on_fill(client_order_id, fill.size);
        }
        self.risk.on_fill(fill);
    }

    /// Recompute unrealized PnL against current replayed books.
    pub fn mark_to_market(&mut self) {
        self.risk.mark_to_market(&self.books);
    }

    #[must_use]
    pub fn risk(&self) -> &RiskManager {
        &self.risk
    }

    pub fn books_mut(&mut self) -> &mut BookStore {
        &mut self.books
    }

    async fn run_cycle(&mut self, market_id: &MarketId) {
        let Some(tokens) = self.market_tokens.get(market_id) else {
            return;
        };
        if tokens.len() < 2 {
            return;
        }
        let mut iter = tokens.iter();
        let (yes, no) = (iter.next().cloned(), iter.next().cloned());
        let (Some(yes), Some(no)) = (yes, no) else {
            return;
        };

        let intents = {
            let book_yes = self.books.get(market_id, &yes);
            let book_no = self.books.get(market_id, &no);
            self.strategy
                .compute_intents(book_yes, book_no, market_id, &yes, &no, Decimal::ZERO)
        };

        for intent in intents {
            if intent.is_noop() {
                continue;
            }
            let (ok, _) = self.risk.can_place(&intent, Utc::now());
            if !ok {
                continue;
            }
            let decision = self.order_manager.process_intent(&intent, false).await;
            let (Some(client_order_id), true) = (decision.client_order_id, decision.accepted)
            else {
                continue;
            };
            self.metrics.inc("sent");

            let Some(order) = self.order_manager.get(&client_order_id).cloned() else {
                continue;
            };
            self.order_manager
                .on_ack(&client_order_id, order.venue_order_id.clone());

            let (filled, partial) = self.simulate_fill(
                &order.market_id,
                &order.token_id,
                order.side,
                order.price,
                order.remaining_size,
            );
            if filled > Decimal::ZERO {
                let fill = FillRecord {
                    market_id: order.market_id.clone(),
                    token_id: order.token_id.clone(),
                    side: order.side,
                    price: order.price,
                    size: filled,
                    ts: Utc::now(),
                    fee: Decimal::ZERO,
                    order_id: order.venue_order_id.clone(),
                    client_order_id: Some(client_order_id.clone()),
                };
                self.apply_fill(&fill);
                self.metrics.inc("fill");
                if partial {
                    self.metrics.inc("partial_fill");
                }
            }
        }

        let open = self.order_manager.live_open_orders_count(Some(market_id));
        self.risk.set_open_orders(market_id.clone(), open);
    }

    /// Fill against the top of the replayed book: full size if the top
    /// level covers it, the top level's size otherwise.
    fn simulate_fill(
        &self,
        market_id: &MarketId,
        token_id: &TokenId,
        side: Side,
        price: Decimal,
        size: Decimal,
    ) -> (Decimal, bool) {
        let Some(book) = self.books.get(market_id, token_id) else {
            return (Decimal::ZERO, false);
        };
        let (best, top_size) = match side {
            Side::Buy => (book.best_ask(), book.asks.first().map(|l| l.size)),
            Side::Sell => (book.best_bid(), book.bids.first().map(|l| l.size)),
        };
        let Some(best) = best else {
            return (Decimal::ZERO, false);
        };
        let marketable = match side {
            Side::Buy => price >= best,
            Side::Sell => price <= best,
        };
        if !marketable {
            return (Decimal::ZERO, false);
        }
        let top_size = top_size.unwrap_or(Decimal::ZERO);
        let fill = if top_size > Decimal::ZERO {
            size.min(top_size)
        } else {
            size
        };
        (fill, fill < size)
    }
}

fn from_epoch(ts: f64) -> DateTime<Utc> {
    let micros = (ts * 1e6) as i64;
    Utc.timestamp_micros(micros).single().unwrap_or_else(Utc::now)
}

fn decimal_field(event: &ReplayEvent, key: &str) -> Decimal {
    match event.payload.get(key) {
        Some(serde_json::Value::String(s)) => s.parse().unwrap_or(Decimal::ZERO),
        Some(serde_json::Value::Number(n)) => n.to_string().parse().unwrap_or(Decimal::ZERO),
        _ => Decimal::ZERO,
    }
}

fn str_field(event: &ReplayEvent, key: &str) -> Option<String> {
    event
        .payload
        .get(key)
        .and_then(|v| v.as_str())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::book::BookLevel;
    use crate::core::db::{create_pool, run_migrations};
    use crate::core::market::MarketMeta;
    use crate::core::ratelimit::BucketConfig;
    use rust_decimal_macros::dec;

    fn backtester() -> (Backtester, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bt.db");
        let pool = create_pool(path.to_str().unwrap()).unwrap();
        run_migrations(&pool).unwrap();

        let registry = MarketRegistry::new(
            vec![MarketMeta {
                market_id: MarketId::from("m1"),
                yes_token_id: TokenId::from("yes"),
                no_token_id: TokenId::from("no"),
                tick_size: dec!(0.01),
                min_order_size: dec!(0.1),
                fee_rate: dec!(0),
                is_binary_yes_no: true,
                validation_error: None,
            }],
            false,
        );
        let bucket = BucketConfig { tokens: 1000, window_sec: 1 };
        let bt = Backtester::new(
            pool,
            registry,
            RiskConfig::default(),
            OrderConfig::default(),
            RateLimitConfig {
                global: bucket,
                post_burst: bucket,
                post_sustained: bucket,
                delete_burst: bucket,
                delete_sustained: bucket,
                adaptive_backoff_base_ms: 1,
                adaptive_backoff_max_ms: 2,
            },
            StrategyParams::default(),
            dec!(0),
            dec!(1000),
            false,
        );
        (bt, dir)
    }

    fn fill(side: Side, price: Decimal, size: Decimal) -> FillRecord {
        FillRecord::new(
            MarketId::from("m1"),
            TokenId::from("yes"),
            side,
            price,
            size,
            Utc::now(),
        )
    }

    #[test]
    fn round_trip_increases_cash_and_equity() {
        let (mut bt, _dir) = backtester();
        bt.books_mut()
            .upsert(
                MarketId::from("m1"),
                TokenId::from("yes"),
                vec![BookLevel::new(dec!(0.7), dec!(10))],
                vec![BookLevel::new(dec!(0.8), dec!(10))],
                Utc::now(),
                None,
                true,
                false,
            )
            .unwrap();

        bt.apply_fill(&fill(Side::Buy, dec!(0.5), dec!(1)));
        bt.apply_fill(&fill(Side::Sell, dec!(0.6), dec!(1)));
        bt.mark_to_market();

        assert!(bt.risk().cash() > dec!(1000));
        assert!(bt.risk().equity() >= bt.risk().cash());
    }

    #[test]
    fn mark_to_market_changes_unrealized_not_cash() {
        let (mut bt, _dir) = backtester();
        bt.apply_fill(&fill(Side::Buy, dec!(0.5), dec!(1)));
        let cash_before = bt.risk().cash();

        bt.books_mut()
            .upsert(
                MarketId::from("m1"),
                TokenId::from("yes"),
                vec![BookLevel::new(dec!(0.7), dec!(10))],
                vec![BookLevel::new(dec!(0.8), dec!(10))],
                Utc::now(),
                None,
                true,
                false,
            )
            .unwrap();
        bt.mark_to_market();

        assert_eq!(bt.risk().cash(), cash_before);
        assert!(bt.risk().unrealized_pnl() > Decimal::ZERO);
    }

    #[tokio::test]
    async fn replay_of_arbitrage_book_produces_orders() {
        let (bt, dir) = backtester();
        let pool = {
            // Insert two book updates that open a YES+NO arbitrage.
            use crate::core::db::model::NewEventRow;
            use crate::core::db::schema::events;
            use diesel::prelude::*;
            let path = dir.path().join("bt.db");
            let pool = create_pool(path.to_str().unwrap()).unwrap();
            let mut conn = pool.get().unwrap();
            for (i, (token, ask)) in [("yes", "0.45"), ("no", "0.45")].iter().enumerate() {
                let payload = serde_json::json!({
                    "event": "book",
                    "bids": [{"price": "0.30", "size": "50"}],
                    "asks": [{"price": ask, "size": "50"}],
                });
                diesel::insert_into(events::table)
                    .values(&NewEventRow {
                        ts: 1000.0 + i as f64,
                        event_type: "OrderBookUpdate".into(),
                        market_id: Some("m1".into()),
                        token_id: Some((*token).into()),
                        correlation_id: None,
                        payload_json: payload.to_string(),
                    })
                    .execute(&mut conn)
                    .unwrap();
            }
            pool
        };
        drop(pool);

        let report = bt.run().await.unwrap();
        assert_eq!(report.events_replayed, 2);
        // Both legs go out once both books exist.
        assert_eq!(report.sent, 2);
        assert_eq!(report.fills, 2);
        assert!(report.orders_total >= 2);
    }
}
