//! Engine orchestrator.
//!
//! One task owns the order state machine, the risk engine, the metrics, and
//! the strategy; it multiplexes the fused event queue, the command bus, and
//! the TTL/health/snapshot timers through a single `select!` loop. That one
//! task is the single writer: websocket clients and the persistence writer
//! run as separate tasks but never touch engine state directly.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::app::config::Config;
use crate::app::control::{run_stdin_api, CommandBus};
use crate::core::backtest::Backtester;
use crate::core::book::{BookStore, SharedBookStore};
use crate::core::db::{create_pool, run_migrations, DbPool};
use crate::core::domain::{
    Command, EngineState, EventKind, FillRecord, Intent, IntentKind, MarketId, NormalizedEvent,
    Side, TimeInForce,
};
use crate::core::exchange::{
    DryRunExecution, ExecutionClient, MarketWsClient, MarketWsCommand, RestExecution,
    SnapshotFetcher, UserAuth, UserSubscribe, UserWsClient, UserWsWatchdog,
};
use crate::core::market::{MarketRules, SharedRegistry};
use crate::core::metrics::{Metrics, PickedOffDetector};
use crate::core::normalize::Normalizer;
use crate::core::order::OrderManager;
use crate::core::ratelimit::RateLimiter;
use crate::core::risk::RiskManager;
use crate::core::slippage::SlippageMonitor;
use crate::core::store::{Persistence, PersistenceWriter};
use crate::core::strategy::{Strategy, StrategyParams};
use crate::error::Result;

const TTL_TICK: Duration = Duration::from_millis(250);
const HEALTH_TICK: Duration = Duration::from_secs(1);
const SNAPSHOT_TICK: Duration = Duration::from_secs(5);
/// Markets included in each periodic book snapshot.
const BOOK_SNAPSHOT_MARKETS: usize = 50;
/// Levels per side in each periodic book snapshot.
const BOOK_SNAPSHOT_DEPTH: usize = 5;

/// Run the live engine until a stop command arrives.
pub async fn run(cfg: Config, config_path: PathBuf) -> Result<()> {
    let env = cfg.venue_env();

    let pool = open_database(&cfg)?;
    let (persistence, writer) = Persistence::new(&cfg.persistence, pool.clone());
    let writer_task = tokio::spawn(writer.run());

    // Registry: static config first, then a best-effort metadata refresh.
    let mut registry = cfg.build_registry();
    let http = reqwest::Client::new();
    let market_ids: Vec<MarketId> = cfg
        .markets
        .enabled
        .iter()
        .map(|id| MarketId::from(id.as_str()))
        .collect();
    registry
        .refresh_from_gamma(&http, &cfg.gamma.gamma_api_url, &market_ids)
        .await;
    let registry: SharedRegistry = Arc::new(parking_lot::RwLock::new(registry));

    let rules = MarketRules::new(registry.clone(), cfg.thresholds.default_fee_rate);
    let normalizer = Normalizer::new(rules.clone());
    let books: SharedBookStore = Arc::new(parking_lot::RwLock::new(BookStore::new()));

    let execution: Arc<dyn ExecutionClient> = if cfg.runtime.dry_run || !env.has_credentials() {
        info!("Execution in dry-run mode");
        Arc::new(DryRunExecution)
    } else {
        info!("Execution via venue REST surface");
        Arc::new(RestExecution::new(env.rest_url.clone()))
    };

    let order_manager = OrderManager::new(
        cfg.order.clone(),
        execution,
        RateLimiter::new(cfg.rate_limits.to_config()),
        normalizer.clone(),
    );
    let mut risk = RiskManager::new(cfg.risk.clone());
    risk.set_initial_state(if cfg.runtime.start_paused {
        EngineState::Paused
    } else {
        EngineState::Running
    });
    let strategy = Strategy::new(
        StrategyParams {
            min_edge_threshold: cfg.thresholds.min_edge_threshold,
            failure_buffer: cfg.thresholds.failure_buffer,
            max_slippage_bps: cfg.thresholds.max_slippage_bps,
            ttl_ms: cfg.order.default_ttl_ms,
        },
        rules.clone(),
    );
    let slippage = SlippageMonitor::new(
        cfg.safety.slippage_multiplier,
        cfg.safety.slippage_window_size,
        cfg.thresholds.failure_buffer,
    );

    let (event_tx, event_rx) = mpsc::channel(cfg.runtime.event_queue_maxsize);
    let (ws_control_tx, ws_control_rx) = mpsc::channel(8);
    let (stop_tx, stop_rx) = watch::channel(false);
    let (command_bus, command_rx) = CommandBus::channel(64);

    let watchdog = Arc::new(UserWsWatchdog::new(cfg.safety.user_ws_timeout_sec));

    let market_ws = MarketWsClient::new(
        env.ws_url.clone(),
        market_ids.clone(),
        registry.clone(),
        normalizer.clone(),
        event_tx.clone(),
        books.clone(),
        SnapshotFetcher::new(env.rest_url.clone(), cfg.snapshot.max_level_size),
        cfg.snapshot.require_nonempty_active_book,
        ws_control_rx,
        stop_rx.clone(),
    );
    let user_ws = UserWsClient::new(
        env.ws_url.clone(),
        UserSubscribe::new(UserAuth {
            apikey: env.api_key.clone(),
            secret: env.api_secret.clone(),
            passphrase: env.api_passphrase.clone(),
        }),
        normalizer.clone(),
        event_tx.clone(),
        watchdog.clone(),
        stop_rx.clone(),
    );
    let market_ws_task = tokio::spawn(market_ws.run());
    let user_ws_task = tokio::spawn(user_ws.run());
    if cfg.control.enable_cli {
        tokio::spawn(run_stdin_api(command_bus.clone()));
    }
    tokio::spawn({
        let bus = command_bus.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                bus.publish(Command::Stop).await;
            }
        }
    });

    let picked_off = PickedOffDetector::new(cfg.risk.adverse_move_bps);
    let mut engine = TradingEngine {
        cfg,
        config_path,
        registry,
        books,
        order_manager,
        risk,
        strategy,
        metrics: Metrics::new(),
        picked_off,
        slippage,
        persistence: persistence.clone(),
        pool,
        event_tx,
        event_rx,
        command_rx,
        ws_control: ws_control_tx,
        watchdog,
        stop_tx,
        enabled_markets: market_ids.iter().cloned().collect(),
    };
    engine.validate_registry().await;

    info!(markets = engine.enabled_markets.len(), "Engine started");
    engine.run_loops().await;

    // Shutdown: stop WS tasks, then give the writer a bounded flush.
    let flush_timeout = engine.cfg.persistence.flush_timeout_sec;
    persistence.flush_with_timeout(flush_timeout).await;
    drop(engine);
    let _ = market_ws_task.await;
    let _ = user_ws_task.await;
    drop(persistence);
    let _ = writer_task.await;
    info!("Engine stopped");
    Ok(())
}

fn open_database(cfg: &Config) -> Result<DbPool> {
    if let Some(parent) = std::path::Path::new(&cfg.persistence.db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let pool = create_pool(&cfg.persistence.db_path)?;
    run_migrations(&pool)?;
    Ok(pool)
}

/// The single-writer engine task.
struct TradingEngine {
    cfg: Config,
    config_path: PathBuf,
    registry: SharedRegistry,
    books: SharedBookStore,
    order_manager: OrderManager,
    risk: RiskManager,
    strategy: Strategy,
    metrics: Metrics,
    picked_off: PickedOffDetector,
    slippage: SlippageMonitor,
    persistence: Persistence,
    pool: DbPool,
    event_tx: mpsc::Sender<NormalizedEvent>,
    event_rx: mpsc::Receiver<NormalizedEvent>,
    command_rx: mpsc::Receiver<Command>,
    ws_control: mpsc::Sender<MarketWsCommand>,
    watchdog: Arc<UserWsWatchdog>,
    stop_tx: watch::Sender<bool>,
    enabled_markets: HashSet<MarketId>,
}

impl TradingEngine {
    async fn run_loops(&mut self) {
        let mut ttl = interval(TTL_TICK);
        let mut health = interval(HEALTH_TICK);
        let mut snapshot = interval(SNAPSHOT_TICK);
        for ticker in [&mut ttl, &mut health, &mut snapshot] {
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }

        loop {
            tokio::select! {
                Some(event) = self.event_rx.recv() => self.handle_event(event).await,
                Some(command) = self.command_rx.recv() => {
                    if self.handle_command(command).await {
                        let _ = self.stop_tx.send(true);
                        return;
                    }
                }
                _ = ttl.tick() => self.ttl_tick().await,
                _ = health.tick() => self.health_tick().await,
                _ = snapshot.tick() => self.snapshot_tick().await,
            }
        }
    }

    async fn handle_event(&mut self, event: NormalizedEvent) {
        let recv_ts = event.recv_ts;
        self.persistence.record_event(&event).await;

        if !event.market_id.as_str().is_empty() && !self.enabled_markets.contains(&event.market_id)
        {
            return;
        }

        match event.kind {
            EventKind::WsHealth => self.risk.on_ws_health(recv_ts),
            EventKind::OrderAck => {
                if let Some(client_order_id) = event.payload_str("client_order_id") {
                    if let Some(order) = self.order_manager.get(&client_order_id) {
                        let ms = (Utc::now() - order.created_ts).num_milliseconds() as f64;
                        self.metrics.observe_latency("send_to_ack", ms);
                    }
                    self.order_manager
                        .on_ack(&client_order_id, event.payload_str("order_id"));
                }
            }
            EventKind::Reject => {
                if let Some(client_order_id) = event.payload_str("client_order_id") {
                    self.order_manager.on_reject(&client_order_id);
                    self.slippage.clear_expected(&client_order_id);
                }
                self.risk.on_reject(recv_ts);
                self.metrics.inc("reject");
            }
            EventKind::Cancel => {
                if let Some(client_order_id) = event.payload_str("client_order_id") {
                    self.order_manager.on_cancel(&client_order_id);
                    self.slippage.clear_expected(&client_order_id);
                }
                self.metrics.inc("cancel");
            }
            EventKind::Fill => self.handle_fill(&event).await,
            EventKind::OrderBookUpdate => {
                let market_id = event.market_id.clone();
                self.run_decision_cycle(&market_id, recv_ts).await;
            }
        }
    }

    async fn handle_fill(&mut self, event: &NormalizedEvent) {
        let side = event
            .payload_str("side")
            .and_then(|s| Side::parse(&s))
            .unwrap_or(Side::Buy);
        let fill = FillRecord {
            market_id: event.market_id.clone(),
            token_id: event.token_id.clone().unwrap_or_else(|| "".into()),
            side,
            price: event.payload_decimal("price").unwrap_or(Decimal::ZERO),
            size: event.payload_decimal("size").unwrap_or(Decimal::ZERO),
            ts: event.recv_ts,
            fee: event.payload_decimal("fee").unwrap_or(Decimal::ZERO),
            order_id: event.payload_str("order_id"),
            client_order_id: event.payload_str("client_order_id"),
        };

        if let Some(client_order_id) = &fill.client_order_id {
            self.order_manager.on_fill(client_order_id, fill.size);
            self.slippage.record_fill(client_order_id, fill.price);
            if let Some(order) = self.order_manager.get(client_order_id) {
                if let (Some(ack_ts), Some(first_fill_ts)) = (order.ack_ts, order.first_fill_ts) {
                    let ms = (first_fill_ts - ack_ts).num_milliseconds() as f64;
                    self.metrics.observe_latency("ack_to_fill", ms);
                }
            }
        }
        self.risk.on_fill(&fill);
        self.metrics.inc("fill");
        self.handle_picked_off(&fill);
        self.persistence.record_fill(&fill).await;
    }

    /// Compare the fill against the closest post-fill book snapshot; an
    /// adverse move past the threshold counts as a picked-off event.
    fn handle_picked_off(&mut self, fill: &FillRecord) {
        let freshness = self.cfg.risk.picked_off_freshness_ms;
        let post_fill_best = {
            let books = self.books.read();
            books
                .closest_snapshot(&fill.market_id, &fill.token_id, fill.ts, freshness)
                .and_then(|snap| match fill.side {
                    Side::Buy => snap.best_bid(),
                    Side::Sell => snap.best_ask(),
                })
        };
        let Some(post_fill_best) = post_fill_best else {
            return;
        };
        if self.picked_off.is_picked_off(fill.price, post_fill_best, fill.side) {
            warn!(market_id = %fill.market_id, price = %fill.price, "Picked-off fill");
            self.risk.on_picked_off(fill.ts);
            self.metrics.inc("picked_off");
        }
    }

    async fn run_decision_cycle(&mut self, market_id: &MarketId, recv_ts: DateTime<Utc>) {
        if self.risk.state() == EngineState::Flattening {
            return;
        }

        let meta = self.registry.read().get_binary(market_id).cloned();
        let Some(meta) = meta else {
            self.enabled_markets.remove(market_id);
            error!(market_id = %market_id, "Market disabled: no binary mapping");
            self.persistence
                .record_error(
                    "market_registry",
                    "invalid_mapping",
                    "market disabled in decision cycle",
                    serde_json::json!({"market_id": market_id.as_str()}),
                )
                .await;
            return;
        };

        let (book_yes, book_no) = {
            let books = self.books.read();
            (
                books.get(market_id, &meta.yes_token_id).cloned(),
                books.get(market_id, &meta.no_token_id).cloned(),
            )
        };
        let adaptive_buffer = self.slippage.adaptive_buffer(market_id);
        let intents = self.strategy.compute_intents(
            book_yes.as_ref(),
            book_no.as_ref(),
            market_id,
            &meta.yes_token_id,
            &meta.no_token_id,
            adaptive_buffer,
        );

        let decision_ts = Utc::now();
        let decision_ms = (decision_ts - recv_ts).num_milliseconds() as f64;
        self.metrics.observe_latency("ws_recv_to_decision", decision_ms);
        self.risk.on_latency(decision_ms);

        for intent in intents {
            self.persistence.record_intent(&intent, decision_ts).await;
            if intent.is_noop() {
                continue;
            }

            let (can_place, _reason) = self.risk.can_place(&intent, Utc::now());
            if !can_place && matches!(intent.kind, IntentKind::Place { .. }) {
                self.metrics.inc("risk_block");
                continue;
            }

            let send_ts = Utc::now();
            let decision = self.order_manager.process_intent(&intent, false).await;
            let send_ms = (Utc::now() - send_ts).num_milliseconds() as f64;
            self.metrics.observe_latency("decision_to_send", send_ms);
            if decision.accepted {
                self.metrics.inc("sent");
            } else {
                self.metrics.inc("dropped");
            }

            if let Some(client_order_id) = &decision.client_order_id {
                if decision.accepted {
                    if let IntentKind::Place { price, .. } = &intent.kind {
                        self.slippage.record_expected(
                            client_order_id.clone(),
                            intent.market_id.clone(),
                            *price,
                        );
                    }
                }
                if let Some(order) = self.order_manager.get(client_order_id) {
                    let order = order.clone();
                    self.persistence.upsert_order(&order).await;
                }
            }
        }

        let open = self.order_manager.live_open_orders_count(Some(market_id));
        self.risk.set_open_orders(market_id.clone(), open);
    }

    async fn ttl_tick(&mut self) {
        let canceled = self.order_manager.auto_cancel_expired(false).await;
        if !canceled.is_empty() {
            self.metrics.inc_by("ttl_cancel", canceled.len() as u64);
        }
    }

    async fn health_tick(&mut self) {
        let now = Utc::now();

        let queue_depth = self.event_tx.max_capacity() - self.event_tx.capacity();
        if queue_depth > self.cfg.runtime.event_queue_high_watermark {
            error!(depth = queue_depth, "Event queue high watermark; pausing and resyncing");
            self.risk.transition(EngineState::Paused);
            self.shed_load();
            if self.ws_control.send(MarketWsCommand::ResyncAll).await.is_err() {
                warn!("Market WS control channel closed");
            }
        }

        if self.persistence.over_high_watermark() {
            error!("Persistence queue high watermark; pausing and flushing");
            self.risk.transition(EngineState::Paused);
            self.persistence
                .flush_with_timeout(self.cfg.persistence.flush_timeout_sec)
                .await;
        }

        if self.watchdog.is_timed_out(now) && self.risk.state() == EngineState::Running {
            error!("User WS watchdog timeout; flattening");
            self.persistence
                .record_error("user_ws", "watchdog_timeout", "user stream silent", serde_json::Value::Null)
                .await;
            self.flatten_to_safe().await;
            return;
        }

        let (trip, reason) = self.risk.evaluate_circuit_breakers(now);
        if trip && self.risk.state() == EngineState::Running {
            error!(reason, "Kill switch triggered");
            self.persistence
                .record_error("risk", "kill_switch", reason, serde_json::Value::Null)
                .await;
            self.flatten_to_safe().await;
        }
    }

    /// Drop queued book updates down to half the watermark; order-lifecycle
    /// events are retained.
    fn shed_load(&mut self) {
        let target = self.cfg.runtime.event_queue_high_watermark / 2;
        let mut kept = Vec::new();
        let mut dropped = 0usize;
        while self.event_tx.max_capacity() - self.event_tx.capacity() > target {
            match self.event_rx.try_recv() {
                Ok(event) if event.kind.is_order_event() => kept.push(event),
                Ok(_) => dropped += 1,
                Err(_) => break,
            }
        }
        for event in kept {
            if self.event_tx.try_send(event).is_err() {
                warn!("Event queue full while requeueing order events");
                break;
            }
        }
        if dropped > 0 {
            warn!(dropped, "Shed book updates under backpressure");
        }
    }

    async fn snapshot_tick(&mut self) {
        let now = Utc::now();
        {
            let books = self.books.read();
            self.risk.mark_to_market(&books);
        }
        let snap = self.risk.snapshot(now);
        self.persistence
            .record_pnl_snapshot(now, snap.equity, snap.drawdown, snap.daily_pnl, snap.hourly_pnl)
            .await;

        for (key, summary) in self.metrics.latency_summary() {
            self.persistence.record_latency_metric(now, key, summary).await;
        }

        let positions: Vec<_> = self.risk.positions().values().cloned().collect();
        for position in positions {
            self.persistence.upsert_position(&position, now).await;
        }

        let snapshots: Vec<_> = {
            let books = self.books.read();
            books
                .iter()
                .take(BOOK_SNAPSHOT_MARKETS)
                .map(|((market_id, token_id), book)| {
                    (
                        market_id.to_string(),
                        token_id.to_string(),
                        book.bids.iter().take(BOOK_SNAPSHOT_DEPTH).copied().collect::<Vec<_>>(),
                        book.asks.iter().take(BOOK_SNAPSHOT_DEPTH).copied().collect::<Vec<_>>(),
                    )
                })
                .collect()
        };
        for (market_id, token_id, bids, asks) in snapshots {
            self.persistence
                .record_book_snapshot(now, &market_id, &token_id, &bids, &asks)
                .await;
        }
    }

    /// FLATTENING -> flatten -> SAFE.
    async fn flatten_to_safe(&mut self) {
        self.risk.transition(EngineState::Flattening);
        self.flatten_all().await;
        self.risk.transition(EngineState::Safe);
    }

    /// Cancel every live order; in `cancel_and_unwind` mode also emit
    /// taker orders against the opposite side to close positions.
    async fn flatten_all(&mut self) {
        let live: Vec<(MarketId, crate::core::domain::TokenId, String)> = self
            .order_manager
            .orders()
            .filter(|o| o.status.is_reapable())
            .map(|o| (o.market_id.clone(), o.token_id.clone(), o.client_order_id.clone()))
            .collect();
        for (market_id, token_id, client_order_id) in live {
            let intent = Intent::cancel(market_id, token_id, client_order_id, "flatten");
            let decision = self.order_manager.process_intent(&intent, true).await;
            if !decision.accepted {
                warn!(reason = %decision.reason, "Flatten cancel rejected");
            }
        }

        if self.cfg.trading_safety.flatten_mode == "cancel_and_unwind" {
            self.unwind_positions().await;
        }
    }

    async fn unwind_positions(&mut self) {
        let positions: Vec<_> = self.risk.positions().values().cloned().collect();
        for pos in positions {
            if pos.qty.abs() <= dec!(0.000000001) {
                continue;
            }
            let plan = {
                let books = self.books.read();
                let Some(book) = books.get(&pos.market_id, &pos.token_id) else {
                    continue;
                };
                if pos.qty > Decimal::ZERO {
                    (book.best_bid(), Side::Sell, book.best_ask().or(book.best_bid()))
                } else {
                    (book.best_ask(), Side::Buy, book.best_bid().or(book.best_ask()))
                }
            };
            let (Some(price), side, Some(slip_ref)) = plan else {
                continue;
            };
            if slip_ref <= Decimal::ZERO {
                continue;
            }
            let slippage_bps = (price - slip_ref).abs() / slip_ref * dec!(10000);
            if slippage_bps > self.cfg.thresholds.max_slippage_bps {
                warn!(
                    market_id = %pos.market_id,
                    bps = %slippage_bps,
                    "Unwind skipped: slippage guard"
                );
                continue;
            }
            let intent = Intent::place(
                pos.market_id.clone(),
                pos.token_id.clone(),
                side,
                price,
                pos.qty.abs(),
                Some(self.cfg.order.default_ttl_ms),
                TimeInForce::Taker,
                format!("flatten:{}", pos.key()),
            );
            let decision = self.order_manager.process_intent(&intent, true).await;
            if !decision.accepted {
                warn!(reason = %decision.reason, "Unwind place rejected");
            }
        }
    }

    /// Returns true when the engine should stop.
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Pause => {
                self.risk.transition(EngineState::Paused);
                self.persistence
                    .flush_with_timeout(self.cfg.persistence.flush_timeout_sec)
                    .await;
                warn!("Trading paused");
            }
            Command::Resume => {
                if self.risk.state() != EngineState::Safe {
                    self.risk.transition(EngineState::Running);
                    warn!("Trading resumed");
                }
            }
            Command::Flatten => self.flatten_to_safe().await,
            Command::MarketsOn(ids) => {
                self.enabled_markets.extend(ids);
                self.validate_registry().await;
            }
            Command::MarketsOff(ids) => {
                for id in &ids {
                    self.enabled_markets.remove(id);
                }
            }
            Command::SetParams(params) => self.apply_params(&params),
            Command::ReloadConfig => match Config::load(&self.config_path) {
                Ok(cfg) => {
                    self.cfg = cfg;
                    info!("Config reloaded");
                }
                Err(e) => error!(error = %e, "Config reload failed"),
            },
            Command::Backtest => {
                let backtester = Backtester::from_config(&self.cfg, self.pool.clone());
                match backtester.run().await {
                    Ok(report) => info!(report = %report, "Backtest finished"),
                    Err(e) => error!(error = %e, "Backtest failed"),
                }
            }
            Command::Stop => return true,
        }
        false
    }

    fn apply_params(&mut self, params: &std::collections::HashMap<String, String>) {
        if let Some(value) = params.get("min_edge_threshold").and_then(|v| v.parse().ok()) {
            self.strategy.params_mut().min_edge_threshold = value;
        }
        if let Some(value) = params.get("failure_buffer").and_then(|v| v.parse().ok()) {
            self.strategy.params_mut().failure_buffer = value;
        }
        if let Some(value) = params.get("default_ttl_ms").and_then(|v| v.parse().ok()) {
            self.strategy.params_mut().ttl_ms = value;
        }
        info!("Params updated");
    }

    /// Drop markets whose registry entry is missing or failed yes/no
    /// validation, persisting the diagnostic.
    async fn validate_registry(&mut self) {
        let verdicts: Vec<(MarketId, Option<String>)> = {
            let registry = self.registry.read();
            self.enabled_markets
                .iter()
                .map(|market_id| match registry.get(market_id) {
                    None => (market_id.clone(), Some("missing yes/no token mapping".to_string())),
                    Some(meta) if !meta.is_binary_yes_no => (
                        market_id.clone(),
                        Some(
                            meta.validation_error
                                .clone()
                                .unwrap_or_else(|| "invalid market mapping".into()),
                        ),
                    ),
                    Some(_) => (market_id.clone(), None),
                })
                .collect()
        };
        for (market_id, problem) in verdicts {
            let Some(problem) = problem else { continue };
            self.enabled_markets.remove(&market_id);
            error!(market_id = %market_id, error = %problem, "Market disabled");
            self.persistence
                .record_error(
                    "market_registry",
                    "invalid_mapping",
                    &problem,
                    serde_json::json!({"market_id": market_id.as_str()}),
                )
                .await;
        }
    }
}
