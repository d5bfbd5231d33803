//! Buffered persistence writer.
//!
//! Every durable write is a typed [`WriteOp`] pushed onto a bounded queue;
//! a single consumer drains the queue into one SQLite transaction per
//! flush. Flushes happen on a fixed interval and immediately when the
//! writer's buffer breaches the high watermark. The engine watches the
//! queue depth and pauses trading when the channel itself backs up.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, timeout, Duration};
use tracing::{error, warn};

use diesel::prelude::*;

use crate::core::book::BookLevel;
use crate::core::db::model::{
    NewBookSnapshotRow, NewErrorRow, NewEventRow, NewFillRow, NewIntentRow, NewLatencyMetricRow,
    NewPnlSnapshotRow, OrderRow, PositionRow, ReplayEventRow,
};
use crate::core::db::{schema, DbPool};
use crate::core::domain::{FillRecord, Intent, ManagedOrder, NormalizedEvent, Position};
use crate::core::metrics::LatencySummary;
use crate::error::{Error, Result};

/// Persistence configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    pub db_path: String,
    pub flush_interval_sec: u64,
    pub buffer_maxsize: usize,
    pub buffer_high_watermark: usize,
    pub flush_timeout_sec: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            db_path: "data/bookedge.db".into(),
            flush_interval_sec: 2,
            buffer_maxsize: 100_000,
            buffer_high_watermark: 80_000,
            flush_timeout_sec: 3,
        }
    }
}

/// One durable write.
#[derive(Debug)]
pub enum WriteOp {
    Event(NewEventRow),
    Intent(NewIntentRow),
    OrderUpsert(OrderRow),
    Fill(NewFillRow),
    PositionUpsert(PositionRow),
    PnlSnapshot(NewPnlSnapshotRow),
    LatencyMetric(NewLatencyMetricRow),
    BookSnapshot(NewBookSnapshotRow),
    ErrorRecord(NewErrorRow),
    /// Flush marker: drain everything, commit, then ack.
    Flush(oneshot::Sender<()>),
}

/// Cheap clonable handle used by producers.
#[derive(Clone)]
pub struct Persistence {
    tx: mpsc::Sender<WriteOp>,
    high_watermark: usize,
}

impl Persistence {
    /// Build the handle/writer pair. The writer must be spawned by the
    /// caller.
    #[must_use]
    pub fn new(cfg: &PersistenceConfig, pool: DbPool) -> (Self, PersistenceWriter) {
        let (tx, rx) = mpsc::channel(cfg.buffer_maxsize);
        (
            Self {
                tx,
                high_watermark: cfg.buffer_high_watermark,
            },
            PersistenceWriter {
                rx,
                pool,
                flush_interval: Duration::from_secs(cfg.flush_interval_sec.max(1)),
                high_watermark: cfg.buffer_high_watermark,
                buffer: Vec::new(),
            },
        )
    }

    /// Current queue depth (ops accepted but not yet taken by the writer).
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    #[must_use]
    pub fn over_high_watermark(&self) -> bool {
        self.queue_depth() >= self.high_watermark
    }

    async fn enqueue(&self, op: WriteOp) {
        if self.tx.send(op).await.is_err() {
            warn!("Persistence writer gone; write dropped");
        }
    }

    pub async fn record_event(&self, event: &NormalizedEvent) {
        self.enqueue(WriteOp::Event(NewEventRow {
            ts: epoch(event.recv_ts),
            event_type: event.kind.as_str().to_string(),
            market_id: Some(event.market_id.to_string()).filter(|m| !m.is_empty()),
            token_id: event.token_id.as_ref().map(ToString::to_string),
            correlation_id: event.correlation_id.clone(),
            payload_json: event.payload.to_string(),
        }))
        .await;
    }

    pub async fn record_intent(&self, intent: &Intent, ts: DateTime<Utc>) {
        self.enqueue(WriteOp::Intent(NewIntentRow {
            ts: epoch(ts),
            market_id: intent.market_id.to_string(),
            token_id: intent.token_id.to_string(),
            intent_type: intent.kind.as_str().to_string(),
            payload_json: intent.to_payload().to_string(),
        }))
        .await;
    }

    pub async fn upsert_order(&self, order: &ManagedOrder) {
        self.enqueue(WriteOp::OrderUpsert(OrderRow {
            client_order_id: order.client_order_id.clone(),
            venue_order_id: order.venue_order_id.clone(),
            market_id: order.market_id.to_string(),
            token_id: order.token_id.to_string(),
            side: order.side.as_str().to_string(),
            price: to_f64(order.price),
            size: to_f64(order.size),
            remaining_size: to_f64(order.remaining_size),
            status: order.status.as_str().to_string(),
            created_ts: epoch(order.created_ts),
            last_update_ts: epoch(order.last_update_ts),
            ttl_ms: order.ttl_ms,
        }))
        .await;
    }

    pub async fn record_fill(&self, fill: &FillRecord) {
        self.enqueue(WriteOp::Fill(NewFillRow {
            ts: epoch(fill.ts),
            market_id: fill.market_id.to_string(),
            token_id: fill.token_id.to_string(),
            side: fill.side.as_str().to_string(),
            price: to_f64(fill.price),
            size: to_f64(fill.size),
            order_id: fill.order_id.clone(),
            client_order_id: fill.client_order_id.clone(),
        }))
        .await;
    }

    pub async fn upsert_position(&self, position: &Position, ts: DateTime<Utc>) {
        self.enqueue(WriteOp::PositionUpsert(PositionRow {
            key: position.key(),
            market_id: position.market_id.to_string(),
            token_id: position.token_id.to_string(),
            qty: to_f64(position.qty),
            avg_price: to_f64(position.avg_price),
            updated_ts: epoch(ts),
        }))
        .await;
    }

    pub async fn record_pnl_snapshot(
        &self,
        ts: DateTime<Utc>,
        equity: Decimal,
        drawdown: Decimal,
        daily_pnl: Decimal,
        hourly_pnl: Decimal,
    ) {
        self.enqueue(WriteOp::PnlSnapshot(NewPnlSnapshotRow {
            ts: epoch(ts),
            equity: to_f64(equity),
            drawdown: to_f64(drawdown),
            daily_pnl: to_f64(daily_pnl),
            hourly_pnl: to_f64(hourly_pnl),
        }))
        .await;
    }

    pub async fn record_latency_metric(
        &self,
        ts: DateTime<Utc>,
        metric_key: &str,
        summary: LatencySummary,
    ) {
        self.enqueue(WriteOp::LatencyMetric(NewLatencyMetricRow {
            ts: epoch(ts),
            metric_key: metric_key.to_string(),
            p50: summary.p50,
            p95: summary.p95,
            p99: summary.p99,
            mean: summary.mean,
        }))
        .await;
    }

    pub async fn record_book_snapshot(
        &self,
        ts: DateTime<Utc>,
        market_id: &str,
        token_id: &str,
        bids: &[BookLevel],
        asks: &[BookLevel],
    ) {
        self.enqueue(WriteOp::BookSnapshot(NewBookSnapshotRow {
            ts: epoch(ts),
            market_id: market_id.to_string(),
            token_id: token_id.to_string(),
            bids_json: levels_json(bids),
            asks_json: levels_json(asks),
        }))
        .await;
    }

    pub async fn record_error(
        &self,
        component: &str,
        error_type: &str,
        message: &str,
        payload: Value,
    ) {
        self.enqueue(WriteOp::ErrorRecord(NewErrorRow {
            ts: epoch(Utc::now()),
            component: component.to_string(),
            error_type: error_type.to_string(),
            message: message.to_string(),
            payload_json: payload.to_string(),
        }))
        .await;
    }

    /// Ask the writer to drain and commit everything, waiting at most
    /// `timeout_sec`.
    pub async fn flush_with_timeout(&self, timeout_sec: u64) {
        let (ack_tx, ack_rx) = oneshot::channel();
        let deadline = Duration::from_secs(timeout_sec.max(1));
        let send = timeout(deadline, self.tx.send(WriteOp::Flush(ack_tx))).await;
        match send {
            Ok(Ok(())) => {
                if timeout(deadline, ack_rx).await.is_err() {
                    error!("Persistence flush timeout");
                }
            }
            _ => error!("Persistence flush request failed"),
        }
    }
}

/// The single consumer draining the queue into SQLite.
pub struct PersistenceWriter {
    rx: mpsc::Receiver<WriteOp>,
    pool: DbPool,
    flush_interval: Duration,
    high_watermark: usize,
    buffer: Vec<WriteOp>,
}

impl PersistenceWriter {
    /// Writer loop: buffer ops, flush on the interval tick, on the high
    /// watermark, on explicit flush markers, and finally on shutdown.
    pub async fn run(mut self) {
        let mut ticker = interval(self.flush_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.flush(),
                op = self.rx.recv() => match op {
                    None => {
                        self.flush();
                        return;
                    }
                    Some(WriteOp::Flush(ack)) => {
                        self.drain_pending();
                        self.flush();
                        let _ = ack.send(());
                    }
                    Some(op) => {
                        self.buffer.push(op);
                        if self.buffer.len() >= self.high_watermark {
                            warn!(
                                buffered = self.buffer.len(),
                                "Persistence high watermark; emergency flush"
                            );
                            self.flush();
                        }
                    }
                },
            }
        }
    }

    /// Pull everything already sitting in the channel without awaiting.
    fn drain_pending(&mut self) {
        while let Ok(op) = self.rx.try_recv() {
            match op {
                WriteOp::Flush(ack) => {
                    let _ = ack.send(());
                }
                op => self.buffer.push(op),
            }
        }
    }

    /// Commit the buffer as one transaction. On failure the batch is
    /// dropped after logging; the event stream is the source of truth and
    /// a poisoned batch must not wedge the writer.
    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.buffer);
        let mut conn = match self.pool.get() {
            Ok(conn) => conn,
            Err(e) => {
                error!(error = %e, dropped = batch.len(), "Persistence connection failed");
                return;
            }
        };
        let result = conn.transaction::<_, diesel::result::Error, _>(|conn| {
            for op in &batch {
                execute_op(conn, op)?;
            }
            Ok(())
        });
        if let Err(e) = result {
            error!(error = %e, dropped = batch.len(), "Persistence flush failed");
        }
    }
}

fn execute_op(conn: &mut SqliteConnection, op: &WriteOp) -> QueryResult<()> {
    match op {
        WriteOp::Event(row) => {
            diesel::insert_into(schema::events::table).values(row).execute(conn)?;
        }
        WriteOp::Intent(row) => {
            diesel::insert_into(schema::order_intents::table).values(row).execute(conn)?;
        }
        WriteOp::OrderUpsert(row) => {
            diesel::replace_into(schema::orders::table).values(row).execute(conn)?;
        }
        WriteOp::Fill(row) => {
            diesel::insert_into(schema::fills::table).values(row).execute(conn)?;
        }
        WriteOp::PositionUpsert(row) => {
            diesel::replace_into(schema::positions::table).values(row).execute(conn)?;
        }
        WriteOp::PnlSnapshot(row) => {
            diesel::insert_into(schema::pnl_snapshots::table).values(row).execute(conn)?;
        }
        WriteOp::LatencyMetric(row) => {
            diesel::insert_into(schema::latency_metrics::table).values(row).execute(conn)?;
        }
        WriteOp::BookSnapshot(row) => {
            diesel::insert_into(schema::book_snapshots::table).values(row).execute(conn)?;
        }
        WriteOp::ErrorRecord(row) => {
            diesel::insert_into(schema::errors::table).values(row).execute(conn)?;
        }
        WriteOp::Flush(_) => {}
    }
    Ok(())
}

/// A replayable event loaded back from the log.
#[derive(Debug, Clone)]
pub struct ReplayEvent {
    pub ts: f64,
    pub event_type: String,
    pub market_id: Option<String>,
    pub token_id: Option<String>,
    pub correlation_id: Option<String>,
    pub payload: Value,
}

/// Load events in timestamp order for the backtester.
///
/// # Errors
/// Returns an error on connection or query failure.
pub fn load_events_for_replay(
    pool: &DbPool,
    start_ts: Option<f64>,
    end_ts: Option<f64>,
) -> Result<Vec<ReplayEvent>> {
    use schema::events::dsl;

    let mut conn = pool.get().map_err(|e| Error::Connection(e.to_string()))?;
    let mut query = dsl::events
        .select((
            dsl::ts,
            dsl::event_type,
            dsl::market_id,
            dsl::token_id,
            dsl::correlation_id,
            dsl::payload_json,
        ))
        .order(dsl::ts.asc())
        .into_boxed();
    if let Some(start) = start_ts {
        query = query.filter(dsl::ts.ge(start));
    }
    if let Some(end) = end_ts {
        query = query.filter(dsl::ts.le(end));
    }

    let rows: Vec<ReplayEventRow> = query
        .load(&mut conn)
        .map_err(|e| Error::Database(e.to_string()))?;
    Ok(rows
        .into_iter()
        .map(|row| ReplayEvent {
            ts: row.ts,
            event_type: row.event_type,
            market_id: row.market_id,
            token_id: row.token_id,
            correlation_id: row.correlation_id,
            payload: serde_json::from_str(&row.payload_json).unwrap_or(Value::Null),
        })
        .collect())
}

/// Epoch seconds with sub-second precision, as persisted in `ts` columns.
#[must_use]
pub fn epoch(ts: DateTime<Utc>) -> f64 {
    ts.timestamp_micros() as f64 / 1e6
}

fn to_f64(d: Decimal) -> f64 {
    d.to_f64().unwrap_or(0.0)
}

fn levels_json(levels: &[BookLevel]) -> String {
    let values: Vec<Value> = levels
        .iter()
        .map(|l| serde_json::json!({"price": l.price.to_string(), "size": l.size.to_string()}))
        .collect();
    Value::Array(values).to_string()
}
