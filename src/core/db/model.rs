//! Database row types for Diesel ORM.

use diesel::prelude::*;

use super::schema::{
    book_snapshots, errors, events, fills, latency_metrics, order_intents, orders, pnl_snapshots,
    positions,
};

/// Insert row for the canonical event log.
#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = events)]
pub struct NewEventRow {
    pub ts: f64,
    pub event_type: String,
    pub market_id: Option<String>,
    pub token_id: Option<String>,
    pub correlation_id: Option<String>,
    pub payload_json: String,
}

/// Event row read back for replay.
#[derive(Queryable, Debug, Clone)]
pub struct ReplayEventRow {
    pub ts: f64,
    pub event_type: String,
    pub market_id: Option<String>,
    pub token_id: Option<String>,
    pub correlation_id: Option<String>,
    pub payload_json: String,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = order_intents)]
pub struct NewIntentRow {
    pub ts: f64,
    pub market_id: String,
    pub token_id: String,
    pub intent_type: String,
    pub payload_json: String,
}

/// Full order row; written with `replace_into` keyed by `client_order_id`.
#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = orders)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct OrderRow {
    pub client_order_id: String,
    pub venue_order_id: Option<String>,
    pub market_id: String,
    pub token_id: String,
    pub side: String,
    pub price: f64,
    pub size: f64,
    pub remaining_size: f64,
    pub status: String,
    pub created_ts: f64,
    pub last_update_ts: f64,
    pub ttl_ms: i64,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = fills)]
pub struct NewFillRow {
    pub ts: f64,
    pub market_id: String,
    pub token_id: String,
    pub side: String,
    pub price: f64,
    pub size: f64,
    pub order_id: Option<String>,
    pub client_order_id: Option<String>,
}

/// Position row; written with `replace_into` keyed by `key`.
#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = positions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PositionRow {
    pub key: String,
    pub market_id: String,
    pub token_id: String,
    pub qty: f64,
    pub avg_price: f64,
    pub updated_ts: f64,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = pnl_snapshots)]
pub struct NewPnlSnapshotRow {
    pub ts: f64,
    pub equity: f64,
    pub drawdown: f64,
    pub daily_pnl: f64,
    pub hourly_pnl: f64,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = latency_metrics)]
pub struct NewLatencyMetricRow {
    pub ts: f64,
    pub metric_key: String,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub mean: f64,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = book_snapshots)]
pub struct NewBookSnapshotRow {
    pub ts: f64,
    pub market_id: String,
    pub token_id: String,
    pub bids_json: String,
    pub asks_json: String,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = errors)]
pub struct NewErrorRow {
    pub ts: f64,
    pub component: String,
    pub error_type: String,
    pub message: String,
    pub payload_json: String,
}
