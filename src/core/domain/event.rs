//! Canonical events produced by the normalizer.
//!
//! Both websocket streams are fused into a single queue of
//! [`NormalizedEvent`] values; the engine event loop routes on
//! [`EventKind`] alone and never inspects raw frames.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{MarketId, TokenId};

/// Discriminant for normalized events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    OrderBookUpdate,
    OrderAck,
    Fill,
    Cancel,
    Reject,
    WsHealth,
}

impl EventKind {
    /// Stable string form used in the persisted event log.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OrderBookUpdate => "OrderBookUpdate",
            Self::OrderAck => "OrderAck",
            Self::Fill => "Fill",
            Self::Cancel => "Cancel",
            Self::Reject => "Reject",
            Self::WsHealth => "WSHealth",
        }
    }

    /// Parse the persisted string form (used by the replay driver).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OrderBookUpdate" => Some(Self::OrderBookUpdate),
            "OrderAck" => Some(Self::OrderAck),
            "Fill" => Some(Self::Fill),
            "Cancel" => Some(Self::Cancel),
            "Reject" => Some(Self::Reject),
            "WSHealth" => Some(Self::WsHealth),
            _ => None,
        }
    }

    /// Order-lifecycle events survive load shedding; book updates do not.
    #[must_use]
    pub const fn is_order_event(self) -> bool {
        matches!(self, Self::OrderAck | Self::Fill | Self::Cancel | Self::Reject)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A canonical event with the raw payload preserved for persistence.
#[derive(Debug, Clone)]
pub struct NormalizedEvent {
    pub kind: EventKind,
    pub market_id: MarketId,
    pub token_id: Option<TokenId>,
    pub payload: Value,
    pub recv_ts: DateTime<Utc>,
    pub exchange_ts: Option<i64>,
    pub correlation_id: Option<String>,
}

impl NormalizedEvent {
    /// String field from the payload, if present and non-null.
    #[must_use]
    pub fn payload_str(&self, key: &str) -> Option<String> {
        match self.payload.get(key) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Decimal field from the payload; wire frames carry prices and sizes
    /// as either JSON strings or numbers.
    #[must_use]
    pub fn payload_decimal(&self, key: &str) -> Option<rust_decimal::Decimal> {
        match self.payload.get(key) {
            Some(Value::String(s)) => s.parse().ok(),
            Some(Value::Number(n)) => n.to_string().parse().ok(),
            _ => None,
        }
    }
}
