//! Order intents and managed orders.
//!
//! [`Intent`] is what the strategy emits; [`ManagedOrder`] is what the order
//! state machine owns. Nothing outside the order state machine mutates a
//! `ManagedOrder`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{MarketId, TokenId};

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }

    /// Signed direction: +1 for buy, -1 for sell.
    #[must_use]
    pub fn sign(self) -> Decimal {
        match self {
            Self::Buy => Decimal::ONE,
            Self::Sell => -Decimal::ONE,
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "buy" => Some(Self::Buy),
            "sell" => Some(Self::Sell),
            _ => None,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maker/taker tag carried on place intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeInForce {
    Maker,
    Taker,
}

impl TimeInForce {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Maker => "maker",
            Self::Taker => "taker",
        }
    }
}

/// Order lifecycle states.
///
/// Terminal states are absorbing; the state machine ignores transitions out
/// of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    New,
    Sent,
    Acked,
    Partial,
    Filled,
    Closed,
    CancelSent,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Sent => "SENT",
            Self::Acked => "ACKED",
            Self::Partial => "PARTIAL",
            Self::Filled => "FILLED",
            Self::Closed => "CLOSED",
            Self::CancelSent => "CANCEL_SENT",
            Self::Canceled => "CANCELED",
            Self::Rejected => "REJECTED",
            Self::Expired => "EXPIRED",
        }
    }

    /// Terminal states never transition again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Closed | Self::Canceled | Self::Rejected | Self::Expired
        )
    }

    /// Live states count against open-order limits and are eligible for
    /// cancellation.
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Sent | Self::Acked | Self::Partial | Self::CancelSent)
    }

    /// States the TTL reaper watches. `CANCEL_SENT` is excluded: a cancel is
    /// already in flight.
    #[must_use]
    pub const fn is_reapable(self) -> bool {
        matches!(self, Self::Sent | Self::Acked | Self::Partial)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an intent asks the order state machine to do.
#[derive(Debug, Clone, PartialEq)]
pub enum IntentKind {
    Place {
        side: Side,
        price: Decimal,
        size: Decimal,
        ttl_ms: Option<i64>,
        tif: TimeInForce,
    },
    Cancel {
        /// Client or venue order id.
        order_ref: String,
    },
    Noop,
}

impl IntentKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Place { .. } => "place",
            Self::Cancel { .. } => "cancel",
            Self::Noop => "noop",
        }
    }
}

/// A strategy decision addressed to one (market, token).
#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub market_id: MarketId,
    pub token_id: TokenId,
    pub kind: IntentKind,
    /// Human-readable provenance, persisted with the intent.
    pub reason: String,
}

impl Intent {
    pub fn place(
        market_id: MarketId,
        token_id: TokenId,
        side: Side,
        price: Decimal,
        size: Decimal,
        ttl_ms: Option<i64>,
        tif: TimeInForce,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            market_id,
            token_id,
            kind: IntentKind::Place {
                side,
                price,
                size,
                ttl_ms,
                tif,
            },
            reason: reason.into(),
        }
    }

    pub fn cancel(
        market_id: MarketId,
        token_id: TokenId,
        order_ref: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            market_id,
            token_id,
            kind: IntentKind::Cancel {
                order_ref: order_ref.into(),
            },
            reason: reason.into(),
        }
    }

    pub fn noop(market_id: MarketId, token_id: TokenId, reason: impl Into<String>) -> Self {
        Self {
            market_id,
            token_id,
            kind: IntentKind::Noop,
            reason: reason.into(),
        }
    }

    #[must_use]
    pub const fn is_noop(&self) -> bool {
        matches!(self.kind, IntentKind::Noop)
    }

    /// JSON payload persisted into `order_intents`.
    #[must_use]
    pub fn to_payload(&self) -> serde_json::Value {
        let mut payload = serde_json::json!({
            "intent_type": self.kind.as_str(),
            "market_id": self.market_id.as_str(),
            "token_id": self.token_id.as_str(),
            "reason": self.reason,
        });
        match &self.kind {
            IntentKind::Place {
                side,
                price,
                size,
                ttl_ms,
                tif,
            } => {
                payload["side"] = serde_json::json!(side.as_str());
                payload["price"] = serde_json::json!(price.to_string());
                payload["size"] = serde_json::json!(size.to_string());
                if let Some(ttl) = ttl_ms {
                    payload["ttl_ms"] = serde_json::json!(ttl);
                }
                payload["tif"] = serde_json::json!(tif.as_str());
            }
            IntentKind::Cancel { order_ref } => {
                payload["order_id"] = serde_json::json!(order_ref);
            }
            IntentKind::Noop => {}
        }
        payload
    }
}

/// An order owned by the order state machine.
#[derive(Debug, Clone)]
pub struct ManagedOrder {
    pub client_order_id: String,
    pub venue_order_id: Option<String>,
    pub market_id: MarketId,
    pub token_id: TokenId,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub remaining_size: Decimal,
    pub status: OrderStatus,
    pub created_ts: DateTime<Utc>,
    pub last_update_ts: DateTime<Utc>,
    pub ttl_ms: i64,
    pub ack_ts: Option<DateTime<Utc>>,
    pub first_fill_ts: Option<DateTime<Utc>>,
}

impl ManagedOrder {
    /// Whether the order has outlived its TTL at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        (now - self.created_ts).num_milliseconds() >= self.ttl_ms
    }
}

/// Outcome of `process_intent`: the user-visible decision surface.
#[derive(Debug, Clone)]
pub struct OrderDecision {
    pub accepted: bool,
    pub reason: String,
    pub client_order_id: Option<String>,
}

impl OrderDecision {
    pub fn accepted(reason: impl Into<String>, client_order_id: impl Into<String>) -> Self {
        Self {
            accepted: true,
            reason: reason.into(),
            client_order_id: Some(client_order_id.into()),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: reason.into(),
            client_order_id: None,
        }
    }

    pub fn rejected_for(reason: impl Into<String>, client_order_id: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: reason.into(),
            client_order_id: Some(client_order_id.into()),
        }
    }
}
