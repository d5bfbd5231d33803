//! Frame normalization and order validation.
//!
//! Raw JSON frames from both websocket streams become [`NormalizedEvent`]s
//! here; unknown frames are dropped. The normalizer also owns tick/size
//! validation for outgoing orders.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::core::book::BookLevel;
use crate::core::domain::{EventKind, MarketId, NormalizedEvent, TokenId};
use crate::core::market::MarketRules;

/// Normalizes wire frames into canonical events.
#[derive(Clone)]
pub struct Normalizer {
    rules: MarketRules,
}

impl Normalizer {
    pub fn new(rules: MarketRules) -> Self {
        Self { rules }
    }

    #[must_use]
    pub fn rules(&self) -> &MarketRules {
        &self.rules
    }

    /// Market-stream frame: `book`, `price_change` and `snapshot` all carry
    /// book state; `health` is a liveness beacon.
    #[must_use]
    pub fn from_market_frame(&self, raw: Value, recv_ts: DateTime<Utc>) -> Option<NormalizedEvent> {
        let event = raw.get("event").and_then(Value::as_str)?;
        let kind = match event {
            "book" | "price_change" | "snapshot" => EventKind::OrderBookUpdate,
            "health" => EventKind::WsHealth,
            _ => return None,
        };
        Some(NormalizedEvent {
            kind,
            market_id: MarketId::from(str_field(&raw, "market")),
            token_id: opt_token(&raw, "asset_id"),
            exchange_ts: raw.get("timestamp").and_then(Value::as_i64),
            correlation_id: raw.get("id").and_then(Value::as_str).map(String::from),
            payload: raw,
            recv_ts,
        })
    }

    /// User-stream frame: acknowledgements, fills, cancels, rejects.
    #[must_use]
    pub fn from_user_frame(&self, raw: Value, recv_ts: DateTime<Utc>) -> Option<NormalizedEvent> {
        let event = raw.get("event").and_then(Value::as_str)?.to_lowercase();
        let kind = match event.as_str() {
            "order" => EventKind::OrderAck,
            "fill" => EventKind::Fill,
            "cancel" => EventKind::Cancel,
            "reject" => EventKind::Reject,
            _ => return None,
        };
        let correlation_id = raw
            .get("id")
            .and_then(Value::as_str)
            .or_else(|| raw.get("client_order_id").and_then(Value::as_str))
            .map(String::from);
        Some(NormalizedEvent {
            kind,
            market_id: MarketId::from(str_field(&raw, "market")),
            token_id: opt_token(&raw, "asset_id"),
            exchange_ts: raw.get("timestamp").and_then(Value::as_i64),
            correlation_id,
            payload: raw,
            recv_ts,
        })
    }

    /// Validate that a quantized order is on the market's tick and size
    /// grids and priced inside [0, 1].
    #[must_use]
    pub fn validate_order(
        &self,
        market_id: &MarketId,
        token_id: &TokenId,
        price: Decimal,
        size: Decimal,
    ) -> bool {
        if price < Decimal::ZERO || price > Decimal::ONE {
            return false;
        }
        if size < self.rules.min_order_size(market_id, token_id) {
            return false;
        }
        let (snapped, _) = self.rules.quantize_price(market_id, token_id, price);
        snapped == price
    }
}

/// Parse a level array in either `{price, size}` or `[price, size]` form.
/// Malformed entries are skipped.
#[must_use]
pub fn parse_levels(raw: Option<&Value>) -> Vec<BookLevel> {
    let Some(Value::Array(items)) = raw else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::Object(obj) => Some(BookLevel::new(
                decimal_value(obj.get("price")?)?,
                decimal_value(obj.get("size")?)?,
            )),
            Value::Array(pair) if pair.len() >= 2 => {
                Some(BookLevel::new(decimal_value(&pair[0])?, decimal_value(&pair[1])?))
            }
            _ => None,
        })
        .collect()
}

fn decimal_value(v: &Value) -> Option<Decimal> {
    match v {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.to_string().parse().ok(),
        _ => None,
    }
}

fn str_field(raw: &Value, key: &str) -> String {
    raw.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn opt_token(raw: &Value, key: &str) -> Option<TokenId> {
    raw.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(TokenId::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::market::{MarketMeta, MarketRegistry};
    use parking_lot::RwLock;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::sync::Arc;

    fn normalizer() -> Normalizer {
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
        Normalizer::new(MarketRules::new(
            Arc::new(RwLock::new(registry)),
            dec!(0.002),
        ))
    }

    #[test]
    fn book_frame_becomes_order_book_update() {
        let n = normalizer();
        let ev = n
            .from_market_frame(
                json!({"event": "book", "market": "m1", "asset_id": "yes", "timestamp": 123}),
                Utc::now(),
            )
            .unwrap();
        assert_eq!(ev.kind, EventKind::OrderBookUpdate);
        assert_eq!(ev.market_id.as_str(), "m1");
        assert_eq!(ev.token_id.as_ref().unwrap().as_str(), "yes");
        assert_eq!(ev.exchange_ts, Some(123));
    }

    #[test]
    fn health_frame_becomes_ws_health() {
        let n = normalizer();
        let ev = n
            .from_market_frame(json!({"event": "health", "market": ""}), Utc::now())
            .unwrap();
        assert_eq!(ev.kind, EventKind::WsHealth);
    }

    #[test]
    fn unknown_frames_are_dropped() {
        let n = normalizer();
        assert!(n
            .from_market_frame(json!({"event": "trade", "market": "m1"}), Utc::now())
            .is_none());
        assert!(n.from_user_frame(json!({"market": "m1"}), Utc::now()).is_none());
    }

    #[test]
    fn user_frames_map_to_order_lifecycle_events() {
        let n = normalizer();
        for (event, kind) in [
            ("order", EventKind::OrderAck),
            ("FILL", EventKind::Fill),
            ("cancel", EventKind::Cancel),
            ("reject", EventKind::Reject),
        ] {
            let ev = n
                .from_user_frame(
                    json!({"event": event, "market": "m1", "client_order_id": "c1"}),
                    Utc::now(),
                )
                .unwrap();
            assert_eq!(ev.kind, kind);
            assert_eq!(ev.correlation_id.as_deref(), Some("c1"));
        }
    }

    #[test]
    fn validate_order_enforces_tick_and_min_size() {
        let n = normalizer();
        let m = MarketId::from("m1");
        let t = TokenId::from("yes");
        assert!(n.validate_order(&m, &t, dec!(0.50), dec!(0.1)));
        // Off-grid price.
        assert!(!n.validate_order(&m, &t, dec!(0.505), dec!(0.1)));
        // Below minimum size.
        assert!(!n.validate_order(&m, &t, dec!(0.50), dec!(0.05)));
        // Out of range.
        assert!(!n.validate_order(&m, &t, dec!(1.01), dec!(0.1)));
    }

    #[test]
    fn parse_levels_accepts_both_wire_forms() {
        let levels = parse_levels(Some(&json!([
            {"price": "0.5", "size": "10"},
            ["0.49", 5],
            {"price": "bad"},
        ])));
        assert_eq!(levels.len(), 2);
        assert_eq!(levels[0].price, dec!(0.5));
        assert_eq!(levels[1].size, dec!(5));
    }
}
