#![allow(dead_code)]

//! Shared test harness: canned registries, book frames, and a recording
//! execution client.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;

use bookedge::core::domain::{MarketId, TokenId};
use bookedge::core::exchange::{ExecutionClient, ExecutionResponse, PlaceOrderRequest};
use bookedge::core::market::{MarketMeta, MarketRegistry, MarketRules, SharedRegistry};
use bookedge::core::normalize::Normalizer;
use bookedge::core::order::{OrderConfig, OrderManager};
use bookedge::core::ratelimit::{BucketConfig, RateLimitConfig, RateLimiter};

pub const MARKET: &str = "m1";
pub const YES: &str = "tok-yes";
pub const NO: &str = "tok-no";

/// Registry with one binary market: tick 0.01, min size 0.1, zero fee.
pub fn registry() -> SharedRegistry {
    registry_with(dec!(0.01), dec!(0.1), dec!(0))
}

pub fn registry_with(tick: Decimal, min_size: Decimal, fee: Decimal) -> SharedRegistry {
    let registry = MarketRegistry::new(
        vec![MarketMeta {
            market_id: MarketId::from(MARKET),
            yes_token_id: TokenId::from(YES),
            no_token_id: TokenId::from(NO),
            tick_size: tick,
            min_order_size: min_size,
            fee_rate: fee,
            is_binary_yes_no: true,
            validation_error: None,
        }],
        false,
    );
    Arc::new(RwLock::new(registry))
}

pub fn rules(registry: &SharedRegistry) -> MarketRules {
    MarketRules::new(registry.clone(), dec!(0.002))
}

pub fn normalizer(registry: &SharedRegistry) -> Normalizer {
    Normalizer::new(rules(registry))
}

/// A `book` frame as the market stream sends it.
pub fn book_frame(token: &str, bids: &[(&str, &str)], asks: &[(&str, &str)]) -> serde_json::Value {
    let levels = |side: &[(&str, &str)]| {
        side.iter()
            .map(|(p, s)| json!({"price": p, "size": s}))
            .collect::<Vec<_>>()
    };
    json!({
        "event": "book",
        "market": MARKET,
        "asset_id": token,
        "bids": levels(bids),
        "asks": levels(asks),
        "timestamp": Utc::now().timestamp_millis(),
        "market_active": true,
    })
}

/// A user-stream frame (`order`/`fill`/`cancel`/`reject`).
pub fn user_frame(event: &str, client_order_id: &str, extra: serde_json::Value) -> serde_json::Value {
    let mut frame = json!({
        "event": event,
        "market": MARKET,
        "asset_id": YES,
        "client_order_id": client_order_id,
    });
    if let (Some(obj), Some(extra)) = (frame.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            obj.insert(k.clone(), v.clone());
        }
    }
    frame
}

/// Execution client that records every call and can be told to fail.
#[derive(Default)]
pub struct RecordingExecution {
    pub places: Mutex<Vec<PlaceOrderRequest>>,
    pub cancels: Mutex<Vec<String>>,
    pub fail_places: AtomicBool,
    pub fail_cancels: AtomicBool,
}

impl RecordingExecution {
    pub fn fail_places(&self, fail: bool) {
        self.fail_places.store(fail, Ordering::SeqCst);
    }

    pub fn fail_cancels(&self, fail: bool) {
        self.fail_cancels.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ExecutionClient for RecordingExecution {
    async fn place_order(&self, request: PlaceOrderRequest) -> ExecutionResponse {
        let client_order_id = request.client_order_id.clone();
        self.places.lock().push(request);
        if self.fail_places.load(Ordering::SeqCst) {
            ExecutionResponse {
                ok: false,
                status_code: 500,
                order_id: None,
                client_order_id: Some(client_order_id),
                sent_ts: Utc::now(),
                error: Some("scripted failure".into()),
            }
        } else {
            ExecutionResponse {
                ok: true,
                status_code: 200,
                order_id: Some(format!("venue-{client_order_id}")),
                client_order_id: Some(client_order_id),
                sent_ts: Utc::now(),
                error: None,
            }
        }
    }

    async fn cancel_order(&self, order_ref: &str) -> ExecutionResponse {
        self.cancels.lock().push(order_ref.to_string());
        if self.fail_cancels.load(Ordering::SeqCst) {
            ExecutionResponse {
                ok: false,
                status_code: 503,
                order_id: Some(order_ref.to_string()),
                client_order_id: None,
                sent_ts: Utc::now(),
                error: Some("scripted failure".into()),
            }
        } else {
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
}

/// Loose rate limits so tests never sleep on buckets.
pub fn fast_limiter() -> RateLimiter {
    let bucket = BucketConfig { tokens: 10_000, window_sec: 1 };
    RateLimiter::new(RateLimitConfig {
        global: bucket,
        post_burst: bucket,
        post_sustained: bucket,
        delete_burst: bucket,
        delete_sustained: bucket,
        adaptive_backoff_base_ms: 1,
        adaptive_backoff_max_ms: 2,
    })
}

/// An order manager wired to the recording execution client.
pub fn order_manager(
    registry: &SharedRegistry,
    execution: Arc<RecordingExecution>,
    cfg: OrderConfig,
) -> OrderManager {
    OrderManager::new(cfg, execution, fast_limiter(), normalizer(registry))
}
