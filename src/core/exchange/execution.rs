//! Execution adapter: the venue's trading surface behind a trait.
//!
//! The order state machine only ever sees [`ExecutionClient`]; live trading
//! goes through [`RestExecution`], while dry-run mode and the backtester use
//! deterministic local implementations.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tracing::debug;

use crate::core::domain::{MarketId, Side, TokenId};

/// In-flight request cap for the REST adapter.
const MAX_IN_FLIGHT: usize = 8;

/// A place request as sent to the venue.
#[derive(Debug, Clone)]
pub struct PlaceOrderRequest {
    pub market_id: MarketId,
    pub token_id: TokenId,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub client_order_id: String,
    pub ttl_ms: i64,
}

/// Venue response for both place and cancel calls.
#[derive(Debug, Clone)]
pub struct ExecutionResponse {
    pub ok: bool,
    pub status_code: u16,
    pub order_id: Option<String>,
    pub client_order_id: Option<String>,
    pub sent_ts: DateTime<Utc>,
    pub error: Option<String>,
}

impl ExecutionResponse {
    fn success(status_code: u16, order_id: Option<String>, client_order_id: Option<String>) -> Self {
        Self {
            ok: true,
            status_code,
            order_id,
            client_order_id,
            sent_ts: Utc::now(),
            error: None,
        }
    }

    fn failure(status_code: u16, error: impl Into<String>) -> Self {
        Self {
            ok: false,
            status_code,
            order_id: None,
            client_order_id: None,
            sent_ts: Utc::now(),
            error: Some(error.into()),
        }
    }
}

/// Remote RPC surface for placing and cancelling orders.
#[async_trait]
pub trait ExecutionClient: Send + Sync {
    async fn place_order(&self, request: PlaceOrderRequest) -> ExecutionResponse;
    async fn cancel_order(&self, order_ref: &str) -> ExecutionResponse;
}

/// Deterministic adapter used when `DRY_RUN` is set or credentials are
/// absent. Every call succeeds with a synthetic venue id.
#[derive(Debug, Default)]
pub struct DryRunExecution;

#[async_trait]
impl ExecutionClient for DryRunExecution {
    async fn place_order(&self, request: PlaceOrderRequest) -> ExecutionResponse {
        debug!(
            market_id = %request.market_id,
            token_id = %request.token_id,
            side = %request.side,
            price = %request.price,
            size = %request.size,
            "Dry-run place"
        );
        ExecutionResponse::success(
            200,
            Some(format!("dry-{}", request.client_order_id)),
            Some(request.client_order_id),
        )
    }

    async fn cancel_order(&self, order_ref: &str) -> ExecutionResponse {
        debug!(order_ref, "Dry-run cancel");
        ExecutionResponse::success(200, Some(order_ref.to_string()), None)
    }
}

/// REST adapter against the venue's order endpoints, with a bounded
/// in-flight semaphore so a slow venue cannot pile up requests.
pub struct RestExecution {
    http: reqwest::Client,
    rest_url: String,
    in_flight: Arc<Semaphore>,
}

impl RestExecution {
    #[must_use]
    pub fn new(rest_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            rest_url,
            in_flight: Arc::new(Semaphore::new(MAX_IN_FLIGHT)),
        }
    }

    fn order_url(&self) -> String {
        format!("{}/order", self.rest_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ExecutionClient for RestExecution {
    async fn place_order(&self, request: PlaceOrderRequest) -> ExecutionResponse {
        let _permit = match self.in_flight.acquire().await {
            Ok(permit) => permit,
            Err(_) => return ExecutionResponse::failure(503, "execution adapter closed"),
        };
        let body = json!({
            "market": request.market_id.as_str(),
            "asset_id": request.token_id.as_str(),
            "side": request.side.as_str(),
            "price": request.price.to_string(),
            "size": request.size.to_string(),
            "client_order_id": request.client_order_id,
            "expiration_ms": request.ttl_ms,
        });
        let client_order_id = request.client_order_id.clone();
        match self.http.post(self.order_url()).json(&body).send().await {
            Ok(resp) => {
                let status = resp.status().as_u16();
                if !resp.status().is_success() {
                    return ExecutionResponse::failure(status, format!("place status={status}"));
                }
                let payload: Value = resp.json().await.unwrap_or_default();
                let order_id = payload
                    .get("orderID")
                    .or_else(|| payload.get("id"))
                    .and_then(Value::as_str)
                    .map(String::from);
                ExecutionResponse::success(status, order_id, Some(client_order_id))
            }
            Err(e) => ExecutionResponse::failure(500, e.to_string()),
        }
    }

    async fn cancel_order(&self, order_ref: &str) -> ExecutionResponse {
        let _permit = match self.in_flight.acquire().await {
            Ok(permit) => permit,
            Err(_) => return ExecutionResponse::failure(503, "execution adapter closed"),
        };
        let url = format!("{}/{order_ref}", self.order_url());
        match self.http.delete(url).send().await {
            Ok(resp) => {
                let status = resp.status().as_u16();
                if resp.status().is_success() {
                    ExecutionResponse::success(status, Some(order_ref.to_string()), None)
                } else {
                    ExecutionResponse::failure(status, format!("cancel status={status}"))
                }
            }
            Err(e) => ExecutionResponse::failure(500, e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request() -> PlaceOrderRequest {
        PlaceOrderRequest {
            market_id: MarketId::from("m1"),
            token_id: TokenId::from("t1"),
            side: Side::Buy,
            price: dec!(0.5),
            size: dec!(1),
            client_order_id: "c-1".into(),
            ttl_ms: 1500,
        }
    }

    #[tokio::test]
    async fn dry_run_place_acks_with_synthetic_venue_id() {
        let exec = DryRunExecution;
        let resp = exec.place_order(request()).await;
        assert!(resp.ok);
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.order_id.as_deref(), Some("dry-c-1"));
        assert_eq!(resp.client_order_id.as_deref(), Some("c-1"));
    }

    #[tokio::test]
    async fn dry_run_cancel_echoes_ref() {
        let exec = DryRunExecution;
        let resp = exec.cancel_order("v-9").await;
        assert!(resp.ok);
        assert_eq!(resp.order_id.as_deref(), Some("v-9"));
    }
}
