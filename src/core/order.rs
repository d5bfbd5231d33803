//! Order state machine — the single writer for all order mutations.
//!
//! Intents flow in from the strategy (or the flatten path); everything else
//! in the process observes orders read-only. Deduplication happens twice:
//! a short-lived intent-key set absorbs mechanical replays, and a semantic
//! fingerprint index guarantees at most one live order per economic effect.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::domain::{
    Intent, IntentKind, ManagedOrder, MarketId, OrderDecision, OrderStatus, Side, TokenId,
};
use crate::core::exchange::{ExecutionClient, PlaceOrderRequest};
use crate::core::normalize::Normalizer;
use crate::core::ratelimit::RateLimiter;

/// Intent dedup entries live this long.
const INTENT_SEEN_TTL_MS: i64 = 2000;
/// Hard cap on the dedup set; a full clear beats unbounded growth.
const INTENT_SEEN_CAP: usize = 20_000;
/// Cancel-churn sliding window.
const CANCEL_WINDOW_MS: i64 = 1000;

/// Order handling configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderConfig {
    pub default_ttl_ms: i64,
    pub min_order_lifetime_ms: i64,
    pub max_cancels_per_sec_per_market: usize,
}

impl Default for OrderConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: 1500,
            min_order_lifetime_ms: 250,
            max_cancels_per_sec_per_market: 5,
        }
    }
}

/// The order state machine.
pub struct OrderManager {
    cfg: OrderConfig,
    execution: Arc<dyn ExecutionClient>,
    rate_limiter: RateLimiter,
    normalizer: Normalizer,
    orders_by_client_id: HashMap<String, ManagedOrder>,
    client_by_venue_id: HashMap<String, String>,
    semantic_index: HashMap<String, String>,
    cancel_windows: HashMap<MarketId, VecDeque<DateTime<Utc>>>,
    intent_seen: HashMap<String, DateTime<Utc>>,
}

impl OrderManager {
    #[must_use]
    pub fn new(
        cfg: OrderConfig,
        execution: Arc<dyn ExecutionClient>,
        rate_limiter: RateLimiter,
        normalizer: Normalizer,
    ) -> Self {
        Self {
            cfg,
            execution,
            rate_limiter,
            normalizer,
            orders_by_client_id: HashMap::new(),
            client_by_venue_id: HashMap::new(),
            semantic_index: HashMap::new(),
            cancel_windows: HashMap::new(),
            intent_seen: HashMap::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &OrderConfig {
        &self.cfg
    }

    /// Resolve an order by client or venue id.
    #[must_use]
    pub fn get(&self, order_ref: &str) -> Option<&ManagedOrder> {
        if let Some(order) = self.orders_by_client_id.get(order_ref) {
            return Some(order);
        }
        self.client_by_venue_id
            .get(order_ref)
            .and_then(|client_id| self.orders_by_client_id.get(client_id))
    }

    /// All orders, for flatten sweeps and persistence.
    pub fn orders(&self) -> impl Iterator<Item = &ManagedOrder> {
        self.orders_by_client_id.values()
    }

    /// Count of live orders, optionally restricted to one market.
    #[must_use]
    pub fn live_open_orders_count(&self, market_id: Option<&MarketId>) -> usize {
        self.orders_by_client_id
            .values()
            .filter(|o| o.status.is_live())
            .filter(|o| market_id.map_or(true, |m| &o.market_id == m))
            .count()
    }

    /// Process one intent through dedup and the place/cancel paths.
    ///
    /// `risk_breach` bypasses the minimum-lifetime gate so a flatten can
    /// cancel young orders.
    pub async fn process_intent(&mut self, intent: &Intent, risk_breach: bool) -> OrderDecision {
        if intent.is_noop() {
            return OrderDecision::rejected("noop");
        }

        let now = Utc::now();
        self.prune_intent_seen(now);
        let dedupe = self.dedupe_key(intent);
        if self.intent_seen.contains_key(&dedupe) {
            return OrderDecision::rejected("intent_duplicate");
        }
        self.intent_seen.insert(dedupe, now);
        if self.intent_seen.len() > INTENT_SEEN_CAP {
            self.intent_seen.clear();
        }

        match &intent.kind {
            IntentKind::Place { .. } => self.handle_place(intent).await,
            IntentKind::Cancel { order_ref } => {
                let order_ref = order_ref.clone();
                self.handle_cancel(&order_ref, risk_breach).await
            }
            IntentKind::Noop => OrderDecision::rejected("noop"),
        }
    }

    async fn handle_place(&mut self, intent: &Intent) -> OrderDecision {
        let IntentKind::Place {
            side,
            price,
            size,
            ttl_ms,
            ..
        } = &intent.kind
        else {
            return OrderDecision::rejected("unsupported_intent");
        };
        let (side, ttl_ms) = (*side, ttl_ms.unwrap_or(self.cfg.default_ttl_ms));

        let (q_price, p_ticks) =
            self.normalizer
                .rules()
                .quantize_price(&intent.market_id, &intent.token_id, *price);
        let (q_size, s_units) =
            self.normalizer
                .rules()
                .quantize_size(&intent.market_id, &intent.token_id, *size);
        if !self
            .normalizer
            .validate_order(&intent.market_id, &intent.token_id, q_price, q_size)
        {
            return OrderDecision::rejected("tick_or_size_invalid");
        }

        let fingerprint = semantic_fingerprint(
            &intent.market_id,
            &intent.token_id,
            side,
            p_ticks,
            s_units,
        );
        if let Some(existing) = self.semantic_index.get(&fingerprint) {
            if self.is_live(existing) {
                return OrderDecision::rejected_for("semantic_duplicate", existing.clone());
            }
        }

        // A live order on the same (market, token, side) at a different
        // price or size must be cancelled before the replacement goes out.
        if let Some(conflict) =
            self.find_live_conflict(&intent.market_id, &intent.token_id, side, q_price, q_size)
        {
            let cancel = self.handle_cancel(&conflict.clone(), false).await;
            if !cancel.accepted {
                return OrderDecision::rejected_for(
                    format!("replace_cancel_failed:{}", cancel.reason),
                    conflict,
                );
            }
        }

        let client_order_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let order = ManagedOrder {
            client_order_id: client_order_id.clone(),
            venue_order_id: None,
            market_id: intent.market_id.clone(),
            token_id: intent.token_id.clone(),
            side,
            price: q_price,
            size: q_size,
            remaining_size: q_size,
            status: OrderStatus::Sent,
            created_ts: now,
            last_update_ts: now,
            ttl_ms,
            ack_ts: None,
            first_fill_ts: None,
        };
        self.orders_by_client_id.insert(client_order_id.clone(), order);
        self.semantic_index.insert(fingerprint, client_order_id.clone());

        self.rate_limiter.acquire_post().await;
        let response = self
            .execution
            .place_order(PlaceOrderRequest {
                market_id: intent.market_id.clone(),
                token_id: intent.token_id.clone(),
                side,
                price: q_price,
                size: q_size,
                client_order_id: client_order_id.clone(),
                ttl_ms,
            })
            .await;
        self.rate_limiter.record_response(response.status_code);

        let Some(order) = self.orders_by_client_id.get_mut(&client_order_id) else {
            return OrderDecision::rejected("order_vanished");
        };
        if !response.ok {
            order.status = OrderStatus::Rejected;
            order.last_update_ts = Utc::now();
            return OrderDecision::rejected_for(
                response.error.unwrap_or_else(|| "place_failed".into()),
                client_order_id,
            );
        }
        if let Some(venue_id) = response.order_id {
            order.venue_order_id = Some(venue_id.clone());
            self.client_by_venue_id.insert(venue_id, client_order_id.clone());
        }
        debug!(client_order_id = %client_order_id, "Order sent");
        OrderDecision::accepted("sent", client_order_id)
    }

    async fn handle_cancel(&mut self, order_ref: &str, risk_breach: bool) -> OrderDecision {
        let Some(order) = self.get(order_ref) else {
            return OrderDecision::rejected("order_not_found");
        };
        if order.status.is_terminal() {
            return OrderDecision::rejected_for("already_terminal", order.client_order_id.clone());
        }

        let client_order_id = order.client_order_id.clone();
        let market_id = order.market_id.clone();
        let venue_ref = order
            .venue_order_id
            .clone()
            .unwrap_or_else(|| client_order_id.clone());
        let now = Utc::now();

        if !risk_breach {
            let lifetime_ms = (now - order.created_ts).num_milliseconds();
            if lifetime_ms < self.cfg.min_order_lifetime_ms {
                return OrderDecision::rejected_for("min_lifetime_not_met", client_order_id);
            }
        }

        if !self.allow_cancel(&market_id, now) {
            return OrderDecision::rejected_for("cancel_churn_limited", client_order_id);
        }

        if let Some(order) = self.orders_by_client_id.get_mut(&client_order_id) {
            order.status = OrderStatus::CancelSent;
            order.last_update_ts = now;
        }

        self.rate_limiter.acquire_delete().await;
        let response = self.execution.cancel_order(&venue_ref).await;
        self.rate_limiter.record_response(response.status_code);

        if !response.ok {
            return OrderDecision::rejected_for(
                response.error.unwrap_or_else(|| "cancel_failed".into()),
                client_order_id,
            );
        }
        OrderDecision::accepted("cancel_sent", client_order_id)
    }

    /// Ack from the user stream. Fills may have raced ahead of the ack, so
    /// only a `SENT` order moves to `ACKED`; the timestamp and venue id are
    /// always recorded.
    pub fn on_ack(&mut self, client_order_id: &str, venue_order_id: Option<String>) {
        let Some(order) = self.orders_by_client_id.get_mut(client_order_id) else {
            return;
        };
        let now = Utc::now();
        if order.status == OrderStatus::Sent {
            order.status = OrderStatus::Acked;
        }
        order.ack_ts = Some(now);
        order.last_update_ts = now;
        if let Some(venue_id) = venue_order_id {
            order.venue_order_id = Some(venue_id.clone());
            self.client_by_venue_id.insert(venue_id, client_order_id.to_string());
        }
    }

    /// Fill from the user stream: decrement remaining, floor at zero.
    pub fn on_fill(&mut self, client_order_id: &str, fill_size: Decimal) {
        let Some(order) = self.orders_by_client_id.get_mut(client_order_id) else {
            return;
        };
        if order.status.is_terminal() {
            return;
        }
        let now = Utc::now();
        if order.first_fill_ts.is_none() {
            order.first_fill_ts = Some(now);
        }
        order.remaining_size = (order.remaining_size - fill_size).max(Decimal::ZERO);
        order.last_update_ts = now;
        order.status = if order.remaining_size.is_zero() {
            OrderStatus::Filled
        } else {
            OrderStatus::Partial
        };
    }

    pub fn on_cancel(&mut self, client_order_id: &str) {
        self.terminal_transition(client_order_id, OrderStatus::Canceled);
    }

    pub fn on_reject(&mut self, client_order_id: &str) {
        self.terminal_transition(client_order_id, OrderStatus::Rejected);
    }

    pub fn on_close(&mut self, client_order_id: &str) {
        self.terminal_transition(client_order_id, OrderStatus::Closed);
    }

    fn terminal_transition(&mut self, client_order_id: &str, status: OrderStatus) {
        let Some(order) = self.orders_by_client_id.get_mut(client_order_id) else {
            return;
        };
        if order.status.is_terminal() {
            return;
        }
        order.status = status;
        order.last_update_ts = Utc::now();
    }

    /// TTL reaper: cancel every reapable order past its TTL and mark it
    /// `EXPIRED` once the cancel goes out. Returns the expired client ids.
    pub async fn auto_cancel_expired(&mut self, risk_breach: bool) -> Vec<String> {
        let now = Utc::now();
        let expired: Vec<String> = self
            .orders_by_client_id
            .values()
            .filter(|o| o.status.is_reapable() && o.is_expired(now))
            .map(|o| o.client_order_id.clone())
            .collect();

        let mut canceled = Vec::new();
        for client_order_id in expired {
            let decision = self.handle_cancel(&client_order_id, risk_breach).await;
            if decision.accepted {
                if let Some(order) = self.orders_by_client_id.get_mut(&client_order_id) {
                    order.status = OrderStatus::Expired;
                    order.last_update_ts = Utc::now();
                }
                canceled.push(client_order_id);
            } else {
                debug!(
                    client_order_id = %client_order_id,
                    reason = %decision.reason,
                    "TTL cancel deferred"
                );
            }
        }
        canceled
    }

    fn dedupe_key(&self, intent: &Intent) -> String {
        match &intent.kind {
            IntentKind::Place { side, price, size, .. } => {
                let (_, ticks) = self.normalizer.rules().quantize_price(
                    &intent.market_id,
                    &intent.token_id,
                    *price,
                );
                let (_, units) = self.normalizer.rules().quantize_size(
                    &intent.market_id,
                    &intent.token_id,
                    *size,
                );
                format!(
                    "place:{}",
                    semantic_fingerprint(&intent.market_id, &intent.token_id, *side, ticks, units)
                )
            }
            IntentKind::Cancel { order_ref } => {
                format!("cancel:{}:{}:{}", intent.market_id, intent.token_id, order_ref)
            }
            IntentKind::Noop => format!("noop:{}:{}", intent.market_id, intent.token_id),
        }
    }

    fn is_live(&self, client_order_id: &str) -> bool {
        self.orders_by_client_id
            .get(client_order_id)
            .is_some_and(|o| o.status.is_live())
    }

    /// A live order on the same (market, token, side) whose price or size
    /// differs — the replace case.
    fn find_live_conflict(
        &self,
        market_id: &MarketId,
        token_id: &TokenId,
        side: Side,
        price: Decimal,
        size: Decimal,
    ) -> Option<String> {
        self.orders_by_client_id
            .values()
            .find(|o| {
                o.market_id == *market_id
                    && o.token_id == *token_id
                    && o.side == side
                    && o.status.is_live()
                    && (o.price != price || o.size != size)
            })
            .map(|o| o.client_order_id.clone())
    }

    /// Sliding-window cancel budget per market. Consumes a slot on success.
    fn allow_cancel(&mut self, market_id: &MarketId, now: DateTime<Utc>) -> bool {
        let window = self.cancel_windows.entry(market_id.clone()).or_default();
        let cutoff = now - Duration::milliseconds(CANCEL_WINDOW_MS);
        while window.front().is_some_and(|ts| *ts < cutoff) {
            window.pop_front();
        }
        if window.len() >= self.cfg.max_cancels_per_sec_per_market {
            warn!(market_id = %market_id, "Cancel churn cap hit");
            return false;
        }
        window.push_back(now);
        true
    }

    fn prune_intent_seen(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::milliseconds(INTENT_SEEN_TTL_MS);
        self.intent_seen.retain(|_, ts| *ts >= cutoff);
    }
}

fn semantic_fingerprint(
    market_id: &MarketId,
    token_id: &TokenId,
    side: Side,
    price_ticks: i64,
    size_units: i64,
) -> String {
    format!("{market_id}:{token_id}:{side}:{price_ticks}:{size_units}")
}
