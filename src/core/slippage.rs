//! Adaptive slippage buffer.
//!
//! Tracks |fill price − expected price| per market over a rolling window;
//! the P95 of that window, scaled by a multiplier, becomes a dynamic buffer
//! the strategy subtracts from raw edge. The buffer never drops below the
//! configured baseline.

use std::collections::{HashMap, VecDeque};

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::core::domain::MarketId;
use crate::core::metrics::percentile;

#[derive(Debug)]
pub struct SlippageMonitor {
    multiplier: Decimal,
    window_size: usize,
    baseline_buffer: Decimal,
    expected_by_client_id: HashMap<String, (MarketId, Decimal)>,
    slippage_by_market: HashMap<MarketId, VecDeque<Decimal>>,
}

impl SlippageMonitor {
    #[must_use]
    pub fn new(multiplier: Decimal, window_size: usize, baseline_buffer: Decimal) -> Self {
        Self {
            multiplier,
            window_size: window_size.max(1),
            baseline_buffer,
            expected_by_client_id: HashMap::new(),
            slippage_by_market: HashMap::new(),
        }
    }

    /// Remember the price an order was expected to fill at.
    pub fn record_expected(
        &mut self,
        client_order_id: impl Into<String>,
        market_id: MarketId,
        expected_price: Decimal,
    ) {
        self.expected_by_client_id
            .insert(client_order_id.into(), (market_id, expected_price));
    }

    /// Drop the expectation for a terminal order.
    pub fn clear_expected(&mut self, client_order_id: &str) {
        self.expected_by_client_id.remove(client_order_id);
    }

    /// Record a fill against its expectation; returns the observed slip if
    /// the order was being tracked.
    pub fn record_fill(&mut self, client_order_id: &str, fill_price: Decimal) -> Option<Decimal> {
        let (market_id, expected_price) = self.expected_by_client_id.get(client_order_id)?.clone();
        let slip = (fill_price - expected_price).abs();
        let window = self.slippage_by_market.entry(market_id).or_default();
        window.push_back(slip);
        while window.len() > self.window_size {
            window.pop_front();
        }
        Some(slip)
    }

    /// Rolling P95 of observed slippage for a market.
    #[must_use]
    pub fn rolling_p95(&self, market_id: &MarketId) -> Decimal {
        let Some(window) = self.slippage_by_market.get(market_id) else {
            return Decimal::ZERO;
        };
        if window.is_empty() {
            return Decimal::ZERO;
        }
        let mut sorted: Vec<f64> = window
            .iter()
            .map(|d| d.to_f64().unwrap_or(0.0))
            .collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        Decimal::from_f64(percentile(&sorted, 0.95)).unwrap_or(Decimal::ZERO)
    }

    /// The buffer the strategy should subtract: max(baseline, p95 · mult).
    #[must_use]
    pub fn adaptive_buffer(&self, market_id: &MarketId) -> Decimal {
        self.baseline_buffer
            .max(self.rolling_p95(market_id) * self.multiplier)
    }
}
