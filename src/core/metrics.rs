//! Latency and counter metrics, plus picked-off detection.

use std::collections::{HashMap, VecDeque};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::core::domain::Side;

const LATENCY_RING_DEPTH: usize = 5000;

/// Percentile summary for one latency key.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencySummary {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub mean: f64,
}

/// In-process metrics: bounded latency rings and monotonic counters.
#[derive(Debug, Default)]
pub struct Metrics {
    latencies: HashMap<&'static str, VecDeque<f64>>,
    counters: HashMap<&'static str, u64>,
}

impl Metrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe_latency(&mut self, key: &'static str, value_ms: f64) {
        let ring = self.latencies.entry(key).or_default();
        if ring.len() >= LATENCY_RING_DEPTH {
            ring.pop_front();
        }
        ring.push_back(value_ms);
    }

    pub fn inc(&mut self, key: &'static str) {
        self.inc_by(key, 1);
    }

    pub fn inc_by(&mut self, key: &'static str, n: u64) {
        *self.counters.entry(key).or_insert(0) += n;
    }

    #[must_use]
    pub fn counter(&self, key: &str) -> u64 {
        self.counters.get(key).copied().unwrap_or(0)
    }

    /// `num / den`, or 0 when the denominator counter is zero.
    #[must_use]
    pub fn ratio(&self, num_key: &str, den_key: &str) -> f64 {
        let den = self.counter(den_key);
        if den == 0 {
            return 0.0;
        }
        self.counter(num_key) as f64 / den as f64
    }

    /// Percentile summary per latency key.
    #[must_use]
    pub fn latency_summary(&self) -> HashMap<&'static str, LatencySummary> {
        self.latencies
            .iter()
            .filter(|(_, ring)| !ring.is_empty())
            .map(|(key, ring)| {
                let mut sorted: Vec<f64> = ring.iter().copied().collect();
                sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                let mean = sorted.iter().sum::<f64>() / sorted.len() as f64;
                (
                    *key,
                    LatencySummary {
                        p50: percentile(&sorted, 0.50),
                        p95: percentile(&sorted, 0.95),
                        p99: percentile(&sorted, 0.99),
                        mean,
                    },
                )
            })
            .collect()
    }
}

/// Nearest-rank percentile over a pre-sorted slice.
#[must_use]
pub fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = (q * (sorted.len() - 1) as f64) as usize;
    sorted[idx]
}

/// Flags fills that the book immediately moves against.
#[derive(Debug, Clone, Copy)]
pub struct PickedOffDetector {
    adverse_move_bps: Decimal,
}

impl PickedOffDetector {
    #[must_use]
    pub fn new(adverse_move_bps: Decimal) -> Self {
        Self { adverse_move_bps }
    }

    /// Adverse move in bps between the fill price and the post-fill best on
    /// the relevant side. A buy is picked off when the book drops below the
    /// fill; a sell when it rises above.
    #[must_use]
    pub fn is_picked_off(&self, fill_price: Decimal, post_fill_best: Decimal, side: Side) -> bool {
        if fill_price <= Decimal::ZERO {
            return false;
        }
        let move_bps = match side {
            Side::Buy => (fill_price - post_fill_best) / fill_price * dec!(10000),
            Side::Sell => (post_fill_best - fill_price) / fill_price * dec!(10000),
        };
        move_bps > self.adverse_move_bps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_and_ratio() {
        let mut m = Metrics::new();
        m.inc("fill");
        m.inc("fill");
        m.inc("cancel");
        assert_eq!(m.counter("fill"), 2);
        assert!((m.ratio("fill", "cancel") - 2.0).abs() < f64::EPSILON);
        assert_eq!(m.ratio("fill", "missing"), 0.0);
    }

    #[test]
    fn latency_summary_percentiles() {
        let mut m = Metrics::new();
        for i in 1..=100 {
            m.observe_latency("loop", f64::from(i));
        }
        let summary = m.latency_summary();
        let loop_summary = summary.get("loop").unwrap();
        assert_eq!(loop_summary.p50, 50.0);
        assert_eq!(loop_summary.p95, 95.0);
        assert_eq!(loop_summary.p99, 99.0);
        assert!((loop_summary.mean - 50.5).abs() < 1e-9);
    }

    #[test]
    fn latency_ring_is_bounded() {
        let mut m = Metrics::new();
        for i in 0..(LATENCY_RING_DEPTH + 10) {
            m.observe_latency("k", i as f64);
        }
        assert_eq!(m.latencies.get("k").unwrap().len(), LATENCY_RING_DEPTH);
    }

    #[test]
    fn picked_off_buy_when_book_drops() {
        let detector = PickedOffDetector::new(dec!(30));
        // Bought at 0.50, best bid now 0.45: 1000 bps adverse.
        assert!(detector.is_picked_off(dec!(0.50), dec!(0.45), Side::Buy));
        // Book moved up after the buy: favourable.
        assert!(!detector.is_picked_off(dec!(0.50), dec!(0.55), Side::Buy));
    }

    #[test]
    fn picked_off_sell_when_book_rises() {
        let detector = PickedOffDetector::new(dec!(30));
        assert!(detector.is_picked_off(dec!(0.50), dec!(0.55), Side::Sell));
        assert!(!detector.is_picked_off(dec!(0.50), dec!(0.45), Side::Sell));
    }

    #[test]
    fn tiny_moves_below_threshold_are_not_picked_off() {
        let detector = PickedOffDetector::new(dec!(30));
        // 0.5 -> 0.4999 is 2 bps.
        assert!(!detector.is_picked_off(dec!(0.5), dec!(0.4999), Side::Buy));
    }
}
