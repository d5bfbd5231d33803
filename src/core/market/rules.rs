//! Per-market trading rules: tick size, minimum order size, fee rate, and
//! quantization.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

use crate::core::domain::{MarketId, TokenId};
use crate::core::market::SharedRegistry;

/// Rules lookup keyed market-first with token fallback, defaulting when a
/// market is unknown.
#[derive(Clone)]
pub struct MarketRules {
    registry: SharedRegistry,
    default_tick_size: Decimal,
    default_min_order_size: Decimal,
    default_fee_rate: Decimal,
}

impl MarketRules {
    pub fn new(registry: SharedRegistry, default_fee_rate: Decimal) -> Self {
        Self {
            registry,
            default_tick_size: dec!(0.001),
            default_min_order_size: dec!(1),
            default_fee_rate,
        }
    }

    fn lookup(
        &self,
        market_id: &MarketId,
        token_id: &TokenId,
    ) -> Option<(Decimal, Decimal, Decimal)> {
        let registry = self.registry.read();
        let meta = registry.get(market_id).or_else(|| {
            registry
                .market_for_token(token_id)
                .and_then(|mid| registry.get(mid))
        })?;
        Some((meta.tick_size, meta.min_order_size, meta.fee_rate))
    }

    #[must_use]
    pub fn tick_size(&self, market_id: &MarketId, token_id: &TokenId) -> Decimal {
        self.lookup(market_id, token_id)
            .map_or(self.default_tick_size, |(tick, _, _)| tick)
    }

    #[must_use]
    pub fn min_order_size(&self, market_id: &MarketId, token_id: &TokenId) -> Decimal {
        self.lookup(market_id, token_id)
            .map_or(self.default_min_order_size, |(_, min, _)| min)
    }

    #[must_use]
    pub fn fee_rate(&self, market_id: &MarketId, token_id: &TokenId) -> Decimal {
        self.lookup(market_id, token_id)
            .map_or(self.default_fee_rate, |(_, _, fee)| fee)
    }

    /// Snap a price to the market's tick grid, half away from zero.
    /// Returns the snapped price and the tick count.
    #[must_use]
    pub fn quantize_price(
        &self,
        market_id: &MarketId,
        token_id: &TokenId,
        price: Decimal,
    ) -> (Decimal, i64) {
        let tick = self.tick_size(market_id, token_id);
        let ticks = round_half_away(price / tick);
        (ticks_to_decimal(ticks) * tick, ticks)
    }

    /// Snap a size to the market's size grid, floored at one step.
    /// Returns the snapped size and the unit count.
    #[must_use]
    pub fn quantize_size(
        &self,
        market_id: &MarketId,
        token_id: &TokenId,
        size: Decimal,
    ) -> (Decimal, i64) {
        let step = self.min_order_size(market_id, token_id);
        let units = round_half_away(size / step);
        let snapped = ticks_to_decimal(units) * step;
        (snapped.max(step), units)
    }
}

fn round_half_away(value: Decimal) -> i64 {
    value
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .unwrap_or(0)
}

fn ticks_to_decimal(ticks: i64) -> Decimal {
    Decimal::from(ticks)
}
