//! Deterministic YES+NO arbitrage strategy.
//!
//! A binary market's two outcome tokens should price to 1.0 in total. When
//! both best asks sum to less than that, net of fees, modeled slippage and
//! a failure buffer, buying both sides locks the difference. No randomness,
//! no learned components: identical books always produce identical intents.

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::core::book::BookState;
use crate::core::domain::{Intent, MarketId, Side, TimeInForce, TokenId};
use crate::core::market::MarketRules;

/// Strategy thresholds; hot-reloadable via `set k=v`.
#[derive(Debug, Clone, Deserialize)]
pub struct StrategyParams {
    pub min_edge_threshold: Decimal,
    pub failure_buffer: Decimal,
    pub max_slippage_bps: Decimal,
    pub ttl_ms: i64,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            min_edge_threshold: Decimal::new(5, 3), // 0.005
            failure_buffer: Decimal::new(2, 3),     // 0.002
            max_slippage_bps: Decimal::from(50),
            ttl_ms: 1500,
        }
    }
}

/// Depth-walking slippage estimate.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlippageModel;

impl SlippageModel {
    /// Walk the levels a marketable order of `size` would consume and
    /// return |volume-weighted price − top price|. A book too thin to
    /// absorb the size returns 1.0, which kills any edge.
    #[must_use]
    pub fn estimate(&self, book: &BookState, side: Side, size: Decimal) -> Decimal {
        let levels = match side {
            Side::Buy => &book.asks,
            Side::Sell => &book.bids,
        };
        let Some(top) = levels.first() else {
            return Decimal::ONE;
        };
        let mut remaining = size;
        let mut weighted = Decimal::ZERO;
        let mut filled = Decimal::ZERO;
        for level in levels {
            let take = level.size.min(remaining);
            weighted += take * level.price;
            filled += take;
            remaining -= take;
            if remaining <= Decimal::ZERO {
                break;
            }
        }
        if filled.is_zero() || remaining > Decimal::ZERO {
            return Decimal::ONE;
        }
        (weighted / filled - top.price).abs()
    }
}

/// The arbitrage strategy evaluated on every book update.
pub struct Strategy {
    params: StrategyParams,
    slippage: SlippageModel,
    rules: MarketRules,
}

impl Strategy {
    #[must_use]
    pub fn new(params: StrategyParams, rules: MarketRules) -> Self {
        Self {
            params,
            slippage: SlippageModel,
            rules,
        }
    }

    #[must_use]
    pub fn params(&self) -> &StrategyParams {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut StrategyParams {
        &mut self.params
    }

    /// Evaluate one market. Returns either a single NOOP carrying the
    /// reason, or a pair of buy intents (YES then NO) at the best asks.
    ///
    /// `adaptive_buffer` is the slippage monitor's current buffer for this
    /// market; the larger of it and the static failure buffer is charged
    /// against the edge.
    pub fn compute_intents(
        &self,
        book_yes: Option<&BookState>,
        book_no: Option<&BookState>,
        market_id: &MarketId,
        token_yes: &TokenId,
        token_no: &TokenId,
        adaptive_buffer: Decimal,
    ) -> Vec<Intent> {
        let noop = |reason: &str| {
            vec![Intent::noop(market_id.clone(), token_yes.clone(), reason)]
        };

        let (Some(book_yes), Some(book_no)) = (book_yes, book_no) else {
            return noop("missing_book");
        };
        if !book_yes.active || !book_no.active {
            return noop("market_inactive");
        }
        let (Some(ask_yes), Some(ask_no)) = (book_yes.best_ask(), book_no.best_ask()) else {
            return noop("empty_book");
        };

        let fee_rate = self.rules.fee_rate(market_id, token_yes);
        let size = self.rules.min_order_size(market_id, token_yes);
        let slip_yes = self.slippage.estimate(book_yes, Side::Buy, size);
        let slip_no = self.slippage.estimate(book_no, Side::Buy, size);
        let buffer = self.params.failure_buffer.max(adaptive_buffer);

        let edge = Decimal::ONE - (ask_yes + ask_no) - fee_rate - (slip_yes + slip_no) - buffer;
        if edge <= self.params.min_edge_threshold {
            return noop("edge_below_threshold");
        }

        let reason = format!("edge={edge}");
        vec![
            Intent::place(
                market_id.clone(),
                token_yes.clone(),
                Side::Buy,
                ask_yes,
                size,
                Some(self.params.ttl_ms),
                TimeInForce::Maker,
                reason.clone(),
            ),
            Intent::place(
                market_id.clone(),
                token_no.clone(),
                Side::Buy,
                ask_no,
                size,
                Some(self.params.ttl_ms),
                TimeInForce::Maker,
                reason,
            ),
        ]
    }
}
