//! Positions and fills.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::{MarketId, Side, TokenId};

/// Signed position per (market, token). Positive qty is long, negative is
/// short. Average price follows the accounting rules in the risk engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub market_id: MarketId,
    pub token_id: TokenId,
    pub qty: Decimal,
    pub avg_price: Decimal,
}

impl Position {
    pub fn flat(market_id: MarketId, token_id: TokenId) -> Self {
        Self {
            market_id,
            token_id,
            qty: Decimal::ZERO,
            avg_price: Decimal::ZERO,
        }
    }

    /// Key used for the position map and the persisted `positions` table.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}:{}", self.market_id, self.token_id)
    }

    #[must_use]
    pub fn is_flat(&self) -> bool {
        self.qty.is_zero()
    }
}

/// A single execution against one of our orders.
#[derive(Debug, Clone)]
pub struct FillRecord {
    pub market_id: MarketId,
    pub token_id: TokenId,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub ts: DateTime<Utc>,
    pub fee: Decimal,
    pub order_id: Option<String>,
    pub client_order_id: Option<String>,
}

impl FillRecord {
    pub fn new(
        market_id: MarketId,
        token_id: TokenId,
        side: Side,
        price: Decimal,
        size: Decimal,
        ts: DateTime<Utc>,
    ) -> Self {
        Self {
            market_id,
            token_id,
            side,
            price,
            size,
            ts,
            fee: Decimal::ZERO,
            order_id: None,
            client_order_id: None,
        }
    }

    #[must_use]
    pub fn with_fee(mut self, fee: Decimal) -> Self {
        self.fee = fee;
        self
    }
}
