//! Order book store with snapshot history.
//!
//! Books are validated on every upsert; a violated invariant is returned to
//! the caller (who resyncs from a REST snapshot) rather than repaired in
//! place. A bounded ring of recent snapshots per (market, token) supports
//! closest-at-time lookups for picked-off detection.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::core::domain::{MarketId, TokenId};

/// Snapshots retained per (market, token) for closest-at-time lookup.
const HISTORY_DEPTH: usize = 3000;

/// Book store shared between the market WS task (writer) and the engine
/// task (reader).
pub type SharedBookStore = Arc<RwLock<BookStore>>;

/// A single price level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BookLevel {
    pub price: Decimal,
    pub size: Decimal,
}

impl BookLevel {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }
}

/// Invariant violations detected at upsert time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BookAnomaly {
    #[error("negative size in order book")]
    NegativeSize,
    #[error("price outside [0, 1]")]
    PriceOutOfRange,
    #[error("bids not strictly descending")]
    BidsUnsorted,
    #[error("asks not strictly ascending")]
    AsksUnsorted,
    #[error("crossed order book")]
    Crossed,
    #[error("empty active book")]
    EmptyActive,
}

/// One validated book snapshot.
#[derive(Debug, Clone)]
pub struct BookState {
    pub market_id: MarketId,
    pub token_id: TokenId,
    /// Strictly descending by price.
    pub bids: Vec<BookLevel>,
    /// Strictly ascending by price.
    pub asks: Vec<BookLevel>,
    pub recv_ts: DateTime<Utc>,
    pub exchange_ts: Option<i64>,
    pub active: bool,
}

impl BookState {
    #[must_use]
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    #[must_use]
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    /// Midpoint of best bid and ask, if both sides are present.
    #[must_use]
    pub fn mid(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
            _ => None,
        }
    }

    fn validate(&self, require_nonempty_if_active: bool) -> Result<(), BookAnomaly> {
        for level in self.bids.iter().chain(self.asks.iter()) {
            if level.size < Decimal::ZERO {
                return Err(BookAnomaly::NegativeSize);
            }
            if level.price < Decimal::ZERO || level.price > Decimal::ONE {
                return Err(BookAnomaly::PriceOutOfRange);
            }
        }
        if self.bids.windows(2).any(|w| w[0].price <= w[1].price) {
            return Err(BookAnomaly::BidsUnsorted);
        }
        if self.asks.windows(2).any(|w| w[0].price >= w[1].price) {
            return Err(BookAnomaly::AsksUnsorted);
        }
        if let (Some(bid), Some(ask)) = (self.best_bid(), self.best_ask()) {
            if bid >= ask {
                return Err(BookAnomaly::Crossed);
            }
        }
        if require_nonempty_if_active && self.active && self.bids.is_empty() && self.asks.is_empty()
        {
            return Err(BookAnomaly::EmptyActive);
        }
        Ok(())
    }
}

/// Current books plus a bounded history ring per (market, token).
#[derive(Debug, Default)]
pub struct BookStore {
    books: HashMap<(MarketId, TokenId), BookState>,
    history: HashMap<(MarketId, TokenId), VecDeque<BookState>>,
}

impl BookStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, market_id: &MarketId, token_id: &TokenId) -> Option<&BookState> {
        self.books.get(&(market_id.clone(), token_id.clone()))
    }

    /// All current books, for snapshot persistence and mark-to-market.
    pub fn iter(&self) -> impl Iterator<Item = (&(MarketId, TokenId), &BookState)> {
        self.books.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.books.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }

    /// Validate and store a new book state, appending it to the history
    /// ring. On an invariant violation nothing is stored.
    #[allow(clippy::too_many_arguments)]
    pub fn upsert(
        &mut self,
        market_id: MarketId,
        token_id: TokenId,
        bids: Vec<BookLevel>,
        asks: Vec<BookLevel>,
        recv_ts: DateTime<Utc>,
        exchange_ts: Option<i64>,
        active: bool,
        require_nonempty_if_active: bool,
    ) -> Result<BookState, BookAnomaly> {
        let book = BookState {
            market_id: market_id.clone(),
            token_id: token_id.clone(),
            bids,
            asks,
            recv_ts,
            exchange_ts,
            active,
        };
        book.validate(require_nonempty_if_active)?;

        let key = (market_id, token_id);
        let ring = self.history.entry(key.clone()).or_default();
        if ring.len() >= HISTORY_DEPTH {
            ring.pop_front();
        }
        ring.push_back(book.clone());
        self.books.insert(key, book.clone());
        Ok(book)
    }

    /// The historical snapshot closest to `ts`, within `max_age_ms`.
    /// Scans newest-first and stops once snapshots older than the window
    /// can no longer improve.
    #[must_use]
    pub fn closest_snapshot(
        &self,
        market_id: &MarketId,
        token_id: &TokenId,
        ts: DateTime<Utc>,
        max_age_ms: i64,
    ) -> Option<&BookState> {
        let ring = self.history.get(&(market_id.clone(), token_id.clone()))?;
        let mut best: Option<&BookState> = None;
        let mut best_dt = i64::MAX;
        for snap in ring.iter().rev() {
            let dt = (snap.recv_ts - ts).num_milliseconds().abs();
            if dt < best_dt {
                best = Some(snap);
                best_dt = dt;
            }
            if snap.recv_ts < ts && dt > max_age_ms {
                break;
            }
        }
        best.filter(|_| best_dt <= max_age_ms)
    }

    /// Deactivate a book without touching its levels.
    pub fn mark_stale(&mut self, market_id: &MarketId, token_id: &TokenId, now: DateTime<Utc>) {
        if let Some(book) = self.books.get_mut(&(market_id.clone(), token_id.clone())) {
            book.active = false;
            book.recv_ts = now;
        }
    }
}
