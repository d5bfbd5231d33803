//! REST order book snapshots for resync.

use std::collections::HashMap;
use std::time::Duration;

use rust_decimal::Decimal;
use serde_json::Value;

use crate::core::book::BookLevel;
use crate::core::domain::TokenId;
use crate::core::normalize::parse_levels;
use crate::error::{Error, Result};

/// Snapshot fetch is bounded end to end.
const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(8);

/// One token's book as returned by the snapshot endpoint.
#[derive(Debug, Clone)]
pub struct TokenSnapshot {
    pub token_id: TokenId,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub exchange_ts: Option<i64>,
    pub market_active: bool,
}

/// Fetches and sanitizes REST book snapshots.
#[derive(Clone)]
pub struct SnapshotFetcher {
    http: reqwest::Client,
    rest_url: String,
    max_level_size: Option<Decimal>,
}

impl SnapshotFetcher {
    #[must_use]
    pub fn new(rest_url: String, max_level_size: Option<Decimal>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(SNAPSHOT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            rest_url,
            max_level_size,
        }
    }

    /// GET `{rest_url}/book?token_id=…` and sanitize both sides.
    pub async fn fetch(&self, token_id: &TokenId) -> Result<TokenSnapshot> {
        let url = format!("{}/book", self.rest_url.trim_end_matches('/'));
        let resp = self
            .http
            .get(&url)
            .query(&[("token_id", token_id.as_str())])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Error::Snapshot(format!(
                "snapshot status={} token={token_id}",
                resp.status()
            )));
        }
        let payload: Value = resp.json().await?;

        let bids = parse_levels(
            payload
                .get("bids")
                .or_else(|| payload.get("buy"))
                .or_else(|| payload.get("bid")),
        );
        let asks = parse_levels(
            payload
                .get("asks")
                .or_else(|| payload.get("sell"))
                .or_else(|| payload.get("ask")),
        );

        Ok(TokenSnapshot {
            token_id: token_id.clone(),
            bids: sanitize_levels(bids, true, self.max_level_size),
            asks: sanitize_levels(asks, false, self.max_level_size),
            exchange_ts: payload
                .get("timestamp")
                .or_else(|| payload.get("ts"))
                .and_then(Value::as_i64),
            market_active: payload
                .get("market_active")
                .and_then(Value::as_bool)
                .unwrap_or(true),
        })
    }
}

/// Deduplicate by price keeping the maximum size, drop invalid levels, and
/// sort (bids descending, asks ascending) so book invariants hold.
#[must_use]
pub fn sanitize_levels(
    levels: Vec<BookLevel>,
    descending: bool,
    max_level_size: Option<Decimal>,
) -> Vec<BookLevel> {
    let mut by_price: HashMap<Decimal, Decimal> = HashMap::new();
    for level in levels {
        if level.price < Decimal::ZERO || level.price > Decimal::ONE {
            continue;
        }
        if level.size <= Decimal::ZERO {
            continue;
        }
        if let Some(cap) = max_level_size {
            if level.size > cap {
                continue;
            }
        }
        by_price
            .entry(level.price)
            .and_modify(|size| *size = (*size).max(level.size))
            .or_insert(level.size);
    }
    let mut out: Vec<BookLevel> = by_price
        .into_iter()
        .map(|(price, size)| BookLevel::new(price, size))
        .collect();
    out.sort_by(|a, b| {
        if descending {
            b.price.cmp(&a.price)
        } else {
            a.price.cmp(&b.price)
        }
    });
    out
}
