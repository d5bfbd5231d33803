//! Market registry: the authoritative yes/no token mapping.
//!
//! Markets enter from static config, are refreshed best-effort from the
//! metadata HTTP API, and are validated as binary Yes/No before the engine
//! will trade them. A market that fails validation keeps its diagnostic so
//! the failure can be persisted and inspected.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::Value;
use tracing::{info, warn};

use crate::core::domain::{MarketId, TokenId};

const STRICT_YES_LABELS: &[&str] = &["yes"];
const STRICT_NO_LABELS: &[&str] = &["no"];
const PERMISSIVE_YES_LABELS: &[&str] = &["yes", "y", "true"];
const PERMISSIVE_NO_LABELS: &[&str] = &["no", "n", "false"];

/// Registry shared between the engine task and the market WS task.
pub type SharedRegistry = Arc<RwLock<MarketRegistry>>;

/// Per-market parameters and the yes/no token mapping.
#[derive(Debug, Clone)]
pub struct MarketMeta {
    pub market_id: MarketId,
    pub yes_token_id: TokenId,
    pub no_token_id: TokenId,
    pub tick_size: Decimal,
    pub min_order_size: Decimal,
    pub fee_rate: Decimal,
    pub is_binary_yes_no: bool,
    pub validation_error: Option<String>,
}

impl MarketMeta {
    /// An invalid placeholder carrying a diagnostic.
    fn invalid(
        market_id: MarketId,
        tick_size: Decimal,
        min_order_size: Decimal,
        fee_rate: Decimal,
        error: impl Into<String>,
    ) -> Self {
        Self {
            market_id,
            yes_token_id: TokenId::from(""),
            no_token_id: TokenId::from(""),
            tick_size,
            min_order_size,
            fee_rate,
            is_binary_yes_no: false,
            validation_error: Some(error.into()),
        }
    }
}

/// Registry of market metadata with token-to-market reverse index.
#[derive(Debug)]
pub struct MarketRegistry {
    markets: HashMap<MarketId, MarketMeta>,
    token_to_market: HashMap<TokenId, MarketId>,
    allow_nonstandard_labels: bool,
}

impl MarketRegistry {
    pub fn new(markets: Vec<MarketMeta>, allow_nonstandard_labels: bool) -> Self {
        let mut registry = Self {
            markets: HashMap::new(),
            token_to_market: HashMap::new(),
            allow_nonstandard_labels,
        };
        for meta in markets {
            registry.insert(meta);
        }
        registry
    }

    /// Insert or replace a market, refreshing the reverse index.
    pub fn insert(&mut self, meta: MarketMeta) {
        if !meta.yes_token_id.is_empty() {
            self.token_to_market
                .insert(meta.yes_token_id.clone(), meta.market_id.clone());
        }
        if !meta.no_token_id.is_empty() {
            self.token_to_market
                .insert(meta.no_token_id.clone(), meta.market_id.clone());
        }
        self.markets.insert(meta.market_id.clone(), meta);
    }

    #[must_use]
    pub fn get(&self, market_id: &MarketId) -> Option<&MarketMeta> {
        self.markets.get(market_id)
    }

    /// The market, only if it validated as binary yes/no with both tokens.
    #[must_use]
    pub fn get_binary(&self, market_id: &MarketId) -> Option<&MarketMeta> {
        self.markets.get(market_id).filter(|meta| {
            meta.is_binary_yes_no
                && !meta.yes_token_id.is_empty()
                && !meta.no_token_id.is_empty()
        })
    }

    #[must_use]
    pub fn market_for_token(&self, token_id: &TokenId) -> Option<&MarketId> {
        self.token_to_market.get(token_id)
    }

    /// Markets that passed binary yes/no validation.
    #[must_use]
    pub fn enabled_ids(&self) -> HashSet<MarketId> {
        self.markets
            .iter()
            .filter(|(_, meta)| meta.is_binary_yes_no)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Remove a market and its token mappings entirely.
    pub fn disable(&mut self, market_id: &MarketId) {
        if let Some(meta) = self.markets.remove(market_id) {
            self.token_to_market.remove(&meta.yes_token_id);
            self.token_to_market.remove(&meta.no_token_id);
        }
    }

    /// Best-effort refresh from the metadata HTTP API. Failures leave the
    /// static metadata in place.
    pub async fn refresh_from_gamma(
        &mut self,
        http: &reqwest::Client,
        gamma_url: &str,
        market_ids: &[MarketId],
    ) {
        let base = gamma_url.trim_end_matches('/');
        for market_id in market_ids {
            match fetch_market_payload(http, base, market_id).await {
                Some(data) => {
                    let meta = self.parse_gamma_market(market_id.clone(), &data);
                    if let Some(err) = &meta.validation_error {
                        warn!(market_id = %market_id, error = %err, "Market failed metadata validation");
                    } else {
                        info!(market_id = %market_id, "Market metadata refreshed");
                    }
                    self.insert(meta);
                }
                None => {
                    warn!(market_id = %market_id, "Metadata refresh failed, keeping static metadata");
                }
            }
        }
    }

    /// Validate a raw metadata payload into a `MarketMeta`.
    ///
    /// Requires exactly two token ids and exactly two outcome labels, with
    /// the labels resolving to distinct yes/no outcomes under the active
    /// label set.
    pub fn parse_gamma_market(&self, market_id: MarketId, data: &Value) -> MarketMeta {
        let tick_size = decimal_field(data, &["tickSize", "tick_size"]).unwrap_or(dec!(0.001));
        let min_order_size =
            decimal_field(data, &["minOrderSize", "min_order_size"]).unwrap_or(dec!(1));
        let fee_rate = decimal_field(data, &["feeRate", "fee_rate"]).unwrap_or(dec!(0.002));

        let token_ids = parse_token_ids(data);
        if token_ids.len() != 2 {
            return MarketMeta::invalid(
                market_id,
                tick_size,
                min_order_size,
                fee_rate,
                format!("expected 2 token ids, got {}", token_ids.len()),
            );
        }

        let labels: Vec<String> = data
            .get("outcomes")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .map(|v| normalize_label(v.as_str().unwrap_or_default()))
                    .collect()
            })
            .unwrap_or_default();
        if labels.len() != 2 {
            return MarketMeta::invalid(
                market_id,
                tick_size,
                min_order_size,
                fee_rate,
                format!("expected 2 outcomes, got {}", labels.len()),
            );
        }

        let (yes_labels, no_labels) = self.label_sets();
        let yes_idx = labels.iter().position(|l| yes_labels.contains(&l.as_str()));
        let no_idx = labels.iter().position(|l| no_labels.contains(&l.as_str()));
        match (yes_idx, no_idx) {
            (Some(y), Some(n)) if y != n => MarketMeta {
                market_id,
                yes_token_id: TokenId::from(token_ids[y].clone()),
                no_token_id: TokenId::from(token_ids[n].clone()),
                tick_size,
                min_order_size,
                fee_rate,
                is_binary_yes_no: true,
                validation_error: None,
            },
            _ => MarketMeta::invalid(
                market_id,
                tick_size,
                min_order_size,
                fee_rate,
                format!("ambiguous yes/no outcomes: {labels:?}"),
            ),
        }
    }

    fn label_sets(&self) -> (&'static [&'static str], &'static [&'static str]) {
        if self.allow_nonstandard_labels {
            (PERMISSIVE_YES_LABELS, PERMISSIVE_NO_LABELS)
        } else {
            (STRICT_YES_LABELS, STRICT_NO_LABELS)
        }
    }
}

async fn fetch_market_payload(
    http: &reqwest::Client,
    base: &str,
    market_id: &MarketId,
) -> Option<Value> {
    let endpoints = [
        format!("{base}/markets/{market_id}"),
        format!("{base}/markets?id={market_id}"),
    ];
    for url in endpoints {
        let Ok(resp) = http.get(&url).send().await else {
            continue;
        };
        if !resp.status().is_success() {
            continue;
        }
        let Ok(payload) = resp.json::<Value>().await else {
            continue;
        };
        match payload {
            Value::Array(items) => {
                if let Some(first) = items.into_iter().next() {
                    return Some(first);
                }
            }
            Value::Object(_) => return Some(payload),
            _ => {}
        }
    }
    None
}

/// Token ids arrive as an array or as a comma-separated string.
fn parse_token_ids(data: &Value) -> Vec<String> {
    let raw = data
        .get("clobTokenIds")
        .or_else(|| data.get("clob_token_ids"))
        .or_else(|| data.get("tokenIds"));
    match raw {
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|t| !t.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

/// Lowercase and strip everything outside `[a-z0-9]`.
fn normalize_label(label: &str) -> String {
    label
        .trim()
        .to_lowercase()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect()
}

fn decimal_field(data: &Value, keys: &[&str]) -> Option<Decimal> {
    for key in keys {
        match data.get(*key) {
            Some(Value::String(s)) => {
                if let Ok(d) = s.parse() {
                    return Some(d);
                }
            }
            Some(Value::Number(n)) => {
                if let Ok(d) = n.to_string().parse() {
                    return Some(d);
                }
            }
            _ => {}
        }
    }
    None
}
