//! Application configuration.
//!
//! Configuration is loaded from a TOML file with environment variable
//! overrides for deployment-time knobs (`MARKETS`, `DRY_RUN`, `DB_PATH`,
//! ...). Venue endpoints and credentials come exclusively from the
//! environment and never appear in the config file or the logs.

use std::collections::HashMap;
use std::path::Path;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use tracing_subscriber::{fmt, EnvFilter};

use crate::core::domain::{MarketId, TokenId};
use crate::core::market::{MarketMeta, MarketRegistry};
use crate::core::order::OrderConfig;
use crate::core::ratelimit::{BucketConfig, RateLimitConfig};
use crate::core::risk::RiskConfig;
use crate::core::store::PersistenceConfig;
use crate::error::{Error, Result};

/// Runtime-mode settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// `live` or `backtest`.
    pub mode: String,
    pub dry_run: bool,
    pub start_paused: bool,
    pub event_queue_maxsize: usize,
    pub event_queue_high_watermark: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            mode: "live".into(),
            dry_run: true,
            start_paused: false,
            event_queue_maxsize: 10_000,
            event_queue_high_watermark: 8_000,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `json` or `pretty`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "json".into(),
        }
    }
}

impl LoggingConfig {
    /// Initialize the tracing subscriber with this logging configuration.
    pub fn init(&self) {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));
        match self.format.as_str() {
            "json" => fmt().json().with_env_filter(filter).init(),
            _ => fmt().with_env_filter(filter).init(),
        }
    }
}

/// Market selection and label policy.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MarketsConfig {
    pub enabled: Vec<String>,
    pub allow_nonstandard_yes_no_labels: bool,
}

/// Static per-market metadata used before (or instead of) the metadata API.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StaticMarketMeta {
    pub yes_token_id: String,
    pub no_token_id: String,
    pub tick_size: Decimal,
    pub min_order_size: Decimal,
    pub fee_rate: Decimal,
}

impl Default for StaticMarketMeta {
    fn default() -> Self {
        Self {
            yes_token_id: String::new(),
            no_token_id: String::new(),
            tick_size: dec!(0.001),
            min_order_size: dec!(1),
            fee_rate: dec!(0.002),
        }
    }
}

/// Strategy thresholds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub min_edge_threshold: Decimal,
    pub failure_buffer: Decimal,
    pub default_fee_rate: Decimal,
    pub max_slippage_bps: Decimal,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            min_edge_threshold: dec!(0.005),
            failure_buffer: dec!(0.002),
            default_fee_rate: dec!(0.002),
            max_slippage_bps: dec!(50),
        }
    }
}

/// Per-endpoint burst/sustained bucket pair.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct EndpointLimits {
    pub burst_tokens: u32,
    pub burst_window_sec: u32,
    pub sustained_tokens: u32,
    pub sustained_window_sec: u32,
}

impl Default for EndpointLimits {
    fn default() -> Self {
        Self {
            burst_tokens: 20,
            burst_window_sec: 1,
            sustained_tokens: 300,
            sustained_window_sec: 60,
        }
    }
}

/// Global bucket shared by all order traffic.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct GlobalLimits {
    pub tokens: u32,
    pub window_sec: u32,
}

impl Default for GlobalLimits {
    fn default() -> Self {
        Self {
            tokens: 100_000,
            window_sec: 600,
        }
    }
}

/// Rate-limit section.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct RateLimitsConfig {
    pub global: GlobalLimits,
    pub post_order: EndpointLimits,
    pub delete_order: EndpointLimits,
    pub adaptive_backoff_base_ms: Option<u64>,
    pub adaptive_backoff_max_ms: Option<u64>,
}

impl RateLimitsConfig {
    #[must_use]
    pub fn to_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            global: BucketConfig {
                tokens: self.global.tokens,
                window_sec: self.global.window_sec,
            },
            post_burst: BucketConfig {
                tokens: self.post_order.burst_tokens,
                window_sec: self.post_order.burst_window_sec,
            },
            post_sustained: BucketConfig {
                tokens: self.post_order.sustained_tokens,
                window_sec: self.post_order.sustained_window_sec,
            },
            delete_burst: BucketConfig {
                tokens: self.delete_order.burst_tokens,
                window_sec: self.delete_order.burst_window_sec,
            },
            delete_sustained: BucketConfig {
                tokens: self.delete_order.sustained_tokens,
                window_sec: self.delete_order.sustained_window_sec,
            },
            adaptive_backoff_base_ms: self.adaptive_backoff_base_ms.unwrap_or(100),
            adaptive_backoff_max_ms: self.adaptive_backoff_max_ms.unwrap_or(5000),
        }
    }
}

/// Flatten behavior.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TradingSafetyConfig {
    /// `cancel_only` or `cancel_and_unwind`.
    pub flatten_mode: String,
}

impl Default for TradingSafetyConfig {
    fn default() -> Self {
        Self {
            flatten_mode: "cancel_only".into(),
        }
    }
}

/// Snapshot/resync policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub require_nonempty_active_book: bool,
    pub max_level_size: Option<Decimal>,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            require_nonempty_active_book: true,
            max_level_size: None,
        }
    }
}

/// Watchdog and adaptive-buffer safety settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub user_ws_timeout_sec: i64,
    pub slippage_multiplier: Decimal,
    pub slippage_window_size: usize,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            user_ws_timeout_sec: 30,
            slippage_multiplier: dec!(1.5),
            slippage_window_size: 50,
        }
    }
}

/// Metadata API endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GammaConfig {
    pub gamma_api_url: String,
}

impl Default for GammaConfig {
    fn default() -> Self {
        Self {
            gamma_api_url: "https://gamma-api.polymarket.com".into(),
        }
    }
}

/// Control surface toggles.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub enable_cli: bool,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self { enable_cli: true }
    }
}

/// Backtest settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    pub replay_speed: f64,
    pub initial_capital: Decimal,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            replay_speed: 0.0,
            initial_capital: dec!(1000),
        }
    }
}

/// Venue endpoints and credentials, environment-only.
#[derive(Debug, Clone)]
pub struct VenueEnv {
    pub ws_url: String,
    pub rest_url: String,
    pub chain_id: String,
    pub signature_type: String,
    pub private_key: String,
    pub api_key: String,
    pub api_secret: String,
    pub api_passphrase: String,
}

impl VenueEnv {
    #[must_use]
    pub fn from_env() -> Self {
        let get = |key: &str, default: &str| std::env::var(key).unwrap_or_else(|_| default.into());
        Self {
            ws_url: get("CLOB_WS_URL", "wss://ws-subscriptions-clob.polymarket.com/ws/"),
            rest_url: get("CLOB_REST_URL", "https://clob.polymarket.com"),
            chain_id: get("CHAIN_ID", "137"),
            signature_type: get("SIGNATURE_TYPE", "EOA"),
            private_key: get("PRIVATE_KEY", ""),
            api_key: get("CLOB_API_KEY", ""),
            api_secret: get("CLOB_API_SECRET", ""),
            api_passphrase: get("CLOB_API_PASSPHRASE", ""),
        }
    }

    /// Whether live execution is possible at all.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        !self.api_key.is_empty() && !self.api_secret.is_empty()
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub runtime: RuntimeConfig,
    pub logging: LoggingConfig,
    pub markets: MarketsConfig,
    pub market_metadata: HashMap<String, StaticMarketMeta>,
    pub thresholds: ThresholdConfig,
    pub risk: RiskConfig,
    pub order: OrderConfig,
    pub rate_limits: RateLimitsConfig,
    pub persistence: PersistenceConfig,
    pub trading_safety: TradingSafetyConfig,
    pub snapshot: SnapshotConfig,
    pub safety: SafetyConfig,
    pub gamma: GammaConfig,
    pub control: ControlConfig,
    pub backtest: BacktestConfig,
}

impl Config {
    /// Load a TOML config file and apply environment overrides.
    ///
    /// # Errors
    /// Returns `Error::Config` when the file is unreadable or malformed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!("cannot read {}: {e}", path.as_ref().display()))
        })?;
        let mut config: Self = toml::from_str(&text).map_err(|e| Error::Config(e.to_string()))?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(markets) = std::env::var("MARKETS") {
            self.markets.enabled = markets
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(String::from)
                .collect();
        }
        if let Ok(mode) = std::env::var("BOT_MODE") {
            self.runtime.mode = mode;
        }
        if let Ok(value) = std::env::var("DRY_RUN") {
            self.runtime.dry_run = value.eq_ignore_ascii_case("true");
        }
        if let Ok(value) = std::env::var("START_PAUSED") {
            self.runtime.start_paused = value.eq_ignore_ascii_case("true");
        }
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(db_path) = std::env::var("DB_PATH") {
            self.persistence.db_path = db_path;
        }
        if let Ok(url) = std::env::var("GAMMA_API_URL") {
            self.gamma.gamma_api_url = url;
        }
    }

    pub fn init_logging(&self) {
        self.logging.init();
    }

    #[must_use]
    pub fn venue_env(&self) -> VenueEnv {
        VenueEnv::from_env()
    }

    /// Build the market registry from static config metadata. Markets
    /// without usable metadata enter as invalid so their diagnostic can be
    /// persisted at startup.
    #[must_use]
    pub fn build_registry(&self) -> MarketRegistry {
        let metas = self
            .markets
            .enabled
            .iter()
            .map(|market_id| match self.market_metadata.get(market_id) {
                Some(meta) if !meta.yes_token_id.is_empty() && !meta.no_token_id.is_empty() => {
                    MarketMeta {
                        market_id: MarketId::from(market_id.as_str()),
                        yes_token_id: TokenId::from(meta.yes_token_id.as_str()),
                        no_token_id: TokenId::from(meta.no_token_id.as_str()),
                        tick_size: meta.tick_size,
                        min_order_size: meta.min_order_size,
                        fee_rate: meta.fee_rate,
                        is_binary_yes_no: true,
                        validation_error: None,
                    }
                }
                Some(meta) => MarketMeta {
                    market_id: MarketId::from(market_id.as_str()),
                    yes_token_id: TokenId::from(""),
                    no_token_id: TokenId::from(""),
                    tick_size: meta.tick_size,
                    min_order_size: meta.min_order_size,
                    fee_rate: meta.fee_rate,
                    is_binary_yes_no: false,
                    validation_error: Some("missing yes/no token ids".into()),
                },
                None => MarketMeta {
                    market_id: MarketId::from(market_id.as_str()),
                    yes_token_id: TokenId::from(""),
                    no_token_id: TokenId::from(""),
                    tick_size: dec!(0.001),
                    min_order_size: dec!(1),
                    fee_rate: dec!(0.002),
                    is_binary_yes_no: false,
                    validation_error: Some("missing static metadata".into()),
                },
            })
            .collect();
        MarketRegistry::new(metas, self.markets.allow_nonstandard_yes_no_labels)
    }
}
