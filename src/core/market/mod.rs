//! Market registry and per-market trading rules.

mod registry;
mod rules;

pub use registry::{MarketMeta, MarketRegistry, SharedRegistry};
pub use rules::MarketRules;
