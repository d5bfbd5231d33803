//! Control-bus commands.

use std::collections::HashMap;

use super::MarketId;

/// Commands accepted by the engine over the control bus.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Pause,
    Resume,
    Flatten,
    MarketsOn(Vec<MarketId>),
    MarketsOff(Vec<MarketId>),
    /// Parameter overrides, e.g. `min_edge_threshold=0.01`.
    SetParams(HashMap<String, String>),
    ReloadConfig,
    Backtest,
    Stop,
}
