//! Venue seams: wire messages, REST snapshots, websocket clients, and the
//! execution adapter.

pub mod execution;
pub mod market_ws;
pub mod messages;
pub mod snapshot;
pub mod user_ws;

pub use execution::{
    DryRunExecution, ExecutionClient, ExecutionResponse, PlaceOrderRequest, RestExecution,
};
pub use market_ws::{MarketWsClient, MarketWsCommand};
pub use messages::{redact_payload, MarketSubscribe, UserAuth, UserSubscribe};
pub use snapshot::{SnapshotFetcher, TokenSnapshot};
pub use user_ws::{UserWsClient, UserWsWatchdog};
