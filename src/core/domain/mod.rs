//! Core domain types for bookedge.
//!
//! ## Identifier Types
//!
//! - [`MarketId`] - Unique market identifier
//! - [`TokenId`] - Unique outcome-token identifier
//!
//! ## Event Types
//!
//! - [`NormalizedEvent`] - Canonical event produced by the normalizer
//! - [`EventKind`] - Event discriminant used for routing and persistence
//! - [`Command`] - Control-bus commands
//!
//! ## Order Types
//!
//! - [`Intent`] - A strategy decision (place / cancel / noop)
//! - [`ManagedOrder`] - An order owned by the order state machine
//! - [`OrderStatus`] - Order lifecycle states
//! - [`OrderDecision`] - Outcome of processing an intent
//!
//! ## Position Types
//!
//! - [`Position`] - Signed position per (market, token)
//! - [`FillRecord`] - A single execution against one of our orders

mod command;
mod event;
mod id;
mod order;
mod position;
mod state;

pub use command::Command;
pub use event::{EventKind, NormalizedEvent};
pub use id::{MarketId, TokenId};
pub use order::{
    Intent, IntentKind, ManagedOrder, OrderDecision, OrderStatus, Side, TimeInForce,
};
pub use position::{FillRecord, Position};
pub use state::EngineState;
