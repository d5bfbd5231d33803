//! Bookedge - Arbitrage engine for binary prediction-market order books.
//!
//! # Architecture
//!
//! ```text
//! src/
//! ├── core/             # The trading engine and its subsystems
//! │   ├── domain/       # Pure domain types
//! │   ├── market/       # Market registry + per-market rules
//! │   ├── exchange/     # Venue seams: WS clients, snapshots, execution
//! │   ├── db/           # Diesel schema and models
//! │   └── ...           # book store, order SM, risk, strategy, engine
//! └── app/              # Configuration and the control surface
//! ```
//!
//! The engine core runs as a single task: every order, position, and risk
//! mutation happens on one logical owner fed by a bounded event queue.

pub mod app;
pub mod core;
pub mod error;
