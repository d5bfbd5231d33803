//! Application layer - configuration and the control surface.

pub mod config;
pub mod control;

pub use config::{Config, LoggingConfig, VenueEnv};
pub use control::{parse_command, run_stdin_api, CommandBus};
