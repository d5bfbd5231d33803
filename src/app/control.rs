//! Control surface: command bus and the interactive stdin API.
//!
//! The bus is an in-process queue; anything that can produce a [`Command`]
//! (stdin, signal handlers, future remote surfaces) publishes into it and
//! the engine consumes serially.

use std::collections::HashMap;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::core::domain::{Command, MarketId};

/// Clonable publisher half of the command bus.
#[derive(Clone)]
pub struct CommandBus {
    tx: mpsc::Sender<Command>,
}

impl CommandBus {
    /// Create the bus and the engine's receiving half.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Command>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub async fn publish(&self, command: Command) {
        if self.tx.send(command).await.is_err() {
            warn!("Engine command channel closed");
        }
    }
}

/// Parse one interactive command line.
///
/// Grammar: `pause | resume | flatten | reload | markets on <ids> |
/// markets off <ids> | set k=v ... | backtest | stop`.
#[must_use]
pub fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim().to_lowercase();
    match line.as_str() {
        "pause" => return Some(Command::Pause),
        "resume" => return Some(Command::Resume),
        "flatten" => return Some(Command::Flatten),
        "reload" => return Some(Command::ReloadConfig),
        "backtest" => return Some(Command::Backtest),
        "stop" => return Some(Command::Stop),
        _ => {}
    }
    if let Some(rest) = line.strip_prefix("markets on ") {
        return Some(Command::MarketsOn(parse_market_list(rest)));
    }
    if let Some(rest) = line.strip_prefix("markets off ") {
        return Some(Command::MarketsOff(parse_market_list(rest)));
    }
    if let Some(rest) = line.strip_prefix("set ") {
        let mut params = HashMap::new();
        for token in rest.split_whitespace() {
            if let Some((key, value)) = token.split_once('=') {
                params.insert(key.to_string(), value.to_string());
            }
        }
        if !params.is_empty() {
            return Some(Command::SetParams(params));
        }
    }
    None
}

fn parse_market_list(raw: &str) -> Vec<MarketId> {
    raw.split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(MarketId::from)
        .collect()
}

/// Read commands from stdin until EOF or `stop`.
pub async fn run_stdin_api(bus: CommandBus) {
    info!("Command API ready: pause|resume|flatten|reload|markets on/off|set|backtest|stop");
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    while let Ok(Some(line)) = lines.next_line().await {
        match parse_command(&line) {
            Some(command) => {
                let stop = command == Command::Stop;
                bus.publish(command).await;
                if stop {
                    return;
                }
            }
            None if line.trim().is_empty() => {}
            None => warn!(line = %line.trim(), "Unknown command"),
        }
    }
}
