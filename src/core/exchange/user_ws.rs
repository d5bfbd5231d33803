//! Private user-trading websocket client.
//!
//! Acks, fills, cancels and rejects arrive here; they are the source of
//! truth for order state. Every received frame touches the watchdog — if
//! the stream goes silent past its timeout the engine flattens to SAFE.

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{error, info, warn};

use crate::core::domain::NormalizedEvent;
use crate::core::exchange::messages::UserSubscribe;
use crate::core::normalize::Normalizer;
use crate::error::{Error, Result};

const INITIAL_BACKOFF_SECS: u64 = 1;
const MAX_BACKOFF_SECS: u64 = 30;

/// Liveness watchdog for the user stream, shared with the engine.
#[derive(Debug)]
pub struct UserWsWatchdog {
    timeout_sec: i64,
    last_event: Mutex<DateTime<Utc>>,
}

impl UserWsWatchdog {
    #[must_use]
    pub fn new(timeout_sec: i64) -> Self {
        Self {
            timeout_sec,
            last_event: Mutex::new(Utc::now()),
        }
    }

    pub fn touch(&self) {
        *self.last_event.lock() = Utc::now();
    }

    #[must_use]
    pub fn is_timed_out(&self, now: DateTime<Utc>) -> bool {
        (now - *self.last_event.lock()).num_seconds() > self.timeout_sec
    }
}

/// User websocket client task.
pub struct UserWsClient {
    ws_url: String,
    subscribe: UserSubscribe,
    normalizer: Normalizer,
    events: mpsc::Sender<NormalizedEvent>,
    watchdog: std::sync::Arc<UserWsWatchdog>,
    stop: watch::Receiver<bool>,
    backoff_secs: u64,
}

impl UserWsClient {
    #[must_use]
    pub fn new(
        ws_url: String,
        subscribe: UserSubscribe,
        normalizer: Normalizer,
        events: mpsc::Sender<NormalizedEvent>,
        watchdog: std::sync::Arc<UserWsWatchdog>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            ws_url,
            subscribe,
            normalizer,
            events,
            watchdog,
            stop,
            backoff_secs: INITIAL_BACKOFF_SECS,
        }
    }

    pub async fn run(mut self) {
        loop {
            if *self.stop.borrow() {
                return;
            }
            match self.session().await {
                Ok(()) => return,
                Err(e) => {
                    error!(error = %e, "User WS disconnected");
                }
            }
            let backoff = Duration::from_secs(self.backoff_secs);
            self.backoff_secs = (self.backoff_secs * 2).min(MAX_BACKOFF_SECS);
            tokio::select! {
                () = sleep(backoff) => {}
                _ = self.stop.changed() => return,
            }
        }
    }

    async fn session(&mut self) -> Result<()> {
        let (mut ws, _) = connect_async(&self.ws_url).await?;

        info!(payload = %self.subscribe.redacted(), "User WS subscribing");
        ws.send(Message::Text(serde_json::to_string(&self.subscribe)?)).await?;
        info!("User WS connected");
        self.backoff_secs = INITIAL_BACKOFF_SECS;

        loop {
            tokio::select! {
                _ = self.stop.changed() => return Ok(()),
                frame = ws.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.handle_text(&text).await,
                    Some(Ok(Message::Ping(data))) => ws.send(Message::Pong(data)).await?,
                    Some(Ok(Message::Close(frame))) => {
                        return Err(Error::Connection(format!(
                            "user ws closed by server: {frame:?}"
                        )));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => return Err(Error::Connection("user stream ended".into())),
                },
            }
        }
    }

    async fn handle_text(&mut self, text: &str) {
        let raw: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Malformed user frame dropped");
                return;
            }
        };
        if let Some(event) = self.normalizer.from_user_frame(raw, Utc::now()) {
            self.watchdog.touch();
            if self.events.send(event).await.is_err() {
                warn!("Event queue closed; dropping user event");
            }
        }
    }
}
