//! Public market-data websocket client.
//!
//! Owns the connection lifecycle: exponential-backoff reconnects, per-market
//! snapshot resync on (re)connect, subscribe, and frame handling. Book
//! updates are validated against the store's invariants before they are
//! forwarded; an anomalous book pauses the market and triggers a resync
//! instead of reaching the engine.

use std::collections::HashSet;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{error, info, warn};

use crate::core::book::{BookAnomaly, SharedBookStore};
use crate::core::domain::{EventKind, MarketId, NormalizedEvent};
use crate::core::exchange::messages::MarketSubscribe;
use crate::core::exchange::snapshot::SnapshotFetcher;
use crate::core::market::SharedRegistry;
use crate::core::normalize::{parse_levels, Normalizer};
use crate::error::{Error, Result};

const INITIAL_BACKOFF_SECS: u64 = 1;
const MAX_BACKOFF_SECS: u64 = 30;

/// Control messages from the engine to the market WS task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketWsCommand {
    /// Re-snapshot every subscribed market (queue watermark recovery).
    ResyncAll,
}

/// Market websocket client task.
pub struct MarketWsClient {
    ws_url: String,
    markets: Vec<MarketId>,
    registry: SharedRegistry,
    normalizer: Normalizer,
    events: mpsc::Sender<NormalizedEvent>,
    books: SharedBookStore,
    snapshots: SnapshotFetcher,
    require_nonempty_active_book: bool,
    control: mpsc::Receiver<MarketWsCommand>,
    stop: watch::Receiver<bool>,
    paused: HashSet<MarketId>,
    backoff_secs: u64,
}

impl MarketWsClient {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        ws_url: String,
        markets: Vec<MarketId>,
        registry: SharedRegistry,
        normalizer: Normalizer,
        events: mpsc::Sender<NormalizedEvent>,
        books: SharedBookStore,
        snapshots: SnapshotFetcher,
        require_nonempty_active_book: bool,
        control: mpsc::Receiver<MarketWsCommand>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            ws_url,
            markets,
            registry,
            normalizer,
            events,
            books,
            snapshots,
            require_nonempty_active_book,
            control,
            stop,
            paused: HashSet::new(),
            backoff_secs: INITIAL_BACKOFF_SECS,
        }
    }

    /// Connection loop: reconnect with capped exponential backoff until the
    /// stop flag is set.
    pub async fn run(mut self) {
        loop {
            if *self.stop.borrow() {
                return;
            }
            match self.session().await {
                Ok(()) => return,
                Err(e) => {
                    error!(error = %e, "Market WS disconnected");
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

    /// One connection: resync, subscribe, then stream until close or error.
    /// Returns `Ok(())` only when stop was requested.
    async fn session(&mut self) -> Result<()> {
        let (mut ws, _) = connect_async(&self.ws_url).await?;

        for market in self.markets.clone() {
            self.resync_market(&market).await;
        }

        let subscribe = MarketSubscribe::new(
            self.markets.iter().map(ToString::to_string).collect(),
        );
        ws.send(Message::Text(serde_json::to_string(&subscribe)?)).await?;
        info!(markets = self.markets.len(), "Market WS connected");
        self.backoff_secs = INITIAL_BACKOFF_SECS;

        loop {
            tokio::select! {
                _ = self.stop.changed() => return Ok(()),
                Some(cmd) = self.control.recv() => match cmd {
                    MarketWsCommand::ResyncAll => self.resync_all().await,
                },
                frame = ws.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.handle_text(&text).await,
                    Some(Ok(Message::Ping(data))) => ws.send(Message::Pong(data)).await?,
                    Some(Ok(Message::Close(frame))) => {
                        return Err(Error::Connection(format!(
                            "market ws closed by server: {frame:?}"
                        )));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => return Err(Error::Connection("market stream ended".into())),
                },
            }
        }
    }

    async fn handle_text(&mut self, text: &str) {
        let raw: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Malformed market frame dropped");
                return;
            }
        };
        let Some(event) = self.normalizer.from_market_frame(raw, chrono::Utc::now()) else {
            return;
        };
        if self.paused.contains(&event.market_id) {
            return;
        }
        if event.kind == EventKind::OrderBookUpdate {
            if let Err(anomaly) = self.apply_book(&event) {
                warn!(
                    market_id = %event.market_id,
                    anomaly = %anomaly,
                    "Book anomaly; pausing market and resyncing"
                );
                let market_id = event.market_id.clone();
                self.paused.insert(market_id.clone());
                self.resync_market(&market_id).await;
                return;
            }
        }
        // Bounded queue: producers block here under backpressure.
        if self.events.send(event).await.is_err() {
            warn!("Event queue closed; dropping market event");
        }
    }

    fn apply_book(&self, event: &NormalizedEvent) -> std::result::Result<(), BookAnomaly> {
        let Some(token_id) = event.token_id.clone() else {
            return Ok(());
        };
        let bids = parse_levels(event.payload.get("bids"));
        let asks = parse_levels(event.payload.get("asks"));
        let active = event
            .payload
            .get("market_active")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        self.books
            .write()
            .upsert(
                event.market_id.clone(),
                token_id,
                bids,
                asks,
                event.recv_ts,
                event.exchange_ts,
                active,
                self.require_nonempty_active_book,
            )
            .map(|_| ())
    }

    async fn resync_all(&mut self) {
        for market in self.markets.clone() {
            self.resync_market(&market).await;
        }
    }

    /// Sequence-independent recovery: pause the market, rehydrate both token
    /// books from REST snapshots, then unpause. Any failure leaves the
    /// market paused for the next attempt.
    pub async fn resync_market(&mut self, market_id: &MarketId) {
        self.paused.insert(market_id.clone());

        let meta = self.registry.read().get_binary(market_id).cloned();
        let Some(meta) = meta else {
            warn!(market_id = %market_id, "Resync skipped: no binary mapping");
            return;
        };

        let (yes, no) = tokio::join!(
            self.snapshots.fetch(&meta.yes_token_id),
            self.snapshots.fetch(&meta.no_token_id),
        );
        let (yes, no) = match (yes, no) {
            (Ok(yes), Ok(no)) => (yes, no),
            (yes, no) => {
                let err = yes.err().or(no.err()).map(|e| e.to_string()).unwrap_or_default();
                error!(market_id = %market_id, error = %err, "Resync snapshot fetch failed");
                return;
            }
        };

        let now = chrono::Utc::now();
        let mut books = self.books.write();
        for snap in [yes, no] {
            if let Err(anomaly) = books.upsert(
                market_id.clone(),
                snap.token_id.clone(),
                snap.bids,
                snap.asks,
                now,
                snap.exchange_ts,
                snap.market_active,
                self.require_nonempty_active_book,
            ) {
                error!(
                    market_id = %market_id,
                    token_id = %snap.token_id,
                    anomaly = %anomaly,
                    "Resync snapshot violated book invariants; market stays paused"
                );
                return;
            }
        }
        drop(books);

        self.paused.remove(market_id);
        info!(market_id = %market_id, "Market resynced");
    }
}
