// =============================================================================
// UpstreamFeed — the capability FeedAdapter (L3) drives
// =============================================================================
//
// The wire protocol itself is out of scope; only this capability is
// specified. Field codes below (BID=22, ASK=25, TRDPRC_1=6, ACVOL_1=32)
// follow the Elektron/OMM field convention implied by the configured
// `ELEKTRON_DD` service name in RuntimeConfig.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tracing::{info, warn};

use crate::errors::ServiceError;
use crate::types::Ric;

pub const FIELD_BID: u16 = 22;
pub const FIELD_ASK: u16 = 25;
pub const FIELD_TRDPRC_1: u16 = 6;
pub const FIELD_ACVOL_1: u16 = 32;

/// A single field's value as carried on the wire. Kept generic over the two
/// shapes actually used (price vs. count) rather than stringly-typed.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Price(Decimal),
    Count(u64),
}

/// One update frame for a single RIC, as field-code/value pairs — the shape
/// FeedAdapter's extraction step consumes.
#[derive(Debug, Clone)]
pub struct UpstreamMessage {
    pub ric: Ric,
    pub fields: HashMap<u16, FieldValue>,
    pub received_at: DateTime<Utc>,
}

/// The capability an upstream market data feed provides: connection
/// lifecycle, per-RIC registration, and pull-style message dispatch.
#[async_trait]
pub trait UpstreamFeed: Send + Sync {
    /// Establish the upstream session. Idempotent: calling twice while
    /// already connected is a no-op.
    async fn connect(&self) -> Result<(), ServiceError>;

    /// Register interest in a RIC so the upstream begins (or continues)
    /// streaming updates for it.
    async fn register_client(&self, ric: Ric) -> Result<(), ServiceError>;

    /// Withdraw interest in a RIC.
    async fn unregister_client(&self, ric: &Ric);

    /// Pull the next available message, or `None` once the feed has been
    /// disconnected and has nothing left buffered.
    async fn dispatch(&self) -> Option<UpstreamMessage>;

    /// Tear down the upstream session. Further `dispatch` calls return
    /// `None` once any buffered messages are drained.
    async fn disconnect(&self);
}

// =============================================================================
// Reference WebSocket implementation
// =============================================================================

/// Connects to a WebSocket endpoint serving JSON frames shaped as
/// `{"ric": "...", "fields": {"22": "101.50", "25": "101.55", "32": 12000}}`
/// and exposes them as `UpstreamMessage`s.
pub struct WebSocketUpstreamFeed {
    url: String,
    registered: RwLock<std::collections::HashSet<Ric>>,
    inbox_tx: mpsc::Sender<UpstreamMessage>,
    inbox_rx: tokio::sync::Mutex<mpsc::Receiver<UpstreamMessage>>,
    connected: std::sync::atomic::AtomicBool,
    malformed: Arc<AtomicU64>,
}

impl WebSocketUpstreamFeed {
    pub fn new(url: impl Into<String>, inbox_capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(inbox_capacity);
        Self {
            url: url.into(),
            registered: RwLock::new(std::collections::HashSet::new()),
            inbox_tx: tx,
            inbox_rx: tokio::sync::Mutex::new(rx),
            connected: std::sync::atomic::AtomicBool::new(false),
            malformed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Count of frames dropped for failing to parse (§4.3 step a: a
    /// malformed message is counted and skipped, never forwarded to the
    /// adapter).
    pub fn malformed_count(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }

    fn parse_frame(text: &str) -> anyhow::Result<UpstreamMessage> {
        let root: serde_json::Value = serde_json::from_str(text)?;
        let ric_str = root["ric"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("missing field ric"))?;
        let ric = Ric::new(ric_str).map_err(|_| anyhow::anyhow!("empty ric"))?;

        let mut fields = HashMap::new();
        if let Some(obj) = root["fields"].as_object() {
            for (code_str, value) in obj {
                let code: u16 = code_str.parse()?;
                let parsed = match code {
                    FIELD_BID | FIELD_ASK | FIELD_TRDPRC_1 => {
                        let text = value
                            .as_str()
                            .ok_or_else(|| anyhow::anyhow!("field {code} not a string"))?;
                        FieldValue::Price(text.parse::<Decimal>()?)
                    }
                    FIELD_ACVOL_1 => FieldValue::Count(
                        value
                            .as_u64()
                            .ok_or_else(|| anyhow::anyhow!("field {code} not an integer"))?,
                    ),
                    _ => continue,
                };
                fields.insert(code, parsed);
            }
        }

        Ok(UpstreamMessage {
            ric,
            fields,
            received_at: Utc::now(),
        })
    }
}

#[async_trait]
impl UpstreamFeed for WebSocketUpstreamFeed {
    async fn connect(&self) -> Result<(), ServiceError> {
        if self.connected.load(Ordering::Acquire) {
            return Ok(());
        }
        info!(url = %self.url, "connecting to upstream feed");
        let (ws_stream, _response) = connect_async(&self.url)
            .await
            .map_err(|_| ServiceError::FeedUnavailable)?;
        self.connected.store(true, Ordering::Release);

        let (_write, mut read) = ws_stream.split();
        let tx = self.inbox_tx.clone();
        let malformed = self.malformed.clone();
        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(tokio_tungstenite::tungstenite::Message::Text(text)) => {
                        match Self::parse_frame(&text) {
                            Ok(msg) => {
                                if tx.send(msg).await.is_err() {
                                    break;
                                }
                            }
                            Err(err) => {
                                malformed.fetch_add(1, Ordering::Relaxed);
                                warn!(error = %err, "malformed upstream frame");
                            }
                        }
                    }
                    Ok(_) => continue,
                    Err(err) => {
                        warn!(error = %err, "upstream read error");
                        break;
                    }
                }
            }
        });
        Ok(())
    }

    async fn register_client(&self, ric: Ric) -> Result<(), ServiceError> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(ServiceError::FeedUnavailable);
        }
        self.registered.write().insert(ric);
        Ok(())
    }

    async fn unregister_client(&self, ric: &Ric) {
        self.registered.write().remove(ric);
    }

    async fn dispatch(&self) -> Option<UpstreamMessage> {
        self.inbox_rx.lock().await.recv().await
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
        self.registered.write().clear();
    }
}

// =============================================================================
// Synthetic in-memory feed — test double for unit and end-to-end tests
// =============================================================================

/// A controllable `UpstreamFeed` used by tests: messages are injected via
/// [`InMemoryUpstreamFeed::push`], and `connect`/`disconnect` simply flip a
/// flag so tests can exercise FeedUnavailable handling deterministically.
pub struct InMemoryUpstreamFeed {
    tx: mpsc::Sender<UpstreamMessage>,
    rx: tokio::sync::Mutex<mpsc::Receiver<UpstreamMessage>>,
    connected: std::sync::atomic::AtomicBool,
    registered: RwLock<std::collections::HashSet<Ric>>,
}

impl InMemoryUpstreamFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            connected: std::sync::atomic::AtomicBool::new(false),
            registered: RwLock::new(std::collections::HashSet::new()),
        }
    }

    /// Inject a message as if it had arrived from the wire.
    pub async fn push(&self, message: UpstreamMessage) {
        let _ = self.tx.send(message).await;
    }

    pub fn is_registered(&self, ric: &Ric) -> bool {
        self.registered.read().contains(ric)
    }
}

#[async_trait]
impl UpstreamFeed for InMemoryUpstreamFeed {
    async fn connect(&self) -> Result<(), ServiceError> {
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    async fn register_client(&self, ric: Ric) -> Result<(), ServiceError> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(ServiceError::FeedUnavailable);
        }
        self.registered.write().insert(ric);
        Ok(())
    }

    async fn unregister_client(&self, ric: &Ric) {
        self.registered.write().remove(ric);
    }

    async fn dispatch(&self) -> Option<UpstreamMessage> {
        self.rx.lock().await.recv().await
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
        self.registered.write().clear();
    }
}

/// Build a single-field price update message, for tests and for the
/// reference field-extraction helper in `feed_adapter`.
pub fn price_message(ric: &Ric, bid: Decimal, ask: Decimal) -> UpstreamMessage {
    let mut fields = HashMap::new();
    fields.insert(FIELD_BID, FieldValue::Price(bid));
    fields.insert(FIELD_ASK, FieldValue::Price(ask));
    UpstreamMessage {
        ric: ric.clone(),
        fields,
        received_at: Utc::now(),
    }
}
