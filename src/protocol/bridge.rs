//! WebSocket bridge client
//!
//! Talks to a bridge sidecar that runs the real multi-device protocol
//! stack. One WebSocket carries one protocol connection. All frames are
//! JSON text tagged by `type`.
//!
//! Outbound:
//! - `connect` - first frame, carries stored credentials and client options
//! - `on_whatsapp` - registration query, correlated by `id`
//! - `close` - end the protocol connection
//!
//! Inbound:
//! - `qr`, `open`, `close` - connection lifecycle
//! - `creds_update` - credential changes to persist
//! - `result` / `error` - answer to a query with the same `id`

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, warn};

use super::{
    ConnectionEvent, DisconnectReason, EventSender, ProtocolClient, ProtocolError, ProtocolEvent,
    RegistrationEntry, Session,
};
use crate::credentials::{Credentials, CredentialsUpdate};
use crate::phone::PhoneAddress;

/// Outstanding queries awaiting a `result` or `error` frame
type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Vec<RegistrationEntry>, ProtocolError>>>>>;

/// Client options forwarded to the bridge or enforced locally
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    /// Browser name shown in the phone's linked devices list
    pub browser_name: String,
    /// Cap on establishing the WebSocket
    pub connect_timeout: Duration,
    /// Cap on a single registration query
    pub query_timeout: Duration,
    /// How long the bridge keeps one QR code valid
    pub qr_timeout: Duration,
    /// Delay the bridge waits before re-sending a failed request
    pub retry_request_delay: Duration,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            browser_name: "WhatsApp Check API".to_string(),
            connect_timeout: Duration::from_secs(60),
            query_timeout: Duration::from_secs(20),
            qr_timeout: Duration::from_secs(40),
            retry_request_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutboundFrame<'a> {
    Connect {
        browser: [&'a str; 3],
        credentials: &'a Credentials,
        qr_timeout_ms: u64,
        retry_request_delay_ms: u64,
    },
    OnWhatsapp {
        id: u64,
        jids: Vec<&'a str>,
    },
    Close,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InboundFrame {
    Qr {
        code: String,
    },
    Open,
    Close {
        #[serde(default)]
        status_code: Option<u16>,
        #[serde(default)]
        reason: Option<String>,
    },
    CredsUpdate {
        #[serde(default)]
        creds: Option<Value>,
        #[serde(default)]
        keys: BTreeMap<String, Option<Value>>,
    },
    Result {
        id: u64,
        #[serde(default)]
        entries: Vec<RegistrationEntry>,
    },
    Error {
        #[serde(default)]
        id: Option<u64>,
        message: String,
    },
}

fn encode(frame: &OutboundFrame<'_>) -> Result<String, ProtocolError> {
    serde_json::to_string(frame).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Protocol client backed by a bridge sidecar
pub struct BridgeClient {
    url: String,
    options: BridgeOptions,
}

impl BridgeClient {
    pub fn new(url: impl Into<String>, options: BridgeOptions) -> Self {
        Self {
            url: url.into(),
            options,
        }
    }
}

#[async_trait::async_trait]
impl ProtocolClient for BridgeClient {
    async fn connect(
        &self,
        credentials: Credentials,
        events: EventSender,
    ) -> Result<Arc<dyn Session>, ProtocolError> {
        info!("Connecting to protocol bridge at {}", self.url);

        let (ws_stream, _) = timeout(self.options.connect_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| ProtocolError::Timeout)?
            .map_err(|e| ProtocolError::Connect(e.to_string()))?;

        let (mut ws_sink, ws_stream) = ws_stream.split();

        let hello = encode(&OutboundFrame::Connect {
            browser: [self.options.browser_name.as_str(), "Chrome", "1.0.0"],
            credentials: &credentials,
            qr_timeout_ms: self.options.qr_timeout.as_millis() as u64,
            retry_request_delay_ms: self.options.retry_request_delay.as_millis() as u64,
        })?;
        ws_sink
            .send(Message::Text(hello))
            .await
            .map_err(|e| ProtocolError::Transport(e.to_string()))?;

        let (tx, rx) = mpsc::channel::<Message>(64);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        tokio::spawn(write_loop(ws_sink, rx));
        tokio::spawn(read_loop(
            ws_stream,
            events,
            Arc::clone(&pending),
            Arc::clone(&closed),
        ));

        debug!("Bridge transport up, waiting for connection events");

        Ok(Arc::new(BridgeSession {
            tx,
            pending,
            next_id: AtomicU64::new(1),
            query_timeout: self.options.query_timeout,
            closed,
        }))
    }
}

/// One bridged protocol connection
struct BridgeSession {
    tx: mpsc::Sender<Message>,
    pending: PendingMap,
    next_id: AtomicU64,
    query_timeout: Duration,
    closed: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl Session for BridgeSession {
    async fn query_registration(
        &self,
        address: &PhoneAddress,
    ) -> Result<Vec<RegistrationEntry>, ProtocolError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ProtocolError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = encode(&OutboundFrame::OnWhatsapp {
            id,
            jids: vec![address.as_str()],
        })?;

        let (response_tx, response_rx) = oneshot::channel();
        self.pending.lock().await.insert(id, response_tx);

        if self.tx.send(Message::Text(frame)).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(ProtocolError::Closed);
        }

        match timeout(self.query_timeout, response_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ProtocolError::Closed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(ProtocolError::Timeout)
            }
        }
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Ok(frame) = encode(&OutboundFrame::Close) {
            let _ = self.tx.send(Message::Text(frame)).await;
        }
        let _ = self.tx.send(Message::Close(None)).await;
    }
}

/// Forward queued frames to the socket until the session closes it
async fn write_loop<S>(mut ws_sink: S, mut rx: mpsc::Receiver<Message>)
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(msg) = rx.recv().await {
        let is_close = matches!(msg, Message::Close(_));
        if let Err(e) = ws_sink.send(msg).await {
            warn!("Bridge write failed: {}", e);
            break;
        }
        if is_close {
            break;
        }
    }
    let _ = ws_sink.close().await;
}

/// Turn inbound frames into events and query answers.
///
/// Always ends with exactly one `Closed` event on `events`, synthesized if
/// the bridge never sent a `close` frame.
async fn read_loop<S, E>(
    mut ws_stream: S,
    events: EventSender,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
) where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut close_reported = false;

    while let Some(msg) = ws_stream.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<InboundFrame>(&text) {
                Ok(frame) => {
                    if dispatch(frame, &events, &pending).await {
                        close_reported = true;
                    }
                }
                Err(e) => {
                    warn!("Ignoring malformed bridge frame: {}", e);
                }
            },
            Ok(Message::Close(frame)) => {
                debug!("Bridge closed the socket: {:?}", frame);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Bridge connection error: {}", e);
                break;
            }
        }
    }

    closed.store(true, Ordering::Release);

    for (_, waiter) in pending.lock().await.drain() {
        let _ = waiter.send(Err(ProtocolError::Closed));
    }

    if !close_reported {
        let _ = events.send(ProtocolEvent::Connection(ConnectionEvent::Closed(
            DisconnectReason::connection_lost(),
        )));
    }
}

/// Handle one inbound frame. Returns true if it reported a close.
async fn dispatch(frame: InboundFrame, events: &EventSender, pending: &PendingMap) -> bool {
    match frame {
        InboundFrame::Qr { code } => {
            let _ = events.send(ProtocolEvent::Connection(ConnectionEvent::QrPresented(code)));
        }
        InboundFrame::Open => {
            let _ = events.send(ProtocolEvent::Connection(ConnectionEvent::Opened));
        }
        InboundFrame::Close {
            status_code,
            reason,
        } => {
            let reason = DisconnectReason {
                status_code,
                message: reason,
            };
            let _ = events.send(ProtocolEvent::Connection(ConnectionEvent::Closed(reason)));
            return true;
        }
        InboundFrame::CredsUpdate { creds, keys } => {
            let _ = events.send(ProtocolEvent::CredentialsUpdated(CredentialsUpdate {
                creds,
                keys,
            }));
        }
        InboundFrame::Result { id, entries } => {
            if let Some(waiter) = pending.lock().await.remove(&id) {
                let _ = waiter.send(Ok(entries));
            } else {
                debug!(id, "Dropping result for unknown or expired query");
            }
        }
        InboundFrame::Error { id: Some(id), message } => {
            if let Some(waiter) = pending.lock().await.remove(&id) {
                let _ = waiter.send(Err(ProtocolError::Remote(message)));
            } else {
                debug!(id, "Dropping error for unknown or expired query: {}", message);
            }
        }
        InboundFrame::Error { id: None, message } => {
            warn!("Bridge error: {}", message);
        }
    }
    false
}
