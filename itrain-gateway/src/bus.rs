//! JSON-lines client for the device configuration bus.
//!
//! One TCP connection carries newline-delimited JSON messages tagged by
//! `type`:
//!
//! ```text
//! {"type":"request","id":7,"action":"get_szyc","token":"..","body":{..}}
//! {"type":"response","id":7,"body":{..}}            or with "error":".."
//! {"type":"notice","event":"set_szyc","body":{..}}  bus -> gateway
//! {"type":"event","event":"set_osd","body":{..}}    gateway -> bus
//! ```
//!
//! Each request registers a oneshot waiter under its id; the reader task
//! resolves it when the matching response arrives and hands notices to
//! whoever holds the [`Notices`] receiver.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};

use itrain_core::{EventPublisher, GatewayError, RpcClient};

/// Longest line accepted from the bus.
const MAX_LINE: usize = 64 * 1024;

// ── Wire messages ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BusMessage {
    Request {
        id: u64,
        action: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        token: String,
        #[serde(default)]
        body: Value,
    },
    Response {
        id: u64,
        #[serde(default)]
        body: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Notice {
        event: String,
        #[serde(default)]
        body: Value,
    },
    Event {
        event: String,
        #[serde(default)]
        body: Value,
    },
}

impl BusMessage {
    pub fn to_line(&self) -> Result<String, GatewayError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_line(line: &str) -> Result<Self, GatewayError> {
        Ok(serde_json::from_str(line)?)
    }
}

/// Inbound notices as `(event, body)`.
pub type Notices = mpsc::UnboundedReceiver<(String, Value)>;

// ── Pending requests ─────────────────────────────────────────────

type Waiter = oneshot::Sender<Result<Value, GatewayError>>;

#[derive(Default)]
struct PendingState {
    waiters: HashMap<u64, Waiter>,
    closed: bool,
}

#[derive(Default)]
struct Pending {
    state: Mutex<PendingState>,
}

impl Pending {
    fn lock(&self) -> MutexGuard<'_, PendingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, id: u64) -> Result<oneshot::Receiver<Result<Value, GatewayError>>, GatewayError> {
        let mut state = self.lock();
        if state.closed {
            return Err(GatewayError::ChannelClosed);
        }
        let (tx, rx) = oneshot::channel();
        state.waiters.insert(id, tx);
        Ok(rx)
    }

    /// Hand `result` to the waiter for `id`; false when nobody waits.
    fn resolve(&self, id: u64, result: Result<Value, GatewayError>) -> bool {
        match self.lock().waiters.remove(&id) {
            Some(waiter) => waiter.send(result).is_ok(),
            None => false,
        }
    }

    fn cancel(&self, id: u64) {
        self.lock().waiters.remove(&id);
    }

    /// Fail every waiter and refuse new ones.
    fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.waiters.clear();
    }

    fn len(&self) -> usize {
        self.lock().waiters.len()
    }
}

/// Drops the waiter when the caller stops waiting, e.g. on timeout.
struct PendingGuard<'a> {
    pending: &'a Pending,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.cancel(self.id);
    }
}

// ── BusClient ────────────────────────────────────────────────────

/// Bus connection implementing [`RpcClient`] and [`EventPublisher`].
pub struct BusClient {
    outbound: mpsc::UnboundedSender<String>,
    pending: Arc<Pending>,
    next_id: AtomicU64,
    token: String,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl BusClient {
    /// Connect to the bus at `address` within `timeout`.
    pub async fn connect(
        address: &str,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<(Self, Notices), GatewayError> {
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
            Ok(stream) => stream?,
            Err(_) => {
                return Err(GatewayError::Connection(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("bus at {address} did not answer within {timeout:?}"),
                )));
            }
        };
        info!(address, "bus connected");
        Ok(Self::from_stream(stream, token))
    }

    /// Wrap an already connected stream.
    pub fn from_stream(stream: TcpStream, token: impl Into<String>) -> (Self, Notices) {
        let (read_half, write_half) = stream.into_split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (notices_tx, notices) = mpsc::unbounded_channel();
        let pending = Arc::new(Pending::default());

        let reader = tokio::spawn(read_loop(read_half, Arc::clone(&pending), notices_tx));
        let writer = tokio::spawn(write_loop(write_half, outbound_rx));

        let client = Self {
            outbound,
            pending,
            next_id: AtomicU64::new(1),
            token: token.into(),
            reader,
            writer,
        };
        (client, notices)
    }

    /// False once the bus hung up.
    pub fn is_connected(&self) -> bool {
        !self.reader.is_finished()
    }

    fn send(&self, message: &BusMessage) -> Result<(), GatewayError> {
        self.outbound
            .send(message.to_line()?)
            .map_err(|_| GatewayError::ChannelClosed)
    }
}

impl Drop for BusClient {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

#[async_trait]
impl RpcClient for BusClient {
    async fn invoke_action(&self, action: &str, body: Value) -> Result<Value, GatewayError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let waiter = self.pending.register(id)?;
        let _guard = PendingGuard {
            pending: self.pending.as_ref(),
            id,
        };

        self.send(&BusMessage::Request {
            id,
            action: action.to_string(),
            token: self.token.clone(),
            body,
        })?;
        debug!(id, action, "bus request sent");

        waiter.await.map_err(|_| GatewayError::ChannelClosed)?
    }
}

impl EventPublisher for BusClient {
    fn publish(&self, event: &str, body: Value) {
        let message = BusMessage::Event {
            event: event.to_string(),
            body,
        };
        if let Err(e) = self.send(&message) {
            debug!(event, error = %e, "event dropped");
        }
    }
}

// ── I/O tasks ────────────────────────────────────────────────────

async fn read_loop(
    read_half: OwnedReadHalf,
    pending: Arc<Pending>,
    notices: mpsc::UnboundedSender<(String, Value)>,
) {
    let mut lines = FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_LINE));

    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(line) => line,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                warn!(max = MAX_LINE, "bus line too long, skipped");
                continue;
            }
            Err(e) => {
                warn!(error = %e, "bus read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match BusMessage::from_line(&line) {
            Ok(BusMessage::Response { id, body, error }) => {
                let result = match error {
                    Some(reason) => Err(GatewayError::Rpc(reason)),
                    None => Ok(body),
                };
                if !pending.resolve(id, result) {
                    debug!(id, "response for a request nobody waits on");
                }
            }
            Ok(BusMessage::Notice { event, body }) => {
                if notices.send((event, body)).is_err() {
                    debug!("notice dropped, no listener");
                }
            }
            Ok(other) => debug!(?other, "unexpected bus message"),
            Err(e) => warn!(error = %e, "undecodable bus line"),
        }
    }

    info!("bus connection closed");
    pending.close();
}

async fn write_loop(write_half: OwnedWriteHalf, mut outbound: mpsc::UnboundedReceiver<String>) {
    let mut sink = FramedWrite::new(write_half, LinesCodec::new());
    while let Some(line) = outbound.recv().await {
        if let Err(e) = sink.send(line).await {
            warn!(error = %e, "bus write failed");
            break;
        }
    }
}
