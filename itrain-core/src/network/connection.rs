//! One accepted train-controller connection.
//!
//! The socket is split between two background tasks that only move bytes:
//! the reader cuts frames out of a bounded [`FrameBuffer`] and forwards
//! them to the reactor, the writer drains an outbound queue through
//! [`TrainCodec`]. Everything stateful (timers, dialect session) stays on
//! the [`Connection`] value, which the reactor owns exclusively.
//!
//! Dropping a `Connection` stops both tasks, closes the socket and runs the
//! dialect's deinit hook, whatever path led to the drop.

use std::net::SocketAddr;

use futures::SinkExt;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::codec::FramedWrite;
use tracing::{debug, info, trace};

use crate::codec::{DEFAULT_BUFFER_CAPACITY, FrameBuffer, TrainCodec};
use crate::error::GatewayError;
use crate::frame::Frame;
use crate::header::FRAME_OVERHEAD;
use crate::protocol::{Dialect, HeartbeatConfig, Session};
use crate::timeout::{TimeoutRegistry, TimerSlot};

pub type ConnId = u64;

/// Frames queued towards one peer before sends start failing.
const OUTBOUND_QUEUE: usize = 32;

/// What a reader task reports to the reactor.
#[derive(Debug)]
pub enum ConnEvent {
    /// A checksum-valid frame, in arrival order.
    Frame { id: ConnId, frame: Frame },
    /// The reader stopped. `error` is `None` on an orderly hangup.
    Closed {
        id: ConnId,
        error: Option<GatewayError>,
    },
}

/// Public description of a live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: ConnId,
    pub peer: SocketAddr,
    pub dialect: Dialect,
}

#[derive(Debug, Clone, Copy)]
pub struct ConnectionOptions {
    /// Receive buffer capacity; also the largest accepted frame.
    pub buffer_capacity: usize,
    pub heartbeat: HeartbeatConfig,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

pub struct Connection {
    info: ConnectionInfo,
    outbound: mpsc::Sender<Frame>,
    timers: TimeoutRegistry,
    session: Session,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Connection {
    /// Take ownership of an accepted stream and start its I/O tasks.
    pub fn spawn(
        id: ConnId,
        stream: TcpStream,
        dialect: Dialect,
        options: &ConnectionOptions,
        events: mpsc::Sender<ConnEvent>,
        now: Instant,
    ) -> Result<Self, GatewayError> {
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let capacity = options.buffer_capacity.max(FRAME_OVERHEAD);

        let (read_half, write_half) = stream.into_split();
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let reader = tokio::spawn(read_loop(id, read_half, capacity, events));
        let writer = tokio::spawn(write_loop(id, write_half, outbound_rx));

        let mut timers = TimeoutRegistry::new(now);
        dialect.init_connection(&mut timers, &options.heartbeat, now);

        info!(id, %peer, %dialect, "connection accepted");

        Ok(Self {
            info: ConnectionInfo { id, peer, dialect },
            outbound,
            timers,
            session: dialect.new_session(),
            reader,
            writer,
        })
    }

    pub fn id(&self) -> ConnId {
        self.info.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.info.peer
    }

    pub fn dialect(&self) -> Dialect {
        self.info.dialect
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Queue a frame for the writer without waiting.
    pub fn send(&self, frame: Frame) -> Result<(), GatewayError> {
        self.outbound.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => GatewayError::QueueFull,
            TrySendError::Closed(_) => GatewayError::ChannelClosed,
        })
    }

    /// Any valid frame proves the peer alive.
    pub fn frame_received(&mut self, now: Instant) {
        self.timers.reset(TimerSlot::RecvHeartbeat, now);
    }

    /// Slots that fired since the last sweep.
    pub fn expired_timers(&mut self, now: Instant) -> Vec<TimerSlot> {
        self.timers.sweep(now)
    }

    pub fn timers(&self) -> &TimeoutRegistry {
        &self.timers
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
        self.info.dialect.deinit_connection(&self.session);
        info!(id = self.info.id, peer = %self.info.peer, "connection closed");
    }
}

// ── I/O tasks ────────────────────────────────────────────────────

async fn read_loop(
    id: ConnId,
    mut reader: OwnedReadHalf,
    capacity: usize,
    events: mpsc::Sender<ConnEvent>,
) {
    let mut buffer = FrameBuffer::new(capacity);
    let mut chunk = vec![0u8; capacity];

    let error = loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break None,
            Ok(n) => n,
            Err(e) => break Some(GatewayError::from(e)),
        };
        trace!(id, bytes = n, "read");

        match forward_frames(id, &mut buffer, &chunk[..n], &events).await {
            Ok(true) => {}
            // Reactor is gone.
            Ok(false) => return,
            Err(e) => break Some(e),
        }
    };

    let _ = events.send(ConnEvent::Closed { id, error }).await;
}

/// Push `data` through the buffer, forwarding every complete frame.
async fn forward_frames(
    id: ConnId,
    buffer: &mut FrameBuffer,
    mut data: &[u8],
    events: &mpsc::Sender<ConnEvent>,
) -> Result<bool, GatewayError> {
    while !data.is_empty() {
        let taken = buffer.fill(data);
        data = &data[taken..];
        while let Some(frame) = buffer.take_frame()? {
            if events.send(ConnEvent::Frame { id, frame }).await.is_err() {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

async fn write_loop(id: ConnId, writer: OwnedWriteHalf, mut outbound: mpsc::Receiver<Frame>) {
    let mut sink = FramedWrite::new(writer, TrainCodec::default());
    while let Some(frame) = outbound.recv().await {
        trace!(id, message_type = frame.message_type(), "write");
        if let Err(e) = sink.send(frame).await {
            debug!(id, error = %e, "write failed");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    async fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (server, client)
    }

    async fn next_event(rx: &mut mpsc::Receiver<ConnEvent>) -> ConnEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn frames_split_byte_by_byte_arrive_once() {
        let (server, mut client) = pair().await;
        let (tx, mut rx) = mpsc::channel(16);
        let _conn = Connection::spawn(1, server, Dialect::Dctx, &ConnectionOptions::default(), tx, Instant::now())
            .unwrap();

        let wire = Frame::encode(0x08, &[]).unwrap();
        for byte in wire.as_bytes() {
            client.write_all(&[*byte]).await.unwrap();
            client.flush().await.unwrap();
        }

        match next_event(&mut rx).await {
            ConnEvent::Frame { id, frame } => {
                assert_eq!(id, 1);
                assert_eq!(frame, wire);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn hangup_reports_clean_close() {
        let (server, client) = pair().await;
        let (tx, mut rx) = mpsc::channel(16);
        let _conn = Connection::spawn(7, server, Dialect::Dttx, &ConnectionOptions::default(), tx, Instant::now())
            .unwrap();

        drop(client);
        assert!(matches!(
            next_event(&mut rx).await,
            ConnEvent::Closed { id: 7, error: None }
        ));
    }

    #[tokio::test]
    async fn oversized_frame_closes_with_error() {
        let (server, mut client) = pair().await;
        let (tx, mut rx) = mpsc::channel(16);
        let options = ConnectionOptions {
            buffer_capacity: 32,
            ..ConnectionOptions::default()
        };
        let _conn = Connection::spawn(2, server, Dialect::Dctx, &options, tx, Instant::now()).unwrap();

        client.write_all(&[0xFF, 0x02, 0x01, 0x00]).await.unwrap();
        assert!(matches!(
            next_event(&mut rx).await,
            ConnEvent::Closed {
                id: 2,
                error: Some(GatewayError::FrameTooLarge { .. })
            }
        ));
    }

    #[tokio::test]
    async fn send_reaches_peer() {
        let (server, mut client) = pair().await;
        let (tx, _rx) = mpsc::channel(16);
        let conn = Connection::spawn(3, server, Dialect::Dctx, &ConnectionOptions::default(), tx, Instant::now())
            .unwrap();

        conn.send(Frame::encode(0x01, &[]).unwrap()).unwrap();
        let mut buf = [0u8; 5];
        tokio::time::timeout(Duration::from_secs(2), client.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(buf, [0xFF, 0x01, 0x00, 0x00, 0xFE]);
    }

    #[tokio::test]
    async fn drop_closes_socket() {
        let (server, mut client) = pair().await;
        let (tx, _rx) = mpsc::channel(16);
        let conn = Connection::spawn(4, server, Dialect::Dctx, &ConnectionOptions::default(), tx, Instant::now())
            .unwrap();
        drop(conn);

        let mut buf = [0u8; 1];
        let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn valid_frame_postpones_receive_timeout() {
        let (server, _client) = pair().await;
        let (tx, _rx) = mpsc::channel(16);
        let start = Instant::now();
        let mut conn = Connection::spawn(5, server, Dialect::Dctx, &ConnectionOptions::default(), tx, start)
            .unwrap();

        conn.frame_received(start + Duration::from_secs(10));
        assert_eq!(
            conn.timers().expiry(TimerSlot::RecvHeartbeat),
            Some(start + Duration::from_secs(25))
        );
        assert!(conn.expired_timers(start + Duration::from_secs(16)).contains(&TimerSlot::SendHeartbeat));
    }
}
