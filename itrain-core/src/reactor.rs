//! The gateway event loop.
//!
//! One task owns every piece of per-connection state and wakes on:
//!
//! - the listening socket (new train-controller connection)
//! - connection events from the per-socket reader tasks (frames, hangups)
//! - the OSD UDP socket
//! - the control channel
//! - a fixed-period tick driving timer sweeps and the beacon
//!
//! Frame handlers run inline, including their bus calls, so frames from
//! one connection are handled strictly in arrival order and a slow bus
//! call holds up the whole loop until its deadline.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::beacon::{Beacon, DEFAULT_BEACON_TICKS};
use crate::cache::DeviceStatusCache;
use crate::control::{self, ControlCommand, ControlHandle, ControlReceiver};
use crate::error::GatewayError;
use crate::frame::Frame;
use crate::network::{ConnEvent, ConnId, Connection, ConnectionOptions, LiveConnections};
use crate::osd::{OSD_DATAGRAM_SIZE, OSD_EVENT, OsdDatagram};
use crate::protocol::{Dialect, DispatchContext, TimeoutAction};
use crate::rpc::{DEFAULT_RPC_TIMEOUT, Detached, SharedPublisher, SharedRpc};
use crate::timeout::TimerSlot;

/// Reader tasks block once this many events are waiting.
const EVENT_QUEUE: usize = 256;

// ── ReactorConfig ────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ReactorConfig {
    pub listen_addr: SocketAddr,
    /// `None` disables OSD ingestion.
    pub osd_addr: Option<SocketAddr>,
    /// `None` disables the beacon.
    pub multicast_group: Option<SocketAddr>,
    pub multicast_ttl: u32,
    /// Dialect for connections accepted before any `PROTOCOL` command.
    pub dialect: Dialect,
    pub connection: ConnectionOptions,
    pub tick: Duration,
    pub beacon_ticks: u32,
    pub rpc_timeout: Duration,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 10100)),
            osd_addr: Some(SocketAddr::from(([127, 0, 0, 1], 10101))),
            multicast_group: Some(SocketAddr::from(([239, 255, 10, 100], 10102))),
            multicast_ttl: 1,
            dialect: Dialect::default(),
            connection: ConnectionOptions::default(),
            tick: Duration::from_secs(1),
            beacon_ticks: DEFAULT_BEACON_TICKS,
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
        }
    }
}

/// Shared state and bus seams handed to the reactor.
#[derive(Clone)]
pub struct Collaborators {
    pub cache: DeviceStatusCache,
    pub live: LiveConnections,
    pub rpc: SharedRpc,
    pub publisher: SharedPublisher,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            cache: DeviceStatusCache::new(),
            live: LiveConnections::new(),
            rpc: std::sync::Arc::new(Detached),
            publisher: std::sync::Arc::new(Detached),
        }
    }
}

/// Why the loop woke up.
enum Wake {
    Accept(std::io::Result<(TcpStream, SocketAddr)>),
    Connection(ConnEvent),
    Osd(std::io::Result<(usize, SocketAddr)>),
    Control(String),
    Tick,
}

// ── Reactor ──────────────────────────────────────────────────────

pub struct Reactor {
    config: ReactorConfig,
    listener: TcpListener,
    osd: Option<UdpSocket>,
    beacon: Option<Beacon>,
    control: ControlHandle,
    control_rx: ControlReceiver,
    events_tx: mpsc::Sender<ConnEvent>,
    events_rx: mpsc::Receiver<ConnEvent>,
    connections: BTreeMap<ConnId, Connection>,
    collaborators: Collaborators,
    dialect: Dialect,
    occlusion: bool,
    next_id: ConnId,
    running: bool,
}

impl Reactor {
    /// Bind every socket. Failing to bind the listener is fatal; the OSD
    /// socket and the beacon are required too when configured.
    pub async fn bind(config: ReactorConfig, collaborators: Collaborators) -> Result<Self, GatewayError> {
        let listener = TcpListener::bind(config.listen_addr).await?;

        let osd = match config.osd_addr {
            Some(addr) => Some(UdpSocket::bind(addr).await?),
            None => None,
        };
        let beacon = match config.multicast_group {
            Some(group) => Some(Beacon::bind(group, config.multicast_ttl, config.beacon_ticks).await?),
            None => None,
        };

        let (control, control_rx) = control::channel();
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);

        Ok(Self {
            dialect: config.dialect,
            config,
            listener,
            osd,
            beacon,
            control,
            control_rx,
            events_tx,
            events_rx,
            connections: BTreeMap::new(),
            collaborators,
            occlusion: false,
            next_id: 1,
            running: true,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, GatewayError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn osd_addr(&self) -> Option<SocketAddr> {
        self.osd.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Writer side of the control channel.
    pub fn control(&self) -> ControlHandle {
        self.control.clone()
    }

    pub fn live_connections(&self) -> LiveConnections {
        self.collaborators.live.clone()
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Run until a `QUIT` control command arrives.
    pub async fn run(mut self) -> Result<(), GatewayError> {
        let period = self.config.tick;
        let mut tick = tokio::time::interval_at(Instant::now() + period, period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut osd_buf = vec![0u8; OSD_DATAGRAM_SIZE];

        info!(
            addr = %self.local_addr()?,
            dialect = %self.dialect,
            osd = ?self.osd_addr(),
            beacon = ?self.beacon.as_ref().map(Beacon::group),
            "reactor running"
        );

        while self.running {
            let wake = tokio::select! {
                accepted = self.listener.accept() => Wake::Accept(accepted),
                Some(event) = self.events_rx.recv() => Wake::Connection(event),
                received = recv_osd(self.osd.as_ref(), &mut osd_buf) => Wake::Osd(received),
                Some(line) = self.control_rx.recv() => Wake::Control(line),
                _ = tick.tick() => Wake::Tick,
            };

            match wake {
                Wake::Accept(accepted) => self.on_accept(accepted),
                Wake::Connection(ConnEvent::Frame { id, frame }) => self.on_frame(id, frame).await,
                Wake::Connection(ConnEvent::Closed { id, error }) => {
                    match error {
                        Some(e) => warn!(id, error = %e, "connection failed"),
                        None => debug!(id, "peer hung up"),
                    }
                    self.destroy(id);
                }
                Wake::Osd(received) => self.on_osd(received, &osd_buf),
                Wake::Control(line) => self.on_control(&line),
                Wake::Tick => self.on_tick(),
            }
        }

        self.shutdown();
        Ok(())
    }

    fn on_accept(&mut self, accepted: std::io::Result<(TcpStream, SocketAddr)>) {
        let stream = match accepted {
            Ok((stream, _)) => stream,
            Err(e) => {
                warn!(error = %e, "accept failed");
                return;
            }
        };

        let id = self.next_id;
        self.next_id += 1;
        match Connection::spawn(
            id,
            stream,
            self.dialect,
            &self.config.connection,
            self.events_tx.clone(),
            Instant::now(),
        ) {
            Ok(conn) => {
                self.collaborators.live.insert(conn.info().clone());
                self.connections.insert(id, conn);
            }
            Err(e) => warn!(id, error = %e, "could not set up connection"),
        }
    }

    async fn on_frame(&mut self, id: ConnId, frame: Frame) {
        // Frames still queued from a connection destroyed meanwhile.
        let Some(conn) = self.connections.get_mut(&id) else {
            return;
        };

        let ctx = DispatchContext {
            cache: &self.collaborators.cache,
            rpc: self.collaborators.rpc.as_ref(),
            rpc_timeout: self.config.rpc_timeout,
        };
        let dialect = conn.dialect();
        match dialect.dispatch(conn.session_mut(), &frame, &ctx).await {
            Ok(Some(reply)) => {
                if let Err(e) = conn.send(reply) {
                    warn!(id, error = %e, "reply dropped");
                }
            }
            Ok(None) => {}
            Err(e @ GatewayError::UnknownMessage { .. }) => debug!(id, error = %e, "unhandled request"),
            Err(e) => warn!(id, error = %e, "request failed"),
        }
        conn.frame_received(Instant::now());
    }

    fn on_osd(&self, received: std::io::Result<(usize, SocketAddr)>, buf: &[u8]) {
        let (len, from) = match received {
            Ok(received) => received,
            Err(e) => {
                warn!(error = %e, "osd receive failed");
                return;
            }
        };
        match OsdDatagram::decode(&buf[..len]) {
            Ok(osd) => {
                debug!(%from, text = %osd.text, "osd update");
                self.collaborators.publisher.publish(OSD_EVENT, osd.to_event_body());
            }
            Err(e) => debug!(%from, error = %e, "dropping osd datagram"),
        }
    }

    fn on_control(&mut self, line: &str) {
        let command = match ControlCommand::parse(line) {
            Ok(command) => command,
            Err(e) => {
                warn!(error = %e, "ignoring control line");
                return;
            }
        };
        debug!(%command, "control");

        match command {
            ControlCommand::Occlusion { region, occluded } => {
                info!(region, occluded, "occlusion state changed");
                self.occlusion = occluded;
                self.report_status(occluded, false);
            }
            ControlCommand::Protocol(dialect) => {
                if dialect != self.dialect {
                    info!(from = %self.dialect, to = %dialect, "switching dialect for new connections");
                }
                self.dialect = dialect;
            }
            ControlCommand::Quit => {
                info!("quit requested");
                self.running = false;
            }
        }
    }

    /// Push a video fault event to every live connection.
    fn report_status(&self, occlusion: bool, loss: bool) {
        for conn in self.connections.values() {
            let sent = conn
                .dialect()
                .report_status(&self.collaborators.cache, occlusion, loss)
                .and_then(|frame| conn.send(frame));
            if let Err(e) = sent {
                warn!(id = conn.id(), error = %e, "status report dropped");
            }
        }
    }

    fn on_tick(&mut self) {
        let now = Instant::now();
        let mut expired = Vec::new();

        for conn in self.connections.values_mut() {
            for slot in conn.expired_timers(now) {
                match conn.dialect().on_timeout(slot) {
                    Ok(TimeoutAction::Send(frame)) => {
                        if slot == TimerSlot::SendHeartbeat {
                            conn.session_mut().record_heartbeat();
                        }
                        if let Err(e) = conn.send(frame) {
                            debug!(id = conn.id(), error = %e, "heartbeat dropped");
                        }
                    }
                    Ok(TimeoutAction::Terminate) => {
                        warn!(id = conn.id(), peer = %conn.peer(), "peer unresponsive");
                        expired.push(conn.id());
                        break;
                    }
                    Ok(TimeoutAction::Nothing) => {}
                    Err(e) => warn!(id = conn.id(), %slot, error = %e, "timer handler failed"),
                }
            }
        }

        for id in expired {
            self.destroy(id);
        }

        if let Some(beacon) = self.beacon.as_mut() {
            beacon.tick(&self.collaborators.cache, self.occlusion);
        }
    }

    fn destroy(&mut self, id: ConnId) {
        self.collaborators.live.remove(id);
        // Drop closes the socket and runs the dialect deinit.
        self.connections.remove(&id);
    }

    fn shutdown(&mut self) {
        info!(connections = self.connections.len(), "reactor stopping");
        self.collaborators.live.clear();
        self.connections.clear();
    }
}

async fn recv_osd(socket: Option<&UdpSocket>, buf: &mut [u8]) -> std::io::Result<(usize, SocketAddr)> {
    match socket {
        Some(socket) => socket.recv_from(buf).await,
        None => std::future::pending().await,
    }
}
