//! # itrain-core
//!
//! Core library for the iTrain camera gateway, which bridges the binary
//! train-control protocol to the device's JSON configuration bus.
//!
//! This crate contains:
//! - **Wire format**: `FrameHeader`, `Frame` with XOR checksum, message codes for both dialects
//! - **Codec**: `TrainCodec` for `tokio_util` framing and `FrameBuffer` for bounded reassembly with resync
//! - **Dialects**: `Dialect` (DCTX / DTTX) request handlers, status records and heartbeat policy
//! - **Timers**: `TimeoutRegistry`, per-connection heartbeat slots with catch-up re-arming
//! - **Network**: `Connection` I/O tasks and the `LiveConnections` registry
//! - **Reactor**: the event loop tying sockets, control channel, OSD ingestion and beacon together
//! - **Bus seams**: `RpcClient`, `EventPublisher`, `EventRouter` and the `DeviceStatusCache`
//! - **Error**: `GatewayError`, typed and `thiserror`-based

pub mod beacon;
pub mod cache;
pub mod codec;
pub mod control;
pub mod error;
pub mod events;
pub mod frame;
pub mod header;
pub mod message;
pub mod network;
pub mod osd;
pub mod protocol;
pub mod reactor;
pub mod rpc;
pub mod timeout;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use cache::DeviceStatusCache;
pub use codec::{FrameBuffer, TrainCodec};
pub use control::{ControlCommand, ControlHandle};
pub use error::{DecodeError, GatewayError};
pub use events::EventRouter;
pub use frame::{Frame, MAX_PAYLOAD_SIZE};
pub use header::{FrameHeader, HEADER_SIZE, START_MARKER};
pub use message::{DctxMessage, DttxMessage};
pub use network::{ConnectionInfo, ConnectionOptions, LiveConnections};
pub use osd::OsdDatagram;
pub use protocol::{Dialect, HeartbeatConfig};
pub use reactor::{Collaborators, Reactor, ReactorConfig};
pub use rpc::{EventPublisher, RpcClient};
pub use timeout::{TimeoutRegistry, TimerSlot};
