//! Dialect dispatch.
//!
//! The gateway speaks exactly one of two device dialects at a time.
//! [`Dialect`] is the closed set of behaviours; each connection is bound to
//! the dialect that was active when it was accepted.

mod dctx;
mod dttx;

pub use dctx::{ImageAttributes, OsdRequest, TimeSyncRequest};

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::DeviceStatusCache;
use crate::error::GatewayError;
use crate::frame::Frame;
use crate::rpc::{RpcClient, invoke_with_timeout};
use crate::timeout::{TimeoutRegistry, TimerSlot};

/// Manufacturer string reported in status records.
pub const MANUFACTURER: &[u8] = b"EASYWAY";

// ── Dialect ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Dialect {
    /// Carriage/position addressed cameras.
    #[default]
    Dctx,
    /// Train-number addressed cameras.
    Dttx,
}

impl Dialect {
    pub fn name(self) -> &'static str {
        match self {
            Dialect::Dctx => "DCTX",
            Dialect::Dttx => "DTTX",
        }
    }

    /// Pick the dialect for a device model string.
    pub fn from_model(model: &str) -> Self {
        let is_dttx = model
            .get(..4)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("DTTX"));
        if is_dttx { Dialect::Dttx } else { Dialect::Dctx }
    }

    pub fn new_session(self) -> Session {
        Session::new(self)
    }

    /// Arm the default heartbeat timers on a fresh connection.
    pub fn init_connection(self, timers: &mut TimeoutRegistry, heartbeat: &HeartbeatConfig, now: Instant) {
        timers.arm(TimerSlot::SendHeartbeat, heartbeat.send_interval, now);
        timers.arm(TimerSlot::RecvHeartbeat, heartbeat.recv_interval, now);
    }

    /// Handle one checksum-valid frame; returns the reply to send, if any.
    ///
    /// Errors are per-request: the caller logs them and keeps the
    /// connection.
    pub async fn dispatch(
        self,
        session: &mut Session,
        frame: &Frame,
        ctx: &DispatchContext<'_>,
    ) -> Result<Option<Frame>, GatewayError> {
        session.frames += 1;
        let reply = match self {
            Dialect::Dctx => dctx::dispatch(frame, ctx).await?,
            Dialect::Dttx => dttx::dispatch(frame, ctx).await?,
        };
        if reply.is_some() {
            session.replies += 1;
        }
        Ok(reply)
    }

    /// Decide what a fired timer slot means.
    pub fn on_timeout(self, slot: TimerSlot) -> Result<TimeoutAction, GatewayError> {
        match slot {
            TimerSlot::SendHeartbeat => Ok(TimeoutAction::Send(self.heartbeat()?)),
            TimerSlot::RecvHeartbeat => Ok(TimeoutAction::Terminate),
            TimerSlot::Reserved2 | TimerSlot::Reserved3 => Ok(TimeoutAction::Nothing),
        }
    }

    /// Video fault event carrying this device's identity.
    pub fn report_status(
        self,
        cache: &DeviceStatusCache,
        occlusion: bool,
        loss: bool,
    ) -> Result<Frame, GatewayError> {
        match self {
            Dialect::Dctx => dctx::report_status(cache, occlusion, loss),
            Dialect::Dttx => dttx::report_status(cache, occlusion, loss),
        }
    }

    pub fn deinit_connection(self, session: &Session) {
        debug!(
            dialect = %self,
            frames = session.frames,
            replies = session.replies,
            heartbeats = session.heartbeats_sent,
            "session closed"
        );
    }

    fn heartbeat(self) -> Result<Frame, GatewayError> {
        let code = match self {
            Dialect::Dctx => crate::message::DctxMessage::Heartbeat.code(),
            Dialect::Dttx => crate::message::DttxMessage::Heartbeat.code(),
        };
        Frame::encode(code, &[])
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dialect {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("DCTX") {
            Ok(Dialect::Dctx)
        } else if s.eq_ignore_ascii_case("DTTX") {
            Ok(Dialect::Dttx)
        } else {
            Err(GatewayError::UnknownDialect(s.to_string()))
        }
    }
}

// ── Session / context ────────────────────────────────────────────

/// Per-connection dialect state.
#[derive(Debug, Clone, Default)]
pub struct Session {
    dialect: Dialect,
    frames: u64,
    replies: u64,
    heartbeats_sent: u64,
}

impl Session {
    fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            ..Self::default()
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn replies(&self) -> u64 {
        self.replies
    }

    pub fn record_heartbeat(&mut self) {
        self.heartbeats_sent += 1;
    }
}

/// What handlers may reach while processing a frame.
pub struct DispatchContext<'a> {
    pub cache: &'a DeviceStatusCache,
    pub rpc: &'a dyn RpcClient,
    pub rpc_timeout: Duration,
}

impl DispatchContext<'_> {
    async fn invoke(&self, action: &str, body: Value) -> Result<Value, GatewayError> {
        invoke_with_timeout(self.rpc, action, body, self.rpc_timeout).await
    }

    /// Fire-and-forget command: failures are logged, never answered.
    async fn command(&self, action: &str, body: Value) {
        match self.invoke(action, body).await {
            Ok(_) => info!(action, "command forwarded"),
            Err(e) => warn!(action, error = %e, "command failed"),
        }
    }
}

/// Heartbeat timer intervals armed on every new connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    pub send_interval: Duration,
    pub recv_interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            send_interval: Duration::from_secs(5),
            recv_interval: Duration::from_secs(15),
        }
    }
}

/// Outcome of a fired timer slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeoutAction {
    /// Write this frame to the peer.
    Send(Frame),
    /// The peer is gone; destroy the connection.
    Terminate,
    Nothing,
}

// ── Shared helpers ───────────────────────────────────────────────

/// Parse an unsigned number the way C `strtoul(s, NULL, 0)` does.
///
/// Leading whitespace is skipped; `0x`/`0X` selects hex, a leading `0`
/// octal, anything else decimal. Parsing stops at the first invalid digit
/// and yields 0 when none were read. Overflow saturates.
pub fn parse_c_ulong(s: &str) -> u64 {
    let s = s.trim_start();
    let s = s.strip_prefix('+').unwrap_or(s);
    let (digits, radix) = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        if hex.chars().next().is_some_and(|c| c.is_ascii_hexdigit()) {
            (hex, 16)
        } else {
            return 0;
        }
    } else if s.starts_with('0') {
        (s, 8)
    } else {
        (s, 10)
    };

    digits
        .chars()
        .map_while(|c| c.to_digit(radix))
        .fold(0u64, |acc, d| acc.saturating_mul(radix as u64).saturating_add(d as u64))
}

/// Cached numeric property, 0 when missing or unparsable.
fn cached_number(cache: &DeviceStatusCache, key: &str) -> u64 {
    cache.get(key).map(|v| parse_c_ulong(&v)).unwrap_or(0)
}

/// Pack a `"maj.min.rev"` firmware string as `maj*100 + min*10 + rev`,
/// each component reduced to its last decimal digit.
pub fn firmware_version(firmware: &str) -> Option<u16> {
    let mut parts = firmware.trim_start().splitn(3, '.');
    let mut next = || -> Option<u32> {
        let part = parts.next()?;
        let end = part
            .char_indices()
            .find(|(_, c)| !c.is_ascii_digit())
            .map_or(part.len(), |(i, _)| i);
        part[..end].parse().ok()
    };
    let (maj, min, rev) = (next()?, next()?, next()?);
    Some(((maj % 10) * 100 + (min % 10) * 10 + rev % 10) as u16)
}

/// Copy `src` into a fixed NUL-padded field, truncating if needed.
fn padded<const N: usize>(src: &[u8]) -> [u8; N] {
    let mut field = [0u8; N];
    let n = src.len().min(N);
    field[..n].copy_from_slice(&src[..n]);
    field
}

fn ensure_len(message: &'static str, payload: &[u8], expected: usize) -> Result<(), GatewayError> {
    if payload.len() < expected {
        return Err(GatewayError::PayloadTooShort {
            message,
            expected,
            actual: payload.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cache;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records every call and answers from a canned table.
    #[derive(Default)]
    pub(crate) struct RecordingRpc {
        pub calls: Mutex<Vec<(String, Value)>>,
        pub responses: Mutex<Vec<(String, Value)>>,
    }

    impl RecordingRpc {
        pub fn respond(&self, action: &str, body: Value) {
            self.responses.lock().unwrap().push((action.to_string(), body));
        }

        pub fn calls(&self) -> Vec<(String, Value)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RpcClient for RecordingRpc {
        async fn invoke_action(&self, action: &str, body: Value) -> Result<Value, GatewayError> {
            self.calls.lock().unwrap().push((action.to_string(), body));
            self.responses
                .lock()
                .unwrap()
                .iter()
                .find(|(a, _)| a == action)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| GatewayError::Rpc(format!("no canned response for {action}")))
        }
    }

    pub(crate) fn context<'a>(cache: &'a DeviceStatusCache, rpc: &'a RecordingRpc) -> DispatchContext<'a> {
        DispatchContext {
            cache,
            rpc,
            rpc_timeout: Duration::from_millis(200),
        }
    }

    #[test]
    fn dialect_from_model() {
        assert_eq!(Dialect::from_model("DTTX-100"), Dialect::Dttx);
        assert_eq!(Dialect::from_model("dttx"), Dialect::Dttx);
        assert_eq!(Dialect::from_model("DCTX-9"), Dialect::Dctx);
        assert_eq!(Dialect::from_model("DTT"), Dialect::Dctx);
        assert_eq!(Dialect::from_model(""), Dialect::Dctx);
    }

    #[test]
    fn dialect_parse_and_display() {
        assert_eq!("dttx".parse::<Dialect>().unwrap(), Dialect::Dttx);
        assert_eq!(Dialect::Dctx.to_string(), "DCTX");
        assert!(matches!(
            "ABCD".parse::<Dialect>(),
            Err(GatewayError::UnknownDialect(_))
        ));
    }

    #[test]
    fn c_ulong_parsing() {
        assert_eq!(parse_c_ulong("42"), 42);
        assert_eq!(parse_c_ulong("  7 cars"), 7);
        assert_eq!(parse_c_ulong("0x1F"), 31);
        assert_eq!(parse_c_ulong("017"), 15);
        assert_eq!(parse_c_ulong("G1234"), 0);
        assert_eq!(parse_c_ulong(""), 0);
        assert_eq!(parse_c_ulong("0xZZ"), 0);
    }

    #[test]
    fn firmware_packing() {
        assert_eq!(firmware_version("1.2.3"), Some(123));
        assert_eq!(firmware_version("12.34.56"), Some(246));
        assert_eq!(firmware_version("2.0.1-rc1"), Some(201));
        assert_eq!(firmware_version("1.2"), None);
        assert_eq!(firmware_version("v1.2.3"), None);
    }

    #[test]
    fn init_arms_both_heartbeats() {
        let now = Instant::now();
        let mut timers = TimeoutRegistry::new(now);
        Dialect::Dctx.init_connection(&mut timers, &HeartbeatConfig::default(), now);
        assert_eq!(
            timers.expiry(TimerSlot::SendHeartbeat),
            Some(now + Duration::from_secs(5))
        );
        assert_eq!(
            timers.expiry(TimerSlot::RecvHeartbeat),
            Some(now + Duration::from_secs(15))
        );
    }

    #[test]
    fn timeouts_map_to_actions() {
        let action = Dialect::Dttx.on_timeout(TimerSlot::SendHeartbeat).unwrap();
        assert_eq!(action, TimeoutAction::Send(Frame::encode(0x01, &[]).unwrap()));
        assert_eq!(
            Dialect::Dctx.on_timeout(TimerSlot::RecvHeartbeat).unwrap(),
            TimeoutAction::Terminate
        );
        assert_eq!(
            Dialect::Dctx.on_timeout(TimerSlot::Reserved3).unwrap(),
            TimeoutAction::Nothing
        );
    }

    #[tokio::test]
    async fn dispatch_counts_frames_and_replies() {
        let cache = DeviceStatusCache::new();
        let rpc = RecordingRpc::default();
        let ctx = context(&cache, &rpc);
        let mut session = Dialect::Dctx.new_session();

        let ack = Frame::encode(0x51, &[]).unwrap();
        let query = Frame::encode(0x08, &[]).unwrap();
        assert!(Dialect::Dctx.dispatch(&mut session, &ack, &ctx).await.unwrap().is_none());
        assert!(Dialect::Dctx.dispatch(&mut session, &query, &ctx).await.unwrap().is_some());
        assert_eq!(session.frames(), 2);
        assert_eq!(session.replies(), 1);
    }

    #[tokio::test]
    async fn unknown_type_is_an_error_not_a_reply() {
        let cache = DeviceStatusCache::new();
        cache.set(cache::MODEL, "DTTX");
        let rpc = RecordingRpc::default();
        let ctx = context(&cache, &rpc);
        let mut session = Dialect::Dttx.new_session();

        let frame = Frame::encode(0x02, &[1, 2, 3, 4]).unwrap();
        let err = Dialect::Dttx.dispatch(&mut session, &frame, &ctx).await.unwrap_err();
        assert!(matches!(err, GatewayError::UnknownMessage { dialect: "DTTX", .. }));
        assert!(rpc.calls().is_empty());
    }
}
