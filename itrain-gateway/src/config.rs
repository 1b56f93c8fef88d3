//! Configuration for the gateway daemon.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use itrain_core::header::FRAME_OVERHEAD;
use itrain_core::network::ConnectionOptions;
use itrain_core::{Dialect, GatewayError, HeartbeatConfig, ReactorConfig};

/// Shortest reactor tick accepted.
const MIN_TICK: Duration = Duration::from_millis(10);

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Sockets.
    pub network: NetworkConfig,
    /// Train-control protocol settings.
    pub protocol: ProtocolConfig,
    /// Configuration bus connection.
    pub bus: BusConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Network configuration. Empty addresses disable the feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// TCP address the train controllers connect to.
    pub listen_address: String,
    /// Local UDP address for OSD text datagrams.
    pub osd_address: String,
    /// Multicast group and port for the identity beacon.
    pub multicast_group: String,
    pub multicast_ttl: u32,
}

/// Protocol and timing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Initial dialect, `"DCTX"` or `"DTTX"`. Replaced once the device
    /// model is known.
    pub dialect: Dialect,
    /// Per-connection receive buffer in bytes.
    pub buffer_size: usize,
    pub send_heartbeat_ms: u64,
    pub recv_heartbeat_ms: u64,
    pub tick_ms: u64,
    /// Beacon period in ticks.
    pub beacon_ticks: u32,
    pub rpc_timeout_ms: u64,
}

/// Configuration bus connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// JSON-lines bus address. Empty runs the gateway without a bus.
    pub address: String,
    /// Forwarded on every request.
    pub token: String,
    pub connect_timeout_ms: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:10100".into(),
            osd_address: "127.0.0.1:10101".into(),
            multicast_group: "239.255.10.100:10102".into(),
            multicast_ttl: 1,
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            dialect: Dialect::Dctx,
            buffer_size: itrain_core::codec::DEFAULT_BUFFER_CAPACITY,
            send_heartbeat_ms: 5_000,
            recv_heartbeat_ms: 15_000,
            tick_ms: 1_000,
            beacon_ticks: 5,
            rpc_timeout_ms: 5_000,
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:10000".into(),
            token: String::new(),
            connect_timeout_ms: 3_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".into() }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl GatewayConfig {
    /// Load configuration from a TOML file.
    ///
    /// `Ok(None)` when the file does not exist. Nothing is logged; the
    /// caller reports the outcome once tracing is up.
    pub fn load(path: &Path) -> Result<Option<Self>, GatewayError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(GatewayError::InvalidConfig {
                    key: "file",
                    reason: format!("{}: {e}", path.display()),
                });
            }
        };
        Self::parse(&contents)
            .map(Some)
            .map_err(|e| GatewayError::InvalidConfig {
                key: "file",
                reason: format!("{}: {e}", path.display()),
            })
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// The default configuration as TOML.
    pub fn default_toml() -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(&Self::default())
    }

    /// Convert into the core reactor settings.
    pub fn to_reactor_config(&self) -> Result<ReactorConfig, GatewayError> {
        let net = &self.network;
        let proto = &self.protocol;

        Ok(ReactorConfig {
            listen_addr: parse_addr("network.listen_address", &net.listen_address)?,
            osd_addr: optional_addr("network.osd_address", &net.osd_address)?,
            multicast_group: optional_addr("network.multicast_group", &net.multicast_group)?,
            multicast_ttl: net.multicast_ttl,
            dialect: proto.dialect,
            connection: ConnectionOptions {
                buffer_capacity: proto
                    .buffer_size
                    .clamp(FRAME_OVERHEAD, u16::MAX as usize + FRAME_OVERHEAD),
                heartbeat: HeartbeatConfig {
                    send_interval: Duration::from_millis(proto.send_heartbeat_ms.max(1)),
                    recv_interval: Duration::from_millis(proto.recv_heartbeat_ms.max(1)),
                },
            },
            tick: Duration::from_millis(proto.tick_ms).max(MIN_TICK),
            beacon_ticks: proto.beacon_ticks.max(1),
            rpc_timeout: Duration::from_millis(proto.rpc_timeout_ms),
        })
    }

    /// `None` when the gateway should run without a bus.
    pub fn bus_address(&self) -> Option<&str> {
        let address = self.bus.address.trim();
        (!address.is_empty()).then_some(address)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.bus.connect_timeout_ms)
    }
}

fn parse_addr(key: &'static str, value: &str) -> Result<SocketAddr, GatewayError> {
    value.trim().parse().map_err(|e: std::net::AddrParseError| GatewayError::InvalidConfig {
        key,
        reason: format!("`{value}`: {e}"),
    })
}

fn optional_addr(key: &'static str, value: &str) -> Result<Option<SocketAddr>, GatewayError> {
    if value.trim().is_empty() {
        return Ok(None);
    }
    parse_addr(key, value).map(Some)
}

// ── Tests ────────────────────────────────────────────────────────
