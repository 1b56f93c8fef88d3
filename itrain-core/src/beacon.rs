//! Multicast identity beacon.
//!
//! Every few reactor ticks the gateway announces which train and position
//! it serves, plus the last known video state, to a fixed multicast group:
//!
//! ```text
//! train_num:  u32  big-endian
//! position:   u8
//! occlusion:  u8
//! loss:       u8
//! ```
//!
//! Sends never block and failures are ignored.

use std::net::{Ipv4Addr, SocketAddr};

use tokio::net::UdpSocket;
use tracing::{debug, trace};

use crate::cache::{self, DeviceStatusCache};
use crate::error::GatewayError;
use crate::protocol::parse_c_ulong;

pub const BEACON_SIZE: usize = 7;
pub const DEFAULT_BEACON_TICKS: u32 = 5;

/// Build the beacon datagram, if the device identity is known.
pub fn beacon_packet(cache: &DeviceStatusCache, occlusion: bool, loss: bool) -> Option<[u8; BEACON_SIZE]> {
    let train = parse_c_ulong(&cache.get(cache::TRAIN_NUM)?) as u32;
    let position = parse_c_ulong(&cache.get(cache::POSITION_NUM)?) as u8;

    let mut packet = [0u8; BEACON_SIZE];
    packet[..4].copy_from_slice(&train.to_be_bytes());
    packet[4] = position;
    packet[5] = occlusion as u8;
    packet[6] = loss as u8;
    Some(packet)
}

pub struct Beacon {
    socket: UdpSocket,
    group: SocketAddr,
    every: u32,
    countdown: u32,
}

impl Beacon {
    /// Open an unbound-port sender for `group`.
    pub async fn bind(group: SocketAddr, ttl: u32, every_ticks: u32) -> Result<Self, GatewayError> {
        let local: SocketAddr = match group {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (std::net::Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(local).await?;
        if group.is_ipv4() {
            socket.set_multicast_ttl_v4(ttl)?;
        }
        let every = every_ticks.max(1);
        Ok(Self {
            socket,
            group,
            every,
            countdown: every,
        })
    }

    pub fn group(&self) -> SocketAddr {
        self.group
    }

    /// Count one reactor tick; emits when the countdown runs out.
    ///
    /// Returns whether a datagram went out.
    pub fn tick(&mut self, cache: &DeviceStatusCache, occlusion: bool) -> bool {
        self.countdown = self.countdown.saturating_sub(1);
        if self.countdown > 0 {
            return false;
        }
        self.countdown = self.every;

        let Some(packet) = beacon_packet(cache, occlusion, false) else {
            trace!("beacon skipped, identity unknown");
            return false;
        };
        match self.socket.try_send_to(&packet, self.group) {
            Ok(_) => true,
            Err(e) => {
                debug!(group = %self.group, error = %e, "beacon send failed");
                false
            }
        }
    }
}
