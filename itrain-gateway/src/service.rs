//! Gateway service wiring.
//!
//! Connects the bus, binds the reactor sockets, forwards bus notices to
//! the [`EventRouter`] and pulls the device identity once alongside the
//! reactor. Until that pull lands, status replies carry an empty identity.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use itrain_core::rpc::{Detached, SharedPublisher, SharedRpc};
use itrain_core::{
    Collaborators, ControlHandle, DeviceStatusCache, EventRouter, GatewayError, LiveConnections,
    Reactor,
};

use crate::bus::{BusClient, Notices};
use crate::config::GatewayConfig;

// ── GatewayService ───────────────────────────────────────────────

pub struct GatewayService {
    reactor: Reactor,
    router: EventRouter,
    rpc: SharedRpc,
    rpc_timeout: Duration,
    notices: Option<JoinHandle<()>>,
}

impl GatewayService {
    /// Connect the bus and bind every socket.
    ///
    /// An unreachable bus is not fatal: the gateway then serves with
    /// empty device status. A socket that cannot be bound is.
    pub async fn bind(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let reactor_config = config.to_reactor_config()?;
        let rpc_timeout = reactor_config.rpc_timeout;

        let (rpc, publisher, notices) = match config.bus_address() {
            Some(address) => {
                match BusClient::connect(address, config.bus.token.clone(), config.connect_timeout()).await {
                    Ok((bus, notices)) => {
                        let bus = Arc::new(bus);
                        let rpc: SharedRpc = bus.clone();
                        let publisher: SharedPublisher = bus;
                        (rpc, publisher, Some(notices))
                    }
                    Err(e) => {
                        warn!(address, error = %e, "bus unreachable, running detached");
                        detached()
                    }
                }
            }
            None => {
                info!("no bus configured, running detached");
                detached()
            }
        };

        let collaborators = Collaborators {
            cache: DeviceStatusCache::new(),
            live: LiveConnections::new(),
            rpc: rpc.clone(),
            publisher,
        };
        let cache = collaborators.cache.clone();
        let reactor = Reactor::bind(reactor_config, collaborators).await?;
        let router = EventRouter::new(cache, reactor.control());

        let notices = notices.map(|notices| tokio::spawn(route_notices(notices, router.clone())));

        Ok(Self {
            reactor,
            router,
            rpc,
            rpc_timeout,
            notices,
        })
    }

    /// Writer side of the reactor control channel.
    pub fn control(&self) -> ControlHandle {
        self.reactor.control()
    }

    pub fn live_connections(&self) -> LiveConnections {
        self.reactor.live_connections()
    }

    /// Address the train-control listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, GatewayError> {
        self.reactor.local_addr()
    }

    /// Serve until `QUIT`, pulling the device identity in the background.
    ///
    /// A slow bus delays only the identity, never the first accept.
    pub async fn run(self) -> Result<(), GatewayError> {
        let router = self.router.clone();
        let rpc = Arc::clone(&self.rpc);
        let timeout = self.rpc_timeout;
        let bootstrap = tokio::spawn(async move { router.bootstrap(rpc.as_ref(), timeout).await });

        let result = self.reactor.run().await;
        bootstrap.abort();
        if let Some(notices) = self.notices {
            notices.abort();
        }
        info!("gateway stopped");
        result
    }
}

fn detached() -> (SharedRpc, SharedPublisher, Option<Notices>) {
    (Arc::new(Detached), Arc::new(Detached), None)
}

async fn route_notices(mut notices: Notices, router: EventRouter) {
    while let Some((event, body)) = notices.recv().await {
        if let Err(e) = router.handle(&event, &body) {
            warn!(%event, error = %e, "notice rejected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio::net::TcpStream;
    use tokio_util::codec::{Framed, LinesCodec};

    use itrain_core::{Frame, TrainCodec};

    use crate::bus::BusMessage;

    fn local_config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.network.listen_address = "127.0.0.1:0".into();
        config.network.osd_address.clear();
        config.network.multicast_group.clear();
        config.protocol.tick_ms = 20;
        config.protocol.rpc_timeout_ms = 500;
        config.bus.connect_timeout_ms = 500;
        config
    }

    #[tokio::test]
    async fn runs_detached_without_bus() {
        let mut config = local_config();
        config.bus.address.clear();
        let service = GatewayService::bind(&config).await.unwrap();
        let control = service.control();
        let handle = tokio::spawn(service.run());

        control.quit().unwrap();
        let result = tokio::time::timeout(Duration::from_secs(3), handle)
            .await
            .expect("timeout")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn bootstrap_goes_over_the_bus() {
        let bus = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = local_config();
        config.bus.address = bus.local_addr().unwrap().to_string();
        config.bus.token = "t0k".into();

        let (service, accepted) = tokio::join!(GatewayService::bind(&config), bus.accept());
        let service = service.unwrap();
        let control = service.control();
        let mut server = Framed::new(accepted.unwrap().0, LinesCodec::new());
        let handle = tokio::spawn(service.run());

        let mut actions = Vec::new();
        for _ in 0..2 {
            let line = tokio::time::timeout(Duration::from_secs(3), server.next())
                .await
                .expect("timeout")
                .unwrap()
                .unwrap();
            let BusMessage::Request { id, action, token, .. } = BusMessage::from_line(&line).unwrap() else {
                panic!("expected a request");
            };
            assert_eq!(token, "t0k");
            actions.push(action);
            let reply = BusMessage::Response {
                id,
                body: json!({"items": {}}),
                error: None,
            };
            server.send(reply.to_line().unwrap()).await.unwrap();
        }
        assert_eq!(actions, vec!["get_base_info", "get_szyc"]);

        control.quit().unwrap();
        let result = tokio::time::timeout(Duration::from_secs(3), handle)
            .await
            .expect("timeout")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn serves_while_bus_is_silent() {
        let bus = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = local_config();
        config.bus.address = bus.local_addr().unwrap().to_string();
        config.protocol.rpc_timeout_ms = 2_000;

        let (service, accepted) = tokio::join!(GatewayService::bind(&config), bus.accept());
        let service = service.unwrap();
        // Held open so requests stay pending until the RPC deadline.
        let _server = Framed::new(accepted.unwrap().0, LinesCodec::new());
        let addr = service.local_addr().unwrap();
        let control = service.control();
        let handle = tokio::spawn(service.run());

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut client = Framed::new(stream, TrainCodec::default());
        client.send(Frame::encode(0x08, &[]).unwrap()).await.unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(1), client.next())
            .await
            .expect("status reply waited on the bus")
            .expect("connection closed")
            .expect("decode error");
        assert_eq!(reply.message_type(), 0x58);

        control.quit().unwrap();
        let result = tokio::time::timeout(Duration::from_secs(3), handle)
            .await
            .expect("timeout")
            .unwrap();
        assert!(result.is_ok());
    }
}
