//! Seams to the configuration bus.
//!
//! The core crate never talks to the bus directly. The gateway binary
//! supplies a client implementing these traits; tests supply mocks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::GatewayError;

/// Request/response calls into the configuration service.
#[async_trait]
pub trait RpcClient: Send + Sync {
    /// Run `action` with `body` and return the response body.
    async fn invoke_action(&self, action: &str, body: Value) -> Result<Value, GatewayError>;
}

/// Fire-and-forget events published onto the bus.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: &str, body: Value);
}

pub type SharedRpc = Arc<dyn RpcClient>;
pub type SharedPublisher = Arc<dyn EventPublisher>;

/// Default deadline for one RPC round-trip.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(5);

/// [`RpcClient::invoke_action`] bounded by `timeout`.
pub async fn invoke_with_timeout(
    rpc: &dyn RpcClient,
    action: &str,
    body: Value,
    timeout: Duration,
) -> Result<Value, GatewayError> {
    match tokio::time::timeout(timeout, rpc.invoke_action(action, body)).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::RpcTimeout {
            action: action.to_string(),
            timeout,
        }),
    }
}

/// An [`RpcClient`] and [`EventPublisher`] with nobody on the other end.
///
/// Every call fails with [`GatewayError::Rpc`] and every event is dropped.
/// Used when the gateway runs without a bus.
#[derive(Debug, Default, Clone, Copy)]
pub struct Detached;

#[async_trait]
impl RpcClient for Detached {
    async fn invoke_action(&self, action: &str, _body: Value) -> Result<Value, GatewayError> {
        Err(GatewayError::Rpc(format!("no bus attached for `{action}`")))
    }
}

impl EventPublisher for Detached {
    fn publish(&self, event: &str, _body: Value) {
        tracing::debug!(event, "no bus attached, dropping event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Slow;

    #[async_trait]
    impl RpcClient for Slow {
        async fn invoke_action(&self, _action: &str, _body: Value) -> Result<Value, GatewayError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn slow_call_times_out() {
        let err = invoke_with_timeout(&Slow, "get_image", json!({}), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::RpcTimeout { ref action, .. } if action == "get_image"));
    }

    #[tokio::test]
    async fn detached_fails_calls() {
        let err = invoke_with_timeout(&Detached, "set_image", json!({}), DEFAULT_RPC_TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Rpc(_)));
    }
}
