//! Inbound bus notices.
//!
//! The configuration bus pushes named events at the gateway. The router
//! folds them into the device status cache and turns the ones that need
//! the reactor into control lines.

use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::cache::{self, DeviceStatusCache};
use crate::control::ControlHandle;
use crate::error::GatewayError;
use crate::protocol::Dialect;
use crate::rpc::{RpcClient, invoke_with_timeout};

pub const VIDEO_OCCLUSION_EVENT: &str = "video_occlusion_event";
pub const SET_BASE_INFO: &str = "set_base_info";
pub const SET_SZYC: &str = "set_szyc";

/// Base-info items requested at startup.
pub const BASE_INFO_ITEMS: [&str; 9] = [
    "device_name",
    "comment",
    "location",
    "hardware",
    "firmware",
    "manufacturer",
    "model",
    "serial",
    "device_type",
];

/// Train identity items requested at startup.
pub const SZYC_ITEMS: [&str; 3] = ["train_num", "carriage_num", "position_num"];

#[derive(Debug, Clone)]
pub struct EventRouter {
    cache: DeviceStatusCache,
    control: ControlHandle,
}

impl EventRouter {
    pub fn new(cache: DeviceStatusCache, control: ControlHandle) -> Self {
        Self { cache, control }
    }

    /// Handle one notice. Unknown events are ignored.
    pub fn handle(&self, event: &str, body: &Value) -> Result<(), GatewayError> {
        match event {
            VIDEO_OCCLUSION_EVENT => self.video_occlusion(body),
            SET_BASE_INFO => {
                self.update_base_info(body)?;
                self.select_dialect()?;
                Ok(())
            }
            SET_SZYC => self.update_group(cache::SZYC_GROUP, body).map(|_| ()),
            _ => {
                debug!(event, "ignoring notice");
                Ok(())
            }
        }
    }

    /// Pull base info and train identity once at startup.
    ///
    /// A failed request is logged and skipped.
    pub async fn bootstrap(&self, rpc: &dyn RpcClient, timeout: std::time::Duration) {
        match invoke_with_timeout(rpc, "get_base_info", json!({ "items": BASE_INFO_ITEMS }), timeout).await {
            Ok(body) => {
                if let Err(e) = self.update_base_info(&body) {
                    warn!(error = %e, "unusable base info response");
                }
            }
            Err(e) => warn!(error = %e, "get_base_info failed"),
        }
        if let Err(e) = self.select_dialect() {
            warn!(error = %e, "could not forward dialect selection");
        }

        match invoke_with_timeout(rpc, "get_szyc", json!({ "items": SZYC_ITEMS }), timeout).await {
            Ok(body) => {
                if let Err(e) = self.update_group(cache::SZYC_GROUP, &body) {
                    warn!(error = %e, "unusable szyc response");
                }
            }
            Err(e) => warn!(error = %e, "get_szyc failed"),
        }
    }

    fn video_occlusion(&self, body: &Value) -> Result<(), GatewayError> {
        let event = body
            .get("event")
            .ok_or(GatewayError::MalformedResponse("video_occlusion_event: missing event"))?;
        let region = event.get("region").and_then(Value::as_u64);
        let state = event.get("state").and_then(Value::as_bool);

        match (region, state) {
            (Some(region), Some(occluded)) => match u32::try_from(region) {
                Ok(region) => {
                    debug!(region, occluded, "video occlusion");
                    self.control.occlusion(region, occluded)
                }
                Err(_) => {
                    debug!(region, "occlusion region out of range");
                    Ok(())
                }
            },
            _ => {
                debug!("occlusion notice without region or state");
                Ok(())
            }
        }
    }

    fn update_base_info(&self, body: &Value) -> Result<usize, GatewayError> {
        self.update_group(cache::BASE_INFO_GROUP, body)
    }

    fn update_group(&self, group: &str, body: &Value) -> Result<usize, GatewayError> {
        let items = items_object(body)?;
        let written = self.cache.update_group(group, items);
        debug!(group, written, "device status updated");
        Ok(written)
    }

    /// Re-select the dialect once the device model is known.
    fn select_dialect(&self) -> Result<(), GatewayError> {
        let Some(model) = self.cache.get(cache::MODEL) else {
            return Ok(());
        };
        let dialect = Dialect::from_model(&model);
        info!(%model, %dialect, "dialect selected from device model");
        self.control.protocol(dialect)
    }
}

fn items_object(body: &Value) -> Result<&Map<String, Value>, GatewayError> {
    body.get("items")
        .and_then(Value::as_object)
        .ok_or(GatewayError::MalformedResponse("missing items object"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{self, ControlCommand, ControlReceiver};
    use crate::protocol::tests::RecordingRpc;
    use std::time::Duration;

    fn router() -> (EventRouter, DeviceStatusCache, ControlReceiver) {
        let cache = DeviceStatusCache::new();
        let (handle, rx) = control::channel();
        (EventRouter::new(cache.clone(), handle), cache, rx)
    }

    fn next_command(rx: &mut ControlReceiver) -> Option<ControlCommand> {
        rx.try_recv().ok().map(|line| line.parse().unwrap())
    }

    #[test]
    fn occlusion_notice_becomes_control_line() {
        let (router, _, mut rx) = router();
        router
            .handle(VIDEO_OCCLUSION_EVENT, &json!({"event": {"region": 1, "state": true}}))
            .unwrap();
        assert_eq!(
            next_command(&mut rx),
            Some(ControlCommand::Occlusion {
                region: 1,
                occluded: true
            })
        );
    }

    #[test]
    fn incomplete_occlusion_notice_is_dropped() {
        let (router, _, mut rx) = router();
        router
            .handle(VIDEO_OCCLUSION_EVENT, &json!({"event": {"region": 1}}))
            .unwrap();
        assert!(next_command(&mut rx).is_none());
    }

    #[test]
    fn oversized_region_is_dropped() {
        let (router, _, mut rx) = router();
        router
            .handle(
                VIDEO_OCCLUSION_EVENT,
                &json!({"event": {"region": 4_294_967_296u64, "state": true}}),
            )
            .unwrap();
        assert!(next_command(&mut rx).is_none());
    }

    #[test]
    fn szyc_notice_updates_cache() {
        let (router, cache, _rx) = router();
        router
            .handle(SET_SZYC, &json!({"items": {"train_num": "88", "position_num": "2"}}))
            .unwrap();
        assert_eq!(cache.get(cache::TRAIN_NUM).as_deref(), Some("88"));
        assert_eq!(cache.get(cache::POSITION_NUM).as_deref(), Some("2"));
    }

    #[test]
    fn base_info_with_model_selects_dialect() {
        let (router, cache, mut rx) = router();
        router
            .handle(SET_BASE_INFO, &json!({"items": {"model": "dttx-cam", "firmware": "1.0.2"}}))
            .unwrap();
        assert_eq!(cache.get(cache::FIRMWARE).as_deref(), Some("1.0.2"));
        assert_eq!(
            next_command(&mut rx),
            Some(ControlCommand::Protocol(Dialect::Dttx))
        );
    }

    #[test]
    fn malformed_items_are_errors() {
        let (router, _, _rx) = router();
        assert!(router.handle(SET_SZYC, &json!({"items": [1, 2]})).is_err());
        assert!(router.handle("something_else", &json!(null)).is_ok());
    }

    #[tokio::test]
    async fn bootstrap_requests_both_groups() {
        let (router, cache, mut rx) = router();
        let rpc = RecordingRpc::default();
        rpc.respond("get_base_info", json!({"items": {"model": "DCTX-1", "firmware": "2.1.0"}}));
        rpc.respond("get_szyc", json!({"items": {"carriage_num": "4"}}));

        router.bootstrap(&rpc, Duration::from_secs(1)).await;

        let actions: Vec<_> = rpc.calls().into_iter().map(|(a, _)| a).collect();
        assert_eq!(actions, vec!["get_base_info", "get_szyc"]);
        assert_eq!(rpc.calls()[1].1, json!({"items": ["train_num", "carriage_num", "position_num"]}));
        assert_eq!(cache.get(cache::CARRIAGE_NUM).as_deref(), Some("4"));
        assert_eq!(
            next_command(&mut rx),
            Some(ControlCommand::Protocol(Dialect::Dctx))
        );
    }

    #[test]
    fn bootstrap_survives_bus_failure() {
        let (router, cache, mut rx) = router();
        let rpc = RecordingRpc::default();
        tokio_test::block_on(router.bootstrap(&rpc, Duration::from_secs(1)));
        assert!(cache.is_empty());
        assert!(next_command(&mut rx).is_none());
    }
}
