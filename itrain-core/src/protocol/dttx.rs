//! DTTX dialect: cameras addressed by a 32-bit train number.

use serde_json::json;
use tracing::debug;

use super::{DispatchContext, MANUFACTURER, cached_number, ensure_len, firmware_version, padded};
use crate::cache::{self, DeviceStatusCache};
use crate::error::GatewayError;
use crate::frame::Frame;
use crate::message::DttxMessage;

const NETMASK: &str = "255.255.0.0";
/// Host part of the camera address is its position plus this.
const HOST_OFFSET: u64 = 70;

/// Query-status answer (17 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StatusRecord {
    train_num: u32,
    position_num: u8,
    online: bool,
    camera_type: u8,
    version: u16,
}

impl StatusRecord {
    const SIZE: usize = 17;

    const OFFLINE: Self = Self {
        train_num: 0,
        position_num: 0,
        online: false,
        camera_type: 0,
        version: 0,
    };

    fn from_cache(cache: &DeviceStatusCache) -> Self {
        let (Some(firmware), Some(train), Some(position)) = (
            cache.get(cache::FIRMWARE),
            cache.get(cache::TRAIN_NUM),
            cache.get(cache::POSITION_NUM),
        ) else {
            return Self::OFFLINE;
        };

        Self {
            train_num: super::parse_c_ulong(&train) as u32,
            position_num: super::parse_c_ulong(&position) as u8,
            online: true,
            camera_type: cached_number(cache, cache::DEVICE_TYPE) as u8,
            version: firmware_version(&firmware).unwrap_or(0),
        }
    }

    fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[..4].copy_from_slice(&self.train_num.to_be_bytes());
        out[4] = self.position_num;
        out[5] = self.online as u8;
        out[6] = self.camera_type;
        out[7..15].copy_from_slice(&padded::<8>(MANUFACTURER));
        out[15..17].copy_from_slice(&self.version.to_be_bytes());
        out
    }
}

pub(super) async fn dispatch(
    frame: &Frame,
    ctx: &DispatchContext<'_>,
) -> Result<Option<Frame>, GatewayError> {
    let message = DttxMessage::try_from(frame.message_type())?;
    let payload = frame.payload();
    debug!(%message, len = payload.len(), "dttx dispatch");

    match message {
        DttxMessage::HeartbeatAck => Ok(None),
        DttxMessage::Heartbeat => {
            Frame::encode(DttxMessage::Heartbeat.response_code(), &[]).map(Some)
        }
        DttxMessage::QueryStatus => {
            let record = StatusRecord::from_cache(ctx.cache);
            Frame::encode(DttxMessage::QueryStatus.response_code(), &record.to_bytes()).map(Some)
        }
        DttxMessage::SetNetwork => {
            ensure_len("set_network", payload, 1)?;
            let network_num = payload[0];
            let position = ctx
                .cache
                .get(cache::POSITION_NUM)
                .ok_or(GatewayError::MissingProperty(cache::POSITION_NUM))?;
            let host = super::parse_c_ulong(&position).saturating_add(HOST_OFFSET);
            let body = json!({
                "items": {
                    "address": {
                        "ipaddr": format!("192.168.{network_num}.{host}"),
                        "netmask": NETMASK,
                    }
                }
            });
            ctx.command("set_network", body).await;
            Ok(None)
        }
        DttxMessage::VideoFault => Err(GatewayError::UnknownMessage {
            dialect: "DTTX",
            value: frame.message_type(),
        }),
    }
}

pub(super) fn report_status(
    cache: &DeviceStatusCache,
    occlusion: bool,
    loss: bool,
) -> Result<Frame, GatewayError> {
    let mut payload = [0u8; 7];
    payload[..4].copy_from_slice(&(cached_number(cache, cache::TRAIN_NUM) as u32).to_be_bytes());
    payload[4] = cached_number(cache, cache::POSITION_NUM) as u8;
    payload[5] = occlusion as u8;
    payload[6] = loss as u8;
    Frame::encode(DttxMessage::VideoFault.code(), &payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::tests::{RecordingRpc, context};

    fn request(kind: DttxMessage, payload: &[u8]) -> Frame {
        Frame::encode(kind.code(), payload).unwrap()
    }

    #[tokio::test]
    async fn query_status_offline_without_train() {
        let cache = DeviceStatusCache::new();
        cache.set(cache::POSITION_NUM, "2");
        cache.set(cache::FIRMWARE, "1.0.0");
        let rpc = RecordingRpc::default();

        let reply = dispatch(&request(DttxMessage::QueryStatus, &[]), &context(&cache, &rpc))
            .await
            .unwrap()
            .unwrap();

        let mut expected = [0u8; 17];
        expected[7..14].copy_from_slice(b"EASYWAY");
        assert_eq!(reply.message_type(), 0x57);
        assert_eq!(reply.payload(), &expected);
    }

    #[tokio::test]
    async fn query_status_online() {
        let cache = DeviceStatusCache::new();
        cache.set(cache::TRAIN_NUM, "305419896");
        cache.set(cache::POSITION_NUM, "4");
        cache.set(cache::FIRMWARE, "3.4.15");
        let rpc = RecordingRpc::default();

        let reply = dispatch(&request(DttxMessage::QueryStatus, &[]), &context(&cache, &rpc))
            .await
            .unwrap()
            .unwrap();

        let payload = reply.payload();
        assert_eq!(&payload[..4], &[0x12, 0x34, 0x56, 0x78]);
        assert_eq!(&payload[4..7], &[4, 1, 0]);
        assert_eq!(&payload[7..15], b"EASYWAY\0");
        assert_eq!(u16::from_be_bytes([payload[15], payload[16]]), 345);
    }

    #[tokio::test]
    async fn set_network_derives_address_from_position() {
        let cache = DeviceStatusCache::new();
        cache.set(cache::POSITION_NUM, "3");
        let rpc = RecordingRpc::default();
        rpc.respond("set_network", json!({}));

        let reply = dispatch(&request(DttxMessage::SetNetwork, &[9]), &context(&cache, &rpc))
            .await
            .unwrap();

        assert!(reply.is_none());
        assert_eq!(
            rpc.calls(),
            vec![(
                "set_network".to_string(),
                json!({"items": {"address": {"ipaddr": "192.168.9.73", "netmask": "255.255.0.0"}}})
            )]
        );
    }

    #[tokio::test]
    async fn set_network_without_position_sends_nothing() {
        let cache = DeviceStatusCache::new();
        let rpc = RecordingRpc::default();

        let err = dispatch(&request(DttxMessage::SetNetwork, &[9]), &context(&cache, &rpc))
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::MissingProperty(_)));
        assert!(rpc.calls().is_empty());
    }

    #[tokio::test]
    async fn set_network_needs_a_byte() {
        let cache = DeviceStatusCache::new();
        let rpc = RecordingRpc::default();
        let err = dispatch(&request(DttxMessage::SetNetwork, &[]), &context(&cache, &rpc))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::PayloadTooShort { .. }));
    }

    #[test]
    fn video_fault_layout() {
        let cache = DeviceStatusCache::new();
        cache.set(cache::TRAIN_NUM, "0x01020304");
        cache.set(cache::POSITION_NUM, "7");
        let frame = report_status(&cache, false, true).unwrap();
        assert_eq!(frame.message_type(), 0x08);
        assert_eq!(frame.payload(), &[1, 2, 3, 4, 7, 0, 1]);
    }
}
