//! DCTX dialect: cameras addressed by carriage and position.

use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{DispatchContext, MANUFACTURER, cached_number, ensure_len, firmware_version, padded};
use crate::cache::{self, DeviceStatusCache};
use crate::error::GatewayError;
use crate::frame::Frame;
use crate::message::DctxMessage;

const IMAGE_ITEMS: [&str; 4] = ["brightness", "chrominance", "saturation", "contrast"];

// ── Payload records ──────────────────────────────────────────────

/// The four picture controls, one byte each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageAttributes {
    pub brightness: u8,
    pub chrominance: u8,
    pub saturation: u8,
    pub contrast: u8,
}

impl ImageAttributes {
    pub const SIZE: usize = 4;

    pub fn from_bytes(payload: &[u8]) -> Result<Self, GatewayError> {
        ensure_len("set_image", payload, Self::SIZE)?;
        Ok(Self {
            brightness: payload[0],
            chrominance: payload[1],
            saturation: payload[2],
            contrast: payload[3],
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        [self.brightness, self.chrominance, self.saturation, self.contrast]
    }

    fn to_items(self) -> Value {
        json!({
            "items": {
                "brightness": self.brightness,
                "chrominance": self.chrominance,
                "saturation": self.saturation,
                "contrast": self.contrast,
            }
        })
    }

    /// Read the attributes out of a `get_image` response body.
    fn from_response(body: &Value) -> Result<Self, GatewayError> {
        let items = body
            .get("items")
            .ok_or(GatewayError::MalformedResponse("get_image: missing items"))?;
        let field = |name: &'static str| -> Result<u8, GatewayError> {
            items
                .get(name)
                .and_then(Value::as_i64)
                .map(|v| v as u8)
                .ok_or(GatewayError::MalformedResponse(name))
        };
        Ok(Self {
            brightness: field("brightness")?,
            chrominance: field("chrominance")?,
            saturation: field("saturation")?,
            contrast: field("contrast")?,
        })
    }
}

/// Overlay data pushed by the train controller.
///
/// ```text
/// year:u16  mon  day  hour  min  sec  speed:u16  train_num[7]  carriage  position
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsdRequest {
    pub datetime: TimeSyncRequest,
    pub speed: u16,
    pub train_num: [u8; 7],
    pub carriage_num: u8,
    pub position_num: u8,
}

impl OsdRequest {
    pub const SIZE: usize = 18;

    pub fn from_bytes(payload: &[u8]) -> Result<Self, GatewayError> {
        ensure_len("set_osd", payload, Self::SIZE)?;
        let mut train_num = [0u8; 7];
        train_num.copy_from_slice(&payload[9..16]);
        Ok(Self {
            datetime: TimeSyncRequest::from_bytes(&payload[..TimeSyncRequest::SIZE])?,
            speed: u16::from_be_bytes([payload[7], payload[8]]),
            train_num,
            carriage_num: payload[16],
            position_num: payload[17],
        })
    }

    /// Train number up to the first NUL.
    pub fn train_num(&self) -> String {
        let end = self.train_num.iter().position(|&b| b == 0).unwrap_or(7);
        String::from_utf8_lossy(&self.train_num[..end]).into_owned()
    }

    fn to_items(&self) -> Value {
        json!({
            "items": {
                "train_num": self.train_num(),
                "carriage_num": self.carriage_num.to_string(),
                "position_num": self.position_num.to_string(),
            }
        })
    }
}

/// Wall-clock time as sent by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSyncRequest {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl TimeSyncRequest {
    pub const SIZE: usize = 7;

    pub fn from_bytes(payload: &[u8]) -> Result<Self, GatewayError> {
        ensure_len("time_sync", payload, Self::SIZE)?;
        Ok(Self {
            year: u16::from_be_bytes([payload[0], payload[1]]),
            month: payload[2],
            day: payload[3],
            hour: payload[4],
            minute: payload[5],
            second: payload[6],
        })
    }

    /// `YYYY-MM-DD HH:MM:SS`
    pub fn datetime(&self) -> String {
        format!(
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

/// Query-status answer (16 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StatusRecord {
    carriage_num: u8,
    position_num: u8,
    online: bool,
    camera_type: u8,
    version: u16,
}

impl StatusRecord {
    const SIZE: usize = 16;

    const OFFLINE: Self = Self {
        carriage_num: 0,
        position_num: 0,
        online: false,
        camera_type: 0,
        version: 0,
    };

    fn from_cache(cache: &DeviceStatusCache) -> Self {
        let (Some(firmware), Some(carriage), Some(position)) = (
            cache.get(cache::FIRMWARE),
            cache.get(cache::CARRIAGE_NUM),
            cache.get(cache::POSITION_NUM),
        ) else {
            return Self::OFFLINE;
        };

        Self {
            carriage_num: super::parse_c_ulong(&carriage) as u8,
            position_num: super::parse_c_ulong(&position) as u8,
            online: true,
            camera_type: cached_number(cache, cache::DEVICE_TYPE) as u8,
            version: firmware_version(&firmware).unwrap_or(0),
        }
    }

    fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0] = self.carriage_num;
        out[1] = self.position_num;
        out[2] = self.online as u8;
        out[3] = self.camera_type;
        out[4..14].copy_from_slice(&padded::<10>(MANUFACTURER));
        out[14..16].copy_from_slice(&self.version.to_be_bytes());
        out
    }
}

// ── Handlers ─────────────────────────────────────────────────────

pub(super) async fn dispatch(
    frame: &Frame,
    ctx: &DispatchContext<'_>,
) -> Result<Option<Frame>, GatewayError> {
    let message = DctxMessage::try_from(frame.message_type())?;
    let payload = frame.payload();
    debug!(%message, len = payload.len(), "dctx dispatch");

    match message {
        DctxMessage::HeartbeatAck => Ok(None),
        DctxMessage::Heartbeat => {
            Frame::encode(DctxMessage::Heartbeat.response_code(), &[]).map(Some)
        }
        DctxMessage::SetImage => {
            let attrs = ImageAttributes::from_bytes(payload)?;
            ctx.command("set_image", attrs.to_items()).await;
            Ok(None)
        }
        DctxMessage::GetImage => {
            let attrs = get_image(ctx).await;
            Frame::encode(DctxMessage::GetImage.response_code(), &attrs.to_bytes()).map(Some)
        }
        DctxMessage::SetOsd => {
            let osd = OsdRequest::from_bytes(payload)?;
            ctx.command("set_szyc", osd.to_items()).await;
            Ok(None)
        }
        DctxMessage::TimeSync => {
            let time = TimeSyncRequest::from_bytes(payload)?;
            let body = json!({ "items": { "datetime": time.datetime() } });
            ctx.command("set_datetime", body).await;
            Ok(None)
        }
        DctxMessage::QueryStatus => {
            let record = StatusRecord::from_cache(ctx.cache);
            Frame::encode(DctxMessage::QueryStatus.response_code(), &record.to_bytes()).map(Some)
        }
        // Only ever sent by the gateway.
        DctxMessage::VideoFault => Err(GatewayError::UnknownMessage {
            dialect: "DCTX",
            value: frame.message_type(),
        }),
    }
}

/// Current picture controls, zeros when the bus cannot answer.
async fn get_image(ctx: &DispatchContext<'_>) -> ImageAttributes {
    let request = json!({ "items": IMAGE_ITEMS });
    let result = match ctx.invoke("get_image", request).await {
        Ok(body) => ImageAttributes::from_response(&body),
        Err(e) => Err(e),
    };
    result.unwrap_or_else(|e| {
        warn!(error = %e, "get_image failed, answering with defaults");
        ImageAttributes::default()
    })
}

pub(super) fn report_status(
    cache: &DeviceStatusCache,
    occlusion: bool,
    loss: bool,
) -> Result<Frame, GatewayError> {
    let payload = [
        cached_number(cache, cache::CARRIAGE_NUM) as u8,
        cached_number(cache, cache::POSITION_NUM) as u8,
        occlusion as u8,
        loss as u8,
    ];
    Frame::encode(DctxMessage::VideoFault.code(), &payload)
}
