//! OSD text datagrams received on the local UDP side channel.
//!
//! ```text
//! head:      u8    0xFF
//! code:      u8    0x09
//! keeptime:  u8
//! x:         u16   big-endian
//! y:         u16   big-endian
//! fontsize:  u16   big-endian
//! length:    u16   big-endian, <= 1024
//! data:      [u8; 1024]
//! checksum:  u8    carried, not checked
//! ```

use serde_json::{Value, json};

use crate::error::GatewayError;

pub const OSD_HEAD: u8 = 0xFF;
pub const OSD_CODE: u8 = 0x09;
pub const OSD_HEADER_SIZE: usize = 11;
pub const OSD_DATA_SIZE: usize = 1024;
/// Full datagram including the trailing checksum.
pub const OSD_DATAGRAM_SIZE: usize = OSD_HEADER_SIZE + OSD_DATA_SIZE + 1;

/// Event name the datagram is republished under.
pub const OSD_EVENT: &str = "set_osd";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsdDatagram {
    pub keeptime: u8,
    pub x: u16,
    pub y: u16,
    pub fontsize: u16,
    pub text: String,
}

impl OsdDatagram {
    pub fn decode(datagram: &[u8]) -> Result<Self, GatewayError> {
        if datagram.len() < OSD_HEADER_SIZE {
            return Err(GatewayError::PayloadTooShort {
                message: "osd",
                expected: OSD_HEADER_SIZE,
                actual: datagram.len(),
            });
        }
        if datagram[0] != OSD_HEAD {
            return Err(GatewayError::InvalidStartMarker(datagram[0]));
        }
        if datagram[1] != OSD_CODE {
            return Err(GatewayError::UnknownMessage {
                dialect: "OSD",
                value: datagram[1],
            });
        }

        let be16 = |at: usize| u16::from_be_bytes([datagram[at], datagram[at + 1]]);
        let length = be16(9) as usize;
        if length > OSD_DATA_SIZE {
            return Err(GatewayError::PayloadTooLarge {
                size: length,
                max: OSD_DATA_SIZE,
            });
        }
        let data = datagram
            .get(OSD_HEADER_SIZE..OSD_HEADER_SIZE + length)
            .ok_or(GatewayError::PayloadTooShort {
                message: "osd",
                expected: OSD_HEADER_SIZE + length,
                actual: datagram.len(),
            })?;

        let text = String::from_utf8_lossy(data)
            .trim_end_matches('\0')
            .to_string();

        Ok(Self {
            keeptime: datagram[2],
            x: be16(3),
            y: be16(5),
            fontsize: be16(7),
            text,
        })
    }

    /// Body of the `set_osd` event.
    pub fn to_event_body(&self) -> Value {
        json!({
            "items": {
                "keeptime": self.keeptime,
                "x": self.x,
                "y": self.y,
                "fontsize": self.fontsize,
                "text": self.text,
            }
        })
    }
}
