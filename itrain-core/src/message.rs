//! Message type codes for both device dialects.
//!
//! Uses enums with `TryFrom<u8>`; unknown codes surface as
//! [`GatewayError::UnknownMessage`] instead of panicking.
//!
//! Replies carry the request code plus [`RESPONSE_OFFSET`].

use crate::error::GatewayError;
use std::fmt;

/// Added to a request code to form its reply code.
pub const RESPONSE_OFFSET: u8 = 0x50;

// ── DctxMessage ──────────────────────────────────────────────────

/// Message types of the DCTX (camera-per-carriage) dialect.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DctxMessage {
    /// Keep-alive request, sent by either side.
    Heartbeat = 0x01,
    /// Keep-alive answer.
    HeartbeatAck = 0x51,
    /// Push brightness, chrominance, saturation and contrast.
    SetImage = 0x02,
    /// Read the four image parameters back.
    GetImage = 0x03,
    /// Train/carriage/position overlay data.
    SetOsd = 0x05,
    /// Set the device clock.
    TimeSync = 0x06,
    /// Ask for the device status record.
    QueryStatus = 0x08,
    /// Unsolicited video fault report.
    VideoFault = 0x09,
}

impl DctxMessage {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn response_code(self) -> u8 {
        self.code() + RESPONSE_OFFSET
    }
}

impl TryFrom<u8> for DctxMessage {
    type Error = GatewayError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(DctxMessage::Heartbeat),
            0x51 => Ok(DctxMessage::HeartbeatAck),
            0x02 => Ok(DctxMessage::SetImage),
            0x03 => Ok(DctxMessage::GetImage),
            0x05 => Ok(DctxMessage::SetOsd),
            0x06 => Ok(DctxMessage::TimeSync),
            0x08 => Ok(DctxMessage::QueryStatus),
            0x09 => Ok(DctxMessage::VideoFault),
            _ => Err(GatewayError::UnknownMessage {
                dialect: "DCTX",
                value,
            }),
        }
    }
}

impl fmt::Display for DctxMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DctxMessage::Heartbeat => "heartbeat",
            DctxMessage::HeartbeatAck => "heartbeat_ack",
            DctxMessage::SetImage => "set_image",
            DctxMessage::GetImage => "get_image",
            DctxMessage::SetOsd => "set_osd",
            DctxMessage::TimeSync => "time_sync",
            DctxMessage::QueryStatus => "query_status",
            DctxMessage::VideoFault => "video_fault",
        };
        f.write_str(name)
    }
}

// ── DttxMessage ──────────────────────────────────────────────────

/// Message types of the DTTX (train-number addressed) dialect.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DttxMessage {
    /// Keep-alive request, sent by either side.
    Heartbeat = 0x01,
    /// Keep-alive answer.
    HeartbeatAck = 0x51,
    /// Ask for the device status record.
    QueryStatus = 0x07,
    /// Unsolicited video fault report.
    VideoFault = 0x08,
    /// Assign the device address from its position.
    SetNetwork = 0x12,
}

impl DttxMessage {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn response_code(self) -> u8 {
        self.code() + RESPONSE_OFFSET
    }
}

impl TryFrom<u8> for DttxMessage {
    type Error = GatewayError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(DttxMessage::Heartbeat),
            0x51 => Ok(DttxMessage::HeartbeatAck),
            0x07 => Ok(DttxMessage::QueryStatus),
            0x08 => Ok(DttxMessage::VideoFault),
            0x12 => Ok(DttxMessage::SetNetwork),
            _ => Err(GatewayError::UnknownMessage {
                dialect: "DTTX",
                value,
            }),
        }
    }
}

impl fmt::Display for DttxMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DttxMessage::Heartbeat => "heartbeat",
            DttxMessage::HeartbeatAck => "heartbeat_ack",
            DttxMessage::QueryStatus => "query_status",
            DttxMessage::VideoFault => "video_fault",
            DttxMessage::SetNetwork => "set_network",
        };
        f.write_str(name)
    }
}
