//! Projector control protocol types.
//!
//! The protocol is a strictly half-duplex request/response exchange over a
//! plain TCP stream.  Every request carries a 4-byte ASCII "community" tag;
//! there is no checksum and no authentication beyond that tag.
//!
//! All multi-byte integers are big-endian.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Protocol version byte carried by every request and response.
pub const PROTOCOL_VERSION: u8 = 0x02;

/// Category byte identifying projector-class devices.
pub const PROTOCOL_CATEGORY: u8 = 0x0A;

/// Size of the fixed header shared by requests and responses.
///
/// `version(1) + category(1) + community(4) + request_type/result(1) +
/// item_id(2) + length(1)`.
pub const HEADER_SIZE: usize = 10;

/// Offset of the result discriminator within a response.
pub const RESULT_OFFSET: usize = 6;

/// Offset of the length byte within a response.
pub const LENGTH_OFFSET: usize = 9;

/// Default TCP port the projector listens on.
pub const DEFAULT_PORT: u16 = 53484;

/// Default community tag shipped with the projector.
pub const DEFAULT_COMMUNITY: &str = "SONY";

// ── Community ─────────────────────────────────────────────────────────────────

/// A validated 4-byte ASCII community tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Community([u8; 4]);

/// Returned when a community string is not exactly four ASCII characters.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("community must be exactly 4 ASCII characters, got {0:?}")]
pub struct InvalidCommunity(pub String);

impl Community {
    /// Validates `tag` and wraps it.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidCommunity`] if `tag` is not four ASCII bytes long.
    pub fn new(tag: &str) -> Result<Self, InvalidCommunity> {
        let bytes = tag.as_bytes();
        if bytes.len() != 4 || !tag.is_ascii() {
            return Err(InvalidCommunity(tag.to_string()));
        }
        let mut buf = [0u8; 4];
        buf.copy_from_slice(bytes);
        Ok(Self(buf))
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl Default for Community {
    fn default() -> Self {
        Self(*b"SONY")
    }
}

impl fmt::Display for Community {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Validated as ASCII at construction.
        f.write_str(std::str::from_utf8(&self.0).unwrap_or("????"))
    }
}

// ── Request type / result codes ───────────────────────────────────────────────

/// Request type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RequestType {
    Set = 0x00,
    Get = 0x01,
}

/// Result discriminator at [`RESULT_OFFSET`] of every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResultCode {
    Error = 0x00,
    Ok = 0x01,
}

impl TryFrom<u8> for ResultCode {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x00 => Ok(ResultCode::Error),
            0x01 => Ok(ResultCode::Ok),
            _ => Err(()),
        }
    }
}

// ── Error taxonomy ────────────────────────────────────────────────────────────

/// Closed set of failures a projector exchange can produce.
///
/// Protocol-level kinds arrive inside a well-formed ERROR response.  The
/// transport kinds ([`ErrorKind::NetworkTimeout`], [`ErrorKind::CommTimeout`],
/// [`ErrorKind::OtherCommError`]) are produced locally by the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[repr(u16)]
pub enum ErrorKind {
    #[error("invalid item")]
    InvalidItem = 0x0101,
    #[error("invalid item request")]
    InvalidItemRequest = 0x0102,
    #[error("invalid length")]
    InvalidLength = 0x0103,
    #[error("invalid data")]
    InvalidData = 0x0104,
    #[error("short data")]
    ShortData = 0x0111,
    #[error("item not applicable on this device")]
    NotApplicableItem = 0x0180,
    #[error("different community")]
    DifferentCommunity = 0x0201,
    #[error("invalid version")]
    InvalidVersion = 0x1001,
    #[error("invalid category")]
    InvalidCategory = 0x1002,
    #[error("invalid request")]
    InvalidRequest = 0x1003,
    #[error("short header")]
    ShortHeader = 0x1004,
    #[error("short community")]
    ShortCommunity = 0x1005,
    #[error("short command")]
    ShortCommand = 0x1006,
    #[error("network timeout")]
    NetworkTimeout = 0x2001,
    #[error("communication timeout")]
    CommTimeout = 0xF001,
    #[error("checksum error")]
    CheckSumError = 0xF010,
    #[error("framing error")]
    FramingError = 0xF020,
    #[error("parity error")]
    ParityError = 0xF030,
    #[error("overrun error")]
    OverRunError = 0xF040,
    #[error("communication error")]
    OtherCommError = 0xF050,
    #[error("unknown response")]
    UnknownResponse = 0xF0F0,
    #[error("read error")]
    ReadError = 0xF110,
    #[error("write error")]
    WriteError = 0xF120,
}

impl ErrorKind {
    /// Every defined kind, in code order.
    pub const ALL: [ErrorKind; 23] = [
        ErrorKind::InvalidItem,
        ErrorKind::InvalidItemRequest,
        ErrorKind::InvalidLength,
        ErrorKind::InvalidData,
        ErrorKind::ShortData,
        ErrorKind::NotApplicableItem,
        ErrorKind::DifferentCommunity,
        ErrorKind::InvalidVersion,
        ErrorKind::InvalidCategory,
        ErrorKind::InvalidRequest,
        ErrorKind::ShortHeader,
        ErrorKind::ShortCommunity,
        ErrorKind::ShortCommand,
        ErrorKind::NetworkTimeout,
        ErrorKind::CommTimeout,
        ErrorKind::CheckSumError,
        ErrorKind::FramingError,
        ErrorKind::ParityError,
        ErrorKind::OverRunError,
        ErrorKind::OtherCommError,
        ErrorKind::UnknownResponse,
        ErrorKind::ReadError,
        ErrorKind::WriteError,
    ];

    /// The 16-bit code carried on the wire.
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Maps a wire code to its kind; unrecognised codes become
    /// [`ErrorKind::UnknownResponse`].
    pub fn from_code(code: u16) -> Self {
        Self::ALL
            .into_iter()
            .find(|kind| kind.code() == code)
            .unwrap_or(ErrorKind::UnknownResponse)
    }

    /// Whether the failure happened below the protocol (connect, read, write).
    pub fn is_transport(self) -> bool {
        matches!(
            self,
            ErrorKind::NetworkTimeout | ErrorKind::CommTimeout | ErrorKind::OtherCommError
        )
    }
}

// ── Item catalogue ────────────────────────────────────────────────────────────

/// Item identifiers understood by the projector.
pub mod items {
    pub const INPUT: u16 = 0x0001;
    pub const CALIBRATION_PRESET: u16 = 0x0002;
    pub const CONTRAST: u16 = 0x0010;
    pub const BRIGHTNESS: u16 = 0x0011;
    pub const COLOR: u16 = 0x0012;
    pub const HUE: u16 = 0x0013;
    pub const SHARPNESS: u16 = 0x0014;
    pub const STATUS_ERROR: u16 = 0x0101;
    pub const STATUS_POWER: u16 = 0x0102;
    pub const LAMP_TIMER: u16 = 0x0113;
    pub const POWER_CONTROL: u16 = 0x0130;
    pub const MODEL_NAME: u16 = 0x8001;
    pub const SERIAL_NUMBER: u16 = 0x8002;
}

/// Values reported by [`items::STATUS_POWER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum PowerState {
    Standby = 0,
    StartUp = 1,
    StartUpLamp = 2,
    PowerOn = 3,
    Cooling1 = 4,
    Cooling2 = 5,
    SavingCooling1 = 6,
    SavingCooling2 = 7,
    SavingStandby = 8,
}

impl PowerState {
    pub const ALL: [PowerState; 9] = [
        PowerState::Standby,
        PowerState::StartUp,
        PowerState::StartUpLamp,
        PowerState::PowerOn,
        PowerState::Cooling1,
        PowerState::Cooling2,
        PowerState::SavingCooling1,
        PowerState::SavingCooling2,
        PowerState::SavingStandby,
    ];

    /// Member name as used in rule files.
    pub fn name(self) -> &'static str {
        match self {
            PowerState::Standby => "Standby",
            PowerState::StartUp => "StartUp",
            PowerState::StartUpLamp => "StartUpLamp",
            PowerState::PowerOn => "PowerOn",
            PowerState::Cooling1 => "Cooling1",
            PowerState::Cooling2 => "Cooling2",
            PowerState::SavingCooling1 => "SavingCooling1",
            PowerState::SavingCooling2 => "SavingCooling2",
            PowerState::SavingStandby => "SavingStandby",
        }
    }
}

impl TryFrom<u16> for PowerState {
    type Error = ();

    fn try_from(value: u16) -> Result<Self, ()> {
        PowerState::ALL
            .into_iter()
            .find(|state| *state as u16 == value)
            .ok_or(())
    }
}

// ── Request ───────────────────────────────────────────────────────────────────

/// One scalar request: a single item, read or written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub community: Community,
    pub request_type: RequestType,
    pub item_id: u16,
    pub data: Vec<u8>,
}

impl Request {
    /// A `Get` for `item_id` with no payload.
    pub fn get(community: Community, item_id: u16) -> Self {
        Self {
            community,
            request_type: RequestType::Get,
            item_id,
            data: Vec::new(),
        }
    }

    /// A `Set` of `item_id` to a 16-bit value.
    pub fn set(community: Community, item_id: u16, value: u16) -> Self {
        Self {
            community,
            request_type: RequestType::Set,
            item_id,
            data: value.to_be_bytes().to_vec(),
        }
    }
}
