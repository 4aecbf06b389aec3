//! Command status returned by the peer.

use std::fmt;

/// Status byte returned in response to a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandStatus {
    Success = 0,
    Busy = 1,
    Unsupported = 2,
    IllegalOperation = 3,
    InvalidParameter = 4,
    InvalidState = 5,
    InvalidImageSize = 6,
    InvalidImage = 7,
    InvalidCrc = 8,
    FlashWriteFailed = 9,
    OutOfResources = 10,
    Timeout = 11,
    Aborted = 12,
    CommandResponseError = 13,
}

impl CommandStatus {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Success,
            1 => Self::Busy,
            2 => Self::Unsupported,
            3 => Self::IllegalOperation,
            4 => Self::InvalidParameter,
            5 => Self::InvalidState,
            6 => Self::InvalidImageSize,
            7 => Self::InvalidImage,
            8 => Self::InvalidCrc,
            9 => Self::FlashWriteFailed,
            10 => Self::OutOfResources,
            11 => Self::Timeout,
            12 => Self::Aborted,
            13 => Self::CommandResponseError,
            _ => return None,
        })
    }

    /// Decode a response. Anything but a single known status byte is
    /// reported as `Unsupported`.
    pub fn decode(response: Option<&[u8]>) -> Self {
        match response {
            Some([byte]) => Self::from_u8(*byte).unwrap_or(Self::Unsupported),
            _ => Self::Unsupported,
        }
    }

    pub fn is_success(&self) -> bool {
        *self == Self::Success
    }

    pub fn as_byte(&self) -> u8 {
        *self as u8
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Busy => "device busy",
            Self::Unsupported => "command unsupported",
            Self::IllegalOperation => "illegal operation",
            Self::InvalidParameter => "invalid parameter",
            Self::InvalidState => "invalid state",
            Self::InvalidImageSize => "invalid image size",
            Self::InvalidImage => "invalid image",
            Self::InvalidCrc => "image CRC mismatch",
            Self::FlashWriteFailed => "flash write failed",
            Self::OutOfResources => "out of resources",
            Self::Timeout => "device timeout",
            Self::Aborted => "aborted by device",
            Self::CommandResponseError => "command response error",
        }
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.as_byte())
    }
}
