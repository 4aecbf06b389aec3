//! Session error taxonomy.

use thiserror::Error;

use crate::protocol::{CommandStatus, Opcode};
use crate::state::OtaState;

/// An upgrade failure, tagged with the state it occurred in.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} (in {state})")]
pub struct OtaError {
    pub state: OtaState,
    pub kind: OtaErrorKind,
}

impl OtaError {
    pub fn new(state: OtaState, kind: OtaErrorKind) -> Self {
        Self { state, kind }
    }

    pub fn code(&self) -> u32 {
        self.kind.code()
    }
}

/// Error category, used for grouping in notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Connection,
    Protocol,
    Data,
    Resource,
    Procedural,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OtaErrorKind {
    // Connection
    #[error("connection timed out")]
    ConnectionTimeout,
    #[error("connection failed: {0}")]
    ConnectFailed(String),
    #[error("device disconnected unexpectedly")]
    Disconnected,

    // Protocol
    #[error("device does not support upgrade")]
    UpgradeNotSupported,
    #[error("failed to enable notifications: {0}")]
    NotificationsFailed(String),
    #[error("device rejected {command}: {status}")]
    CommandRejected {
        command: Opcode,
        status: CommandStatus,
    },
    #[error("{command} failed: {reason}")]
    CommandFailed { command: Opcode, reason: String },

    // Data
    #[error("invalid firmware image: {0}")]
    InvalidImage(String),
    #[error("verification failed: {status}")]
    VerificationFailed { status: CommandStatus },
    #[error("data write failed at offset {offset} of {image_size}: {reason}")]
    TransferFailed {
        image_size: usize,
        offset: usize,
        reason: String,
    },

    // Resource
    #[error("no target device")]
    NoDevice,
    #[error("no firmware image")]
    NoImage,
    #[error("transport MTU {mtu} leaves no room for firmware data")]
    InvalidMtu { mtu: usize },
    #[error("could not start session: {0}")]
    SessionUnavailable(String),

    // Procedural
    #[error("another upgrade is already running")]
    Busy,
    #[error("timed out waiting for {0}")]
    Timeout(String),
    #[error("upgrade aborted")]
    Aborted,
    #[error("upgrade aborted for mesh DFU")]
    AbortedForDfu,
}

impl OtaErrorKind {
    /// Stable numeric code reported in notifications.
    pub fn code(&self) -> u32 {
        match self {
            OtaErrorKind::ConnectionTimeout => 0x0101,
            OtaErrorKind::ConnectFailed(_) => 0x0102,
            OtaErrorKind::Disconnected => 0x0103,
            OtaErrorKind::UpgradeNotSupported => 0x0201,
            OtaErrorKind::NotificationsFailed(_) => 0x0202,
            OtaErrorKind::CommandRejected { status, .. } => 0x0280 | status.as_byte() as u32,
            OtaErrorKind::CommandFailed { .. } => 0x0203,
            OtaErrorKind::InvalidImage(_) => 0x0301,
            OtaErrorKind::VerificationFailed { .. } => 0x0302,
            OtaErrorKind::TransferFailed { .. } => 0x0303,
            OtaErrorKind::NoDevice => 0x0401,
            OtaErrorKind::NoImage => 0x0402,
            OtaErrorKind::InvalidMtu { .. } => 0x0403,
            OtaErrorKind::SessionUnavailable(_) => 0x0404,
            OtaErrorKind::Busy => 0x0501,
            OtaErrorKind::Timeout(_) => 0x0502,
            OtaErrorKind::Aborted => 0x0503,
            OtaErrorKind::AbortedForDfu => 0x0504,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            OtaErrorKind::ConnectionTimeout
            | OtaErrorKind::ConnectFailed(_)
            | OtaErrorKind::Disconnected => ErrorCategory::Connection,
            OtaErrorKind::UpgradeNotSupported
            | OtaErrorKind::NotificationsFailed(_)
            | OtaErrorKind::CommandRejected { .. }
            | OtaErrorKind::CommandFailed { .. } => ErrorCategory::Protocol,
            OtaErrorKind::InvalidImage(_)
            | OtaErrorKind::VerificationFailed { .. }
            | OtaErrorKind::TransferFailed { .. } => ErrorCategory::Data,
            OtaErrorKind::NoDevice
            | OtaErrorKind::NoImage
            | OtaErrorKind::InvalidMtu { .. }
            | OtaErrorKind::SessionUnavailable(_) => ErrorCategory::Resource,
            OtaErrorKind::Busy
            | OtaErrorKind::Timeout(_)
            | OtaErrorKind::Aborted
            | OtaErrorKind::AbortedForDfu => ErrorCategory::Procedural,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_state() {
        let err = OtaError::new(OtaState::ServiceDiscover, OtaErrorKind::UpgradeNotSupported);
        assert_eq!(
            err.to_string(),
            "device does not support upgrade (in SERVICE_DISCOVER)"
        );
    }

    #[test]
    fn test_rejected_code_embeds_status() {
        let kind = OtaErrorKind::CommandRejected {
            command: Opcode::PrepareDownload,
            status: CommandStatus::Busy,
        };
        assert_eq!(kind.code(), 0x0281);
        assert_eq!(kind.category(), ErrorCategory::Protocol);
    }
}
