//! State machine implementation for the OTA upgrade protocol.

use std::fmt;
use std::time::Duration;

use tracing::{debug, info, trace};

use crate::error::{OtaError, OtaErrorKind};
use crate::image::DfuMetadata;
use crate::protocol::{DeviceIdentity, ProtocolVariant, RunningCrc};

/// Upgrade protocol state.
///
/// Declaration order is protocol order, so `state > EnableNotification`
/// means "the session has progressed past notification setup".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum OtaState {
    #[default]
    Idle,
    Connect,
    ServiceDiscover,
    ReadAppInfo,
    EnableNotification,
    PrepareForDownload,
    StartDownload,
    DataTransfer,
    Verify,
    Abort,
    Complete,
}

impl fmt::Display for OtaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OtaState::Idle => write!(f, "IDLE"),
            OtaState::Connect => write!(f, "CONNECT"),
            OtaState::ServiceDiscover => write!(f, "SERVICE_DISCOVER"),
            OtaState::ReadAppInfo => write!(f, "READ_APP_INFO"),
            OtaState::EnableNotification => write!(f, "ENABLE_NOTIFICATION"),
            OtaState::PrepareForDownload => write!(f, "PREPARE_FOR_DOWNLOAD"),
            OtaState::StartDownload => write!(f, "START_DOWNLOAD"),
            OtaState::DataTransfer => write!(f, "DATA_TRANSFER"),
            OtaState::Verify => write!(f, "VERIFY"),
            OtaState::Abort => write!(f, "ABORT"),
            OtaState::Complete => write!(f, "COMPLETE"),
        }
    }
}

impl OtaState {
    /// States from which an explicit abort is possible.
    pub fn can_abort(&self) -> bool {
        (OtaState::PrepareForDownload..=OtaState::Verify).contains(self)
    }

    /// States that are torn down without the abort command.
    pub fn before_download(&self) -> bool {
        *self <= OtaState::EnableNotification
    }

    pub fn is_terminal(&self) -> bool {
        *self == OtaState::Complete
    }
}

/// What the session is waiting on within the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubState {
    #[default]
    None,
    AwaitingAppInfo,
    AwaitingMeshMetadata,
    /// Command written, waiting for the write to complete.
    AwaitingWrite,
    /// Command write completed, status will arrive as an indication.
    AwaitingResponse,
    /// Data chunk in flight.
    AwaitingChunkAck,
}

impl fmt::Display for SubState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubState::None => write!(f, "-"),
            SubState::AwaitingAppInfo => write!(f, "awaiting app info"),
            SubState::AwaitingMeshMetadata => write!(f, "awaiting mesh metadata"),
            SubState::AwaitingWrite => write!(f, "awaiting write"),
            SubState::AwaitingResponse => write!(f, "awaiting response"),
            SubState::AwaitingChunkAck => write!(f, "awaiting chunk ack"),
        }
    }
}

/// Direct firmware push, or upload to a mesh DFU distributor.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionMode {
    #[default]
    Direct,
    DfuUpload(DfuMetadata),
}

impl SessionMode {
    pub fn is_dfu(&self) -> bool {
        matches!(self, SessionMode::DfuUpload(_))
    }

    pub fn dfu_metadata(&self) -> Option<&DfuMetadata> {
        match self {
            SessionMode::DfuUpload(metadata) => Some(metadata),
            SessionMode::Direct => None,
        }
    }
}

/// Per-state timeout durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    pub base: Duration,
    pub extended: Duration,
    pub connect: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            base: crate::protocol::BASE_TIMEOUT,
            extended: crate::protocol::EXTENDED_TIMEOUT,
            connect: crate::protocol::CONNECT_TIMEOUT,
        }
    }
}

impl TimeoutPolicy {
    /// Duration for a state, `None` for states that never time out.
    pub fn duration_for(&self, state: OtaState) -> Option<Duration> {
        match state {
            OtaState::Idle | OtaState::Complete => None,
            OtaState::Connect => Some(self.connect),
            OtaState::ServiceDiscover | OtaState::Verify => Some(self.extended),
            _ => Some(self.base),
        }
    }
}

/// The single outstanding timeout of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutHandle {
    pub id: u64,
    pub state: OtaState,
    pub duration: Duration,
}

/// Timer bookkeeping, mostly for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerStats {
    pub scheduled: u64,
    pub cancelled: u64,
    pub fired: u64,
}

/// Offset and CRC tracking for the data transfer.
#[derive(Debug, Default)]
pub struct TransferTracker {
    /// Total image size.
    pub image_size: usize,
    /// Acknowledged bytes.
    pub offset: usize,
    /// Size of the chunk in flight (0 when idle).
    pub transferring: usize,
    /// Chunk size, fixed once computed.
    pub max_chunk_size: usize,
    /// Chunks queued so far.
    pub chunks_sent: usize,
    /// Running CRC over queued chunks.
    pub crc: RunningCrc,
    /// Number of times the CRC was finalized (must end at 1).
    pub crc_finalizations: usize,
}

impl TransferTracker {
    pub fn new(image_size: usize) -> Self {
        Self {
            image_size,
            ..Default::default()
        }
    }

    pub fn remaining(&self) -> usize {
        self.image_size - self.offset
    }

    /// Range of the next chunk, or `None` when everything is acknowledged.
    pub fn next_chunk(&self) -> Option<std::ops::Range<usize>> {
        if self.offset >= self.image_size || self.max_chunk_size == 0 {
            return None;
        }
        let len = self.max_chunk_size.min(self.remaining());
        Some(self.offset..self.offset + len)
    }

    pub fn is_done(&self) -> bool {
        self.offset == self.image_size
    }

    pub fn total_chunks(&self) -> usize {
        if self.max_chunk_size == 0 {
            0
        } else {
            self.image_size.div_ceil(self.max_chunk_size)
        }
    }
}

/// Runtime state of a session, mutated only on the serial path.
#[derive(Debug, Default)]
pub struct StateMachineContext {
    /// Current protocol state.
    pub state: OtaState,
    pub sub_state: SubState,
    pub mode: SessionMode,
    /// At most one outstanding timeout.
    pub scheduled_timeout: Option<TimeoutHandle>,
    next_timeout_id: u64,
    pub timer_stats: TimerStats,
    pub transfer: TransferTracker,
    /// First error wins.
    pub completion_error: Option<OtaError>,
    pub is_running: bool,
    pub is_connected: bool,
    pub variant: Option<ProtocolVariant>,
    pub identity: Option<DeviceIdentity>,
    /// Set when the abort was requested on behalf of mesh DFU.
    pub dfu_stop_requested: bool,
    /// The final notification went out.
    pub completion_emitted: bool,
}

impl StateMachineContext {
    pub fn new(mode: SessionMode, image_size: usize) -> Self {
        Self {
            mode,
            transfer: TransferTracker::new(image_size),
            ..Default::default()
        }
    }

    /// Transition to a new state.
    pub fn goto_state(&mut self, new_state: OtaState) {
        info!(from = %self.state, to = %new_state, "State transition");
        self.state = new_state;
        self.sub_state = SubState::None;
    }

    pub fn set_sub_state(&mut self, sub_state: SubState) {
        trace!(state = %self.state, sub_state = %sub_state, "Sub-state");
        self.sub_state = sub_state;
    }

    /// Arm a fresh timeout for the current state, cancelling any prior one.
    pub fn schedule_timeout(&mut self, policy: &TimeoutPolicy) -> Option<TimeoutHandle> {
        self.cancel_timeout();
        let duration = policy.duration_for(self.state)?;
        self.next_timeout_id += 1;
        let handle = TimeoutHandle {
            id: self.next_timeout_id,
            state: self.state,
            duration,
        };
        self.scheduled_timeout = Some(handle);
        self.timer_stats.scheduled += 1;
        debug!(
            id = handle.id,
            state = %handle.state,
            timeout_ms = duration.as_millis() as u64,
            "Timeout scheduled"
        );
        Some(handle)
    }

    /// Cancel the outstanding timeout, if any.
    pub fn cancel_timeout(&mut self) {
        if let Some(handle) = self.scheduled_timeout.take() {
            self.timer_stats.cancelled += 1;
            trace!(id = handle.id, state = %handle.state, "Timeout cancelled");
        }
    }

    /// Consume an expired timeout. Stale ids (already cancelled or
    /// rescheduled) are rejected.
    pub fn expire_timeout(&mut self, id: u64) -> Option<TimeoutHandle> {
        match self.scheduled_timeout {
            Some(handle) if handle.id == id => {
                self.scheduled_timeout = None;
                self.timer_stats.fired += 1;
                Some(handle)
            }
            _ => {
                trace!(id, "Ignoring stale timeout");
                None
            }
        }
    }

    pub fn has_timeout(&self) -> bool {
        self.scheduled_timeout.is_some()
    }

    /// Record an error tagged with the current state. The first one wins.
    pub fn record_error(&mut self, kind: OtaErrorKind) {
        let error = OtaError::new(self.state, kind);
        match &self.completion_error {
            None => {
                tracing::warn!(error = %error, "Upgrade error");
                self.completion_error = Some(error);
            }
            Some(first) => {
                debug!(error = %error, first = %first, "Dropping subsequent error");
            }
        }
    }
}
