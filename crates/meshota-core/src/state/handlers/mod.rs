//! Event handlers - the session's single dispatch point.
//!
//! This module is split into submodules by protocol phase:
//! - `connection`: Start, connect, disconnect and abort requests
//! - `discovery`: Service discovery, app info and notification setup
//! - `command`: Control point commands and their statuses
//! - `transfer`: Chunked firmware data transfer
//! - `complete`: Teardown and the final notification

mod command;
mod complete;
mod connection;
mod discovery;
mod transfer;

use tracing::{debug, warn};

use crate::config::OtaConfig;
use crate::error::OtaErrorKind;
use crate::events::{LogLevel, OtaEvent, OtaProgress};
use crate::image::FirmwareImage;
use crate::protocol::{Characteristic, Command};
use crate::session::Collaborators;
use crate::state::event::{EventSink, SessionEvent};
use crate::state::guard::RequestGuard;
use crate::state::machine::{OtaState, StateMachineContext, SubState};
use crate::transport::{TransportAdapter, TransportError};

/// Result of handling an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleResult {
    /// Stay in the current state.
    Continue,
    /// Enter the given state.
    Goto(OtaState),
    /// Record the error, then enter the given state.
    Fail(OtaErrorKind, OtaState),
}

/// Handler context containing all resources.
pub struct HandlerContext<'a> {
    pub state: &'a mut StateMachineContext,
    /// Released and dropped on completion.
    pub device: &'a mut Option<Box<dyn TransportAdapter>>,
    pub image: Option<&'a FirmwareImage>,
    pub config: &'a OtaConfig,
    pub sink: &'a EventSink,
    pub guard: &'a RequestGuard,
    pub collaborators: &'a Collaborators,
}

impl<'a> HandlerContext<'a> {
    pub(crate) fn emit(&self, event: OtaEvent) {
        self.collaborators.observer.on_event(&event);
    }

    pub(crate) fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.emit(OtaEvent::Log {
            level,
            message: message.into(),
        });
    }

    pub(crate) fn progress(&self) -> OtaProgress {
        OtaProgress {
            state: self.state.state,
            sub_state: self.state.sub_state,
            error_code: 0,
            error_description: None,
            image_size: self.state.transfer.image_size,
            transferred_size: self.state.transfer.offset,
        }
        .with_error(self.state.completion_error.as_ref())
    }

    pub(crate) fn emit_progress(&self) {
        self.emit(OtaEvent::Progress(self.progress()));
    }

    /// Arm a fresh timeout for the current state.
    pub(crate) fn arm_timeout(&mut self) {
        let policy = self.config.timeout_policy();
        self.state.schedule_timeout(&policy);
    }

    /// Write a command to the control point. Returns false without a device.
    pub(crate) fn send_command(&mut self, command: Command) -> bool {
        let Some(device) = self.device.as_deref_mut() else {
            return false;
        };
        debug!(command = %command, bytes = %hex::encode(command.encode()), "Sending command");
        device.write(Characteristic::ControlPoint, &command.encode());
        self.state.set_sub_state(SubState::AwaitingWrite);
        true
    }
}

/// Route one event to its handler.
pub fn dispatch(ctx: &mut HandlerContext<'_>, event: SessionEvent) -> HandleResult {
    if ctx.state.completion_emitted {
        debug!(event = ?event, "Session finished, ignoring event");
        return HandleResult::Continue;
    }

    match event {
        SessionEvent::Start => connection::handle_start(ctx),
        SessionEvent::ConnectionStateChanged { connected, error } => {
            connection::handle_connection_state(ctx, connected, error)
        }
        SessionEvent::AbortRequested { dfu } => connection::handle_abort_request(ctx, dfu),
        SessionEvent::ServiceDiscovered { variant, error } => {
            discovery::handle_service_discovered(ctx, variant, error)
        }
        SessionEvent::NotificationStateChanged { enabled, error } => {
            discovery::handle_notification_state(ctx, enabled, error)
        }
        SessionEvent::MeshMetadata { metadata } => discovery::handle_mesh_metadata(ctx, metadata),
        SessionEvent::ValueUpdated {
            characteristic,
            value,
            error,
        } => match characteristic {
            Characteristic::AppInfo => discovery::handle_app_info(ctx, value, error),
            Characteristic::ControlPoint => command::handle_indication(ctx, value, error),
            Characteristic::Data => HandleResult::Continue,
        },
        SessionEvent::WriteCompleted {
            characteristic,
            result,
        } => match characteristic {
            Characteristic::ControlPoint => command::handle_command_written(ctx, result),
            Characteristic::Data => transfer::handle_chunk_written(ctx, result),
            Characteristic::AppInfo => HandleResult::Continue,
        },
        SessionEvent::Timeout { id } => handle_timeout(ctx, id),
    }
}

/// Apply a handler result, following transitions until the machine settles.
pub fn apply(ctx: &mut HandlerContext<'_>, mut result: HandleResult) {
    loop {
        result = match result {
            HandleResult::Continue => return,
            HandleResult::Goto(next) => enter_state(ctx, next),
            HandleResult::Fail(kind, next) => {
                ctx.state.record_error(kind);
                enter_state(ctx, next)
            }
        };
    }
}

/// Cancel the prior timeout, transition, arm the new state's timeout and
/// run its entry action.
fn enter_state(ctx: &mut HandlerContext<'_>, next: OtaState) -> HandleResult {
    ctx.state.cancel_timeout();
    ctx.state.goto_state(next);
    ctx.arm_timeout();
    if next != OtaState::Complete {
        ctx.emit_progress();
    }

    match next {
        OtaState::Idle => HandleResult::Continue,
        OtaState::Connect => connection::enter_connect(ctx),
        OtaState::ServiceDiscover => discovery::enter_service_discover(ctx),
        OtaState::ReadAppInfo => discovery::enter_read_app_info(ctx),
        OtaState::EnableNotification => discovery::enter_enable_notification(ctx),
        OtaState::PrepareForDownload => command::enter_prepare(ctx),
        OtaState::StartDownload => command::enter_start(ctx),
        OtaState::DataTransfer => transfer::enter_data_transfer(ctx),
        OtaState::Verify => command::enter_verify(ctx),
        OtaState::Abort => command::enter_abort(ctx),
        OtaState::Complete => complete::finish(ctx),
    }
}

/// Turn an expired timeout into the failure the pending step would report.
fn handle_timeout(ctx: &mut HandlerContext<'_>, id: u64) -> HandleResult {
    let Some(handle) = ctx.state.expire_timeout(id) else {
        return HandleResult::Continue;
    };
    let timeout_ms = handle.duration.as_millis() as u64;
    warn!(state = %handle.state, sub_state = %ctx.state.sub_state, timeout_ms, "Timeout");
    ctx.log(
        LogLevel::Warn,
        format!("{} timed out after {}ms", handle.state, timeout_ms),
    );

    let error = TransportError::Timeout { timeout_ms };
    let synthesized = match ctx.state.state {
        OtaState::Idle | OtaState::Complete => return HandleResult::Continue,
        OtaState::Connect => SessionEvent::ConnectionStateChanged {
            connected: false,
            error: Some(error),
        },
        OtaState::ServiceDiscover => SessionEvent::ServiceDiscovered {
            variant: None,
            error: Some(error),
        },
        OtaState::ReadAppInfo if ctx.state.sub_state == SubState::AwaitingMeshMetadata => {
            SessionEvent::MeshMetadata { metadata: None }
        }
        OtaState::ReadAppInfo => SessionEvent::ValueUpdated {
            characteristic: Characteristic::AppInfo,
            value: None,
            error: Some(error),
        },
        OtaState::EnableNotification => SessionEvent::NotificationStateChanged {
            enabled: false,
            error: Some(error),
        },
        OtaState::PrepareForDownload
        | OtaState::StartDownload
        | OtaState::Verify
        | OtaState::Abort => SessionEvent::WriteCompleted {
            characteristic: Characteristic::ControlPoint,
            result: Err(error),
        },
        OtaState::DataTransfer => SessionEvent::WriteCompleted {
            characteristic: Characteristic::Data,
            result: Err(error),
        },
    };
    dispatch(ctx, synthesized)
}
