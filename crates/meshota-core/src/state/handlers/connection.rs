//! Start, connection and abort request handlers.

use tracing::{debug, info, instrument, warn};

use crate::error::OtaErrorKind;
use crate::events::LogLevel;
use crate::state::guard::PendingRequest;
use crate::state::machine::{OtaState, SubState};
use crate::transport::TransportError;

use super::{HandleResult, HandlerContext};

/// START - leave idle.
pub fn handle_start(ctx: &mut HandlerContext<'_>) -> HandleResult {
    if ctx.state.state != OtaState::Idle || ctx.state.is_running {
        warn!(state = %ctx.state.state, "Start ignored, session already running");
        return HandleResult::Continue;
    }
    ctx.state.is_running = true;
    HandleResult::Goto(OtaState::Connect)
}

/// CONNECT entry - needs a device and an image.
#[instrument(skip(ctx))]
pub fn enter_connect(ctx: &mut HandlerContext<'_>) -> HandleResult {
    if ctx.image.is_none() {
        return HandleResult::Fail(OtaErrorKind::NoImage, OtaState::Complete);
    }
    let Some(device) = ctx.device.as_deref_mut() else {
        return HandleResult::Fail(OtaErrorKind::NoDevice, OtaState::Complete);
    };
    if !ctx.guard.try_begin(PendingRequest::Connection) {
        warn!("Connection request already outstanding");
        return HandleResult::Continue;
    }

    info!(device = %device.name(), transport = %device.kind(), "Connecting");
    device.bind(ctx.sink.clone());
    device.connect();
    HandleResult::Continue
}

pub fn handle_connection_state(
    ctx: &mut HandlerContext<'_>,
    connected: bool,
    error: Option<TransportError>,
) -> HandleResult {
    ctx.guard.finish(PendingRequest::Connection);

    if connected {
        return handle_connected(ctx);
    }

    ctx.state.is_connected = false;
    match ctx.state.state {
        OtaState::Idle | OtaState::Complete => HandleResult::Continue,
        OtaState::Connect => {
            ctx.state.cancel_timeout();
            let kind = match error {
                Some(e) if e.is_timeout() => OtaErrorKind::ConnectionTimeout,
                Some(e) => OtaErrorKind::ConnectFailed(e.to_string()),
                None => OtaErrorKind::ConnectFailed("link closed".into()),
            };
            HandleResult::Fail(kind, OtaState::Complete)
        }
        OtaState::Verify if verify_write_acked(ctx) => {
            // Legacy peripherals reboot into the new image instead of
            // answering verify.
            ctx.state.cancel_timeout();
            info!("Peer disconnected after verify, treating as success");
            ctx.log(LogLevel::Info, "Device rebooted after verify");
            HandleResult::Goto(OtaState::Complete)
        }
        OtaState::Abort => {
            ctx.state.cancel_timeout();
            HandleResult::Goto(OtaState::Complete)
        }
        state => {
            ctx.state.cancel_timeout();
            warn!(state = %state, error = ?error, "Device disconnected");
            let next = if state.before_download() {
                OtaState::Complete
            } else {
                OtaState::Abort
            };
            HandleResult::Fail(OtaErrorKind::Disconnected, next)
        }
    }
}

fn handle_connected(ctx: &mut HandlerContext<'_>) -> HandleResult {
    if ctx.state.state != OtaState::Connect {
        debug!(state = %ctx.state.state, "Ignoring late connect");
        return HandleResult::Continue;
    }
    ctx.state.cancel_timeout();
    ctx.state.is_connected = true;

    let Some(device) = ctx.device.as_deref() else {
        return HandleResult::Fail(OtaErrorKind::NoDevice, OtaState::Complete);
    };
    let mtu = device.mtu();
    let chunk = ctx.config.chunk_size_for(mtu, device.payload_overhead());
    if chunk == 0 {
        return HandleResult::Fail(OtaErrorKind::InvalidMtu { mtu }, OtaState::Complete);
    }
    ctx.state.transfer.max_chunk_size = chunk;

    info!(
        mtu,
        chunk_size = chunk,
        chunks = ctx.state.transfer.total_chunks(),
        "Connected"
    );
    HandleResult::Goto(OtaState::ServiceDiscover)
}

/// The verify write completed and the session is still waiting on its
/// status with the timer armed.
fn verify_write_acked(ctx: &HandlerContext<'_>) -> bool {
    ctx.state.state == OtaState::Verify
        && ctx.state.sub_state == SubState::AwaitingResponse
        && ctx.state.has_timeout()
}

/// Caller asked to stop.
///
/// After `PrepareForDownload` this runs the abort command. Before that the
/// connection is closed and teardown follows the disconnect path.
pub fn handle_abort_request(ctx: &mut HandlerContext<'_>, dfu: bool) -> HandleResult {
    let kind = if dfu {
        ctx.state.dfu_stop_requested = true;
        OtaErrorKind::AbortedForDfu
    } else {
        OtaErrorKind::Aborted
    };
    info!(state = %ctx.state.state, dfu, "Abort requested");

    match ctx.state.state {
        OtaState::Idle => HandleResult::Fail(kind, OtaState::Complete),
        OtaState::Abort | OtaState::Complete => HandleResult::Continue,
        state if state.can_abort() => HandleResult::Fail(kind, OtaState::Abort),
        _ => {
            ctx.state.record_error(kind);
            match ctx.device.as_deref_mut() {
                Some(device) => {
                    device.disconnect();
                    HandleResult::Continue
                }
                None => HandleResult::Goto(OtaState::Complete),
            }
        }
    }
}
