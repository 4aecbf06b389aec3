//! Control point command handlers.

use tracing::{debug, info, warn};

use crate::error::OtaErrorKind;
use crate::events::LogLevel;
use crate::protocol::{Command, CommandStatus, Opcode};
use crate::state::machine::{OtaState, SubState};
use crate::transport::TransportError;

use super::{HandleResult, HandlerContext};

/// PREPARE_FOR_DOWNLOAD entry. DFU uploads carry company and firmware ids.
pub fn enter_prepare(ctx: &mut HandlerContext<'_>) -> HandleResult {
    let command = match ctx.state.mode.dfu_metadata() {
        Some(metadata) => {
            Command::prepare_dfu_download(metadata.company_id, &metadata.firmware_id)
        }
        None => Command::prepare_download(),
    };
    send_or_fail(ctx, command)
}

pub fn enter_start(ctx: &mut HandlerContext<'_>) -> HandleResult {
    let image_size = ctx.state.transfer.image_size as u32;
    send_or_fail(ctx, Command::start_download(image_size))
}

pub fn enter_verify(ctx: &mut HandlerContext<'_>) -> HandleResult {
    let Some(crc) = ctx.state.transfer.crc.final_value() else {
        return HandleResult::Fail(
            OtaErrorKind::InvalidImage("checksum was never finalized".into()),
            OtaState::Abort,
        );
    };
    info!(crc = %format!("0x{:08X}", crc), "Verifying image");
    send_or_fail(ctx, Command::verify(crc))
}

/// ABORT entry - best effort, completion follows either way.
pub fn enter_abort(ctx: &mut HandlerContext<'_>) -> HandleResult {
    if !ctx.state.is_connected {
        debug!("Not connected, skipping abort command");
        return HandleResult::Goto(OtaState::Complete);
    }
    ctx.log(LogLevel::Warn, "Aborting upgrade");
    if ctx.send_command(Command::abort()) {
        HandleResult::Continue
    } else {
        HandleResult::Goto(OtaState::Complete)
    }
}

fn send_or_fail(ctx: &mut HandlerContext<'_>, command: Command) -> HandleResult {
    if ctx.send_command(command) {
        HandleResult::Continue
    } else {
        HandleResult::Fail(OtaErrorKind::NoDevice, OtaState::Complete)
    }
}

fn current_opcode(state: OtaState) -> Option<Opcode> {
    match state {
        OtaState::PrepareForDownload => Some(Opcode::PrepareDownload),
        OtaState::StartDownload => Some(Opcode::StartDownload),
        OtaState::Verify => Some(Opcode::Verify),
        OtaState::Abort => Some(Opcode::Abort),
        _ => None,
    }
}

fn awaiting_command(ctx: &HandlerContext<'_>) -> Option<Opcode> {
    match ctx.state.sub_state {
        SubState::AwaitingWrite | SubState::AwaitingResponse => current_opcode(ctx.state.state),
        _ => None,
    }
}

/// Control point write finished. The status either came back with it or
/// will arrive as an indication.
pub fn handle_command_written(
    ctx: &mut HandlerContext<'_>,
    result: Result<Option<Vec<u8>>, TransportError>,
) -> HandleResult {
    let Some(opcode) = awaiting_command(ctx) else {
        debug!(state = %ctx.state.state, "Ignoring stray control point completion");
        return HandleResult::Continue;
    };

    match result {
        Ok(Some(response)) => {
            handle_status(ctx, opcode, CommandStatus::decode(Some(response.as_slice())))
        }
        Ok(None) => {
            ctx.state.set_sub_state(SubState::AwaitingResponse);
            HandleResult::Continue
        }
        Err(e) => {
            ctx.state.cancel_timeout();
            if opcode == Opcode::Abort {
                return HandleResult::Goto(OtaState::Complete);
            }
            let kind = if e.is_timeout() {
                OtaErrorKind::Timeout(format!("{} response", opcode))
            } else {
                OtaErrorKind::CommandFailed {
                    command: opcode,
                    reason: e.to_string(),
                }
            };
            HandleResult::Fail(kind, OtaState::Abort)
        }
    }
}

/// Control point indication.
pub fn handle_indication(
    ctx: &mut HandlerContext<'_>,
    value: Option<Vec<u8>>,
    error: Option<TransportError>,
) -> HandleResult {
    let Some(opcode) = awaiting_command(ctx) else {
        debug!(state = %ctx.state.state, "Ignoring unsolicited indication");
        return HandleResult::Continue;
    };
    if let Some(e) = &error {
        warn!(error = %e, "Control point indication error");
    }
    handle_status(ctx, opcode, CommandStatus::decode(value.as_deref()))
}

fn handle_status(
    ctx: &mut HandlerContext<'_>,
    opcode: Opcode,
    status: CommandStatus,
) -> HandleResult {
    ctx.state.cancel_timeout();
    debug!(command = %opcode, status = %status, "Command status");

    match (ctx.state.state, status.is_success()) {
        (OtaState::PrepareForDownload, true) => HandleResult::Goto(OtaState::StartDownload),
        (OtaState::PrepareForDownload, false) => HandleResult::Fail(
            OtaErrorKind::CommandRejected {
                command: opcode,
                status,
            },
            OtaState::Complete,
        ),
        (OtaState::StartDownload, true) => HandleResult::Goto(OtaState::DataTransfer),
        (OtaState::StartDownload, false) => HandleResult::Fail(
            OtaErrorKind::CommandRejected {
                command: opcode,
                status,
            },
            OtaState::Abort,
        ),
        (OtaState::Verify, true) => {
            info!("Image verified");
            HandleResult::Goto(OtaState::Complete)
        }
        (OtaState::Verify, false) => {
            HandleResult::Fail(OtaErrorKind::VerificationFailed { status }, OtaState::Abort)
        }
        _ => HandleResult::Goto(OtaState::Complete),
    }
}
