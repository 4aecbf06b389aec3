//! Firmware data transfer handlers.

use tracing::{debug, info, trace};

use crate::error::OtaErrorKind;
use crate::protocol::Characteristic;
use crate::state::machine::{OtaState, SubState};
use crate::transport::TransportError;

use super::{HandleResult, HandlerContext};

pub fn enter_data_transfer(ctx: &mut HandlerContext<'_>) -> HandleResult {
    info!(
        image_size = ctx.state.transfer.image_size,
        chunk_size = ctx.state.transfer.max_chunk_size,
        chunks = ctx.state.transfer.total_chunks(),
        "Starting data transfer"
    );
    send_next_chunk(ctx)
}

/// Queue the chunk at the current offset.
///
/// The running CRC covers every queued chunk and is finalized when the last
/// one goes out.
fn send_next_chunk(ctx: &mut HandlerContext<'_>) -> HandleResult {
    let image_size = ctx.state.transfer.image_size;
    let offset = ctx.state.transfer.offset;
    let fail = |reason: &str| {
        HandleResult::Fail(
            OtaErrorKind::TransferFailed {
                image_size,
                offset,
                reason: reason.into(),
            },
            OtaState::Abort,
        )
    };

    let Some(range) = ctx.state.transfer.next_chunk() else {
        return fail("no data left to send");
    };
    let Some(image) = ctx.image else {
        return fail("image missing");
    };
    let Some(device) = ctx.device.as_deref_mut() else {
        return fail("device missing");
    };

    let chunk = &image.as_bytes()[range.clone()];
    let transfer = &mut ctx.state.transfer;
    transfer.crc.update(chunk);
    if range.end == image_size && transfer.crc.finalize().is_some() {
        transfer.crc_finalizations += 1;
        debug!(
            crc = %format!("0x{:08X}", transfer.crc.final_value().unwrap_or_default()),
            "Checksum finalized"
        );
    }
    transfer.transferring = chunk.len();
    transfer.chunks_sent += 1;
    trace!(
        chunk = transfer.chunks_sent,
        offset = range.start,
        len = chunk.len(),
        "Sending chunk"
    );

    device.write(Characteristic::Data, chunk);
    ctx.state.set_sub_state(SubState::AwaitingChunkAck);
    HandleResult::Continue
}

pub fn handle_chunk_written(
    ctx: &mut HandlerContext<'_>,
    result: Result<Option<Vec<u8>>, TransportError>,
) -> HandleResult {
    if ctx.state.state != OtaState::DataTransfer
        || ctx.state.sub_state != SubState::AwaitingChunkAck
    {
        return HandleResult::Continue;
    }
    ctx.state.cancel_timeout();

    if let Err(e) = result {
        let transfer = &ctx.state.transfer;
        return HandleResult::Fail(
            OtaErrorKind::TransferFailed {
                image_size: transfer.image_size,
                offset: transfer.offset,
                reason: e.to_string(),
            },
            OtaState::Abort,
        );
    }

    let transfer = &mut ctx.state.transfer;
    transfer.offset += transfer.transferring;
    transfer.transferring = 0;
    ctx.state.set_sub_state(SubState::None);

    if !ctx.state.mode.is_dfu() {
        ctx.emit_progress();
    }
    if ctx.state.transfer.is_done() {
        return HandleResult::Goto(OtaState::Verify);
    }

    ctx.arm_timeout();
    send_next_chunk(ctx)
}
