//! COMPLETE - teardown and the single final notification.

use tracing::{info, warn};

use crate::events::OtaEvent;

use super::{HandleResult, HandlerContext};

pub fn finish(ctx: &mut HandlerContext<'_>) -> HandleResult {
    if ctx.state.completion_emitted {
        return HandleResult::Continue;
    }
    ctx.state.cancel_timeout();

    // Dropped only after the completion went out.
    let mut device = ctx.device.take();
    if let Some(device) = device.as_deref_mut() {
        if ctx.state.is_connected {
            device.disconnect();
        }
        device.release();
    }
    ctx.state.is_running = false;
    ctx.state.is_connected = false;
    ctx.guard.clear();

    let progress = ctx.progress();
    match &ctx.state.completion_error {
        None => info!(
            bytes = ctx.state.transfer.offset,
            identity = ?ctx.state.identity,
            "Upgrade finished"
        ),
        Some(error) => warn!(error = %error, code = error.code(), "Upgrade finished with error"),
    }
    ctx.state.completion_emitted = true;
    ctx.emit(OtaEvent::Complete(progress));

    if let (Some(metadata), Some(dfu)) = (
        ctx.state.mode.dfu_metadata(),
        ctx.collaborators.dfu.as_deref(),
    ) {
        let error = ctx.state.completion_error.as_ref();
        dfu.upload_finished(metadata, error.map_or(Ok(()), Err));
        if ctx.state.dfu_stop_requested || error.is_some() {
            info!("Requesting mesh DFU stop");
            dfu.stop_distribution();
        }
    }
    drop(device);
    HandleResult::Continue
}
