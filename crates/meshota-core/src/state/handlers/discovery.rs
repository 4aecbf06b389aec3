//! Service discovery, app info and notification handlers.

use tracing::{debug, info, warn};

use crate::error::OtaErrorKind;
use crate::protocol::{AppInfo, Characteristic, ComponentMetadata, DeviceIdentity, ProtocolVariant};
use crate::state::guard::PendingRequest;
use crate::state::machine::{OtaState, SubState};
use crate::transport::{TransportError, TransportKind};

use super::{HandleResult, HandlerContext};

pub fn enter_service_discover(ctx: &mut HandlerContext<'_>) -> HandleResult {
    match ctx.device.as_deref_mut() {
        Some(device) => {
            device.discover_ota_service();
            HandleResult::Continue
        }
        None => HandleResult::Fail(OtaErrorKind::NoDevice, OtaState::Complete),
    }
}

pub fn handle_service_discovered(
    ctx: &mut HandlerContext<'_>,
    variant: Option<ProtocolVariant>,
    error: Option<TransportError>,
) -> HandleResult {
    if ctx.state.state != OtaState::ServiceDiscover {
        return HandleResult::Continue;
    }
    ctx.state.cancel_timeout();

    if let Some(e) = error {
        warn!(error = %e, "Service discovery failed");
        return HandleResult::Fail(OtaErrorKind::UpgradeNotSupported, OtaState::Complete);
    }
    let Some(variant) = variant else {
        warn!("No OTA service on device");
        return HandleResult::Fail(OtaErrorKind::UpgradeNotSupported, OtaState::Complete);
    };

    info!(variant = %variant, service = %variant.service_uuid(), "OTA service found");
    ctx.state.variant = Some(variant);
    HandleResult::Goto(OtaState::ReadAppInfo)
}

/// READ_APP_INFO entry - read the characteristic when the variant has one,
/// otherwise try the mesh core.
pub fn enter_read_app_info(ctx: &mut HandlerContext<'_>) -> HandleResult {
    let has_app_info = ctx
        .state
        .variant
        .is_some_and(|v| v.has_characteristic(Characteristic::AppInfo));

    if has_app_info && let Some(device) = ctx.device.as_deref_mut() {
        device.read(Characteristic::AppInfo);
        ctx.state.set_sub_state(SubState::AwaitingAppInfo);
        return HandleResult::Continue;
    }
    request_mesh_metadata(ctx, false)
}

pub fn handle_app_info(
    ctx: &mut HandlerContext<'_>,
    value: Option<Vec<u8>>,
    error: Option<TransportError>,
) -> HandleResult {
    if ctx.state.state != OtaState::ReadAppInfo || ctx.state.sub_state != SubState::AwaitingAppInfo
    {
        return HandleResult::Continue;
    }
    ctx.state.cancel_timeout();

    match value.as_deref().map(|bytes| (bytes.len(), AppInfo::parse(bytes))) {
        Some((_, Some(info))) => {
            info!(identity = %DeviceIdentity::AppInfo(info), "App info");
            ctx.state.identity = Some(DeviceIdentity::AppInfo(info));
            HandleResult::Goto(OtaState::EnableNotification)
        }
        Some((len, None)) => {
            debug!(len, "Unsupported app info length");
            request_mesh_metadata(ctx, true)
        }
        None => {
            debug!(error = ?error, "App info unavailable");
            request_mesh_metadata(ctx, true)
        }
    }
}

/// Ask the mesh core for component metadata when the device sits behind
/// the mesh. Advances when that is not possible.
///
/// On state entry the READ_APP_INFO timer is still running and covers the
/// request; after a failed direct read it was cancelled and `rearm` starts
/// a new one.
fn request_mesh_metadata(ctx: &mut HandlerContext<'_>, rearm: bool) -> HandleResult {
    let Some(device) = ctx.device.as_deref() else {
        return HandleResult::Goto(OtaState::EnableNotification);
    };
    let address = match (device.kind(), device.mesh_address()) {
        (TransportKind::MeshTunnel, Some(address)) => address,
        _ => return HandleResult::Goto(OtaState::EnableNotification),
    };
    let collaborators = ctx.collaborators;
    let Some(mesh_core) = collaborators.mesh_core.as_deref() else {
        return HandleResult::Goto(OtaState::EnableNotification);
    };
    if !ctx.guard.try_begin(PendingRequest::ComponentMetadata) {
        warn!("Component metadata request already outstanding");
        return HandleResult::Goto(OtaState::EnableNotification);
    }

    debug!(mesh_address = %format!("0x{:04X}", address), "Requesting component metadata");
    if rearm {
        ctx.arm_timeout();
    }
    ctx.state.set_sub_state(SubState::AwaitingMeshMetadata);
    mesh_core.request_component_metadata(address, ctx.sink.clone());
    HandleResult::Continue
}

pub fn handle_mesh_metadata(
    ctx: &mut HandlerContext<'_>,
    metadata: Option<ComponentMetadata>,
) -> HandleResult {
    if !ctx.guard.finish(PendingRequest::ComponentMetadata) {
        debug!("Unsolicited component metadata");
        return HandleResult::Continue;
    }
    if ctx.state.state != OtaState::ReadAppInfo
        || ctx.state.sub_state != SubState::AwaitingMeshMetadata
    {
        return HandleResult::Continue;
    }
    ctx.state.cancel_timeout();

    match metadata {
        Some(metadata) => {
            let identity = DeviceIdentity::Mesh(metadata);
            info!(identity = %identity, "Component metadata");
            ctx.state.identity = Some(identity);
        }
        None => debug!("No component metadata"),
    }
    HandleResult::Goto(OtaState::EnableNotification)
}

pub fn enter_enable_notification(ctx: &mut HandlerContext<'_>) -> HandleResult {
    match ctx.device.as_deref_mut() {
        Some(device) => {
            device.enable_notifications(true);
            HandleResult::Continue
        }
        None => HandleResult::Fail(OtaErrorKind::NoDevice, OtaState::Complete),
    }
}

pub fn handle_notification_state(
    ctx: &mut HandlerContext<'_>,
    enabled: bool,
    error: Option<TransportError>,
) -> HandleResult {
    if ctx.state.state != OtaState::EnableNotification {
        return HandleResult::Continue;
    }
    ctx.state.cancel_timeout();

    let kind = match error {
        Some(e) if e.is_timeout() => OtaErrorKind::Timeout("notification setup".into()),
        Some(e) => OtaErrorKind::NotificationsFailed(e.to_string()),
        None if !enabled => OtaErrorKind::NotificationsFailed("indications left disabled".into()),
        None => return HandleResult::Goto(OtaState::PrepareForDownload),
    };
    HandleResult::Fail(kind, OtaState::Complete)
}
