//! Session manager - target selection and the single active session.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::{info, instrument, warn};

use crate::config::OtaConfig;
use crate::error::{OtaError, OtaErrorKind};
use crate::image::FirmwareImage;
use crate::session::{Collaborators, SessionRunner, SessionSetup, SessionStatus, UpgradeSession};
use crate::state::{EventSink, OtaState, RequestGuard, SessionEvent, SessionMode};
use crate::transport::TransportAdapter;

/// A device chosen for upgrade, with the adapter that reaches it.
pub struct TargetDevice {
    pub name: String,
    pub adapter: Box<dyn TransportAdapter>,
}

impl TargetDevice {
    pub fn new(adapter: Box<dyn TransportAdapter>) -> Self {
        Self {
            name: adapter.name().to_string(),
            adapter,
        }
    }
}

/// Supplies the currently targeted device.
pub trait DeviceSelector {
    fn select(&mut self) -> Option<TargetDevice>;
}

/// Yields one preselected device, once.
pub struct SingleDeviceSelector(Option<TargetDevice>);

impl SingleDeviceSelector {
    pub fn new(device: TargetDevice) -> Self {
        Self(Some(device))
    }

    pub fn empty() -> Self {
        Self(None)
    }
}

impl DeviceSelector for SingleDeviceSelector {
    fn select(&mut self) -> Option<TargetDevice> {
        self.0.take()
    }
}

/// What to upgrade with.
#[derive(Debug, Clone, Default)]
pub struct UpgradeRequest {
    pub image: Option<FirmwareImage>,
    pub mode: SessionMode,
}

/// Caller's side of a running session.
pub struct SessionHandle {
    sink: EventSink,
    status: Arc<Mutex<SessionStatus>>,
    runner: Option<JoinHandle<Result<(), OtaError>>>,
}

impl SessionHandle {
    pub fn status(&self) -> SessionStatus {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_finished(&self) -> bool {
        self.status().finished
    }

    /// Stop the upgrade. Runs the abort command once the download was
    /// prepared, otherwise closes the connection.
    pub fn abort(&self) -> bool {
        self.sink.post(SessionEvent::AbortRequested { dfu: false })
    }

    /// Stop on behalf of mesh DFU; the orchestrator is asked to stop the
    /// distribution as well.
    pub fn abort_for_dfu(&self) -> bool {
        self.sink.post(SessionEvent::AbortRequested { dfu: true })
    }

    /// Alias of [`abort`](Self::abort) for callers that never reached the
    /// download.
    pub fn cancel(&self) -> bool {
        self.abort()
    }

    /// Block until the session completes.
    pub fn wait(mut self) -> Result<(), OtaError> {
        let Some(runner) = self.runner.take() else {
            return self.status().error.map_or(Ok(()), Err);
        };
        match runner.join() {
            Ok(result) => result,
            Err(_) => {
                warn!("Session runner panicked");
                Err(OtaError::new(self.status().state, OtaErrorKind::Aborted))
            }
        }
    }
}

/// Owns the single active session.
pub struct SessionManager {
    config: OtaConfig,
    collaborators: Collaborators,
    guard: Arc<RequestGuard>,
    active: Option<Arc<Mutex<SessionStatus>>>,
}

impl SessionManager {
    pub fn new(config: OtaConfig, collaborators: Collaborators) -> Self {
        Self {
            config,
            collaborators,
            guard: Arc::new(RequestGuard::new()),
            active: None,
        }
    }

    pub fn config(&self) -> &OtaConfig {
        &self.config
    }

    /// Status of the current or most recent session.
    pub fn active_status(&self) -> Option<SessionStatus> {
        self.active
            .as_ref()
            .map(|status| status.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    pub fn is_busy(&self) -> bool {
        self.active_status().is_some_and(|status| !status.finished)
    }

    /// Start an upgrade on the selected device. Rejected as busy while
    /// another session is unfinished; never queued.
    #[instrument(skip_all)]
    pub fn start(
        &mut self,
        selector: &mut dyn DeviceSelector,
        request: UpgradeRequest,
    ) -> Result<SessionHandle, OtaError> {
        if let Some(status) = self.active_status()
            && !status.finished
        {
            warn!(state = %status.state, "Upgrade already running");
            return Err(OtaError::new(status.state, OtaErrorKind::Busy));
        }

        let device = selector.select();
        match &device {
            Some(target) => info!(device = %target.name, "Starting upgrade"),
            None => warn!("No target device selected"),
        }

        let (sink, events) = EventSink::channel();
        let session = UpgradeSession::new(
            SessionSetup {
                device: device.map(|target| target.adapter),
                image: request.image,
                mode: request.mode,
                config: self.config.clone(),
            },
            sink.clone(),
            self.collaborators.clone(),
            Arc::clone(&self.guard),
        );
        let status = session.status_handle();

        let runner = SessionRunner::spawn(session, events).map_err(|e| {
            OtaError::new(
                OtaState::Idle,
                OtaErrorKind::SessionUnavailable(e.to_string()),
            )
        })?;
        sink.post(SessionEvent::Start);
        self.active = Some(Arc::clone(&status));

        Ok(SessionHandle {
            sink,
            status,
            runner: Some(runner),
        })
    }
}
