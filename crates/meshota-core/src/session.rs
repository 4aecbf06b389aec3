//! Upgrade session - owns one upgrade from start to completion.

use std::fmt;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use crate::config::OtaConfig;
use crate::error::OtaError;
use crate::events::{OtaObserver, TracingObserver};
use crate::image::FirmwareImage;
use crate::mesh::{DfuOrchestrator, MeshCore};
use crate::state::{
    EventSink, HandlerContext, OtaState, RequestGuard, SessionEvent, SessionMode,
    StateMachineContext, SubState, TimeoutHandle, TimerStats, apply, dispatch,
};
use crate::transport::TransportAdapter;

/// External collaborators of a session.
#[derive(Clone)]
pub struct Collaborators {
    pub observer: Arc<dyn OtaObserver>,
    pub mesh_core: Option<Arc<dyn MeshCore>>,
    pub dfu: Option<Arc<dyn DfuOrchestrator>>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            observer: Arc::new(TracingObserver),
            mesh_core: None,
            dfu: None,
        }
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("mesh_core", &self.mesh_core.is_some())
            .field("dfu", &self.dfu.is_some())
            .finish()
    }
}

/// Inputs for one upgrade.
pub struct SessionSetup {
    pub device: Option<Box<dyn TransportAdapter>>,
    pub image: Option<FirmwareImage>,
    pub mode: SessionMode,
    pub config: OtaConfig,
}

/// Point-in-time view of a session, readable from any thread.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: OtaState,
    pub sub_state: SubState,
    pub image_size: usize,
    pub transferred_size: usize,
    pub error: Option<OtaError>,
    pub finished: bool,
}

/// One upgrade. All mutation happens in [`handle`](Self::handle), which the
/// owner calls from a single thread.
pub struct UpgradeSession {
    ctx: StateMachineContext,
    device: Option<Box<dyn TransportAdapter>>,
    image: Option<FirmwareImage>,
    config: OtaConfig,
    sink: EventSink,
    guard: Arc<RequestGuard>,
    collaborators: Collaborators,
    status: Arc<Mutex<SessionStatus>>,
}

impl UpgradeSession {
    pub fn new(
        setup: SessionSetup,
        sink: EventSink,
        collaborators: Collaborators,
        guard: Arc<RequestGuard>,
    ) -> Self {
        let image_size = setup.image.as_ref().map_or(0, FirmwareImage::len);
        let ctx = StateMachineContext::new(setup.mode, image_size);
        let status = Arc::new(Mutex::new(SessionStatus {
            image_size,
            ..Default::default()
        }));
        Self {
            ctx,
            device: setup.device,
            image: setup.image,
            config: setup.config,
            sink,
            guard,
            collaborators,
            status,
        }
    }

    /// The single dispatch point.
    pub fn handle(&mut self, event: SessionEvent) {
        debug!(state = %self.ctx.state, event = ?EventName(&event), "Event");
        let mut ctx = HandlerContext {
            state: &mut self.ctx,
            device: &mut self.device,
            image: self.image.as_ref(),
            config: &self.config,
            sink: &self.sink,
            guard: &self.guard,
            collaborators: &self.collaborators,
        };
        let result = dispatch(&mut ctx, event);
        apply(&mut ctx, result);
        self.publish_status();
    }

    fn publish_status(&self) {
        let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        *status = SessionStatus {
            state: self.ctx.state,
            sub_state: self.ctx.sub_state,
            image_size: self.ctx.transfer.image_size,
            transferred_size: self.ctx.transfer.offset,
            error: self.ctx.completion_error.clone(),
            finished: self.ctx.completion_emitted,
        };
    }

    pub fn status_handle(&self) -> Arc<Mutex<SessionStatus>> {
        Arc::clone(&self.status)
    }

    pub fn sink(&self) -> &EventSink {
        &self.sink
    }

    pub fn state(&self) -> OtaState {
        self.ctx.state
    }

    pub fn sub_state(&self) -> SubState {
        self.ctx.sub_state
    }

    pub fn pending_timeout(&self) -> Option<TimeoutHandle> {
        self.ctx.scheduled_timeout
    }

    pub fn timer_stats(&self) -> TimerStats {
        self.ctx.timer_stats
    }

    pub fn offset(&self) -> usize {
        self.ctx.transfer.offset
    }

    pub fn chunk_size(&self) -> usize {
        self.ctx.transfer.max_chunk_size
    }

    pub fn chunks_sent(&self) -> usize {
        self.ctx.transfer.chunks_sent
    }

    pub fn crc_finalizations(&self) -> usize {
        self.ctx.transfer.crc_finalizations
    }

    pub fn final_crc(&self) -> Option<u32> {
        self.ctx.transfer.crc.final_value()
    }

    pub fn completion_error(&self) -> Option<&OtaError> {
        self.ctx.completion_error.as_ref()
    }

    pub fn has_device(&self) -> bool {
        self.device.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.ctx.is_running
    }

    pub fn is_finished(&self) -> bool {
        self.ctx.completion_emitted
    }
}

/// Short event label for logs; chunk payloads stay out.
struct EventName<'a>(&'a SessionEvent);

impl fmt::Debug for EventName<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            SessionEvent::WriteCompleted {
                characteristic,
                result,
            } => write!(f, "WriteCompleted({}, ok={})", characteristic, result.is_ok()),
            SessionEvent::ValueUpdated {
                characteristic,
                value,
                ..
            } => write!(
                f,
                "ValueUpdated({}, {})",
                characteristic,
                value.as_deref().map(hex::encode).unwrap_or_default()
            ),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Serial execution context of a session.
///
/// Owns the session on its own thread, feeds it queued events, and turns
/// the armed timeout into a `Timeout` event when it expires.
pub struct SessionRunner;

impl SessionRunner {
    pub fn spawn(
        session: UpgradeSession,
        events: Receiver<SessionEvent>,
    ) -> std::io::Result<JoinHandle<Result<(), OtaError>>> {
        thread::Builder::new()
            .name("ota-session".into())
            .spawn(move || Self::run(session, events))
    }

    #[instrument(skip_all)]
    pub fn run(
        mut session: UpgradeSession,
        events: Receiver<SessionEvent>,
    ) -> Result<(), OtaError> {
        let mut deadline: Option<(u64, Instant)> = None;

        while !session.is_finished() {
            let next = match session.pending_timeout() {
                Some(handle) => {
                    let expires = match deadline {
                        Some((id, at)) if id == handle.id => at,
                        _ => {
                            let at = Instant::now() + handle.duration;
                            deadline = Some((handle.id, at));
                            at
                        }
                    };
                    match events.recv_timeout(expires.saturating_duration_since(Instant::now())) {
                        Ok(event) => event,
                        Err(RecvTimeoutError::Timeout) => SessionEvent::Timeout { id: handle.id },
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match events.recv() {
                    Ok(event) => event,
                    Err(_) => break,
                },
            };
            session.handle(next);
        }

        if !session.is_finished() {
            warn!(state = %session.state(), "Event queue closed before completion");
        }
        info!(state = %session.state(), "Session runner stopped");
        match session.completion_error() {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}
