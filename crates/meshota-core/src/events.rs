//! Event system for UI decoupling.
//!
//! Allows the UI layer and the mesh DFU orchestration to follow an upgrade
//! without tight coupling to the session.

use std::fmt;
use std::sync::Mutex;

use crate::error::OtaError;
use crate::state::{OtaState, SubState};

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Snapshot broadcast on every transition and data chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtaProgress {
    pub state: OtaState,
    pub sub_state: SubState,
    /// 0 when no error was recorded.
    pub error_code: u32,
    pub error_description: Option<String>,
    pub image_size: usize,
    pub transferred_size: usize,
}

impl OtaProgress {
    pub fn percent(&self) -> u8 {
        if self.image_size == 0 {
            return 0;
        }
        ((self.transferred_size * 100) / self.image_size) as u8
    }

    pub fn with_error(mut self, error: Option<&OtaError>) -> Self {
        if let Some(error) = error {
            self.error_code = error.code();
            self.error_description = Some(error.to_string());
        }
        self
    }
}

impl fmt::Display for OtaProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {}/{} bytes",
            self.state, self.sub_state, self.transferred_size, self.image_size
        )
    }
}

/// Events emitted by an upgrade session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtaEvent {
    /// State transition or data chunk acknowledged.
    Progress(OtaProgress),
    /// Emitted exactly once per session. Carries the first error, if any.
    Complete(OtaProgress),
    /// Log message.
    Log { level: LogLevel, message: String },
}

impl OtaEvent {
    pub fn progress(&self) -> Option<&OtaProgress> {
        match self {
            OtaEvent::Progress(p) | OtaEvent::Complete(p) => Some(p),
            OtaEvent::Log { .. } => None,
        }
    }
}

/// Observer trait for receiving upgrade events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait OtaObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &OtaEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl OtaObserver for NullObserver {
    fn on_event(&self, _event: &OtaEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl OtaObserver for TracingObserver {
    fn on_event(&self, event: &OtaEvent) {
        match event {
            OtaEvent::Progress(progress) => {
                tracing::debug!(
                    state = %progress.state,
                    sub_state = %progress.sub_state,
                    progress = %format!("{}%", progress.percent()),
                    "Progress"
                );
            }
            OtaEvent::Complete(progress) => match &progress.error_description {
                None => tracing::info!(bytes = progress.transferred_size, "Upgrade complete"),
                Some(description) => tracing::error!(
                    code = %format!("0x{:04X}", progress.error_code),
                    "Upgrade failed: {}",
                    description
                ),
            },
            OtaEvent::Log { level, message } => match level {
                LogLevel::Trace => tracing::trace!("{}", message),
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
        }
    }
}

/// Observer that keeps every event, for tests and headless callers.
#[derive(Default)]
pub struct CollectingObserver {
    events: Mutex<Vec<OtaEvent>>,
}

impl CollectingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<OtaEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Progress snapshots, excluding the completion.
    pub fn progress(&self) -> Vec<OtaProgress> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                OtaEvent::Progress(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn completions(&self) -> Vec<OtaProgress> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                OtaEvent::Complete(p) => Some(p),
                _ => None,
            })
            .collect()
    }
}

impl OtaObserver for CollectingObserver {
    fn on_event(&self, event: &OtaEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}
