//! Interfaces to the mesh stack the session collaborates with.

use std::sync::Mutex;

use tracing::debug;

use crate::error::OtaError;
use crate::image::DfuMetadata;
use crate::protocol::ComponentMetadata;
use crate::state::{EventSink, SessionEvent};

/// The mesh core, as far as the upgrade session needs it.
pub trait MeshCore: Send + Sync {
    /// Ask a node for its component metadata. The answer is posted to `sink`
    /// as [`SessionEvent::MeshMetadata`], or never if the node stays silent.
    fn request_component_metadata(&self, mesh_address: u16, sink: EventSink);
}

/// Mesh DFU orchestration that consumes an upload to a distributor.
pub trait DfuOrchestrator: Send + Sync {
    /// The upload session ended.
    fn upload_finished(&self, metadata: &DfuMetadata, result: Result<(), &OtaError>);

    /// Stop the network-wide distribution.
    fn stop_distribution(&self);
}

/// Mesh core with a fixed answer. `None` never answers.
#[derive(Debug, Default)]
pub struct StaticMeshCore {
    metadata: Option<ComponentMetadata>,
    requests: Mutex<Vec<u16>>,
}

impl StaticMeshCore {
    pub fn new(metadata: Option<ComponentMetadata>) -> Self {
        Self {
            metadata,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Addresses queried so far.
    pub fn requests(&self) -> Vec<u16> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl MeshCore for StaticMeshCore {
    fn request_component_metadata(&self, mesh_address: u16, sink: EventSink) {
        debug!(mesh_address = %format!("0x{:04X}", mesh_address), "Component metadata requested");
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(mesh_address);
        if let Some(metadata) = self.metadata {
            sink.post(SessionEvent::MeshMetadata {
                metadata: Some(metadata),
            });
        }
    }
}

/// What a [`RecordingOrchestrator`] was told.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DfuSignal {
    UploadFinished { company_id: u16, error_code: Option<u32> },
    StopDistribution,
}

#[derive(Debug, Default)]
pub struct RecordingOrchestrator {
    signals: Mutex<Vec<DfuSignal>>,
}

impl RecordingOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signals(&self) -> Vec<DfuSignal> {
        self.signals.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn push(&self, signal: DfuSignal) {
        self.signals
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(signal);
    }
}

impl DfuOrchestrator for RecordingOrchestrator {
    fn upload_finished(&self, metadata: &DfuMetadata, result: Result<(), &OtaError>) {
        self.push(DfuSignal::UploadFinished {
            company_id: metadata.company_id,
            error_code: result.err().map(OtaError::code),
        });
    }

    fn stop_distribution(&self) {
        self.push(DfuSignal::StopDistribution);
    }
}
