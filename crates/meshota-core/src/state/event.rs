//! Events consumed by the session's single dispatch point.

use std::sync::mpsc;

use crate::protocol::{Characteristic, ComponentMetadata, ProtocolVariant};
use crate::transport::TransportError;

/// Everything that can move the state machine.
///
/// Adapter completions, mesh-core answers, timer expiry and caller requests
/// all arrive as one of these on the session's serial context.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Begin the upgrade.
    Start,
    ConnectionStateChanged {
        connected: bool,
        error: Option<TransportError>,
    },
    ServiceDiscovered {
        variant: Option<ProtocolVariant>,
        error: Option<TransportError>,
    },
    NotificationStateChanged {
        enabled: bool,
        error: Option<TransportError>,
    },
    /// Per-call write completion, optionally carrying the response.
    WriteCompleted {
        characteristic: Characteristic,
        result: Result<Option<Vec<u8>>, TransportError>,
    },
    /// Read result or indication.
    ValueUpdated {
        characteristic: Characteristic,
        value: Option<Vec<u8>>,
        error: Option<TransportError>,
    },
    /// Answer to a component metadata request to the mesh core.
    MeshMetadata { metadata: Option<ComponentMetadata> },
    /// Expiry of the timeout with this id.
    Timeout { id: u64 },
    /// Caller asked to stop. `dfu` marks a stop on behalf of mesh DFU.
    AbortRequested { dfu: bool },
}

/// Sending half of a session's event queue.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<SessionEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }

    /// Post an event. Returns false once the session is gone.
    pub fn post(&self, event: SessionEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_after_drop() {
        let (sink, rx) = EventSink::channel();
        assert!(sink.post(SessionEvent::Start));
        assert_eq!(rx.recv().unwrap(), SessionEvent::Start);
        drop(rx);
        assert!(!sink.post(SessionEvent::Start));
    }
}
