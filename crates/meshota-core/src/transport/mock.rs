//! Mock adapter for testing.

use std::sync::{Arc, Mutex, MutexGuard};

use super::traits::{TransportAdapter, TransportKind};
use crate::protocol::{Characteristic, Command, DEFAULT_MTU};
use crate::state::EventSink;

/// One call made by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterCall {
    Connect,
    Disconnect,
    DiscoverOtaService,
    EnableNotifications(bool),
    Write {
        characteristic: Characteristic,
        data: Vec<u8>,
    },
    Read(Characteristic),
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<AdapterCall>,
    bound: bool,
    releases: usize,
}

/// Shared view of what a [`MockAdapter`] was asked to do.
#[derive(Debug, Clone, Default)]
pub struct MockHandle(Arc<Mutex<MockState>>);

impl MockHandle {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Get all recorded calls.
    pub fn calls(&self) -> Vec<AdapterCall> {
        self.lock().calls.clone()
    }

    /// Payloads written to one characteristic.
    pub fn writes(&self, characteristic: Characteristic) -> Vec<Vec<u8>> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                AdapterCall::Write {
                    characteristic: c,
                    data,
                } if *c == characteristic => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    /// Control point writes, decoded.
    pub fn commands(&self) -> Vec<Command> {
        self.writes(Characteristic::ControlPoint)
            .iter()
            .filter_map(|data| Command::decode(data).ok())
            .collect()
    }

    pub fn last_call(&self) -> Option<AdapterCall> {
        self.lock().calls.last().cloned()
    }

    pub fn is_bound(&self) -> bool {
        self.lock().bound
    }

    pub fn releases(&self) -> usize {
        self.lock().releases
    }

    /// Clear recorded calls.
    pub fn clear(&self) {
        self.lock().calls.clear();
    }
}

/// Adapter that records calls and never answers; tests inject the
/// completions themselves.
pub struct MockAdapter {
    name: String,
    mtu: usize,
    overhead: usize,
    kind: TransportKind,
    mesh_address: Option<u16>,
    state: MockHandle,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self {
            name: "mock".into(),
            mtu: DEFAULT_MTU,
            overhead: 0,
            kind: TransportKind::Direct,
            mesh_address: None,
            state: MockHandle::default(),
        }
    }

    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    /// Present as a mesh-tunneled device at `address`.
    pub fn as_mesh(mut self, address: u16, overhead: usize) -> Self {
        self.kind = TransportKind::MeshTunnel;
        self.mesh_address = Some(address);
        self.overhead = overhead;
        self
    }

    pub fn handle(&self) -> MockHandle {
        self.state.clone()
    }

    fn record(&self, call: AdapterCall) {
        self.state.lock().calls.push(call);
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportAdapter for MockAdapter {
    fn bind(&mut self, _sink: EventSink) {
        self.state.lock().bound = true;
    }

    fn release(&mut self) {
        let mut state = self.state.lock();
        state.bound = false;
        state.releases += 1;
    }

    fn connect(&mut self) {
        self.record(AdapterCall::Connect);
    }

    fn disconnect(&mut self) {
        self.record(AdapterCall::Disconnect);
    }

    fn discover_ota_service(&mut self) {
        self.record(AdapterCall::DiscoverOtaService);
    }

    fn enable_notifications(&mut self, enabled: bool) {
        self.record(AdapterCall::EnableNotifications(enabled));
    }

    fn write(&mut self, characteristic: Characteristic, data: &[u8]) {
        self.record(AdapterCall::Write {
            characteristic,
            data: data.to_vec(),
        });
    }

    fn read(&mut self, characteristic: Characteristic) {
        self.record(AdapterCall::Read(characteristic));
    }

    fn mtu(&self) -> usize {
        self.mtu
    }

    fn payload_overhead(&self) -> usize {
        self.overhead
    }

    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn mesh_address(&self) -> Option<u16> {
        self.mesh_address
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_write_capture() {
        let mut mock = MockAdapter::new();
        let handle = mock.handle();
        mock.write(Characteristic::ControlPoint, &Command::prepare_download().encode());
        mock.write(Characteristic::Data, b"chunk");

        assert_eq!(handle.writes(Characteristic::Data), vec![b"chunk".to_vec()]);
        assert_eq!(handle.commands(), vec![Command::prepare_download()]);
    }

    #[test]
    fn test_mock_bind_release() {
        let mut mock = MockAdapter::new().as_mesh(0x0002, 28);
        let handle = mock.handle();
        let (sink, _rx) = EventSink::channel();

        mock.bind(sink);
        assert!(handle.is_bound());
        mock.release();
        assert!(!handle.is_bound());
        assert_eq!(handle.releases(), 1);
        assert_eq!(mock.kind(), TransportKind::MeshTunnel);
    }
}
