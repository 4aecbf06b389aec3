//! Transport adapter abstraction.
//!
//! Defines the `TransportAdapter` trait the session drives, and the
//! blocking `GattLink` primitive the bundled adapters are built on.

use std::fmt;

use thiserror::Error;

use crate::protocol::{Characteristic, ProtocolVariant};
use crate::state::EventSink;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Device disconnected")]
    Disconnected,

    #[error("Characteristic not found: {0}")]
    CharacteristicNotFound(Characteristic),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Tunnel crypto failed: {0}")]
    Crypto(String),

    #[error("Link worker stopped")]
    LinkClosed,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout { .. })
    }
}

/// Physical path the bytes take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Direct radio link to the peripheral.
    Direct,
    /// Encrypted tunnel through the mesh.
    MeshTunnel,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Direct => write!(f, "direct"),
            TransportKind::MeshTunnel => write!(f, "mesh-tunnel"),
        }
    }
}

/// Asynchronous device operations the session needs.
///
/// Every operation returns immediately; its result is posted to the sink
/// given to [`bind`](TransportAdapter::bind) as a `SessionEvent`:
///
/// - `connect`/`disconnect` → `ConnectionStateChanged`
/// - `discover_ota_service` → `ServiceDiscovered`
/// - `enable_notifications` → `NotificationStateChanged`
/// - `write` → `WriteCompleted`
/// - `read` → `ValueUpdated`
///
/// Adapters may transform payloads (e.g. encrypt them); the session only
/// ever sees plaintext.
pub trait TransportAdapter: Send {
    /// Attach the session's event sink.
    fn bind(&mut self, sink: EventSink);

    /// Drop every reference back into the session.
    fn release(&mut self);

    fn connect(&mut self);

    fn disconnect(&mut self);

    fn discover_ota_service(&mut self);

    fn enable_notifications(&mut self, enabled: bool);

    fn write(&mut self, characteristic: Characteristic, data: &[u8]);

    fn read(&mut self, characteristic: Characteristic);

    /// Negotiated MTU.
    fn mtu(&self) -> usize;

    /// Bytes the adapter adds to each payload.
    fn payload_overhead(&self) -> usize {
        0
    }

    fn kind(&self) -> TransportKind;

    /// Unicast address when the device is reached through the mesh.
    fn mesh_address(&self) -> Option<u16> {
        None
    }

    /// Human-readable device name.
    fn name(&self) -> &str;
}

/// Something the peer did on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkNotice {
    Indication {
        characteristic: Characteristic,
        value: Vec<u8>,
    },
    Disconnected,
}

/// Blocking GATT primitive.
///
/// This trait enables:
/// - Platform radio stacks behind [`DirectAdapter`](super::DirectAdapter)
/// - Mesh tunnels behind [`MeshTunnelAdapter`](super::MeshTunnelAdapter)
/// - The simulated peripheral used by tests and the CLI
pub trait GattLink: Send {
    fn connect(&mut self) -> Result<(), TransportError>;

    fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Look for an OTA service; `None` if the peer has none.
    fn discover(&mut self) -> Result<Option<ProtocolVariant>, TransportError>;

    /// Returns the resulting notification state.
    fn set_notify(
        &mut self,
        characteristic: Characteristic,
        enabled: bool,
    ) -> Result<bool, TransportError>;

    /// Write a value. Some peers answer inline.
    fn write(
        &mut self,
        characteristic: Characteristic,
        data: &[u8],
    ) -> Result<Option<Vec<u8>>, TransportError>;

    fn read(&mut self, characteristic: Characteristic) -> Result<Vec<u8>, TransportError>;

    fn mtu(&self) -> usize;

    /// Drain indications and disconnects that happened since the last call.
    fn poll_notices(&mut self) -> Vec<LinkNotice>;
}
