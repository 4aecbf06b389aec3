//! MeshOTA-Core: firmware upgrade sessions for mesh and non-mesh peripherals.
//!
//! This crate drives a device through connection, service discovery,
//! notification setup, the binary command protocol, chunked data transfer
//! with a running CRC, and verification, with a timeout at every step.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Opcodes, statuses, command codec, CRC32, UUID variants
//! - **Transport**: Adapter trait, direct and mesh-tunnel adapters, simulator, mock
//! - **State**: State machine, session events and handlers
//! - **Events**: Observer pattern for UI decoupling
//! - **Session**: Upgrade session and its serial runner
//! - **Manager**: Device selection and the single active session
//! - **Mesh**: Mesh core and DFU orchestration interfaces
//!
//! # Example
//!
//! ```no_run
//! use meshota_core::{
//!     Collaborators, DirectAdapter, FirmwareImage, OtaConfig, SessionManager, SimConfig,
//!     SimPeripheral, SingleDeviceSelector, TargetDevice, UpgradeRequest,
//! };
//!
//! let adapter = DirectAdapter::new("sim", SimPeripheral::new(SimConfig::default()));
//! let mut selector = SingleDeviceSelector::new(TargetDevice::new(Box::new(adapter)));
//! let mut manager = SessionManager::new(OtaConfig::default(), Collaborators::default());
//!
//! let request = UpgradeRequest {
//!     image: Some(FirmwareImage::load("app.bin").expect("image")),
//!     ..Default::default()
//! };
//! let handle = manager.start(&mut selector, request).expect("start");
//! handle.wait().expect("upgrade failed");
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod image;
pub mod manager;
pub mod mesh;
pub mod protocol;
pub mod session;
pub mod state;
pub mod transport;

// Re-exports for convenience
pub use config::{ConfigError, DfuConfig, OtaConfig, TimeoutConfig};
pub use error::{ErrorCategory, OtaError, OtaErrorKind};
pub use events::{
    CollectingObserver, LogLevel, NullObserver, OtaEvent, OtaObserver, OtaProgress,
    TracingObserver,
};
pub use image::{DfuMetadata, FirmwareImage, FirmwareVersion, ImageError};
pub use manager::{
    DeviceSelector, SessionHandle, SessionManager, SingleDeviceSelector, TargetDevice,
    UpgradeRequest,
};
pub use mesh::{DfuOrchestrator, DfuSignal, MeshCore, RecordingOrchestrator, StaticMeshCore};
pub use protocol::{
    AppInfo, Characteristic, Command, CommandStatus, ComponentMetadata, Opcode, ProtocolVariant,
};
pub use session::{Collaborators, SessionRunner, SessionSetup, SessionStatus, UpgradeSession};
pub use state::{OtaState, SessionEvent, SessionMode, SubState};
pub use transport::{
    DirectAdapter, GattLink, MeshTunnelAdapter, MockAdapter, SealedLink, SimConfig, SimPeripheral,
    TransportAdapter, TransportError, TransportKind,
};
