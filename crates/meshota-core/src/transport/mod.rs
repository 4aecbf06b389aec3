//! Transport layer module.

pub mod direct;
pub mod mesh;
pub mod mock;
pub mod sim;
pub mod traits;
pub mod worker;

pub use direct::DirectAdapter;
pub use mesh::{MeshTunnelAdapter, TUNNEL_OVERHEAD, TunnelCipher, TunnelDirection, TunnelKey};
pub use mock::{AdapterCall, MockAdapter, MockHandle};
pub use sim::{SealedLink, SimConfig, SimLog, SimLogHandle, SimPeripheral};
pub use traits::{GattLink, LinkNotice, TransportAdapter, TransportError, TransportKind};
