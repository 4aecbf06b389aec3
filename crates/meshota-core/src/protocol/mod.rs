//! Protocol module - OTA command protocol definitions.

pub mod app_info;
pub mod checksum;
pub mod command;
pub mod constants;
pub mod status;
pub mod variant;

pub use app_info::{AppInfo, ComponentMetadata, DeviceIdentity};
pub use checksum::{RunningCrc, crc32, crc32_finalize, crc32_update};
pub use command::{CodecError, Command, CommandParams, Opcode};
pub use constants::*;
pub use status::CommandStatus;
pub use variant::{Characteristic, ProtocolVariant};
