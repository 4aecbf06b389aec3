//! Device identity read during `readAppInfo`.

use std::fmt;
use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};

use super::constants::APP_INFO_SIZE;

/// Value of the app-info characteristic (8 bytes, little-endian).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub version: u32,
}

impl AppInfo {
    /// Parse the characteristic value. Any other length means the peer
    /// does not support app info.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != APP_INFO_SIZE {
            return None;
        }
        let mut cursor = Cursor::new(bytes);
        Some(Self {
            vendor_id: cursor.read_u16::<LittleEndian>().ok()?,
            product_id: cursor.read_u16::<LittleEndian>().ok()?,
            version: cursor.read_u32::<LittleEndian>().ok()?,
        })
    }

    pub fn to_bytes(&self) -> [u8; APP_INFO_SIZE] {
        let mut buf = [0u8; APP_INFO_SIZE];
        buf[0..2].copy_from_slice(&self.vendor_id.to_le_bytes());
        buf[2..4].copy_from_slice(&self.product_id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.version.to_le_bytes());
        buf
    }
}

/// Composition metadata supplied by the mesh core for mesh nodes whose
/// app-info characteristic is unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentMetadata {
    pub company_id: u16,
    pub product_id: u16,
    pub version_id: u16,
}

/// Where the device identity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceIdentity {
    AppInfo(AppInfo),
    Mesh(ComponentMetadata),
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceIdentity::AppInfo(info) => write!(
                f,
                "vid=0x{:04X} pid=0x{:04X} ver=0x{:08X}",
                info.vendor_id, info.product_id, info.version
            ),
            DeviceIdentity::Mesh(meta) => write!(
                f,
                "cid=0x{:04X} pid=0x{:04X} vid=0x{:04X}",
                meta.company_id, meta.product_id, meta.version_id
            ),
        }
    }
}
