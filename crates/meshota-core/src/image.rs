//! Firmware image and mesh DFU metadata.
//!
//! File-format parsing happens upstream; the session treats the image as
//! opaque bytes.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::protocol::crc32;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("Firmware image is empty")]
    Empty,
    #[error("Firmware image too large: {0} bytes")]
    TooLarge(usize),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Raw firmware image.
#[derive(Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    data: Arc<[u8]>,
}

impl FirmwareImage {
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, ImageError> {
        if data.is_empty() {
            return Err(ImageError::Empty);
        }
        // The size travels as an lParam.
        if u32::try_from(data.len()).is_err() {
            return Err(ImageError::TooLarge(data.len()));
        }
        Ok(Self { data: data.into() })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ImageError> {
        Self::from_bytes(std::fs::read(path)?)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Whole-image checksum, as the peer computes it.
    pub fn crc32(&self) -> u32 {
        crc32(&self.data)
    }
}

impl fmt::Debug for FirmwareImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirmwareImage")
            .field("len", &self.data.len())
            .field("crc32", &format_args!("0x{:08X}", self.crc32()))
            .finish()
    }
}

/// Firmware version fields carried in DFU metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u16,
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Metadata of an image destined for a mesh DFU distributor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DfuMetadata {
    pub company_id: u16,
    pub firmware_id: Vec<u8>,
    pub product_id: u16,
    pub hardware_id: u16,
    pub version: FirmwareVersion,
    pub metadata: Vec<u8>,
}
