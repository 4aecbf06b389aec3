//! Running CRC32 over transferred chunks.
//!
//! The running value is the raw reflected CRC32 register (initial value
//! [`CRC32_INIT`], no output XOR). The checksum sent with `verify` is the
//! running value XORed with [`CRC32_INIT`], applied exactly once after the
//! last chunk. That two-phase value equals the standard CRC-32/ISO-HDLC
//! checksum of the whole image.

use crc::{CRC_32_JAMCRC, Crc};

use super::constants::CRC32_INIT;

/// Reflected CRC32 without output XOR: exposes the register between chunks.
static RUNNING_CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_JAMCRC);

/// Update a running CRC value with `chunk`.
pub fn crc32_update(running: u32, chunk: &[u8]) -> u32 {
    // `digest_with_initial` expects the unreflected form of the register.
    let mut digest = RUNNING_CRC32.digest_with_initial(running.reverse_bits());
    digest.update(chunk);
    digest.finalize()
}

/// Turn a running value into the final checksum.
pub fn crc32_finalize(running: u32) -> u32 {
    running ^ CRC32_INIT
}

/// Whole-buffer checksum, equal to update-then-finalize over any partition.
pub fn crc32(data: &[u8]) -> u32 {
    crc32_finalize(crc32_update(CRC32_INIT, data))
}

/// Accumulator that refuses to finalize twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunningCrc {
    value: u32,
    finalized: Option<u32>,
}

impl RunningCrc {
    pub fn new() -> Self {
        Self {
            value: CRC32_INIT,
            finalized: None,
        }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        debug_assert!(self.finalized.is_none(), "update after finalize");
        self.value = crc32_update(self.value, chunk);
    }

    /// Running register value.
    pub fn value(&self) -> u32 {
        self.value
    }

    /// Finalize once. Returns `None` if already finalized.
    pub fn finalize(&mut self) -> Option<u32> {
        if self.finalized.is_some() {
            return None;
        }
        let crc = crc32_finalize(self.value);
        self.finalized = Some(crc);
        Some(crc)
    }

    pub fn final_value(&self) -> Option<u32> {
        self.finalized
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.is_some()
    }
}

impl Default for RunningCrc {
    fn default() -> Self {
        Self::new()
    }
}
