//! OTA command encoding.
//!
//! Wire format: one opcode byte followed by 0, 2 (`sParam`), 4 (`lParam`) or
//! `2 + N` (company id + firmware id) parameter bytes, little-endian.

use std::fmt;
use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

use super::constants::*;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Empty command")]
    Empty,
    #[error("Unknown opcode 0x{0:02X}")]
    UnknownOpcode(u8),
    #[error("Invalid parameter length {len} for {opcode}")]
    InvalidLength { opcode: Opcode, len: usize },
}

/// Command opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    PrepareDownload = OPCODE_PREPARE_DOWNLOAD,
    StartDownload = OPCODE_START_DOWNLOAD,
    Verify = OPCODE_VERIFY,
    Finish = OPCODE_FINISH,
    GetStatus = OPCODE_GET_STATUS,
    ClearStatus = OPCODE_CLEAR_STATUS,
    Abort = OPCODE_ABORT,
    Apply = OPCODE_APPLY,
}

impl Opcode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            OPCODE_PREPARE_DOWNLOAD => Some(Self::PrepareDownload),
            OPCODE_START_DOWNLOAD => Some(Self::StartDownload),
            OPCODE_VERIFY => Some(Self::Verify),
            OPCODE_FINISH => Some(Self::Finish),
            OPCODE_GET_STATUS => Some(Self::GetStatus),
            OPCODE_CLEAR_STATUS => Some(Self::ClearStatus),
            OPCODE_ABORT => Some(Self::Abort),
            OPCODE_APPLY => Some(Self::Apply),
            _ => None,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Opcode::PrepareDownload => write!(f, "PREPARE_DOWNLOAD"),
            Opcode::StartDownload => write!(f, "START_DOWNLOAD"),
            Opcode::Verify => write!(f, "VERIFY"),
            Opcode::Finish => write!(f, "FINISH"),
            Opcode::GetStatus => write!(f, "GET_STATUS"),
            Opcode::ClearStatus => write!(f, "CLEAR_STATUS"),
            Opcode::Abort => write!(f, "ABORT"),
            Opcode::Apply => write!(f, "APPLY"),
        }
    }
}

/// Command parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandParams {
    None,
    Short(u16),
    Long(u32),
    Firmware { company_id: u16, firmware_id: Vec<u8> },
}

/// An immutable OTA command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    opcode: Opcode,
    params: CommandParams,
}

impl Command {
    pub fn new(opcode: Opcode, params: CommandParams) -> Self {
        Self { opcode, params }
    }

    /// Plain prepare, used for direct pushes.
    pub fn prepare_download() -> Self {
        Self::new(Opcode::PrepareDownload, CommandParams::None)
    }

    /// Prepare carrying the DFU company and firmware identifiers.
    pub fn prepare_dfu_download(company_id: u16, firmware_id: &[u8]) -> Self {
        Self::new(
            Opcode::PrepareDownload,
            CommandParams::Firmware {
                company_id,
                firmware_id: firmware_id.to_vec(),
            },
        )
    }

    pub fn start_download(image_size: u32) -> Self {
        Self::new(Opcode::StartDownload, CommandParams::Long(image_size))
    }

    pub fn verify(crc: u32) -> Self {
        Self::new(Opcode::Verify, CommandParams::Long(crc))
    }

    pub fn finish() -> Self {
        Self::new(Opcode::Finish, CommandParams::None)
    }

    pub fn get_status() -> Self {
        Self::new(Opcode::GetStatus, CommandParams::None)
    }

    pub fn clear_status() -> Self {
        Self::new(Opcode::ClearStatus, CommandParams::None)
    }

    pub fn abort() -> Self {
        Self::new(Opcode::Abort, CommandParams::None)
    }

    pub fn apply() -> Self {
        Self::new(Opcode::Apply, CommandParams::None)
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn params(&self) -> &CommandParams {
        &self.params
    }

    /// Encoded length in bytes.
    pub fn encoded_len(&self) -> usize {
        COMMAND_HEADER_SIZE
            + match &self.params {
                CommandParams::None => 0,
                CommandParams::Short(_) => SHORT_PARAM_SIZE,
                CommandParams::Long(_) => LONG_PARAM_SIZE,
                CommandParams::Firmware { firmware_id, .. } => COMPANY_ID_SIZE + firmware_id.len(),
            }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.push(self.opcode as u8);
        match &self.params {
            CommandParams::None => {}
            CommandParams::Short(value) => push_u16(&mut buf, *value),
            CommandParams::Long(value) => push_u32(&mut buf, *value),
            CommandParams::Firmware {
                company_id,
                firmware_id,
            } => {
                push_u16(&mut buf, *company_id);
                buf.extend_from_slice(firmware_id);
            }
        }
        buf
    }

    /// Decode a command as received by a peripheral.
    ///
    /// The parameter shape is keyed by opcode: prepare carries either nothing
    /// or company id + firmware id, start/verify always carry an `lParam`, the
    /// rest accept any of the fixed shapes.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let (&first, rest) = bytes.split_first().ok_or(CodecError::Empty)?;
        let opcode = Opcode::from_u8(first).ok_or(CodecError::UnknownOpcode(first))?;
        let invalid = || CodecError::InvalidLength {
            opcode,
            len: rest.len(),
        };
        let mut cursor = Cursor::new(rest);

        let params = match (opcode, rest.len()) {
            (_, 0) if !matches!(opcode, Opcode::StartDownload | Opcode::Verify) => {
                CommandParams::None
            }
            (Opcode::PrepareDownload, len) if len >= COMPANY_ID_SIZE => {
                let company_id = cursor.read_u16::<LittleEndian>().map_err(|_| invalid())?;
                CommandParams::Firmware {
                    company_id,
                    firmware_id: rest[COMPANY_ID_SIZE..].to_vec(),
                }
            }
            (Opcode::PrepareDownload, _) => return Err(invalid()),
            (_, LONG_PARAM_SIZE) => {
                CommandParams::Long(cursor.read_u32::<LittleEndian>().map_err(|_| invalid())?)
            }
            (Opcode::StartDownload | Opcode::Verify, _) => return Err(invalid()),
            (_, SHORT_PARAM_SIZE) => {
                CommandParams::Short(cursor.read_u16::<LittleEndian>().map_err(|_| invalid())?)
            }
            _ => return Err(invalid()),
        };

        Ok(Self { opcode, params })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.params {
            CommandParams::None => write!(f, "{}", self.opcode),
            CommandParams::Short(v) => write!(f, "{}(0x{:04X})", self.opcode, v),
            CommandParams::Long(v) => write!(f, "{}(0x{:08X})", self.opcode, v),
            CommandParams::Firmware {
                company_id,
                firmware_id,
            } => write!(
                f,
                "{}(cid=0x{:04X}, fwid={})",
                self.opcode,
                company_id,
                hex::encode(firmware_id)
            ),
        }
    }
}

// Writes into a Vec cannot fail.
fn push_u16(buf: &mut Vec<u8>, value: u16) {
    let _ = buf.write_u16::<LittleEndian>(value);
}

fn push_u32(buf: &mut Vec<u8>, value: u32) {
    let _ = buf.write_u32::<LittleEndian>(value);
}
