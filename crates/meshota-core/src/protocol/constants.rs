//! Protocol constants for the OTA command protocol.

use std::time::Duration;

use uuid::Uuid;

// ============================================================================
// Opcodes (Host -> Device, control point)
// ============================================================================

pub const OPCODE_PREPARE_DOWNLOAD: u8 = 0x01;
pub const OPCODE_START_DOWNLOAD: u8 = 0x02;
pub const OPCODE_VERIFY: u8 = 0x03;
pub const OPCODE_FINISH: u8 = 0x04;
pub const OPCODE_GET_STATUS: u8 = 0x05;
pub const OPCODE_CLEAR_STATUS: u8 = 0x06;
pub const OPCODE_ABORT: u8 = 0x07;
pub const OPCODE_APPLY: u8 = 0x08;

// ============================================================================
// Sizes
// ============================================================================

/// Opcode byte.
pub const COMMAND_HEADER_SIZE: usize = 1;
/// Short (`sParam`) parameter size.
pub const SHORT_PARAM_SIZE: usize = 2;
/// Long (`lParam`) parameter size.
pub const LONG_PARAM_SIZE: usize = 4;
/// Company id prefix of a DFU prepare command.
pub const COMPANY_ID_SIZE: usize = 2;

/// ATT write header subtracted from the negotiated MTU.
pub const DEFAULT_ATT_OVERHEAD: usize = 3;
/// MTU assumed when the link never negotiated one.
pub const DEFAULT_MTU: usize = 23;

/// Length of a well-formed app-info characteristic value.
pub const APP_INFO_SIZE: usize = 8;

// ============================================================================
// CRC
// ============================================================================

/// Initial value of the running CRC, also XORed in once on finalization.
pub const CRC32_INIT: u32 = 0xFFFF_FFFF;

// ============================================================================
// Timeouts
// ============================================================================

/// Base timeout for command/response and notification steps.
pub const BASE_TIMEOUT: Duration = Duration::from_millis(5_000);
/// Service discovery and verify (flash readback on the peer).
pub const EXTENDED_TIMEOUT: Duration = Duration::from_millis(10_000);
/// Scan + connect.
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(15_000);

// ============================================================================
// GATT UUIDs
// ============================================================================

/// Legacy OTA service.
pub const LEGACY_OTA_SERVICE_UUID: Uuid = Uuid::from_u128(0x00010203_0405_0607_0809_0a0b0c0d1912);
/// Legacy control point.
pub const LEGACY_CONTROL_POINT_UUID: Uuid =
    Uuid::from_u128(0x00010203_0405_0607_0809_0a0b0c0d2b12);
/// Legacy data channel.
pub const LEGACY_DATA_UUID: Uuid = Uuid::from_u128(0x00010203_0405_0607_0809_0a0b0c0d2b13);

/// Current OTA service.
pub const OTA_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_7fdd_0000_1000_8000_00805f9b34fb);
/// Current control point.
pub const OTA_CONTROL_POINT_UUID: Uuid = Uuid::from_u128(0x0000_7fd1_0000_1000_8000_00805f9b34fb);
/// Current data channel.
pub const OTA_DATA_UUID: Uuid = Uuid::from_u128(0x0000_7fd2_0000_1000_8000_00805f9b34fb);
/// Current app-info characteristic (absent on legacy peripherals).
pub const OTA_APP_INFO_UUID: Uuid = Uuid::from_u128(0x0000_7fd3_0000_1000_8000_00805f9b34fb);
