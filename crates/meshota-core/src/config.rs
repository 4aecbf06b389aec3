//! Upgrade configuration, stored as TOML.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::image::{DfuMetadata, FirmwareVersion};
use crate::protocol::DEFAULT_ATT_OVERHEAD;
use crate::state::TimeoutPolicy;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid hex in `{field}`: {source}")]
    InvalidHex {
        field: &'static str,
        #[source]
        source: hex::FromHexError,
    },
    #[error("`{0}` must be greater than zero")]
    Zero(&'static str),
}

/// Per-state timeout durations in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub base_ms: u64,
    /// Service discovery and verify.
    pub extended_ms: u64,
    pub connect_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        let policy = TimeoutPolicy::default();
        Self {
            base_ms: policy.base.as_millis() as u64,
            extended_ms: policy.extended.as_millis() as u64,
            connect_ms: policy.connect.as_millis() as u64,
        }
    }
}

impl TimeoutConfig {
    pub fn policy(&self) -> TimeoutPolicy {
        TimeoutPolicy {
            base: Duration::from_millis(self.base_ms),
            extended: Duration::from_millis(self.extended_ms),
            connect: Duration::from_millis(self.connect_ms),
        }
    }
}

/// Metadata table for mesh DFU uploads. Byte fields are hex strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DfuConfig {
    pub company_id: u16,
    pub firmware_id: String,
    pub product_id: u16,
    pub hardware_id: u16,
    pub version_major: u8,
    pub version_minor: u8,
    pub version_patch: u16,
    pub metadata: String,
}

impl DfuConfig {
    pub fn to_metadata(&self) -> Result<DfuMetadata, ConfigError> {
        let firmware_id = hex::decode(&self.firmware_id).map_err(|source| {
            ConfigError::InvalidHex {
                field: "firmware_id",
                source,
            }
        })?;
        let metadata = hex::decode(&self.metadata).map_err(|source| ConfigError::InvalidHex {
            field: "metadata",
            source,
        })?;
        Ok(DfuMetadata {
            company_id: self.company_id,
            firmware_id,
            product_id: self.product_id,
            hardware_id: self.hardware_id,
            version: FirmwareVersion {
                major: self.version_major,
                minor: self.version_minor,
                patch: self.version_patch,
            },
            metadata,
        })
    }
}

/// Configuration for upgrade sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OtaConfig {
    /// Fixed chunk size. Derived from the MTU when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<usize>,
    /// Bytes of the MTU taken by the write header.
    pub att_overhead: usize,
    pub timeouts: TimeoutConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dfu: Option<DfuConfig>,
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            chunk_size: None,
            att_overhead: DEFAULT_ATT_OVERHEAD,
            timeouts: TimeoutConfig::default(),
            dfu: None,
        }
    }
}

impl OtaConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: OtaConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == Some(0) {
            return Err(ConfigError::Zero("chunk_size"));
        }
        let t = &self.timeouts;
        for (name, value) in [
            ("timeouts.base_ms", t.base_ms),
            ("timeouts.extended_ms", t.extended_ms),
            ("timeouts.connect_ms", t.connect_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }
        if let Some(dfu) = &self.dfu {
            dfu.to_metadata()?;
        }
        Ok(())
    }

    pub fn timeout_policy(&self) -> TimeoutPolicy {
        self.timeouts.policy()
    }

    /// Chunk size for a link, `0` when the MTU leaves no room.
    pub fn chunk_size_for(&self, mtu: usize, payload_overhead: usize) -> usize {
        self.chunk_size
            .unwrap_or_else(|| mtu.saturating_sub(self.att_overhead + payload_overhead))
    }
}
