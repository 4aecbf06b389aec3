//! OTA protocol revisions and their GATT layout.

use std::fmt;

use uuid::Uuid;

use super::constants::*;

/// Logical channel on the OTA service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Characteristic {
    /// Commands out, status responses back (indications).
    ControlPoint,
    /// Raw firmware bytes.
    Data,
    /// Optional application info.
    AppInfo,
}

impl fmt::Display for Characteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Characteristic::ControlPoint => write!(f, "control-point"),
            Characteristic::Data => write!(f, "data"),
            Characteristic::AppInfo => write!(f, "app-info"),
        }
    }
}

/// OTA protocol revision, resolved from the service found on the peer.
///
/// The wire format is identical; the revision decides which
/// characteristics exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProtocolVariant {
    Legacy,
    #[default]
    Current,
}

impl ProtocolVariant {
    pub fn service_uuid(&self) -> Uuid {
        match self {
            ProtocolVariant::Legacy => LEGACY_OTA_SERVICE_UUID,
            ProtocolVariant::Current => OTA_SERVICE_UUID,
        }
    }

    pub fn characteristic_uuid(&self, characteristic: Characteristic) -> Option<Uuid> {
        match (self, characteristic) {
            (ProtocolVariant::Legacy, Characteristic::ControlPoint) => {
                Some(LEGACY_CONTROL_POINT_UUID)
            }
            (ProtocolVariant::Legacy, Characteristic::Data) => Some(LEGACY_DATA_UUID),
            (ProtocolVariant::Legacy, Characteristic::AppInfo) => None,
            (ProtocolVariant::Current, Characteristic::ControlPoint) => {
                Some(OTA_CONTROL_POINT_UUID)
            }
            (ProtocolVariant::Current, Characteristic::Data) => Some(OTA_DATA_UUID),
            (ProtocolVariant::Current, Characteristic::AppInfo) => Some(OTA_APP_INFO_UUID),
        }
    }

    pub fn has_characteristic(&self, characteristic: Characteristic) -> bool {
        self.characteristic_uuid(characteristic).is_some()
    }

    /// Resolve the variant from a discovered service UUID.
    pub fn from_service_uuid(uuid: &Uuid) -> Option<Self> {
        [ProtocolVariant::Current, ProtocolVariant::Legacy]
            .into_iter()
            .find(|v| v.service_uuid() == *uuid)
    }
}

impl fmt::Display for ProtocolVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVariant::Legacy => write!(f, "legacy"),
            ProtocolVariant::Current => write!(f, "current"),
        }
    }
}
