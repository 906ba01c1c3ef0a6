//! BLE Connection Module
//!
//! Characteristic table for both peripherals: resolves the UUID of an
//! incoming notification to the device role and characteristic it belongs to.

use crate::domain::models::{DeviceRole, DeviceUuids};
use crate::domain::settings::{ProtocolSettings, Settings};
use crate::infrastructure::bluetooth::protocol::{self, PayloadCodec};

/// The two notify characteristics each peripheral exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharacteristicKind {
    Stroke,
    Prediction,
}

/// Configuration for notification handling
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub command: DeviceUuids,
    pub instrument: DeviceUuids,
    pub protocol: ProtocolSettings,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            command: DeviceUuids {
                service: protocol::COMMAND_SERVICE_UUID.to_string(),
                stroke: protocol::COMMAND_STROKE_UUID.to_string(),
                prediction: protocol::COMMAND_PREDICTION_UUID.to_string(),
            },
            instrument: DeviceUuids {
                service: protocol::INSTRUMENT_SERVICE_UUID.to_string(),
                stroke: protocol::INSTRUMENT_STROKE_UUID.to_string(),
                prediction: protocol::INSTRUMENT_PREDICTION_UUID.to_string(),
            },
            protocol: ProtocolSettings::default(),
        }
    }
}

impl ConnectionConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            command: DeviceUuids {
                service: settings.command_service_uuid.clone(),
                stroke: settings.command_stroke_uuid.clone(),
                prediction: settings.command_prediction_uuid.clone(),
            },
            instrument: DeviceUuids {
                service: settings.instrument_service_uuid.clone(),
                stroke: settings.instrument_stroke_uuid.clone(),
                prediction: settings.instrument_prediction_uuid.clone(),
            },
            protocol: settings.protocol.clone(),
        }
    }

    pub fn codec(&self) -> PayloadCodec {
        PayloadCodec::new(self.protocol.byte_order)
    }

    pub fn uuids_for(&self, role: DeviceRole) -> &DeviceUuids {
        match role {
            DeviceRole::Command => &self.command,
            DeviceRole::Instrument => &self.instrument,
        }
    }

    /// Which device and characteristic a notification UUID belongs to
    pub fn resolve(&self, uuid: &str) -> Option<(DeviceRole, CharacteristicKind)> {
        let uuid = uuid.trim();
        DeviceRole::all().iter().find_map(|role| {
            let uuids = self.uuids_for(*role);
            if uuids.stroke.eq_ignore_ascii_case(uuid) {
                Some((*role, CharacteristicKind::Stroke))
            } else if uuids.prediction.eq_ignore_ascii_case(uuid) {
                Some((*role, CharacteristicKind::Prediction))
            } else {
                None
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_characteristics() {
        let config = ConnectionConfig::default();
        assert_eq!(
            config.resolve(protocol::COMMAND_STROKE_UUID),
            Some((DeviceRole::Command, CharacteristicKind::Stroke))
        );
        assert_eq!(
            config.resolve(&protocol::INSTRUMENT_PREDICTION_UUID.to_uppercase()),
            Some((DeviceRole::Instrument, CharacteristicKind::Prediction))
        );
        assert_eq!(config.resolve(protocol::COMMAND_SERVICE_UUID), None);
        assert_eq!(config.resolve("c8c51726-81bc-483b-a052-f7a14ea3d281"), None);
    }

    #[test]
    fn test_settings_override_uuids() {
        let settings = Settings {
            command_stroke_uuid: "0000aaaa-0000-1000-8000-00805f9b34fb".to_string(),
            ..Settings::default()
        };
        let config = ConnectionConfig::from_settings(&settings);
        assert_eq!(
            config.resolve("0000AAAA-0000-1000-8000-00805F9B34FB"),
            Some((DeviceRole::Command, CharacteristicKind::Stroke))
        );
        assert_eq!(config.resolve(protocol::COMMAND_STROKE_UUID), None);
    }
}
