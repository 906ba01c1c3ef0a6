//! Ingestion error taxonomy
//!
//! Every variant is recoverable: the notification that caused it is dropped
//! and the last good state stays in place.

use crate::domain::models::{Action, DeviceRole};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum IngestError {
    #[error("malformed payload: {reason}")]
    MalformedPayload { reason: String },

    #[error("protocol violation on {role} stroke ({state}): {detail}")]
    ProtocolViolation {
        role: DeviceRole,
        state: String,
        detail: String,
    },

    #[error("unknown {role} label index {index}")]
    UnknownLabel { role: DeviceRole, index: i32 },

    #[error("low confidence prediction ({score:.2} < {threshold:.2})")]
    LowConfidence { score: f32, threshold: f32 },

    #[error("no target for '{action}': no instrument selected")]
    DispatchNoop { action: Action },

    #[error("notification from unknown characteristic {uuid}")]
    UnknownCharacteristic { uuid: String },
}

impl IngestError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedPayload {
            reason: reason.into(),
        }
    }
}

/// Counters for everything that happened at the ingestion boundary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub malformed_payloads: u64,
    pub protocol_violations: u64,
    pub unknown_labels: u64,
    pub low_confidence: u64,
    pub dispatch_noops: u64,
    pub unknown_characteristics: u64,
    pub length_mismatches: u64,
    pub strokes_completed: u64,
    pub actions_dispatched: u64,
}

impl IngestStats {
    pub fn record(&mut self, error: &IngestError) {
        match error {
            IngestError::MalformedPayload { .. } => self.malformed_payloads += 1,
            IngestError::ProtocolViolation { .. } => self.protocol_violations += 1,
            IngestError::UnknownLabel { .. } => self.unknown_labels += 1,
            IngestError::LowConfidence { .. } => self.low_confidence += 1,
            IngestError::DispatchNoop { .. } => self.dispatch_noops += 1,
            IngestError::UnknownCharacteristic { .. } => self.unknown_characteristics += 1,
        }
    }

    /// Total number of dropped notifications or actions
    pub fn errors(&self) -> u64 {
        self.malformed_payloads
            + self.protocol_violations
            + self.unknown_labels
            + self.low_confidence
            + self.dispatch_noops
            + self.unknown_characteristics
    }
}
