//! Prediction Interpreter
//!
//! Turns a classifier result into a semantic [`Action`], using the label
//! table of the device that produced it.

use crate::domain::errors::IngestError;
use crate::domain::labels::{label_for, CommandLabel, GestureLabel};
use crate::domain::models::{Action, DeviceRole, PredictionResult};
use tracing::debug;

/// Map a prediction to an action.
///
/// Fails with [`IngestError::UnknownLabel`] when the index is outside the
/// role's table and with [`IngestError::LowConfidence`] when the score is
/// below `threshold`. A NaN score never passes the threshold.
pub fn interpret(
    role: DeviceRole,
    prediction: &PredictionResult,
    threshold: f32,
) -> Result<Action, IngestError> {
    let label = label_for(role, prediction.label_index).ok_or(IngestError::UnknownLabel {
        role,
        index: prediction.label_index,
    })?;

    if !(prediction.score >= threshold) {
        return Err(IngestError::LowConfidence {
            score: prediction.score,
            threshold,
        });
    }

    let action = action_for(label);
    debug!(%role, %label, score = prediction.score, %action, "prediction interpreted");
    Ok(action)
}

pub fn action_for(label: GestureLabel) -> Action {
    match label {
        GestureLabel::Command(CommandLabel::VolumeDown) => Action::VolumeDown,
        GestureLabel::Command(CommandLabel::VolumeUp) => Action::VolumeUp,
        GestureLabel::Command(CommandLabel::SpeedDown) => Action::SpeedDown,
        GestureLabel::Command(CommandLabel::SpeedUp) => Action::SpeedUp,
        GestureLabel::Instrument(instrument) => Action::SelectInstrument(instrument),
    }
}
