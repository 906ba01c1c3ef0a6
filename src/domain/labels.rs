//! Classifier label tables
//!
//! Indices are part of the BLE protocol: the on-device classifier reports a
//! position in one of these tables. Reordering them is a breaking change.

use crate::domain::models::{DeviceRole, Instrument};
use serde::{Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandLabel {
    VolumeDown,
    VolumeUp,
    SpeedDown,
    SpeedUp,
}

impl CommandLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandLabel::VolumeDown => "volume down",
            CommandLabel::VolumeUp => "volume up",
            CommandLabel::SpeedDown => "speed down",
            CommandLabel::SpeedUp => "speed up",
        }
    }
}

/// Gestures recognized on the command device: `<`, `>`, down, up
pub const COMMAND_LABELS: [CommandLabel; 4] = [
    CommandLabel::VolumeDown,
    CommandLabel::VolumeUp,
    CommandLabel::SpeedDown,
    CommandLabel::SpeedUp,
];

/// Gestures recognized on the instrument device: `|`, `--`, triangle, circle, square
pub const INSTRUMENT_LABELS: [Instrument; 5] = [
    Instrument::Violin1,
    Instrument::Violin2,
    Instrument::Viola,
    Instrument::Cello,
    Instrument::All,
];

/// A label from either table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureLabel {
    Command(CommandLabel),
    Instrument(Instrument),
}

impl GestureLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            GestureLabel::Command(label) => label.as_str(),
            GestureLabel::Instrument(instrument) => instrument.as_str(),
        }
    }
}

impl fmt::Display for GestureLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for GestureLabel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Look up `index` in the table of `role`
pub fn label_for(role: DeviceRole, index: i32) -> Option<GestureLabel> {
    let index = usize::try_from(index).ok()?;
    match role {
        DeviceRole::Command => COMMAND_LABELS
            .get(index)
            .copied()
            .map(GestureLabel::Command),
        DeviceRole::Instrument => INSTRUMENT_LABELS
            .get(index)
            .copied()
            .map(GestureLabel::Instrument),
    }
}
