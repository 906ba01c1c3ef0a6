//! Host feed
//!
//! The binary reads one JSON object per stdin line. A line is either a BLE
//! event from the platform stack or a command from the UI layer; both are
//! tagged by `"type"`.

use crate::domain::errors::IngestError;
use crate::domain::models::{Action, Instrument, SyncState};
use crate::domain::session::LocalSession;
use crate::domain::store::SyncStore;
use crate::infrastructure::bluetooth::BleEvent;
use anyhow::Context;
use serde::Deserialize;
use tracing::{info, warn};

/// Commands issued by the UI layer, outside gesture ingestion
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiCommand {
    TogglePlay,
    Select { instrument: Instrument },
    /// Restore the synchronized document to defaults
    Reset,
    SetThreshold { value: f32 },
    Mute { muted: bool },
    /// A recognition session started or stopped on the device
    Drawing { active: bool },
    /// Several actions applied in order with one flush, e.g. a saved scene
    Batch { actions: Vec<Action> },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FeedLine {
    Ble(BleEvent),
    Ui(UiCommand),
}

/// Parse one line; `Ok(None)` for blank lines
pub fn parse_line(line: &str) -> anyhow::Result<Option<FeedLine>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line)
        .map(Some)
        .with_context(|| format!("Unrecognized feed line: {}", line))
}

/// Apply a UI command. Returns the new document when it changed.
pub fn apply_ui_command(
    command: &UiCommand,
    store: &SyncStore,
    session: &LocalSession,
) -> Result<Option<SyncState>, IngestError> {
    match command {
        UiCommand::TogglePlay => store.apply(&Action::TogglePlay).map(Some),
        UiCommand::Select { instrument } => {
            store.apply(&Action::SelectInstrument(*instrument)).map(Some)
        }
        UiCommand::Reset => Ok(Some(store.reset())),
        UiCommand::SetThreshold { value } => {
            session.set_recognition_threshold(*value);
            info!(
                threshold = session.recognition_threshold(),
                "recognition threshold changed"
            );
            Ok(None)
        }
        UiCommand::Mute { muted } => {
            session.set_muted(*muted);
            Ok(None)
        }
        UiCommand::Drawing { active } => {
            session.set_drawing(*active);
            Ok(None)
        }
        UiCommand::Batch { actions } => {
            let result = store.apply_batch(actions);
            for skipped in &result.skipped {
                warn!("batch action skipped: {}", skipped);
            }
            match (result.applied, result.skipped.into_iter().next()) {
                (0, Some(first)) => Err(first),
                (0, None) => Ok(None),
                _ => Ok(Some(result.state)),
            }
        }
    }
}
