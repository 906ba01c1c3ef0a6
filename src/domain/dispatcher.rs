//! Command Dispatcher
//!
//! Pure reducer from `(Action, SyncState)` to the next `SyncState`. The store
//! is the only caller in production; it owns locking and persistence.

use crate::domain::errors::IngestError;
use crate::domain::models::{Action, Instrument, SyncState};
use crate::domain::settings::{DispatchSettings, SpeedStep};

/// Speeds never go below this, whatever the configuration says
const SPEED_FLOOR: f32 = 0.01;

pub fn apply(
    action: &Action,
    state: &SyncState,
    settings: &DispatchSettings,
) -> Result<SyncState, IngestError> {
    let mut next = state.clone();

    match action {
        Action::SelectInstrument(instrument) => {
            next.selected_instrument = Some(*instrument);
        }
        Action::VolumeUp | Action::VolumeDown => {
            let targets = targets(&next, action)?;
            for instrument in targets {
                if let Some(entry) = next.instruments.get_mut(&instrument) {
                    entry.volume = step_volume(entry.volume, *action == Action::VolumeUp, settings);
                }
            }
        }
        Action::SpeedUp | Action::SpeedDown => {
            let targets = targets(&next, action)?;
            for instrument in targets {
                if let Some(entry) = next.instruments.get_mut(&instrument) {
                    entry.speed = step_speed(entry.speed, *action == Action::SpeedUp, settings);
                }
            }
        }
        Action::TogglePlay => {
            let targets = targets(&next, action)?;
            if next.selected_instrument == Some(Instrument::All) {
                // The ensemble follows the aggregate so every part starts together
                let playing = !next
                    .instruments
                    .get(&Instrument::All)
                    .map(|entry| entry.playing)
                    .unwrap_or(false);
                for instrument in targets {
                    if let Some(entry) = next.instruments.get_mut(&instrument) {
                        entry.playing = playing;
                    }
                }
            } else {
                for instrument in targets {
                    if let Some(entry) = next.instruments.get_mut(&instrument) {
                        entry.playing = !entry.playing;
                    }
                }
            }
        }
    }

    next.time = next.time.wrapping_add(1);
    Ok(next)
}

/// Instruments affected by `action` under the current selection
fn targets(state: &SyncState, action: &Action) -> Result<Vec<Instrument>, IngestError> {
    match state.selected_instrument {
        Some(Instrument::All) => Ok(Instrument::all().to_vec()),
        Some(instrument) => Ok(vec![instrument]),
        None => Err(IngestError::DispatchNoop { action: *action }),
    }
}

fn step_volume(volume: u8, up: bool, settings: &DispatchSettings) -> u8 {
    let volume = volume.min(100);
    if up {
        volume.saturating_add(settings.volume_step).min(100)
    } else {
        volume.saturating_sub(settings.volume_step)
    }
}

fn step_speed(speed: f32, up: bool, settings: &DispatchSettings) -> f32 {
    let next = match (settings.speed_step, up) {
        (SpeedStep::Additive(delta), true) => speed + delta,
        (SpeedStep::Additive(delta), false) => speed - delta,
        (SpeedStep::Multiplicative(factor), true) => speed * factor,
        (SpeedStep::Multiplicative(factor), false) => speed / factor,
    };

    let min = settings.min_speed.max(SPEED_FLOOR);
    let max = settings.max_speed.max(min);
    if next.is_nan() {
        return speed.clamp(min, max);
    }
    next.clamp(min, max)
}
