use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One sample of a gesture trajectory.
///
/// `f64` holds every `Int32` wire coordinate exactly.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// State tag carried by every stroke notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrokeState {
    Start,
    Continue,
    End,
    /// No stroke in flight. Never sent on the wire.
    Idle,
}

impl StrokeState {
    /// Decode the wire value of the state field
    pub fn from_wire(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::Start),
            1 => Some(Self::Continue),
            2 => Some(Self::End),
            _ => None,
        }
    }

    /// Wire value, `None` for [`StrokeState::Idle`]
    pub fn to_wire(self) -> Option<u8> {
        match self {
            Self::Start => Some(0),
            Self::Continue => Some(1),
            Self::End => Some(2),
            Self::Idle => None,
        }
    }
}

impl fmt::Display for StrokeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrokeState::Start => write!(f, "start"),
            StrokeState::Continue => write!(f, "continue"),
            StrokeState::End => write!(f, "end"),
            StrokeState::Idle => write!(f, "idle"),
        }
    }
}

/// A single decoded stroke notification
#[derive(Debug, Clone, PartialEq)]
pub struct StrokeSegment {
    pub state: StrokeState,
    /// Point count declared by the device
    pub length: u32,
    pub points: Vec<Point>,
}

/// A completed gesture trajectory.
///
/// Only the aggregator builds strokes; once handed out the value exposes no
/// way to mutate its points.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stroke {
    role: DeviceRole,
    points: Vec<Point>,
    length: usize,
    state: StrokeState,
}

impl Stroke {
    pub(crate) fn sealed(role: DeviceRole, points: Vec<Point>, length: usize) -> Self {
        Self {
            role,
            points,
            length,
            state: StrokeState::End,
        }
    }

    pub fn role(&self) -> DeviceRole {
        self.role
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Number of points collected
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Sum of the lengths declared by every segment of the stroke
    pub fn declared_length(&self) -> usize {
        self.length
    }

    pub fn state(&self) -> StrokeState {
        self.state
    }

    /// True when the collected points match the declared lengths
    pub fn is_consistent(&self) -> bool {
        self.points.len() == self.length
    }
}

/// Classifier output for one gesture
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictionResult {
    pub label_index: i32,
    /// Confidence in `[0, 1]`
    pub score: f32,
}

/// Which kind of peripheral a notification came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceRole {
    /// Gestures map to playback commands
    Command,
    /// Gestures select the instrument targeted by commands
    Instrument,
}

impl DeviceRole {
    pub fn all() -> &'static [DeviceRole] {
        &[DeviceRole::Command, DeviceRole::Instrument]
    }
}

impl fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceRole::Command => write!(f, "command"),
            DeviceRole::Instrument => write!(f, "instrument"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Instrument {
    Violin1,
    Violin2,
    Viola,
    Cello,
    /// Aggregate target: commands apply to every instrument
    All,
}

impl Instrument {
    pub fn all() -> &'static [Instrument] {
        &[
            Instrument::Violin1,
            Instrument::Violin2,
            Instrument::Viola,
            Instrument::Cello,
            Instrument::All,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Instrument::Violin1 => "violin1",
            Instrument::Violin2 => "violin2",
            Instrument::Viola => "viola",
            Instrument::Cello => "cello",
            Instrument::All => "all",
        }
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Semantic command produced from a prediction (or from the UI)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "instrument", rename_all = "snake_case")]
pub enum Action {
    SelectInstrument(Instrument),
    VolumeUp,
    VolumeDown,
    SpeedUp,
    SpeedDown,
    TogglePlay,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::SelectInstrument(instrument) => write!(f, "select {}", instrument),
            Action::VolumeUp => write!(f, "volume up"),
            Action::VolumeDown => write!(f, "volume down"),
            Action::SpeedUp => write!(f, "speed up"),
            Action::SpeedDown => write!(f, "speed down"),
            Action::TogglePlay => write!(f, "toggle play"),
        }
    }
}

/// Playback parameters of one instrument
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InstrumentState {
    /// 0..=100
    pub volume: u8,
    /// Playback rate, always > 0
    pub speed: f32,
    pub playing: bool,
}

impl Default for InstrumentState {
    fn default() -> Self {
        Self {
            volume: 100,
            speed: 1.0,
            playing: false,
        }
    }
}

/// The shared document every observer sees
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    /// Logical clock, bumped once per successful dispatch
    #[serde(default)]
    pub time: u64,
    #[serde(rename = "instrument", default)]
    pub selected_instrument: Option<Instrument>,
    #[serde(default)]
    pub instruments: BTreeMap<Instrument, InstrumentState>,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            time: 0,
            selected_instrument: None,
            instruments: Instrument::all()
                .iter()
                .map(|instrument| (*instrument, InstrumentState::default()))
                .collect(),
        }
    }
}

impl SyncState {
    /// Fill in any instrument missing from a loaded document.
    ///
    /// Returns true if the document had to be completed.
    pub fn normalize(&mut self) -> bool {
        let mut changed = false;
        for instrument in Instrument::all() {
            if !self.instruments.contains_key(instrument) {
                self.instruments
                    .insert(*instrument, InstrumentState::default());
                changed = true;
            }
        }
        for state in self.instruments.values_mut() {
            if state.volume > 100 {
                state.volume = 100;
                changed = true;
            }
            if !(state.speed > 0.0) {
                state.speed = InstrumentState::default().speed;
                changed = true;
            }
        }
        changed
    }

    pub fn instrument(&self, instrument: Instrument) -> Option<&InstrumentState> {
        self.instruments.get(&instrument)
    }
}

/// Characteristic UUIDs of one peripheral
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceUuids {
    pub service: String,
    pub stroke: String,
    pub prediction: String,
}

/// Last prediction shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct LastPrediction {
    pub label: Option<crate::domain::labels::GestureLabel>,
    pub score: f32,
}

/// Per-client connection and session bookkeeping. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalState {
    pub name: Option<String>,
    pub connected: bool,
    pub role: Option<DeviceRole>,
    pub device_uuids: Option<DeviceUuids>,
    /// A recognition session is active
    pub drawing: bool,
    /// Gates any audio side effects
    pub muted: bool,
    pub recognition_threshold: f32,
    pub last_prediction: LastPrediction,
}

impl LocalState {
    pub fn with_threshold(recognition_threshold: f32) -> Self {
        Self {
            name: None,
            connected: false,
            role: None,
            device_uuids: None,
            drawing: false,
            muted: false,
            recognition_threshold,
            last_prediction: LastPrediction::default(),
        }
    }
}

impl Default for LocalState {
    fn default() -> Self {
        Self::with_threshold(0.6)
    }
}

/// Events forwarded to observers of the ingest service
#[derive(Debug, Clone)]
pub enum AppEvent {
    StrokeCompleted(Stroke),
    Prediction(LastPrediction),
    ConnectionStatus(DeviceRole, ConnectionStatus),
    LogMessage(StatusMessage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connected,
    Error,
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}
