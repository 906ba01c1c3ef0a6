use crate::infrastructure::bluetooth::protocol::{self, ByteOrder, FieldKind};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Rolling period of the log file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Minutely,
    Hourly,
    #[default]
    Daily,
    Never,
}

/// Logging configuration. Missing keys take the values of [`LogSettings::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Filter directive, `RUST_LOG` takes precedence
    pub level: String,
    pub console: bool,
    /// Rolling file output; `None` disables it
    pub file: Option<FileLogSettings>,
    pub show_file_line: bool,
    pub show_thread_ids: bool,
    pub show_target: bool,
    /// Console only; files never get escape codes
    pub ansi_colors: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLogSettings {
    /// Relative to the data directory unless absolute
    pub dir: String,
    pub prefix: String,
    pub rotation: LogRotation,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console: true,
            file: Some(FileLogSettings::default()),
            show_file_line: false,
            show_thread_ids: false,
            show_target: true,
            ansi_colors: true,
        }
    }
}

impl Default for FileLogSettings {
    fn default() -> Self {
        Self {
            dir: "logs".to_string(),
            prefix: "orchestra_conductor.log".to_string(),
            rotation: LogRotation::Daily,
        }
    }
}

impl FileLogSettings {
    /// Absolute `dir` as-is, otherwise joined onto `base`
    pub fn resolve_dir(&self, base: &Path) -> PathBuf {
        let dir = Path::new(&self.dir);
        if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            base.join(dir)
        }
    }
}

/// How speed commands change an instrument's playback rate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SpeedStep {
    /// Add or subtract a fixed amount
    Additive(f32),
    /// Multiply or divide by a fixed factor
    Multiplicative(f32),
}

/// Step sizes used by the command dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DispatchSettings {
    #[serde(default = "default_volume_step")]
    pub volume_step: u8,
    #[serde(default = "default_speed_step")]
    pub speed_step: SpeedStep,
    #[serde(default = "default_min_speed")]
    pub min_speed: f32,
    #[serde(default = "default_max_speed")]
    pub max_speed: f32,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            volume_step: default_volume_step(),
            speed_step: default_speed_step(),
            min_speed: default_min_speed(),
            max_speed: default_max_speed(),
        }
    }
}

fn default_volume_step() -> u8 {
    10
}
fn default_speed_step() -> SpeedStep {
    SpeedStep::Additive(0.1)
}
fn default_min_speed() -> f32 {
    0.1
}
fn default_max_speed() -> f32 {
    4.0
}

/// Wire layout of the stroke and prediction characteristics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolSettings {
    #[serde(default)]
    pub byte_order: ByteOrder,
    #[serde(default = "default_stroke_structures")]
    pub stroke_structures: Vec<FieldKind>,
    #[serde(default = "default_prediction_structures")]
    pub prediction_structures: Vec<FieldKind>,
    /// Integer scores are divided by this to land in [0, 1]
    #[serde(default = "default_score_divisor")]
    pub score_divisor: f32,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            byte_order: ByteOrder::default(),
            stroke_structures: default_stroke_structures(),
            prediction_structures: default_prediction_structures(),
            score_divisor: default_score_divisor(),
        }
    }
}

fn default_stroke_structures() -> Vec<FieldKind> {
    vec![FieldKind::Uint8, FieldKind::StrokePoints]
}
fn default_prediction_structures() -> Vec<FieldKind> {
    vec![FieldKind::Int32, FieldKind::Float32]
}
fn default_score_divisor() -> f32 {
    100.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,

    // Recognition
    #[serde(default = "default_recognition_threshold")]
    pub recognition_threshold: f32,
    #[serde(default)]
    pub dispatch: DispatchSettings,

    // Protocol
    #[serde(default)]
    pub protocol: ProtocolSettings,

    // BLE Settings
    #[serde(default = "default_command_service_uuid")]
    pub command_service_uuid: String,
    #[serde(default = "default_command_stroke_uuid")]
    pub command_stroke_uuid: String,
    #[serde(default = "default_command_prediction_uuid")]
    pub command_prediction_uuid: String,
    #[serde(default = "default_instrument_service_uuid")]
    pub instrument_service_uuid: String,
    #[serde(default = "default_instrument_stroke_uuid")]
    pub instrument_stroke_uuid: String,
    #[serde(default = "default_instrument_prediction_uuid")]
    pub instrument_prediction_uuid: String,

    // Synchronized state
    #[serde(default = "default_state_key")]
    pub state_key: String,
    /// Directory holding the shared document; platform data dir when unset
    #[serde(default)]
    pub storage_dir: Option<String>,
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_settings: LogSettings::default(),
            recognition_threshold: default_recognition_threshold(),
            dispatch: DispatchSettings::default(),
            protocol: ProtocolSettings::default(),
            command_service_uuid: default_command_service_uuid(),
            command_stroke_uuid: default_command_stroke_uuid(),
            command_prediction_uuid: default_command_prediction_uuid(),
            instrument_service_uuid: default_instrument_service_uuid(),
            instrument_stroke_uuid: default_instrument_stroke_uuid(),
            instrument_prediction_uuid: default_instrument_prediction_uuid(),
            state_key: default_state_key(),
            storage_dir: None,
            sync_interval_ms: default_sync_interval_ms(),
        }
    }
}

fn default_recognition_threshold() -> f32 {
    0.6
}
fn default_command_service_uuid() -> String {
    protocol::COMMAND_SERVICE_UUID.to_string()
}
fn default_command_stroke_uuid() -> String {
    protocol::COMMAND_STROKE_UUID.to_string()
}
fn default_command_prediction_uuid() -> String {
    protocol::COMMAND_PREDICTION_UUID.to_string()
}
fn default_instrument_service_uuid() -> String {
    protocol::INSTRUMENT_SERVICE_UUID.to_string()
}
fn default_instrument_stroke_uuid() -> String {
    protocol::INSTRUMENT_STROKE_UUID.to_string()
}
fn default_instrument_prediction_uuid() -> String {
    protocol::INSTRUMENT_PREDICTION_UUID.to_string()
}
fn default_state_key() -> String {
    "sync-state".to_string()
}
fn default_sync_interval_ms() -> u64 {
    500
}

impl Settings {
    /// Directory for the synchronized document
    pub fn resolve_storage_dir(&self) -> anyhow::Result<PathBuf> {
        if let Some(dir) = &self.storage_dir {
            return Ok(PathBuf::from(dir));
        }
        let mut path = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
        path.push("OrchestraConductor");
        Ok(path)
    }
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    /// Load settings from the platform config directory
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::from_path(settings_path))
    }

    /// Load settings from an explicit file; missing or invalid files give defaults
    pub fn from_path(settings_path: PathBuf) -> Self {
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                // Logging is not up yet when settings load
                if settings_path.exists() {
                    eprintln!(
                        "Ignoring settings file {}: {:#}",
                        settings_path.display(),
                        e
                    );
                }
                Settings::default()
            }
        };

        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("OrchestraConductor");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn update_recognition_threshold(&mut self, threshold: f32) -> anyhow::Result<()> {
        self.settings.recognition_threshold = threshold.clamp(0.0, 1.0);
        self.save()
    }
}
