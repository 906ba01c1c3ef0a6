//! Local Connection State
//!
//! Per-client bookkeeping: which device is connected, in which role, and
//! what the classifier said last. Lives for the process only.

use crate::domain::labels::GestureLabel;
use crate::domain::models::{DeviceRole, DeviceUuids, LastPrediction, LocalState};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::info;

/// Shared handle to this client's [`LocalState`]
#[derive(Clone, Default)]
pub struct LocalSession {
    state: Arc<RwLock<LocalState>>,
}

impl LocalSession {
    pub fn new(recognition_threshold: f32) -> Self {
        Self {
            state: Arc::new(RwLock::new(LocalState::with_threshold(
                recognition_threshold.clamp(0.0, 1.0),
            ))),
        }
    }

    pub fn snapshot(&self) -> LocalState {
        self.read().clone()
    }

    pub fn role(&self) -> Option<DeviceRole> {
        self.read().role
    }

    pub fn recognition_threshold(&self) -> f32 {
        self.read().recognition_threshold
    }

    pub fn set_recognition_threshold(&self, threshold: f32) {
        self.write().recognition_threshold = threshold.clamp(0.0, 1.0);
    }

    pub fn is_connected(&self) -> bool {
        self.read().connected
    }

    pub fn mark_connected(&self, role: DeviceRole, name: Option<String>, uuids: DeviceUuids) {
        let mut state = self.write();
        state.connected = true;
        state.role = Some(role);
        state.name = name;
        state.device_uuids = Some(uuids);
        info!(%role, name = ?state.name, "device connected");
    }

    /// Clear the connection flag if `role` is the role this client follows
    pub fn mark_disconnected(&self, role: DeviceRole) {
        let mut state = self.write();
        if state.role == Some(role) {
            state.connected = false;
            state.drawing = false;
            info!(%role, "device disconnected");
        }
    }

    pub fn record_prediction(&self, label: Option<GestureLabel>, score: f32) {
        self.write().last_prediction = LastPrediction { label, score };
    }

    pub fn last_prediction(&self) -> LastPrediction {
        self.read().last_prediction
    }

    pub fn set_drawing(&self, drawing: bool) {
        self.write().drawing = drawing;
    }

    pub fn set_muted(&self, muted: bool) {
        self.write().muted = muted;
    }

    /// Back to defaults, keeping the configured threshold
    pub fn reset(&self) {
        let mut state = self.write();
        let threshold = state.recognition_threshold;
        *state = LocalState::with_threshold(threshold);
    }

    fn read(&self) -> RwLockReadGuard<'_, LocalState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, LocalState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}
