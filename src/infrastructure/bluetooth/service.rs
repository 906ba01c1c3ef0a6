//! Ingest Service Module
//!
//! The ingestion boundary. Routes every BLE event through the codec, the
//! per-role stroke aggregators, the prediction interpreter and the store, in
//! arrival order. Errors are counted and logged here and never travel
//! further: observers keep rendering the last good state.

use crate::domain::errors::{IngestError, IngestStats};
use crate::domain::gestures::{StrokeAggregator, StrokeProgress};
use crate::domain::interpreter;
use crate::domain::labels::label_for;
use crate::domain::models::{
    AppEvent, ConnectionStatus, DeviceRole, LastPrediction, MessageSeverity, StatusMessage,
    Stroke, SyncState,
};
use crate::domain::session::LocalSession;
use crate::domain::store::SyncStore;
use crate::infrastructure::bluetooth::connection::{CharacteristicKind, ConnectionConfig};
use crate::infrastructure::bluetooth::protocol::PayloadCodec;
use serde::Deserialize;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Events delivered by the platform Bluetooth stack
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BleEvent {
    Connected {
        role: DeviceRole,
        #[serde(default)]
        name: Option<String>,
    },
    /// A characteristic value changed
    Notification { uuid: String, data: Vec<u8> },
    Disconnected { role: DeviceRole },
    /// Unrecoverable link failure
    TransportError { role: DeviceRole, message: String },
}

/// What happened to one event
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Connected(DeviceRole),
    Disconnected(DeviceRole),
    StrokeStarted(DeviceRole),
    StrokeExtended(DeviceRole),
    StrokeCompleted(Stroke),
    Dispatched(SyncState),
    /// Confidence below threshold: shown to the user, not dispatched
    PredictionRecorded(LastPrediction),
    Dropped(IngestError),
}

pub struct IngestService {
    config: ConnectionConfig,
    codec: PayloadCodec,
    aggregators: HashMap<DeviceRole, StrokeAggregator>,
    store: SyncStore,
    session: LocalSession,
    stats: IngestStats,
    event_sender: mpsc::UnboundedSender<AppEvent>,
}

impl IngestService {
    pub fn new(
        config: ConnectionConfig,
        store: SyncStore,
        session: LocalSession,
        event_sender: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        let aggregators = DeviceRole::all()
            .iter()
            .map(|role| (*role, StrokeAggregator::new(*role)))
            .collect();

        Self {
            codec: config.codec(),
            config,
            aggregators,
            store,
            session,
            stats: IngestStats::default(),
            event_sender,
        }
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    pub fn store(&self) -> &SyncStore {
        &self.store
    }

    pub fn session(&self) -> &LocalSession {
        &self.session
    }

    pub fn aggregator(&self, role: DeviceRole) -> Option<&StrokeAggregator> {
        self.aggregators.get(&role)
    }

    /// Process events one at a time until the channel closes
    pub async fn run(&mut self, mut events: mpsc::UnboundedReceiver<BleEvent>) {
        info!("ingest service started");
        while let Some(event) = events.recv().await {
            self.handle_event(event);
        }
        info!(stats = ?self.stats, "ingest service stopped");
    }

    /// Handle one event. Never fails: errors come back as
    /// [`IngestOutcome::Dropped`] after being counted.
    pub fn handle_event(&mut self, event: BleEvent) -> IngestOutcome {
        match self.try_handle(event) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.stats.record(&e);
                match &e {
                    IngestError::DispatchNoop { .. } => info!("{}", e),
                    _ => warn!("dropped notification: {}", e),
                }
                IngestOutcome::Dropped(e)
            }
        }
    }

    fn try_handle(&mut self, event: BleEvent) -> Result<IngestOutcome, IngestError> {
        match event {
            BleEvent::Connected { role, name } => Ok(self.handle_connected(role, name)),
            BleEvent::Notification { uuid, data } => {
                let (role, kind) = self
                    .config
                    .resolve(&uuid)
                    .ok_or(IngestError::UnknownCharacteristic { uuid })?;
                match kind {
                    CharacteristicKind::Stroke => self.handle_stroke(role, &data),
                    CharacteristicKind::Prediction => self.handle_prediction(role, &data),
                }
            }
            BleEvent::Disconnected { role } => {
                self.tear_down(role, ConnectionStatus::Disconnected);
                self.send_log(format!("{} device disconnected", role), MessageSeverity::Info);
                Ok(IngestOutcome::Disconnected(role))
            }
            BleEvent::TransportError { role, message } => {
                warn!(%role, "transport error: {}", message);
                self.tear_down(role, ConnectionStatus::Error);
                self.send_log(
                    format!("{} device lost: {}", role, message),
                    MessageSeverity::Error,
                );
                Ok(IngestOutcome::Disconnected(role))
            }
        }
    }

    fn handle_connected(&mut self, role: DeviceRole, name: Option<String>) -> IngestOutcome {
        if let Some(aggregator) = self.aggregators.get_mut(&role) {
            aggregator.reset();
        }
        let uuids = self.config.uuids_for(role).clone();
        self.session.mark_connected(role, name, uuids);

        let _ = self
            .event_sender
            .send(AppEvent::ConnectionStatus(role, ConnectionStatus::Connected));
        self.send_log(format!("{} device connected", role), MessageSeverity::Success);
        IngestOutcome::Connected(role)
    }

    fn handle_stroke(&mut self, role: DeviceRole, data: &[u8]) -> Result<IngestOutcome, IngestError> {
        let segment = self
            .codec
            .decode_stroke_segment(data, &self.config.protocol.stroke_structures)?;

        let aggregator = self
            .aggregators
            .entry(role)
            .or_insert_with(|| StrokeAggregator::new(role));

        match aggregator.process(segment)? {
            StrokeProgress::Started => Ok(IngestOutcome::StrokeStarted(role)),
            StrokeProgress::Extended => Ok(IngestOutcome::StrokeExtended(role)),
            StrokeProgress::Completed(stroke) => {
                self.stats.strokes_completed += 1;
                if !stroke.is_consistent() {
                    self.stats.length_mismatches += 1;
                    warn!(
                        %role,
                        declared = stroke.declared_length(),
                        received = stroke.len(),
                        "stroke point count does not match declared lengths"
                    );
                }
                let _ = self
                    .event_sender
                    .send(AppEvent::StrokeCompleted(stroke.clone()));
                Ok(IngestOutcome::StrokeCompleted(stroke))
            }
        }
    }

    fn handle_prediction(
        &mut self,
        role: DeviceRole,
        data: &[u8],
    ) -> Result<IngestOutcome, IngestError> {
        let prediction = self.codec.decode_prediction(
            data,
            &self.config.protocol.prediction_structures,
            self.config.protocol.score_divisor,
        )?;

        let label = label_for(role, prediction.label_index).ok_or(IngestError::UnknownLabel {
            role,
            index: prediction.label_index,
        })?;

        self.session.record_prediction(Some(label), prediction.score);
        let last = self.session.last_prediction();
        let _ = self.event_sender.send(AppEvent::Prediction(last));

        let threshold = self.session.recognition_threshold();
        match interpreter::interpret(role, &prediction, threshold) {
            Ok(action) => {
                let state = self.store.apply(&action)?;
                self.stats.actions_dispatched += 1;
                Ok(IngestOutcome::Dispatched(state))
            }
            Err(e @ IngestError::LowConfidence { .. }) => {
                self.stats.record(&e);
                debug!(%role, %label, "{}", e);
                Ok(IngestOutcome::PredictionRecorded(last))
            }
            Err(e) => Err(e),
        }
    }

    /// Cancel everything in flight for `role`
    fn tear_down(&mut self, role: DeviceRole, status: ConnectionStatus) {
        if let Some(aggregator) = self.aggregators.get_mut(&role) {
            aggregator.reset();
        }
        self.session.mark_disconnected(role);
        let _ = self
            .event_sender
            .send(AppEvent::ConnectionStatus(role, status));
    }

    fn send_log(&self, message: String, severity: MessageSeverity) {
        let _ = self
            .event_sender
            .send(AppEvent::LogMessage(StatusMessage { message, severity }));
    }
}
