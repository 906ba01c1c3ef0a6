//! orchestra_conductor: gesture ingestion daemon
//!
//! Reads BLE events and UI commands as JSON lines on stdin, feeds them
//! through the ingest service and writes every new version of the shared
//! document to stdout as one JSON line.
//!
//! Usage: `orchestra_conductor [settings.json]`

use anyhow::{Context, Result};
use orchestra_conductor::domain::models::{AppEvent, MessageSeverity, SyncState};
use orchestra_conductor::domain::session::LocalSession;
use orchestra_conductor::domain::settings::SettingsService;
use orchestra_conductor::domain::store::SyncStore;
use orchestra_conductor::infrastructure::bluetooth::connection::ConnectionConfig;
use orchestra_conductor::infrastructure::bluetooth::{BleEvent, IngestService};
use orchestra_conductor::infrastructure::feed::{self, FeedLine, UiCommand};
use orchestra_conductor::infrastructure::logging;
use orchestra_conductor::infrastructure::storage::FileStorage;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let mut settings_service = match std::env::args_os().nth(1) {
        Some(path) => SettingsService::from_path(PathBuf::from(path)),
        None => SettingsService::new()?,
    };
    let settings = settings_service.get().clone();

    let storage_dir = settings.resolve_storage_dir()?;
    let _log_guard = logging::init_logger(&settings.log_settings, &storage_dir)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        settings = %settings_service.path().display(),
        "orchestra_conductor starting"
    );

    let storage = FileStorage::new(&storage_dir)
        .with_context(|| format!("Failed to open storage at {}", storage_dir.display()))?;
    let store = SyncStore::open(
        Arc::new(storage),
        settings.state_key.clone(),
        settings.dispatch,
    )?;
    let session = LocalSession::new(settings.recognition_threshold);

    // Ingest service -> observers
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<AppEvent>();
    // stdin -> ingest service
    let (ble_tx, ble_rx) = mpsc::unbounded_channel::<BleEvent>();

    let mut service = IngestService::new(
        ConnectionConfig::from_settings(&settings),
        store.clone(),
        session.clone(),
        event_tx,
    );

    // Render every document version
    let mut changes = store.subscribe();
    print_state(&store.snapshot());
    tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(state) => print_state(&state),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "state subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                AppEvent::StrokeCompleted(stroke) => {
                    info!(role = %stroke.role(), points = stroke.len(), "stroke received");
                }
                AppEvent::Prediction(prediction) => {
                    debug!(
                        label = ?prediction.label.map(|l| l.as_str()),
                        score = prediction.score,
                        "prediction"
                    );
                }
                AppEvent::ConnectionStatus(role, status) => {
                    info!(%role, ?status, "connection status changed");
                }
                AppEvent::LogMessage(message) => match message.severity {
                    MessageSeverity::Error => error!("{}", message.message),
                    MessageSeverity::Warning => warn!("{}", message.message),
                    _ => info!("{}", message.message),
                },
            }
        }
    });

    // Converge with other clients sharing the storage
    let reconcile_store = store.clone();
    let sync_interval = Duration::from_millis(settings.sync_interval_ms.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sync_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = reconcile_store.reconcile() {
                warn!("reconcile failed: {:#}", e);
            }
        }
    });

    let feed_store = store.clone();
    let feed_session = session.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    error!("failed to read stdin: {}", e);
                    break;
                }
            };
            match feed::parse_line(&line) {
                Ok(Some(FeedLine::Ble(event))) => {
                    if ble_tx.send(event).is_err() {
                        break;
                    }
                }
                Ok(Some(FeedLine::Ui(command))) => {
                    if let Err(e) = feed::apply_ui_command(&command, &feed_store, &feed_session) {
                        info!("{}", e);
                    }
                    if let UiCommand::SetThreshold { value } = command {
                        if let Err(e) = settings_service.update_recognition_threshold(value) {
                            warn!("failed to save settings: {:#}", e);
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("{:#}", e),
            }
        }
        debug!("stdin closed");
    });

    info!("ready, reading events from stdin");

    tokio::select! {
        _ = service.run(ble_rx) => {
            info!("event feed closed");
        }
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("failed to listen for ctrl-c: {}", e);
            }
            info!("shutdown signal received");
        }
    }

    let stats = service.stats();
    info!(
        strokes = stats.strokes_completed,
        actions = stats.actions_dispatched,
        errors = stats.errors(),
        "orchestra_conductor stopped"
    );
    debug!(?stats, "final ingest counters");

    Ok(())
}

fn print_state(state: &SyncState) {
    match serde_json::to_string(state) {
        Ok(json) => println!("{}", json),
        Err(e) => error!("failed to serialize state: {}", e),
    }
}
