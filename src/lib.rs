//! ConnectSphere Calls - Anruf-Sessions für die Activity-App
//!
//! Verwaltet Audio- und Videoanrufe zwischen Teilnehmern einer Aktivität:
//! - Höchstens ein aktiver Anruf pro Client
//! - Anrufverlauf mit SQLite-Persistenz
//! - Mute/Video-Toggles des lokalen Teilnehmers
//! - Signaling-Nachrichten für den Anrufaufbau

pub mod call_engine;
pub mod config;
pub mod database;
pub mod signaling;

use anyhow::Context;
use call_engine::{
    format_call_duration, format_call_time, status_label, ActiveCallSession, CallEvent,
    CallHistoryLog, CallMedium, CallRecord, CallStatus, CallTracker, MediaDevices, MediaStream,
};
use chrono::{DateTime, Utc};
use config::CallConfig;
use database::CallLogDatabase;
use serde::Serialize;
use signaling::{InboundSignal, OutboundSignal};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

// ============================================================================
// APPLICATION STATE
// ============================================================================

/// Application State
///
/// Wird beim App-Start erstellt und beim Beenden per `shutdown()`
/// abgebaut. UI-Schichten lesen und rufen Kommandos auf, verändern den
/// Zustand aber nie direkt.
pub struct CallApp {
    config: CallConfig,
    tracker: CallTracker,
    database: Option<Arc<CallLogDatabase>>,
    signal_tx: mpsc::Sender<OutboundSignal>,
}

/// Verlaufseintrag mit fertigen Anzeige-Strings
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallHistoryEntry {
    #[serde(flatten)]
    pub record: CallRecord,
    pub label: String,
    pub time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_text: Option<String>,
}

impl CallHistoryEntry {
    pub fn new(record: CallRecord, now: DateTime<Utc>) -> Self {
        Self {
            label: status_label(&record),
            time: format_call_time(record.started_at, now),
            duration_text: record.duration.map(|d| format_call_duration(d as i64)),
            record,
        }
    }
}

impl CallApp {
    /// Initialisiert Logging, Datenbank und Tracker
    ///
    /// Der zurückgegebene Receiver liefert alle ausgehenden Signale für
    /// den Transport.
    pub fn init(
        config: CallConfig,
        devices: Arc<dyn MediaDevices>,
    ) -> anyhow::Result<(Arc<Self>, mpsc::Receiver<OutboundSignal>)> {
        init_logging(&config);

        tracing::info!("Initializing calls for '{}'...", config.local_user_id);

        let database = if config.persist_history {
            let path = match &config.database_path {
                Some(path) => path.clone(),
                None => CallLogDatabase::default_path()
                    .context("Failed to resolve call log location")?,
            };
            let database = CallLogDatabase::open(&path)
                .with_context(|| format!("Failed to open call log at {:?}", path))?;
            Some(Arc::new(database))
        } else {
            tracing::info!("Call history persistence disabled");
            None
        };

        Self::new(config, devices, database)
    }

    /// Erstellt den State ohne Logging-Setup
    ///
    /// Offene Einträge eines früheren Laufs werden vor dem Laden des
    /// Verlaufs als `failed` (`interrupted`) abgeschlossen.
    pub fn new(
        config: CallConfig,
        devices: Arc<dyn MediaDevices>,
        database: Option<Arc<CallLogDatabase>>,
    ) -> anyhow::Result<(Arc<Self>, mpsc::Receiver<OutboundSignal>)> {
        let history = match &database {
            Some(db) => {
                let closed = db
                    .close_interrupted(Utc::now())
                    .context("Failed to close interrupted calls")?;
                if closed > 0 {
                    tracing::info!("Closed {} interrupted call(s) from previous run", closed);
                }

                let records = db
                    .load_recent(config.history_limit)
                    .context("Failed to load call history")?;
                tracing::info!("Loaded {} call(s) from history", records.len());
                CallHistoryLog::from_newest_first(records)
            }
            None => CallHistoryLog::new(),
        };

        let mut tracker = CallTracker::new(config.local_user_id.clone(), devices)
            .with_ring_timeout(config.ring_timeout())
            .with_history(history);
        if let Some(db) = &database {
            tracker = tracker.with_store(db.clone());
        }

        let (signal_tx, signal_rx) = mpsc::channel(100);

        let app = Arc::new(Self {
            config,
            tracker,
            database,
            signal_tx,
        });
        Ok((app, signal_rx))
    }

    pub fn config(&self) -> &CallConfig {
        &self.config
    }

    pub fn tracker(&self) -> &CallTracker {
        &self.tracker
    }

    pub fn database(&self) -> Option<&Arc<CallLogDatabase>> {
        self.database.as_ref()
    }

    /// Gibt einen Event-Receiver zurück
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.tracker.subscribe()
    }

    // ========================================================================
    // COMMANDS - CALLS
    // ========================================================================

    /// Startet einen ausgehenden Anruf in einer Unterhaltung/Aktivität
    ///
    /// Ein fehlgeschlagener Anruf (z.B. keine Mikrofon-Berechtigung) wird
    /// als `Ok` mit Status `failed` zurückgegeben.
    pub async fn start_call(
        &self,
        conversation_id: String,
        medium: CallMedium,
    ) -> Result<CallRecord, String> {
        tracing::info!("Starting {} call in {}", medium.as_str(), conversation_id);

        let record = self
            .tracker
            .start_call(&conversation_id, medium)
            .await
            .map_err(|e| e.to_string())?;

        if record.status == CallStatus::Connecting {
            self.send_signal(OutboundSignal::Invite {
                call_id: record.id.clone(),
                conversation_id: record.conversation_id.clone(),
                from_user_id: self.config.local_user_id.clone(),
                medium,
            });
        }

        Ok(record)
    }

    /// Nimmt den eingehenden Anruf an
    pub async fn accept_call(&self) -> Result<CallRecord, String> {
        let record = self
            .tracker
            .accept_incoming()
            .await
            .map_err(|e| e.to_string())?;

        if record.status == CallStatus::Active {
            self.send_signal(OutboundSignal::Accept {
                call_id: record.id.clone(),
                from_user_id: self.config.local_user_id.clone(),
            });
        }

        Ok(record)
    }

    /// Lehnt den eingehenden Anruf ab
    pub fn reject_call(&self, reason: Option<String>) -> Result<CallRecord, String> {
        let record = self.tracker.reject_incoming().map_err(|e| e.to_string())?;

        self.send_signal(OutboundSignal::Reject {
            call_id: record.id.clone(),
            from_user_id: self.config.local_user_id.clone(),
            reason,
        });

        Ok(record)
    }

    /// Beendet den aktuellen Anruf
    pub fn hangup(&self) -> Result<CallRecord, String> {
        let record = self.tracker.end_call().map_err(|e| e.to_string())?;

        self.send_signal(OutboundSignal::Hangup {
            call_id: record.id.clone(),
            from_user_id: self.config.local_user_id.clone(),
        });

        Ok(record)
    }

    pub fn toggle_mute(&self) -> Result<bool, String> {
        self.tracker.toggle_mute().map_err(|e| e.to_string())
    }

    pub fn toggle_video(&self) -> Result<bool, String> {
        self.tracker.toggle_video().map_err(|e| e.to_string())
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    pub fn active_call(&self) -> Option<ActiveCallSession> {
        self.tracker.active_session()
    }

    /// Verlauf mit Anzeige-Strings, neueste zuerst
    pub fn call_history(&self) -> Vec<CallHistoryEntry> {
        let now = Utc::now();
        self.tracker
            .history()
            .into_iter()
            .map(|record| CallHistoryEntry::new(record, now))
            .collect()
    }

    pub fn is_muted(&self) -> bool {
        self.tracker.is_muted()
    }

    pub fn is_video_enabled(&self) -> bool {
        self.tracker.is_video_enabled()
    }

    // ========================================================================
    // SIGNALS & MEDIA
    // ========================================================================

    /// Parst ein Signal aus dem Realtime-Kanal und verarbeitet es
    pub fn handle_signal_json(&self, text: &str) -> Result<(), String> {
        let signal = InboundSignal::parse(text).map_err(|e| {
            tracing::warn!("Ignoring signal: {}", e);
            e.to_string()
        })?;
        self.handle_signal(signal);
        Ok(())
    }

    /// Verarbeitet ein eingehendes Signal
    pub fn handle_signal(&self, signal: InboundSignal) {
        tracing::debug!("Signal for call {}", signal.call_id());

        let result = match &signal {
            InboundSignal::IncomingCall { .. } => {
                let Some(incoming) = signal.as_incoming() else {
                    return;
                };
                match self.tracker.register_incoming(incoming) {
                    Ok(_) => Ok(()),
                    Err(call_engine::CallError::AlreadyInCall(_)) => {
                        self.send_signal(OutboundSignal::Reject {
                            call_id: signal.call_id().to_string(),
                            from_user_id: self.config.local_user_id.clone(),
                            reason: Some("busy".to_string()),
                        });
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            InboundSignal::Ringing { call_id } => self.tracker.remote_ringing(call_id).map(|_| ()),
            InboundSignal::Accepted {
                call_id,
                by_user_id,
            } => self
                .tracker
                .remote_accepted(call_id, by_user_id)
                .map(|_| ()),
            InboundSignal::Rejected { call_id, reason } => {
                tracing::info!("Call {} rejected (reason: {:?})", call_id, reason);
                self.tracker.remote_rejected(call_id).map(|_| ())
            }
            InboundSignal::Hangup { call_id } => self.tracker.remote_hangup(call_id).map(|_| ()),
            InboundSignal::ParticipantJoined {
                call_id,
                participant_id,
            } => {
                self.tracker.participant_joined(call_id, participant_id);
                Ok(())
            }
            InboundSignal::ParticipantLeft {
                call_id,
                participant_id,
            } => {
                self.tracker.participant_left(call_id, participant_id);
                Ok(())
            }
            InboundSignal::ParticipantState {
                call_id,
                participant_id,
                muted,
                video_enabled,
            } => {
                self.tracker
                    .participant_updated(call_id, participant_id, *muted, *video_enabled);
                Ok(())
            }
            InboundSignal::ConnectionFailed { call_id, reason } => self
                .tracker
                .connection_failed(call_id, reason)
                .map(|_| ()),
        };

        if let Err(e) = result {
            tracing::warn!("Failed to apply signal for {}: {}", signal.call_id(), e);
        }
    }

    /// Übernimmt den Stream eines entfernten Teilnehmers
    pub fn attach_remote_stream(
        &self,
        call_id: &str,
        participant_id: &str,
        stream: MediaStream,
    ) -> bool {
        self.tracker
            .attach_remote_stream(call_id, participant_id, stream)
    }

    /// Beendet einen laufenden Anruf beim Herunterfahren der App
    pub fn shutdown(&self) {
        if let Some(record) = self.tracker.shutdown() {
            self.send_signal(OutboundSignal::Hangup {
                call_id: record.id,
                from_user_id: self.config.local_user_id.clone(),
            });
        }
        tracing::info!("Call tracker shut down");
    }

    fn send_signal(&self, signal: OutboundSignal) {
        if let Err(e) = self.signal_tx.try_send(signal) {
            tracing::error!("Failed to queue outbound signal: {}", e);
        }
    }
}

impl std::fmt::Debug for CallApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallApp")
            .field("config", &self.config)
            .field("tracker", &self.tracker)
            .field("persistent", &self.database.is_some())
            .finish()
    }
}

/// Installiert den tracing-Subscriber (mehrfacher Aufruf ist harmlos)
fn init_logging(config: &CallConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_filter));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

// ============================================================================
// TESTS
// ============================================================================
