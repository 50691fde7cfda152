//! Call Session Tracker
//!
//! Verwaltet die eine aktive Anruf-Session des Clients, den Anrufverlauf
//! und die lokalen Mute/Video-Toggles.
//!
//! Asynchrone Ergebnisse (Medienanforderung, Timer) merken sich die
//! Generation der Session, für die sie gestartet wurden. Passt sie beim
//! Eintreffen nicht mehr, wird das Ergebnis still verworfen.

use super::clock::{Clock, SystemClock};
use super::history::CallHistoryLog;
use super::media::{MediaConstraints, MediaDevices, MediaStream};
use super::session::{ActiveCallSession, ConnectionState};
use super::types::{CallDirection, CallMedium, CallRecord, CallStatus, EndReason, IncomingCall};
use crate::database::CallLogStore;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

/// Standard-Klingeldauer bis ein Anruf als unbeantwortet gilt
pub const DEFAULT_RING_TIMEOUT: Duration = Duration::from_secs(45);

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("Call target must not be empty")]
    InvalidTarget,

    #[error("Already in a call ({0})")]
    AlreadyInCall(String),

    #[error("No active call")]
    NoActiveCall,

    #[error("Operation not allowed while call is {0}")]
    InvalidState(CallStatus),

    #[error("Invalid call transition: {from} -> {to}")]
    InvalidTransition { from: CallStatus, to: CallStatus },

    #[error("Media acquisition already in progress")]
    AcquisitionPending,
}

// ============================================================================
// EVENTS
// ============================================================================

/// Events die vom CallTracker ausgelöst werden
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// Neuer oder geänderter Eintrag (inkl. Endzustand)
    StateChanged(CallRecord),
    /// Die aktive Session wurde verworfen
    SessionCleared { call_id: String },
    MuteChanged(bool),
    VideoChanged(bool),
    ParticipantChanged {
        call_id: String,
        participant_id: String,
    },
    /// Nicht-fataler Fehler für die Anzeige
    Error {
        call_id: Option<String>,
        message: String,
    },
}

// ============================================================================
// TRACKER
// ============================================================================

#[derive(Debug, Default)]
struct TrackerState {
    session: Option<ActiveCallSession>,
    history: CallHistoryLog,
    /// Wird bei jedem Anlegen und Verwerfen einer Session erhöht
    generation: u64,
}

impl TrackerState {
    fn is_generation(&self, generation: u64) -> bool {
        self.generation == generation && self.session.is_some()
    }

    fn is_current(&self, call_id: &str) -> bool {
        self.session
            .as_ref()
            .map(|s| s.call_id() == call_id)
            .unwrap_or(false)
    }
}

/// Verwaltet die aktive Session und den Verlauf
///
/// Klone teilen sich denselben Zustand.
#[derive(Clone)]
pub struct CallTracker {
    local_user_id: String,
    state: Arc<Mutex<TrackerState>>,
    devices: Arc<dyn MediaDevices>,
    store: Option<Arc<dyn CallLogStore>>,
    clock: Arc<dyn Clock>,
    event_tx: broadcast::Sender<CallEvent>,
    ring_timeout: Duration,
}

impl CallTracker {
    /// Erstellt einen neuen Tracker mit leerem Verlauf
    pub fn new(local_user_id: impl Into<String>, devices: Arc<dyn MediaDevices>) -> Self {
        let (event_tx, _) = broadcast::channel(100);

        Self {
            local_user_id: local_user_id.into(),
            state: Arc::new(Mutex::new(TrackerState::default())),
            devices,
            store: None,
            clock: Arc::new(SystemClock),
            event_tx,
            ring_timeout: DEFAULT_RING_TIMEOUT,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn CallLogStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_ring_timeout(mut self, ring_timeout: Duration) -> Self {
        self.ring_timeout = ring_timeout;
        self
    }

    /// Übernimmt einen geladenen Verlauf
    pub fn with_history(self, history: CallHistoryLog) -> Self {
        self.state.lock().history = history;
        self
    }

    pub fn local_user_id(&self) -> &str {
        &self.local_user_id
    }

    /// Gibt einen Event-Receiver zurück
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.event_tx.subscribe()
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    /// Schnappschuss der aktiven Session
    pub fn active_session(&self) -> Option<ActiveCallSession> {
        self.state.lock().session.clone()
    }

    pub fn has_active_call(&self) -> bool {
        self.state.lock().session.is_some()
    }

    /// Verlauf, neueste zuerst
    pub fn history(&self) -> Vec<CallRecord> {
        self.state.lock().history.to_vec()
    }

    pub fn history_len(&self) -> usize {
        self.state.lock().history.len()
    }

    pub fn record(&self, call_id: &str) -> Option<CallRecord> {
        self.state.lock().history.get(call_id).cloned()
    }

    pub fn is_muted(&self) -> bool {
        self.state
            .lock()
            .session
            .as_ref()
            .map(|s| s.is_muted())
            .unwrap_or(false)
    }

    pub fn is_video_enabled(&self) -> bool {
        self.state
            .lock()
            .session
            .as_ref()
            .map(|s| s.is_video_enabled())
            .unwrap_or(false)
    }

    // ========================================================================
    // COMMANDS
    // ========================================================================

    /// Startet einen ausgehenden Anruf
    ///
    /// Fehler beim Anfordern der lokalen Medien beenden den Anruf mit
    /// `failed`; der fehlgeschlagene Eintrag wird trotzdem als `Ok`
    /// zurückgegeben und zusätzlich als `CallEvent::Error` gemeldet.
    pub async fn start_call(
        &self,
        target_id: &str,
        medium: CallMedium,
    ) -> Result<CallRecord, CallError> {
        let target_id = target_id.trim();
        if target_id.is_empty() {
            return Err(CallError::InvalidTarget);
        }

        let (call_id, generation) = {
            let mut state = self.state.lock();
            if let Some(session) = &state.session {
                return Err(CallError::AlreadyInCall(session.call_id().to_string()));
            }

            let record = CallRecord::outgoing(
                target_id.to_string(),
                medium,
                self.local_user_id.clone(),
                self.clock.now(),
            );
            state.generation += 1;
            let generation = state.generation;

            let mut session = ActiveCallSession::new(record.clone(), generation);
            session.acquiring = true;
            state.history.push(record.clone());
            state.session = Some(session);

            tracing::info!(
                "Starting {} call {} in {}",
                medium.as_str(),
                record.id,
                target_id
            );
            self.persist(&record);
            let _ = self.event_tx.send(CallEvent::StateChanged(record.clone()));

            (record.id, generation)
        };

        let result = self
            .devices
            .acquire(MediaConstraints::for_medium(medium))
            .await;

        let record = {
            let mut state = self.state.lock();
            if !state.is_generation(generation) {
                if let Ok(stream) = &result {
                    stream.stop();
                }
                tracing::debug!("Discarding late media result for call {}", call_id);
                return state
                    .history
                    .get(&call_id)
                    .cloned()
                    .ok_or(CallError::NoActiveCall);
            }

            match result {
                Ok(stream) => self.apply_local_stream(&mut state, stream, CallStatus::Connecting)?,
                Err(e) => {
                    tracing::error!("Failed to acquire local media for {}: {}", call_id, e);
                    let record =
                        self.teardown(&mut state, CallStatus::Failed, EndReason::MediaUnavailable)?;
                    let _ = self.event_tx.send(CallEvent::Error {
                        call_id: Some(record.id.clone()),
                        message: e.to_string(),
                    });
                    return Ok(record);
                }
            }
        };

        self.arm_ring_timer(generation);
        Ok(record)
    }

    /// Registriert einen eingehenden Anruf
    ///
    /// Ist bereits ein Anruf aktiv, wird der neue Anruf direkt als
    /// verpasst (`busy`) im Verlauf vermerkt.
    pub fn register_incoming(&self, call: IncomingCall) -> Result<CallRecord, CallError> {
        if call.call_id.trim().is_empty() || call.from_user_id.trim().is_empty() {
            return Err(CallError::InvalidTarget);
        }

        let (record, generation) = {
            let mut state = self.state.lock();
            let now = self.clock.now();

            let active = state
                .session
                .as_ref()
                .map(|s| (s.call_id().to_string(), s.record().clone()));
            if let Some((active_id, active_record)) = &active {
                if *active_id == call.call_id {
                    return Ok(active_record.clone());
                }
            }

            if let Some(existing) = state.history.get(&call.call_id) {
                return Err(CallError::InvalidState(existing.status));
            }
            // Ältere Einträge liegen evtl. nur noch in der Datenbank
            if let Some(existing) = self.stored_record(&call.call_id) {
                tracing::info!(
                    "Ignoring replayed call {} ({})",
                    call.call_id,
                    existing.status
                );
                return Err(CallError::InvalidState(existing.status));
            }

            if let Some((active_id, _)) = active {
                let mut missed = CallRecord::incoming(&call, self.local_user_id.clone(), now);
                missed.finish(CallStatus::Missed, EndReason::Busy, now);
                state.history.push(missed.clone());

                tracing::info!(
                    "Incoming call {} from {} while busy with {}",
                    call.call_id,
                    call.from_user_id,
                    active_id
                );
                self.persist(&missed);
                let _ = self.event_tx.send(CallEvent::StateChanged(missed));
                return Err(CallError::AlreadyInCall(active_id));
            }

            let record = CallRecord::incoming(&call, self.local_user_id.clone(), now);
            state.generation += 1;
            let generation = state.generation;

            let mut session = ActiveCallSession::new(record.clone(), generation);
            session.join_participant(&call.from_user_id);
            state.history.push(record.clone());
            state.session = Some(session);

            tracing::info!(
                "Incoming {} call {} from {}",
                call.medium.as_str(),
                call.call_id,
                call.from_user_id
            );
            self.persist(&record);
            let _ = self.event_tx.send(CallEvent::StateChanged(record.clone()));

            (record, generation)
        };

        self.arm_ring_timer(generation);
        Ok(record)
    }

    /// Nimmt den klingelnden eingehenden Anruf an
    pub async fn accept_incoming(&self) -> Result<CallRecord, CallError> {
        let (call_id, generation, medium) = {
            let mut state = self.state.lock();
            let session = state.session.as_mut().ok_or(CallError::NoActiveCall)?;
            let record = session.record();
            if record.direction != CallDirection::Incoming || record.status != CallStatus::Ringing
            {
                return Err(CallError::InvalidState(record.status));
            }
            if session.acquiring {
                return Err(CallError::AcquisitionPending);
            }
            session.acquiring = true;
            tracing::info!("Accepting call {}", session.call_id());
            (
                session.call_id().to_string(),
                session.generation(),
                session.record().medium,
            )
        };

        let result = self
            .devices
            .acquire(MediaConstraints::for_medium(medium))
            .await;

        let mut state = self.state.lock();
        if !state.is_generation(generation) {
            if let Ok(stream) = &result {
                stream.stop();
            }
            tracing::debug!("Discarding late media result for call {}", call_id);
            return state
                .history
                .get(&call_id)
                .cloned()
                .ok_or(CallError::NoActiveCall);
        }

        match result {
            Ok(stream) => {
                let record = self.apply_local_stream(&mut state, stream, CallStatus::Active)?;
                if let Some(session) = state.session.as_mut() {
                    if let Some(caller) = session.participant_mut(&record.initiator) {
                        caller.connection = ConnectionState::Connected;
                    }
                }
                Ok(record)
            }
            Err(e) => {
                tracing::error!("Failed to acquire local media for {}: {}", call_id, e);
                let record =
                    self.teardown(&mut state, CallStatus::Failed, EndReason::MediaUnavailable)?;
                let _ = self.event_tx.send(CallEvent::Error {
                    call_id: Some(record.id.clone()),
                    message: e.to_string(),
                });
                Ok(record)
            }
        }
    }

    /// Lehnt den klingelnden eingehenden Anruf ab
    pub fn reject_incoming(&self) -> Result<CallRecord, CallError> {
        let mut state = self.state.lock();
        let record = state
            .session
            .as_ref()
            .map(|s| s.record().clone())
            .ok_or(CallError::NoActiveCall)?;

        if record.direction != CallDirection::Incoming || record.status == CallStatus::Active {
            return Err(CallError::InvalidState(record.status));
        }

        tracing::info!("Rejecting call {}", record.id);
        self.teardown(&mut state, CallStatus::Rejected, EndReason::Declined)
    }

    /// Beendet den aktuellen Anruf
    ///
    /// - `active` → `ended` mit Dauer
    /// - eingehend, nie angenommen → `missed`
    /// - ausgehend, nie angenommen → `failed` (`no_answer`)
    pub fn end_call(&self) -> Result<CallRecord, CallError> {
        let mut state = self.state.lock();
        let (status, direction) = state
            .session
            .as_ref()
            .map(|s| (s.record().status, s.record().direction))
            .ok_or(CallError::NoActiveCall)?;

        let (outcome, reason) = match (status, direction) {
            (CallStatus::Active, _) => (CallStatus::Ended, EndReason::Completed),
            (_, CallDirection::Incoming) => (CallStatus::Missed, EndReason::NoAnswer),
            (_, CallDirection::Outgoing) => (CallStatus::Failed, EndReason::NoAnswer),
        };

        tracing::info!("Hanging up ({} -> {})", status, outcome);
        self.teardown(&mut state, outcome, reason)
    }

    /// Schaltet das lokale Mikrofon stumm bzw. wieder ein
    pub fn toggle_mute(&self) -> Result<bool, CallError> {
        let muted = {
            let mut state = self.state.lock();
            let session = state.session.as_mut().ok_or(CallError::NoActiveCall)?;
            session.toggle_mute()
        };

        tracing::debug!("Local audio muted: {}", muted);
        let _ = self.event_tx.send(CallEvent::MuteChanged(muted));
        Ok(muted)
    }

    /// Schaltet die lokale Kamera an bzw. aus
    pub fn toggle_video(&self) -> Result<bool, CallError> {
        let enabled = {
            let mut state = self.state.lock();
            let session = state.session.as_mut().ok_or(CallError::NoActiveCall)?;
            session.toggle_video()
        };

        tracing::debug!("Local video enabled: {}", enabled);
        let _ = self.event_tx.send(CallEvent::VideoChanged(enabled));
        Ok(enabled)
    }

    /// Beendet einen eventuell noch laufenden Anruf beim Herunterfahren
    ///
    /// Gibt den abgeschlossenen Eintrag zurück, falls ein Anruf lief.
    pub fn shutdown(&self) -> Option<CallRecord> {
        match self.end_call() {
            Ok(record) => {
                tracing::info!("Closed call {} on shutdown", record.id);
                Some(record)
            }
            Err(CallError::NoActiveCall) => None,
            Err(e) => {
                tracing::warn!("Failed to close call on shutdown: {}", e);
                None
            }
        }
    }

    // ========================================================================
    // REMOTE SIGNALS
    // ========================================================================
    //
    // Signale für einen Anruf, der nicht die aktuelle Session ist, werden
    // ignoriert (`Ok(None)` bzw. `false`).

    /// Gegenseite klingelt (nur ausgehend)
    pub fn remote_ringing(&self, call_id: &str) -> Result<Option<CallRecord>, CallError> {
        let mut state = self.state.lock();
        if !state.is_current(call_id) {
            return Ok(None);
        }
        Self::require_direction(&state, CallDirection::Outgoing)?;
        self.apply_status(&mut state, CallStatus::Ringing).map(Some)
    }

    /// Gegenseite hat angenommen (nur ausgehend)
    pub fn remote_accepted(
        &self,
        call_id: &str,
        participant_id: &str,
    ) -> Result<Option<CallRecord>, CallError> {
        let mut state = self.state.lock();
        if !state.is_current(call_id) {
            return Ok(None);
        }
        Self::require_direction(&state, CallDirection::Outgoing)?;

        let session = state.session.as_mut().ok_or(CallError::NoActiveCall)?;
        let from = session.record().status;
        if !from.can_transition_to(CallStatus::Active) {
            return Err(CallError::InvalidTransition {
                from,
                to: CallStatus::Active,
            });
        }
        if participant_id != self.local_user_id {
            session.join_participant(participant_id);
            if let Some(participant) = session.participant_mut(participant_id) {
                participant.connection = ConnectionState::Connected;
            }
        }

        self.apply_status(&mut state, CallStatus::Active).map(Some)
    }

    /// Gegenseite hat abgelehnt (nur ausgehend)
    pub fn remote_rejected(&self, call_id: &str) -> Result<Option<CallRecord>, CallError> {
        let mut state = self.state.lock();
        if !state.is_current(call_id) {
            return Ok(None);
        }
        Self::require_direction(&state, CallDirection::Outgoing)?;
        self.teardown(&mut state, CallStatus::Rejected, EndReason::Declined)
            .map(Some)
    }

    /// Gegenseite hat aufgelegt
    pub fn remote_hangup(&self, call_id: &str) -> Result<Option<CallRecord>, CallError> {
        let mut state = self.state.lock();
        if !state.is_current(call_id) {
            return Ok(None);
        }
        let (status, direction) = match state.session.as_ref() {
            Some(s) => (s.record().status, s.record().direction),
            None => return Ok(None),
        };

        let (outcome, reason) = match (status, direction) {
            (CallStatus::Active, _) => (CallStatus::Ended, EndReason::RemoteHangup),
            (_, CallDirection::Incoming) => (CallStatus::Missed, EndReason::RemoteHangup),
            (_, CallDirection::Outgoing) => (CallStatus::Rejected, EndReason::RemoteHangup),
        };

        tracing::info!("Call {} ended by remote ({} -> {})", call_id, status, outcome);
        self.teardown(&mut state, outcome, reason).map(Some)
    }

    /// Verbindungsfehler (Signaling oder Peer-Verbindung)
    pub fn connection_failed(
        &self,
        call_id: &str,
        reason: &str,
    ) -> Result<Option<CallRecord>, CallError> {
        let mut state = self.state.lock();
        if !state.is_current(call_id) {
            return Ok(None);
        }
        let (status, direction) = match state.session.as_ref() {
            Some(s) => (s.record().status, s.record().direction),
            None => return Ok(None),
        };

        let (outcome, end_reason) = match (status, direction) {
            (CallStatus::Active, _) => (CallStatus::Ended, EndReason::ConnectionLost),
            (_, CallDirection::Incoming) => (CallStatus::Missed, EndReason::NetworkError),
            (_, CallDirection::Outgoing) => (CallStatus::Failed, EndReason::NetworkError),
        };

        tracing::warn!("Connection failed for call {}: {}", call_id, reason);
        let record = self.teardown(&mut state, outcome, end_reason)?;
        let _ = self.event_tx.send(CallEvent::Error {
            call_id: Some(record.id.clone()),
            message: reason.to_string(),
        });
        Ok(Some(record))
    }

    /// Weiterer Teilnehmer ist beigetreten
    pub fn participant_joined(&self, call_id: &str, participant_id: &str) -> bool {
        if participant_id == self.local_user_id {
            return false;
        }
        let mut state = self.state.lock();
        if !state.is_current(call_id) {
            return false;
        }
        let Some(session) = state.session.as_mut() else {
            return false;
        };
        if session.join_participant(participant_id) {
            self.sync_record(&mut state);
        }
        drop(state);

        self.emit_participant(call_id, participant_id);
        true
    }

    /// Teilnehmer hat den Anruf verlassen
    pub fn participant_left(&self, call_id: &str, participant_id: &str) -> bool {
        let mut state = self.state.lock();
        if !state.is_current(call_id) {
            return false;
        }
        let Some(session) = state.session.as_mut() else {
            return false;
        };
        let Some(participant) = session.participant_mut(participant_id) else {
            return false;
        };
        participant.connection = ConnectionState::Disconnected;
        session.remove_remote_stream(participant_id);
        drop(state);

        self.emit_participant(call_id, participant_id);
        true
    }

    /// Mute/Video-Status eines entfernten Teilnehmers
    pub fn participant_updated(
        &self,
        call_id: &str,
        participant_id: &str,
        muted: bool,
        video_enabled: bool,
    ) -> bool {
        if participant_id == self.local_user_id {
            return false;
        }
        let mut state = self.state.lock();
        if !state.is_current(call_id) {
            return false;
        }
        let Some(session) = state.session.as_mut() else {
            return false;
        };
        let joined = session.join_participant(participant_id);
        if let Some(participant) = session.participant_mut(participant_id) {
            participant.muted = muted;
            participant.video_enabled = video_enabled;
        }
        if joined {
            self.sync_record(&mut state);
        }
        drop(state);

        self.emit_participant(call_id, participant_id);
        true
    }

    /// Übernimmt den Media-Stream eines entfernten Teilnehmers
    ///
    /// Streams für veraltete Anrufe werden sofort freigegeben.
    pub fn attach_remote_stream(
        &self,
        call_id: &str,
        participant_id: &str,
        stream: MediaStream,
    ) -> bool {
        let mut state = self.state.lock();
        let session = match state.session.as_mut() {
            Some(session) if session.call_id() == call_id => session,
            _ => {
                tracing::debug!("Dropping remote stream for stale call {}", call_id);
                stream.stop();
                return false;
            }
        };

        let joined = session.join_participant(participant_id);
        if let Some(participant) = session.participant_mut(participant_id) {
            participant.connection = ConnectionState::Connected;
        }
        session.set_remote_stream(participant_id, stream);
        if joined {
            self.sync_record(&mut state);
        }
        drop(state);

        self.emit_participant(call_id, participant_id);
        true
    }

    // ========================================================================
    // PRIVATE METHODS
    // ========================================================================

    fn require_direction(state: &TrackerState, expected: CallDirection) -> Result<(), CallError> {
        match state.session.as_ref() {
            Some(session) if session.record().direction == expected => Ok(()),
            Some(session) => Err(CallError::InvalidState(session.record().status)),
            None => Err(CallError::NoActiveCall),
        }
    }

    /// Setzt den lokalen Stream und geht nach `next` weiter, falls der
    /// Anruf nicht schon darüber hinaus ist
    fn apply_local_stream(
        &self,
        state: &mut TrackerState,
        stream: MediaStream,
        next: CallStatus,
    ) -> Result<CallRecord, CallError> {
        let status = {
            let session = state.session.as_mut().ok_or(CallError::NoActiveCall)?;
            session.acquiring = false;
            session.attach_local_stream(stream);
            session.record().status
        };

        if status.can_transition_to(next) {
            self.apply_status(state, next)
        } else {
            state
                .session
                .as_ref()
                .map(|s| s.record().clone())
                .ok_or(CallError::NoActiveCall)
        }
    }

    /// Nicht-terminaler Übergang der aktiven Session
    fn apply_status(
        &self,
        state: &mut TrackerState,
        next: CallStatus,
    ) -> Result<CallRecord, CallError> {
        let session = state.session.as_mut().ok_or(CallError::NoActiveCall)?;
        let from = session.record().status;
        if !from.can_transition_to(next) {
            return Err(CallError::InvalidTransition { from, to: next });
        }

        session.record_mut().status = next;
        let record = session.record().clone();
        state.history.update(&record);

        tracing::info!("Call {} state: {} -> {}", record.id, from, next);
        self.persist(&record);
        let _ = self.event_tx.send(CallEvent::StateChanged(record.clone()));
        Ok(record)
    }

    /// Terminaler Übergang: Eintrag abschließen, Medien freigeben,
    /// Session verwerfen
    fn teardown(
        &self,
        state: &mut TrackerState,
        outcome: CallStatus,
        reason: EndReason,
    ) -> Result<CallRecord, CallError> {
        let Some(mut session) = state.session.take() else {
            return Err(CallError::NoActiveCall);
        };

        let from = session.record().status;
        if !from.can_transition_to(outcome) {
            state.session = Some(session);
            return Err(CallError::InvalidTransition { from, to: outcome });
        }

        session
            .record_mut()
            .finish(outcome, reason, self.clock.now());
        session.release_media();
        state.generation += 1;

        let record = session.record().clone();
        state.history.update(&record);

        tracing::info!(
            "Call {} {} ({}){}",
            record.id,
            outcome,
            reason.as_str(),
            record
                .duration
                .map(|d| format!(" after {}s", d))
                .unwrap_or_default()
        );
        self.persist(&record);
        let _ = self.event_tx.send(CallEvent::StateChanged(record.clone()));
        let _ = self.event_tx.send(CallEvent::SessionCleared {
            call_id: record.id.clone(),
        });
        Ok(record)
    }

    /// Startet den Klingel-Timer für die Session mit `generation`
    fn arm_ring_timer(&self, generation: u64) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("No runtime available, ring timeout disabled");
            return;
        };

        let tracker = self.clone();
        let timeout = self.ring_timeout;
        handle.spawn(async move {
            tokio::time::sleep(timeout).await;
            tracker.on_ring_timeout(generation);
        });
    }

    fn on_ring_timeout(&self, generation: u64) {
        let mut state = self.state.lock();
        if !state.is_generation(generation) {
            return;
        }
        let Some(session) = state.session.as_ref() else {
            return;
        };

        let record = session.record();
        if record.status == CallStatus::Active {
            return;
        }
        // Eingehender Anruf wurde bereits angenommen, Medien kommen noch
        if record.direction == CallDirection::Incoming && session.acquiring {
            return;
        }

        let outcome = match record.direction {
            CallDirection::Incoming => CallStatus::Missed,
            CallDirection::Outgoing => CallStatus::Failed,
        };
        tracing::info!(
            "Call {} not answered within {:?}",
            record.id,
            self.ring_timeout
        );
        if let Err(e) = self.teardown(&mut state, outcome, EndReason::NoAnswer) {
            tracing::warn!("Ring timeout could not close call: {}", e);
        }
    }

    /// Schreibt den Eintrag der aktiven Session in Verlauf und Datenbank
    fn sync_record(&self, state: &mut TrackerState) {
        let Some(record) = state.session.as_ref().map(|s| s.record().clone()) else {
            return;
        };
        state.history.update(&record);
        self.persist(&record);
        let _ = self.event_tx.send(CallEvent::StateChanged(record));
    }

    /// Eintrag aus der Datenbank (Fehler werden nur geloggt)
    fn stored_record(&self, call_id: &str) -> Option<CallRecord> {
        let store = self.store.as_ref()?;
        match store.load(call_id) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("Failed to look up call {}: {}", call_id, e);
                None
            }
        }
    }

    fn emit_participant(&self, call_id: &str, participant_id: &str) {
        let _ = self.event_tx.send(CallEvent::ParticipantChanged {
            call_id: call_id.to_string(),
            participant_id: participant_id.to_string(),
        });
    }

    fn persist(&self, record: &CallRecord) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(record) {
                tracing::warn!("Failed to persist call {}: {}", record.id, e);
            }
        }
    }
}

impl std::fmt::Debug for CallTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CallTracker")
            .field("local_user_id", &self.local_user_id)
            .field(
                "active_call",
                &state.session.as_ref().map(|s| s.call_id().to_string()),
            )
            .field("history_len", &state.history.len())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
