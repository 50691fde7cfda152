//! Aktive Anruf-Session
//!
//! Hält den laufenden `CallRecord`, den Zustand der entfernten Teilnehmer
//! und alle Media-Handles. Es existiert höchstens eine Session pro Tracker.

use serde::Serialize;
use std::collections::HashMap;

use super::media::{MediaStream, TrackKind};
use super::types::{CallMedium, CallRecord};

/// Verbindungsstatus eines entfernten Teilnehmers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

/// Zustand eines entfernten Teilnehmers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantState {
    pub connection: ConnectionState,
    pub muted: bool,
    pub video_enabled: bool,
}

impl ParticipantState {
    pub fn joining(medium: CallMedium) -> Self {
        Self {
            connection: ConnectionState::Connecting,
            muted: false,
            video_enabled: medium == CallMedium::Video,
        }
    }
}

/// Die eine aktive Session des Clients
#[derive(Debug, Clone)]
pub struct ActiveCallSession {
    record: CallRecord,
    generation: u64,
    participants: HashMap<String, ParticipantState>,
    local_stream: Option<MediaStream>,
    remote_streams: HashMap<String, MediaStream>,
    muted: bool,
    video_enabled: bool,
    pub(crate) acquiring: bool,
}

impl ActiveCallSession {
    pub(crate) fn new(record: CallRecord, generation: u64) -> Self {
        let video_enabled = record.medium == CallMedium::Video;
        Self {
            record,
            generation,
            participants: HashMap::new(),
            local_stream: None,
            remote_streams: HashMap::new(),
            muted: false,
            video_enabled,
            acquiring: false,
        }
    }

    pub fn record(&self) -> &CallRecord {
        &self.record
    }

    pub(crate) fn record_mut(&mut self) -> &mut CallRecord {
        &mut self.record
    }

    pub fn call_id(&self) -> &str {
        &self.record.id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn participants(&self) -> &HashMap<String, ParticipantState> {
        &self.participants
    }

    pub fn participant(&self, participant_id: &str) -> Option<&ParticipantState> {
        self.participants.get(participant_id)
    }

    pub fn local_stream(&self) -> Option<&MediaStream> {
        self.local_stream.as_ref()
    }

    pub fn remote_streams(&self) -> &HashMap<String, MediaStream> {
        &self.remote_streams
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn is_video_enabled(&self) -> bool {
        self.video_enabled
    }

    /// Übernimmt den lokalen Stream und wendet die aktuellen Toggles an
    pub(crate) fn attach_local_stream(&mut self, stream: MediaStream) {
        stream.set_kind_enabled(TrackKind::Audio, !self.muted);
        stream.set_kind_enabled(TrackKind::Video, self.video_enabled);
        if let Some(old) = self.local_stream.replace(stream) {
            old.stop();
        }
    }

    pub(crate) fn toggle_mute(&mut self) -> bool {
        self.muted = !self.muted;
        if let Some(stream) = &self.local_stream {
            stream.set_kind_enabled(TrackKind::Audio, !self.muted);
        }
        self.muted
    }

    pub(crate) fn toggle_video(&mut self) -> bool {
        self.video_enabled = !self.video_enabled;
        if let Some(stream) = &self.local_stream {
            stream.set_kind_enabled(TrackKind::Video, self.video_enabled);
        }
        self.video_enabled
    }

    /// Registriert einen Teilnehmer (Beitrittsreihenfolge im Record)
    /// Fügt einen entfernten Teilnehmer hinzu; `true` wenn der Eintrag
    /// dadurch geändert wurde
    pub(crate) fn join_participant(&mut self, participant_id: &str) -> bool {
        let added = self.record.add_participant(participant_id);
        let medium = self.record.medium;
        self.participants
            .entry(participant_id.to_string())
            .or_insert_with(|| ParticipantState::joining(medium));
        added
    }

    pub(crate) fn participant_mut(
        &mut self,
        participant_id: &str,
    ) -> Option<&mut ParticipantState> {
        self.participants.get_mut(participant_id)
    }

    pub(crate) fn set_remote_stream(&mut self, participant_id: &str, stream: MediaStream) {
        if let Some(old) = self
            .remote_streams
            .insert(participant_id.to_string(), stream)
        {
            old.stop();
        }
    }

    pub(crate) fn remove_remote_stream(&mut self, participant_id: &str) {
        if let Some(stream) = self.remote_streams.remove(participant_id) {
            stream.stop();
        }
    }

    /// Gibt alle Media-Handles frei
    pub(crate) fn release_media(&mut self) {
        if let Some(stream) = self.local_stream.take() {
            stream.stop();
        }
        for (_, stream) in self.remote_streams.drain() {
            stream.stop();
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call_engine::media::{MediaConstraints, MediaStream};
    use chrono::Utc;

    fn video_session() -> ActiveCallSession {
        let record = CallRecord::outgoing(
            "event-7".to_string(),
            CallMedium::Video,
            "alice".to_string(),
            Utc::now(),
        );
        ActiveCallSession::new(record, 1)
    }

    #[test]
    fn test_toggles_apply_to_local_tracks() {
        let mut session = video_session();
        let stream = MediaStream::from_constraints(MediaConstraints::audio_video());
        session.attach_local_stream(stream.clone());

        assert!(session.toggle_mute());
        assert!(stream.tracks_of(TrackKind::Audio).all(|t| !t.is_enabled()));

        assert!(!session.toggle_video());
        assert!(stream.tracks_of(TrackKind::Video).all(|t| !t.is_enabled()));

        assert!(!session.toggle_mute());
        assert!(stream.tracks_of(TrackKind::Audio).all(|t| t.is_enabled()));
    }

    #[test]
    fn test_stream_attached_after_toggle_inherits_flags() {
        let mut session = video_session();
        session.toggle_mute();

        let stream = MediaStream::from_constraints(MediaConstraints::audio_video());
        session.attach_local_stream(stream.clone());
        assert!(stream.tracks_of(TrackKind::Audio).all(|t| !t.is_enabled()));
        assert!(stream.tracks_of(TrackKind::Video).all(|t| t.is_enabled()));
    }

    #[test]
    fn test_join_keeps_order_and_unique_keys() {
        let mut session = video_session();
        assert!(session.join_participant("bob"));
        assert!(session.join_participant("carol"));
        assert!(!session.join_participant("bob"));

        assert_eq!(session.record().participants, vec!["alice", "bob", "carol"]);
        assert_eq!(session.participants().len(), 2);
        assert_eq!(
            session.participant("bob").map(|p| p.connection),
            Some(ConnectionState::Connecting)
        );
    }

    #[test]
    fn test_release_media_stops_everything() {
        let mut session = video_session();
        let local = MediaStream::from_constraints(MediaConstraints::audio_video());
        let remote = MediaStream::from_constraints(MediaConstraints::audio_only());
        session.attach_local_stream(local.clone());
        session.set_remote_stream("bob", remote.clone());

        let replaced = MediaStream::from_constraints(MediaConstraints::audio_only());
        session.set_remote_stream("bob", replaced.clone());
        assert!(!remote.is_active());

        session.release_media();
        assert!(!local.is_active());
        assert!(!replaced.is_active());
        assert!(session.local_stream().is_none());
        assert!(session.remote_streams().is_empty());
    }
}
