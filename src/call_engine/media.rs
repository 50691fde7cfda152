//! Media Handles - lokale und entfernte Streams
//!
//! Die eigentliche Aufnahme übernimmt die Plattform (Browser, WebView,
//! native Geräte). Dieses Modul kennt nur die Handles und deren
//! Track-Zustand, damit Mute/Video-Toggles und das Freigeben beim
//! Auflegen zentral im Tracker passieren.

use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use super::types::CallMedium;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Media permission denied")]
    PermissionDenied,

    #[error("No {0} device found")]
    DeviceNotFound(TrackKind),

    #[error("Media unavailable: {0}")]
    Unavailable(String),
}

// ============================================================================
// CONSTRAINTS
// ============================================================================

/// Anforderungen an einen lokalen Stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl MediaConstraints {
    pub fn audio_only() -> Self {
        Self {
            audio: true,
            video: false,
        }
    }

    pub fn audio_video() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }

    pub fn for_medium(medium: CallMedium) -> Self {
        match medium {
            CallMedium::Audio => Self::audio_only(),
            CallMedium::Video => Self::audio_video(),
        }
    }
}

// ============================================================================
// TRACKS & STREAMS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackKind::Audio => f.write_str("audio"),
            TrackKind::Video => f.write_str("video"),
        }
    }
}

#[derive(Debug)]
struct TrackInner {
    id: String,
    kind: TrackKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

/// Einzelner Media-Track
///
/// Klone teilen sich den Zustand, so dass das Gerät ein Abschalten
/// über den Tracker sofort sieht.
#[derive(Debug, Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    pub fn new(kind: TrackKind) -> Self {
        Self {
            inner: Arc::new(TrackInner {
                id: Uuid::new_v4().to_string(),
                kind,
                enabled: AtomicBool::new(true),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }
}

/// Handle auf einen Media-Stream (lokal oder remote)
#[derive(Debug, Clone)]
pub struct MediaStream {
    id: String,
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tracks,
        }
    }

    /// Stream mit Tracks passend zu den Constraints
    pub fn from_constraints(constraints: MediaConstraints) -> Self {
        let mut tracks = Vec::with_capacity(2);
        if constraints.audio {
            tracks.push(MediaTrack::new(TrackKind::Audio));
        }
        if constraints.video {
            tracks.push(MediaTrack::new(TrackKind::Video));
        }
        Self::new(tracks)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn tracks_of(&self, kind: TrackKind) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(move |t| t.kind() == kind)
    }

    pub fn has_video(&self) -> bool {
        self.tracks_of(TrackKind::Video).next().is_some()
    }

    /// Aktiviert oder deaktiviert alle Tracks einer Art
    pub fn set_kind_enabled(&self, kind: TrackKind, enabled: bool) {
        for track in self.tracks_of(kind) {
            track.set_enabled(enabled);
        }
    }

    /// Gibt den Stream frei
    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }

    /// `true` solange mindestens ein Track läuft
    pub fn is_active(&self) -> bool {
        self.tracks.iter().any(|t| !t.is_stopped())
    }
}

// ============================================================================
// MEDIA DEVICES
// ============================================================================

/// Zugriff auf lokale Aufnahmegeräte
///
/// Die Anforderung ist asynchron (Berechtigungsdialog, Gerätestart) und
/// darf beliebig lange dauern; der Tracker verwirft veraltete Ergebnisse.
pub trait MediaDevices: Send + Sync {
    fn acquire(
        &self,
        constraints: MediaConstraints,
    ) -> BoxFuture<'static, Result<MediaStream, MediaError>>;
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraints_for_medium() {
        assert_eq!(
            MediaConstraints::for_medium(CallMedium::Audio),
            MediaConstraints::audio_only()
        );
        let video = MediaConstraints::for_medium(CallMedium::Video);
        assert!(video.audio && video.video);
    }

    #[test]
    fn test_stream_tracks_follow_constraints() {
        let audio = MediaStream::from_constraints(MediaConstraints::audio_only());
        assert_eq!(audio.tracks().len(), 1);
        assert!(!audio.has_video());

        let video = MediaStream::from_constraints(MediaConstraints::audio_video());
        assert_eq!(video.tracks().len(), 2);
        assert!(video.has_video());
    }

    #[test]
    fn test_clones_share_track_state() {
        let stream = MediaStream::from_constraints(MediaConstraints::audio_video());
        let device_side = stream.clone();

        stream.set_kind_enabled(TrackKind::Video, false);
        assert!(device_side.tracks_of(TrackKind::Video).all(|t| !t.is_enabled()));
        assert!(device_side.tracks_of(TrackKind::Audio).all(|t| t.is_enabled()));

        stream.stop();
        assert!(!device_side.is_active());
    }
}
