//! Call Engine Module - Anruf-Sessions und Verlauf
//!
//! Dieses Modul verwaltet:
//! - Die eine aktive Anruf-Session des Clients
//! - Den Anrufverlauf
//! - Mute/Video-Toggles des lokalen Teilnehmers
//! - Anzeige-Strings für Dauer, Zeitpunkt und Status

mod clock;
mod engine;
mod format;
mod history;
mod media;
mod session;
mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use clock::{Clock, SystemClock};
pub use engine::{CallError, CallEvent, CallTracker, DEFAULT_RING_TIMEOUT};
pub use format::{format_call_duration, format_call_time, status_label};
pub use history::CallHistoryLog;
pub use media::{MediaConstraints, MediaDevices, MediaError, MediaStream, MediaTrack, TrackKind};
pub use session::{ActiveCallSession, ConnectionState, ParticipantState};
pub use types::{CallDirection, CallMedium, CallRecord, CallStatus, EndReason, IncomingCall};
