//! Call-Typen und Zustandsautomat
//!
//! Ein Anruf durchläuft die Stati streng monoton:
//! `initiating → connecting → ringing → active → ended`, mit den
//! alternativen Endzuständen `missed`, `rejected` und `failed`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// MEDIUM & RICHTUNG
// ============================================================================

/// Art des Anrufs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallMedium {
    Audio,
    Video,
}

impl CallMedium {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallMedium::Audio => "audio",
            CallMedium::Video => "video",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "audio" => Some(CallMedium::Audio),
            "video" => Some(CallMedium::Video),
            _ => None,
        }
    }
}

/// Richtung des Anrufs, wird bei der Erstellung festgelegt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Outgoing,
    Incoming,
}

impl CallDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallDirection::Outgoing => "outgoing",
            CallDirection::Incoming => "incoming",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "outgoing" => Some(CallDirection::Outgoing),
            "incoming" => Some(CallDirection::Incoming),
            _ => None,
        }
    }
}

// ============================================================================
// CALL STATUS
// ============================================================================

/// Lebenszyklus-Status eines Anrufs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    /// Ausgehender Anruf, lokale Medien werden angefordert
    Initiating,
    /// Angebot ist unterwegs zur Gegenseite
    Connecting,
    /// Es klingelt (lokal bei eingehenden, remote bei ausgehenden Anrufen)
    Ringing,
    /// Gespräch läuft
    Active,
    /// Regulär beendet
    Ended,
    /// Eingehender Anruf wurde nicht angenommen
    Missed,
    /// Abgelehnt
    Rejected,
    /// Fehlgeschlagen (Medien, Netzwerk, keine Antwort)
    Failed,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Initiating => "initiating",
            CallStatus::Connecting => "connecting",
            CallStatus::Ringing => "ringing",
            CallStatus::Active => "active",
            CallStatus::Ended => "ended",
            CallStatus::Missed => "missed",
            CallStatus::Rejected => "rejected",
            CallStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "initiating" => Some(CallStatus::Initiating),
            "connecting" => Some(CallStatus::Connecting),
            "ringing" => Some(CallStatus::Ringing),
            "active" => Some(CallStatus::Active),
            "ended" => Some(CallStatus::Ended),
            "missed" => Some(CallStatus::Missed),
            "rejected" => Some(CallStatus::Rejected),
            "failed" => Some(CallStatus::Failed),
            _ => None,
        }
    }

    /// Endzustände können nicht mehr verlassen werden
    pub fn is_terminal(&self) -> bool {
        match self {
            CallStatus::Ended | CallStatus::Missed | CallStatus::Rejected | CallStatus::Failed => {
                true
            }
            CallStatus::Initiating
            | CallStatus::Connecting
            | CallStatus::Ringing
            | CallStatus::Active => false,
        }
    }

    /// Position im Hauptpfad des Automaten
    fn rank(&self) -> u8 {
        match self {
            CallStatus::Initiating => 0,
            CallStatus::Connecting => 1,
            CallStatus::Ringing => 2,
            CallStatus::Active => 3,
            CallStatus::Ended | CallStatus::Missed | CallStatus::Rejected | CallStatus::Failed => 4,
        }
    }

    /// Prüft ob ein Übergang nach `next` erlaubt ist
    pub fn can_transition_to(&self, next: CallStatus) -> bool {
        if self.is_terminal() {
            return false;
        }

        match next {
            CallStatus::Initiating | CallStatus::Connecting | CallStatus::Ringing => {
                next.rank() > self.rank()
            }
            CallStatus::Active => *self != CallStatus::Active,
            CallStatus::Ended => *self == CallStatus::Active,
            CallStatus::Missed | CallStatus::Rejected | CallStatus::Failed => {
                *self != CallStatus::Active
            }
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Grund für das Erreichen eines Endzustands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Completed,
    NoAnswer,
    Declined,
    Busy,
    MediaUnavailable,
    NetworkError,
    ConnectionLost,
    RemoteHangup,
    Interrupted,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::Completed => "completed",
            EndReason::NoAnswer => "no_answer",
            EndReason::Declined => "declined",
            EndReason::Busy => "busy",
            EndReason::MediaUnavailable => "media_unavailable",
            EndReason::NetworkError => "network_error",
            EndReason::ConnectionLost => "connection_lost",
            EndReason::RemoteHangup => "remote_hangup",
            EndReason::Interrupted => "interrupted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(EndReason::Completed),
            "no_answer" => Some(EndReason::NoAnswer),
            "declined" => Some(EndReason::Declined),
            "busy" => Some(EndReason::Busy),
            "media_unavailable" => Some(EndReason::MediaUnavailable),
            "network_error" => Some(EndReason::NetworkError),
            "connection_lost" => Some(EndReason::ConnectionLost),
            "remote_hangup" => Some(EndReason::RemoteHangup),
            "interrupted" => Some(EndReason::Interrupted),
            _ => None,
        }
    }
}

// ============================================================================
// CALL RECORD
// ============================================================================

/// Eintrag im Anrufverlauf
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    pub id: String,
    pub conversation_id: String,
    pub medium: CallMedium,
    pub status: CallStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Dauer in Sekunden, nur bei `ended` gesetzt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    /// Teilnehmer in Beitrittsreihenfolge
    pub participants: Vec<String>,
    pub initiator: String,
    pub direction: CallDirection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<EndReason>,
}

impl CallRecord {
    /// Neuer ausgehender Anruf im Status `initiating`
    pub fn outgoing(
        conversation_id: String,
        medium: CallMedium,
        local_user_id: String,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id,
            medium,
            status: CallStatus::Initiating,
            started_at,
            ended_at: None,
            duration: None,
            participants: vec![local_user_id.clone()],
            initiator: local_user_id,
            direction: CallDirection::Outgoing,
            end_reason: None,
        }
    }

    /// Neuer eingehender Anruf im Status `ringing`
    pub fn incoming(call: &IncomingCall, local_user_id: String, started_at: DateTime<Utc>) -> Self {
        let mut participants = vec![call.from_user_id.clone()];
        if local_user_id != call.from_user_id {
            participants.push(local_user_id);
        }

        Self {
            id: call.call_id.clone(),
            conversation_id: call.conversation_id.clone(),
            medium: call.medium,
            status: CallStatus::Ringing,
            started_at,
            ended_at: None,
            duration: None,
            participants,
            initiator: call.from_user_id.clone(),
            direction: CallDirection::Incoming,
            end_reason: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Fügt einen Teilnehmer hinzu, falls noch nicht vorhanden
    pub fn add_participant(&mut self, participant_id: &str) -> bool {
        if self.participants.iter().any(|p| p == participant_id) {
            return false;
        }
        self.participants.push(participant_id.to_string());
        true
    }

    /// Überführt den Anruf in einen Endzustand
    ///
    /// Die Dauer wird nur bei `ended` berechnet: ganze Sekunden zwischen
    /// Start und Ende, mindestens 0.
    pub(crate) fn finish(&mut self, status: CallStatus, reason: EndReason, now: DateTime<Utc>) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.ended_at = Some(now);
        self.end_reason = Some(reason);
        self.duration = match status {
            CallStatus::Ended => {
                let millis = (now - self.started_at).num_milliseconds().max(0);
                Some((millis / 1000) as u64)
            }
            _ => None,
        };
    }
}

/// Eingehender Anruf, wie er vom Signaling gemeldet wird
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingCall {
    pub call_id: String,
    pub conversation_id: String,
    pub from_user_id: String,
    pub medium: CallMedium,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn start_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_main_path_is_monotonic() {
        use CallStatus::*;
        assert!(Initiating.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Ringing));
        assert!(Ringing.can_transition_to(Active));
        assert!(Active.can_transition_to(Ended));

        assert!(!Ringing.can_transition_to(Connecting));
        assert!(!Active.can_transition_to(Ringing));
        assert!(!Connecting.can_transition_to(Initiating));
    }

    #[test]
    fn test_terminal_states_are_final() {
        use CallStatus::*;
        for terminal in [Ended, Missed, Rejected, Failed] {
            assert!(terminal.is_terminal());
            for next in [Initiating, Connecting, Ringing, Active, Ended, Missed, Rejected, Failed] {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn test_ended_only_from_active() {
        use CallStatus::*;
        assert!(!Ringing.can_transition_to(Ended));
        assert!(!Initiating.can_transition_to(Ended));
        assert!(!Active.can_transition_to(Missed));
        assert!(Ringing.can_transition_to(Missed));
        assert!(Initiating.can_transition_to(Failed));
    }

    #[test]
    fn test_finish_sets_duration_only_for_ended() {
        let mut record = CallRecord::outgoing(
            "event-1".to_string(),
            CallMedium::Audio,
            "alice".to_string(),
            start_time(),
        );
        record.status = CallStatus::Active;
        record.finish(
            CallStatus::Ended,
            EndReason::Completed,
            start_time() + Duration::milliseconds(65_900),
        );
        assert_eq!(record.duration, Some(65));

        let mut failed = CallRecord::outgoing(
            "event-1".to_string(),
            CallMedium::Audio,
            "alice".to_string(),
            start_time(),
        );
        failed.finish(
            CallStatus::Failed,
            EndReason::NoAnswer,
            start_time() + Duration::seconds(30),
        );
        assert_eq!(failed.duration, None);
        assert!(failed.ended_at.is_some());
    }

    #[test]
    fn test_duration_clamped_when_clock_goes_backwards() {
        let mut record = CallRecord::outgoing(
            "event-1".to_string(),
            CallMedium::Video,
            "alice".to_string(),
            start_time(),
        );
        record.status = CallStatus::Active;
        record.finish(CallStatus::Ended, EndReason::Completed, start_time() - Duration::seconds(5));
        assert_eq!(record.duration, Some(0));
    }

    #[test]
    fn test_incoming_record_participants() {
        let call = IncomingCall {
            call_id: "call-9".to_string(),
            conversation_id: "chat-3".to_string(),
            from_user_id: "bob".to_string(),
            medium: CallMedium::Video,
        };
        let mut record = CallRecord::incoming(&call, "alice".to_string(), start_time());
        assert_eq!(record.status, CallStatus::Ringing);
        assert_eq!(record.direction, CallDirection::Incoming);
        assert_eq!(record.initiator, "bob");
        assert_eq!(record.participants, vec!["bob", "alice"]);

        assert!(!record.add_participant("bob"));
        assert!(record.add_participant("carol"));
        assert_eq!(record.participants, vec!["bob", "alice", "carol"]);
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = CallRecord::outgoing(
            "event-1".to_string(),
            CallMedium::Audio,
            "alice".to_string(),
            start_time(),
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["conversationId"], "event-1");
        assert_eq!(json["status"], "initiating");
        assert_eq!(json["direction"], "outgoing");
        assert!(json.get("duration").is_none());
    }
}
