//! Message Types für das Call-Signaling
//!
//! JSON mit `type`-Feld und camelCase-Feldnamen, so wie der
//! Realtime-Kanal der App sie verschickt.

use crate::call_engine::{CallMedium, IncomingCall};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum SignalingError {
    #[error("Malformed signal: {0}")]
    Malformed(#[from] serde_json::Error),
}

// ============================================================================
// REMOTE → CLIENT
// ============================================================================

/// Alle Signale, die von der Gegenseite kommen können
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundSignal {
    /// Neuer eingehender Anruf
    IncomingCall {
        #[serde(rename = "callId")]
        call_id: String,
        #[serde(rename = "conversationId")]
        conversation_id: String,
        #[serde(rename = "fromUserId")]
        from_user_id: String,
        medium: CallMedium,
    },

    /// Gegenseite klingelt
    Ringing {
        #[serde(rename = "callId")]
        call_id: String,
    },

    /// Gegenseite hat angenommen
    Accepted {
        #[serde(rename = "callId")]
        call_id: String,
        #[serde(rename = "byUserId")]
        by_user_id: String,
    },

    /// Gegenseite hat abgelehnt
    Rejected {
        #[serde(rename = "callId")]
        call_id: String,
        #[serde(default)]
        reason: Option<String>,
    },

    /// Gegenseite hat aufgelegt
    Hangup {
        #[serde(rename = "callId")]
        call_id: String,
    },

    ParticipantJoined {
        #[serde(rename = "callId")]
        call_id: String,
        #[serde(rename = "participantId")]
        participant_id: String,
    },

    ParticipantLeft {
        #[serde(rename = "callId")]
        call_id: String,
        #[serde(rename = "participantId")]
        participant_id: String,
    },

    /// Mute/Video-Status eines Teilnehmers
    ParticipantState {
        #[serde(rename = "callId")]
        call_id: String,
        #[serde(rename = "participantId")]
        participant_id: String,
        muted: bool,
        #[serde(rename = "videoEnabled")]
        video_enabled: bool,
    },

    /// Verbindungsaufbau fehlgeschlagen oder abgebrochen
    ConnectionFailed {
        #[serde(rename = "callId")]
        call_id: String,
        reason: String,
    },
}

impl InboundSignal {
    pub fn parse(text: &str) -> Result<Self, SignalingError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn call_id(&self) -> &str {
        match self {
            InboundSignal::IncomingCall { call_id, .. }
            | InboundSignal::Ringing { call_id }
            | InboundSignal::Accepted { call_id, .. }
            | InboundSignal::Rejected { call_id, .. }
            | InboundSignal::Hangup { call_id }
            | InboundSignal::ParticipantJoined { call_id, .. }
            | InboundSignal::ParticipantLeft { call_id, .. }
            | InboundSignal::ParticipantState { call_id, .. }
            | InboundSignal::ConnectionFailed { call_id, .. } => call_id,
        }
    }

    /// Eingehender Anruf, falls es sich um eine Einladung handelt
    pub fn as_incoming(&self) -> Option<IncomingCall> {
        match self {
            InboundSignal::IncomingCall {
                call_id,
                conversation_id,
                from_user_id,
                medium,
            } => Some(IncomingCall {
                call_id: call_id.clone(),
                conversation_id: conversation_id.clone(),
                from_user_id: from_user_id.clone(),
                medium: *medium,
            }),
            _ => None,
        }
    }
}

// ============================================================================
// CLIENT → REMOTE
// ============================================================================

/// Signale, die nach erfolgreichen Kommandos verschickt werden
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundSignal {
    /// Einladung zu einem neuen Anruf
    Invite {
        #[serde(rename = "callId")]
        call_id: String,
        #[serde(rename = "conversationId")]
        conversation_id: String,
        #[serde(rename = "fromUserId")]
        from_user_id: String,
        medium: CallMedium,
    },

    Accept {
        #[serde(rename = "callId")]
        call_id: String,
        #[serde(rename = "fromUserId")]
        from_user_id: String,
    },

    Reject {
        #[serde(rename = "callId")]
        call_id: String,
        #[serde(rename = "fromUserId")]
        from_user_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    Hangup {
        #[serde(rename = "callId")]
        call_id: String,
        #[serde(rename = "fromUserId")]
        from_user_id: String,
    },
}

impl OutboundSignal {
    pub fn to_json(&self) -> Result<String, SignalingError> {
        Ok(serde_json::to_string(self)?)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_incoming_call() {
        let signal = InboundSignal::parse(
            r#"{"type":"incoming_call","callId":"c-1","conversationId":"activity-9","fromUserId":"bob","medium":"video"}"#,
        )
        .unwrap();

        assert_eq!(signal.call_id(), "c-1");
        assert_eq!(
            signal.as_incoming(),
            Some(IncomingCall {
                call_id: "c-1".to_string(),
                conversation_id: "activity-9".to_string(),
                from_user_id: "bob".to_string(),
                medium: CallMedium::Video,
            })
        );
    }

    #[test]
    fn test_parse_rejected_without_reason() {
        let signal = InboundSignal::parse(r#"{"type":"rejected","callId":"c-2"}"#).unwrap();
        assert_eq!(
            signal,
            InboundSignal::Rejected {
                call_id: "c-2".to_string(),
                reason: None
            }
        );
    }

    #[test]
    fn test_parse_participant_state() {
        let signal = InboundSignal::parse(
            r#"{"type":"participant_state","callId":"c-3","participantId":"carol","muted":true,"videoEnabled":false}"#,
        )
        .unwrap();
        assert!(matches!(
            signal,
            InboundSignal::ParticipantState { muted: true, video_enabled: false, .. }
        ));
    }

    #[test]
    fn test_unknown_medium_is_malformed() {
        let result = InboundSignal::parse(
            r#"{"type":"incoming_call","callId":"c-1","conversationId":"a","fromUserId":"bob","medium":"fax"}"#,
        );
        assert!(matches!(result, Err(SignalingError::Malformed(_))));
    }

    #[test]
    fn test_outbound_invite_json() {
        let signal = OutboundSignal::Invite {
            call_id: "c-1".to_string(),
            conversation_id: "activity-9".to_string(),
            from_user_id: "alice".to_string(),
            medium: CallMedium::Audio,
        };
        let json: serde_json::Value = serde_json::from_str(&signal.to_json().unwrap()).unwrap();

        assert_eq!(json["type"], "invite");
        assert_eq!(json["callId"], "c-1");
        assert_eq!(json["conversationId"], "activity-9");
        assert_eq!(json["medium"], "audio");
    }

    #[test]
    fn test_outbound_reject_omits_empty_reason() {
        let signal = OutboundSignal::Reject {
            call_id: "c-1".to_string(),
            from_user_id: "alice".to_string(),
            reason: None,
        };
        let json = signal.to_json().unwrap();
        assert!(!json.contains("reason"));
        assert!(json.contains(r#""type":"reject""#));
    }
}
