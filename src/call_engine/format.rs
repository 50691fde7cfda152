//! Anzeige-Strings für Dauer, Zeitpunkt und Status

use chrono::{DateTime, Datelike, Duration, Utc};

use super::types::{CallRecord, CallStatus};

/// Formatiert eine Dauer in Sekunden als `MM:SS` bzw. `H:MM:SS`
///
/// Negative Werte werden als 0 behandelt.
pub fn format_call_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}

/// Formatiert den Startzeitpunkt relativ zu `now`
///
/// - gleicher Tag: `14:05`
/// - Vortag: `Yesterday`
/// - letzte 7 Tage: Wochentag (`Mon`)
/// - gleiches Jahr: `Mar 4`
/// - sonst: `Mar 4, 2025`
pub fn format_call_time(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let day = timestamp.date_naive();
    let today = now.date_naive();

    if day == today {
        return timestamp.format("%H:%M").to_string();
    }
    if day + Duration::days(1) == today {
        return "Yesterday".to_string();
    }
    if day < today && day + Duration::days(7) > today {
        return timestamp.format("%a").to_string();
    }
    if timestamp.year() == now.year() {
        return timestamp.format("%b %-d").to_string();
    }
    timestamp.format("%b %-d, %Y").to_string()
}

/// Label für den Status eines Eintrags
pub fn status_label(record: &CallRecord) -> String {
    match record.status {
        CallStatus::Missed => "Missed".to_string(),
        CallStatus::Rejected => "Rejected".to_string(),
        CallStatus::Failed => "Failed".to_string(),
        CallStatus::Ended => match record.duration {
            Some(duration) => format_call_duration(duration as i64),
            None => "Ended".to_string(),
        },
        CallStatus::Initiating
        | CallStatus::Connecting
        | CallStatus::Ringing
        | CallStatus::Active => record.status.as_str().to_string(),
    }
}

// ============================================================================
// TESTS
// ============================================================================
