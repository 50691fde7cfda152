//! Call Log Database
//!
//! SQLite-Datenbank für den lokalen Anrufverlauf.
//! Jeder Statuswechsel wird per Upsert gespeichert.

use crate::call_engine::{CallDirection, CallMedium, CallRecord, CallStatus, EndReason};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, Result as SqliteResult, Row};
use std::path::{Path, PathBuf};
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to create database directory: {0}")]
    DirectoryCreation(#[from] std::io::Error),

    #[error("Call not found: {0}")]
    RecordNotFound(String),

    #[error("Corrupt call record {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

// ============================================================================
// STORE TRAIT
// ============================================================================

/// Persistenz für Verlaufseinträge
pub trait CallLogStore: Send + Sync {
    fn save(&self, record: &CallRecord) -> Result<(), DatabaseError>;

    /// Gespeicherter Eintrag mit dieser ID, falls vorhanden
    fn load(&self, call_id: &str) -> Result<Option<CallRecord>, DatabaseError>;
}

// ============================================================================
// DATABASE
// ============================================================================

const SELECT_COLUMNS: &str = r#"
    SELECT id, conversation_id, medium, status, direction, started_at, ended_at,
           duration_secs, participants, initiator, end_reason
    FROM calls
"#;

/// SQLite-Datenbank für den Anrufverlauf (Thread-safe durch Mutex)
pub struct CallLogDatabase {
    conn: Mutex<Connection>,
}

impl CallLogDatabase {
    /// Öffnet oder erstellt die Datenbank unter `path`
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!("Opening call log at {:?}", path);

        let conn = Connection::open(path)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;

        Ok(db)
    }

    /// In-Memory Datenbank für Tests
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Ermittelt den Standardpfad im App-Datenverzeichnis
    pub fn default_path() -> Result<PathBuf, DatabaseError> {
        let proj_dirs = directories::ProjectDirs::from("app", "connectsphere", "connectsphere")
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "Could not determine app data directory",
                )
            })?;

        let mut path = proj_dirs.data_dir().to_path_buf();
        path.push("calls.db");
        Ok(path)
    }

    /// Initialisiert das Datenbank-Schema
    fn init_schema(&self) -> Result<(), DatabaseError> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS calls (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                medium TEXT NOT NULL,
                status TEXT NOT NULL,
                direction TEXT NOT NULL,
                started_at TEXT NOT NULL,
                ended_at TEXT,
                duration_secs INTEGER,
                participants TEXT NOT NULL,
                initiator TEXT NOT NULL,
                end_reason TEXT
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE INDEX IF NOT EXISTS idx_calls_started_at ON calls(started_at)
            "#,
            [],
        )?;

        Ok(())
    }

    /// Speichert oder aktualisiert einen Eintrag
    ///
    /// Abgeschlossene Einträge werden nicht mehr überschrieben.
    pub fn upsert(&self, record: &CallRecord) -> Result<(), DatabaseError> {
        let participants =
            serde_json::to_string(&record.participants).map_err(|e| DatabaseError::Corrupt {
                id: record.id.clone(),
                reason: e.to_string(),
            })?;

        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO calls (id, conversation_id, medium, status, direction, started_at,
                               ended_at, duration_secs, participants, initiator, end_reason)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                ended_at = excluded.ended_at,
                duration_secs = excluded.duration_secs,
                participants = excluded.participants,
                end_reason = excluded.end_reason
            WHERE calls.status NOT IN ('ended', 'missed', 'rejected', 'failed')
            "#,
            params![
                record.id,
                record.conversation_id,
                record.medium.as_str(),
                record.status.as_str(),
                record.direction.as_str(),
                record.started_at.to_rfc3339(),
                record.ended_at.map(|t| t.to_rfc3339()),
                record.duration.map(|d| d as i64),
                participants,
                record.initiator,
                record.end_reason.map(|r| r.as_str()),
            ],
        )?;
        Ok(())
    }

    /// Holt einen Eintrag anhand der Call-ID
    pub fn get_record(&self, call_id: &str) -> Result<CallRecord, DatabaseError> {
        let conn = self.conn.lock();
        let raw = conn
            .query_row(
                &format!("{} WHERE id = ?1", SELECT_COLUMNS),
                params![call_id],
                RawRecord::from_row,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    DatabaseError::RecordNotFound(call_id.to_string())
                }
                other => DatabaseError::Sqlite(other),
            })?;

        raw.into_record()
    }

    /// Holt die letzten `limit` Einträge, neueste zuerst
    pub fn load_recent(&self, limit: usize) -> Result<Vec<CallRecord>, DatabaseError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "{} ORDER BY started_at DESC, rowid DESC LIMIT ?1",
            SELECT_COLUMNS
        ))?;

        let raw = stmt
            .query_map(params![limit as i64], RawRecord::from_row)?
            .collect::<SqliteResult<Vec<RawRecord>>>()?;

        raw.into_iter().map(RawRecord::into_record).collect()
    }

    /// Schließt Einträge ab, die ein früherer Lauf offen gelassen hat
    pub fn close_interrupted(&self, now: DateTime<Utc>) -> Result<usize, DatabaseError> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            r#"
            UPDATE calls
            SET status = 'failed', end_reason = 'interrupted', ended_at = ?1,
                duration_secs = NULL
            WHERE status NOT IN ('ended', 'missed', 'rejected', 'failed')
            "#,
            params![now.to_rfc3339()],
        )?;
        Ok(updated)
    }

    pub fn count(&self) -> Result<usize, DatabaseError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM calls", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

impl CallLogStore for CallLogDatabase {
    fn save(&self, record: &CallRecord) -> Result<(), DatabaseError> {
        self.upsert(record)
    }

    fn load(&self, call_id: &str) -> Result<Option<CallRecord>, DatabaseError> {
        match self.get_record(call_id) {
            Ok(record) => Ok(Some(record)),
            Err(DatabaseError::RecordNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

// ============================================================================
// ROW MAPPING
// ============================================================================

/// Zeile wie sie in SQLite steht
struct RawRecord {
    id: String,
    conversation_id: String,
    medium: String,
    status: String,
    direction: String,
    started_at: String,
    ended_at: Option<String>,
    duration_secs: Option<i64>,
    participants: String,
    initiator: String,
    end_reason: Option<String>,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> SqliteResult<Self> {
        Ok(Self {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            medium: row.get(2)?,
            status: row.get(3)?,
            direction: row.get(4)?,
            started_at: row.get(5)?,
            ended_at: row.get(6)?,
            duration_secs: row.get(7)?,
            participants: row.get(8)?,
            initiator: row.get(9)?,
            end_reason: row.get(10)?,
        })
    }

    fn into_record(self) -> Result<CallRecord, DatabaseError> {
        let id = self.id;
        let corrupt = |reason: String| DatabaseError::Corrupt {
            id: id.clone(),
            reason,
        };

        let medium = CallMedium::parse(&self.medium)
            .ok_or_else(|| corrupt(format!("unknown medium '{}'", self.medium)))?;
        let status = CallStatus::parse(&self.status)
            .ok_or_else(|| corrupt(format!("unknown status '{}'", self.status)))?;
        let direction = CallDirection::parse(&self.direction)
            .ok_or_else(|| corrupt(format!("unknown direction '{}'", self.direction)))?;
        let started_at = parse_timestamp(&self.started_at).map_err(&corrupt)?;
        let ended_at = self
            .ended_at
            .as_deref()
            .map(parse_timestamp)
            .transpose()
            .map_err(&corrupt)?;
        let end_reason = match self.end_reason.as_deref() {
            Some(reason) => Some(
                EndReason::parse(reason)
                    .ok_or_else(|| corrupt(format!("unknown end reason '{}'", reason)))?,
            ),
            None => None,
        };
        let participants: Vec<String> =
            serde_json::from_str(&self.participants).map_err(|e| corrupt(e.to_string()))?;

        Ok(CallRecord {
            id: id.clone(),
            conversation_id: self.conversation_id,
            medium,
            status,
            started_at,
            ended_at,
            duration: self.duration_secs.map(|d| d.max(0) as u64),
            participants,
            initiator: self.initiator,
            direction,
            end_reason,
        })
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("invalid timestamp '{}': {}", value, e))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn sample(conversation: &str, minutes: i64) -> CallRecord {
        let start =
            Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap() + Duration::minutes(minutes);
        CallRecord::outgoing(
            conversation.to_string(),
            CallMedium::Video,
            "alice".to_string(),
            start,
        )
    }

    #[test]
    fn test_upsert_and_get_record() {
        let db = CallLogDatabase::open_in_memory().unwrap();
        let mut record = sample("event-1", 0);
        db.upsert(&record).unwrap();

        record.status = CallStatus::Active;
        record.add_participant("bob");
        let end = record.started_at + Duration::seconds(90);
        record.finish(CallStatus::Ended, EndReason::Completed, end);
        db.upsert(&record).unwrap();

        let loaded = db.get_record(&record.id).unwrap();
        assert_eq!(loaded, record);
        assert_eq!(loaded.duration, Some(90));
        assert_eq!(db.count().unwrap(), 1);
    }

    #[test]
    fn test_terminal_record_is_not_overwritten() {
        let db = CallLogDatabase::open_in_memory().unwrap();
        let mut record = sample("event-1", 0);
        record.finish(CallStatus::Rejected, EndReason::Declined, record.started_at);
        db.upsert(&record).unwrap();

        let mut reopened = record.clone();
        reopened.status = CallStatus::Ringing;
        reopened.ended_at = None;
        reopened.end_reason = None;
        db.upsert(&reopened).unwrap();

        assert_eq!(db.get_record(&record.id).unwrap(), record);
        assert_eq!(db.count().unwrap(), 1);
    }

    #[test]
    fn test_store_load() {
        let db = CallLogDatabase::open_in_memory().unwrap();
        let record = sample("event-1", 0);
        db.save(&record).unwrap();

        assert_eq!(db.load(&record.id).unwrap(), Some(record));
        assert_eq!(db.load("nope").unwrap(), None);
    }

    #[test]
    fn test_missing_record() {
        let db = CallLogDatabase::open_in_memory().unwrap();
        assert!(matches!(
            db.get_record("nope"),
            Err(DatabaseError::RecordNotFound(id)) if id == "nope"
        ));
    }

    #[test]
    fn test_load_recent_newest_first() {
        let db = CallLogDatabase::open_in_memory().unwrap();
        for (i, name) in ["first", "second", "third"].iter().enumerate() {
            db.upsert(&sample(name, i as i64)).unwrap();
        }

        let recent = db.load_recent(2).unwrap();
        let names: Vec<_> = recent.iter().map(|r| r.conversation_id.as_str()).collect();
        assert_eq!(names, vec!["third", "second"]);
    }

    #[test]
    fn test_close_interrupted() {
        let db = CallLogDatabase::open_in_memory().unwrap();
        let open = sample("open", 0);
        let mut done = sample("done", 1);
        done.finish(CallStatus::Failed, EndReason::NoAnswer, done.started_at);
        db.upsert(&open).unwrap();
        db.upsert(&done).unwrap();

        let now = Utc.with_ymd_and_hms(2026, 4, 2, 8, 0, 0).unwrap();
        assert_eq!(db.close_interrupted(now).unwrap(), 1);

        let closed = db.get_record(&open.id).unwrap();
        assert_eq!(closed.status, CallStatus::Failed);
        assert_eq!(closed.end_reason, Some(EndReason::Interrupted));
        assert_eq!(closed.ended_at, Some(now));
        assert_eq!(db.get_record(&done.id).unwrap(), done);
    }

    #[test]
    fn test_corrupt_row_is_reported() {
        let db = CallLogDatabase::open_in_memory().unwrap();
        let record = sample("event", 0);
        db.upsert(&record).unwrap();
        db.conn
            .lock()
            .execute("UPDATE calls SET medium = 'hologram'", [])
            .unwrap();

        assert!(matches!(
            db.get_record(&record.id),
            Err(DatabaseError::Corrupt { .. })
        ));
    }
}
