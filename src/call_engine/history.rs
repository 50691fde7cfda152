//! Anrufverlauf
//!
//! Einträge werden beim Erstellen angehängt und nie entfernt. Nur ein noch
//! nicht beendeter Eintrag darf an Ort und Stelle aktualisiert werden.

use super::types::CallRecord;

#[derive(Debug, Clone, Default)]
pub struct CallHistoryLog {
    /// Älteste zuerst; die Ausgabe dreht die Reihenfolge um
    records: Vec<CallRecord>,
}

impl CallHistoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Baut den Verlauf aus gespeicherten Einträgen (neueste zuerst) auf
    pub fn from_newest_first(mut records: Vec<CallRecord>) -> Self {
        records.reverse();
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn push(&mut self, record: CallRecord) {
        self.records.push(record);
    }

    /// Aktualisiert einen laufenden Eintrag
    ///
    /// Gibt `false` zurück, wenn der Eintrag fehlt oder bereits beendet ist.
    pub fn update(&mut self, record: &CallRecord) -> bool {
        match self.records.iter_mut().rev().find(|r| r.id == record.id) {
            Some(existing) if !existing.is_terminal() => {
                *existing = record.clone();
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, call_id: &str) -> Option<&CallRecord> {
        self.records.iter().rev().find(|r| r.id == call_id)
    }

    pub fn latest(&self) -> Option<&CallRecord> {
        self.records.last()
    }

    /// Neueste zuerst
    pub fn iter(&self) -> impl Iterator<Item = &CallRecord> {
        self.records.iter().rev()
    }

    pub fn to_vec(&self) -> Vec<CallRecord> {
        self.iter().cloned().collect()
    }
}
