//! Database Module - lokaler Anrufverlauf
//!
//! SQLite-Persistenz für `CallRecord`s, damit der Verlauf einen
//! Neustart der App übersteht.

mod call_log;

pub use call_log::{CallLogDatabase, CallLogStore, DatabaseError};
