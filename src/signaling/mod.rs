//! Signaling Module - Nachrichten für den Anrufaufbau
//!
//! Der Transport (WebSocket, Realtime-Kanal) liegt außerhalb dieses
//! Crates. Hier werden nur die Nachrichten definiert:
//! - Eingehende Signale parsen und an den Tracker weiterleiten
//! - Ausgehende Signale typsicher serialisieren
//!

mod messages;

pub use messages::*;
