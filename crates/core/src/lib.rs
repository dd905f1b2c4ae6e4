//! lotse-core – Gemeinsame Typen fuer Lotse
//!
//! Dieses Crate stellt die fundamentalen Bausteine bereit, die von allen
//! anderen Lotse-Crates gemeinsam genutzt werden: ID-Newtypes, Rollen,
//! Track-Referenzen und Aktivitaets-Ereignisse.

pub mod event;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use event::{ActivityEntry, ActivityEvent};
pub use types::{PeerId, PeerRole, PeerState, SessionId, TrackId, TrackKind, TrackRef, TransportKind};
