//! Aktivitaets-Ereignisse einer Session
//!
//! Jede Session fuehrt ein geordnetes Protokoll ihrer Lebenszyklus-
//! Ereignisse. Das Protokoll wird ueber `GET /sessions` ausgeliefert und
//! bleibt auch nach dem Retiren der Session erhalten.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::PeerId;

/// Art eines Aktivitaets-Ereignisses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActivityEvent {
    /// Peer wurde zugelassen
    PeerConnected,
    /// Peer wurde entfernt
    PeerDisconnected,
    /// Session wurde geschlossen und retired
    SessionClosed,
}

/// Ein Eintrag im Aktivitaets-Protokoll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub event: ActivityEvent,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<PeerId>,
}

impl ActivityEntry {
    /// Erstellt einen Eintrag mit aktuellem Zeitstempel
    pub fn jetzt(event: ActivityEvent, peer_id: Option<PeerId>) -> Self {
        Self {
            event,
            timestamp: Utc::now(),
            peer_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eintrag_serialisierung() {
        let eintrag = ActivityEntry::jetzt(ActivityEvent::PeerConnected, Some(PeerId::neu("p1")));
        let json = serde_json::to_value(&eintrag).unwrap();
        assert_eq!(json["event"], "peer-connected");
        assert_eq!(json["peerId"], "p1");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn session_closed_ohne_peer() {
        let eintrag = ActivityEntry::jetzt(ActivityEvent::SessionClosed, None);
        let json = serde_json::to_value(&eintrag).unwrap();
        assert!(json.get("peerId").is_none());
    }
}
