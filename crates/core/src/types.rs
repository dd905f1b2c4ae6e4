//! Gemeinsame Identifikations- und Zustandstypen fuer Lotse
//!
//! Alle IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! Session-, Peer- und Track-IDs zur Compilezeit auszuschliessen.
//! Anders als intern erzeugte UUIDs sind diese IDs extern vorgegeben
//! (Stream-ID aus dem Credential, Peer-ID aus der Client-Identitaet).

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Erstellt die ID aus einem beliebigen String
            pub fn neu(wert: impl Into<String>) -> Self {
                Self(wert.into())
            }

            /// Gibt die ID als &str zurueck
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(wert: &str) -> Self {
                Self(wert.to_string())
            }
        }

        impl From<String> for $name {
            fn from(wert: String) -> Self {
                Self(wert)
            }
        }
    };
}

string_id!(
    /// Session-ID (opak, vom Client bzw. Credential vorgegeben)
    SessionId
);

string_id!(
    /// Peer-ID, eindeutig innerhalb einer Session
    PeerId
);

string_id!(
    /// Track-ID wie sie die Media-Engine vergibt
    TrackId
);

// ---------------------------------------------------------------------------
// Rollen
// ---------------------------------------------------------------------------

/// Rolle eines Peers innerhalb einer Session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PeerRole {
    /// Eingebettetes Geraet (Kamera, Android-Device)
    Device,
    /// Browser-Client
    WebClient,
}

impl PeerRole {
    /// Leitet die Rolle aus dem `clientType` des Push-Stream-Registers ab
    ///
    /// `android` und `device` gelten als Geraet, alles andere als Browser.
    pub fn aus_client_typ(client_typ: &str) -> Self {
        match client_typ.to_ascii_lowercase().as_str() {
            "android" | "device" => Self::Device,
            _ => Self::WebClient,
        }
    }

    pub fn ist_device(&self) -> bool {
        matches!(self, Self::Device)
    }
}

impl std::fmt::Display for PeerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Device => f.write_str("device"),
            Self::WebClient => f.write_str("web-client"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tracks
// ---------------------------------------------------------------------------

/// Medienart eines Tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Audio => f.write_str("audio"),
            Self::Video => f.write_str("video"),
        }
    }
}

/// Referenz auf einen Media-Track
///
/// Der Track gehoert exklusiv dem erzeugenden Peer (`owner`). Andere
/// Peers halten nur eine Weiterleitungs-Referenz.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackRef {
    pub id: TrackId,
    pub kind: TrackKind,
    pub owner: PeerId,
}

// ---------------------------------------------------------------------------
// Zustaende
// ---------------------------------------------------------------------------

/// Signaling-Zustand eines Peers
///
/// ```text
/// Joining -> Offered -> Answered -> Connected
///    |          |          |           |
///    +----------+----------+-----------+--> Disconnected | Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerState {
    Joining,
    Offered,
    Answered,
    Connected,
    Disconnected,
    Failed,
}

impl PeerState {
    /// Disconnected und Failed sind Endzustaende
    pub fn ist_terminal(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed)
    }
}

impl std::fmt::Display for PeerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Joining => "joining",
            Self::Offered => "offered",
            Self::Answered => "answered",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Transportvariante ueber die ein Peer angebunden ist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// Server-Sent-Events + korrelierte HTTP-Aufrufe
    PushStream,
    /// Persistenter WebSocket
    Socket,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_display_ohne_praefix() {
        assert_eq!(SessionId::neu("s1").to_string(), "s1");
        assert_eq!(PeerId::from("p1").as_str(), "p1");
    }

    #[test]
    fn ids_serialisieren_transparent() {
        let json = serde_json::to_string(&PeerId::neu("abc")).unwrap();
        assert_eq!(json, "\"abc\"");
    }

    #[test]
    fn rolle_aus_client_typ() {
        assert_eq!(PeerRole::aus_client_typ("android"), PeerRole::Device);
        assert_eq!(PeerRole::aus_client_typ("Device"), PeerRole::Device);
        assert_eq!(PeerRole::aus_client_typ("browser"), PeerRole::WebClient);
        assert_eq!(PeerRole::aus_client_typ(""), PeerRole::WebClient);
    }

    #[test]
    fn rolle_serde_kebab_case() {
        let json = serde_json::to_string(&PeerRole::WebClient).unwrap();
        assert_eq!(json, "\"web-client\"");
    }

    #[test]
    fn terminale_zustaende() {
        assert!(PeerState::Failed.ist_terminal());
        assert!(PeerState::Disconnected.ist_terminal());
        assert!(!PeerState::Connected.ist_terminal());
        assert!(!PeerState::Joining.ist_terminal());
    }
}
