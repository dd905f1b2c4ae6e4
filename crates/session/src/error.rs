//! Fehlertypen fuer Sessions und Peers

use lotse_core::{PeerId, PeerRole, SessionId, TrackId};
use thiserror::Error;

use crate::channel::ChannelError;
use crate::media::MediaError;

/// Alle moeglichen Fehler in Session- und Peer-Verwaltung
#[derive(Debug, Error)]
pub enum SessionError {
    // --- Zulassung ---
    #[error("Peer {0} ist bereits verbunden")]
    DuplicatePeer(PeerId),

    #[error("Rolle {0} wird in dieser Session nicht zugelassen")]
    RoleRejected(PeerRole),

    #[error("Session {0} ist bereits geschlossen")]
    SessionClosed(SessionId),

    // --- Adressierung ---
    #[error("Session {0} nicht gefunden")]
    UnknownSession(SessionId),

    #[error("Peer {0} nicht gefunden")]
    UnknownPeer(PeerId),

    #[error("Ziel-Peer {0} nicht gefunden")]
    UnknownTarget(PeerId),

    // --- Media ---
    #[error("Aushandlung mit Peer {peer_id} fehlgeschlagen: {quelle}")]
    MediaNegotiation {
        peer_id: PeerId,
        #[source]
        quelle: MediaError,
    },

    #[error("Weiterleitung von Track {track_id} ({quelle_peer} -> {ziel_peer}) fehlgeschlagen: {grund}")]
    TrackForward {
        quelle_peer: PeerId,
        ziel_peer: PeerId,
        track_id: TrackId,
        grund: MediaError,
    },

    // --- Transport ---
    #[error("Signaling-Kanal: {0}")]
    Channel(#[from] ChannelError),
}

/// Result-Alias fuer Session-Operationen
pub type SessionResult<T> = Result<T, SessionError>;
