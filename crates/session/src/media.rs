//! Media-Engine-Schnittstelle
//!
//! Die eigentliche WebRTC-Engine (ICE, DTLS/SRTP, Codecs) ist ein externer
//! Baustein. Der Server spricht sie ausschliesslich ueber `MediaEngine` und
//! `MediaConnection` an; Callbacks der Engine kommen als `MediaEvent` ueber
//! eine Queue zurueck.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use lotse_core::{PeerId, PeerRole, TrackId, TrackRef};
use lotse_protocol::{IceCandidate, SessionDescription};
use thiserror::Error;
use tokio::sync::mpsc;

/// Fehler der Media-Engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    #[error("Engine hat die Beschreibung abgelehnt: {0}")]
    Abgelehnt(String),

    #[error("Verbindung bereits geschlossen")]
    Geschlossen,

    #[error("Engine-Fehler: {0}")]
    Intern(String),
}

pub type MediaResult<T> = Result<T, MediaError>;

/// Verbindungszustand wie ihn die Engine meldet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Ereignis einer Engine-Verbindung
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    /// Engine hat einen lokalen ICE-Kandidaten gefunden
    LocalIceCandidate(IceCandidate),
    /// Ein Track des Peers ist eingetroffen
    RemoteTrack(TrackRef),
    /// Zustandswechsel der Verbindung
    ConnectionState(MediaConnectionState),
}

/// Eine Engine-Verbindung zu genau einem Peer
#[async_trait]
pub trait MediaConnection: Send + Sync + 'static {
    /// Erzeugt ein Offer und setzt es als lokale Beschreibung
    async fn create_offer(&self) -> MediaResult<SessionDescription>;

    /// Setzt das entfernte Offer und erzeugt die passende Answer
    async fn create_answer(&self, offer: &SessionDescription) -> MediaResult<SessionDescription>;

    async fn set_remote_description(&self, beschreibung: &SessionDescription) -> MediaResult<()>;

    async fn add_ice_candidate(&self, kandidat: &IceCandidate) -> MediaResult<()>;

    /// Fuegt einen weitergeleiteten Track hinzu
    async fn add_track(&self, track: &TrackRef) -> MediaResult<()>;

    /// Ersetzt einen bereits weitergeleiteten Track gleicher Art
    async fn replace_track(&self, alt: &TrackId, neu: &TrackRef) -> MediaResult<()>;

    /// Gibt alle Ressourcen der Verbindung frei
    async fn close(&self);
}

/// Geoeffnete Engine-Sitzung eines Peers
pub struct MediaSession {
    pub connection: Arc<dyn MediaConnection>,
    pub events: mpsc::Receiver<MediaEvent>,
}

/// Fabrik fuer Engine-Verbindungen
#[async_trait]
pub trait MediaEngine: Send + Sync + 'static {
    async fn open(&self, peer_id: &PeerId, role: PeerRole) -> MediaResult<MediaSession>;
}

// ---------------------------------------------------------------------------
// LoopbackEngine
// ---------------------------------------------------------------------------

/// Platzhalter-Engine ohne Medienpfad
///
/// Erzeugt synthetische Beschreibungen und meldet nach abgeschlossener
/// Aushandlung `Connected`. Damit laeuft der Server als reiner
/// Signaling-Relay, bis eine echte Engine eingebunden wird.
#[derive(Debug, Default)]
pub struct LoopbackEngine {
    zaehler: AtomicU64,
}

impl LoopbackEngine {
    pub fn neu() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MediaEngine for LoopbackEngine {
    async fn open(&self, peer_id: &PeerId, _role: PeerRole) -> MediaResult<MediaSession> {
        let nummer = self.zaehler.fetch_add(1, Ordering::Relaxed) + 1;
        let (events_tx, events_rx) = mpsc::channel(16);
        tracing::debug!(peer_id = %peer_id, sitzung = nummer, "Loopback-Sitzung geoeffnet");
        Ok(MediaSession {
            connection: Arc::new(LoopbackConnection {
                sitzung: nummer,
                events: events_tx,
                geschlossen: AtomicBool::new(false),
            }),
            events: events_rx,
        })
    }
}

struct LoopbackConnection {
    sitzung: u64,
    events: mpsc::Sender<MediaEvent>,
    geschlossen: AtomicBool,
}

impl LoopbackConnection {
    fn sdp(&self) -> String {
        format!(
            "v=0\r\no=lotse {} 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n",
            self.sitzung
        )
    }

    fn pruefen(&self) -> MediaResult<()> {
        if self.geschlossen.load(Ordering::Acquire) {
            return Err(MediaError::Geschlossen);
        }
        Ok(())
    }

    fn verbunden_melden(&self) {
        // Aufrufer ist der Peer-Task, der diese Queue selbst leert
        let _ = self
            .events
            .try_send(MediaEvent::ConnectionState(MediaConnectionState::Connected));
    }
}

#[async_trait]
impl MediaConnection for LoopbackConnection {
    async fn create_offer(&self) -> MediaResult<SessionDescription> {
        self.pruefen()?;
        Ok(SessionDescription::offer(self.sdp()))
    }

    async fn create_answer(&self, offer: &SessionDescription) -> MediaResult<SessionDescription> {
        self.pruefen()?;
        if offer.sdp.trim().is_empty() {
            return Err(MediaError::Abgelehnt("leeres Offer".into()));
        }
        self.verbunden_melden();
        Ok(SessionDescription::answer(self.sdp()))
    }

    async fn set_remote_description(&self, beschreibung: &SessionDescription) -> MediaResult<()> {
        self.pruefen()?;
        if beschreibung.sdp.trim().is_empty() {
            return Err(MediaError::Abgelehnt("leere Beschreibung".into()));
        }
        self.verbunden_melden();
        Ok(())
    }

    async fn add_ice_candidate(&self, _kandidat: &IceCandidate) -> MediaResult<()> {
        self.pruefen()
    }

    async fn add_track(&self, _track: &TrackRef) -> MediaResult<()> {
        self.pruefen()
    }

    async fn replace_track(&self, _alt: &TrackId, _neu: &TrackRef) -> MediaResult<()> {
        self.pruefen()
    }

    async fn close(&self) {
        self.geschlossen.store(true, Ordering::Release);
    }
}
