//! PeerHandle – Signaling-Zustandsmaschine eines einzelnen Peers
//!
//! ## State Machine
//! ```text
//! Joining -> Offered -> Answered -> Connected
//!    |          |          |           |
//!    +----------+----------+-----------+--> Disconnected | Failed
//! ```
//!
//! Jeder Peer besitzt einen eigenen tokio-Task, der eingehende Envelopes und
//! Engine-Ereignisse strikt nacheinander abarbeitet. Nachrichten, die
//! waehrend eines laufenden Engine-Aufrufs eintreffen, warten im Postfach.
//! Wird der Peer abgebaut, waehrend ein Engine-Aufruf laeuft, verfaellt
//! dessen Ergebnis.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lotse_core::{
    PeerId, PeerRole, PeerState, SessionId, TrackId, TrackKind, TrackRef, TransportKind,
};
use lotse_protocol::{Envelope, IceCandidate, ProtocolError, SessionDescription, Signal, SignalKind};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::channel::SignalingChannel;
use crate::error::{SessionError, SessionResult};
use crate::media::{MediaConnection, MediaConnectionState, MediaError, MediaEvent, MediaResult};
use crate::registry::SessionRegistry;
use crate::session::Session;

// ---------------------------------------------------------------------------
// Offer-Policy
// ---------------------------------------------------------------------------

/// Legt fest, wer nach der Zulassung das erste Offer sendet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OfferPolicy {
    /// Der Server offeriert dem neuen Peer
    #[default]
    Server,
    /// Der Peer offeriert selbst
    Peer,
}

// ---------------------------------------------------------------------------
// Postfach
// ---------------------------------------------------------------------------

/// Auftrag an den Peer-Task
#[derive(Debug)]
pub(crate) enum PeerBefehl {
    /// Envelope vom eigenen Client ohne `target`
    Signal(Envelope),
    /// Nicht dekodierbares Envelope vom eigenen Client
    Ungueltig(ProtocolError),
    /// Server-Offer senden (OfferPolicy::Server)
    OfferSenden,
}

/// Empfangsseite des Postfachs, wird vom Peer-Task konsumiert
pub(crate) struct PeerPostfach {
    inbox: mpsc::UnboundedReceiver<PeerBefehl>,
    shutdown: watch::Receiver<bool>,
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Track-Eintrag im Diagnose-Snapshot
#[derive(Debug, Clone, Serialize)]
pub struct TrackSnapshot {
    pub id: TrackId,
    pub kind: TrackKind,
}

/// Diagnose-Sicht auf einen Peer (`GET /sessions`)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerSnapshot {
    pub peer_id: PeerId,
    pub role: PeerRole,
    pub state: PeerState,
    pub transport: TransportKind,
    pub tracks: Vec<TrackSnapshot>,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// PeerHandle
// ---------------------------------------------------------------------------

struct PeerZustand {
    state: PeerState,
    /// Ein vom Server gesendetes Offer wartet auf die Answer
    offer_ausstehend: bool,
    left_at: Option<DateTime<Utc>>,
}

/// Ein Peer innerhalb einer Session
pub struct PeerHandle {
    session_id: SessionId,
    peer_id: PeerId,
    role: PeerRole,
    transport: TransportKind,
    joined_at: DateTime<Utc>,
    kanal: RwLock<Arc<dyn SignalingChannel>>,
    media: Arc<dyn MediaConnection>,
    zustand: Mutex<PeerZustand>,
    /// Eigene, vom Peer erzeugte Tracks
    tracks: Mutex<HashMap<TrackId, TrackRef>>,
    /// Weitergeleitete fremde Tracks, ein Slot pro Medienart
    weitergeleitet: Mutex<HashMap<TrackKind, TrackRef>>,
    /// Serialisiert add/replace-Aufrufe an die Engine
    weiterleitung_sperre: tokio::sync::Mutex<()>,
    inbox: mpsc::UnboundedSender<PeerBefehl>,
    shutdown: watch::Sender<bool>,
    getrennt: AtomicBool,
    trennung: AtomicU64,
}

impl std::fmt::Debug for PeerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerHandle")
            .field("session_id", &self.session_id)
            .field("peer_id", &self.peer_id)
            .field("role", &self.role)
            .field("state", &self.state())
            .finish()
    }
}

impl PeerHandle {
    pub(crate) fn neu(
        session_id: SessionId,
        peer_id: PeerId,
        role: PeerRole,
        kanal: Arc<dyn SignalingChannel>,
        media: Arc<dyn MediaConnection>,
    ) -> (Arc<Self>, PeerPostfach) {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let transport = kanal.transport();

        let handle = Arc::new(Self {
            session_id,
            peer_id,
            role,
            transport,
            joined_at: Utc::now(),
            kanal: RwLock::new(kanal),
            media,
            zustand: Mutex::new(PeerZustand {
                state: PeerState::Joining,
                offer_ausstehend: false,
                left_at: None,
            }),
            tracks: Mutex::new(HashMap::new()),
            weitergeleitet: Mutex::new(HashMap::new()),
            weiterleitung_sperre: tokio::sync::Mutex::new(()),
            inbox: inbox_tx,
            shutdown: shutdown_tx,
            getrennt: AtomicBool::new(false),
            trennung: AtomicU64::new(0),
        });

        (
            handle,
            PeerPostfach {
                inbox: inbox_rx,
                shutdown: shutdown_rx,
            },
        )
    }

    // --- Zugriff ---

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn role(&self) -> PeerRole {
        self.role
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    pub fn state(&self) -> PeerState {
        self.zustand.lock().state
    }

    pub fn joined_at(&self) -> DateTime<Utc> {
        self.joined_at
    }

    pub fn left_at(&self) -> Option<DateTime<Utc>> {
        self.zustand.lock().left_at
    }

    /// Eigene Tracks des Peers
    pub fn tracks(&self) -> Vec<TrackRef> {
        self.tracks.lock().values().cloned().collect()
    }

    /// Aktuell an diesen Peer weitergeleitete Tracks
    pub fn weitergeleitete_tracks(&self) -> Vec<TrackRef> {
        self.weitergeleitet.lock().values().cloned().collect()
    }

    pub fn snapshot(&self) -> PeerSnapshot {
        let zustand = self.zustand.lock();
        let mut tracks: Vec<TrackSnapshot> = self
            .tracks
            .lock()
            .values()
            .map(|t| TrackSnapshot {
                id: t.id.clone(),
                kind: t.kind,
            })
            .collect();
        tracks.sort_by(|a, b| a.id.cmp(&b.id));

        PeerSnapshot {
            peer_id: self.peer_id.clone(),
            role: self.role,
            state: zustand.state,
            transport: self.transport,
            tracks,
            joined_at: self.joined_at,
            left_at: zustand.left_at,
        }
    }

    // --- Postfach ---

    /// Reiht ein Envelope des eigenen Clients zur Verarbeitung ein
    pub fn signal_einreihen(&self, envelope: Envelope) -> bool {
        self.inbox.send(PeerBefehl::Signal(envelope)).is_ok()
    }

    /// Meldet ein nicht dekodierbares Envelope des eigenen Clients
    pub fn ungueltig_einreihen(&self, fehler: ProtocolError) -> bool {
        self.inbox.send(PeerBefehl::Ungueltig(fehler)).is_ok()
    }

    pub(crate) fn offer_anfordern(&self) -> bool {
        self.inbox.send(PeerBefehl::OfferSenden).is_ok()
    }

    // --- Kanal ---

    /// Sendet ein Envelope ueber den eigenen Kanal
    pub fn senden(&self, envelope: Envelope) -> bool {
        let kanal = Arc::clone(&*self.kanal.read());
        match kanal.senden(envelope) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(peer_id = %self.peer_id, fehler = %e, "Envelope nicht zugestellt");
                false
            }
        }
    }

    // --- Signaling ---

    /// Sendet ein Server-Offer an den Peer
    pub async fn offer_senden(&self) -> SessionResult<()> {
        match self.abgesichert(self.media.create_offer()).await {
            None => Ok(()),
            Some(Ok(offer)) => {
                {
                    let mut z = self.zustand.lock();
                    if z.state.ist_terminal() {
                        return Ok(());
                    }
                    z.state = PeerState::Offered;
                    z.offer_ausstehend = true;
                }
                tracing::debug!(peer_id = %self.peer_id, "Server-Offer gesendet");
                self.senden(Envelope::offer(offer));
                Ok(())
            }
            Some(Err(e)) => Err(self.aushandlung_gescheitert(e)),
        }
    }

    /// Verarbeitet ein Offer des Peers und sendet die Answer zurueck
    pub async fn offer_empfangen(
        &self,
        offer: SessionDescription,
    ) -> SessionResult<SessionDescription> {
        if !self.uebergang(PeerState::Offered) {
            return Err(SessionError::MediaNegotiation {
                peer_id: self.peer_id.clone(),
                quelle: MediaError::Geschlossen,
            });
        }

        match self.abgesichert(self.media.create_answer(&offer)).await {
            None => Err(SessionError::MediaNegotiation {
                peer_id: self.peer_id.clone(),
                quelle: MediaError::Geschlossen,
            }),
            Some(Ok(answer)) => {
                {
                    let mut z = self.zustand.lock();
                    z.offer_ausstehend = false;
                }
                self.uebergang(PeerState::Answered);
                self.senden(Envelope::answer(answer.clone()));
                tracing::debug!(peer_id = %self.peer_id, "Answer gesendet");
                Ok(answer)
            }
            Some(Err(e)) => Err(self.aushandlung_gescheitert(e)),
        }
    }

    /// Verarbeitet die Answer auf ein Server-Offer
    ///
    /// Eine Answer ohne ausstehendes Offer wird protokolliert und ignoriert.
    pub async fn answer_empfangen(&self, answer: SessionDescription) -> SessionResult<()> {
        if !self.zustand.lock().offer_ausstehend {
            tracing::warn!(
                peer_id = %self.peer_id,
                state = %self.state(),
                "Answer ohne ausstehendes Offer ignoriert"
            );
            return Ok(());
        }

        match self.abgesichert(self.media.set_remote_description(&answer)).await {
            None => Ok(()),
            Some(Ok(())) => {
                self.zustand.lock().offer_ausstehend = false;
                self.uebergang(PeerState::Answered);
                Ok(())
            }
            Some(Err(e)) => Err(self.aushandlung_gescheitert(e)),
        }
    }

    /// Reicht einen entfernten ICE-Kandidaten an die Engine weiter
    ///
    /// Abgelehnte Kandidaten werden mit einer Warnung verworfen.
    pub async fn ice_kandidat_hinzufuegen(&self, kandidat: IceCandidate) {
        if kandidat.ist_ende() {
            tracing::trace!(peer_id = %self.peer_id, "Ende der ICE-Kandidaten");
            return;
        }
        if let Some(Err(e)) = self.abgesichert(self.media.add_ice_candidate(&kandidat)).await {
            tracing::warn!(
                peer_id = %self.peer_id,
                fehler = %e,
                "ICE-Kandidat verworfen"
            );
        }
    }

    /// Lokaler ICE-Kandidat der Engine geht nur an den eigenen Kanal
    pub fn lokaler_ice_kandidat(&self, kandidat: IceCandidate) {
        self.senden(Envelope::ice_candidate(kandidat));
    }

    // --- Tracks ---

    /// Uebernimmt einen weitergeleiteten Track
    ///
    /// Traegt der Peer bereits einen Track derselben Art, wird dieser ersetzt.
    pub async fn weiterleitung_annehmen(&self, track: &TrackRef) -> MediaResult<()> {
        let _sperre = self.weiterleitung_sperre.lock().await;
        let alt_id = match self.weitergeleitet.lock().get(&track.kind) {
            Some(alt) if alt.id == track.id => return Ok(()),
            Some(alt) => Some(alt.id.clone()),
            None => None,
        };
        let ergebnis = match alt_id {
            Some(alt_id) => {
                self.abgesichert(self.media.replace_track(&alt_id, track))
                    .await
            }
            None => self.abgesichert(self.media.add_track(track)).await,
        };

        match ergebnis {
            None => Ok(()),
            Some(Ok(())) => {
                self.weitergeleitet.lock().insert(track.kind, track.clone());
                Ok(())
            }
            Some(Err(e)) => Err(e),
        }
    }

    /// Gibt die Slots frei, die Tracks von `quelle` tragen
    ///
    /// Der naechste Track derselben Art wird danach neu hinzugefuegt statt ersetzt.
    pub(crate) fn quelle_vergessen(&self, quelle: &PeerId) {
        self.weitergeleitet.lock().retain(|_, t| &t.owner != quelle);
    }

    fn track_registrieren(&self, track: TrackRef) -> TrackRef {
        let track = TrackRef {
            owner: self.peer_id.clone(),
            ..track
        };
        self.tracks.lock().insert(track.id.clone(), track.clone());
        track
    }

    // --- Lebenszyklus ---

    /// Baut den Peer ab: Endzustand setzen, Task stoppen, Kanal schliessen
    ///
    /// Ein bereits gesetzter Endzustand bleibt erhalten.
    pub(crate) fn beenden(&self, grund: PeerState) {
        {
            let mut z = self.zustand.lock();
            if !z.state.ist_terminal() {
                z.state = grund;
            }
            if z.left_at.is_none() {
                z.left_at = Some(Utc::now());
            }
        }
        self.shutdown.send_replace(true);
        self.kanal.read().schliessen();
    }

    /// Markiert den Peer als voruebergehend getrennt und liefert die Trenn-Generation
    pub(crate) fn trennen_markieren(&self) -> u64 {
        self.getrennt.store(true, Ordering::Release);
        self.trennung.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Ob die Trennung mit der Generation `generation` noch besteht
    pub(crate) fn trennung_besteht(&self, generation: u64) -> bool {
        self.getrennt.load(Ordering::Acquire) && self.trennung.load(Ordering::Acquire) == generation
    }

    pub fn ist_getrennt(&self) -> bool {
        self.getrennt.load(Ordering::Acquire)
    }

    /// Bindet einen neuen Kanal an einen getrennten Peer
    pub(crate) fn wieder_verbinden(&self, kanal: Arc<dyn SignalingChannel>) {
        *self.kanal.write() = kanal;
        self.trennung.fetch_add(1, Ordering::AcqRel);
        self.getrennt.store(false, Ordering::Release);
    }

    fn uebergang(&self, neu: PeerState) -> bool {
        let mut z = self.zustand.lock();
        if z.state.ist_terminal() {
            return false;
        }
        if z.state != neu {
            tracing::debug!(peer_id = %self.peer_id, von = %z.state, nach = %neu, "Zustandswechsel");
            z.state = neu;
        }
        true
    }

    fn aushandlung_gescheitert(&self, fehler: MediaError) -> SessionError {
        tracing::warn!(peer_id = %self.peer_id, fehler = %fehler, "Aushandlung fehlgeschlagen");
        self.senden(Envelope::leave(None));
        {
            let mut z = self.zustand.lock();
            if !z.state.ist_terminal() {
                z.state = PeerState::Failed;
            }
        }
        SessionError::MediaNegotiation {
            peer_id: self.peer_id.clone(),
            quelle: fehler,
        }
    }

    /// Fuehrt einen Engine-Aufruf aus, solange der Peer nicht abgebaut wird
    ///
    /// `None` bedeutet: der Peer wurde vor oder waehrend des Aufrufs abgebaut.
    async fn abgesichert<T, F>(&self, aufruf: F) -> Option<MediaResult<T>>
    where
        F: Future<Output = MediaResult<T>>,
    {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow_and_update() {
            return None;
        }
        tokio::select! {
            ergebnis = aufruf => {
                if *shutdown.borrow() {
                    None
                } else {
                    Some(ergebnis)
                }
            }
            _ = shutdown.changed() => None,
        }
    }

    // --- Task ---

    async fn befehl_ausfuehren(&self, befehl: PeerBefehl) -> Option<PeerState> {
        match befehl {
            PeerBefehl::OfferSenden => self.offer_senden().await.err().map(|_| PeerState::Failed),
            PeerBefehl::Ungueltig(fehler) => {
                if fehler.kind() == Some(SignalKind::IceCandidate) {
                    tracing::warn!(peer_id = %self.peer_id, fehler = %fehler, "Ungueltiger ICE-Kandidat verworfen");
                    return None;
                }
                tracing::warn!(peer_id = %self.peer_id, fehler = %fehler, "Ungueltiges Envelope - Peer fehlgeschlagen");
                self.senden(Envelope::error(fehler.to_string()));
                self.senden(Envelope::leave(None));
                self.uebergang(PeerState::Failed);
                Some(PeerState::Failed)
            }
            PeerBefehl::Signal(envelope) => {
                tracing::trace!(peer_id = %self.peer_id, typ = %envelope.kind(), "Envelope verarbeiten");
                match envelope.signal {
                    Signal::Offer(offer) => self
                        .offer_empfangen(offer)
                        .await
                        .err()
                        .map(|_| PeerState::Failed),
                    Signal::Answer(answer) => self
                        .answer_empfangen(answer)
                        .await
                        .err()
                        .map(|_| PeerState::Failed),
                    Signal::IceCandidate(kandidat) => {
                        self.ice_kandidat_hinzufuegen(kandidat).await;
                        None
                    }
                    Signal::Leave => {
                        tracing::info!(peer_id = %self.peer_id, "Peer meldet sich ab");
                        Some(PeerState::Disconnected)
                    }
                    Signal::Ping(_) => None,
                    Signal::NewPeer | Signal::Error(_) => {
                        tracing::debug!(peer_id = %self.peer_id, "Server-Nachricht vom Client ignoriert");
                        None
                    }
                    Signal::Relay { kind, .. } => {
                        tracing::debug!(peer_id = %self.peer_id, typ = %kind, "Relay-Envelope ohne Ziel ignoriert");
                        None
                    }
                }
            }
        }
    }

    async fn ereignis_verarbeiten(&self, ereignis: MediaEvent, session: &Session) -> Option<PeerState> {
        match ereignis {
            MediaEvent::LocalIceCandidate(kandidat) => {
                self.lokaler_ice_kandidat(kandidat);
                None
            }
            MediaEvent::RemoteTrack(track) => {
                let track = self.track_registrieren(track);
                tracing::info!(
                    peer_id = %self.peer_id,
                    track_id = %track.id,
                    kind = %track.kind,
                    "Track empfangen"
                );
                session.track_verteilen(self, &track).await;
                None
            }
            MediaEvent::ConnectionState(MediaConnectionState::Connected) => {
                if self.state() == PeerState::Answered {
                    self.uebergang(PeerState::Connected);
                    tracing::info!(peer_id = %self.peer_id, "Media verbunden");
                }
                None
            }
            MediaEvent::ConnectionState(MediaConnectionState::Failed) => {
                tracing::warn!(peer_id = %self.peer_id, "Media-Verbindung fehlgeschlagen");
                self.uebergang(PeerState::Failed);
                Some(PeerState::Failed)
            }
            MediaEvent::ConnectionState(MediaConnectionState::Closed) => Some(PeerState::Disconnected),
            MediaEvent::ConnectionState(zustand) => {
                tracing::debug!(peer_id = %self.peer_id, zustand = ?zustand, "Media-Zustand");
                None
            }
        }
    }
}

/// Startet den Task eines Peers
pub(crate) fn starten(
    peer: Arc<PeerHandle>,
    postfach: PeerPostfach,
    events: mpsc::Receiver<MediaEvent>,
    session: Arc<Session>,
    registry: SessionRegistry,
) -> JoinHandle<()> {
    tokio::spawn(peer_schleife(peer, postfach, events, session, registry))
}

async fn peer_schleife(
    peer: Arc<PeerHandle>,
    mut postfach: PeerPostfach,
    mut events: mpsc::Receiver<MediaEvent>,
    session: Arc<Session>,
    registry: SessionRegistry,
) {
    let mut events_offen = true;

    loop {
        if *postfach.shutdown.borrow_and_update() {
            break;
        }

        let ende = tokio::select! {
            biased;

            _ = postfach.shutdown.changed() => continue,

            befehl = postfach.inbox.recv() => match befehl {
                Some(befehl) => peer.befehl_ausfuehren(befehl).await,
                None => break,
            },

            ereignis = events.recv(), if events_offen => match ereignis {
                Some(ereignis) => peer.ereignis_verarbeiten(ereignis, &session).await,
                None => {
                    events_offen = false;
                    None
                }
            },
        };

        if let Some(grund) = ende {
            registry.handle_entfernen(&peer, grund);
        }
    }

    peer.media.close().await;
    tracing::debug!(
        session_id = %peer.session_id,
        peer_id = %peer.peer_id,
        "Peer-Task beendet"
    );
}
