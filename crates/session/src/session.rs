//! Session – Peers einer benannten Session, Zulassung und Track-Fan-out
//!
//! Die Peer-Map wird nur kurz und nie ueber einen `await` hinweg gesperrt.
//! Engine-Aufrufe (Oeffnen, Schliessen, Weiterleiten) laufen ausserhalb des Locks.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use lotse_core::{
    ActivityEntry, ActivityEvent, PeerId, PeerRole, PeerState, SessionId, TrackRef,
};
use lotse_protocol::Envelope;
use parking_lot::Mutex;
use serde::Serialize;

use crate::channel::{ChannelError, SignalingChannel};
use crate::error::{SessionError, SessionResult};
use crate::media::{MediaEngine, MediaError};
use crate::peer::{self, OfferPolicy, PeerHandle, PeerSnapshot};
use crate::registry::SessionRegistry;
use crate::routing::RoutingPolicy;

// ---------------------------------------------------------------------------
// Eingaben / Ergebnisse
// ---------------------------------------------------------------------------

/// Authentifizierte Anmeldung eines Peers
#[derive(Clone)]
pub struct PeerAnmeldung {
    pub peer_id: PeerId,
    pub role: PeerRole,
    pub kanal: Arc<dyn SignalingChannel>,
    pub offer_policy: OfferPolicy,
}

/// Ergebnis einer erfolgreichen Zulassung
#[derive(Debug, Clone)]
pub enum Aufnahme {
    /// Neuer Peer wurde angelegt
    Neu(Arc<PeerHandle>),
    /// Getrennter Peer wurde innerhalb der Karenzzeit wieder angebunden
    Wiederverbunden(Arc<PeerHandle>),
}

impl Aufnahme {
    pub fn handle(&self) -> &Arc<PeerHandle> {
        match self {
            Self::Neu(h) | Self::Wiederverbunden(h) => h,
        }
    }
}

/// Ergebnis eines Fan-outs
#[derive(Debug, Default)]
pub struct FanOutBericht {
    pub erfolgreich: Vec<PeerId>,
    pub fehlgeschlagen: Vec<SessionError>,
}

/// Diagnose-Sicht auf eine Session (`GET /sessions`)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub peers: Vec<PeerSnapshot>,
    pub peer_count: usize,
    pub device_peers: usize,
    pub web_client_peers: usize,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub activity_log: Vec<ActivityEntry>,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

struct SessionInner {
    peers: HashMap<PeerId, Arc<PeerHandle>>,
    geschlossen: bool,
    closed_at: Option<DateTime<Utc>>,
    activity_log: Vec<ActivityEntry>,
}

/// Eine Session mit ihren Peers
pub struct Session {
    id: SessionId,
    routing: RoutingPolicy,
    created_at: DateTime<Utc>,
    inner: Mutex<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("routing", &self.routing)
            .field("peer_count", &self.peer_anzahl())
            .finish()
    }
}

impl Session {
    pub fn neu(id: SessionId, routing: RoutingPolicy) -> Self {
        Self {
            id,
            routing,
            created_at: Utc::now(),
            inner: Mutex::new(SessionInner {
                peers: HashMap::new(),
                geschlossen: false,
                closed_at: None,
                activity_log: Vec::new(),
            }),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn routing(&self) -> RoutingPolicy {
        self.routing
    }

    pub fn peer_anzahl(&self) -> usize {
        self.inner.lock().peers.len()
    }

    pub fn ist_geschlossen(&self) -> bool {
        self.inner.lock().geschlossen
    }

    pub fn peer(&self, peer_id: &PeerId) -> Option<Arc<PeerHandle>> {
        self.inner.lock().peers.get(peer_id).cloned()
    }

    pub fn peers(&self) -> Vec<Arc<PeerHandle>> {
        self.inner.lock().peers.values().cloned().collect()
    }

    pub fn aktivitaet(&self) -> Vec<ActivityEntry> {
        self.inner.lock().activity_log.clone()
    }

    // --- Zulassung ---

    /// Laesst einen Peer zu, oeffnet seine Engine-Sitzung und startet die Aushandlung
    ///
    /// Ein bereits verbundener Peer gleicher ID wird nie ueberschrieben; die
    /// zweite Anmeldung wird abgelehnt.
    pub async fn peer_hinzufuegen(
        self: &Arc<Self>,
        anmeldung: PeerAnmeldung,
        engine: &dyn MediaEngine,
        registry: &SessionRegistry,
    ) -> SessionResult<Aufnahme> {
        if let Some(aufnahme) = self.zulassung_pruefen(&anmeldung)? {
            return Ok(aufnahme);
        }

        let media = engine
            .open(&anmeldung.peer_id, anmeldung.role)
            .await
            .map_err(|quelle| SessionError::MediaNegotiation {
                peer_id: anmeldung.peer_id.clone(),
                quelle,
            })?;

        let (handle, postfach) = PeerHandle::neu(
            self.id.clone(),
            anmeldung.peer_id.clone(),
            anmeldung.role,
            Arc::clone(&anmeldung.kanal),
            Arc::clone(&media.connection),
        );

        // Zustand kann sich waehrend open() geaendert haben
        let andere = {
            let mut inner = self.inner.lock();
            match self.einfuegen_pruefen(&inner, &anmeldung) {
                Ok(()) => {
                    let andere: Vec<_> = inner.peers.values().cloned().collect();
                    inner
                        .peers
                        .insert(anmeldung.peer_id.clone(), Arc::clone(&handle));
                    inner.activity_log.push(ActivityEntry::jetzt(
                        ActivityEvent::PeerConnected,
                        Some(anmeldung.peer_id.clone()),
                    ));
                    Ok(andere)
                }
                Err(e) => Err(e),
            }
        };

        let andere = match andere {
            Ok(andere) => andere,
            Err(e) => {
                media.connection.close().await;
                return Err(e);
            }
        };

        peer::starten(
            Arc::clone(&handle),
            postfach,
            media.events,
            Arc::clone(self),
            registry.clone(),
        );

        tracing::info!(
            session_id = %self.id,
            peer_id = %anmeldung.peer_id,
            role = %anmeldung.role,
            peers = andere.len() + 1,
            "Peer beigetreten"
        );

        for anderer in &andere {
            anderer.senden(Envelope::new_peer(anmeldung.peer_id.clone()));
        }

        self.bestehende_tracks_uebergeben(&handle, &andere).await;

        if anmeldung.offer_policy == OfferPolicy::Server {
            handle.offer_anfordern();
        }

        Ok(Aufnahme::Neu(handle))
    }

    /// Vorpruefung ohne Engine; bindet getrennte Peers direkt wieder an
    fn zulassung_pruefen(&self, anmeldung: &PeerAnmeldung) -> SessionResult<Option<Aufnahme>> {
        let inner = self.inner.lock();
        if let Some(vorhanden) = inner.peers.get(&anmeldung.peer_id) {
            if vorhanden.ist_getrennt() && vorhanden.role() == anmeldung.role {
                vorhanden.wieder_verbinden(Arc::clone(&anmeldung.kanal));
                tracing::info!(
                    session_id = %self.id,
                    peer_id = %anmeldung.peer_id,
                    "Peer innerhalb der Karenzzeit wieder verbunden"
                );
                return Ok(Some(Aufnahme::Wiederverbunden(Arc::clone(vorhanden))));
            }
        }
        self.einfuegen_pruefen(&inner, anmeldung)?;
        Ok(None)
    }

    fn einfuegen_pruefen(&self, inner: &SessionInner, anmeldung: &PeerAnmeldung) -> SessionResult<()> {
        if inner.geschlossen {
            return Err(SessionError::SessionClosed(self.id.clone()));
        }
        if inner.peers.contains_key(&anmeldung.peer_id) {
            tracing::warn!(
                session_id = %self.id,
                peer_id = %anmeldung.peer_id,
                "Doppelte Anmeldung abgelehnt"
            );
            return Err(SessionError::DuplicatePeer(anmeldung.peer_id.clone()));
        }
        if !self
            .routing
            .zulassen(anmeldung.role, inner.peers.values().map(|p| p.role()))
        {
            tracing::warn!(
                session_id = %self.id,
                peer_id = %anmeldung.peer_id,
                routing = %self.routing,
                "Rolle abgelehnt"
            );
            return Err(SessionError::RoleRejected(anmeldung.role));
        }
        Ok(())
    }

    // --- Entfernen ---

    /// Entfernt einen Peer; gibt `Some(leer)` zurueck wenn er vorhanden war
    pub fn peer_entfernen(&self, peer_id: &PeerId, grund: PeerState) -> Option<bool> {
        self.entfernen_wenn(peer_id, grund, |_| true)
    }

    /// Entfernt genau diesen Handle (nicht einen spaeter gleichnamig angemeldeten Peer)
    pub fn handle_entfernen(&self, handle: &Arc<PeerHandle>, grund: PeerState) -> Option<bool> {
        self.entfernen_wenn(handle.peer_id(), grund, |vorhanden| {
            Arc::ptr_eq(vorhanden, handle)
        })
    }

    fn entfernen_wenn(
        &self,
        peer_id: &PeerId,
        grund: PeerState,
        passt: impl Fn(&Arc<PeerHandle>) -> bool,
    ) -> Option<bool> {
        let (entfernt, andere, leer) = {
            let mut inner = self.inner.lock();
            match inner.peers.get(peer_id) {
                Some(vorhanden) if passt(vorhanden) => {}
                _ => return None,
            }
            let entfernt = inner.peers.remove(peer_id)?;
            inner.activity_log.push(ActivityEntry::jetzt(
                ActivityEvent::PeerDisconnected,
                Some(peer_id.clone()),
            ));
            let andere: Vec<_> = inner.peers.values().cloned().collect();
            let leer = inner.peers.is_empty();
            (entfernt, andere, leer)
        };

        entfernt.beenden(grund);
        tracing::info!(
            session_id = %self.id,
            peer_id = %peer_id,
            grund = %entfernt.state(),
            verbleibend = andere.len(),
            "Peer entfernt"
        );

        for anderer in &andere {
            anderer.quelle_vergessen(peer_id);
            anderer.senden(Envelope::leave(Some(peer_id.clone())));
        }

        Some(leer)
    }

    /// Schliesst die Session, wenn sie leer ist; `true` wenn sie (jetzt) geschlossen ist
    pub(crate) fn schliessen_wenn_leer(&self) -> bool {
        let mut inner = self.inner.lock();
        if !inner.peers.is_empty() {
            return false;
        }
        if !inner.geschlossen {
            Self::als_geschlossen_markieren(&mut inner);
        }
        true
    }

    /// Schliesst die Session und baut alle Peers ab
    ///
    /// Gibt `true` nur beim ersten Aufruf zurueck; weitere Aufrufe sind No-ops.
    pub fn schliessen(&self) -> bool {
        let peers: Vec<Arc<PeerHandle>> = {
            let mut inner = self.inner.lock();
            if inner.geschlossen {
                return false;
            }
            Self::als_geschlossen_markieren(&mut inner);
            inner.peers.drain().map(|(_, p)| p).collect()
        };

        for peer in &peers {
            peer.senden(Envelope::leave(None));
            peer.beenden(PeerState::Disconnected);
        }

        tracing::info!(session_id = %self.id, peers = peers.len(), "Session geschlossen");
        true
    }

    fn als_geschlossen_markieren(inner: &mut SessionInner) {
        inner.geschlossen = true;
        inner.closed_at = Some(Utc::now());
        inner
            .activity_log
            .push(ActivityEntry::jetzt(ActivityEvent::SessionClosed, None));
    }

    // --- Weiterleitung ---

    /// Stellt ein Envelope direkt an den Ziel-Peer zu (Relay-Modus)
    ///
    /// `senderId` wird immer vom Server gesetzt.
    pub fn weiterleiten(
        &self,
        absender: &PeerId,
        ziel_id: &PeerId,
        envelope: Envelope,
    ) -> SessionResult<()> {
        let ziel = self
            .peer(ziel_id)
            .ok_or_else(|| SessionError::UnknownTarget(ziel_id.clone()))?;

        tracing::trace!(
            session_id = %self.id,
            von = %absender,
            an = %ziel_id,
            typ = %envelope.kind(),
            "Envelope weitergeleitet"
        );

        let kanal_envelope = Envelope {
            sender_id: Some(absender.clone()),
            target: None,
            ..envelope
        };
        if ziel.senden(kanal_envelope) {
            Ok(())
        } else {
            Err(SessionError::Channel(ChannelError::Geschlossen))
        }
    }

    /// Verteilt einen Track gemaess Routing-Policy an alle anderen Peers
    ///
    /// Fehler einzelner Ziele werden protokolliert und brechen die
    /// Verteilung an die uebrigen Ziele nicht ab.
    pub async fn track_verteilen(&self, quelle: &PeerHandle, track: &TrackRef) -> FanOutBericht {
        let ziele: Vec<Arc<PeerHandle>> = {
            let inner = self.inner.lock();
            inner
                .peers
                .values()
                .filter(|ziel| ziel.peer_id() != quelle.peer_id())
                .filter(|ziel| {
                    self.routing
                        .soll_weiterleiten(quelle.role(), ziel.role(), track.kind)
                })
                .cloned()
                .collect()
        };

        let ergebnisse = join_all(ziele.iter().map(|ziel| async move {
            (ziel.peer_id().clone(), ziel.weiterleitung_annehmen(track).await)
        }))
        .await;

        let mut bericht = FanOutBericht::default();
        for (ziel_id, ergebnis) in ergebnisse {
            match ergebnis {
                Ok(()) => bericht.erfolgreich.push(ziel_id),
                Err(grund) => {
                    tracing::warn!(
                        session_id = %self.id,
                        quelle_peer = %quelle.peer_id(),
                        ziel_peer = %ziel_id,
                        track_id = %track.id,
                        fehler = %grund,
                        "Track-Weiterleitung fehlgeschlagen"
                    );
                    bericht.fehlgeschlagen.push(track_fehler(quelle, ziel_id, track, grund));
                }
            }
        }
        bericht
    }

    /// Leitet die bereits laufenden Tracks der anderen Peers an einen neuen Peer
    ///
    /// Laeuft vor dem ersten Server-Offer, damit dieses die Tracks enthaelt.
    async fn bestehende_tracks_uebergeben(
        &self,
        neu: &PeerHandle,
        andere: &[Arc<PeerHandle>],
    ) -> FanOutBericht {
        let mut bericht = FanOutBericht::default();
        for quelle in andere {
            for track in quelle.tracks() {
                if !self
                    .routing
                    .soll_weiterleiten(quelle.role(), neu.role(), track.kind)
                {
                    continue;
                }
                match neu.weiterleitung_annehmen(&track).await {
                    Ok(()) => bericht.erfolgreich.push(quelle.peer_id().clone()),
                    Err(grund) => {
                        tracing::warn!(
                            session_id = %self.id,
                            quelle_peer = %quelle.peer_id(),
                            ziel_peer = %neu.peer_id(),
                            track_id = %track.id,
                            fehler = %grund,
                            "Track-Weiterleitung fehlgeschlagen"
                        );
                        bericht
                            .fehlgeschlagen
                            .push(track_fehler(quelle, neu.peer_id().clone(), &track, grund));
                    }
                }
            }
        }
        if !bericht.erfolgreich.is_empty() {
            tracing::debug!(
                session_id = %self.id,
                peer_id = %neu.peer_id(),
                tracks = bericht.erfolgreich.len(),
                "Laufende Tracks uebergeben"
            );
        }
        bericht
    }

    // --- Diagnose ---

    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.lock();
        let mut peers: Vec<PeerSnapshot> = inner.peers.values().map(|p| p.snapshot()).collect();
        peers.sort_by(|a, b| a.joined_at.cmp(&b.joined_at));
        let device_peers = peers.iter().filter(|p| p.role.ist_device()).count();

        SessionSnapshot {
            session_id: self.id.clone(),
            peer_count: peers.len(),
            device_peers,
            web_client_peers: peers.len() - device_peers,
            peers,
            created_at: self.created_at,
            closed_at: inner.closed_at,
            activity_log: inner.activity_log.clone(),
        }
    }
}

fn track_fehler(quelle: &PeerHandle, ziel_peer: PeerId, track: &TrackRef, grund: MediaError) -> SessionError {
    SessionError::TrackForward {
        quelle_peer: quelle.peer_id().clone(),
        ziel_peer,
        track_id: track.id.clone(),
        grund,
    }
}
