//! SessionRegistry – prozessweite Verwaltung aller Sessions
//!
//! Aktive Sessions liegen in einer `DashMap`. Eine Session wird genau in dem
//! Moment geschlossen, in dem sie aus der Map entfernt wird; `holen_oder_erstellen`
//! liefert daher nie eine geschlossene Session. Geschlossene Sessions wandern in
//! eine begrenzte Historie fuer die Diagnose.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use lotse_core::{PeerId, PeerState, SessionId};
use lotse_protocol::{Envelope, ProtocolError};
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{SessionError, SessionResult};
use crate::media::MediaEngine;
use crate::peer::PeerHandle;
use crate::routing::RoutingPolicy;
use crate::session::{Aufnahme, PeerAnmeldung, Session, SessionSnapshot};

/// Versuche, falls eine Session zwischen Holen und Zulassen geschlossen wurde
const MAX_ANMELDE_VERSUCHE: usize = 3;

/// Konfiguration der Registry
#[derive(Debug, Clone)]
pub struct RegistryKonfig {
    pub routing: RoutingPolicy,
    /// Anzahl geschlossener Sessions in der Diagnose-Historie
    pub retired_history: usize,
}

impl Default for RegistryKonfig {
    fn default() -> Self {
        Self {
            routing: RoutingPolicy::AllToAll,
            retired_history: 32,
        }
    }
}

/// Diagnose-Sicht auf alle Sessions (`GET /sessions`)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySnapshot {
    pub sessions: Vec<SessionSnapshot>,
    pub retired_sessions: Vec<SessionSnapshot>,
}

/// Zentrale Session-Verwaltung
///
/// Thread-safe via Arc + DashMap. Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    aktiv: DashMap<SessionId, Arc<Session>>,
    retired: Mutex<VecDeque<Arc<Session>>>,
    konfig: RegistryKonfig,
    engine: Arc<dyn MediaEngine>,
}

impl SessionRegistry {
    pub fn neu(konfig: RegistryKonfig, engine: Arc<dyn MediaEngine>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                aktiv: DashMap::new(),
                retired: Mutex::new(VecDeque::new()),
                konfig,
                engine,
            }),
        }
    }

    pub fn konfig(&self) -> &RegistryKonfig {
        &self.inner.konfig
    }

    // --- Sessions ---

    /// Liefert die aktive Session oder legt sie atomar an
    pub fn holen_oder_erstellen(&self, id: &SessionId) -> Arc<Session> {
        let eintrag = self.inner.aktiv.entry(id.clone()).or_insert_with(|| {
            tracing::info!(session_id = %id, routing = %self.inner.konfig.routing, "Session erstellt");
            Arc::new(Session::neu(id.clone(), self.inner.konfig.routing))
        });
        Arc::clone(eintrag.value())
    }

    pub fn holen(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.inner.aktiv.get(id).map(|s| Arc::clone(s.value()))
    }

    pub fn anzahl_aktiv(&self) -> usize {
        self.inner.aktiv.len()
    }

    /// Schliesst eine Session und verschiebt sie in die Historie
    ///
    /// Gibt `false` zurueck wenn keine aktive Session mit dieser ID existiert.
    pub fn entfernen(&self, id: &SessionId) -> bool {
        match self.inner.aktiv.remove(id) {
            Some((_, session)) => {
                if session.schliessen() {
                    self.archivieren(session);
                }
                true
            }
            None => {
                tracing::debug!(session_id = %id, "Session bereits entfernt");
                false
            }
        }
    }

    /// Schliesst alle aktiven Sessions (Shutdown)
    pub fn alle_schliessen(&self) -> usize {
        let ids: Vec<SessionId> = self.inner.aktiv.iter().map(|e| e.key().clone()).collect();
        ids.iter().filter(|id| self.entfernen(id)).count()
    }

    /// Snapshot aller aktiven und der zuletzt geschlossenen Sessions
    pub fn auflisten(&self) -> RegistrySnapshot {
        let aktiv: Vec<Arc<Session>> = self
            .inner
            .aktiv
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();
        let mut sessions: Vec<SessionSnapshot> = aktiv.iter().map(|s| s.snapshot()).collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        let retired_sessions = self
            .inner
            .retired
            .lock()
            .iter()
            .map(|s| s.snapshot())
            .collect();

        RegistrySnapshot {
            sessions,
            retired_sessions,
        }
    }

    fn archivieren(&self, session: Arc<Session>) {
        let mut retired = self.inner.retired.lock();
        retired.push_back(session);
        while retired.len() > self.inner.konfig.retired_history {
            retired.pop_front();
        }
    }

    /// Entfernt die Session, sofern sie (noch) diese Instanz und leer ist
    fn retire_wenn_leer(&self, session: &Arc<Session>) {
        let entfernt = self
            .inner
            .aktiv
            .remove_if(session.id(), |_, s| Arc::ptr_eq(s, session) && s.schliessen_wenn_leer());
        if let Some((id, session)) = entfernt {
            tracing::info!(session_id = %id, "Leere Session geschlossen");
            self.archivieren(session);
        }
    }

    // --- Peers ---

    /// Laesst einen authentifizierten Peer in die Session zu
    pub async fn peer_anmelden(
        &self,
        session_id: &SessionId,
        anmeldung: PeerAnmeldung,
    ) -> SessionResult<Aufnahme> {
        for _ in 0..MAX_ANMELDE_VERSUCHE {
            let session = self.holen_oder_erstellen(session_id);
            match session
                .peer_hinzufuegen(anmeldung.clone(), self.inner.engine.as_ref(), self)
                .await
            {
                Ok(aufnahme) => return Ok(aufnahme),
                Err(SessionError::SessionClosed(_)) => continue,
                Err(e) => {
                    self.retire_wenn_leer(&session);
                    return Err(e);
                }
            }
        }
        Err(SessionError::SessionClosed(session_id.clone()))
    }

    /// Entfernt einen Peer; eine dadurch leere Session wird sofort geschlossen
    pub fn peer_entfernen(&self, session_id: &SessionId, peer_id: &PeerId, grund: PeerState) -> bool {
        let Some(session) = self.holen(session_id) else {
            return false;
        };
        match session.peer_entfernen(peer_id, grund) {
            Some(leer) => {
                if leer {
                    self.retire_wenn_leer(&session);
                }
                true
            }
            None => false,
        }
    }

    /// Entfernt genau diesen Peer-Handle
    pub fn handle_entfernen(&self, handle: &Arc<PeerHandle>, grund: PeerState) -> bool {
        let Some(session) = self.holen(handle.session_id()) else {
            return false;
        };
        match session.handle_entfernen(handle, grund) {
            Some(leer) => {
                if leer {
                    self.retire_wenn_leer(&session);
                }
                true
            }
            None => false,
        }
    }

    /// Transport eines Peers ist weg: sofort entfernen oder nach Karenzzeit
    pub fn peer_trennen(&self, handle: &Arc<PeerHandle>, karenz: Duration) {
        if karenz.is_zero() {
            self.handle_entfernen(handle, PeerState::Disconnected);
            return;
        }

        let generation = handle.trennen_markieren();
        tracing::info!(
            session_id = %handle.session_id(),
            peer_id = %handle.peer_id(),
            karenz_ms = karenz.as_millis() as u64,
            "Peer getrennt - warte auf Wiederverbindung"
        );

        let registry = self.clone();
        let handle = Arc::clone(handle);
        tokio::spawn(async move {
            tokio::time::sleep(karenz).await;
            if handle.trennung_besteht(generation) {
                registry.handle_entfernen(&handle, PeerState::Disconnected);
            }
        });
    }

    // --- Nachrichten ---

    /// Stellt ein Client-Envelope zu
    ///
    /// Mit `target` wird an den Ziel-Peer weitergeleitet, ohne `target`
    /// verarbeitet der serverseitige Peer des Absenders das Envelope.
    pub fn nachricht_zustellen(
        &self,
        session_id: &SessionId,
        absender: &PeerId,
        envelope: Envelope,
    ) -> SessionResult<()> {
        let Some(session) = self.holen(session_id) else {
            return Err(match envelope.target {
                Some(ziel) => SessionError::UnknownTarget(ziel),
                None => SessionError::UnknownSession(session_id.clone()),
            });
        };

        match envelope.target.clone() {
            Some(ziel) => session.weiterleiten(absender, &ziel, envelope),
            None => {
                let peer = session
                    .peer(absender)
                    .ok_or_else(|| SessionError::UnknownPeer(absender.clone()))?;
                peer.signal_einreihen(envelope);
                Ok(())
            }
        }
    }

    /// Meldet ein nicht dekodierbares Envelope an den Peer des Absenders
    pub fn ungueltig_zustellen(
        &self,
        session_id: &SessionId,
        absender: &PeerId,
        fehler: ProtocolError,
    ) -> SessionResult<()> {
        let peer = self
            .holen(session_id)
            .and_then(|s| s.peer(absender))
            .ok_or_else(|| SessionError::UnknownPeer(absender.clone()))?;
        peer.ungueltig_einreihen(fehler);
        Ok(())
    }
}
