//! Push-Stream-Transport (Server-Sent-Events)
//!
//! Ablauf pro Peer:
//! 1. `POST /register/{sessionId}/{peerId}` laesst den Peer zu und legt seine Send-Queue an
//! 2. `GET /events/{sessionId}/{peerId}` liefert die Queue als SSE-Strom aus
//! 3. `POST /message/{sessionId}/{peerId}` nimmt Client-Envelopes entgegen
//!
//! Der Peer wird entfernt, sobald der SSE-Strom endet. Wird `/events` nicht
//! innerhalb der Registrierungsfrist geoeffnet, entfernt der Server den Peer.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use dashmap::DashMap;
use futures_util::Stream;
use lotse_core::{PeerId, PeerRole, SessionId, TransportKind};
use lotse_protocol::Envelope;
use lotse_session::{KanalEmpfaenger, PeerAnmeldung, PeerHandle, QueueChannel, SessionRegistry};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::{Instant, Interval};

use crate::error::{SignalingError, SignalingResult};
use crate::state::SignalingState;

// ---------------------------------------------------------------------------
// Ausstehende Registrierungen
// ---------------------------------------------------------------------------

struct Ausstehend {
    handle: Arc<PeerHandle>,
    empfaenger: KanalEmpfaenger,
}

/// Registrierte Peers deren `/events`-Strom noch nicht geoeffnet wurde
#[derive(Default)]
pub struct PushAnmeldungen {
    ausstehend: DashMap<(SessionId, PeerId), Ausstehend>,
}

impl PushAnmeldungen {
    fn vormerken(&self, session_id: SessionId, peer_id: PeerId, ausstehend: Ausstehend) {
        self.ausstehend.insert((session_id, peer_id), ausstehend);
    }

    fn abholen(&self, session_id: &SessionId, peer_id: &PeerId) -> Option<Ausstehend> {
        self.ausstehend
            .remove(&(session_id.clone(), peer_id.clone()))
            .map(|(_, a)| a)
    }

    /// Verwirft die Registrierung, sofern sie noch zu `handle` gehoert
    fn verwerfen(&self, session_id: &SessionId, peer_id: &PeerId, handle: &Arc<PeerHandle>) -> bool {
        self.ausstehend
            .remove_if(&(session_id.clone(), peer_id.clone()), |_, a| {
                Arc::ptr_eq(&a.handle, handle)
            })
            .is_some()
    }

    /// Anzahl registrierter Peers ohne geoeffneten Strom
    pub fn anzahl(&self) -> usize {
        self.ausstehend.len()
    }
}

// ---------------------------------------------------------------------------
// POST /register/{sessionId}/{peerId}
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrierungBody {
    #[serde(default)]
    pub client_type: Option<String>,
}

pub async fn registrieren(
    State(state): State<Arc<SignalingState>>,
    Path((session_id, peer_id)): Path<(String, String)>,
    body: Option<Json<RegistrierungBody>>,
) -> SignalingResult<Response> {
    let session_id = SessionId::neu(session_id);
    let peer_id = PeerId::neu(peer_id);
    let client_typ = body
        .and_then(|Json(b)| b.client_type)
        .unwrap_or_else(|| "browser".into());
    let role = PeerRole::aus_client_typ(&client_typ);

    let (kanal, empfaenger) = QueueChannel::neu(
        peer_id.clone(),
        TransportKind::PushStream,
        state.config.send_queue,
    );
    let aufnahme = state
        .registry
        .peer_anmelden(
            &session_id,
            PeerAnmeldung {
                peer_id: peer_id.clone(),
                role,
                kanal: Arc::new(kanal),
                offer_policy: state.config.push_offer_policy,
            },
        )
        .await?;

    let handle = Arc::clone(aufnahme.handle());
    state.push.vormerken(
        session_id.clone(),
        peer_id.clone(),
        Ausstehend {
            handle: Arc::clone(&handle),
            empfaenger,
        },
    );
    frist_ueberwachen(&state, session_id.clone(), peer_id.clone(), handle);

    tracing::info!(
        session_id = %session_id,
        peer_id = %peer_id,
        role = %role,
        client_type = %client_typ,
        "Push-Peer registriert"
    );
    Ok((StatusCode::OK, Json(json!({ "message": "Registered" }))).into_response())
}

/// Entfernt den Peer, falls `/events` nicht rechtzeitig geoeffnet wird
fn frist_ueberwachen(
    state: &Arc<SignalingState>,
    session_id: SessionId,
    peer_id: PeerId,
    handle: Arc<PeerHandle>,
) {
    let frist = state.config.registrierung_frist();
    if frist.is_zero() {
        return;
    }
    let state = Arc::clone(state);
    tokio::spawn(async move {
        tokio::time::sleep(frist).await;
        if state.push.verwerfen(&session_id, &peer_id, &handle) {
            tracing::warn!(
                session_id = %session_id,
                peer_id = %peer_id,
                "Push-Strom nicht geoeffnet - Peer wird entfernt"
            );
            state.registry.peer_trennen(&handle, Duration::ZERO);
        }
    });
}

// ---------------------------------------------------------------------------
// GET /events/{sessionId}/{peerId}
// ---------------------------------------------------------------------------

/// Entfernt den Peer sobald der SSE-Strom verworfen wird
struct StreamWaechter {
    registry: SessionRegistry,
    handle: Arc<PeerHandle>,
}

impl Drop for StreamWaechter {
    fn drop(&mut self) {
        tracing::info!(
            session_id = %self.handle.session_id(),
            peer_id = %self.handle.peer_id(),
            "Push-Strom geschlossen"
        );
        self.registry.peer_trennen(&self.handle, Duration::ZERO);
    }
}

struct PushStrom {
    empfaenger: KanalEmpfaenger,
    ping: Interval,
    /// Kanal wurde geschlossen; Queue wird noch geleert
    beendet: bool,
    _waechter: StreamWaechter,
}

pub async fn ereignisse(
    State(state): State<Arc<SignalingState>>,
    Path((session_id, peer_id)): Path<(String, String)>,
) -> SignalingResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let session_id = SessionId::neu(session_id);
    let peer_id = PeerId::neu(peer_id);

    let ausstehend = state
        .push
        .abholen(&session_id, &peer_id)
        .ok_or_else(|| SignalingError::NichtRegistriert {
            session_id: session_id.to_string(),
            peer_id: peer_id.to_string(),
        })?;

    tracing::info!(session_id = %session_id, peer_id = %peer_id, "Push-Strom geoeffnet");

    let keepalive = state.config.keepalive();
    let strom = PushStrom {
        empfaenger: ausstehend.empfaenger,
        ping: tokio::time::interval_at(Instant::now() + keepalive, keepalive),
        beendet: false,
        _waechter: StreamWaechter {
            registry: state.registry.clone(),
            handle: ausstehend.handle,
        },
    };

    Ok(Sse::new(futures_util::stream::unfold(strom, naechstes_ereignis)))
}

async fn naechstes_ereignis(
    mut strom: PushStrom,
) -> Option<(Result<Event, Infallible>, PushStrom)> {
    loop {
        let geschlossen = *strom.empfaenger.shutdown.borrow();
        if strom.beendet || geschlossen {
            strom.beendet = true;
            // Noch eingereihte Envelopes (z.B. `leave`) werden zugestellt
            return match strom.empfaenger.rx.try_recv() {
                Ok(envelope) => Some((Ok(envelope_ereignis(&envelope)), strom)),
                Err(_) => None,
            };
        }

        tokio::select! {
            biased;

            envelope = strom.empfaenger.rx.recv() => {
                return envelope.map(|e| (Ok(envelope_ereignis(&e)), strom));
            }

            _ = strom.ping.tick() => {
                return Some((Ok(ping_ereignis()), strom));
            }

            geaendert = strom.empfaenger.shutdown.changed() => {
                if geaendert.is_err() {
                    strom.beendet = true;
                }
            }
        }
    }
}

/// SSE-Event: Name ist der Envelope-Typ, Daten das vollstaendige Envelope
fn envelope_ereignis(envelope: &Envelope) -> Event {
    Event::default()
        .event(envelope.kind().as_str())
        .data(envelope.to_json())
}

fn ping_ereignis() -> Event {
    Event::default()
        .event("ping")
        .data(json!({ "time": Utc::now() }).to_string())
}

// ---------------------------------------------------------------------------
// POST /message/{sessionId}/{peerId}
// ---------------------------------------------------------------------------

pub async fn nachricht(
    State(state): State<Arc<SignalingState>>,
    Path((session_id, peer_id)): Path<(String, String)>,
    body: Result<Json<Value>, JsonRejection>,
) -> SignalingResult<Response> {
    let session_id = SessionId::neu(session_id);
    let peer_id = PeerId::neu(peer_id);
    let Json(body) = body.map_err(|e| SignalingError::UngueltigeAnfrage(e.body_text()))?;

    state.envelope_zustellen(&session_id, &peer_id, body)?;

    Ok((StatusCode::OK, Json(json!({ "message": "Message sent" }))).into_response())
}
