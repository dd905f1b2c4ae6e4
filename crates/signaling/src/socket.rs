//! WebSocket-Transport
//!
//! Jeder Frame ist ein JSON-Objekt `{event, data, ackId?}`:
//! - Client -> Server: `message` (Envelope), `auth` (`{token}`), `pong`
//! - Server -> Client: `message` (Envelope), `ping` (`{timestamp}`)
//!
//! Das Credential kommt aus dem `token`-Header, dem `token`-Query-Parameter
//! oder dem ersten `auth`-Frame. Header und Query werden vor dem Upgrade
//! geprueft; ein ungueltiges Credential fuehrt zu 401 ohne Peer.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use lotse_auth::{AuthError, PeerIdentity};
use lotse_core::TransportKind;
use lotse_protocol::Envelope;
use lotse_session::{Aufnahme, PeerAnmeldung, QueueChannel};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{SignalingError, SignalingResult};
use crate::state::SignalingState;

/// Wartezeit auf den `auth`-Frame wenn weder Header noch Query ein Token tragen
const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    #[serde(default)]
    pub token: Option<String>,
}

/// Frame vom Client
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EingehenderFrame {
    event: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    ack_id: Option<Value>,
}

/// Grund fuer das Ende der Verbindungsschleife
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ende {
    /// Client hat getrennt oder Senden schlug fehl
    Client,
    /// Peer wurde serverseitig beendet
    Server,
}

/// Token aus `token`-Header oder `token`-Query-Parameter
pub fn token_aus_anfrage(headers: &HeaderMap, query: &TokenQuery) -> Option<String> {
    headers
        .get("token")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| query.token.clone())
        .filter(|t| !t.trim().is_empty())
}

// ---------------------------------------------------------------------------
// GET {socket_pfad}
// ---------------------------------------------------------------------------

pub async fn verbinden(
    State(state): State<Arc<SignalingState>>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    let identitaet = match token_aus_anfrage(&headers, &query) {
        Some(token) => match state.tokens.identitaet(&token) {
            Ok(identitaet) => Some(identitaet),
            Err(e) => {
                tracing::warn!(fehler = %e, "Socket-Credential abgelehnt");
                return SignalingError::from(e).into_response();
            }
        },
        None => None,
    };

    let Some(ws) = ws else {
        return SignalingError::UpgradeErwartet.into_response();
    };
    ws.on_upgrade(move |socket| verbindung(socket, state, identitaet))
}

async fn verbindung(socket: WebSocket, state: Arc<SignalingState>, identitaet: Option<PeerIdentity>) {
    let verbindung_id = Uuid::new_v4();
    let (mut ws_tx, mut ws_rx) = socket.split();

    let identitaet = match identitaet {
        Some(identitaet) => identitaet,
        None => match auth_abwarten(&mut ws_rx, &state).await {
            Ok((identitaet, ack)) => {
                if let Some(ack) = ack {
                    let _ = ws_tx.send(ack_frame(&ack)).await;
                }
                identitaet
            }
            Err(e) => {
                tracing::warn!(verbindung = %verbindung_id, fehler = %e, "Socket-Authentifizierung fehlgeschlagen");
                abweisen(&mut ws_tx, &e).await;
                return;
            }
        },
    };

    let (kanal, mut empfaenger) = QueueChannel::neu(
        identitaet.peer_id.clone(),
        TransportKind::Socket,
        state.config.send_queue,
    );
    let aufnahme = state
        .registry
        .peer_anmelden(
            &identitaet.session_id,
            PeerAnmeldung {
                peer_id: identitaet.peer_id.clone(),
                role: identitaet.role,
                kanal: Arc::new(kanal),
                offer_policy: state.config.offer_policy,
            },
        )
        .await;
    let aufnahme = match aufnahme {
        Ok(aufnahme) => aufnahme,
        Err(e) => {
            let e = SignalingError::from(e);
            tracing::warn!(
                verbindung = %verbindung_id,
                session_id = %identitaet.session_id,
                peer_id = %identitaet.peer_id,
                fehler = %e,
                "Socket-Peer nicht zugelassen"
            );
            abweisen(&mut ws_tx, &e).await;
            return;
        }
    };
    let handle = Arc::clone(aufnahme.handle());

    tracing::info!(
        verbindung = %verbindung_id,
        session_id = %identitaet.session_id,
        peer_id = %identitaet.peer_id,
        role = %identitaet.role,
        wiederverbunden = matches!(aufnahme, Aufnahme::Wiederverbunden(_)),
        "Socket-Peer verbunden"
    );

    let keepalive = state.config.keepalive();
    let mut ping = tokio::time::interval_at(Instant::now() + keepalive, keepalive);

    let ende = loop {
        tokio::select! {
            // Eingehender Frame vom Client
            eingehend = ws_rx.next() => {
                match eingehend {
                    Some(Ok(Message::Text(text))) => {
                        let antworten = frame_verarbeiten(&state, &identitaet, &text);
                        if let Err(e) = alle_senden(&mut ws_tx, antworten).await {
                            tracing::warn!(verbindung = %verbindung_id, fehler = %e, "Senden fehlgeschlagen");
                            break Ende::Client;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!(verbindung = %verbindung_id, peer_id = %identitaet.peer_id, "Socket vom Client getrennt");
                        break Ende::Client;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(verbindung = %verbindung_id, fehler = %e, "Socket-Lesefehler");
                        break Ende::Client;
                    }
                }
            }

            // Ausgehendes Envelope aus der Send-Queue
            Some(envelope) = empfaenger.rx.recv() => {
                if let Err(e) = ws_tx.send(nachricht_frame(&envelope)).await {
                    tracing::warn!(verbindung = %verbindung_id, fehler = %e, "Envelope-Senden fehlgeschlagen");
                    break Ende::Client;
                }
            }

            // Keepalive-Ping
            _ = ping.tick() => {
                if let Err(e) = ws_tx.send(ping_frame()).await {
                    tracing::warn!(verbindung = %verbindung_id, fehler = %e, "Ping-Senden fehlgeschlagen");
                    break Ende::Client;
                }
            }

            // Peer wurde serverseitig beendet
            geaendert = empfaenger.shutdown.changed() => {
                if geaendert.is_err() || *empfaenger.shutdown.borrow() {
                    break Ende::Server;
                }
            }
        }
    };

    match ende {
        Ende::Client => {
            state
                .registry
                .peer_trennen(&handle, state.config.reconnect_grace());
        }
        Ende::Server => {
            while let Ok(envelope) = empfaenger.rx.try_recv() {
                if ws_tx.send(nachricht_frame(&envelope)).await.is_err() {
                    break;
                }
            }
            let _ = ws_tx.send(Message::Close(None)).await;
        }
    }

    tracing::info!(verbindung = %verbindung_id, ende = ?ende, "Socket-Verbindung beendet");
}

/// Wartet auf den `auth`-Frame und prueft das enthaltene Credential
async fn auth_abwarten(
    ws_rx: &mut SplitStream<WebSocket>,
    state: &SignalingState,
) -> SignalingResult<(PeerIdentity, Option<Value>)> {
    let erstes = tokio::time::timeout(AUTH_TIMEOUT, ws_rx.next())
        .await
        .map_err(|_| AuthError::CredentialFehlt)?;
    let Some(Ok(Message::Text(text))) = erstes else {
        return Err(AuthError::CredentialFehlt.into());
    };

    let frame: EingehenderFrame =
        serde_json::from_str(&text).map_err(|_| AuthError::CredentialFehlt)?;
    if frame.event != "auth" {
        return Err(AuthError::CredentialFehlt.into());
    }
    let token = frame
        .data
        .get("token")
        .and_then(Value::as_str)
        .ok_or(AuthError::CredentialFehlt)?;

    let identitaet = state.tokens.identitaet(token)?;
    Ok((identitaet, frame.ack_id))
}

async fn abweisen(ws_tx: &mut SplitSink<WebSocket, Message>, fehler: &SignalingError) {
    let _ = ws_tx.send(fehler_frame(&fehler.nachricht())).await;
    let _ = ws_tx.send(Message::Close(None)).await;
}

async fn alle_senden(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    frames: Vec<Message>,
) -> Result<(), axum::Error> {
    for frame in frames {
        ws_tx.send(frame).await?;
    }
    Ok(())
}

/// Verarbeitet einen Text-Frame und liefert die direkten Antworten
///
/// Jeder Frame mit `ackId` wird quittiert; nicht verwertbare Frames
/// erhalten ein `error`-Envelope.
pub(crate) fn frame_verarbeiten(
    state: &SignalingState,
    identitaet: &PeerIdentity,
    text: &str,
) -> Vec<Message> {
    let frame: EingehenderFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => return vec![fehler_frame(&format!("Ungueltiger Frame: {e}"))],
    };

    let mut antworten = Vec::new();
    if let Some(ack) = &frame.ack_id {
        antworten.push(ack_frame(ack));
    }

    match frame.event.as_str() {
        "message" => {
            if let Err(e) =
                state.envelope_zustellen(&identitaet.session_id, &identitaet.peer_id, frame.data)
            {
                antworten.push(fehler_frame(&e.nachricht()));
            }
        }
        "auth" | "pong" => {}
        anderes => {
            antworten.push(fehler_frame(&format!("Unbekanntes Event: {anderes}")));
        }
    }
    antworten
}

// --- Frames ---

fn nachricht_frame(envelope: &Envelope) -> Message {
    Message::Text(json!({ "event": "message", "data": envelope.to_value() }).to_string())
}

fn ping_frame() -> Message {
    Message::Text(json!({ "event": "ping", "data": { "timestamp": Utc::now() } }).to_string())
}

fn ack_frame(ack_id: &Value) -> Message {
    Message::Text(json!({ "ack": ack_id, "message": "received" }).to_string())
}

fn fehler_frame(text: &str) -> Message {
    nachricht_frame(&Envelope::error(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use lotse_auth::TokenService;
    use lotse_core::{PeerId, PeerRole, SessionId};
    use lotse_session::{LoopbackEngine, RegistryKonfig, SessionRegistry};

    use crate::state::SignalingConfig;
    use crate::turn::TurnKonfig;

    fn text(frame: &Message) -> Value {
        match frame {
            Message::Text(t) => serde_json::from_str(t).unwrap(),
            anderes => panic!("Text-Frame erwartet, erhalten: {anderes:?}"),
        }
    }

    fn state() -> Arc<SignalingState> {
        SignalingState::neu(
            SignalingConfig::default(),
            SessionRegistry::neu(RegistryKonfig::default(), Arc::new(LoopbackEngine::neu())),
            TokenService::neu("geheim", 60),
            TurnKonfig::default(),
        )
    }

    fn identitaet(peer: &str) -> PeerIdentity {
        PeerIdentity {
            session_id: SessionId::neu("s1"),
            peer_id: PeerId::neu(peer),
            role: PeerRole::WebClient,
        }
    }

    #[test]
    fn token_header_vor_query() {
        let mut headers = HeaderMap::new();
        let query = TokenQuery {
            token: Some("aus-query".into()),
        };
        assert_eq!(token_aus_anfrage(&headers, &query).as_deref(), Some("aus-query"));

        headers.insert("token", HeaderValue::from_static("aus-header"));
        assert_eq!(token_aus_anfrage(&headers, &query).as_deref(), Some("aus-header"));

        assert_eq!(
            token_aus_anfrage(&HeaderMap::new(), &TokenQuery { token: Some("  ".into()) }),
            None
        );
    }

    #[tokio::test]
    async fn test_kaputter_frame_ergibt_error_envelope() {
        let state = state();
        let antworten = frame_verarbeiten(&state, &identitaet("p1"), "{kein json");
        assert_eq!(antworten.len(), 1);
        let json = text(&antworten[0]);
        assert_eq!(json["event"], "message");
        assert_eq!(json["data"]["type"], "error");
    }

    #[tokio::test]
    async fn test_ack_und_unbekanntes_ziel() {
        let state = state();
        let (kanal, _empfaenger) = QueueChannel::neu(PeerId::neu("p1"), TransportKind::Socket, 8);
        state
            .registry
            .peer_anmelden(
                &SessionId::neu("s1"),
                PeerAnmeldung {
                    peer_id: PeerId::neu("p1"),
                    role: PeerRole::WebClient,
                    kanal: Arc::new(kanal),
                    offer_policy: lotse_session::OfferPolicy::Peer,
                },
            )
            .await
            .unwrap();

        let frame = json!({
            "event": "message",
            "ackId": 7,
            "data": { "type": "offer", "payload": { "type": "offer", "sdp": "v=0" }, "target": "geist" }
        });
        let antworten = frame_verarbeiten(&state, &identitaet("p1"), &frame.to_string());
        assert_eq!(antworten.len(), 2);
        assert_eq!(text(&antworten[0]), json!({ "ack": 7, "message": "received" }));
        let fehler = text(&antworten[1]);
        assert_eq!(fehler["data"]["type"], "error");
        assert_eq!(fehler["data"]["payload"]["message"], "Target peer not found");
    }

    #[tokio::test]
    async fn test_unbekanntes_event() {
        let state = state();
        let antworten =
            frame_verarbeiten(&state, &identitaet("p1"), r#"{"event":"tanzen","ackId":"a"}"#);
        assert_eq!(antworten.len(), 2);
        assert_eq!(text(&antworten[0])["ack"], "a");
        assert_eq!(text(&antworten[1])["data"]["type"], "error");
    }
}
