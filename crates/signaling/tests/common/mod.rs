//! Gemeinsame Hilfen fuer die Integration-Tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use lotse_auth::{CredentialAnfrage, TokenService};
use lotse_session::{LoopbackEngine, RegistryKonfig, SessionRegistry};
use lotse_signaling::{router, SignalingConfig, SignalingState, TurnKonfig};
use serde_json::Value;
use tower::ServiceExt;

pub const GEHEIMNIS: &str = "test-geheimnis";
pub const WARTEZEIT: Duration = Duration::from_secs(2);

pub fn state_mit(config: SignalingConfig) -> Arc<SignalingState> {
    SignalingState::neu(
        config,
        SessionRegistry::neu(RegistryKonfig::default(), Arc::new(LoopbackEngine::neu())),
        TokenService::neu(GEHEIMNIS, 3600),
        TurnKonfig::default(),
    )
}

pub fn app() -> (Arc<SignalingState>, Router) {
    let state = state_mit(SignalingConfig::default());
    let app = router(Arc::clone(&state));
    (state, app)
}

pub fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

/// Sendet die Anfrage und liest den Body als JSON
pub async fn json_anfrage(app: &Router, anfrage: Request<Body>) -> (StatusCode, Value) {
    let antwort = app.clone().oneshot(anfrage).await.unwrap();
    let status = antwort.status();
    let bytes = antwort.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

/// Liest SSE-Daten bis `muster` enthalten ist
pub async fn sse_lesen_bis(body: &mut Body, muster: &str) -> String {
    let mut puffer = String::new();
    tokio::time::timeout(WARTEZEIT, async {
        while !puffer.contains(muster) {
            let frame = body
                .frame()
                .await
                .expect("SSE-Strom beendet")
                .expect("SSE-Lesefehler");
            if let Ok(daten) = frame.into_data() {
                puffer.push_str(&String::from_utf8_lossy(&daten));
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("'{muster}' nicht im SSE-Strom"));
    puffer
}

pub fn token(state: &SignalingState, stream: &str, user: &str) -> String {
    state
        .tokens
        .ausstellen(CredentialAnfrage {
            request_stream_id: stream.into(),
            client_id: "acme".into(),
            fleet_id: "sued".into(),
            user_id: Some(user.into()),
            device_id: None,
        })
        .unwrap()
        .token
}

/// Wartet bis `bedingung` erfuellt ist
pub async fn warten_bis(mut bedingung: impl FnMut() -> bool) {
    tokio::time::timeout(WARTEZEIT, async {
        while !bedingung() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Bedingung nicht rechtzeitig erfuellt");
}
