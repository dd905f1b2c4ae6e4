//! Route-Definitionen und die zustandslosen REST-Handler

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use lotse_auth::CredentialAnfrage;

use crate::error::{SignalingError, SignalingResult};
use crate::state::SignalingState;
use crate::{push, socket};

/// Erstellt den vollstaendigen Signaling-Router
pub fn router(state: Arc<SignalingState>) -> Router {
    let socket_pfad = state.config.socket_pfad.clone();
    Router::new()
        // Push-Stream
        .route("/register/:session_id/:peer_id", post(push::registrieren))
        .route("/events/:session_id/:peer_id", get(push::ereignisse))
        .route("/message/:session_id/:peer_id", post(push::nachricht))
        // Socket
        .route(&socket_pfad, get(socket::verbinden))
        // Hilfsdienste
        .route("/iceServers", get(ice_server))
        .route("/token", post(token_ausstellen))
        .route("/sessions", get(sessions_auflisten))
        .with_state(state)
}

/// POST /token – stellt ein signiertes Session-Credential aus
async fn token_ausstellen(
    State(state): State<Arc<SignalingState>>,
    body: Result<Json<CredentialAnfrage>, JsonRejection>,
) -> SignalingResult<Response> {
    let Json(anfrage) = body.map_err(|e| SignalingError::UngueltigeAnfrage(e.body_text()))?;
    let credential = state.tokens.ausstellen(anfrage)?;
    Ok((StatusCode::OK, Json(credential)).into_response())
}

/// GET /iceServers – STUN/TURN-Server fuer den Client
async fn ice_server(State(state): State<Arc<SignalingState>>) -> SignalingResult<Response> {
    let server = state.turn.ice_server().await?;
    Ok((StatusCode::OK, Json(server)).into_response())
}

/// GET /sessions – aktive und zuletzt geschlossene Sessions
async fn sessions_auflisten(State(state): State<Arc<SignalingState>>) -> Response {
    (StatusCode::OK, Json(state.registry.auflisten())).into_response()
}
