//! Fehlertypen fuer den Signaling-Service

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use lotse_auth::AuthError;
use lotse_protocol::ProtocolError;
use lotse_session::SessionError;
use serde_json::json;
use thiserror::Error;

/// Fehlertyp fuer den Signaling-Service
#[derive(Debug, Error)]
pub enum SignalingError {
    /// Credential fehlt, ist ungueltig oder abgelaufen
    #[error("Authentifizierungsfehler: {0}")]
    Auth(#[from] AuthError),

    /// Fehler aus Session- oder Peer-Verwaltung
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Envelope nicht dekodierbar
    #[error("Ungueltige Nachricht: {0}")]
    Protokoll(#[from] ProtocolError),

    /// Push-Stream ohne vorherige Registrierung
    #[error("Peer {peer_id} ist in Session {session_id} nicht registriert")]
    NichtRegistriert { session_id: String, peer_id: String },

    /// Fehlerhafte Anfrage (Body, Parameter)
    #[error("Ungueltige Anfrage: {0}")]
    UngueltigeAnfrage(String),

    /// Socket ohne Upgrade-Header angefragt
    #[error("WebSocket-Upgrade erwartet")]
    UpgradeErwartet,

    /// TURN-API nicht erreichbar oder fehlerhafte Antwort
    #[error("TURN-Dienst: {0}")]
    Turn(String),
}

impl SignalingError {
    /// HTTP-Statuscode fuer REST-Fehler
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Auth(AuthError::IdentitaetUnvollstaendig(_)) => 400,
            Self::Auth(AuthError::Signieren(_)) => 500,
            Self::Auth(_) => 401,
            Self::Session(e) => match e {
                SessionError::DuplicatePeer(_)
                | SessionError::RoleRejected(_)
                | SessionError::SessionClosed(_) => 409,
                SessionError::UnknownSession(_)
                | SessionError::UnknownPeer(_)
                | SessionError::UnknownTarget(_) => 404,
                SessionError::MediaNegotiation { .. } => 502,
                SessionError::TrackForward { .. } => 500,
                SessionError::Channel(_) => 503,
            },
            Self::Protokoll(_) | Self::UngueltigeAnfrage(_) => 400,
            Self::NichtRegistriert { .. } => 404,
            Self::UpgradeErwartet => 426,
            Self::Turn(_) => 502,
        }
    }

    /// Text fuer das `message`-Feld der JSON-Antwort
    pub fn nachricht(&self) -> String {
        match self {
            Self::Session(SessionError::UnknownTarget(_)) => "Target peer not found".into(),
            andere => andere.to_string(),
        }
    }
}

impl IntoResponse for SignalingError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::warn!(fehler = %self, status = status.as_u16(), "Anfrage fehlgeschlagen");
        } else {
            tracing::debug!(fehler = %self, status = status.as_u16(), "Anfrage abgelehnt");
        }
        (status, Json(json!({ "message": self.nachricht() }))).into_response()
    }
}

/// Result-Typ fuer den Signaling-Service
pub type SignalingResult<T> = Result<T, SignalingError>;
