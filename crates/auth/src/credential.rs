//! Credential-Inhalt und daraus abgeleitete Peer-Identitaet
//!
//! Ein Credential bindet einen Client an genau eine Session
//! (`requestStreamId`). Die Peer-ID wird deterministisch aus den
//! Identitaetsfeldern gebildet:
//!
//! ```text
//! <clientId>-<fleetId>-<deviceId | userId>
//! ```
//!
//! Ist `deviceId` gesetzt, verbindet sich ein Geraet, sonst ein Browser.

use lotse_core::{PeerId, PeerRole, SessionId};
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, AuthResult};

/// Claims eines Session-Credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamClaims {
    pub request_stream_id: String,
    pub client_id: String,
    pub fleet_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Ausstellungszeitpunkt (Unix-Sekunden)
    pub iat: i64,
    /// Ablaufzeitpunkt (Unix-Sekunden)
    pub exp: i64,
}

/// Eingabe fuer `POST /token`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialAnfrage {
    #[serde(default)]
    pub request_stream_id: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub fleet_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
}

impl CredentialAnfrage {
    /// Prueft ob alle Pflichtfelder gesetzt sind
    pub fn validieren(&self) -> AuthResult<()> {
        if self.request_stream_id.trim().is_empty() {
            return Err(AuthError::IdentitaetUnvollstaendig("requestStreamId"));
        }
        if self.client_id.trim().is_empty() {
            return Err(AuthError::IdentitaetUnvollstaendig("clientId"));
        }
        if self.fleet_id.trim().is_empty() {
            return Err(AuthError::IdentitaetUnvollstaendig("fleetId"));
        }
        if leer(&self.device_id) && leer(&self.user_id) {
            return Err(AuthError::IdentitaetUnvollstaendig("deviceId/userId"));
        }
        Ok(())
    }
}

fn leer(feld: &Option<String>) -> bool {
    feld.as_deref().map(str::trim).unwrap_or_default().is_empty()
}

/// Aus einem geprueften Credential abgeleitete Identitaet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    pub session_id: SessionId,
    pub peer_id: PeerId,
    pub role: PeerRole,
}

impl PeerIdentity {
    /// Leitet Session, Peer-ID und Rolle aus den Claims ab
    pub fn aus_claims(claims: &StreamClaims) -> AuthResult<Self> {
        if claims.request_stream_id.trim().is_empty() {
            return Err(AuthError::IdentitaetUnvollstaendig("requestStreamId"));
        }

        let (suffix, role) = match (&claims.device_id, &claims.user_id) {
            (Some(device), _) if !device.trim().is_empty() => (device, PeerRole::Device),
            (_, Some(user)) if !user.trim().is_empty() => (user, PeerRole::WebClient),
            _ => return Err(AuthError::IdentitaetUnvollstaendig("deviceId/userId")),
        };

        Ok(Self {
            session_id: SessionId::neu(claims.request_stream_id.clone()),
            peer_id: PeerId::neu(format!(
                "{}-{}-{}",
                claims.client_id, claims.fleet_id, suffix
            )),
            role,
        })
    }
}
