//! Ausstellung und Pruefung signierter Session-Credentials (HS256)

use std::sync::Arc;

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::Serialize;

use crate::credential::{CredentialAnfrage, PeerIdentity, StreamClaims};
use crate::error::{AuthError, AuthResult};

/// Standard-Gueltigkeit eines Credentials (24 Stunden)
pub const STANDARD_TTL_SEK: u64 = 86_400;

/// Ergebnis von `POST /token`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AusgestelltesCredential {
    pub token: String,
    pub expires_in: u64,
}

/// Stellt Credentials aus und prueft sie
///
/// Guenstig zu klonen; Schluessel liegen hinter einem `Arc`.
#[derive(Clone)]
pub struct TokenService {
    inner: Arc<TokenServiceInner>,
}

struct TokenServiceInner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl_sek: u64,
}

impl TokenService {
    /// Erstellt den Service mit einem gemeinsamen Geheimnis
    pub fn neu(geheimnis: &str, ttl_sek: u64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            inner: Arc::new(TokenServiceInner {
                encoding: EncodingKey::from_secret(geheimnis.as_bytes()),
                decoding: DecodingKey::from_secret(geheimnis.as_bytes()),
                validation,
                ttl_sek,
            }),
        }
    }

    pub fn ttl_sek(&self) -> u64 {
        self.inner.ttl_sek
    }

    /// Stellt ein Credential fuer die angefragte Identitaet aus
    pub fn ausstellen(&self, anfrage: CredentialAnfrage) -> AuthResult<AusgestelltesCredential> {
        anfrage.validieren()?;

        let jetzt = Utc::now().timestamp();
        let claims = StreamClaims {
            request_stream_id: anfrage.request_stream_id,
            client_id: anfrage.client_id,
            fleet_id: anfrage.fleet_id,
            user_id: anfrage.user_id.filter(|u| !u.trim().is_empty()),
            device_id: anfrage.device_id.filter(|d| !d.trim().is_empty()),
            iat: jetzt,
            exp: jetzt + self.inner.ttl_sek as i64,
        };

        let token = self.signieren(&claims)?;
        tracing::debug!(
            stream = %claims.request_stream_id,
            client = %claims.client_id,
            "Credential ausgestellt"
        );

        Ok(AusgestelltesCredential {
            token,
            expires_in: self.inner.ttl_sek,
        })
    }

    /// Signiert beliebige Claims mit dem Service-Schluessel
    pub fn signieren(&self, claims: &StreamClaims) -> AuthResult<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.inner.encoding)
            .map_err(|e| AuthError::Signieren(e.to_string()))
    }

    /// Prueft Signatur und Ablauf und gibt die Claims zurueck
    pub fn pruefen(&self, token: &str) -> AuthResult<StreamClaims> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::CredentialFehlt);
        }
        let daten = decode::<StreamClaims>(token, &self.inner.decoding, &self.inner.validation)?;
        Ok(daten.claims)
    }

    /// Prueft das Credential und leitet die Peer-Identitaet ab
    pub fn identitaet(&self, token: &str) -> AuthResult<PeerIdentity> {
        let claims = self.pruefen(token)?;
        PeerIdentity::aus_claims(&claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lotse_core::PeerRole;

    fn anfrage() -> CredentialAnfrage {
        CredentialAnfrage {
            request_stream_id: "stream-1".into(),
            client_id: "acme".into(),
            fleet_id: "sued".into(),
            user_id: Some("anna".into()),
            device_id: None,
        }
    }

    #[test]
    fn ausgestelltes_credential_ergibt_identitaet() {
        let service = TokenService::neu("geheim", STANDARD_TTL_SEK);
        let ausgestellt = service.ausstellen(anfrage()).unwrap();
        assert_eq!(ausgestellt.expires_in, STANDARD_TTL_SEK);

        let id = service.identitaet(&ausgestellt.token).unwrap();
        assert_eq!(id.session_id.as_str(), "stream-1");
        assert_eq!(id.peer_id.as_str(), "acme-sued-anna");
        assert_eq!(id.role, PeerRole::WebClient);
    }

    #[test]
    fn abgelaufenes_credential_abgelehnt() {
        let service = TokenService::neu("geheim", STANDARD_TTL_SEK);
        let jetzt = Utc::now().timestamp();
        let token = service
            .signieren(&StreamClaims {
                request_stream_id: "s".into(),
                client_id: "c".into(),
                fleet_id: "f".into(),
                user_id: Some("u".into()),
                device_id: None,
                iat: jetzt - 7200,
                exp: jetzt - 3600,
            })
            .unwrap();

        assert!(matches!(
            service.identitaet(&token),
            Err(AuthError::CredentialAbgelaufen)
        ));
    }

    #[test]
    fn fremde_signatur_abgelehnt() {
        let fremd = TokenService::neu("anderes-geheimnis", STANDARD_TTL_SEK);
        let token = fremd.ausstellen(anfrage()).unwrap().token;

        let service = TokenService::neu("geheim", STANDARD_TTL_SEK);
        assert!(matches!(
            service.pruefen(&token),
            Err(AuthError::CredentialUngueltig(_))
        ));
    }

    #[test]
    fn leeres_token_fehlt() {
        let service = TokenService::neu("geheim", STANDARD_TTL_SEK);
        assert!(matches!(service.pruefen("  "), Err(AuthError::CredentialFehlt)));
    }

    #[test]
    fn unvollstaendige_anfrage_wird_nicht_signiert() {
        let service = TokenService::neu("geheim", STANDARD_TTL_SEK);
        let mut a = anfrage();
        a.user_id = None;
        assert!(matches!(
            service.ausstellen(a),
            Err(AuthError::IdentitaetUnvollstaendig(_))
        ));
    }
}
