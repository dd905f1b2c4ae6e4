//! ICE-Server-Proxy fuer `GET /iceServers`
//!
//! Fordert kurzlebige TURN-Credentials bei der Cloudflare-TURN-API an.
//! Ohne konfigurierte Schluessel werden die statischen Fallback-Server
//! ausgeliefert.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SignalingError, SignalingResult};

const STANDARD_API_BASIS: &str = "https://rtc.live.cloudflare.com";
const ANFRAGE_TIMEOUT: Duration = Duration::from_secs(10);

/// URL-Angabe eines ICE-Servers (einzeln oder als Liste)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IceUrls {
    Eine(String),
    Mehrere(Vec<String>),
}

/// Ein Eintrag der `iceServers`-Liste
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: IceUrls,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    /// STUN-Server ohne Credentials
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: IceUrls::Eine(url.into()),
            username: None,
            credential: None,
        }
    }
}

/// Konfiguration des TURN-Proxys
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnKonfig {
    pub key_id: Option<String>,
    pub api_token: Option<String>,
    /// Lebensdauer der angeforderten Credentials
    pub ttl_sek: u64,
    pub api_basis: String,
    pub fallback_ice_servers: Vec<IceServer>,
}

impl Default for TurnKonfig {
    fn default() -> Self {
        Self {
            key_id: None,
            api_token: None,
            ttl_sek: 86_400,
            api_basis: STANDARD_API_BASIS.into(),
            fallback_ice_servers: vec![IceServer::stun("stun:stun.cloudflare.com:3478")],
        }
    }
}

#[derive(Debug, Serialize)]
struct CredentialAnfrage {
    ttl: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialAntwort {
    ice_servers: Vec<IceServer>,
}

/// HTTP-Client fuer die TURN-API
#[derive(Debug, Clone)]
pub struct TurnClient {
    http: reqwest::Client,
    konfig: TurnKonfig,
}

impl TurnClient {
    pub fn neu(konfig: TurnKonfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(ANFRAGE_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(fehler = %e, "HTTP-Client mit Timeout nicht erstellbar - nutze Standard");
                reqwest::Client::new()
            });
        Self { http, konfig }
    }

    /// Ob Schluessel fuer die TURN-API hinterlegt sind
    pub fn ist_konfiguriert(&self) -> bool {
        let gesetzt = |w: &Option<String>| w.as_deref().is_some_and(|s| !s.trim().is_empty());
        gesetzt(&self.konfig.key_id) && gesetzt(&self.konfig.api_token)
    }

    /// Liefert die ICE-Server fuer einen Client
    pub async fn ice_server(&self) -> SignalingResult<Vec<IceServer>> {
        let (Some(key_id), Some(api_token)) = (&self.konfig.key_id, &self.konfig.api_token) else {
            return Ok(self.konfig.fallback_ice_servers.clone());
        };
        if !self.ist_konfiguriert() {
            return Ok(self.konfig.fallback_ice_servers.clone());
        }

        let url = format!(
            "{}/v1/turn/keys/{}/credentials/generate",
            self.konfig.api_basis.trim_end_matches('/'),
            key_id
        );

        let antwort = self
            .http
            .post(&url)
            .bearer_auth(api_token)
            .json(&CredentialAnfrage {
                ttl: self.konfig.ttl_sek,
            })
            .send()
            .await
            .map_err(|e| SignalingError::Turn(e.to_string()))?;

        let status = antwort.status();
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "TURN-API lehnt Anfrage ab");
            return Err(SignalingError::Turn(format!("Status {}", status.as_u16())));
        }

        let daten: CredentialAntwort = antwort
            .json()
            .await
            .map_err(|e| SignalingError::Turn(format!("Antwort nicht lesbar: {e}")))?;

        tracing::debug!(anzahl = daten.ice_servers.len(), "TURN-Credentials erhalten");
        Ok(daten.ice_servers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ice_server_serialisierung() {
        let server = IceServer {
            urls: IceUrls::Mehrere(vec!["turn:turn.example:3478?transport=udp".into()]),
            username: Some("u".into()),
            credential: Some("c".into()),
        };
        let json = serde_json::to_value(&server).unwrap();
        assert!(json["urls"].is_array());
        assert_eq!(json["username"], "u");

        let stun = serde_json::to_value(IceServer::stun("stun:a")).unwrap();
        assert_eq!(stun["urls"], "stun:a");
        assert!(stun.get("username").is_none());
    }

    #[test]
    fn cloudflare_antwort_parsen() {
        let roh = r#"{"iceServers":[{"urls":["stun:stun.cloudflare.com:3478"]},
            {"urls":"turn:turn.cloudflare.com:3478","username":"x","credential":"y"}]}"#;
        let antwort: CredentialAntwort = serde_json::from_str(roh).unwrap();
        assert_eq!(antwort.ice_servers.len(), 2);
        assert_eq!(antwort.ice_servers[1].username.as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn test_ohne_schluessel_fallback() {
        let client = TurnClient::neu(TurnKonfig::default());
        assert!(!client.ist_konfiguriert());
        let server = client.ice_server().await.unwrap();
        assert_eq!(server, TurnKonfig::default().fallback_ice_servers);
    }

    #[tokio::test]
    async fn test_leere_schluessel_fallback() {
        let client = TurnClient::neu(TurnKonfig {
            key_id: Some(" ".into()),
            api_token: Some("token".into()),
            ..TurnKonfig::default()
        });
        assert!(!client.ist_konfiguriert());
        assert!(client.ice_server().await.is_ok());
    }

    #[tokio::test]
    async fn test_api_nicht_erreichbar() {
        let client = TurnClient::neu(TurnKonfig {
            key_id: Some("key".into()),
            api_token: Some("token".into()),
            api_basis: "http://127.0.0.1:1".into(),
            ..TurnKonfig::default()
        });
        let fehler = client.ice_server().await.unwrap_err();
        assert_eq!(fehler.http_status(), 502);
    }
}
