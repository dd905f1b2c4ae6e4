//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte; einzig das Credential-Geheimnis muss per
//! Datei oder `LOTSE_JWT_SECRET` gesetzt sein.

use std::net::SocketAddr;

use anyhow::{anyhow, bail};
use lotse_auth::STANDARD_TTL_SEK;
use lotse_session::{OfferPolicy, RegistryKonfig, RoutingPolicy};
use lotse_signaling::{SignalingConfig, TurnKonfig};
use serde::{Deserialize, Serialize};

/// Umgebungsvariable die `[auth] secret` ueberschreibt
pub const ENV_JWT_SECRET: &str = "LOTSE_JWT_SECRET";

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Allgemeine Server-Einstellungen
    pub server: ServerEinstellungen,
    /// Netzwerk-Einstellungen
    pub netzwerk: NetzwerkEinstellungen,
    /// Sessions, Transporte und Aushandlung
    pub signaling: SignalingEinstellungen,
    /// Credential-Ausstellung und -Pruefung
    pub auth: AuthEinstellungen,
    /// TURN-Proxy fuer `/iceServers`
    pub turn: TurnKonfig,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
    /// CORS fuer alle HTTP-Routen
    pub cors: CorsEinstellungen,
}

/// Allgemeine Server-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEinstellungen {
    /// Anzeigename des Servers (nur fuer Logs)
    pub name: String,
}

impl Default for ServerEinstellungen {
    fn default() -> Self {
        Self {
            name: "Lotse".into(),
        }
    }
}

/// Netzwerk-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    pub bind_adresse: String,
    /// Port fuer HTTP, SSE und WebSocket
    pub http_port: u16,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".into(),
            http_port: 3478,
        }
    }
}

/// Signaling-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingEinstellungen {
    pub keepalive_sek: u64,
    /// Offer-Initiator fuer Socket-Peers
    pub offer_policy: OfferPolicy,
    /// Offer-Initiator fuer Push-Stream-Peers
    pub push_offer_policy: OfferPolicy,
    pub routing: RoutingPolicy,
    /// Karenzzeit nach Socket-Abbruch (0 = sofort entfernen)
    pub reconnect_grace_sek: u64,
    /// Anzahl geschlossener Sessions in `/sessions`
    pub retired_history: usize,
    pub send_queue: usize,
    pub socket_pfad: String,
    pub registrierung_frist_sek: u64,
}

impl Default for SignalingEinstellungen {
    fn default() -> Self {
        let signaling = SignalingConfig::default();
        let registry = RegistryKonfig::default();
        Self {
            keepalive_sek: signaling.keepalive_sek,
            offer_policy: signaling.offer_policy,
            push_offer_policy: signaling.push_offer_policy,
            routing: registry.routing,
            reconnect_grace_sek: signaling.reconnect_grace_sek,
            retired_history: registry.retired_history,
            send_queue: signaling.send_queue,
            socket_pfad: signaling.socket_pfad,
            registrierung_frist_sek: signaling.registrierung_frist_sek,
        }
    }
}

/// Credential-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthEinstellungen {
    /// HS256-Geheimnis (wird von `LOTSE_JWT_SECRET` ueberschrieben)
    pub secret: Option<String>,
    /// Lebensdauer ausgestellter Credentials
    pub token_ttl_sek: u64,
}

impl Default for AuthEinstellungen {
    fn default() -> Self {
        Self {
            secret: None,
            token_ttl_sek: STANDARD_TTL_SEK,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level bzw. Filter-Ausdruck
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// CORS-Einstellungen
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsEinstellungen {
    /// Erlaubte Origins (leer = alle erlaubt)
    pub origins: Vec<String>,
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        let config = match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                config
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Self::default()
            }
            Err(e) => return Err(anyhow!("Konfigurationsdatei '{pfad}' nicht lesbar: {e}")),
        };
        config.pruefen()?;
        Ok(config)
    }

    /// Prueft Werte die serde allein nicht abdeckt
    pub fn pruefen(&self) -> anyhow::Result<()> {
        if !self.signaling.socket_pfad.starts_with('/') {
            bail!(
                "signaling.socket_pfad muss mit '/' beginnen: '{}'",
                self.signaling.socket_pfad
            );
        }
        if self.signaling.send_queue == 0 {
            bail!("signaling.send_queue muss groesser als 0 sein");
        }
        if self.auth.token_ttl_sek == 0 {
            bail!("auth.token_ttl_sek muss groesser als 0 sein");
        }
        Ok(())
    }

    /// Bind-Adresse fuer den HTTP-Server
    pub fn http_bind_adresse(&self) -> anyhow::Result<SocketAddr> {
        let adresse = format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.http_port);
        adresse
            .parse()
            .map_err(|e| anyhow!("Ungueltige Bind-Adresse '{adresse}': {e}"))
    }

    /// Credential-Geheimnis; die Umgebungsvariable hat Vorrang
    pub fn jwt_geheimnis(&self) -> anyhow::Result<String> {
        geheimnis_aufloesen(std::env::var(ENV_JWT_SECRET).ok(), self.auth.secret.clone())
    }

    pub fn signaling_config(&self) -> SignalingConfig {
        SignalingConfig {
            keepalive_sek: self.signaling.keepalive_sek,
            offer_policy: self.signaling.offer_policy,
            push_offer_policy: self.signaling.push_offer_policy,
            reconnect_grace_sek: self.signaling.reconnect_grace_sek,
            send_queue: self.signaling.send_queue,
            socket_pfad: self.signaling.socket_pfad.clone(),
            registrierung_frist_sek: self.signaling.registrierung_frist_sek,
        }
    }

    pub fn registry_konfig(&self) -> RegistryKonfig {
        RegistryKonfig {
            routing: self.signaling.routing,
            retired_history: self.signaling.retired_history,
        }
    }
}

fn geheimnis_aufloesen(env: Option<String>, datei: Option<String>) -> anyhow::Result<String> {
    env.into_iter()
        .chain(datei)
        .find(|g| !g.trim().is_empty())
        .ok_or_else(|| {
            anyhow!("Kein Credential-Geheimnis: [auth] secret oder {ENV_JWT_SECRET} setzen")
        })
}
