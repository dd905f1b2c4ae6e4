//! lotse-server – Bibliotheks-Root
//!
//! Verdrahtet Konfiguration, Session-Registry, Signaling-Routen und
//! Health-Check zu einem lauffaehigen Server.

pub mod config;

use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use config::ServerConfig;
use lotse_auth::TokenService;
use lotse_observability::{health_router, timing_middleware, HealthState};
use lotse_session::{LoopbackEngine, MediaEngine, SessionRegistry};
use lotse_signaling::{router, HttpServer, HttpServerKonfig, SignalingState};

/// Fertig verdrahtete Anwendung (ohne Listener)
pub struct Aufbau {
    pub state: Arc<SignalingState>,
    pub health: HealthState,
    pub app: Router,
}

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Baut Registry, Signaling-State und Router auf
    ///
    /// Schlaegt fehl wenn kein Credential-Geheimnis konfiguriert ist.
    pub fn aufbauen(&self) -> Result<Aufbau> {
        let geheimnis = self.config.jwt_geheimnis()?;

        // Bis eine echte Media-Engine eingebunden ist, laeuft der Server als Relay
        let engine: Arc<dyn MediaEngine> = Arc::new(LoopbackEngine::neu());
        let registry = SessionRegistry::neu(self.config.registry_konfig(), engine);

        let state = SignalingState::neu(
            self.config.signaling_config(),
            registry.clone(),
            TokenService::neu(&geheimnis, self.config.auth.token_ttl_sek),
            self.config.turn.clone(),
        );

        let health = HealthState::neu(env!("CARGO_PKG_VERSION"), move || registry.anzahl_aktiv());

        let app = router(Arc::clone(&state))
            .merge(health_router(health.clone()))
            .layer(axum::middleware::from_fn(timing_middleware));

        Ok(Aufbau { state, health, app })
    }

    /// Startet den HTTP-Server und laeuft bis zum Shutdown-Signal
    ///
    /// Beim Shutdown werden zuerst alle Sessions geschlossen, damit offene
    /// SSE- und Socket-Verbindungen enden; danach nimmt der Server keine
    /// Verbindungen mehr an.
    pub async fn starten(self) -> Result<()> {
        let Aufbau { state, health, app } = self.aufbauen()?;
        let bind_addr = self.config.http_bind_adresse()?;

        tracing::info!(
            server_name = %self.config.server.name,
            http = %bind_addr,
            socket_pfad = %self.config.signaling.socket_pfad,
            routing = %self.config.signaling.routing,
            turn = state.turn.ist_konfiguriert(),
            "Server startet"
        );

        let registry = state.registry.clone();
        let shutdown = async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(fehler = %e, "Shutdown-Signal nicht abonnierbar");
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown-Signal empfangen, Sessions werden geschlossen");
            health.draining_setzen();
            let geschlossen = registry.alle_schliessen();
            tracing::info!(sessions = geschlossen, "Alle Sessions geschlossen");
        };

        HttpServer::neu(HttpServerKonfig {
            bind_addr,
            cors_origins: self.config.cors.origins.clone(),
        })
        .starten(app, shutdown)
        .await
    }
}
