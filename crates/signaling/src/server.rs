//! Axum HTTP-Server fuer Signaling, Push-Stream und Socket

use std::future::Future;
use std::net::SocketAddr;

use anyhow::Result;
use axum::http::{HeaderValue, Method};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// HTTP-Server-Konfiguration
#[derive(Debug, Clone)]
pub struct HttpServerKonfig {
    pub bind_addr: SocketAddr,
    /// Erlaubte CORS-Origins. Leer = alle Origins erlaubt.
    pub cors_origins: Vec<String>,
}

/// CORS-Layer: entweder spezifische Origins oder alle
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any)
}

pub struct HttpServer {
    konfig: HttpServerKonfig,
}

impl HttpServer {
    pub fn neu(konfig: HttpServerKonfig) -> Self {
        Self { konfig }
    }

    /// Bedient `app` bis `shutdown` abgeschlossen ist
    pub async fn starten<F>(self, app: Router, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = app
            .layer(TraceLayer::new_for_http())
            .layer(cors_layer(&self.konfig.cors_origins));

        let listener = tokio::net::TcpListener::bind(self.konfig.bind_addr).await?;
        tracing::info!(addr = %self.konfig.bind_addr, "HTTP-Server gestartet");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("HTTP-Server beendet");
        Ok(())
    }
}
