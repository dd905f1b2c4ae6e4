//! Health-Check-Endpunkt
//!
//! Endpoint: `GET /health`
//! Response: JSON mit Status, Version, Uptime und Anzahl aktiver Sessions

use axum::{extract::State, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Status des Health-Checks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Draining,
}

/// Antwort des Health-Check-Endpunkts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub active_sessions: usize,
}

type Zaehler = Arc<dyn Fn() -> usize + Send + Sync>;

/// Geteilter Zustand fuer den Health-Check-Handler
#[derive(Clone)]
pub struct HealthState {
    start_time: Instant,
    version: &'static str,
    aktive_sessions: Zaehler,
    draining: Arc<std::sync::atomic::AtomicBool>,
}

impl HealthState {
    /// `aktive_sessions` wird bei jeder Anfrage neu ausgewertet
    pub fn neu(version: &'static str, aktive_sessions: impl Fn() -> usize + Send + Sync + 'static) -> Self {
        Self {
            start_time: Instant::now(),
            version,
            aktive_sessions: Arc::new(aktive_sessions),
            draining: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Markiert den Server als herunterfahrend
    pub fn draining_setzen(&self) {
        self.draining
            .store(true, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn antwort(&self) -> HealthResponse {
        let status = if self.draining.load(std::sync::atomic::Ordering::Relaxed) {
            HealthStatus::Draining
        } else {
            HealthStatus::Healthy
        };
        HealthResponse {
            status,
            version: self.version.to_string(),
            uptime_seconds: self.uptime_seconds(),
            active_sessions: (self.aktive_sessions)(),
        }
    }
}

/// Axum-Router fuer den `/health`-Endpunkt
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
}

/// `GET /health` – gibt den Serverstatus zurueck
async fn health_handler(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(state.antwort())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    #[test]
    fn zaehler_wird_live_gelesen() {
        let zaehler = Arc::new(AtomicUsize::new(0));
        let z = Arc::clone(&zaehler);
        let state = HealthState::neu("0.1.0", move || z.load(Ordering::Relaxed));

        assert_eq!(state.antwort().active_sessions, 0);
        zaehler.store(3, Ordering::Relaxed);
        assert_eq!(state.antwort().active_sessions, 3);
        assert!(state.uptime_seconds() < 5);
    }

    #[test]
    fn draining_status() {
        let state = HealthState::neu("0.1.0", || 0);
        assert_eq!(state.antwort().status, HealthStatus::Healthy);
        state.draining_setzen();
        assert_eq!(state.antwort().status, HealthStatus::Draining);
    }

    #[tokio::test]
    async fn health_endpunkt_json() {
        let app = health_router(HealthState::neu("9.9.9", || 2));
        let antwort = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(antwort.status(), StatusCode::OK);

        let bytes = antwort.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["version"], "9.9.9");
        assert_eq!(json["activeSessions"], 2);
    }
}
