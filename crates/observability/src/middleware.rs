//! Request-Timing Middleware fuer Axum
//!
//! Misst die Antwortzeit jeder HTTP-Anfrage und protokolliert sie als
//! strukturiertes Log-Event. Server-Fehler werden als `warn` geloggt,
//! Health-Probes nur auf `debug`.

use axum::{
    body::Body,
    http::{Request, Response},
    middleware::Next,
};
use std::time::Instant;

/// Axum-Middleware-Funktion: misst Antwortzeit und loggt strukturiert.
///
/// Verwendung:
/// ```ignore
/// Router::new()
///     .route("/", get(handler))
///     .layer(axum::middleware::from_fn(timing_middleware))
/// ```
pub async fn timing_middleware(req: Request<Body>, next: Next) -> Response<Body> {
    let methode = req.method().clone();
    let pfad = req.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(req).await;

    let dauer_ms = start.elapsed().as_millis() as u64;
    let status = response.status();

    if status.is_server_error() {
        tracing::warn!(method = %methode, path = %pfad, status = status.as_u16(), duration_ms = dauer_ms, "HTTP-Anfrage fehlgeschlagen");
    } else if pfad == "/health" {
        tracing::debug!(method = %methode, path = %pfad, status = status.as_u16(), duration_ms = dauer_ms, "Health-Probe");
    } else {
        tracing::info!(method = %methode, path = %pfad, status = status.as_u16(), duration_ms = dauer_ms, "HTTP-Anfrage abgeschlossen");
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    #[tokio::test]
    async fn antwort_wird_durchgereicht() {
        let app = Router::new()
            .route("/ok", get(|| async { "ok" }))
            .route("/kaputt", get(|| async { StatusCode::BAD_GATEWAY }))
            .layer(axum::middleware::from_fn(timing_middleware));

        let ok = app
            .clone()
            .oneshot(Request::get("/ok").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);

        let kaputt = app
            .oneshot(Request::get("/kaputt").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(kaputt.status(), StatusCode::BAD_GATEWAY);
    }
}
