//! # lotse-observability
//!
//! Observability-Crate fuer Lotse:
//! - Health-Check-Endpunkt (`/health`) mit Anzahl aktiver Sessions
//! - Structured Logging via tracing-subscriber (text oder JSON)
//! - Request-Timing Middleware

pub mod health;
pub mod logging;
pub mod middleware;

pub use health::{health_router, HealthResponse, HealthState, HealthStatus};
pub use logging::{logging_initialisieren, LogFormat};
pub use middleware::timing_middleware;
