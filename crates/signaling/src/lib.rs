//! lotse-signaling – Transporte und HTTP-Schnittstelle
//!
//! Dieses Crate implementiert:
//! - Push-Stream-Transport: `/register`, `/events` (SSE), `/message`
//! - WebSocket-Transport mit Credential-Pruefung vor dem Upgrade
//! - `/token`, `/iceServers` (TURN-Proxy) und `/sessions` (Diagnose)
//! - `SignalingError` mit JSON-Antworten `{message}`

pub mod error;
pub mod push;
pub mod routes;
pub mod server;
pub mod socket;
pub mod state;
pub mod turn;

pub use error::{SignalingError, SignalingResult};
pub use routes::router;
pub use server::{cors_layer, HttpServer, HttpServerKonfig};
pub use state::{SignalingConfig, SignalingState};
pub use turn::{IceServer, IceUrls, TurnClient, TurnKonfig};
