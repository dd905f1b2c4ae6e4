//! lotse-protocol – Signaling-Envelope
//!
//! Definiert das JSON-Envelope das zwischen Clients und Server ueber beide
//! Transporte (Push-Stream und Socket) ausgetauscht wird.

pub mod envelope;
pub mod error;

pub use envelope::{
    Envelope, ErrorPayload, IceCandidate, PingPayload, SdpType, SessionDescription, Signal,
    SignalKind, WireEnvelope,
};
pub use error::{ProtocolError, ProtocolResult};
