//! lotse-session – Sessions, Peers und Track-Fan-out
//!
//! Dieses Crate implementiert:
//! - `SessionRegistry`: prozessweite Session-Verwaltung mit Retire-Historie
//! - `Session`: Zulassung, Entfernen, Relay und Fan-out innerhalb einer Session
//! - `PeerHandle`: Signaling-Zustandsmaschine pro Peer mit eigenem Task
//! - `RoutingPolicy`: AllToAll bzw. DeviceCentric
//! - `SignalingChannel` und `MediaEngine` als austauschbare Schnittstellen

pub mod channel;
pub mod error;
pub mod media;
pub mod peer;
pub mod registry;
pub mod routing;
pub mod session;

#[cfg(test)]
mod tests;

// Bequeme Re-Exporte
pub use channel::{ChannelError, ChannelResult, KanalEmpfaenger, QueueChannel, SignalingChannel};
pub use error::{SessionError, SessionResult};
pub use media::{
    LoopbackEngine, MediaConnection, MediaConnectionState, MediaEngine, MediaError, MediaEvent,
    MediaResult, MediaSession,
};
pub use peer::{OfferPolicy, PeerHandle, PeerSnapshot, TrackSnapshot};
pub use registry::{RegistryKonfig, RegistrySnapshot, SessionRegistry};
pub use routing::RoutingPolicy;
pub use session::{Aufnahme, FanOutBericht, PeerAnmeldung, Session, SessionSnapshot};
