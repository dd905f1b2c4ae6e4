//! lotse-auth – Session-Credentials
//!
//! Dieses Crate implementiert:
//! - Ausstellung signierter Credentials (`POST /token`)
//! - Pruefung von Signatur und Ablauf
//! - Ableitung von Session, Peer-ID und Rolle aus den Claims

pub mod credential;
pub mod error;
pub mod token;

pub use credential::{CredentialAnfrage, PeerIdentity, StreamClaims};
pub use error::{AuthError, AuthResult};
pub use token::{AusgestelltesCredential, TokenService, STANDARD_TTL_SEK};
