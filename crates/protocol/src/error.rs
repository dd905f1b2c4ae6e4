//! Fehlertypen beim Parsen von Signaling-Envelopes

use thiserror::Error;

use crate::envelope::SignalKind;

/// Fehler beim Dekodieren eines Envelopes
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Unbekannter Nachrichtentyp: {0}")]
    UnbekannterTyp(String),

    #[error("Ungueltiger Payload fuer '{kind}': {grund}")]
    UngueltigerPayload { kind: SignalKind, grund: String },

    #[error("Ungueltiges JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProtocolError {
    /// Nachrichtenart, falls der Typ erkannt wurde
    pub fn kind(&self) -> Option<SignalKind> {
        match self {
            Self::UngueltigerPayload { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
