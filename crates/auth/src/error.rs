//! Fehlertypen fuer Credentials

use thiserror::Error;

/// Alle moeglichen Fehler bei Ausstellung und Pruefung von Credentials
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Kein Credential uebermittelt")]
    CredentialFehlt,

    #[error("Credential ungueltig: {0}")]
    CredentialUngueltig(String),

    #[error("Credential abgelaufen")]
    CredentialAbgelaufen,

    #[error("Credential unvollstaendig: {0} fehlt")]
    IdentitaetUnvollstaendig(&'static str),

    #[error("Signieren fehlgeschlagen: {0}")]
    Signieren(String),
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => Self::CredentialAbgelaufen,
            _ => Self::CredentialUngueltig(e.to_string()),
        }
    }
}

/// Result-Alias fuer Credential-Operationen
pub type AuthResult<T> = Result<T, AuthError>;
