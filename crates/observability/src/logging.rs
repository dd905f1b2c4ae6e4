//! Structured Logging Setup via tracing-subscriber
//!
//! Konfigurierbar per Umgebungsvariable (hat Vorrang vor der Konfigurationsdatei):
//! - `LOTSE_LOG_LEVEL`: Filter-Ausdruck (z.B. `info` oder `lotse_session=debug,info`)
//! - `LOTSE_LOG_FORMAT`: `text` oder `json`

use tracing_subscriber::{fmt, EnvFilter};

const ENV_LEVEL: &str = "LOTSE_LOG_LEVEL";
const ENV_FORMAT: &str = "LOTSE_LOG_FORMAT";

/// Ausgabeformat der Logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    /// Unbekannte Werte fallen auf `Text` zurueck
    pub fn aus_str(format: &str) -> Self {
        if format.trim().eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Text
        }
    }
}

/// Baut den Filter aus Umgebung bzw. Konfiguration
///
/// Ungueltige Ausdruecke fallen auf `info` zurueck.
pub fn filter_erstellen(level: &str) -> EnvFilter {
    EnvFilter::try_from_env(ENV_LEVEL)
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialisiert das Logging-System
///
/// Ein zweiter Aufruf (z.B. in Tests) laesst den bestehenden Subscriber stehen.
pub fn logging_initialisieren(level: &str, format: &str) {
    let filter = filter_erstellen(level);
    let format = std::env::var(ENV_FORMAT)
        .map(|f| LogFormat::aus_str(&f))
        .unwrap_or_else(|_| LogFormat::aus_str(format));

    let ergebnis = match format {
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_current_span(true)
            .try_init(),
        LogFormat::Text => fmt().with_env_filter(filter).with_target(true).try_init(),
    };

    if ergebnis.is_err() {
        tracing::debug!("Logging bereits initialisiert");
    }
}
