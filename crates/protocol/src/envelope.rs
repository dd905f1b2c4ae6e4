//! Signaling-Envelope – das transport-unabhaengige Nachrichtenformat
//!
//! ## Wire-Format (JSON)
//! ```text
//! { "type": "offer" | "answer" | "ice-candidate" | "new-peer" | "leave" | "ping" | "error",
//!   "payload": <SDP | ICE-Kandidat | ...>,
//!   "senderId": "p2",      // vom Server gestempelt
//!   "target": "p1" }       // Client -> Server: Empfaenger-Peer
//! ```
//!
//! Auf dem Draht ist `type` ein String. Intern wird er beim Parsen in das
//! geschlossene `Signal`-Enum ueberfuehrt; unbekannte Typen sind damit ein
//! einziger, expliziter Fehlerpfad (`ProtocolError::UnbekannterTyp`).

use chrono::{DateTime, Utc};
use lotse_core::PeerId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ProtocolError, ProtocolResult};

// ---------------------------------------------------------------------------
// Payload-Typen
// ---------------------------------------------------------------------------

/// Typ einer Session-Description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// SDP-Session-Description (Format wie `RTCSessionDescriptionInit`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub sdp_type: Option<SdpType>,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: Some(SdpType::Offer),
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: Some(SdpType::Answer),
            sdp: sdp.into(),
        }
    }
}

/// ICE-Kandidat (Format wie `RTCIceCandidateInit`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex", skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// Leerer Kandidat = "end-of-candidates"
    pub fn ist_ende(&self) -> bool {
        self.candidate.trim().is_empty()
    }
}

/// Keepalive-Payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Fehler-Payload (nur Server -> Client)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

// ---------------------------------------------------------------------------
// Signal
// ---------------------------------------------------------------------------

/// Nachrichtenart ohne Inhalt (fuer Logging und Fehlerkontext)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
    NewPeer,
    Leave,
    Ping,
    Error,
}

impl SignalKind {
    /// Wire-Name des Typs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::IceCandidate => "ice-candidate",
            Self::NewPeer => "new-peer",
            Self::Leave => "leave",
            Self::Ping => "ping",
            Self::Error => "error",
        }
    }

    /// Parst den Wire-Namen, `None` bei unbekanntem Typ
    pub fn aus_str(typ: &str) -> Option<Self> {
        match typ {
            "offer" => Some(Self::Offer),
            "answer" => Some(Self::Answer),
            "ice-candidate" => Some(Self::IceCandidate),
            "new-peer" => Some(Self::NewPeer),
            "leave" => Some(Self::Leave),
            "ping" => Some(Self::Ping),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Geschlossene Menge aller Signaling-Nachrichten
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Offer(SessionDescription),
    Answer(SessionDescription),
    IceCandidate(IceCandidate),
    NewPeer,
    Leave,
    Ping(PingPayload),
    Error(ErrorPayload),
    /// Unveraenderter Payload zwischen zwei Clients
    Relay { kind: SignalKind, payload: Value },
}

impl Signal {
    pub fn kind(&self) -> SignalKind {
        match self {
            Self::Offer(_) => SignalKind::Offer,
            Self::Answer(_) => SignalKind::Answer,
            Self::IceCandidate(_) => SignalKind::IceCandidate,
            Self::NewPeer => SignalKind::NewPeer,
            Self::Leave => SignalKind::Leave,
            Self::Ping(_) => SignalKind::Ping,
            Self::Error(_) => SignalKind::Error,
            Self::Relay { kind, .. } => *kind,
        }
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Ein Signaling-Envelope: Signal plus Adressierung
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireEnvelope", into = "WireEnvelope")]
pub struct Envelope {
    pub signal: Signal,
    /// Absender-Peer (wird vom Server gesetzt, Client-Angaben werden ueberschrieben)
    pub sender_id: Option<PeerId>,
    /// Empfaenger-Peer; fehlt er, ist der serverseitige Peer des Absenders gemeint
    pub target: Option<PeerId>,
}

impl Envelope {
    pub fn neu(signal: Signal) -> Self {
        Self {
            signal,
            sender_id: None,
            target: None,
        }
    }

    pub fn offer(beschreibung: SessionDescription) -> Self {
        Self::neu(Signal::Offer(beschreibung))
    }

    pub fn answer(beschreibung: SessionDescription) -> Self {
        Self::neu(Signal::Answer(beschreibung))
    }

    pub fn ice_candidate(kandidat: IceCandidate) -> Self {
        Self::neu(Signal::IceCandidate(kandidat))
    }

    /// Benachrichtigung ueber einen neu zugelassenen Peer
    pub fn new_peer(peer_id: PeerId) -> Self {
        Self::neu(Signal::NewPeer).mit_absender(peer_id)
    }

    /// Teardown-Signal bzw. Abmeldung eines Peers
    pub fn leave(peer_id: Option<PeerId>) -> Self {
        Self {
            signal: Signal::Leave,
            sender_id: peer_id,
            target: None,
        }
    }

    /// Keepalive mit aktuellem Zeitstempel
    pub fn ping() -> Self {
        Self::neu(Signal::Ping(PingPayload {
            timestamp: Some(Utc::now()),
        }))
    }

    pub fn error(nachricht: impl Into<String>) -> Self {
        Self::neu(Signal::Error(ErrorPayload {
            message: nachricht.into(),
        }))
    }

    /// Setzt den Absender
    pub fn mit_absender(mut self, peer_id: PeerId) -> Self {
        self.sender_id = Some(peer_id);
        self
    }

    /// Setzt den Empfaenger
    pub fn an(mut self, peer_id: PeerId) -> Self {
        self.target = Some(peer_id);
        self
    }

    pub fn kind(&self) -> SignalKind {
        self.signal.kind()
    }

    /// Parst ein Envelope aus einem JSON-String
    pub fn from_json(text: &str) -> ProtocolResult<Self> {
        let wire: WireEnvelope = serde_json::from_str(text)?;
        Self::try_from(wire)
    }

    /// Parst ein Envelope aus einem bereits dekodierten JSON-Wert
    pub fn from_value(wert: Value) -> ProtocolResult<Self> {
        let wire: WireEnvelope = serde_json::from_value(wert)?;
        Self::try_from(wire)
    }

    /// Serialisiert das Envelope als JSON-String
    pub fn to_json(&self) -> String {
        // WireEnvelope besteht nur aus Strings und serde_json::Value
        serde_json::to_string(&WireEnvelope::from(self.clone())).unwrap_or_default()
    }

    /// Serialisiert das Envelope als JSON-Wert
    pub fn to_value(&self) -> Value {
        serde_json::to_value(WireEnvelope::from(self.clone())).unwrap_or(Value::Null)
    }

    /// Parst ein Envelope fuer den Relay-Modus
    ///
    /// Nur der `type` wird geprueft; der Payload bleibt unveraendert und
    /// geht so an den Ziel-Peer.
    pub fn relay_from_value(wert: Value) -> ProtocolResult<Self> {
        let wire: WireEnvelope = serde_json::from_value(wert)?;
        let kind = SignalKind::aus_str(&wire.typ)
            .ok_or_else(|| ProtocolError::UnbekannterTyp(wire.typ.clone()))?;
        Ok(Self {
            signal: Signal::Relay {
                kind,
                payload: wire.payload,
            },
            sender_id: wire.sender_id,
            target: wire.target,
        })
    }
}

// ---------------------------------------------------------------------------
// Wire-Darstellung
// ---------------------------------------------------------------------------

/// Rohform eines Envelopes wie es auf dem Draht steht
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEnvelope {
    #[serde(rename = "type")]
    pub typ: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<PeerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<PeerId>,
}

fn payload_parsen<T: serde::de::DeserializeOwned>(
    kind: SignalKind,
    payload: Value,
) -> ProtocolResult<T> {
    serde_json::from_value(payload).map_err(|e| ProtocolError::UngueltigerPayload {
        kind,
        grund: e.to_string(),
    })
}

fn beschreibung_pruefen(
    kind: SignalKind,
    erwartet: SdpType,
    beschreibung: SessionDescription,
) -> ProtocolResult<SessionDescription> {
    if beschreibung.sdp.trim().is_empty() {
        return Err(ProtocolError::UngueltigerPayload {
            kind,
            grund: "leeres SDP".into(),
        });
    }
    match beschreibung.sdp_type {
        Some(typ) if typ != erwartet => Err(ProtocolError::UngueltigerPayload {
            kind,
            grund: format!("SDP-Typ {typ:?} passt nicht zu '{kind}'"),
        }),
        _ => Ok(SessionDescription {
            sdp_type: Some(erwartet),
            sdp: beschreibung.sdp,
        }),
    }
}

impl TryFrom<WireEnvelope> for Envelope {
    type Error = ProtocolError;

    fn try_from(wire: WireEnvelope) -> Result<Self, Self::Error> {
        let kind = SignalKind::aus_str(&wire.typ)
            .ok_or_else(|| ProtocolError::UnbekannterTyp(wire.typ.clone()))?;

        let signal = match kind {
            SignalKind::Offer => {
                let b = payload_parsen(kind, wire.payload)?;
                Signal::Offer(beschreibung_pruefen(kind, SdpType::Offer, b)?)
            }
            SignalKind::Answer => {
                let b = payload_parsen(kind, wire.payload)?;
                Signal::Answer(beschreibung_pruefen(kind, SdpType::Answer, b)?)
            }
            SignalKind::IceCandidate => Signal::IceCandidate(payload_parsen(kind, wire.payload)?),
            SignalKind::NewPeer => Signal::NewPeer,
            SignalKind::Leave => Signal::Leave,
            SignalKind::Ping => {
                if wire.payload.is_null() {
                    Signal::Ping(PingPayload::default())
                } else {
                    Signal::Ping(payload_parsen(kind, wire.payload)?)
                }
            }
            SignalKind::Error => Signal::Error(payload_parsen(kind, wire.payload)?),
        };

        Ok(Self {
            signal,
            sender_id: wire.sender_id,
            target: wire.target,
        })
    }
}

impl From<Envelope> for WireEnvelope {
    fn from(envelope: Envelope) -> Self {
        let typ = envelope.kind().as_str().to_string();
        let payload = match envelope.signal {
            Signal::Offer(b) | Signal::Answer(b) => serde_json::to_value(b),
            Signal::IceCandidate(k) => serde_json::to_value(k),
            Signal::NewPeer | Signal::Leave => Ok(Value::Null),
            Signal::Ping(p) => serde_json::to_value(p),
            Signal::Error(e) => serde_json::to_value(e),
            Signal::Relay { payload, .. } => Ok(payload),
        }
        .unwrap_or(Value::Null);

        Self {
            typ,
            payload,
            sender_id: envelope.sender_id,
            target: envelope.target,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
