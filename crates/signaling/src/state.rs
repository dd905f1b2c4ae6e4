//! Gemeinsamer Zustand aller Signaling-Handler

use std::sync::Arc;
use std::time::Duration;

use lotse_auth::TokenService;
use lotse_core::{PeerId, SessionId};
use lotse_protocol::Envelope;
use lotse_session::{OfferPolicy, SessionRegistry};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{SignalingError, SignalingResult};
use crate::push::PushAnmeldungen;
use crate::turn::{TurnClient, TurnKonfig};

/// Konfiguration des Signaling-Service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    /// Intervall fuer Keepalive-Pings (Push-Stream und Socket)
    pub keepalive_sek: u64,
    /// Wer bei Socket-Peers das erste Offer erstellt
    pub offer_policy: OfferPolicy,
    /// Wer bei Push-Stream-Peers das erste Offer erstellt
    pub push_offer_policy: OfferPolicy,
    /// Karenzzeit nach Socket-Abbruch (0 = sofort entfernen)
    pub reconnect_grace_sek: u64,
    /// Groesse der Send-Queue pro Peer
    pub send_queue: usize,
    /// Pfad des WebSocket-Endpunkts
    pub socket_pfad: String,
    /// Frist zwischen `/register` und dem Oeffnen von `/events`
    pub registrierung_frist_sek: u64,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            keepalive_sek: 30,
            offer_policy: OfferPolicy::Server,
            push_offer_policy: OfferPolicy::Peer,
            reconnect_grace_sek: 0,
            send_queue: 64,
            socket_pfad: "/webrtc".into(),
            registrierung_frist_sek: 30,
        }
    }
}

impl SignalingConfig {
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_sek.max(1))
    }

    pub fn reconnect_grace(&self) -> Duration {
        Duration::from_secs(self.reconnect_grace_sek)
    }

    pub fn registrierung_frist(&self) -> Duration {
        Duration::from_secs(self.registrierung_frist_sek)
    }
}

/// Zustand der von allen Handlern geteilt wird
pub struct SignalingState {
    pub config: SignalingConfig,
    pub registry: SessionRegistry,
    pub tokens: TokenService,
    pub turn: TurnClient,
    pub push: PushAnmeldungen,
}

impl SignalingState {
    pub fn neu(
        config: SignalingConfig,
        registry: SessionRegistry,
        tokens: TokenService,
        turn: TurnKonfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry,
            tokens,
            turn: TurnClient::neu(turn),
            push: PushAnmeldungen::default(),
        })
    }

    /// Dekodiert ein Client-Envelope und stellt es zu
    ///
    /// Mit `target` wird nur der Typ geprueft und der Payload unveraendert
    /// weitergereicht. Ein nicht dekodierbares Envelope ohne `target` ist an
    /// den eigenen Peer adressiert; dessen Aushandlung scheitert daraufhin.
    pub fn envelope_zustellen(
        &self,
        session_id: &SessionId,
        absender: &PeerId,
        wert: Value,
    ) -> SignalingResult<()> {
        let hat_ziel = wert.get("target").is_some_and(|t| !t.is_null());
        let dekodiert = if hat_ziel {
            Envelope::relay_from_value(wert)
        } else {
            Envelope::from_value(wert)
        };
        let envelope = match dekodiert {
            Ok(envelope) => envelope,
            Err(fehler) => {
                let text = fehler.to_string();
                tracing::debug!(
                    session_id = %session_id,
                    peer_id = %absender,
                    fehler = %text,
                    "Envelope nicht dekodierbar"
                );
                if !hat_ziel {
                    if let Err(e) = self.registry.ungueltig_zustellen(session_id, absender, fehler) {
                        tracing::debug!(
                            session_id = %session_id,
                            peer_id = %absender,
                            fehler = %e,
                            "Kein Peer fuer ungueltiges Envelope"
                        );
                    }
                }
                return Err(SignalingError::UngueltigeAnfrage(text));
            }
        };

        tracing::debug!(
            session_id = %session_id,
            peer_id = %absender,
            typ = %envelope.kind(),
            ziel = ?envelope.target,
            "Envelope empfangen"
        );
        self.registry
            .nachricht_zustellen(session_id, absender, envelope)
            .map_err(SignalingError::from)
    }
}
