//! SignalingChannel – transport-unabhaengige Envelope-Leitung zu genau einem Peer
//!
//! Der Server schreibt Envelopes nicht-blockierend in eine begrenzte Queue.
//! Der jeweilige Transport (Push-Stream oder Socket) liest die Queue und
//! beendet sich, sobald der Kanal geschlossen wird.

use lotse_core::{PeerId, TransportKind};
use lotse_protocol::Envelope;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

/// Fehler beim Senden ueber einen Kanal
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("Send-Queue voll")]
    Voll,
    #[error("Kanal geschlossen")]
    Geschlossen,
}

pub type ChannelResult<T> = Result<T, ChannelError>;

/// Leitung Server -> Peer
///
/// Eine Implementierung besitzt keinen Session-Zustand; sie transportiert
/// nur Envelopes und meldet ihr eigenes Schliessen.
pub trait SignalingChannel: Send + Sync + 'static {
    /// Reiht ein Envelope nicht-blockierend ein
    fn senden(&self, envelope: Envelope) -> ChannelResult<()>;

    /// Schliesst den Kanal; der Transport trennt daraufhin die Verbindung
    fn schliessen(&self);

    fn ist_offen(&self) -> bool;

    fn transport(&self) -> TransportKind;
}

// ---------------------------------------------------------------------------
// QueueChannel
// ---------------------------------------------------------------------------

/// Kanal-Implementierung ueber eine mpsc-Queue plus Shutdown-Signal
///
/// Beide Transporte verwenden sie; sie unterscheiden sich nur darin, wie
/// sie die Empfangsseite (`KanalEmpfaenger`) auf den Draht bringen.
#[derive(Debug, Clone)]
pub struct QueueChannel {
    peer_id: PeerId,
    transport: TransportKind,
    tx: mpsc::Sender<Envelope>,
    shutdown: watch::Sender<bool>,
}

/// Empfangsseite eines `QueueChannel`
#[derive(Debug)]
pub struct KanalEmpfaenger {
    pub rx: mpsc::Receiver<Envelope>,
    pub shutdown: watch::Receiver<bool>,
}

impl QueueChannel {
    /// Erstellt einen Kanal mit begrenzter Queue
    pub fn neu(
        peer_id: PeerId,
        transport: TransportKind,
        queue_groesse: usize,
    ) -> (Self, KanalEmpfaenger) {
        let (tx, rx) = mpsc::channel(queue_groesse.max(1));
        let (shutdown, shutdown_rx) = watch::channel(false);
        (
            Self {
                peer_id,
                transport,
                tx,
                shutdown,
            },
            KanalEmpfaenger {
                rx,
                shutdown: shutdown_rx,
            },
        )
    }
}

impl SignalingChannel for QueueChannel {
    fn senden(&self, envelope: Envelope) -> ChannelResult<()> {
        if *self.shutdown.borrow() {
            return Err(ChannelError::Geschlossen);
        }
        match self.tx.try_send(envelope) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(verworfen)) => {
                tracing::warn!(
                    peer_id = %self.peer_id,
                    typ = %verworfen.kind(),
                    "Send-Queue voll - Envelope verworfen"
                );
                Err(ChannelError::Voll)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(peer_id = %self.peer_id, "Send-Queue geschlossen (Peer getrennt)");
                Err(ChannelError::Geschlossen)
            }
        }
    }

    fn schliessen(&self) {
        self.shutdown.send_replace(true);
    }

    fn ist_offen(&self) -> bool {
        !*self.shutdown.borrow() && !self.tx.is_closed()
    }

    fn transport(&self) -> TransportKind {
        self.transport
    }
}
