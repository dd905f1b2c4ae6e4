//! Routing-Policy fuer den Track-Fan-out
//!
//! | Policy          | Quelle     | Ziel       | Medien         |
//! |-----------------|------------|------------|----------------|
//! | `AllToAll`      | beliebig   | beliebig   | audio + video  |
//! | `DeviceCentric` | device     | web-client | audio + video  |
//! | `DeviceCentric` | web-client | device     | nur audio      |
//! | `DeviceCentric` | web-client | web-client | nur audio      |
//!
//! Der Urheber eines Tracks ist nie Ziel; das prueft `Session`, nicht die Policy.

use lotse_core::{PeerRole, TrackKind};
use serde::{Deserialize, Serialize};

/// Strategie nach der Tracks an andere Peers verteilt werden
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingPolicy {
    /// Jeder Track geht an jeden anderen Peer
    #[default]
    AllToAll,
    /// Ein Geraet pro Session, Browser schauen zu und haben einen Audio-Rueckkanal
    DeviceCentric,
}

impl RoutingPolicy {
    /// Prueft ob ein Peer der Rolle `neu` zugelassen wird
    pub fn zulassen(&self, neu: PeerRole, mut vorhandene: impl Iterator<Item = PeerRole>) -> bool {
        match self {
            Self::AllToAll => true,
            Self::DeviceCentric => !neu.ist_device() || !vorhandene.any(|r| r.ist_device()),
        }
    }

    /// Prueft ob ein Track der Art `kind` von `quelle` an `ziel` geht
    pub fn soll_weiterleiten(&self, quelle: PeerRole, ziel: PeerRole, kind: TrackKind) -> bool {
        match self {
            Self::AllToAll => true,
            Self::DeviceCentric => match (quelle, ziel) {
                (PeerRole::Device, PeerRole::WebClient) => true,
                (PeerRole::WebClient, _) => kind == TrackKind::Audio,
                (PeerRole::Device, PeerRole::Device) => false,
            },
        }
    }
}

impl std::fmt::Display for RoutingPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AllToAll => f.write_str("all-to-all"),
            Self::DeviceCentric => f.write_str("device-centric"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PeerRole::{Device, WebClient};
    use TrackKind::{Audio, Video};

    #[test]
    fn all_to_all_leitet_alles_weiter() {
        let p = RoutingPolicy::AllToAll;
        for quelle in [Device, WebClient] {
            for ziel in [Device, WebClient] {
                assert!(p.soll_weiterleiten(quelle, ziel, Video));
                assert!(p.soll_weiterleiten(quelle, ziel, Audio));
            }
        }
        assert!(p.zulassen(Device, [Device].into_iter()));
    }

    #[test]
    fn device_centric_matrix() {
        let p = RoutingPolicy::DeviceCentric;
        assert!(p.soll_weiterleiten(Device, WebClient, Video));
        assert!(p.soll_weiterleiten(Device, WebClient, Audio));
        assert!(p.soll_weiterleiten(WebClient, Device, Audio));
        assert!(!p.soll_weiterleiten(WebClient, Device, Video));
        assert!(p.soll_weiterleiten(WebClient, WebClient, Audio));
        assert!(!p.soll_weiterleiten(WebClient, WebClient, Video));
    }

    #[test]
    fn device_centric_nur_ein_geraet() {
        let p = RoutingPolicy::DeviceCentric;
        assert!(p.zulassen(Device, [WebClient, WebClient].into_iter()));
        assert!(!p.zulassen(Device, [WebClient, Device].into_iter()));
        assert!(p.zulassen(WebClient, [Device].into_iter()));
    }

    #[test]
    fn serde_namen() {
        let p: RoutingPolicy = serde_json::from_str("\"device-centric\"").unwrap();
        assert_eq!(p, RoutingPolicy::DeviceCentric);
        assert_eq!(RoutingPolicy::AllToAll.to_string(), "all-to-all");
    }
}
