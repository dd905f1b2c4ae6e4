//! Tests fuer die SessionRegistry

use std::sync::Arc;
use std::time::Duration;

use lotse_core::{ActivityEvent, PeerId, PeerRole, PeerState, SessionId};
use lotse_protocol::Envelope;

use super::fake_engine::*;
use crate::error::SessionError;
use crate::routing::RoutingPolicy;
use crate::session::Aufnahme;
use crate::SignalingChannel;

#[tokio::test]
async fn test_holen_oder_erstellen_liefert_dieselbe_session() {
    let engine = FakeEngine::neu();
    let registry = registry(&engine, RoutingPolicy::AllToAll);
    let id = SessionId::neu("s1");

    let erste = registry.holen_oder_erstellen(&id);
    let zweite = registry.holen_oder_erstellen(&id);
    assert!(Arc::ptr_eq(&erste, &zweite));
    assert_eq!(registry.anzahl_aktiv(), 1);

    assert!(registry.entfernen(&id));
    let dritte = registry.holen_oder_erstellen(&id);
    assert!(!Arc::ptr_eq(&erste, &dritte));
    assert!(erste.ist_geschlossen());
    assert!(!dritte.ist_geschlossen());
}

#[tokio::test]
async fn test_letzter_peer_verlaesst_session() {
    let engine = FakeEngine::neu();
    let registry = registry(&engine, RoutingPolicy::AllToAll);
    let peer = beitreten(&registry, "s9", "p1", PeerRole::WebClient).await;

    assert!(registry.peer_entfernen(
        &SessionId::neu("s9"),
        &PeerId::neu("p1"),
        PeerState::Disconnected
    ));

    // Innerhalb derselben Operation aus der aktiven Menge verschwunden
    let snapshot = registry.auflisten();
    assert!(snapshot.sessions.is_empty());
    assert_eq!(snapshot.retired_sessions.len(), 1);
    assert_eq!(snapshot.retired_sessions[0].session_id.as_str(), "s9");
    assert!(snapshot.retired_sessions[0].closed_at.is_some());

    assert_eq!(peer.handle.state(), PeerState::Disconnected);
    assert!(!peer.kanal.ist_offen());
}

#[tokio::test]
async fn test_entfernen_zweimal_ein_session_closed() {
    let engine = FakeEngine::neu();
    let registry = registry(&engine, RoutingPolicy::AllToAll);
    let _peer = beitreten(&registry, "s1", "p1", PeerRole::WebClient).await;
    let id = SessionId::neu("s1");

    assert!(registry.entfernen(&id));
    assert!(!registry.entfernen(&id));

    let snapshot = registry.auflisten();
    assert_eq!(snapshot.retired_sessions.len(), 1);
    let geschlossen = snapshot.retired_sessions[0]
        .activity_log
        .iter()
        .filter(|e| e.event == ActivityEvent::SessionClosed)
        .count();
    assert_eq!(geschlossen, 1);
}

#[tokio::test]
async fn test_entfernen_schliesst_media_der_peers() {
    let engine = FakeEngine::neu();
    let registry = registry(&engine, RoutingPolicy::AllToAll);
    let mut peer = beitreten(&registry, "s1", "p1", PeerRole::Device).await;

    registry.entfernen(&SessionId::neu("s1"));

    let env = naechstes(&mut peer).await;
    assert_eq!(env, Envelope::leave(None));
    let verbindung = engine.verbindung("p1");
    warten_bis(|| verbindung.aufrufe().contains(&Aufruf::Close)).await;
}

#[tokio::test]
async fn test_retired_historie_begrenzt() {
    let engine = FakeEngine::neu();
    let registry = crate::SessionRegistry::neu(
        crate::RegistryKonfig {
            routing: RoutingPolicy::AllToAll,
            retired_history: 2,
        },
        engine.clone(),
    );

    for id in ["a", "b", "c"] {
        let id = SessionId::neu(id);
        registry.holen_oder_erstellen(&id);
        registry.entfernen(&id);
    }

    let retired: Vec<String> = registry
        .auflisten()
        .retired_sessions
        .iter()
        .map(|s| s.session_id.to_string())
        .collect();
    assert_eq!(retired, vec!["b", "c"]);
}

#[tokio::test]
async fn test_doppelte_anmeldung_abgelehnt() {
    let engine = FakeEngine::neu();
    let registry = registry(&engine, RoutingPolicy::AllToAll);
    let original = beitreten(&registry, "s1", "p1", PeerRole::WebClient).await;

    let (anmeldung, _kanal, _empfaenger) =
        anmeldung("p1", PeerRole::WebClient, crate::OfferPolicy::Peer);
    let ergebnis = registry.peer_anmelden(&SessionId::neu("s1"), anmeldung).await;
    assert!(matches!(ergebnis, Err(SessionError::DuplicatePeer(ref p)) if p.as_str() == "p1"));

    let session = registry.holen(&SessionId::neu("s1")).unwrap();
    assert_eq!(session.peer_anzahl(), 1);
    let vorhanden = session.peer(&PeerId::neu("p1")).unwrap();
    assert!(Arc::ptr_eq(&vorhanden, &original.handle));
}

#[tokio::test]
async fn test_gescheiterte_erste_anmeldung_hinterlaesst_keine_session() {
    let engine = FakeEngine::neu();
    engine.open_ablehnen("p1");
    let registry = registry(&engine, RoutingPolicy::AllToAll);

    let (anmeldung, _kanal, _empfaenger) =
        anmeldung("p1", PeerRole::WebClient, crate::OfferPolicy::Peer);
    let ergebnis = registry.peer_anmelden(&SessionId::neu("s1"), anmeldung).await;

    assert!(matches!(ergebnis, Err(SessionError::MediaNegotiation { .. })));
    assert_eq!(registry.anzahl_aktiv(), 0);
}

#[tokio::test]
async fn test_leave_vom_client_entfernt_peer() {
    let engine = FakeEngine::neu();
    let registry = registry(&engine, RoutingPolicy::AllToAll);
    let _peer = beitreten(&registry, "s1", "p1", PeerRole::WebClient).await;

    registry
        .nachricht_zustellen(&SessionId::neu("s1"), &PeerId::neu("p1"), Envelope::leave(None))
        .unwrap();

    warten_bis(|| registry.anzahl_aktiv() == 0).await;
    assert_eq!(registry.auflisten().retired_sessions.len(), 1);
}

#[tokio::test]
async fn test_unbekannte_session_und_absender() {
    let engine = FakeEngine::neu();
    let registry = registry(&engine, RoutingPolicy::AllToAll);

    let fehler = registry
        .nachricht_zustellen(&SessionId::neu("fehlt"), &PeerId::neu("p1"), Envelope::ping())
        .unwrap_err();
    assert!(matches!(fehler, SessionError::UnknownSession(_)));

    let _peer = beitreten(&registry, "s1", "p1", PeerRole::WebClient).await;
    let fehler = registry
        .nachricht_zustellen(&SessionId::neu("s1"), &PeerId::neu("fremd"), Envelope::ping())
        .unwrap_err();
    assert!(matches!(fehler, SessionError::UnknownPeer(_)));
}

#[tokio::test]
async fn test_karenzzeit_erlaubt_wiederverbindung() {
    let engine = FakeEngine::neu();
    let registry = registry(&engine, RoutingPolicy::AllToAll);
    let alt = beitreten(&registry, "s1", "p1", PeerRole::WebClient).await;

    registry.peer_trennen(&alt.handle, Duration::from_millis(100));
    assert!(alt.handle.ist_getrennt());

    let (anmeldung, _kanal, mut empfaenger) =
        anmeldung("p1", PeerRole::WebClient, crate::OfferPolicy::Peer);
    let aufnahme = registry
        .peer_anmelden(&SessionId::neu("s1"), anmeldung)
        .await
        .unwrap();
    assert!(matches!(aufnahme, Aufnahme::Wiederverbunden(ref h) if Arc::ptr_eq(h, &alt.handle)));

    tokio::time::sleep(Duration::from_millis(200)).await;
    let session = registry.holen(&SessionId::neu("s1")).unwrap();
    assert_eq!(session.peer_anzahl(), 1);

    // Neuer Kanal ist gebunden
    alt.handle.lokaler_ice_kandidat(lotse_protocol::IceCandidate {
        candidate: "candidate:1".into(),
        sdp_mid: None,
        sdp_mline_index: None,
        username_fragment: None,
    });
    let env = empfaenger.rx.try_recv().unwrap();
    assert_eq!(env.kind(), lotse_protocol::SignalKind::IceCandidate);
}

#[tokio::test]
async fn test_karenzzeit_abgelaufen_entfernt_peer() {
    let engine = FakeEngine::neu();
    let registry = registry(&engine, RoutingPolicy::AllToAll);
    let peer = beitreten(&registry, "s1", "p1", PeerRole::WebClient).await;

    registry.peer_trennen(&peer.handle, Duration::from_millis(20));
    assert_eq!(registry.anzahl_aktiv(), 1);

    warten_bis(|| registry.anzahl_aktiv() == 0).await;
    assert_eq!(peer.handle.state(), PeerState::Disconnected);
}
