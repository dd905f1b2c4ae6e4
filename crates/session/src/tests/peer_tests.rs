//! Tests fuer die Signaling-Zustandsmaschine eines Peers

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use lotse_core::{PeerId, PeerRole, PeerState, SessionId};
use lotse_protocol::{Envelope, IceCandidate, ProtocolError, SessionDescription, Signal, SignalKind};
use tokio::sync::Notify;

use super::fake_engine::*;
use crate::media::{MediaConnectionState, MediaEvent};
use crate::peer::OfferPolicy;
use crate::routing::RoutingPolicy;
use crate::SessionError;

fn kandidat(text: &str) -> IceCandidate {
    IceCandidate {
        candidate: text.into(),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
        username_fragment: None,
    }
}

#[tokio::test]
async fn test_server_offer_bis_connected() {
    let engine = FakeEngine::neu();
    let registry = registry(&engine, RoutingPolicy::AllToAll);
    let mut peer =
        beitreten_mit(&registry, "s1", "p1", PeerRole::WebClient, OfferPolicy::Server).await;

    let offer = naechstes(&mut peer).await;
    assert_eq!(offer.kind(), SignalKind::Offer);
    assert_eq!(peer.handle.state(), PeerState::Offered);

    registry
        .nachricht_zustellen(
            &SessionId::neu("s1"),
            &PeerId::neu("p1"),
            Envelope::answer(SessionDescription::answer("client-answer")),
        )
        .unwrap();
    let handle = Arc::clone(&peer.handle);
    warten_bis(|| handle.state() == PeerState::Answered).await;

    engine
        .ereignis("p1", MediaEvent::ConnectionState(MediaConnectionState::Connected))
        .await;
    warten_bis(|| handle.state() == PeerState::Connected).await;

    assert_eq!(
        engine.verbindung("p1").aufrufe(),
        vec![Aufruf::CreateOffer, Aufruf::SetRemote]
    );
}

#[tokio::test]
async fn test_answer_ohne_offer_wird_ignoriert() {
    let engine = FakeEngine::neu();
    let registry = registry(&engine, RoutingPolicy::AllToAll);
    let peer = beitreten(&registry, "s1", "p1", PeerRole::WebClient).await;

    peer.handle
        .answer_empfangen(SessionDescription::answer("verirrt"))
        .await
        .unwrap();

    assert_eq!(peer.handle.state(), PeerState::Joining);
    assert!(engine.verbindung("p1").aufrufe().is_empty());
    assert_eq!(registry.holen(&SessionId::neu("s1")).unwrap().peer_anzahl(), 1);
}

#[tokio::test]
async fn test_offer_vom_peer_wird_beantwortet() {
    let engine = FakeEngine::neu();
    let registry = registry(&engine, RoutingPolicy::AllToAll);
    let mut peer = beitreten(&registry, "s1", "p1", PeerRole::Device).await;

    let answer = peer
        .handle
        .offer_empfangen(SessionDescription::offer("device-offer"))
        .await
        .unwrap();
    assert_eq!(answer.sdp, "answer-auf device-offer");
    assert_eq!(peer.handle.state(), PeerState::Answered);

    let env = naechstes(&mut peer).await;
    assert_eq!(env.signal, Signal::Answer(answer));
}

#[tokio::test]
async fn test_abgelehntes_offer_fuehrt_zu_failed() {
    let engine = FakeEngine::neu();
    let registry = registry(&engine, RoutingPolicy::AllToAll);
    let mut peer = beitreten(&registry, "s1", "p1", PeerRole::WebClient).await;
    engine
        .verbindung("p1")
        .answer_ablehnen
        .store(true, Ordering::SeqCst);

    let fehler = peer
        .handle
        .offer_empfangen(SessionDescription::offer("kaputt"))
        .await
        .unwrap_err();
    assert!(matches!(fehler, SessionError::MediaNegotiation { .. }));
    assert_eq!(peer.handle.state(), PeerState::Failed);

    // Teardown-Signal geht trotzdem raus
    assert_eq!(naechstes(&mut peer).await, Envelope::leave(None));
}

#[tokio::test]
async fn test_abgelehntes_offer_ueber_postfach_entfernt_peer() {
    let engine = FakeEngine::neu();
    let registry = registry(&engine, RoutingPolicy::AllToAll);
    let mut p1 = beitreten(&registry, "s1", "p1", PeerRole::WebClient).await;
    let _p2 = beitreten(&registry, "s1", "p2", PeerRole::WebClient).await;
    assert_eq!(naechstes(&mut p1).await.signal, Signal::NewPeer);
    engine
        .verbindung("p2")
        .answer_ablehnen
        .store(true, Ordering::SeqCst);

    registry
        .nachricht_zustellen(
            &SessionId::neu("s1"),
            &PeerId::neu("p2"),
            Envelope::offer(SessionDescription::offer("kaputt")),
        )
        .unwrap();

    // Andere Peers bleiben unberuehrt und erfahren vom Abgang
    let env = naechstes(&mut p1).await;
    assert_eq!(env, Envelope::leave(Some(PeerId::neu("p2"))));
    let session = registry.holen(&SessionId::neu("s1")).unwrap();
    assert_eq!(session.peer_anzahl(), 1);
    assert_eq!(p1.handle.state(), PeerState::Joining);
}

#[tokio::test]
async fn test_lokaler_kandidat_nur_an_eigenen_kanal() {
    let engine = FakeEngine::neu();
    let registry = registry(&engine, RoutingPolicy::AllToAll);
    let mut p1 = beitreten(&registry, "s1", "p1", PeerRole::WebClient).await;
    let mut p2 = beitreten(&registry, "s1", "p2", PeerRole::WebClient).await;
    assert_eq!(naechstes(&mut p1).await.signal, Signal::NewPeer);

    engine
        .ereignis("p2", MediaEvent::LocalIceCandidate(kandidat("candidate:lokal")))
        .await;

    let env = naechstes(&mut p2).await;
    assert_eq!(env.signal, Signal::IceCandidate(kandidat("candidate:lokal")));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(p1.empfaenger.rx.try_recv().is_err());
}

#[tokio::test]
async fn test_entfernte_kandidaten() {
    let engine = FakeEngine::neu();
    let registry = registry(&engine, RoutingPolicy::AllToAll);
    let peer = beitreten(&registry, "s1", "p1", PeerRole::WebClient).await;
    let verbindung = engine.verbindung("p1");

    peer.handle.ice_kandidat_hinzufuegen(kandidat("candidate:1")).await;
    peer.handle.ice_kandidat_hinzufuegen(kandidat("")).await;
    verbindung.ice_ablehnen.store(true, Ordering::SeqCst);
    peer.handle.ice_kandidat_hinzufuegen(kandidat("candidate:2")).await;

    assert_eq!(
        verbindung.aufrufe(),
        vec![
            Aufruf::AddIce("candidate:1".into()),
            Aufruf::AddIce("candidate:2".into())
        ]
    );
    // Abgelehnter Kandidat laesst den Peer leben
    assert_eq!(peer.handle.state(), PeerState::Joining);
}

#[tokio::test]
async fn test_ungueltiger_kandidat_wird_verworfen() {
    let engine = FakeEngine::neu();
    let registry = registry(&engine, RoutingPolicy::AllToAll);
    let _peer = beitreten(&registry, "s1", "p1", PeerRole::WebClient).await;

    let fehler = Envelope::from_value(serde_json::json!({
        "type": "ice-candidate",
        "payload": { "sdpMid": 3 }
    }))
    .unwrap_err();
    registry
        .ungueltig_zustellen(&SessionId::neu("s1"), &PeerId::neu("p1"), fehler)
        .unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(registry.anzahl_aktiv(), 1);
}

#[tokio::test]
async fn test_ungueltiges_envelope_fuehrt_zu_failed() {
    let engine = FakeEngine::neu();
    let registry = registry(&engine, RoutingPolicy::AllToAll);
    let mut peer = beitreten(&registry, "s1", "p1", PeerRole::WebClient).await;

    registry
        .ungueltig_zustellen(
            &SessionId::neu("s1"),
            &PeerId::neu("p1"),
            ProtocolError::UnbekannterTyp("renegotiate".into()),
        )
        .unwrap();

    assert_eq!(naechstes(&mut peer).await.kind(), SignalKind::Error);
    assert_eq!(naechstes(&mut peer).await, Envelope::leave(None));
    warten_bis(|| registry.anzahl_aktiv() == 0).await;
    assert_eq!(peer.handle.state(), PeerState::Failed);
}

#[tokio::test]
async fn test_abbau_waehrend_engine_aufruf() {
    let engine = FakeEngine::neu();
    let registry = registry(&engine, RoutingPolicy::AllToAll);
    let mut peer = beitreten(&registry, "s1", "p1", PeerRole::WebClient).await;
    let sperre = Arc::new(Notify::new());
    *engine.verbindung("p1").answer_sperre.lock() = Some(Arc::clone(&sperre));

    let handle = Arc::clone(&peer.handle);
    let laufend = tokio::spawn(async move {
        handle
            .offer_empfangen(SessionDescription::offer("langsam"))
            .await
    });
    let verbindung = engine.verbindung("p1");
    warten_bis(|| verbindung.aufrufe().contains(&Aufruf::CreateAnswer)).await;

    registry.peer_entfernen(&SessionId::neu("s1"), &PeerId::neu("p1"), PeerState::Disconnected);
    sperre.notify_one();

    let ergebnis = tokio::time::timeout(WARTEZEIT, laufend)
        .await
        .unwrap()
        .unwrap();
    assert!(ergebnis.is_err());
    assert_eq!(peer.handle.state(), PeerState::Disconnected);
    // Keine Answer nach dem Abbau
    while let Ok(env) = peer.empfaenger.rx.try_recv() {
        assert_ne!(env.kind(), SignalKind::Answer);
    }
}

#[tokio::test]
async fn test_nachrichten_werden_in_reihenfolge_verarbeitet() {
    let engine = FakeEngine::neu();
    let registry = registry(&engine, RoutingPolicy::AllToAll);
    let mut peer = beitreten(&registry, "s1", "p1", PeerRole::WebClient).await;
    let sperre = Arc::new(Notify::new());
    *engine.verbindung("p1").answer_sperre.lock() = Some(Arc::clone(&sperre));

    let session_id = SessionId::neu("s1");
    let p1 = PeerId::neu("p1");
    registry
        .nachricht_zustellen(&session_id, &p1, Envelope::offer(SessionDescription::offer("o1")))
        .unwrap();
    registry
        .nachricht_zustellen(&session_id, &p1, Envelope::ice_candidate(kandidat("candidate:nach-offer")))
        .unwrap();

    let verbindung = engine.verbindung("p1");
    warten_bis(|| verbindung.aufrufe().contains(&Aufruf::CreateAnswer)).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    // Kandidat wartet, bis das Offer verarbeitet ist
    assert_eq!(verbindung.aufrufe(), vec![Aufruf::CreateAnswer]);

    sperre.notify_one();
    assert_eq!(naechstes(&mut peer).await.kind(), SignalKind::Answer);
    warten_bis(|| verbindung.aufrufe().len() == 2).await;
    assert_eq!(
        verbindung.aufrufe()[1],
        Aufruf::AddIce("candidate:nach-offer".into())
    );
}
