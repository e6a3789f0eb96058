//! Channel manager behavior: init, subscription lifecycle, discovery.

mod common;

use common::{spawn_peer, wait_until, TEST_RSA_BITS};
use std::sync::Arc;
use pairsync::testing::{MemoryDeviceStore, MemoryHub};
use pairsync::{Message, PeerChannel as _, SyncError, SyncPeer, Transport as _, TransportConfig};

#[tokio::test]
async fn init_fails_against_an_unreachable_broker() {
    let hub = MemoryHub::new();
    hub.refuse_connections(true);
    let store = Arc::new(MemoryDeviceStore::generate(TEST_RSA_BITS).unwrap());
    let (peer, _events) = SyncPeer::new(
        Some("p1".into()),
        TransportConfig::default(),
        hub.transport(),
        store,
    );

    let err = peer.init().await.unwrap_err();
    assert!(matches!(err, SyncError::Connection(_)));

    // A failed attempt does not burn the one-init budget.
    hub.refuse_connections(false);
    peer.init().await.unwrap();
}

#[tokio::test]
async fn init_twice_is_rejected() {
    let hub = MemoryHub::new();
    let p1 = spawn_peer(&hub, "p1").await;
    let err = p1.peer.init().await.unwrap_err();
    assert!(matches!(err, SyncError::Connection(_)));
}

#[tokio::test]
async fn subscribing_an_empty_peer_id_is_rejected() {
    let hub = MemoryHub::new();
    let p1 = spawn_peer(&hub, "p1").await;
    let err = p1.peer.subscribe_peer("").await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidPeer));
    assert!(p1.peer.subscribed_peers().await.is_empty());
}

#[tokio::test]
async fn subscribing_registers_exactly_one_channel() {
    let hub = MemoryHub::new();
    let p1 = spawn_peer(&hub, "p1").await;

    p1.peer.subscribe_peer("peerX").await.unwrap();
    assert_eq!(p1.peer.subscribed_peers().await, vec!["peerX".to_string()]);

    // Re-subscribing an existing name is a no-op success.
    p1.peer.subscribe_peer("peerX").await.unwrap();
    assert_eq!(p1.peer.subscribed_peers().await.len(), 1);
}

#[tokio::test]
async fn subscribe_failure_is_reported_and_nothing_is_registered() {
    let hub = MemoryHub::new();
    hub.fail_topic("peerX");
    let p1 = spawn_peer(&hub, "p1").await;

    let err = p1.peer.subscribe_peer("peerX").await.unwrap_err();
    assert!(matches!(err, SyncError::Subscription(_)));
    assert!(p1.peer.subscribed_peers().await.is_empty());
}

#[tokio::test]
async fn unsubscribe_removes_the_channel_entry() {
    let hub = MemoryHub::new();
    let p1 = spawn_peer(&hub, "p1").await;

    p1.peer.subscribe_peer("foo").await.unwrap();
    p1.peer.unsubscribe_peer("foo").await.unwrap();
    assert!(p1.peer.subscribed_peers().await.is_empty());
}

#[tokio::test]
async fn unsubscribing_an_unknown_peer_is_rejected() {
    let hub = MemoryHub::new();
    let p1 = spawn_peer(&hub, "p1").await;

    assert!(matches!(
        p1.peer.unsubscribe_peer("nobody").await.unwrap_err(),
        SyncError::InvalidPeer
    ));
    assert!(matches!(
        p1.peer.unsubscribe_peer("").await.unwrap_err(),
        SyncError::InvalidPeer
    ));
}

#[tokio::test]
async fn subscribe_peers_handles_empty_and_invalid_lists() {
    let hub = MemoryHub::new();
    let p1 = spawn_peer(&hub, "p1").await;

    // Empty sequences are a no-op success.
    p1.peer.subscribe_peers(&[]).await.unwrap();

    // A list with no valid entries fails as a whole.
    let err = p1
        .peer
        .subscribe_peers(&["".to_string(), "".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::PartialSubscription(_)));

    // Invalid entries are filtered, valid ones still subscribe.
    p1.peer
        .subscribe_peers(&["".to_string(), "peerA".to_string()])
        .await
        .unwrap();
    assert_eq!(p1.peer.subscribed_peers().await, vec!["peerA".to_string()]);
}

#[tokio::test]
async fn one_failing_peer_does_not_abort_the_others() {
    let hub = MemoryHub::new();
    hub.fail_topic("bad");
    let p1 = spawn_peer(&hub, "p1").await;

    let err = p1
        .peer
        .subscribe_peers(&["bad".to_string(), "good".to_string()])
        .await
        .unwrap_err();
    match err {
        SyncError::PartialSubscription(failed) => assert_eq!(failed, vec!["bad".to_string()]),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(p1.peer.subscribed_peers().await, vec!["good".to_string()]);
}

#[tokio::test]
async fn ping_pong_opens_the_reverse_channel() {
    let hub = MemoryHub::new();
    let p1 = spawn_peer(&hub, "p1").await;
    let p2 = spawn_peer(&hub, "p2").await;

    p1.peer.subscribe_peer(p2.peer.id()).await.unwrap();

    // The ping makes p2 discover p1 and open a channel back.
    let p2_peer = p2.peer.clone();
    wait_until(|| {
        let p2_peer = p2_peer.clone();
        async move { p2_peer.subscribed_peers().await.contains(&"p1".to_string()) }
    })
    .await;
}

#[tokio::test]
async fn self_originated_messages_are_dropped() {
    let hub = MemoryHub::new();
    let mut p1 = spawn_peer(&hub, "p1").await;

    // Inject a ping that claims to come from p1 itself onto p1's channel.
    let transport = hub.transport();
    let injector = transport.subscribe("p1", false).await.unwrap();
    injector.publish(&Message::ping("p1")).await.unwrap();

    // A real ping afterwards still works, proving the router is alive and
    // the self-ping produced no reaction.
    injector.publish(&Message::ping("p9")).await.unwrap();
    let p1_peer = p1.peer.clone();
    wait_until(|| {
        let p1_peer = p1_peer.clone();
        async move { p1_peer.subscribed_peers().await.contains(&"p9".to_string()) }
    })
    .await;
    assert!(!p1.peer.subscribed_peers().await.contains(&"p1".to_string()));
    common::assert_no_event(&mut p1.events).await;
}

#[tokio::test]
async fn send_message_requires_a_registered_channel() {
    let hub = MemoryHub::new();
    let p1 = spawn_peer(&hub, "p1").await;
    let err = p1
        .peer
        .send_message("ghost", &Message::ping("p1"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::UnknownChannel(_)));
}

#[tokio::test]
async fn elect_master_is_deterministic_across_peers() {
    let hub = MemoryHub::new();
    let p1 = spawn_peer(&hub, "bravo").await;
    let p2 = spawn_peer(&hub, "alpha").await;

    assert_eq!(p1.peer.elect_master(&["alpha".to_string()]), "alpha");
    assert_eq!(p2.peer.elect_master(&["bravo".to_string()]), "alpha");
    // Calling with an empty list elects the caller's own id.
    assert_eq!(p2.peer.elect_master(&[]), "alpha");
}
