//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use pairsync::testing::{MemoryDeviceStore, MemoryHub};
use pairsync::{DeviceStore, PairingEvent, SyncPeer, TransportConfig};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{sleep, timeout};

/// Small keys keep test-time RSA generation fast; production identities
/// should be at least 2048 bits.
pub const TEST_RSA_BITS: usize = 1024;

pub struct TestPeer {
    pub peer: SyncPeer,
    pub events: UnboundedReceiver<PairingEvent>,
    pub store: Arc<MemoryDeviceStore>,
}

impl TestPeer {
    /// The DER export of this peer's own RSA public key.
    pub async fn public_key_der(&self) -> Vec<u8> {
        self.store
            .current_device()
            .await
            .unwrap()
            .public_key_der
            .clone()
    }
}

/// Create and initialize a peer attached to `hub`.
pub async fn spawn_peer(hub: &MemoryHub, id: &str) -> TestPeer {
    let store = Arc::new(MemoryDeviceStore::generate(TEST_RSA_BITS).unwrap());
    let (peer, events) = SyncPeer::new(
        Some(id.to_string()),
        TransportConfig::default(),
        hub.transport(),
        store.clone(),
    );
    peer.init().await.unwrap();
    TestPeer {
        peer,
        events,
        store,
    }
}

/// Wait for the next pairing event, failing the test after five seconds.
pub async fn next_event(events: &mut UnboundedReceiver<PairingEvent>) -> PairingEvent {
    timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for pairing event")
        .expect("event stream closed")
}

/// Assert that no further event arrives within a settling window.
pub async fn assert_no_event(events: &mut UnboundedReceiver<PairingEvent>) {
    sleep(Duration::from_millis(200)).await;
    assert!(
        events.try_recv().is_err(),
        "expected no further pairing events"
    );
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if condition().await {
            return;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached within two seconds");
}
