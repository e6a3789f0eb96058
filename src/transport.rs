//! Consumed pub/sub transport contract.
//!
//! The crate never talks to a broker directly; it drives these traits. A
//! production implementation wraps a real pub/sub client, while
//! [`crate::testing::MemoryTransport`] provides an in-process hub for tests.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::TransportConfig;
use crate::errors::Result;
use crate::Message;

/// A pub/sub connection capable of subscribing to named topics.
///
/// Implementations report failures with [`crate::SyncError::Connection`]
/// (from `connect`) and [`crate::SyncError::Subscription`] (from
/// `subscribe`).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the underlying connection. Called exactly once per peer, from
    /// [`crate::SyncPeer::init`].
    async fn connect(&self, config: &TransportConfig) -> Result<()>;

    /// Subscribe to a topic and return a handle for publishing on it and
    /// watching its messages. `batch` hints that the subscribe request may
    /// be coalesced with others for throughput.
    async fn subscribe(&self, topic: &str, batch: bool) -> Result<Box<dyn PeerChannel>>;
}

/// A single subscribed channel.
#[async_trait]
pub trait PeerChannel: Send + Sync {
    /// Publish a message to every subscriber of this channel.
    async fn publish(&self, message: &Message) -> Result<()>;

    /// Take the inbound message stream for this channel. Delivery is
    /// serialized: the receiver sees messages in publish order. May only be
    /// taken once; subsequent calls return an empty stream.
    fn watch(&mut self) -> mpsc::UnboundedReceiver<Message>;

    /// Tear down the subscription. Messages published afterwards are no
    /// longer delivered.
    async fn unsubscribe(&mut self) -> Result<()>;
}
