//! Peer channel manager.
//!
//! Owns the self-channel subscription, the table of peer channels, and the
//! ping/pong discovery protocol. Every message arriving on the self-channel
//! is dispatched by event: pings open a channel back to the sender and
//! answer with a pong, everything else is forwarded to the pairing engine.
//! Errors raised while routing are logged and never escape the router task,
//! so a malformed or malicious peer cannot crash the local message loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, trace, warn};

use crate::config::TransportConfig;
use crate::crypto::DERIVED_KEY_LEN;
use crate::election;
use crate::errors::{Result, SyncError};
use crate::pairing::{PairingEngine, PairingEvent, SessionState};
use crate::storage::DeviceStore;
use crate::transport::{PeerChannel, Transport};
use crate::{EventKind, Message};

/// A peer identity on the messaging fabric.
///
/// Cheap to clone; clones share the same channel table and pairing state.
#[derive(Clone)]
pub struct SyncPeer {
    inner: Arc<PeerInner>,
}

struct PeerInner {
    id: String,
    config: TransportConfig,
    transport: Box<dyn Transport>,
    /// Peer-id -> channel handle. Exclusively owned here; the pairing
    /// engine never touches it directly. Insert and removal happen under
    /// the lock so routing never sees a half-registered entry.
    channels: Mutex<HashMap<String, Box<dyn PeerChannel>>>,
    self_channel: Mutex<Option<Box<dyn PeerChannel>>>,
    engine: PairingEngine,
    initialized: AtomicBool,
}

impl SyncPeer {
    /// Create a peer. A random UUID is assigned when `id` is `None`.
    ///
    /// Returns the peer and the stream of [`PairingEvent`]s the application
    /// observes as handshakes advance.
    pub fn new(
        id: Option<String>,
        config: TransportConfig,
        transport: Box<dyn Transport>,
        store: Arc<dyn DeviceStore>,
    ) -> (Self, mpsc::UnboundedReceiver<PairingEvent>) {
        let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let (engine, events) = PairingEngine::new(id.clone(), store);
        let peer = Self {
            inner: Arc::new(PeerInner {
                id,
                config,
                transport,
                channels: Mutex::new(HashMap::new()),
                self_channel: Mutex::new(None),
                engine,
                initialized: AtomicBool::new(false),
            }),
        };
        (peer, events)
    }

    /// The stable identifier of this peer, which is also the name of its
    /// self-channel.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Open the transport connection, subscribe the self-channel and start
    /// the message router. Must be called exactly once; a second call fails
    /// with [`SyncError::Connection`].
    pub async fn init(&self) -> Result<()> {
        if self.inner.initialized.swap(true, Ordering::SeqCst) {
            return Err(SyncError::Connection("peer is already initialized".into()));
        }
        match self.try_init().await {
            Ok(()) => Ok(()),
            Err(e) => {
                // Allow a retry after a failed connection attempt.
                self.inner.initialized.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    async fn try_init(&self) -> Result<()> {
        self.inner
            .transport
            .connect(&self.inner.config)
            .await
            .map_err(|e| SyncError::Connection(e.to_string()))?;
        let mut channel = self
            .inner
            .transport
            .subscribe(&self.inner.id, false)
            .await
            .map_err(|e| SyncError::Connection(e.to_string()))?;
        let mut messages = channel.watch();
        *self.inner.self_channel.lock().await = Some(channel);

        let router = Arc::clone(&self.inner);
        tokio::spawn(async move {
            while let Some(msg) = messages.recv().await {
                router.route(msg).await;
            }
            trace!(peer = %router.id, "self-channel closed, router stopping");
        });
        Ok(())
    }

    /// Subscribe a channel to the given peer and announce ourselves with a
    /// ping. Re-subscribing an already open channel is a no-op success.
    pub async fn subscribe_peer(&self, peer: &str) -> Result<()> {
        self.inner.subscribe_peer(peer, false).await
    }

    /// Subscribe a whole list of peers. Each subscription is attempted
    /// independently with batching enabled; an empty list is a no-op
    /// success, while a list whose entries all fail (or are all empty
    /// strings) fails with [`SyncError::PartialSubscription`] naming the
    /// peers that could not be subscribed.
    pub async fn subscribe_peers(&self, peers: &[String]) -> Result<()> {
        if peers.is_empty() {
            return Ok(());
        }
        let valid: Vec<&String> = peers.iter().filter(|p| !p.is_empty()).collect();
        if valid.is_empty() {
            return Err(SyncError::PartialSubscription(peers.to_vec()));
        }
        let mut failed = Vec::new();
        for peer in valid {
            if let Err(e) = self.inner.subscribe_peer(peer, true).await {
                warn!(peer = %peer, error = %e, "batch subscription failed");
                failed.push(peer.clone());
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(SyncError::PartialSubscription(failed))
        }
    }

    /// Tear down the channel to the given peer. Fails with
    /// [`SyncError::InvalidPeer`] when the peer id is empty or no channel
    /// is registered for it.
    pub async fn unsubscribe_peer(&self, peer: &str) -> Result<()> {
        if peer.is_empty() {
            return Err(SyncError::InvalidPeer);
        }
        let mut channels = self.inner.channels.lock().await;
        let mut channel = channels.remove(peer).ok_or(SyncError::InvalidPeer)?;
        channel.unsubscribe().await
    }

    /// Peer ids with a currently registered channel.
    pub async fn subscribed_peers(&self) -> Vec<String> {
        self.inner.channels.lock().await.keys().cloned().collect()
    }

    /// Publish a message on an already subscribed channel.
    pub async fn send_message(&self, channel: &str, message: &Message) -> Result<()> {
        self.inner.publish(channel, message).await
    }

    /// Deterministically elect a coordinating peer from `peers` plus this
    /// peer's own id. See [`election::elect_master`].
    pub fn elect_master(&self, peers: &[String]) -> String {
        election::elect_master(&self.inner.id, peers)
    }

    /// Provision the symmetric key that encrypts the RSA exchange with
    /// `peer`. Must happen out-of-band (QR code, pairing link) before
    /// either side initiates or responds to phase 1.
    pub async fn save_rsa_exchange_enc_key(&self, peer: &str, key: &[u8]) {
        self.inner.engine.save_rsa_exchange_enc_key(peer, key).await
    }

    /// Phase 1: send our RSA public key to `to`, encrypted under the
    /// exchange key. A `symmetric_key` supplied here overwrites the stored
    /// one; with neither available the call fails with
    /// [`SyncError::MissingExchangeKey`].
    pub async fn send_rsa_public_key(
        &self,
        to: &str,
        public_key: &[u8],
        symmetric_key: Option<&[u8]>,
        ack: bool,
    ) -> Result<()> {
        let msg = self
            .inner
            .engine
            .build_rsa_public_key(to, public_key, symmetric_key, ack)
            .await?;
        self.inner.publish(to, &msg).await
    }

    /// Phase 2: send our signed ephemeral EC public key to `to`. The
    /// keypair is generated lazily on first use and reused for the process
    /// lifetime.
    pub async fn send_ec_public_key(&self, to: &str, ack: bool) -> Result<()> {
        let msg = self.inner.engine.build_ec_public_key(to, ack).await?;
        self.inner.publish(to, &msg).await
    }

    /// Phase 3, exposed for callers that obtained a remote raw EC public
    /// key out-of-band. Fails with [`SyncError::KeyDerivation`] before any
    /// EC exchange generated the local keypair.
    pub async fn derive_secret_key(&self, remote_raw: &[u8]) -> Result<[u8; DERIVED_KEY_LEN]> {
        self.inner.engine.derive_secret_key(remote_raw).await
    }

    /// Phase 4: distribute a group key to `to`, encrypted under the secret
    /// derived for that session. Fails with
    /// [`SyncError::MissingDerivedKey`] before the handshake completed.
    pub async fn send_channel_key(&self, to: &str, group_key: &[u8]) -> Result<()> {
        let msg = self.inner.engine.build_channel_key(to, group_key).await?;
        self.inner.publish(to, &msg).await
    }

    /// Current handshake progress for `peer`, if a session exists.
    pub async fn session_state(&self, peer: &str) -> Option<SessionState> {
        self.inner.engine.session_state(peer).await
    }

    /// Discard the pairing session for `peer`. Returns whether one existed.
    pub async fn reset_session(&self, peer: &str) -> bool {
        self.inner.engine.reset_session(peer).await
    }
}

impl PeerInner {
    async fn subscribe_peer(&self, peer: &str, batch: bool) -> Result<()> {
        if peer.is_empty() {
            return Err(SyncError::InvalidPeer);
        }
        let mut channels = self.channels.lock().await;
        if channels.contains_key(peer) {
            return Ok(());
        }
        let channel = self.transport.subscribe(peer, batch).await?;
        // Register before publishing the ping so a near-simultaneous
        // inbound message referencing this channel is not lost.
        let channel = channels.entry(peer.to_string()).or_insert(channel);
        channel.publish(&Message::ping(&self.id)).await
    }

    /// Publish on a registered channel, failing when none exists.
    async fn publish(&self, channel: &str, message: &Message) -> Result<()> {
        let channels = self.channels.lock().await;
        let handle = channels
            .get(channel)
            .ok_or_else(|| SyncError::UnknownChannel(channel.to_string()))?;
        handle.publish(message).await
    }

    /// Publish on a channel, opening it first if needed. Used for replies
    /// to peers we have not explicitly subscribed yet.
    async fn publish_ensured(&self, peer: &str, message: &Message) -> Result<()> {
        let mut channels = self.channels.lock().await;
        if !channels.contains_key(peer) {
            let channel = self.transport.subscribe(peer, false).await?;
            channels.insert(peer.to_string(), channel);
        }
        let handle = channels
            .get(peer)
            .ok_or_else(|| SyncError::UnknownChannel(peer.to_string()))?;
        handle.publish(message).await
    }

    /// Serial dispatch of one self-channel message. Never returns an error:
    /// failures are logged and the handshake for that peer simply does not
    /// advance.
    async fn route(&self, msg: Message) {
        if msg.from.is_empty() {
            return;
        }
        if msg.from == self.id {
            // Loop suppression for channels that echo to their own
            // subscriber.
            trace!("dropping self-originated message");
            return;
        }
        match msg.event {
            EventKind::Ping => {
                if let Err(e) = self.publish_ensured(&msg.from, &Message::pong(&self.id)).await {
                    warn!(peer = %msg.from, error = %e, "could not answer ping");
                }
            }
            EventKind::Pong => {
                debug!(peer = %msg.from, "channel up");
            }
            _ => match self.engine.handle_message(&msg).await {
                Ok(Some(reply)) => {
                    let target = reply.to.clone().unwrap_or_else(|| msg.from.clone());
                    if let Err(e) = self.publish_ensured(&target, &reply).await {
                        warn!(peer = %target, error = %e, "could not publish handshake reply");
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(peer = %msg.from, event = ?msg.event, error = %e,
                        "inbound handshake message rejected");
                }
            },
        }
    }
}
