//! Pairing protocol engine.
//!
//! Drives the four-phase handshake per remote peer:
//!
//! 1. **RSA exchange** — the long-term RSA public key is AES-GCM-encrypted
//!    under an out-of-band symmetric key and exchanged in one
//!    request/acknowledge round.
//! 2. **EC exchange** — an ephemeral P-256 public key, signed with the
//!    long-term RSA key, is exchanged and verified against the stored trust
//!    anchor. Exactly two EC messages travel: request and ack.
//! 3. **ECDH derivation** — both sides derive a 128-bit symmetric key from
//!    the ephemeral keys.
//! 4. **Ready signal and group key** — the initiator signals completion and
//!    either side may distribute a group key encrypted under the derived
//!    secret.
//!
//! The engine consumes and produces [`Message`] values; publishing them is
//! the channel manager's job. Handshakes with different remote peers are
//! independent; state for one remote peer is only touched by the serialized
//! message stream and by direct calls, both guarded by the session map lock.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::crypto::{self, EcKeyPair, DERIVED_KEY_LEN};
use crate::errors::{Result, SyncError};
use crate::storage::{DeviceStore, PairedDevice};
use crate::{EventKind, Message, Payload};

/// Application-facing notifications raised as the handshake advances.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PairingEvent {
    /// A peer's RSA public key was received, decrypted and persisted.
    RsaPublicKeyReceived { from: String, key: Vec<u8> },
    /// ECDH derivation completed for a peer; `key` is the 128-bit secret.
    EcdhEstablished { from: String, key: Vec<u8> },
    /// A group key arrived encrypted under the derived secret.
    GroupKeyReceived { from: String, key: Vec<u8> },
}

/// Handshake progress for one remote peer.
///
/// Transitions are driven exclusively by inbound messages and outbound
/// calls; there is no timeout-driven transition. A stalled handshake stays
/// where it is until the application discards the session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionState {
    /// Session exists (e.g. an exchange key was provisioned) but no
    /// handshake message has been sent or received yet.
    #[default]
    Idle,
    RsaSent,
    RsaReceived,
    EcSent,
    EcAcked,
    Ready,
    GroupKeyExchanged,
}

/// Per-remote-peer mutable handshake state.
#[derive(Default)]
struct PairingSession {
    /// Ephemeral symmetric key used only to encrypt the RSA exchange.
    /// Provisioned out-of-band; overwritten only by an explicit re-key.
    rsa_exchange_key: Option<Vec<u8>>,
    /// Result of ECDH, present once phase 3 completed.
    derived_secret: Option<[u8; DERIVED_KEY_LEN]>,
    state: SessionState,
}

pub(crate) struct PairingEngine {
    local_id: String,
    store: Arc<dyn DeviceStore>,
    sessions: Mutex<HashMap<String, PairingSession>>,
    /// One ephemeral EC keypair per peer identity, generated lazily and
    /// reused across sessions for the process lifetime.
    ec_keypair: Mutex<Option<EcKeyPair>>,
    events: mpsc::UnboundedSender<PairingEvent>,
}

impl PairingEngine {
    pub(crate) fn new(
        local_id: String,
        store: Arc<dyn DeviceStore>,
    ) -> (Self, mpsc::UnboundedReceiver<PairingEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let engine = Self {
            local_id,
            store,
            sessions: Mutex::new(HashMap::new()),
            ec_keypair: Mutex::new(None),
            events,
        };
        (engine, receiver)
    }

    /// Provision (or re-key) the RSA-exchange symmetric key for a peer.
    pub(crate) async fn save_rsa_exchange_enc_key(&self, peer: &str, key: &[u8]) {
        let mut sessions = self.sessions.lock().await;
        let session = sessions.entry(peer.to_string()).or_default();
        session.rsa_exchange_key = Some(key.to_vec());
    }

    /// Discard all handshake state for a peer. Returns whether a session
    /// existed. This is the only cancellation primitive: a stalled
    /// handshake is inert until dropped here.
    pub(crate) async fn reset_session(&self, peer: &str) -> bool {
        self.sessions.lock().await.remove(peer).is_some()
    }

    pub(crate) async fn session_state(&self, peer: &str) -> Option<SessionState> {
        self.sessions.lock().await.get(peer).map(|s| s.state)
    }

    /// Phase 1, outbound: encrypt the RSA public key under the exchange key
    /// and build the `publicKey` message.
    pub(crate) async fn build_rsa_public_key(
        &self,
        to: &str,
        public_key: &[u8],
        symmetric_key: Option<&[u8]>,
        ack: bool,
    ) -> Result<Message> {
        let exchange_key = {
            let mut sessions = self.sessions.lock().await;
            let session = sessions.entry(to.to_string()).or_default();
            if let Some(key) = symmetric_key {
                session.rsa_exchange_key = Some(key.to_vec());
            }
            let key = session
                .rsa_exchange_key
                .clone()
                .ok_or(SyncError::MissingExchangeKey)?;
            if !ack {
                session.state = SessionState::RsaSent;
            }
            key
        };
        let ciphertext = crypto::aes_encrypt(&exchange_key, public_key)?;
        Ok(Message {
            from: self.local_id.clone(),
            to: Some(to.to_string()),
            event: EventKind::PublicKey,
            data: Some(Payload {
                key: Some(hex::encode(ciphertext)),
                signature: None,
            }),
            ack,
        })
    }

    /// Phase 2, outbound: sign the ephemeral EC public key with the
    /// long-term RSA key and build the `ECPublicKey` message.
    pub(crate) async fn build_ec_public_key(&self, to: &str, ack: bool) -> Result<Message> {
        self.ensure_ec_keypair().await;
        let raw = {
            let keypair = self.ec_keypair.lock().await;
            // keypair was just ensured above
            keypair
                .as_ref()
                .map(crypto::export_raw_public_key)
                .ok_or(SyncError::KeyDerivation)?
        };
        let device = self.store.current_device().await?;
        let signature = crypto::rsa_sign(&device.private_key, &raw)?;
        if !ack {
            let mut sessions = self.sessions.lock().await;
            sessions.entry(to.to_string()).or_default().state = SessionState::EcSent;
        }
        Ok(Message {
            from: self.local_id.clone(),
            to: Some(to.to_string()),
            event: EventKind::EcPublicKey,
            data: Some(Payload {
                key: Some(hex::encode(raw)),
                signature: Some(hex::encode(signature)),
            }),
            ack,
        })
    }

    /// Phase 3: ECDH against a raw remote EC public key, HKDF-condensed to
    /// a 128-bit AES key. Fails if no local EC keypair exists yet; phase 2
    /// always generates the keypair before calling this.
    pub(crate) async fn derive_secret_key(
        &self,
        remote_raw: &[u8],
    ) -> Result<[u8; DERIVED_KEY_LEN]> {
        let keypair = self.ec_keypair.lock().await;
        let keypair = keypair.as_ref().ok_or(SyncError::KeyDerivation)?;
        crypto::derive_ecdh(keypair, remote_raw)
    }

    /// Phase 4, outbound: encrypt a group key under the derived secret.
    pub(crate) async fn build_channel_key(&self, to: &str, group_key: &[u8]) -> Result<Message> {
        let derived = {
            let mut sessions = self.sessions.lock().await;
            let session = sessions.entry(to.to_string()).or_default();
            let derived = session.derived_secret.ok_or(SyncError::MissingDerivedKey)?;
            session.state = SessionState::GroupKeyExchanged;
            derived
        };
        let ciphertext = crypto::aes_encrypt(&derived, group_key)?;
        Ok(Message {
            from: self.local_id.clone(),
            to: Some(to.to_string()),
            event: EventKind::ChannelKey,
            data: Some(Payload {
                key: Some(hex::encode(ciphertext)),
                signature: None,
            }),
            ack: false,
        })
    }

    /// Handle an inbound handshake message, returning the reply to publish
    /// back to the sender, if any.
    pub(crate) async fn handle_message(&self, msg: &Message) -> Result<Option<Message>> {
        match msg.event {
            EventKind::PublicKey => self.handle_public_key(msg).await,
            EventKind::EcPublicKey => self.handle_ec_public_key(msg).await,
            EventKind::ChannelKey => self.handle_channel_key(msg).await,
            EventKind::ReadyToTransfer => self.handle_ready_to_transfer(msg).await,
            // Discovery traffic is routed by the channel manager.
            EventKind::Ping | EventKind::Pong => Ok(None),
        }
    }

    async fn handle_public_key(&self, msg: &Message) -> Result<Option<Message>> {
        let ciphertext = decode_key_field(msg)?;
        let plaintext = {
            let mut sessions = self.sessions.lock().await;
            let session = sessions.entry(msg.from.clone()).or_default();
            let exchange_key = session
                .rsa_exchange_key
                .as_deref()
                .ok_or(SyncError::Decryption)?;
            let plaintext = crypto::aes_decrypt(exchange_key, &ciphertext)?;
            session.state = SessionState::RsaReceived;
            plaintext
        };
        self.store
            .add_paired_device(PairedDevice {
                peer_id: msg.from.clone(),
                public_key_der: plaintext.clone(),
            })
            .await?;
        debug!(peer = %msg.from, "stored RSA public key");
        self.emit(PairingEvent::RsaPublicKeyReceived {
            from: msg.from.clone(),
            key: plaintext,
        });
        if msg.ack {
            // An acknowledged exchange triggers no further reply; this is
            // what terminates the loop after exactly one round.
            return Ok(None);
        }
        let device = self.store.current_device().await?;
        let reply = self
            .build_rsa_public_key(&msg.from, &device.public_key_der, None, true)
            .await?;
        Ok(Some(reply))
    }

    async fn handle_ec_public_key(&self, msg: &Message) -> Result<Option<Message>> {
        let remote_raw = decode_key_field(msg)?;
        let signature = msg
            .data
            .as_ref()
            .and_then(|d| d.signature.as_deref())
            .ok_or_else(|| SyncError::Protocol("ECPublicKey message has no signature".into()))?;
        let signature = hex::decode(signature)
            .map_err(|_| SyncError::Protocol("signature is not valid hex".into()))?;

        // Trust anchor: the RSA key stored during phase 1. Without it the
        // exchange cannot proceed.
        let anchor = self
            .store
            .device(&msg.from)
            .await?
            .ok_or_else(|| SyncError::Protocol(format!("no trust anchor for peer {}", msg.from)))?;
        crypto::rsa_verify(&anchor.public_key_der, &remote_raw, &signature)?;

        self.ensure_ec_keypair().await;
        let derived = self.derive_secret_key(&remote_raw).await?;
        {
            let mut sessions = self.sessions.lock().await;
            let session = sessions.entry(msg.from.clone()).or_default();
            session.derived_secret = Some(derived);
            session.state = if msg.ack {
                SessionState::Ready
            } else {
                SessionState::EcAcked
            };
        }
        self.emit(PairingEvent::EcdhEstablished {
            from: msg.from.clone(),
            key: derived.to_vec(),
        });
        if msg.ack {
            // The handshake is exactly two EC messages; an ack only
            // triggers the phase-4 completion signal.
            return Ok(Some(Message {
                from: self.local_id.clone(),
                to: Some(msg.from.clone()),
                event: EventKind::ReadyToTransfer,
                data: None,
                ack: false,
            }));
        }
        let reply = self.build_ec_public_key(&msg.from, true).await?;
        Ok(Some(reply))
    }

    async fn handle_channel_key(&self, msg: &Message) -> Result<Option<Message>> {
        let ciphertext = decode_key_field(msg)?;
        let group_key = {
            let mut sessions = self.sessions.lock().await;
            let session = sessions.entry(msg.from.clone()).or_default();
            let derived = session.derived_secret.ok_or(SyncError::MissingDerivedKey)?;
            let group_key = crypto::aes_decrypt(&derived, &ciphertext)?;
            session.state = SessionState::GroupKeyExchanged;
            group_key
        };
        self.emit(PairingEvent::GroupKeyReceived {
            from: msg.from.clone(),
            key: group_key,
        });
        Ok(None)
    }

    async fn handle_ready_to_transfer(&self, msg: &Message) -> Result<Option<Message>> {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get_mut(&msg.from) {
            session.state = SessionState::Ready;
            debug!(peer = %msg.from, "peer signalled ready to transfer");
        }
        Ok(None)
    }

    async fn ensure_ec_keypair(&self) {
        let mut keypair = self.ec_keypair.lock().await;
        if keypair.is_none() {
            *keypair = Some(crypto::generate_ec_keypair());
        }
    }

    fn emit(&self, event: PairingEvent) {
        // The application may have dropped its receiver; events are
        // fire-and-forget.
        let _ = self.events.send(event);
    }
}

fn decode_key_field(msg: &Message) -> Result<Vec<u8>> {
    let key = msg
        .data
        .as_ref()
        .and_then(|d| d.key.as_deref())
        .ok_or_else(|| SyncError::Protocol("message has no key payload".into()))?;
    hex::decode(key).map_err(|_| SyncError::Protocol("key payload is not valid hex".into()))
}
