//! Error types for pairing and channel operations.

/// Result type for all pairsync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Comprehensive error type for channel management and the pairing handshake.
///
/// Caller-input errors (`InvalidPeer`, `PartialSubscription`) and protocol
/// precondition errors (`MissingExchangeKey`, `MissingDerivedKey`) are
/// returned from the call that detected them and are never retried
/// internally. Errors raised while processing an inbound message are logged
/// by the message router and the affected handshake simply does not advance;
/// no error is fatal to the peer.
#[derive(thiserror::Error, Debug)]
pub enum SyncError {
    /// The supplied peer id was empty, or no channel is registered for it.
    #[error("invalid peer value")]
    InvalidPeer,
    /// A batch subscription completed with failures for the listed peers.
    #[error("subscription failed for peers: {0:?}")]
    PartialSubscription(Vec<String>),
    /// Transport-level connection failure, surfaced from `init`.
    #[error("connection error: {0}")]
    Connection(String),
    /// The transport rejected a channel subscription.
    #[error("subscribe failed: {0}")]
    Subscription(String),
    /// No message can be published because no channel is registered under
    /// the given name.
    #[error("not a subscribed channel: {0}")]
    UnknownChannel(String),
    /// No RSA-exchange symmetric key was provisioned for the session.
    /// The key must be supplied out-of-band (QR code, pairing link) before
    /// initiating or responding to a public-key exchange.
    #[error("no exchange encryption key provisioned for this session")]
    MissingExchangeKey,
    /// `send_channel_key` was called before ECDH derivation completed.
    #[error("no derived secret available for this session")]
    MissingDerivedKey,
    /// Ciphertext could not be decrypted under the expected key. Treated as
    /// a hard failure: retrying cannot change a wrong key.
    #[error("decryption failed")]
    Decryption,
    /// Signature over a received EC public key did not verify; the exchange
    /// is aborted and never proceeds to key derivation.
    #[error("signature verification failed")]
    SignatureVerification,
    /// ECDH derivation was attempted before a local EC keypair exists.
    #[error("no local EC keypair available for derivation")]
    KeyDerivation,
    /// A malformed or incomplete protocol message.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// A cryptographic primitive failed (key import, encryption setup).
    #[error("crypto error: {0}")]
    Crypto(String),
    /// Device store failure.
    #[error("storage error: {0}")]
    Storage(String),
    /// Wire (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}
