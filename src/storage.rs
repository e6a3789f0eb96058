//! Consumed device-store contract.
//!
//! Persistence of the local identity's long-term RSA keypair and of the
//! public keys learned from paired peers is the host application's concern.
//! The pairing engine only reads the local keys and records trust anchors
//! through this trait.

use async_trait::async_trait;
use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::errors::Result;

/// The local device's long-term key material.
#[derive(Clone)]
pub struct DeviceKeys {
    pub private_key: RsaPrivateKey,
    pub public_key: RsaPublicKey,
    /// DER (SubjectPublicKeyInfo) export of `public_key`; this is the form
    /// sent during the RSA exchange.
    pub public_key_der: Vec<u8>,
}

/// A remote device whose RSA public key has been learned and persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PairedDevice {
    pub peer_id: String,
    /// DER-encoded RSA public key; the trust anchor for verifying that
    /// peer's EC exchange signatures.
    pub public_key_der: Vec<u8>,
}

/// Trait for persisting pairing data.
///
/// Implemented by the host application (e.g. over a local database);
/// [`crate::testing::MemoryDeviceStore`] provides an in-memory version.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// The local device's RSA keypair.
    async fn current_device(&self) -> Result<DeviceKeys>;

    /// Record (or replace) a paired device's public key.
    async fn add_paired_device(&self, record: PairedDevice) -> Result<()>;

    /// Look up one paired device by peer id.
    async fn device(&self, peer_id: &str) -> Result<Option<PairedDevice>>;

    /// List every paired device.
    async fn list_devices(&self) -> Result<Vec<PairedDevice>>;
}
