//! Cryptographic primitives for the pairing handshake.
//!
//! Thin adapter over the RustCrypto crates: AES-128-GCM for the symmetric
//! exchanges, PKCS#1 v1.5 RSA signatures over SHA-256 for the long-term
//! trust anchors, and P-256 ECDH + HKDF for deriving the per-pair session
//! key. Ciphertexts are framed as `nonce || ciphertext` so a single byte
//! string travels on the wire.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng as AeadOsRng};
use aes_gcm::{Aes128Gcm, Nonce};
use hkdf::Hkdf;
use p256::ecdh::EphemeralSecret;
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::errors::{Result, SyncError};

/// AES-GCM nonce length in bytes.
const NONCE_LEN: usize = 12;

/// Derived session keys are 128 bits, sized for AES-128-GCM.
pub const DERIVED_KEY_LEN: usize = 16;

/// Domain separator for the ECDH key derivation.
const HKDF_INFO: &[u8] = b"pairsync ecdh aes-128-gcm";

/// Ephemeral EC keypair used for the ECDH exchange. One keypair exists per
/// peer identity and is reused across sessions within a process lifetime.
pub type EcKeyPair = EphemeralSecret;

/// Encrypt `plaintext` under a 128-bit key with AES-GCM.
///
/// Returns `nonce || ciphertext`.
pub fn aes_encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes128Gcm::new_from_slice(key)
        .map_err(|_| SyncError::Crypto("AES key must be 16 bytes".into()))?;
    let nonce = Aes128Gcm::generate_nonce(&mut AeadOsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| SyncError::Crypto("AES-GCM encryption failed".into()))?;
    let mut framed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    framed.extend_from_slice(&nonce);
    framed.extend_from_slice(&ciphertext);
    Ok(framed)
}

/// Decrypt a `nonce || ciphertext` frame produced by [`aes_encrypt`].
pub fn aes_decrypt(key: &[u8], framed: &[u8]) -> Result<Vec<u8>> {
    if framed.len() <= NONCE_LEN {
        return Err(SyncError::Decryption);
    }
    let cipher = Aes128Gcm::new_from_slice(key).map_err(|_| SyncError::Decryption)?;
    let (nonce, ciphertext) = framed.split_at(NONCE_LEN);
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| SyncError::Decryption)
}

/// Generate a fresh long-term RSA keypair for the local device.
pub fn generate_rsa_keypair(bits: usize) -> Result<(RsaPrivateKey, RsaPublicKey)> {
    let private = RsaPrivateKey::new(&mut OsRng, bits)
        .map_err(|e| SyncError::Crypto(format!("RSA key generation failed: {e}")))?;
    let public = RsaPublicKey::from(&private);
    Ok((private, public))
}

/// Export an RSA public key as DER (SubjectPublicKeyInfo) bytes, the form
/// exchanged on the wire and persisted in the device store.
pub fn export_rsa_public_key(public: &RsaPublicKey) -> Result<Vec<u8>> {
    let der = public
        .to_public_key_der()
        .map_err(|e| SyncError::Crypto(format!("RSA public key export failed: {e}")))?;
    Ok(der.as_bytes().to_vec())
}

/// Import an RSA public key from DER bytes.
pub fn import_rsa_public_key(der: &[u8]) -> Result<RsaPublicKey> {
    RsaPublicKey::from_public_key_der(der)
        .map_err(|e| SyncError::Crypto(format!("RSA public key import failed: {e}")))
}

/// Sign `data` with the long-term RSA private key (PKCS#1 v1.5 / SHA-256).
pub fn rsa_sign(private: &RsaPrivateKey, data: &[u8]) -> Result<Vec<u8>> {
    let digest = Sha256::digest(data);
    private
        .sign(Pkcs1v15Sign::new::<Sha256>(), digest.as_slice())
        .map_err(|e| SyncError::Crypto(format!("RSA signing failed: {e}")))
}

/// Verify a PKCS#1 v1.5 / SHA-256 signature over `data`.
///
/// Returns [`SyncError::SignatureVerification`] when the signature does not
/// match; the caller must abort the exchange rather than proceed on
/// unverified input.
pub fn rsa_verify(public_der: &[u8], data: &[u8], signature: &[u8]) -> Result<()> {
    let public = import_rsa_public_key(public_der)?;
    let digest = Sha256::digest(data);
    public
        .verify(Pkcs1v15Sign::new::<Sha256>(), digest.as_slice(), signature)
        .map_err(|_| SyncError::SignatureVerification)
}

/// Generate an ephemeral P-256 keypair.
pub fn generate_ec_keypair() -> EcKeyPair {
    EphemeralSecret::random(&mut OsRng)
}

/// Export the public half of an EC keypair as an uncompressed SEC1 point,
/// the raw form signed and sent during the EC exchange.
pub fn export_raw_public_key(keypair: &EcKeyPair) -> Vec<u8> {
    keypair.public_key().to_sec1_bytes().into_vec()
}

/// Perform ECDH against a raw remote public key and derive a 128-bit
/// symmetric key suitable for AES-GCM.
pub fn derive_ecdh(local: &EcKeyPair, remote_raw: &[u8]) -> Result<[u8; DERIVED_KEY_LEN]> {
    let remote = p256::PublicKey::from_sec1_bytes(remote_raw)
        .map_err(|_| SyncError::Crypto("invalid remote EC public key".into()))?;
    let shared = local.diffie_hellman(&remote);
    let hkdf = Hkdf::<Sha256>::new(None, shared.raw_secret_bytes().as_slice());
    let mut okm = [0u8; DERIVED_KEY_LEN];
    hkdf.expand(HKDF_INFO, &mut okm)
        .map_err(|_| SyncError::KeyDerivation)?;
    Ok(okm)
}
