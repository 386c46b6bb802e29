//! Cryptographic backend selection.
//!
//! [`AeadProvider`] is the normal backend. [`DegradedProvider`] stands in
//! when the OS random source cannot be read: it still produces bytes and
//! digests but refuses every operation that would claim real protection.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use aes_gcm::{aead::Aead, Aes256Gcm, KeyInit, Nonce};
use phivault_core::{ProtectionMode, VaultError, VaultResult};
use rand::rngs::{OsRng, StdRng};
use rand::{RngCore, SeedableRng};
use sha2::{Digest, Sha256};

use crate::kdf::{self, DerivedKey, KdfParams};
use crate::NONCE_LEN;

/// Primitive operations the vault needs from a crypto backend.
pub trait CryptoProvider: Send + Sync {
    fn mode(&self) -> ProtectionMode;

    fn random_bytes(&self, buf: &mut [u8]) -> VaultResult<()>;

    fn derive_key(
        &self,
        password: &[u8],
        salt: &[u8],
        params: &KdfParams,
    ) -> VaultResult<DerivedKey>;

    /// Returns ciphertext with the 16-byte tag appended.
    fn auth_encrypt(
        &self,
        key: &DerivedKey,
        nonce: &[u8; NONCE_LEN],
        plaintext: &[u8],
    ) -> VaultResult<Vec<u8>>;

    /// Fails with [`VaultError::AuthenticationFailure`] on a bad tag.
    fn auth_decrypt(
        &self,
        key: &DerivedKey,
        nonce: &[u8; NONCE_LEN],
        ciphertext: &[u8],
    ) -> VaultResult<Vec<u8>>;

    fn hash(&self, data: &[u8]) -> [u8; 32];
}

/// AES-256-GCM + PBKDF2-HMAC-SHA-256 + OS randomness.
#[derive(Debug, Default, Clone, Copy)]
pub struct AeadProvider;

impl CryptoProvider for AeadProvider {
    fn mode(&self) -> ProtectionMode {
        ProtectionMode::Strong
    }

    fn random_bytes(&self, buf: &mut [u8]) -> VaultResult<()> {
        OsRng
            .try_fill_bytes(buf)
            .map_err(|e| VaultError::CryptoUnavailable(format!("OS random source failed: {e}")))
    }

    fn derive_key(
        &self,
        password: &[u8],
        salt: &[u8],
        params: &KdfParams,
    ) -> VaultResult<DerivedKey> {
        Ok(kdf::derive_key(password, salt, params))
    }

    fn auth_encrypt(
        &self,
        key: &DerivedKey,
        nonce: &[u8; NONCE_LEN],
        plaintext: &[u8],
    ) -> VaultResult<Vec<u8>> {
        let cipher = Aes256Gcm::new(key.as_bytes().into());
        cipher
            .encrypt(Nonce::from_slice(nonce), plaintext)
            .map_err(|_| VaultError::CryptoUnavailable("AES-256-GCM encryption failed".into()))
    }

    fn auth_decrypt(
        &self,
        key: &DerivedKey,
        nonce: &[u8; NONCE_LEN],
        ciphertext: &[u8],
    ) -> VaultResult<Vec<u8>> {
        let cipher = Aes256Gcm::new(key.as_bytes().into());
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| VaultError::AuthenticationFailure)
    }

    fn hash(&self, data: &[u8]) -> [u8; 32] {
        Sha256::digest(data).into()
    }
}

/// Fallback for hosts without a usable OS random source.
///
/// Bytes come from a userspace generator seeded from the clock and are
/// predictable. Key derivation and AEAD are refused outright.
pub struct DegradedProvider {
    rng: Mutex<StdRng>,
}

impl DegradedProvider {
    pub fn new() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Self::with_seed(seed)
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn refuse(op: &str) -> VaultError {
        VaultError::CryptoUnavailable(format!("{op} requires a strong crypto backend"))
    }
}

impl Default for DegradedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DegradedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DegradedProvider").finish_non_exhaustive()
    }
}

impl CryptoProvider for DegradedProvider {
    fn mode(&self) -> ProtectionMode {
        ProtectionMode::Degraded
    }

    fn random_bytes(&self, buf: &mut [u8]) -> VaultResult<()> {
        self.rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .fill_bytes(buf);
        Ok(())
    }

    fn derive_key(&self, _: &[u8], _: &[u8], _: &KdfParams) -> VaultResult<DerivedKey> {
        Err(Self::refuse("key derivation"))
    }

    fn auth_encrypt(&self, _: &DerivedKey, _: &[u8; NONCE_LEN], _: &[u8]) -> VaultResult<Vec<u8>> {
        Err(Self::refuse("authenticated encryption"))
    }

    fn auth_decrypt(&self, _: &DerivedKey, _: &[u8; NONCE_LEN], _: &[u8]) -> VaultResult<Vec<u8>> {
        Err(Self::refuse("authenticated decryption"))
    }

    fn hash(&self, data: &[u8]) -> [u8; 32] {
        Sha256::digest(data).into()
    }
}

/// Probe the OS random source and pick a backend.
pub fn detect_provider() -> Arc<dyn CryptoProvider> {
    let mut probe = [0u8; 16];
    match OsRng.try_fill_bytes(&mut probe) {
        Ok(()) => {
            tracing::debug!("OS random source available, using AES-256-GCM provider");
            Arc::new(AeadProvider)
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "OS random source unavailable, falling back to degraded provider; \
                 exported fields will only be obfuscated"
            );
            Arc::new(DegradedProvider::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> DerivedKey {
        DerivedKey::from_bytes([7u8; 32])
    }

    #[test]
    fn test_aead_roundtrip() {
        let p = AeadProvider;
        let nonce = [3u8; NONCE_LEN];
        let ct = p.auth_encrypt(&test_key(), &nonce, b"blood type O-").unwrap();
        assert_eq!(ct.len(), b"blood type O-".len() + crate::TAG_LEN);
        let pt = p.auth_decrypt(&test_key(), &nonce, &ct).unwrap();
        assert_eq!(pt, b"blood type O-");
    }

    #[test]
    fn test_aead_tamper_is_authentication_failure() {
        let p = AeadProvider;
        let nonce = [3u8; NONCE_LEN];
        let mut ct = p.auth_encrypt(&test_key(), &nonce, b"payload").unwrap();
        ct[0] ^= 0x01;
        let err = p.auth_decrypt(&test_key(), &nonce, &ct).unwrap_err();
        assert!(matches!(err, VaultError::AuthenticationFailure));
    }

    #[test]
    fn test_aead_wrong_key() {
        let p = AeadProvider;
        let nonce = [3u8; NONCE_LEN];
        let ct = p.auth_encrypt(&test_key(), &nonce, b"payload").unwrap();
        let other = DerivedKey::from_bytes([8u8; 32]);
        assert!(matches!(
            p.auth_decrypt(&other, &nonce, &ct),
            Err(VaultError::AuthenticationFailure)
        ));
    }

    #[test]
    fn test_hash_sha256_vector() {
        let digest = AeadProvider.hash(b"abc");
        assert_eq!(
            digest.to_vec(),
            hex::decode("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
                .unwrap()
        );
        assert_eq!(DegradedProvider::with_seed(1).hash(b"abc"), digest);
    }

    #[test]
    fn test_random_bytes_fill() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        AeadProvider.random_bytes(&mut a).unwrap();
        AeadProvider.random_bytes(&mut b).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_degraded_generates_but_refuses_crypto() {
        let p = DegradedProvider::with_seed(42);
        assert_eq!(p.mode(), ProtectionMode::Degraded);

        let mut buf = [0u8; 32];
        p.random_bytes(&mut buf).unwrap();
        assert_ne!(buf, [0u8; 32]);

        assert!(matches!(
            p.derive_key(b"pw", &[0u8; 16], &KdfParams::default()),
            Err(VaultError::CryptoUnavailable(_))
        ));
        assert!(matches!(
            p.auth_encrypt(&test_key(), &[0u8; NONCE_LEN], b"x"),
            Err(VaultError::CryptoUnavailable(_))
        ));
        assert!(matches!(
            p.auth_decrypt(&test_key(), &[0u8; NONCE_LEN], b"x"),
            Err(VaultError::CryptoUnavailable(_))
        ));
    }

    #[test]
    fn test_detect_provider_is_strong_here() {
        assert_eq!(detect_provider().mode(), ProtectionMode::Strong);
    }
}
