//! Key derivation: password + salt → 256-bit field key via PBKDF2-HMAC-SHA-256

use phivault_core::{VaultError, VaultResult};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::{KEY_LEN, MIN_KDF_ITERATIONS};

/// A 256-bit key derived from a password. Lives only for one field operation.
///
/// Zeroized on drop to prevent secrets lingering in memory.
pub struct DerivedKey {
    bytes: [u8; KEY_LEN],
}

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// PBKDF2 parameters for field keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    iterations: u32,
}

impl KdfParams {
    /// Iteration counts below [`MIN_KDF_ITERATIONS`] are rejected.
    pub fn new(iterations: u32) -> VaultResult<Self> {
        if iterations < MIN_KDF_ITERATIONS {
            return Err(VaultError::InvalidConfig(format!(
                "PBKDF2 iterations must be at least {MIN_KDF_ITERATIONS}, got {iterations}"
            )));
        }
        Ok(Self { iterations })
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: MIN_KDF_ITERATIONS,
        }
    }
}

/// Derive a 256-bit key from a password and salt.
///
/// The salt should be 16 random bytes stored next to the ciphertext
/// (it does not need to be secret).
pub fn derive_key(password: &[u8], salt: &[u8], params: &KdfParams) -> DerivedKey {
    DerivedKey::from_bytes(pbkdf2_sha256(password, salt, params.iterations))
}

fn pbkdf2_sha256(password: &[u8], salt: &[u8], rounds: u32) -> [u8; KEY_LEN] {
    let mut out = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, rounds, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pbkdf2_known_vector() {
        // PBKDF2-HMAC-SHA256("password", "salt", c=1, dkLen=32)
        let out = pbkdf2_sha256(b"password", b"salt", 1);
        assert_eq!(
            out.to_vec(),
            hex::decode("120fb6cffcf8b32c43e7225256c4f837a86548c92ccc35480805987cb70be17b").unwrap()
        );
    }

    #[test]
    fn test_kdf_deterministic() {
        let params = KdfParams::default();
        let key1 = derive_key(b"test-password-123", &[1u8; 16], &params);
        let key2 = derive_key(b"test-password-123", &[1u8; 16], &params);
        assert_eq!(key1.as_bytes(), key2.as_bytes(), "KDF must be deterministic");
    }

    #[test]
    fn test_kdf_different_passwords() {
        let params = KdfParams::default();
        let key1 = derive_key(b"password-a", &[1u8; 16], &params);
        let key2 = derive_key(b"password-b", &[1u8; 16], &params);
        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_kdf_different_salts() {
        let params = KdfParams::default();
        let key1 = derive_key(b"same-password", &[1u8; 16], &params);
        let key2 = derive_key(b"same-password", &[2u8; 16], &params);
        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_params_floor() {
        assert_eq!(KdfParams::default().iterations(), 100_000);
        assert!(KdfParams::new(99_999).is_err());
        assert_eq!(KdfParams::new(250_000).unwrap().iterations(), 250_000);
    }

    #[test]
    fn test_debug_is_redacted() {
        let key = DerivedKey::from_bytes([0x42; KEY_LEN]);
        let dbg = format!("{key:?}");
        assert!(dbg.contains("[REDACTED]"));
        assert!(!dbg.contains("66"));
    }
}
