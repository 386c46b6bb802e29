//! In-memory obfuscation: XOR with a 32-byte key, then base64 twice.
//!
//! Not cryptographically strong. It keeps plaintext out of casual memory
//! inspection and is also the degraded-mode field protection.

use base64::{engine::general_purpose::STANDARD as B64, Engine};
use phivault_core::{VaultError, VaultResult};
use zeroize::Zeroize;

use crate::provider::CryptoProvider;
use crate::PROCESS_KEY_LEN;

/// Random per-vault key for the in-memory obfuscation layer.
///
/// Generated once per vault instance. Never persisted, never exported,
/// zeroized on drop.
pub struct ProcessKey {
    bytes: [u8; PROCESS_KEY_LEN],
}

impl ProcessKey {
    pub fn generate(provider: &dyn CryptoProvider) -> VaultResult<Self> {
        let mut bytes = [0u8; PROCESS_KEY_LEN];
        provider.random_bytes(&mut bytes)?;
        Ok(Self { bytes })
    }

    pub fn from_bytes(bytes: [u8; PROCESS_KEY_LEN]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; PROCESS_KEY_LEN] {
        &self.bytes
    }
}

impl Drop for ProcessKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for ProcessKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

fn xor_cycle(data: &mut [u8], key: &[u8; 32]) {
    for (b, k) in data.iter_mut().zip(key.iter().cycle()) {
        *b ^= k;
    }
}

/// `base64(base64(plaintext XOR key))`
pub fn obfuscate(plaintext: &[u8], key: &[u8; 32]) -> String {
    let mut buf = plaintext.to_vec();
    xor_cycle(&mut buf, key);
    let inner = B64.encode(&buf);
    buf.zeroize();
    B64.encode(inner)
}

/// Inverse of [`obfuscate`]. Malformed input is [`VaultError::CorruptionDetected`].
pub fn deobfuscate(text: &str, key: &[u8; 32]) -> VaultResult<Vec<u8>> {
    let inner = B64
        .decode(text)
        .map_err(|_| VaultError::CorruptionDetected("outer encoding is not valid base64".into()))?;
    let mut buf = B64
        .decode(&inner)
        .map_err(|_| VaultError::CorruptionDetected("inner encoding is not valid base64".into()))?;
    xor_cycle(&mut buf, key);
    Ok(buf)
}
