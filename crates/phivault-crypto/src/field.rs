//! Field-level sealing for export bundles.
//!
//! Strong format (all base64, standard alphabet):
//! ```text
//! ciphertext = salt[16] || nonce[12] || AES-256-GCM(ct || tag[16])
//! nonce      = nonce[12]   (duplicated for readers; the embedded copy is authoritative)
//! ```
//! Weak format: `ciphertext = obfuscate(value, SHA-256(password))`, `nonce = ""`.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as B64, Engine};
use phivault_core::{ProtectionMode, VaultError, VaultResult};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::kdf::KdfParams;
use crate::obfuscation::{deobfuscate, obfuscate};
use crate::provider::CryptoProvider;
use crate::{NONCE_LEN, SALT_LEN, TAG_LEN};

/// How an [`EncryptedField`] was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldAlgorithm {
    #[serde(rename = "AES-256-GCM")]
    StrongAead,
    /// Degraded mode only. Not fit for regulated data.
    #[serde(rename = "XOR-BASE64")]
    WeakObfuscation,
}

/// A self-contained sealed field value, as it appears inside a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EncryptedField {
    pub ciphertext: String,
    pub nonce: String,
    pub algorithm: FieldAlgorithm,
}

/// Seals and opens individual field values under a password.
#[derive(Clone)]
pub struct FieldEncryptor {
    provider: Arc<dyn CryptoProvider>,
    params: KdfParams,
}

impl FieldEncryptor {
    pub fn new(provider: Arc<dyn CryptoProvider>, params: KdfParams) -> Self {
        Self { provider, params }
    }

    pub fn mode(&self) -> ProtectionMode {
        self.provider.mode()
    }

    pub fn encrypt_field(
        &self,
        value: &str,
        password: &SecretString,
    ) -> VaultResult<EncryptedField> {
        match self.provider.mode() {
            ProtectionMode::Strong => self.seal_strong(value, password),
            ProtectionMode::Degraded => {
                tracing::warn!("sealing field with weak obfuscation (degraded crypto backend)");
                Ok(self.seal_weak(value, password))
            }
        }
    }

    /// Any failure is [`VaultError::DecryptionFailure`]; no partial plaintext
    /// is ever returned.
    pub fn decrypt_field(
        &self,
        field: &EncryptedField,
        password: &SecretString,
    ) -> VaultResult<String> {
        match field.algorithm {
            FieldAlgorithm::StrongAead => self.open_strong(field, password),
            FieldAlgorithm::WeakObfuscation => self.open_weak(field, password),
        }
    }

    fn seal_strong(&self, value: &str, password: &SecretString) -> VaultResult<EncryptedField> {
        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        self.provider.random_bytes(&mut salt)?;
        self.provider.random_bytes(&mut nonce)?;

        let key = self
            .provider
            .derive_key(password.expose_secret().as_bytes(), &salt, &self.params)?;
        let sealed = self.provider.auth_encrypt(&key, &nonce, value.as_bytes())?;

        let mut blob = Vec::with_capacity(SALT_LEN + NONCE_LEN + sealed.len());
        blob.extend_from_slice(&salt);
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&sealed);

        Ok(EncryptedField {
            ciphertext: B64.encode(&blob),
            nonce: B64.encode(nonce),
            algorithm: FieldAlgorithm::StrongAead,
        })
    }

    fn seal_weak(&self, value: &str, password: &SecretString) -> EncryptedField {
        let key = self.provider.hash(password.expose_secret().as_bytes());
        EncryptedField {
            ciphertext: obfuscate(value.as_bytes(), &key),
            nonce: String::new(),
            algorithm: FieldAlgorithm::WeakObfuscation,
        }
    }

    fn open_strong(&self, field: &EncryptedField, password: &SecretString) -> VaultResult<String> {
        if self.provider.mode() == ProtectionMode::Degraded {
            return Err(VaultError::DecryptionFailure(
                "AES-256-GCM field cannot be opened without a strong crypto backend".into(),
            ));
        }

        let blob = B64
            .decode(&field.ciphertext)
            .map_err(|_| VaultError::DecryptionFailure("ciphertext is not valid base64".into()))?;
        if blob.len() < SALT_LEN + NONCE_LEN + TAG_LEN {
            return Err(VaultError::DecryptionFailure(format!(
                "ciphertext too short: {} bytes (minimum {})",
                blob.len(),
                SALT_LEN + NONCE_LEN + TAG_LEN
            )));
        }

        let (salt, rest) = blob.split_at(SALT_LEN);
        let (nonce_bytes, sealed) = rest.split_at(NONCE_LEN);
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(nonce_bytes);

        let key = self
            .provider
            .derive_key(password.expose_secret().as_bytes(), salt, &self.params)
            .map_err(|e| VaultError::DecryptionFailure(e.to_string()))?;
        let plain = self
            .provider
            .auth_decrypt(&key, &nonce, sealed)
            .map_err(|e| VaultError::DecryptionFailure(e.to_string()))?;

        String::from_utf8(plain)
            .map_err(|_| VaultError::DecryptionFailure("plaintext is not valid UTF-8".into()))
    }

    fn open_weak(&self, field: &EncryptedField, password: &SecretString) -> VaultResult<String> {
        let key = self.provider.hash(password.expose_secret().as_bytes());
        let plain = deobfuscate(&field.ciphertext, &key)
            .map_err(|e| VaultError::DecryptionFailure(e.to_string()))?;
        String::from_utf8(plain)
            .map_err(|_| VaultError::DecryptionFailure("plaintext is not valid UTF-8".into()))
    }
}

impl std::fmt::Debug for FieldEncryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldEncryptor")
            .field("mode", &self.provider.mode())
            .field("params", &self.params)
            .finish()
    }
}
