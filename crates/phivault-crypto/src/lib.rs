//! phivault-crypto: cryptographic backends for the ephemeral PHI vault
//!
//! Two independent protection layers:
//!
//! ```text
//! in memory:  serde_json bytes --XOR(process key)--> base64 --> base64     (obfuscation)
//! on export:  field value --PBKDF2-HMAC-SHA-256(password, salt)--> AES-256-GCM
//!             ciphertext = base64(salt[16] || nonce[12] || ct+tag)
//! ```
//!
//! The in-memory layer is not encryption; it keeps plaintext PHI out of
//! casual heap dumps. Anything that leaves the process goes through the
//! AEAD layer. When the OS random source is missing, the provider degrades
//! and field sealing falls back to obfuscation tagged `XOR-BASE64`.

pub mod field;
pub mod kdf;
pub mod obfuscation;
pub mod provider;

pub use field::{EncryptedField, FieldAlgorithm, FieldEncryptor};
pub use kdf::{derive_key, DerivedKey, KdfParams};
pub use obfuscation::{deobfuscate, obfuscate, ProcessKey};
pub use provider::{detect_provider, AeadProvider, CryptoProvider, DegradedProvider};

/// PBKDF2 salt length in bytes
pub const SALT_LEN: usize = 16;

/// AES-GCM nonce length in bytes (96-bit)
pub const NONCE_LEN: usize = 12;

/// Derived field key length in bytes (256-bit)
pub const KEY_LEN: usize = 32;

/// Per-process obfuscation key length in bytes
pub const PROCESS_KEY_LEN: usize = 32;

/// AES-GCM authentication tag length in bytes
pub const TAG_LEN: usize = 16;

pub use phivault_core::config::MIN_KDF_ITERATIONS;
