use thiserror::Error;

pub type VaultResult<T> = Result<T, VaultError>;

/// Failure taxonomy shared by every phivault crate.
///
/// Messages never carry key material, salts, nonces, or plaintext.
#[derive(Debug, Error)]
pub enum VaultError {
    /// A value could not be turned into storable bytes (or back).
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An obfuscated payload could not be reversed.
    #[error("corruption detected: {0}")]
    CorruptionDetected(String),

    /// AEAD tag verification failed: wrong key or tampered ciphertext.
    #[error("authentication failed: wrong password or tampered data")]
    AuthenticationFailure,

    /// A single encrypted field could not be decrypted.
    #[error("decryption failed: {0}")]
    DecryptionFailure(String),

    /// Malformed export bundle.
    #[error("invalid bundle format: {0}")]
    InvalidFormat(String),

    /// Bundle-level integrity failure.
    #[error("bundle checksum mismatch (expected {expected}, computed {actual})")]
    ChecksumMismatch { expected: String, actual: String },

    /// The strong cryptographic backend cannot serve this request.
    #[error("cryptographic backend unavailable: {0}")]
    CryptoUnavailable(String),

    #[error("config error: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
