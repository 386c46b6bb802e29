use serde::{Deserialize, Serialize};
use std::fmt;

/// Operation recorded by an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditAction {
    Store,
    Retrieve,
    Delete,
    Expire,
    Clear,
    Export,
    Import,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditAction::Store => "store",
            AuditAction::Retrieve => "retrieve",
            AuditAction::Delete => "delete",
            AuditAction::Expire => "expire",
            AuditAction::Clear => "clear",
            AuditAction::Export => "export",
            AuditAction::Import => "import",
        };
        f.write_str(s)
    }
}

/// Strength of the cryptographic backend a vault is running on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtectionMode {
    /// OS randomness, PBKDF2 and AES-256-GCM are all available.
    Strong,
    /// No OS random source. Field protection falls back to obfuscation.
    Degraded,
}

impl fmt::Display for ProtectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtectionMode::Strong => f.write_str("strong"),
            ProtectionMode::Degraded => f.write_str("degraded"),
        }
    }
}
