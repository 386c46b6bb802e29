use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{VaultError, VaultResult};

/// Lowest PBKDF2-HMAC-SHA-256 iteration count the vault accepts.
pub const MIN_KDF_ITERATIONS: u32 = 100_000;

/// Top-level vault configuration (optionally loaded from phivault.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub store: StoreConfig,
    pub audit: AuditConfig,
    pub crypto: CryptoConfig,
    pub health: HealthConfig,
    pub log: LogConfig,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Entry time-to-live in seconds (default: 28800 = 8 h)
    pub ttl_secs: u64,
    /// Background sweep period in seconds (default: 1800 = 30 min)
    pub sweep_interval_secs: u64,
    /// Empty the vault when the sweeper is cancelled (default: true)
    #[serde(default = "default_true")]
    pub clear_on_shutdown: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Ring capacity; oldest events are evicted first (default: 1000)
    pub capacity: usize,
    /// Case-insensitive substrings marking a key as sensitive in audit records
    pub redaction_markers: Vec<String>,
    /// Disable key redaction entirely (default: false)
    pub redaction_disabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// PBKDF2 iterations for field keys (default: 100000, minimum 100000)
    pub kdf_iterations: u32,
    /// Permit running without an OS random source. Fields are then tagged
    /// WeakObfuscation and are not fit for regulated data. (default: false)
    pub allow_degraded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Item count above which health reports Warning (default: 1000)
    pub warn_item_count: usize,
    /// Total payload bytes above which health reports Critical (default: 10 MiB)
    pub max_total_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 8 * 60 * 60,
            sweep_interval_secs: 30 * 60,
            clear_on_shutdown: true,
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            redaction_markers: vec!["patient".into(), "schedule".into()],
            redaction_disabled: false,
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            kdf_iterations: MIN_KDF_ITERATIONS,
            allow_degraded: false,
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            warn_item_count: 1000,
            max_total_bytes: 10 * 1024 * 1024,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl StoreConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl VaultConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> VaultResult<Self> {
        let config: VaultConfig =
            toml::from_str(s).map_err(|e| VaultError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse, and validate a TOML file.
    pub fn load(path: &Path) -> VaultResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "loaded vault config");
        Ok(config)
    }

    /// Reject settings the vault cannot honour.
    pub fn validate(&self) -> VaultResult<()> {
        if self.crypto.kdf_iterations < MIN_KDF_ITERATIONS {
            return Err(VaultError::InvalidConfig(format!(
                "crypto.kdf_iterations must be at least {MIN_KDF_ITERATIONS}, got {}",
                self.crypto.kdf_iterations
            )));
        }
        if self.audit.capacity == 0 {
            return Err(VaultError::InvalidConfig(
                "audit.capacity must be greater than zero".into(),
            ));
        }
        if self.store.sweep_interval_secs == 0 {
            return Err(VaultError::InvalidConfig(
                "store.sweep_interval_secs must be greater than zero".into(),
            ));
        }
        if !matches!(self.log.format.as_str(), "json" | "text") {
            return Err(VaultError::InvalidConfig(format!(
                "log.format must be \"json\" or \"text\", got {:?}",
                self.log.format
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[store]
ttl_secs = 3600
sweep_interval_secs = 60
clear_on_shutdown = false

[audit]
capacity = 50
redaction_markers = ["mrn", "dob"]

[crypto]
kdf_iterations = 200000
allow_degraded = true

[health]
warn_item_count = 10
max_total_bytes = 4096

[log]
level = "debug"
format = "json"
"#;
        let config = VaultConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.store.ttl(), Duration::from_secs(3600));
        assert_eq!(config.store.sweep_interval(), Duration::from_secs(60));
        assert!(!config.store.clear_on_shutdown);
        assert_eq!(config.audit.capacity, 50);
        assert_eq!(config.audit.redaction_markers, vec!["mrn", "dob"]);
        assert_eq!(config.crypto.kdf_iterations, 200_000);
        assert!(config.crypto.allow_degraded);
        assert_eq!(config.health.warn_item_count, 10);
        assert_eq!(config.health.max_total_bytes, 4096);
        assert_eq!(config.log.format, "json");
    }

    #[test]
    fn test_parse_defaults() {
        let config = VaultConfig::from_toml_str("").unwrap();
        assert_eq!(config.store.ttl_secs, 28_800);
        assert_eq!(config.store.sweep_interval_secs, 1_800);
        assert!(config.store.clear_on_shutdown);
        assert_eq!(config.audit.capacity, 1000);
        assert_eq!(config.audit.redaction_markers, vec!["patient", "schedule"]);
        assert!(!config.audit.redaction_disabled);
        assert_eq!(config.crypto.kdf_iterations, MIN_KDF_ITERATIONS);
        assert!(!config.crypto.allow_degraded);
        assert_eq!(config.health.warn_item_count, 1000);
        assert_eq!(config.health.max_total_bytes, 10_485_760);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[store]
ttl_secs = 0
"#;
        let config = VaultConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.store.ttl_secs, 0);
        // unspecified fields in a present section still default
        assert!(config.store.clear_on_shutdown);
        assert_eq!(config.store.sweep_interval_secs, 1_800);
        assert_eq!(config.audit.capacity, 1000);
    }

    #[test]
    fn test_rejects_weak_kdf() {
        let err = VaultConfig::from_toml_str("[crypto]\nkdf_iterations = 99999\n").unwrap_err();
        assert!(matches!(err, VaultError::InvalidConfig(_)));
        assert!(err.to_string().contains("kdf_iterations"));
    }

    #[test]
    fn test_rejects_zero_audit_capacity() {
        let err = VaultConfig::from_toml_str("[audit]\ncapacity = 0\n").unwrap_err();
        assert!(matches!(err, VaultError::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_unknown_log_format() {
        let err = VaultConfig::from_toml_str("[log]\nformat = \"xml\"\n").unwrap_err();
        assert!(matches!(err, VaultError::InvalidConfig(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("phivault.toml");
        std::fs::write(&path, "[health]\nwarn_item_count = 3\n").unwrap();
        let config = VaultConfig::load(&path).unwrap();
        assert_eq!(config.health.warn_item_count, 3);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = VaultConfig::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, VaultError::Io(_)));
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = VaultConfig::default();
        let serialized = toml::to_string(&config).unwrap();
        let parsed = VaultConfig::from_toml_str(&serialized).unwrap();
        assert_eq!(parsed.store.ttl_secs, config.store.ttl_secs);
        assert_eq!(parsed.audit.redaction_markers, config.audit.redaction_markers);
    }
}
