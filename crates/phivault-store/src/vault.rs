//! The vault facade owned by the host application.
//!
//! Construct one per process (or per tenant) at the composition root and
//! clone it freely; clones share state.

use std::sync::Arc;

use phivault_core::{
    Clock, ProtectionMode, SystemClock, VaultConfig, VaultError, VaultResult,
};
use phivault_crypto::{detect_provider, CryptoProvider, FieldEncryptor, KdfParams};
use secrecy::SecretString;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::audit::{AuditEvent, AuditLog, KeyRedaction};
use crate::bundle::{BundleCodec, ImportOptions, ImportReport};
use crate::store::{EphemeralStore, HealthReport, StorageStats};

struct Inner {
    config: VaultConfig,
    mode: ProtectionMode,
    audit: Arc<AuditLog>,
    store: EphemeralStore,
    codec: BundleCodec,
}

/// Ephemeral encrypted record vault
#[derive(Clone)]
pub struct Vault {
    inner: Arc<Inner>,
}

/// Assembles a [`Vault`] from explicit parts.
pub struct VaultBuilder {
    config: VaultConfig,
    provider: Option<Arc<dyn CryptoProvider>>,
    clock: Option<Arc<dyn Clock>>,
    redaction: Option<KeyRedaction>,
}

impl VaultBuilder {
    pub fn provider(mut self, provider: Arc<dyn CryptoProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Overrides the policy derived from `audit.redaction_markers`.
    pub fn redaction(mut self, redaction: KeyRedaction) -> Self {
        self.redaction = Some(redaction);
        self
    }

    pub fn build(self) -> VaultResult<Vault> {
        let config = self.config;
        config.validate()?;

        let provider = self.provider.unwrap_or_else(detect_provider);
        let mode = provider.mode();
        match mode {
            ProtectionMode::Strong => {}
            ProtectionMode::Degraded if config.crypto.allow_degraded => {
                tracing::warn!(
                    "vault running in degraded mode: exported fields use XOR-BASE64 obfuscation \
                     and must not carry regulated data"
                );
            }
            ProtectionMode::Degraded => {
                return Err(VaultError::CryptoUnavailable(
                    "no OS random source; set crypto.allow_degraded to run with obfuscation only"
                        .into(),
                ))
            }
        }

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let redaction = self
            .redaction
            .unwrap_or_else(|| KeyRedaction::from_config(&config.audit));

        let audit = Arc::new(AuditLog::new(config.audit.capacity, redaction, clock.clone()));
        let store = EphemeralStore::new(&config, provider.as_ref(), clock, audit.clone())?;
        let params = KdfParams::new(config.crypto.kdf_iterations)?;
        let codec = BundleCodec::new(FieldEncryptor::new(provider, params));

        tracing::debug!(
            mode = %mode,
            ttl_secs = config.store.ttl_secs,
            audit_capacity = config.audit.capacity,
            "vault ready"
        );

        Ok(Vault {
            inner: Arc::new(Inner {
                config,
                mode,
                audit,
                store,
                codec,
            }),
        })
    }
}

impl Vault {
    /// System clock and auto-detected crypto backend.
    pub fn new(config: VaultConfig) -> VaultResult<Self> {
        Self::builder(config).build()
    }

    pub fn with_parts(
        config: VaultConfig,
        provider: Arc<dyn CryptoProvider>,
        clock: Arc<dyn Clock>,
    ) -> VaultResult<Self> {
        Self::builder(config).provider(provider).clock(clock).build()
    }

    pub fn builder(config: VaultConfig) -> VaultBuilder {
        VaultBuilder {
            config,
            provider: None,
            clock: None,
            redaction: None,
        }
    }

    pub fn store<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        user_id: Option<&str>,
    ) -> bool {
        self.inner.store.store(key, value, user_id)
    }

    pub fn retrieve<T: DeserializeOwned>(&self, key: &str, user_id: Option<&str>) -> Option<T> {
        self.inner.store.retrieve(key, user_id)
    }

    pub fn delete(&self, key: &str, user_id: Option<&str>) -> bool {
        self.inner.store.delete(key, user_id)
    }

    pub fn clear_all(&self, user_id: Option<&str>) -> usize {
        self.inner.store.clear_all(user_id)
    }

    pub fn sweep_expired(&self) -> usize {
        self.inner.store.sweep_expired()
    }

    pub fn export_bundle(
        &self,
        password: &SecretString,
        sensitive_fields: &[&str],
        user_id: Option<&str>,
    ) -> VaultResult<Vec<u8>> {
        self.inner
            .codec
            .export(&self.inner.store, password, sensitive_fields, user_id)
    }

    pub fn import_bundle(
        &self,
        bytes: &[u8],
        password: &SecretString,
        user_id: Option<&str>,
        options: ImportOptions,
    ) -> VaultResult<ImportReport> {
        self.inner
            .codec
            .import(&self.inner.store, bytes, password, user_id, options)
    }

    pub fn stats(&self) -> StorageStats {
        self.inner.store.stats()
    }

    pub fn health_check(&self) -> HealthReport {
        self.inner.store.health_check()
    }

    /// Owned copy of the audit trail, oldest first.
    pub fn audit_log(&self) -> Vec<AuditEvent> {
        self.inner.audit.snapshot()
    }

    pub fn protection_mode(&self) -> ProtectionMode {
        self.inner.mode
    }

    pub fn config(&self) -> &VaultConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("mode", &self.inner.mode)
            .field("store", &self.inner.store)
            .field("audit", &self.inner.audit)
            .finish()
    }
}
