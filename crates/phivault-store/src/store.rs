//! In-memory entry store with TTL expiry.
//!
//! Payloads are held only in obfuscated form (see [`phivault_crypto::obfuscate`]).
//! All access goes through a single mutex; the audit ring is locked after it,
//! never before.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use phivault_core::config::HealthConfig;
use phivault_core::{AuditAction, Clock, VaultConfig, VaultError, VaultResult};
use phivault_crypto::{deobfuscate, obfuscate, CryptoProvider, ProcessKey};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::error::Category;
use zeroize::Zeroize;

use crate::audit::AuditLog;

/// One stored record
#[derive(Debug, Clone)]
pub struct StoredEntry {
    /// Obfuscated serde_json bytes
    pub(crate) payload: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub access_count: u64,
    pub last_accessed_at: DateTime<Utc>,
}

impl StoredEntry {
    /// Expired once the clock has moved strictly past `expires_at`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Point-in-time counters for the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    pub item_count: usize,
    /// Sum of obfuscated payload lengths
    pub total_bytes: u64,
    pub oldest_created_at: Option<DateTime<Utc>>,
    pub newest_created_at: Option<DateTime<Utc>>,
    pub audit_log_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub message: String,
}

pub(crate) type Entries = HashMap<String, StoredEntry>;

/// TTL-bounded map of obfuscated records.
pub struct EphemeralStore {
    entries: Mutex<Entries>,
    process_key: ProcessKey,
    ttl: Duration,
    health: HealthConfig,
    clock: Arc<dyn Clock>,
    audit: Arc<AuditLog>,
}

impl EphemeralStore {
    pub fn new(
        config: &VaultConfig,
        provider: &dyn CryptoProvider,
        clock: Arc<dyn Clock>,
        audit: Arc<AuditLog>,
    ) -> VaultResult<Self> {
        let ttl = Duration::from_std(config.store.ttl())
            .map_err(|_| VaultError::InvalidConfig("store.ttl_secs is out of range".into()))?;
        Ok(Self {
            entries: Mutex::new(HashMap::new()),
            process_key: ProcessKey::generate(provider)?,
            ttl,
            health: config.health.clone(),
            clock,
            audit,
        })
    }

    pub(crate) fn lock_entries(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub(crate) fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Serialize and obfuscate a value. Returns the payload and the plain size.
    pub(crate) fn seal_payload<T: Serialize + ?Sized>(
        &self,
        value: &T,
    ) -> VaultResult<(String, usize)> {
        let mut bytes =
            serde_json::to_vec(value).map_err(|e| VaultError::Serialization(e.to_string()))?;
        let payload = obfuscate(&bytes, self.process_key.as_bytes());
        let size = bytes.len();
        bytes.zeroize();
        Ok((payload, size))
    }

    /// Reverse [`Self::seal_payload`]. Returns the value and the plain size.
    pub(crate) fn open_payload<T: DeserializeOwned>(
        &self,
        payload: &str,
    ) -> VaultResult<(T, usize)> {
        let mut bytes = deobfuscate(payload, self.process_key.as_bytes())?;
        let size = bytes.len();
        let value = serde_json::from_slice(&bytes);
        bytes.zeroize();
        // serde_json messages can quote the offending value, so only the category escapes
        let value = value.map_err(|e| match e.classify() {
            Category::Data => {
                VaultError::Serialization("stored value does not match the requested type".into())
            }
            Category::Io | Category::Syntax | Category::Eof => {
                VaultError::CorruptionDetected("payload is not valid JSON".into())
            }
        })?;
        Ok((value, size))
    }

    /// Insert or replace `key`. Returns false if the value cannot be serialized.
    pub fn store<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        user_id: Option<&str>,
    ) -> bool {
        let (payload, size) = match self.seal_payload(value) {
            Ok(sealed) => sealed,
            Err(e) => {
                tracing::warn!(key = %self.audit.redact(key), error = %e, "store rejected");
                self.audit.append(AuditAction::Store, key, 0, false, user_id);
                return false;
            }
        };

        let now = self.clock.now();
        let Some(expires_at) = now.checked_add_signed(self.ttl) else {
            tracing::warn!(key = %self.audit.redact(key), "store rejected: expiry out of range");
            self.audit.append(AuditAction::Store, key, 0, false, user_id);
            return false;
        };

        let mut entries = self.lock_entries();
        entries.insert(
            key.to_string(),
            StoredEntry {
                payload,
                created_at: now,
                expires_at,
                access_count: 0,
                last_accessed_at: now,
            },
        );
        self.audit.append(AuditAction::Store, key, size, true, user_id);
        tracing::debug!(key = %self.audit.redact(key), size, "stored");
        true
    }

    /// Fetch a live value. Expired entries are removed on the way.
    ///
    /// Returns `None` for absent, expired, corrupt, or wrongly typed entries;
    /// the audit trail tells them apart.
    pub fn retrieve<T: DeserializeOwned>(&self, key: &str, user_id: Option<&str>) -> Option<T> {
        let now = self.clock.now();
        let mut entries = self.lock_entries();

        let Some(entry) = entries.get_mut(key) else {
            self.audit.append(AuditAction::Retrieve, key, 0, false, user_id);
            return None;
        };

        if entry.is_expired(now) {
            entries.remove(key);
            self.audit.append(AuditAction::Expire, key, 0, true, user_id);
            tracing::debug!(key = %self.audit.redact(key), "expired on access");
            return None;
        }

        entry.access_count += 1;
        entry.last_accessed_at = now;

        match self.open_payload::<T>(&entry.payload) {
            Ok((value, size)) => {
                self.audit.append(AuditAction::Retrieve, key, size, true, user_id);
                Some(value)
            }
            Err(e) => {
                tracing::error!(key = %self.audit.redact(key), error = %e, "retrieve failed");
                self.audit.append(AuditAction::Retrieve, key, 0, false, user_id);
                None
            }
        }
    }

    /// Returns whether the key existed.
    pub fn delete(&self, key: &str, user_id: Option<&str>) -> bool {
        let mut entries = self.lock_entries();
        let existed = entries.remove(key).is_some();
        self.audit.append(AuditAction::Delete, key, 0, existed, user_id);
        existed
    }

    /// Drop every entry. Returns how many were removed.
    pub fn clear_all(&self, user_id: Option<&str>) -> usize {
        let mut entries = self.lock_entries();
        let count = entries.len();
        entries.clear();
        self.audit.append(AuditAction::Clear, "*", count, true, user_id);
        tracing::info!(count, "vault cleared");
        count
    }

    /// Remove every entry whose expiry is at or before now.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.lock_entries();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            entries.remove(key);
            self.audit.append(AuditAction::Expire, key, 0, true, None);
        }
        if !expired.is_empty() {
            tracing::debug!(count = expired.len(), "swept expired entries");
        }
        expired.len()
    }

    pub fn stats(&self) -> StorageStats {
        let entries = self.lock_entries();
        StorageStats {
            item_count: entries.len(),
            total_bytes: entries.values().map(|e| e.payload.len() as u64).sum(),
            oldest_created_at: entries.values().map(|e| e.created_at).min(),
            newest_created_at: entries.values().map(|e| e.created_at).max(),
            audit_log_size: self.audit.len(),
        }
    }

    pub fn health_check(&self) -> HealthReport {
        let stats = self.stats();
        if stats.total_bytes > self.health.max_total_bytes {
            HealthReport {
                status: HealthStatus::Critical,
                message: format!(
                    "{} bytes stored, limit is {}",
                    stats.total_bytes, self.health.max_total_bytes
                ),
            }
        } else if stats.item_count > self.health.warn_item_count {
            HealthReport {
                status: HealthStatus::Warning,
                message: format!(
                    "{} items stored, warning threshold is {}",
                    stats.item_count, self.health.warn_item_count
                ),
            }
        } else {
            HealthReport {
                status: HealthStatus::Healthy,
                message: format!("{} items, {} bytes", stats.item_count, stats.total_bytes),
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for EphemeralStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralStore")
            .field("len", &self.len())
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::KeyRedaction;
    use phivault_core::ManualClock;
    use phivault_crypto::AeadProvider;
    use serde_json::{json, Value};
    use std::collections::BTreeMap;

    struct Fixture {
        clock: Arc<ManualClock>,
        audit: Arc<AuditLog>,
        store: EphemeralStore,
    }

    fn fixture_with(config: VaultConfig) -> Fixture {
        let clock = Arc::new(ManualClock::default());
        let audit = Arc::new(AuditLog::new(100, KeyRedaction::default(), clock.clone()));
        let store =
            EphemeralStore::new(&config, &AeadProvider, clock.clone(), audit.clone()).unwrap();
        Fixture { clock, audit, store }
    }

    fn fixture() -> Fixture {
        fixture_with(VaultConfig::default())
    }

    fn actions(audit: &AuditLog) -> Vec<(AuditAction, bool)> {
        audit.snapshot().iter().map(|e| (e.action, e.success)).collect()
    }

    #[test]
    fn test_store_then_retrieve() {
        let f = fixture();
        let record = json!({"name": "Jane Doe", "mrn": "A123"});
        assert!(f.store.store("patient-17", &record, Some("nurse")));

        let back: Value = f.store.retrieve("patient-17", Some("nurse")).unwrap();
        assert_eq!(back, record);
        assert_eq!(
            actions(&f.audit),
            vec![(AuditAction::Store, true), (AuditAction::Retrieve, true)]
        );
        assert_eq!(f.audit.snapshot()[0].key_digest, "patient-***");
    }

    #[test]
    fn test_payload_is_not_plaintext() {
        let f = fixture();
        f.store.store("k", "Jane Doe", None);
        let entries = f.store.lock_entries();
        assert!(!entries["k"].payload.contains("Jane"));
    }

    #[test]
    fn test_retrieve_bumps_counters() {
        let f = fixture();
        f.store.store("k", &1u32, None);
        f.clock.advance(Duration::minutes(5));
        let _: Option<u32> = f.store.retrieve("k", None);
        let _: Option<u32> = f.store.retrieve("k", None);

        let entries = f.store.lock_entries();
        assert_eq!(entries["k"].access_count, 2);
        assert_eq!(entries["k"].last_accessed_at, f.clock.now());
        assert!(entries["k"].last_accessed_at > entries["k"].created_at);
    }

    #[test]
    fn test_replace_overwrites_entry() {
        let f = fixture();
        f.store.store("k", "one", None);
        f.store.store("k", "two", None);
        assert_eq!(f.store.len(), 1);
        assert_eq!(f.store.retrieve::<String>("k", None).as_deref(), Some("two"));
        let stores = f
            .audit
            .snapshot()
            .iter()
            .filter(|e| e.action == AuditAction::Store)
            .count();
        assert_eq!(stores, 2);
    }

    #[test]
    fn test_missing_key() {
        let f = fixture();
        assert_eq!(f.store.retrieve::<Value>("nope", None), None);
        assert_eq!(actions(&f.audit), vec![(AuditAction::Retrieve, false)]);
    }

    #[test]
    fn test_expiry_on_access() {
        let f = fixture();
        f.store.store("k", "v", None);
        f.clock.advance(Duration::hours(8));
        // exactly at expiry the entry is still live
        assert_eq!(f.store.retrieve::<String>("k", None).as_deref(), Some("v"));

        f.clock.advance(Duration::seconds(1));
        assert_eq!(f.store.retrieve::<String>("k", None), None);
        assert!(f.store.is_empty());
        assert_eq!(f.audit.snapshot().last().unwrap().action, AuditAction::Expire);
    }

    #[test]
    fn test_zero_ttl_then_sweep() {
        let mut config = VaultConfig::default();
        config.store.ttl_secs = 0;
        let f = fixture_with(config);
        f.store.store("k", "v", None);
        {
            let entries = f.store.lock_entries();
            assert_eq!(entries["k"].created_at, entries["k"].expires_at);
        }
        f.clock.advance(Duration::milliseconds(1));
        assert_eq!(f.store.retrieve::<String>("k", None), None);

        f.store.store("j", "v", None);
        assert_eq!(f.store.sweep_expired(), 1);
        assert_eq!(f.store.stats().item_count, 0);
    }

    #[test]
    fn test_sweep_only_removes_expired() {
        let f = fixture();
        f.store.store("old", "v", None);
        f.clock.advance(Duration::hours(4));
        f.store.store("new", "v", None);
        f.clock.advance(Duration::hours(4));

        assert_eq!(f.store.sweep_expired(), 1);
        assert_eq!(f.store.len(), 1);
        assert!(f.store.retrieve::<String>("new", None).is_some());
    }

    #[test]
    fn test_delete_reports_existence() {
        let f = fixture();
        f.store.store("k", "v", None);
        assert!(f.store.delete("k", None));
        assert!(!f.store.delete("k", None));
        assert_eq!(
            actions(&f.audit),
            vec![
                (AuditAction::Store, true),
                (AuditAction::Delete, true),
                (AuditAction::Delete, false)
            ]
        );
    }

    #[test]
    fn test_clear_all_counts() {
        let f = fixture();
        for i in 0..3 {
            f.store.store(&format!("k{i}"), &i, None);
        }
        assert_eq!(f.store.clear_all(Some("admin")), 3);
        assert!(f.store.is_empty());
        let last = f.audit.snapshot().pop().unwrap();
        assert_eq!(last.action, AuditAction::Clear);
        assert_eq!(last.data_size, 3);
        assert_eq!(f.store.clear_all(None), 0);
    }

    #[test]
    fn test_unserializable_value_rejected() {
        let f = fixture();
        let mut map = BTreeMap::new();
        map.insert((1, 2), "tuple keys are not valid JSON object keys");
        assert!(!f.store.store("bad", &map, None));
        assert!(f.store.is_empty());
        assert_eq!(actions(&f.audit), vec![(AuditAction::Store, false)]);
    }

    #[test]
    fn test_expiry_overflow_rejected() {
        let mut config = VaultConfig::default();
        config.store.ttl_secs = 100_000_000_000_000;
        let f = fixture_with(config);
        assert!(!f.store.store("k", "v", None));
        assert!(f.store.is_empty());
        assert_eq!(actions(&f.audit), vec![(AuditAction::Store, false)]);

        // the entries lock is still usable afterwards
        assert!(!f.store.delete("k", None));
    }

    #[test]
    fn test_corrupt_payload_is_none_not_panic() {
        let f = fixture();
        f.store.store("k", "v", None);
        f.store.lock_entries().get_mut("k").unwrap().payload = "%%%".into();
        assert_eq!(f.store.retrieve::<String>("k", None), None);
        assert!(!f.audit.snapshot().last().unwrap().success);
    }

    #[test]
    fn test_wrong_type_is_none() {
        let f = fixture();
        f.store.store("k", "text", None);
        assert_eq!(f.store.retrieve::<u64>("k", None), None);
        assert!(!f.audit.snapshot().last().unwrap().success);
    }

    #[test]
    fn test_stats_and_health() {
        let mut config = VaultConfig::default();
        config.health.warn_item_count = 2;
        let f = fixture_with(config);
        assert_eq!(f.store.health_check().status, HealthStatus::Healthy);

        f.store.store("a", "x", None);
        f.clock.advance(Duration::seconds(1));
        f.store.store("b", "y", None);
        f.clock.advance(Duration::seconds(1));
        f.store.store("c", "z", None);

        let stats = f.store.stats();
        assert_eq!(stats.item_count, 3);
        assert!(stats.total_bytes > 0);
        assert!(stats.oldest_created_at < stats.newest_created_at);
        assert_eq!(stats.audit_log_size, 3);
        assert_eq!(f.store.health_check().status, HealthStatus::Warning);
    }

    #[test]
    fn test_critical_wins_over_warning() {
        let mut config = VaultConfig::default();
        config.health.warn_item_count = 0;
        config.health.max_total_bytes = 1;
        let f = fixture_with(config);
        f.store.store("a", "a long enough value", None);
        let report = f.store.health_check();
        assert_eq!(report.status, HealthStatus::Critical);
        assert!(report.message.contains("bytes"));
    }
}
