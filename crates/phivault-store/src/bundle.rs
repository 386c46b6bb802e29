//! Portable export bundles.
//!
//! Layout (JSON, camelCase):
//! ```text
//! { formatVersion: "1.0", createdAt, checksum, encryptedFieldNames: [..],
//!   entries: { <key>: { payload: <record>, metadata: { createdAt, expiresAt,
//!                                                      accessCount, lastAccessedAt } } } }
//! ```
//! `checksum` is hex SHA-256 over the compact JSON of `entries` with object
//! keys sorted at every level.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use phivault_core::{AuditAction, VaultError, VaultResult};
use phivault_crypto::FieldEncryptor;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::error::Category;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::store::{EphemeralStore, StoredEntry};
use crate::walk;

pub const FORMAT_VERSION: &str = "1.0";

/// Audit key used for bundle-level events
const BUNDLE_AUDIT_KEY: &str = "bundle";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMetadata {
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub access_count: u64,
    pub last_accessed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleEntry {
    pub payload: Value,
    pub metadata: EntryMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportBundle {
    pub format_version: String,
    pub created_at: DateTime<Utc>,
    pub entries: BTreeMap<String, BundleEntry>,
    pub checksum: String,
    pub encrypted_field_names: BTreeSet<String>,
}

/// A structurally valid bundle plus the checksum recomputed from its bytes.
#[derive(Debug, Clone)]
pub struct ParsedBundle {
    pub bundle: ExportBundle,
    pub computed_checksum: String,
}

impl ParsedBundle {
    pub fn checksum_matches(&self) -> bool {
        self.bundle.checksum.eq_ignore_ascii_case(&self.computed_checksum)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportOptions {
    /// Replace entries whose key already exists
    pub overwrite: bool,
    /// Refuse bundles whose checksum does not match
    pub validate_checksum: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            validate_checksum: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub success: bool,
    pub imported_count: usize,
    /// One message per skipped entry, keyed by redacted storage key
    pub errors: Vec<String>,
}

/// Hex SHA-256 of the compact JSON form of an `entries` tree.
pub fn entries_checksum(entries: &Value) -> VaultResult<String> {
    let bytes = serde_json::to_vec(entries).map_err(|e| VaultError::Serialization(e.to_string()))?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Parse and structurally validate bundle bytes. Does not enforce the checksum.
pub fn parse_bundle(bytes: &[u8]) -> VaultResult<ParsedBundle> {
    let raw: Value = serde_json::from_slice(bytes)
        .map_err(|e| VaultError::InvalidFormat(format!("not JSON: {}", category_name(&e))))?;

    match raw.get("formatVersion") {
        Some(Value::String(v)) if v == FORMAT_VERSION => {}
        Some(Value::String(v)) => {
            return Err(VaultError::InvalidFormat(format!(
                "unsupported formatVersion {v:?}, expected {FORMAT_VERSION:?}"
            )))
        }
        Some(_) | None => {
            return Err(VaultError::InvalidFormat("missing formatVersion".into()))
        }
    }

    let entries = raw
        .get("entries")
        .ok_or_else(|| VaultError::InvalidFormat("missing entries".into()))?;
    let computed_checksum = entries_checksum(entries)?;

    let bundle: ExportBundle = serde_json::from_value(raw)
        .map_err(|_| VaultError::InvalidFormat("bundle fields have the wrong shape".into()))?;

    Ok(ParsedBundle {
        bundle,
        computed_checksum,
    })
}

fn category_name(e: &serde_json::Error) -> &'static str {
    match e.classify() {
        Category::Io => "I/O error",
        Category::Syntax => "syntax error",
        Category::Data => "unexpected data",
        Category::Eof => "unexpected end of input",
    }
}

/// Moves entries between an [`EphemeralStore`] and portable bundles.
#[derive(Debug, Clone)]
pub struct BundleCodec {
    encryptor: FieldEncryptor,
}

impl BundleCodec {
    pub fn new(encryptor: FieldEncryptor) -> Self {
        Self { encryptor }
    }

    /// Snapshot every live entry, sealing string fields named in `sensitive_fields`.
    ///
    /// The store stays locked for the whole walk. Any unreadable entry aborts
    /// the export.
    pub fn export(
        &self,
        store: &EphemeralStore,
        password: &SecretString,
        sensitive_fields: &[&str],
        user_id: Option<&str>,
    ) -> VaultResult<Vec<u8>> {
        let names: HashSet<&str> = sensitive_fields.iter().copied().collect();
        let entries = store.lock_entries();
        let now = store.clock().now();

        let result = self.build_bundle(store, &entries, &names, password, now);
        let bytes = match result {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "export aborted");
                store
                    .audit()
                    .append(AuditAction::Export, BUNDLE_AUDIT_KEY, 0, false, user_id);
                return Err(e);
            }
        };

        store
            .audit()
            .append(AuditAction::Export, BUNDLE_AUDIT_KEY, bytes.len(), true, user_id);
        tracing::info!(bytes = bytes.len(), "bundle exported");
        Ok(bytes)
    }

    fn build_bundle(
        &self,
        store: &EphemeralStore,
        entries: &crate::store::Entries,
        names: &HashSet<&str>,
        password: &SecretString,
        now: DateTime<Utc>,
    ) -> VaultResult<Vec<u8>> {
        if self.encryptor.mode() == phivault_core::ProtectionMode::Degraded && !names.is_empty() {
            tracing::warn!(
                "exporting with degraded crypto backend; sensitive fields are only obfuscated"
            );
        }

        let mut out = BTreeMap::new();
        let mut sealed = BTreeSet::new();

        for (key, entry) in entries.iter() {
            if entry.is_expired(now) {
                continue;
            }
            let (mut payload, _) = store.open_payload::<Value>(&entry.payload).map_err(|e| {
                tracing::error!(key = %store.audit().redact(key), "entry unreadable during export");
                e
            })?;
            walk::seal_fields(&mut payload, names, &mut sealed, &mut |s| {
                self.encryptor.encrypt_field(s, password)
            })?;
            out.insert(
                key.clone(),
                BundleEntry {
                    payload,
                    metadata: EntryMetadata {
                        created_at: entry.created_at,
                        expires_at: entry.expires_at,
                        access_count: entry.access_count,
                        last_accessed_at: entry.last_accessed_at,
                    },
                },
            );
        }

        let entries_value =
            serde_json::to_value(&out).map_err(|e| VaultError::Serialization(e.to_string()))?;
        let bundle = ExportBundle {
            format_version: FORMAT_VERSION.to_string(),
            created_at: now,
            checksum: entries_checksum(&entries_value)?,
            entries: out,
            encrypted_field_names: sealed,
        };
        serde_json::to_vec_pretty(&bundle).map_err(|e| VaultError::Serialization(e.to_string()))
    }

    /// Load a bundle into the store.
    ///
    /// Format and checksum failures abort with nothing imported. Problems with
    /// individual entries are collected in the report and only skip that entry.
    pub fn import(
        &self,
        store: &EphemeralStore,
        bytes: &[u8],
        password: &SecretString,
        user_id: Option<&str>,
        options: ImportOptions,
    ) -> VaultResult<ImportReport> {
        let parsed = match parse_bundle(bytes) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(error = %e, "bundle rejected");
                store
                    .audit()
                    .append(AuditAction::Import, BUNDLE_AUDIT_KEY, bytes.len(), false, user_id);
                return Err(e);
            }
        };

        if options.validate_checksum && !parsed.checksum_matches() {
            tracing::warn!("bundle checksum mismatch, nothing imported");
            store
                .audit()
                .append(AuditAction::Import, BUNDLE_AUDIT_KEY, bytes.len(), false, user_id);
            return Err(VaultError::ChecksumMismatch {
                expected: parsed.bundle.checksum,
                actual: parsed.computed_checksum,
            });
        }

        let ExportBundle {
            entries: incoming,
            encrypted_field_names: names,
            ..
        } = parsed.bundle;

        let mut entries = store.lock_entries();
        let now = store.clock().now();
        let mut imported = 0;
        let mut errors = Vec::new();

        for (key, item) in incoming {
            let redacted = store.audit().redact(&key);
            match self.admit(store, &entries, &key, item, &names, password, now, options) {
                Ok(entry) => {
                    entries.insert(key, entry);
                    imported += 1;
                }
                Err(reason) => {
                    tracing::warn!(key = %redacted, reason = %reason, "bundle entry skipped");
                    errors.push(format!("{redacted}: {reason}"));
                }
            }
        }

        let report = ImportReport {
            success: errors.is_empty(),
            imported_count: imported,
            errors,
        };
        store.audit().append(
            AuditAction::Import,
            BUNDLE_AUDIT_KEY,
            bytes.len(),
            report.success,
            user_id,
        );
        tracing::info!(
            imported = report.imported_count,
            skipped = report.errors.len(),
            "bundle imported"
        );
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    fn admit(
        &self,
        store: &EphemeralStore,
        entries: &crate::store::Entries,
        key: &str,
        item: BundleEntry,
        names: &BTreeSet<String>,
        password: &SecretString,
        now: DateTime<Utc>,
        options: ImportOptions,
    ) -> Result<StoredEntry, String> {
        if !options.overwrite && entries.contains_key(key) {
            return Err("key already exists".into());
        }

        let meta = item.metadata;
        if meta.expires_at < meta.created_at {
            return Err("invalid metadata: expiresAt precedes createdAt".into());
        }
        if now > meta.expires_at {
            return Err("entry already expired".into());
        }

        let mut payload = item.payload;
        walk::open_fields(&mut payload, names, &mut |field| {
            self.encryptor.decrypt_field(field, password)
        })
        .map_err(|e| e.to_string())?;

        let (sealed, _) = store.seal_payload(&payload).map_err(|e| e.to_string())?;
        Ok(StoredEntry {
            payload: sealed,
            created_at: meta.created_at,
            expires_at: meta.expires_at,
            access_count: meta.access_count,
            last_accessed_at: meta.last_accessed_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal(entries: Value) -> Value {
        json!({
            "formatVersion": "1.0",
            "createdAt": "2026-01-01T00:00:00Z",
            "entries": entries,
            "checksum": "",
            "encryptedFieldNames": []
        })
    }

    #[test]
    fn test_checksum_ignores_key_order() {
        let a: Value = serde_json::from_str(r#"{"b": {"y": 1, "x": 2}, "a": 3}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a": 3, "b": {"x": 2, "y": 1}}"#).unwrap();
        assert_eq!(entries_checksum(&a).unwrap(), entries_checksum(&b).unwrap());
        assert_eq!(entries_checksum(&a).unwrap().len(), 64);
    }

    #[test]
    fn test_checksum_of_empty_entries() {
        // sha256("{}")
        assert_eq!(
            entries_checksum(&json!({})).unwrap(),
            "44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
        );
    }

    #[test]
    fn test_parse_rejects_non_json() {
        assert!(matches!(parse_bundle(b"not json at all"), Err(VaultError::InvalidFormat(_))));
    }

    #[test]
    fn test_parse_rejects_wrong_version() {
        let mut v = minimal(json!({}));
        v["formatVersion"] = json!("2.0");
        let err = parse_bundle(&serde_json::to_vec(&v).unwrap()).unwrap_err();
        assert!(matches!(err, VaultError::InvalidFormat(_)));
        assert!(err.to_string().contains("2.0"));

        v.as_object_mut().unwrap().remove("formatVersion");
        assert!(matches!(
            parse_bundle(&serde_json::to_vec(&v).unwrap()),
            Err(VaultError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_parse_rejects_bad_shape() {
        let v = minimal(json!({"k": {"payload": 1}}));
        assert!(matches!(
            parse_bundle(&serde_json::to_vec(&v).unwrap()),
            Err(VaultError::InvalidFormat(_))
        ));

        let v = minimal(json!([1, 2, 3]));
        assert!(matches!(
            parse_bundle(&serde_json::to_vec(&v).unwrap()),
            Err(VaultError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_parse_reports_checksum_state() {
        let mut v = minimal(json!({}));
        let parsed = parse_bundle(&serde_json::to_vec(&v).unwrap()).unwrap();
        assert!(!parsed.checksum_matches());

        v["checksum"] = json!(parsed.computed_checksum);
        let parsed = parse_bundle(&serde_json::to_vec(&v).unwrap()).unwrap();
        assert!(parsed.checksum_matches());
    }

    #[test]
    fn test_import_options_default() {
        let o = ImportOptions::default();
        assert!(!o.overwrite);
        assert!(o.validate_checksum);
    }
}
