//! phivault-store: the ephemeral record store, its audit trail, and bundle export/import.
//!
//! Most callers only need [`Vault`]. The lower layers are public for hosts that
//! want to compose their own facade.

pub mod audit;
pub mod bundle;
pub mod store;
pub mod sweeper;
pub mod vault;
mod walk;

pub use audit::{AuditEvent, AuditLog, KeyRedaction};
pub use bundle::{
    parse_bundle, BundleCodec, ExportBundle, ImportOptions, ImportReport, ParsedBundle,
};
pub use store::{EphemeralStore, HealthReport, HealthStatus, StorageStats};
pub use sweeper::spawn_sweeper;
pub use vault::{Vault, VaultBuilder};
