pub mod clock;
pub mod config;
pub mod error;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::VaultConfig;
pub use error::{VaultError, VaultResult};
pub use types::{AuditAction, ProtectionMode};
