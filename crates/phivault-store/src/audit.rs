//! Bounded, append-only access trail.
//!
//! Keys are redacted before they are stored or logged, so neither the
//! ring nor the `phivault::audit` tracing target ever sees a sensitive
//! key in full.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use phivault_core::config::AuditConfig;
use phivault_core::{AuditAction, Clock};
use serde::{Deserialize, Serialize};

/// Characters of a sensitive key kept before the mask.
pub const REDACT_KEEP_CHARS: usize = 8;

/// Suffix appended to a redacted key.
pub const REDACT_MASK: &str = "***";

/// Decides which keys are shortened before they reach the audit trail.
#[derive(Clone)]
pub enum KeyRedaction {
    /// Redact keys containing any marker, compared case-insensitively.
    Markers(Vec<String>),
    /// Redact keys for which the predicate returns true.
    Predicate(Arc<dyn Fn(&str) -> bool + Send + Sync>),
    /// Log every key verbatim.
    Disabled,
}

impl KeyRedaction {
    pub fn markers<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        KeyRedaction::Markers(markers.into_iter().map(|m| m.into().to_lowercase()).collect())
    }

    /// Policy described by the `[audit]` config section.
    pub fn from_config(config: &AuditConfig) -> Self {
        if config.redaction_disabled {
            KeyRedaction::Disabled
        } else {
            KeyRedaction::markers(config.redaction_markers.iter().cloned())
        }
    }

    pub fn predicate(f: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        KeyRedaction::Predicate(Arc::new(f))
    }

    pub fn is_sensitive(&self, key: &str) -> bool {
        match self {
            KeyRedaction::Markers(markers) => {
                let key = key.to_lowercase();
                markers.iter().any(|m| key.contains(&m.to_lowercase()))
            }
            KeyRedaction::Predicate(f) => f(key),
            KeyRedaction::Disabled => false,
        }
    }

    pub fn redact(&self, key: &str) -> String {
        if self.is_sensitive(key) {
            let kept: String = key.chars().take(REDACT_KEEP_CHARS).collect();
            format!("{kept}{REDACT_MASK}")
        } else {
            key.to_string()
        }
    }
}

impl Default for KeyRedaction {
    fn default() -> Self {
        KeyRedaction::markers(["patient", "schedule"])
    }
}

impl std::fmt::Debug for KeyRedaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyRedaction::Markers(m) => f.debug_tuple("Markers").field(m).finish(),
            KeyRedaction::Predicate(_) => f.write_str("Predicate(..)"),
            KeyRedaction::Disabled => f.write_str("Disabled"),
        }
    }
}

/// A single audit record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    /// Key after redaction
    pub key_digest: String,
    pub data_size: usize,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Fixed-capacity FIFO ring of [`AuditEvent`]s.
pub struct AuditLog {
    events: Mutex<VecDeque<AuditEvent>>,
    capacity: usize,
    redaction: KeyRedaction,
    clock: Arc<dyn Clock>,
}

impl AuditLog {
    /// `capacity` is clamped to at least one event.
    pub fn new(capacity: usize, redaction: KeyRedaction, clock: Arc<dyn Clock>) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            redaction,
            clock,
        }
    }

    pub fn redact(&self, key: &str) -> String {
        self.redaction.redact(key)
    }

    pub fn append(
        &self,
        action: AuditAction,
        key: &str,
        data_size: usize,
        success: bool,
        user_id: Option<&str>,
    ) {
        let event = AuditEvent {
            timestamp: self.clock.now(),
            action,
            key_digest: self.redaction.redact(key),
            data_size,
            success,
            user_id: user_id.map(str::to_string),
        };

        tracing::info!(
            target: "phivault::audit",
            action = %event.action,
            key = %event.key_digest,
            size = event.data_size,
            success = event.success,
            user = event.user_id.as_deref().unwrap_or("-"),
        );

        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Owned copy of the ring, oldest first.
    pub fn snapshot(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("redaction", &self.redaction)
            .finish()
    }
}
