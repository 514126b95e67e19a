//! Roles excluded from automatic rotation
//!
//! A role lands here when its WAL record or its stored record cannot be
//! decoded. Its queue item is dropped so it cannot starve the queue. An
//! administrative write or a delete of the role releases it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Why and since when a role is quarantined
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuarantineEntry {
    /// What made the role unrecoverable
    pub reason: String,
    /// Undecodable WAL record, removed when the role is released
    pub wal_id: Option<String>,
    /// When the role was quarantined
    pub since: DateTime<Utc>,
}

/// Set of quarantined roles
#[derive(Debug, Default)]
pub struct Quarantine {
    entries: Mutex<HashMap<String, QuarantineEntry>>,
}

impl Quarantine {
    /// Quarantine `role`; returns false if it already was
    pub fn insert(&self, role: &str, entry: QuarantineEntry) -> bool {
        self.entries.lock().insert(role.to_string(), entry).is_none()
    }

    /// Release `role`, returning its entry
    pub fn release(&self, role: &str) -> Option<QuarantineEntry> {
        self.entries.lock().remove(role)
    }

    /// Entry of `role`, if quarantined
    pub fn get(&self, role: &str) -> Option<QuarantineEntry> {
        self.entries.lock().get(role).cloned()
    }

    /// Whether `role` is quarantined
    pub fn contains(&self, role: &str) -> bool {
        self.entries.lock().contains_key(role)
    }

    /// Quarantined role names, sorted
    pub fn roles(&self) -> Vec<String> {
        let mut roles: Vec<String> = self.entries.lock().keys().cloned().collect();
        roles.sort();
        roles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_insert_release() {
        let quarantine = Quarantine::default();
        let entry = QuarantineEntry {
            reason: "undecodable WAL".into(),
            wal_id: Some("w1".into()),
            since: Utc::now(),
        };

        assert!(quarantine.insert("b", entry.clone()));
        assert!(!quarantine.insert("b", entry.clone()));
        assert!(quarantine.insert("a", entry.clone()));
        assert_eq!(quarantine.roles(), vec!["a", "b"]);

        assert_eq!(quarantine.release("b"), Some(entry));
        assert!(!quarantine.contains("b"));
        assert_eq!(quarantine.release("b"), None);
    }
}
