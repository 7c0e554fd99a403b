//! Audit entry and hash chain model
//!
//! Every access or mutation involving PHI produces one entry. Entries are
//! append-only and integrity-chained: each entry's hash covers its own
//! content plus the previous entry's hash, so any later mutation or deletion
//! is detectable. Entries carry the subject's pseudonym, never the raw
//! subject identifier.

use crate::domain::ActorId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Hash value linking the first entry of a chain
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Kind of audited event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditAction {
    Access,
    Modify,
    AccessDenied,
    Export,
}

impl AuditAction {
    /// Stable label used in the canonical hash input
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Access => "Access",
            AuditAction::Modify => "Modify",
            AuditAction::AccessDenied => "AccessDenied",
            AuditAction::Export => "Export",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entry content before it is timestamped and linked into a chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditDraft {
    pub actor: ActorId,
    pub subject_pseudonym: String,
    pub action: AuditAction,
    pub category: String,
    pub reason: String,
    pub resource_version: String,
}

impl AuditDraft {
    /// Creates a draft for the given actor and action
    pub fn new(
        actor: ActorId,
        subject_pseudonym: impl Into<String>,
        action: AuditAction,
        category: impl Into<String>,
        reason: impl Into<String>,
        resource_version: impl Into<String>,
    ) -> Self {
        Self {
            actor,
            subject_pseudonym: subject_pseudonym.into(),
            action,
            category: category.into(),
            reason: reason.into(),
            resource_version: resource_version.into(),
        }
    }
}

/// One immutable, hash-chained audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub subject_pseudonym: String,
    pub action: AuditAction,
    pub category: String,
    pub reason: String,
    pub resource_version: String,
    pub prev_hash: String,
    pub entry_hash: String,
}

impl AuditEntry {
    /// Seal a draft into an entry linked to `prev_hash`
    pub fn seal(draft: &AuditDraft, timestamp: DateTime<Utc>, prev_hash: &str) -> Self {
        let mut entry = Self {
            timestamp,
            actor: draft.actor.as_str().to_string(),
            subject_pseudonym: draft.subject_pseudonym.clone(),
            action: draft.action,
            category: draft.category.clone(),
            reason: draft.reason.clone(),
            resource_version: draft.resource_version.clone(),
            prev_hash: prev_hash.to_string(),
            entry_hash: String::new(),
        };
        entry.entry_hash = entry.compute_hash();
        entry
    }

    /// Canonical content string covered by the hash (everything except
    /// `entry_hash` itself)
    fn content_string(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}|{}",
            self.timestamp.to_rfc3339(),
            self.actor,
            self.subject_pseudonym,
            self.action.as_str(),
            self.category,
            self.reason,
            self.resource_version,
            self.prev_hash,
        )
    }

    /// Recompute this entry's hash from its stored fields
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.content_string().as_bytes());
        let digest = hasher.finalize();
        format!("{digest:x}")
    }

    /// Whether this entry correctly extends a chain whose tail hash is
    /// `expected_prev`
    pub fn links_to(&self, expected_prev: &str) -> bool {
        self.prev_hash == expected_prev && self.compute_hash() == self.entry_hash
    }
}

/// Link a batch of drafts into a contiguous run of sealed entries starting
/// after `prev_hash`
pub fn seal_batch(
    drafts: &[AuditDraft],
    timestamp: DateTime<Utc>,
    prev_hash: &str,
) -> Vec<AuditEntry> {
    let mut entries = Vec::with_capacity(drafts.len());
    let mut prev = prev_hash.to_string();
    for draft in drafts {
        let entry = AuditEntry::seal(draft, timestamp, &prev);
        prev = entry.entry_hash.clone();
        entries.push(entry);
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(reason: &str) -> AuditDraft {
        AuditDraft::new(
            ActorId::new("researcher@example.org").unwrap(),
            "sub-0123456789abcdef",
            AuditAction::Access,
            "Patient/name",
            reason,
            "a1b2c3",
        )
    }

    #[test]
    fn test_seal_links_to_genesis() {
        let entry = AuditEntry::seal(&draft("export"), Utc::now(), GENESIS_HASH);
        assert_eq!(entry.prev_hash, GENESIS_HASH);
        assert_eq!(entry.entry_hash.len(), 64);
        assert!(entry.links_to(GENESIS_HASH));
    }

    #[test]
    fn test_hash_covers_content() {
        let ts = Utc::now();
        let mut entry = AuditEntry::seal(&draft("export"), ts, GENESIS_HASH);
        assert_eq!(entry.compute_hash(), entry.entry_hash);

        entry.reason = "tampered".to_string();
        assert_ne!(entry.compute_hash(), entry.entry_hash);
        assert!(!entry.links_to(GENESIS_HASH));
    }

    #[test]
    fn test_seal_batch_is_contiguous() {
        let drafts = vec![draft("a"), draft("b"), draft("c")];
        let entries = seal_batch(&drafts, Utc::now(), GENESIS_HASH);

        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].prev_hash, GENESIS_HASH);
        assert_eq!(entries[1].prev_hash, entries[0].entry_hash);
        assert_eq!(entries[2].prev_hash, entries[1].entry_hash);
        assert!(entries[2].links_to(&entries[1].entry_hash));
    }

    #[test]
    fn test_action_labels() {
        assert_eq!(AuditAction::AccessDenied.as_str(), "AccessDenied");
        assert_eq!(AuditAction::Export.to_string(), "Export");
    }

    #[test]
    fn test_entry_round_trips_through_json() {
        let entry = AuditEntry::seal(&draft("export"), Utc::now(), GENESIS_HASH);
        let json = serde_json::to_string(&entry).unwrap();
        let back: AuditEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
        assert_eq!(back.compute_hash(), back.entry_hash);
    }
}
