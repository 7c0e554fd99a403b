//! Escrow store seam
//!
//! When a policy enables escrow, pseudonym mappings are generated at random
//! and persisted so that authorized re-identification remains possible. The
//! store itself is an external collaborator: implementations are expected to
//! encrypt at rest and are keyed by (policy version, subject). This module
//! only defines the seam and an in-memory implementation for embedding tests.

use crate::domain::Result;
use crate::pseudonym::PseudonymBinding;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// Key-value store holding subject-to-pseudonym mappings.
///
/// `put_if_absent` must be first-writer-wins: when two processes race to map
/// the same subject, both must end up observing the same stored binding.
#[async_trait]
pub trait EscrowStore: Send + Sync {
    /// Look up the binding stored under `key`
    async fn get(&self, key: &str) -> Result<Option<PseudonymBinding>>;

    /// Store `binding` unless a binding already exists; returns the binding
    /// that is now authoritative for `key`
    async fn put_if_absent(&self, key: &str, binding: PseudonymBinding)
        -> Result<PseudonymBinding>;
}

/// In-memory escrow store for tests and single-process embedding
#[derive(Debug, Default)]
pub struct InMemoryEscrowStore {
    entries: RwLock<HashMap<String, PseudonymBinding>>,
}

impl InMemoryEscrowStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored mappings
    pub fn len(&self) -> usize {
        self.entries.read().expect("escrow map lock poisoned").len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EscrowStore for InMemoryEscrowStore {
    async fn get(&self, key: &str) -> Result<Option<PseudonymBinding>> {
        Ok(self
            .entries
            .read()
            .expect("escrow map lock poisoned")
            .get(key)
            .cloned())
    }

    async fn put_if_absent(
        &self,
        key: &str,
        binding: PseudonymBinding,
    ) -> Result<PseudonymBinding> {
        let mut entries = self.entries.write().expect("escrow map lock poisoned");
        Ok(entries.entry(key.to_string()).or_insert(binding).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PseudonymId;

    fn binding(id: &str, shift: i64) -> PseudonymBinding {
        PseudonymBinding {
            pseudonym: PseudonymId::new(id).unwrap(),
            date_shift_days: shift,
        }
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let store = InMemoryEscrowStore::new();
        assert!(store.get("v1:subject-1").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_put_if_absent_first_writer_wins() {
        let store = InMemoryEscrowStore::new();
        let first = store
            .put_if_absent("v1:subject-1", binding("sub-aaa", 10))
            .await
            .unwrap();
        let second = store
            .put_if_absent("v1:subject-1", binding("sub-bbb", -5))
            .await
            .unwrap();

        assert_eq!(first.pseudonym.as_str(), "sub-aaa");
        assert_eq!(second.pseudonym.as_str(), "sub-aaa");
        assert_eq!(second.date_shift_days, 10);
        assert_eq!(store.len(), 1);
    }
}
