//! Audit storage backends
//!
//! The append-only store behind the audit chain. Backends must make a batch
//! append atomic: either every entry of the batch becomes visible or none
//! does, and readers never observe a partial batch.

use crate::audit::entry::AuditEntry;
use crate::domain::{ChainId, Result, VeilError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::RwLock;

/// Append-only audit entry storage
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append a batch as a unit (all-or-nothing)
    async fn append(&self, chain: &ChainId, entries: &[AuditEntry]) -> Result<()>;

    /// Read entries starting at `start`, up to `limit` if given
    async fn read(&self, chain: &ChainId, start: u64, limit: Option<u64>)
        -> Result<Vec<AuditEntry>>;

    /// Number of entries in a chain (0 for unknown chains)
    async fn len(&self, chain: &ChainId) -> Result<u64>;

    /// All known chain identifiers
    async fn chains(&self) -> Result<Vec<ChainId>>;
}

/// In-memory audit store for tests and single-process embedding.
///
/// Also exposes corruption helpers ([`remove`](Self::remove),
/// [`overwrite`](Self::overwrite)) so verification tests can simulate
/// tampering; real backends have no such surface.
#[derive(Debug, Default)]
pub struct InMemoryAuditStore {
    chains: RwLock<HashMap<String, Vec<AuditEntry>>>,
}

impl InMemoryAuditStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Delete the entry at `position`, shifting later entries down.
    /// Corruption simulation only.
    pub fn remove(&self, chain: &ChainId, position: u64) {
        let mut chains = self.chains.write().expect("audit store lock poisoned");
        if let Some(entries) = chains.get_mut(chain.as_str()) {
            if (position as usize) < entries.len() {
                entries.remove(position as usize);
            }
        }
    }

    /// Replace the entry at `position`. Corruption simulation only.
    pub fn overwrite(&self, chain: &ChainId, position: u64, entry: AuditEntry) {
        let mut chains = self.chains.write().expect("audit store lock poisoned");
        if let Some(entries) = chains.get_mut(chain.as_str()) {
            if let Some(slot) = entries.get_mut(position as usize) {
                *slot = entry;
            }
        }
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append(&self, chain: &ChainId, entries: &[AuditEntry]) -> Result<()> {
        let mut chains = self.chains.write().expect("audit store lock poisoned");
        chains
            .entry(chain.as_str().to_string())
            .or_default()
            .extend_from_slice(entries);
        Ok(())
    }

    async fn read(
        &self,
        chain: &ChainId,
        start: u64,
        limit: Option<u64>,
    ) -> Result<Vec<AuditEntry>> {
        let chains = self.chains.read().expect("audit store lock poisoned");
        let entries = match chains.get(chain.as_str()) {
            Some(entries) => entries,
            None => return Ok(Vec::new()),
        };
        let start = start as usize;
        if start >= entries.len() {
            return Ok(Vec::new());
        }
        let end = match limit {
            Some(limit) => (start + limit as usize).min(entries.len()),
            None => entries.len(),
        };
        Ok(entries[start..end].to_vec())
    }

    async fn len(&self, chain: &ChainId) -> Result<u64> {
        let chains = self.chains.read().expect("audit store lock poisoned");
        Ok(chains
            .get(chain.as_str())
            .map(|entries| entries.len() as u64)
            .unwrap_or(0))
    }

    async fn chains(&self) -> Result<Vec<ChainId>> {
        let chains = self.chains.read().expect("audit store lock poisoned");
        let mut ids: Vec<ChainId> = chains
            .keys()
            .filter_map(|k| ChainId::new(k.clone()).ok())
            .collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(ids)
    }
}

/// File-backed audit store: one JSONL file per chain.
///
/// A batch is serialized into a single buffer and written with one append
/// call, so a crash mid-batch leaves at most a truncated final line, which
/// readers reject rather than silently accept.
#[derive(Debug)]
pub struct FileAuditStore {
    dir: PathBuf,
}

impl FileAuditStore {
    /// Creates a store rooted at `dir`, creating the directory if needed
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            VeilError::Io(format!(
                "failed to create audit directory {}: {e}",
                dir.display()
            ))
        })?;
        Ok(Self { dir })
    }

    fn chain_path(&self, chain: &ChainId) -> PathBuf {
        self.dir.join(format!("{}.jsonl", chain.as_str()))
    }

    fn read_all(&self, chain: &ChainId) -> Result<Vec<AuditEntry>> {
        let path = self.chain_path(chain);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(VeilError::Io(format!(
                    "failed to read audit chain {}: {e}",
                    path.display()
                )))
            }
        };
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|e| {
                    VeilError::Serialization(format!("corrupt audit line in {}: {e}", path.display()))
                })
            })
            .collect()
    }
}

#[async_trait]
impl AuditStore for FileAuditStore {
    async fn append(&self, chain: &ChainId, entries: &[AuditEntry]) -> Result<()> {
        let mut buffer = String::new();
        for entry in entries {
            buffer.push_str(&serde_json::to_string(entry)?);
            buffer.push('\n');
        }

        let path = self.chain_path(chain);
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                VeilError::Io(format!("failed to open audit chain {}: {e}", path.display()))
            })?;
        file.write_all(buffer.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|e| {
                VeilError::Io(format!(
                    "failed to append to audit chain {}: {e}",
                    path.display()
                ))
            })
    }

    async fn read(
        &self,
        chain: &ChainId,
        start: u64,
        limit: Option<u64>,
    ) -> Result<Vec<AuditEntry>> {
        let entries = self.read_all(chain)?;
        let start = start as usize;
        if start >= entries.len() {
            return Ok(Vec::new());
        }
        let end = match limit {
            Some(limit) => (start + limit as usize).min(entries.len()),
            None => entries.len(),
        };
        Ok(entries[start..end].to_vec())
    }

    async fn len(&self, chain: &ChainId) -> Result<u64> {
        Ok(self.read_all(chain)?.len() as u64)
    }

    async fn chains(&self) -> Result<Vec<ChainId>> {
        let mut ids = Vec::new();
        let dir = std::fs::read_dir(&self.dir)
            .map_err(|e| VeilError::Io(format!("failed to list {}: {e}", self.dir.display())))?;
        for dir_entry in dir {
            let dir_entry =
                dir_entry.map_err(|e| VeilError::Io(format!("failed to list chain file: {e}")))?;
            let name = dir_entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(".jsonl") {
                if let Ok(id) = ChainId::new(stem.to_string()) {
                    ids.push(id);
                }
            }
        }
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(ids)
    }
}
