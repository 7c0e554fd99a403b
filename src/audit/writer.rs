//! Audit writer
//!
//! Appends batches of audit entries to a chain. All entries of one traversal
//! are written as a unit, so a partially processed resource never produces a
//! partial audit trail. Appends to the same chain are serialized behind a
//! per-chain lock; that ordering is what makes the hash chain meaningful.
//!
//! Store failures are retried with bounded exponential backoff. Exhausting
//! the retries surfaces [`AuditWriteFailure`], which aborts the triggering
//! de-identification call: PHI is never released without its audit entries.

use crate::audit::entry::{seal_batch, AuditDraft, AuditEntry, GENESIS_HASH};
use crate::audit::store::AuditStore;
use crate::config::RetryPolicy;
use crate::domain::{AuditWriteFailure, ChainId, Result, VeilError};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

/// Serialized, retrying front of an [`AuditStore`]
pub struct AuditWriter {
    store: Arc<dyn AuditStore>,
    retry: RetryPolicy,
    chain_locks: StdMutex<HashMap<ChainId, Arc<AsyncMutex<()>>>>,
}

impl AuditWriter {
    /// Creates a writer over the given store
    pub fn new(store: Arc<dyn AuditStore>, retry: RetryPolicy) -> Self {
        Self {
            store,
            retry,
            chain_locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Append a batch of drafts to a chain.
    ///
    /// Returns the chain position of the batch's first entry. An empty batch
    /// appends nothing and returns the current chain length.
    pub async fn append(&self, chain: &ChainId, drafts: &[AuditDraft]) -> Result<u64> {
        if drafts.is_empty() {
            return self.store.len(chain).await;
        }

        let chain_lock = {
            let mut locks = self.chain_locks.lock().expect("chain lock map poisoned");
            locks
                .entry(chain.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let _guard = chain_lock.lock().await;
        let result = self.append_with_retries(chain, drafts).await;

        // Still holding the chain guard: with no waiter referencing the lock
        // the map entry can go, so the map does not grow with chain count
        {
            let mut locks = self.chain_locks.lock().expect("chain lock map poisoned");
            if Arc::strong_count(&chain_lock) == 2 {
                locks.remove(chain);
            }
        }
        result
    }

    /// Retry loop around [`Self::append_once`]; caller holds the chain lock
    async fn append_with_retries(&self, chain: &ChainId, drafts: &[AuditDraft]) -> Result<u64> {
        let mut attempts = 0u32;
        let mut delay_ms = self.retry.initial_backoff_ms;
        let mut last_error = String::new();

        loop {
            attempts += 1;
            let attempt = timeout(
                Duration::from_millis(self.retry.timeout_ms),
                self.append_once(chain, drafts),
            )
            .await;

            match attempt {
                Ok(Ok(position)) => {
                    info!(
                        chain = chain.as_str(),
                        position = position,
                        entries = drafts.len(),
                        "Appended audit batch"
                    );
                    return Ok(position);
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => {
                    last_error = format!("append timed out after {}ms", self.retry.timeout_ms)
                }
            }

            if attempts > self.retry.max_retries {
                return Err(VeilError::AuditWrite(AuditWriteFailure {
                    chain: chain.as_str().to_string(),
                    attempts,
                    message: last_error,
                }));
            }

            warn!(
                chain = chain.as_str(),
                attempts = attempts,
                delay_ms = delay_ms,
                "Audit store append failed, retrying after delay"
            );
            sleep(Duration::from_millis(delay_ms)).await;
            delay_ms *= 2;
        }
    }

    #[cfg(test)]
    fn pending_locks(&self) -> usize {
        self.chain_locks
            .lock()
            .expect("chain lock map poisoned")
            .len()
    }

    /// One append attempt: read the chain tail, link the batch, write it
    async fn append_once(&self, chain: &ChainId, drafts: &[AuditDraft]) -> Result<u64> {
        let position = self.store.len(chain).await?;
        let prev_hash = if position == 0 {
            GENESIS_HASH.to_string()
        } else {
            let tail = self.store.read(chain, position - 1, Some(1)).await?;
            tail.into_iter()
                .next()
                .map(|entry| entry.entry_hash)
                .ok_or_else(|| {
                    VeilError::Io(format!(
                        "chain '{chain}' reported length {position} but tail entry is missing"
                    ))
                })?
        };

        let entries: Vec<AuditEntry> = seal_batch(drafts, Utc::now(), &prev_hash);
        self.store.append(chain, &entries).await?;
        Ok(position)
    }
}
