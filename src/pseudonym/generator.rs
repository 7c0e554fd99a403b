//! Pseudonym generator
//!
//! Resolves a subject's natural key to a stable pseudonym and date-shift
//! offset under one policy version. Two modes:
//!
//! - **Derived** (default): both values come from a keyed SHA-256 derivation
//!   over (secret, subject, policy version). Reproducible without stored
//!   state, including across process restarts. Non-reversible.
//! - **Escrow**: a random mapping is generated on first resolution and
//!   persisted through an [`EscrowStore`] so authorized re-identification
//!   remains possible. The store's first-writer-wins semantics break ties
//!   between racing processes.
//!
//! First-time resolution for a subject is serialized behind a per-key lock so
//! two concurrent callers can never observe different shift offsets for the
//! same patient.

use crate::config::RetryPolicy;
use crate::domain::{PolicyVersion, PseudonymId, Result, SubjectKey, UnmappedSubjectError};
use crate::pseudonym::escrow::EscrowStore;
use rand::{Rng, SeedableRng};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// Stable per-subject de-identification parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PseudonymBinding {
    /// De-identified surrogate identifier
    pub pseudonym: PseudonymId,
    /// Constant offset applied to every temporal field of this subject
    pub date_shift_days: i64,
}

enum Mode {
    Derived { secret: SecretString },
    Escrow { store: Arc<dyn EscrowStore> },
}

/// Resolves subjects to pseudonym bindings under one policy version.
///
/// Cheap to share via `Arc`; the internal cache makes repeated resolutions
/// lock-free after the first.
pub struct PseudonymGenerator {
    version: PolicyVersion,
    window_days: u32,
    mode: Mode,
    retry: RetryPolicy,
    cache: RwLock<HashMap<SubjectKey, PseudonymBinding>>,
    locks: StdMutex<HashMap<SubjectKey, Arc<AsyncMutex<()>>>>,
}

impl PseudonymGenerator {
    /// Generator in derived (one-way) mode
    pub fn derived(version: PolicyVersion, window_days: u32, secret: SecretString) -> Self {
        Self {
            version,
            window_days,
            mode: Mode::Derived { secret },
            retry: RetryPolicy::default(),
            cache: RwLock::new(HashMap::new()),
            locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Generator in escrow mode, persisting mappings through `store`
    pub fn escrowed(
        version: PolicyVersion,
        window_days: u32,
        store: Arc<dyn EscrowStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            version,
            window_days,
            mode: Mode::Escrow { store },
            retry,
            cache: RwLock::new(HashMap::new()),
            locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Policy version this generator is bound to
    pub fn version(&self) -> &PolicyVersion {
        &self.version
    }

    /// Resolve the binding for a subject.
    ///
    /// Same subject + same policy version always yields the same binding.
    /// Only the escrow path can fail, and only after bounded retries.
    pub async fn resolve(&self, subject: &SubjectKey) -> Result<PseudonymBinding> {
        if let Some(binding) = self.cached(subject) {
            return Ok(binding);
        }

        // Serialize first-time resolution per subject key
        let key_lock = {
            let mut locks = self.locks.lock().expect("pseudonym lock map poisoned");
            locks
                .entry(subject.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let _guard = key_lock.lock().await;

        // A racing caller may have filled the cache while we waited
        if let Some(binding) = self.cached(subject) {
            return Ok(binding);
        }

        let binding = match &self.mode {
            Mode::Derived { secret } => self.derive(secret, subject),
            Mode::Escrow { store } => {
                let store = Arc::clone(store);
                self.resolve_escrowed(&store, subject).await?
            }
        };

        debug!(
            pseudonym = binding.pseudonym.as_str(),
            version = self.version.short(),
            "Resolved pseudonym binding"
        );

        self.cache
            .write()
            .expect("pseudonym cache lock poisoned")
            .insert(subject.clone(), binding.clone());

        // The cache is filled, so waiters and late arrivals hit it before
        // ever needing this lock again; dropping the entry keeps the map from
        // growing with subject cardinality
        self.locks
            .lock()
            .expect("pseudonym lock map poisoned")
            .remove(subject);
        Ok(binding)
    }

    #[cfg(test)]
    fn pending_locks(&self) -> usize {
        self.locks.lock().expect("pseudonym lock map poisoned").len()
    }

    fn cached(&self, subject: &SubjectKey) -> Option<PseudonymBinding> {
        self.cache
            .read()
            .expect("pseudonym cache lock poisoned")
            .get(subject)
            .cloned()
    }

    /// Keyed derivation: SHA-256 over (secret, subject, policy version) with
    /// domain separation between the inputs
    fn derive(&self, secret: &SecretString, subject: &SubjectKey) -> PseudonymBinding {
        let mut hasher = Sha256::new();
        hasher.update(secret.expose_secret().as_bytes());
        hasher.update([0x00]);
        hasher.update(subject.as_str().as_bytes());
        hasher.update([0x00]);
        hasher.update(self.version.as_str().as_bytes());
        let digest = hasher.finalize();

        let mut id_bytes = [0u8; 8];
        id_bytes.copy_from_slice(&digest[..8]);
        let pseudonym = PseudonymId::new(format!("sub-{:016x}", u64::from_be_bytes(id_bytes)))
            .expect("derived pseudonym is non-empty");

        let mut shift_bytes = [0u8; 8];
        shift_bytes.copy_from_slice(&digest[8..16]);
        let span = 2 * self.window_days as u64 + 1;
        let date_shift_days =
            (u64::from_be_bytes(shift_bytes) % span) as i64 - self.window_days as i64;

        PseudonymBinding {
            pseudonym,
            date_shift_days,
        }
    }

    /// Random binding for escrow mode
    fn random_binding(&self) -> PseudonymBinding {
        let mut rng = rand::rngs::StdRng::from_entropy();
        let id = uuid::Uuid::new_v4().simple().to_string();
        let window = self.window_days as i64;
        PseudonymBinding {
            pseudonym: PseudonymId::new(format!("sub-{}", &id[..16]))
                .expect("generated pseudonym is non-empty"),
            date_shift_days: rng.gen_range(-window..=window),
        }
    }

    /// Escrow lookup with bounded timeout and exponential-backoff retries
    async fn resolve_escrowed(
        &self,
        store: &Arc<dyn EscrowStore>,
        subject: &SubjectKey,
    ) -> std::result::Result<PseudonymBinding, UnmappedSubjectError> {
        let key = format!("{}:{}", self.version.as_str(), subject.as_str());
        let mut attempts = 0u32;
        let mut delay_ms = self.retry.initial_backoff_ms;
        let mut last_error = String::new();

        loop {
            attempts += 1;
            let attempt = timeout(
                Duration::from_millis(self.retry.timeout_ms),
                self.escrow_round_trip(store, &key),
            )
            .await;

            match attempt {
                Ok(Ok(binding)) => return Ok(binding),
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => {
                    last_error = format!("escrow call timed out after {}ms", self.retry.timeout_ms)
                }
            }

            if attempts > self.retry.max_retries {
                return Err(UnmappedSubjectError {
                    attempts,
                    message: last_error,
                });
            }

            warn!(
                attempts = attempts,
                delay_ms = delay_ms,
                "Escrow store unavailable, retrying after delay"
            );
            sleep(Duration::from_millis(delay_ms)).await;
            delay_ms *= 2;
        }
    }

    async fn escrow_round_trip(
        &self,
        store: &Arc<dyn EscrowStore>,
        key: &str,
    ) -> Result<PseudonymBinding> {
        if let Some(existing) = store.get(key).await? {
            return Ok(existing);
        }
        // Loser of a cross-process race reads the winner's binding back
        store.put_if_absent(key, self.random_binding()).await
    }
}
