//! De-identification engine
//!
//! Facade wiring the policy, pseudonym generator, resource walker, and audit
//! trail into one pipeline. The contract is fail-closed in both directions:
//! a resource that cannot be fully de-identified produces no output, and
//! de-identified output is never released unless its audit entries were
//! durably appended first.

use crate::audit::{
    AuditAction, AuditDraft, AuditEntry, AuditFilter, AuditQueryService, AuditStore, AuditWriter,
    ChainVerification,
};
use crate::config::EngineConfig;
use crate::domain::{ActorId, ChainId, ClinicalResource, Result, VeilError};
use crate::policy::DeidPolicy;
use crate::pseudonym::{EscrowStore, PseudonymGenerator};
use crate::walker::{AccessEvent, ResourceWalker};
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info};

/// Result of one successful de-identification call
#[derive(Debug)]
pub struct DeidOutcome {
    /// The de-identified resource, safe for release
    pub resource: ClinicalResource,
    /// Chain the access events were appended to
    pub chain: ChainId,
    /// Chain position of the first appended entry
    pub position: u64,
    /// Number of audit entries appended
    pub events_appended: usize,
}

/// Why one batch record produced no output.
///
/// Each failed record is also recorded as an `AccessDenied` audit entry; if
/// appending that entry failed too, the second failure is carried here so
/// the caller knows the denial never reached the ledger.
#[derive(Debug)]
pub struct BatchFailure {
    /// Why the record failed de-identification
    pub error: VeilError,
    /// Failure appending the denial audit entry, when that also failed
    pub denial_error: Option<VeilError>,
}

/// One record's outcome within a batch
pub type BatchOutcome = std::result::Result<DeidOutcome, BatchFailure>;

/// The de-identification pipeline
pub struct DeidEngine {
    policy: Arc<DeidPolicy>,
    generator: Arc<PseudonymGenerator>,
    walker: ResourceWalker,
    writer: AuditWriter,
    query: AuditQueryService,
    pinned_chain: Option<ChainId>,
}

impl std::fmt::Debug for DeidEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeidEngine")
            .field("pinned_chain", &self.pinned_chain)
            .finish_non_exhaustive()
    }
}

impl DeidEngine {
    /// Assemble an engine from a loaded policy, configuration, and stores.
    ///
    /// `escrow` is required when the policy enables escrow mode and ignored
    /// otherwise.
    pub fn new(
        policy: DeidPolicy,
        config: EngineConfig,
        audit_store: Arc<dyn AuditStore>,
        escrow: Option<Arc<dyn EscrowStore>>,
    ) -> Result<Self> {
        config.validate(policy.escrow_enabled())?;

        let pinned_chain = match &config.audit.chain {
            Some(name) => Some(ChainId::new(name.clone()).map_err(VeilError::Configuration)?),
            None => None,
        };

        let policy = Arc::new(policy);
        let generator = if policy.escrow_enabled() {
            let store = escrow.ok_or_else(|| {
                VeilError::Configuration(
                    "policy enables escrow but no escrow store was provided".to_string(),
                )
            })?;
            Arc::new(PseudonymGenerator::escrowed(
                policy.version().clone(),
                policy.date_shift_days(),
                store,
                config.escrow_retry.clone(),
            ))
        } else {
            Arc::new(PseudonymGenerator::derived(
                policy.version().clone(),
                policy.date_shift_days(),
                config.pseudonym_secret.clone(),
            ))
        };

        let walker = ResourceWalker::new(Arc::clone(&policy));
        let writer = AuditWriter::new(Arc::clone(&audit_store), config.audit.retry.clone());
        let query = AuditQueryService::new(audit_store);

        info!(
            version = policy.version().short(),
            escrow = policy.escrow_enabled(),
            "De-identification engine ready"
        );
        Ok(Self {
            policy,
            generator,
            walker,
            writer,
            query,
            pinned_chain,
        })
    }

    /// The loaded policy
    pub fn policy(&self) -> &DeidPolicy {
        &self.policy
    }

    /// Chain that appends currently target: the pinned chain if configured,
    /// otherwise one chain per UTC day
    pub fn current_chain(&self) -> ChainId {
        match &self.pinned_chain {
            Some(chain) => chain.clone(),
            None => ChainId::for_date(Utc::now().date_naive()),
        }
    }

    /// De-identify one resource and audit every protected-field access.
    ///
    /// The audit append happens before the output is returned; if it fails
    /// after bounded retries, the whole call fails and no output is released.
    pub async fn deidentify(
        &self,
        resource: &ClinicalResource,
        actor: &ActorId,
        reason: &str,
    ) -> Result<DeidOutcome> {
        let chain = self.current_chain();
        let (deidentified, events) = self.walker.process(resource, &self.generator).await?;

        let drafts = self.drafts_for(&events, actor, reason);
        let position = self.writer.append(&chain, &drafts).await?;

        Ok(DeidOutcome {
            resource: deidentified,
            chain,
            position,
            events_appended: drafts.len(),
        })
    }

    /// De-identify a batch with per-record isolation.
    ///
    /// One record failing does not abort the rest. Each failure is recorded
    /// as an `AccessDenied` entry on the chain; if even that denial entry
    /// cannot be appended, [`BatchFailure::denial_error`] carries the second
    /// failure next to the record's original error.
    pub async fn deidentify_batch(
        &self,
        resources: &[ClinicalResource],
        actor: &ActorId,
        reason: &str,
    ) -> Vec<BatchOutcome> {
        let mut outcomes = Vec::with_capacity(resources.len());
        for resource in resources {
            match self.deidentify(resource, actor, reason).await {
                Ok(outcome) => outcomes.push(Ok(outcome)),
                Err(e) => {
                    error!(
                        resource_type = resource.resource_type.as_str(),
                        error = %e,
                        "Record failed de-identification"
                    );
                    let denial_error = self.record_denial(resource, actor, reason).await.err();
                    if let Some(denial) = &denial_error {
                        error!(error = %denial, "Failed to record denial audit entry");
                    }
                    outcomes.push(Err(BatchFailure {
                        error: e,
                        denial_error,
                    }));
                }
            }
        }
        outcomes
    }

    /// Query the audit trail
    pub async fn query_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        self.query.query(filter).await
    }

    /// Verify a chain's hash links from its genesis entry
    pub async fn verify_audit(&self, chain: &ChainId) -> Result<ChainVerification> {
        self.query.verify_chain(chain).await
    }

    /// Verify a chain resuming from a previously checked position
    pub async fn verify_audit_from(
        &self,
        chain: &ChainId,
        start: u64,
    ) -> Result<ChainVerification> {
        self.query.verify_chain_from(chain, start).await
    }

    fn drafts_for(
        &self,
        events: &[AccessEvent],
        actor: &ActorId,
        reason: &str,
    ) -> Vec<AuditDraft> {
        events
            .iter()
            .map(|event| {
                AuditDraft::new(
                    actor.clone(),
                    event.subject_pseudonym.as_str(),
                    AuditAction::Access,
                    format!("{}/{}", event.resource_type, event.field_path),
                    reason,
                    self.policy.version().short(),
                )
            })
            .collect()
    }

    /// Denial entry for a failed record. Carries no raw subject key: a
    /// record that failed may not have a resolved pseudonym, so the subject
    /// slot holds a fixed marker.
    async fn record_denial(
        &self,
        resource: &ClinicalResource,
        actor: &ActorId,
        reason: &str,
    ) -> Result<u64> {
        let draft = AuditDraft::new(
            actor.clone(),
            "unresolved",
            AuditAction::AccessDenied,
            resource.resource_type.clone(),
            reason,
            self.policy.version().short(),
        );
        self.writer.append(&self.current_chain(), &[draft]).await
    }
}
