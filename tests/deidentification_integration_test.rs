//! End-to-end tests for the de-identification pipeline

use std::sync::Arc;
use veil::audit::{
    AuditAction, AuditEntry, AuditFilter, AuditStore, ChainVerification, InMemoryAuditStore,
};
use veil::config::EngineConfig;
use veil::domain::{
    ActorId, ChainId, ClinicalResource, FieldValue, Result, SubjectKey, VeilError,
};
use veil::engine::DeidEngine;
use veil::policy::DeidPolicy;
use veil::pseudonym::InMemoryEscrowStore;

use async_trait::async_trait;
use chrono::NaiveDate;

const POLICY_YAML: &str = r#"
date_shift_days: 365
retention_days: 2190
phi_patterns:
  - name: mrn
    regex: '\d{3}-\d{2}-\d{4}'
    replacement: '[MEDICAL RECORD]'
  - name: phone
    regex: '\(\d{3}\) \d{3}-\d{4}'
    replacement: '[PHONE]'
field_classifications:
  Patient:
    name: identifying
    note: identifying
    age: quasi_identifying
    blood_type: clinical
  Observation:
    code: clinical
    value: clinical
    effective: clinical
"#;

fn engine_with_store(store: Arc<InMemoryAuditStore>) -> DeidEngine {
    let policy = DeidPolicy::from_yaml(POLICY_YAML).unwrap();
    DeidEngine::new(
        policy,
        EngineConfig::with_secret("integration-test-secret"),
        store,
        None,
    )
    .unwrap()
}

fn engine() -> DeidEngine {
    engine_with_store(Arc::new(InMemoryAuditStore::new()))
}

fn actor() -> ActorId {
    ActorId::new("researcher@example.org").unwrap()
}

fn admission_note(subject: &str) -> ClinicalResource {
    ClinicalResource::new("Patient")
        .with_subject(SubjectKey::new(subject).unwrap())
        .with_field("name", FieldValue::text("John Doe"))
        .with_field(
            "note",
            FieldValue::text("MRN 123-45-6789 admitted, callback (555) 123-4567"),
        )
        .with_field("age", FieldValue::Integer(47))
        .with_field("blood_type", FieldValue::text("O+"))
}

fn observation(subject: &str, date: NaiveDate) -> ClinicalResource {
    ClinicalResource::new("Observation")
        .with_subject(SubjectKey::new(subject).unwrap())
        .with_field("code", FieldValue::text("8867-4"))
        .with_field("value", FieldValue::Decimal(72.0))
        .with_field("effective", FieldValue::date(date))
}

#[tokio::test]
async fn test_note_patterns_redacted_clinical_text_survives() {
    let engine = engine();
    let outcome = engine
        .deidentify(&admission_note("patient/8f2c01"), &actor(), "chart review")
        .await
        .unwrap();

    let note = outcome
        .resource
        .field("note")
        .and_then(|v| v.as_text())
        .unwrap();
    assert_eq!(note, "MRN [MEDICAL RECORD] admitted, callback (555) 123-4567");

    let name = outcome
        .resource
        .field("name")
        .and_then(|v| v.as_text())
        .unwrap();
    assert!(name.starts_with("[REDACTED:sub-"));
    assert_eq!(
        outcome.resource.field("age"),
        Some(&FieldValue::text("40-49"))
    );
    assert_eq!(
        outcome.resource.field("blood_type"),
        Some(&FieldValue::text("O+"))
    );
}

#[tokio::test]
async fn test_raw_subject_absent_from_output_and_audit() {
    let store = Arc::new(InMemoryAuditStore::new());
    let engine = engine_with_store(Arc::clone(&store));

    let outcome = engine
        .deidentify(&admission_note("patient/8f2c01"), &actor(), "chart review")
        .await
        .unwrap();

    let serialized = serde_json::to_string(&outcome.resource).unwrap();
    assert!(!serialized.contains("patient/8f2c01"));
    assert!(!serialized.contains("John Doe"));

    let entries = engine.query_audit(&AuditFilter::new()).await.unwrap();
    assert!(!entries.is_empty());
    for entry in &entries {
        assert!(!entry.subject_pseudonym.contains("8f2c01"));
        assert!(entry.subject_pseudonym.starts_with("sub-"));
    }
}

#[tokio::test]
async fn test_pseudonyms_stable_across_engine_instances() {
    let first = engine()
        .deidentify(&admission_note("patient/8f2c01"), &actor(), "chart review")
        .await
        .unwrap();
    let second = engine()
        .deidentify(&admission_note("patient/8f2c01"), &actor(), "chart review")
        .await
        .unwrap();

    // Same secret and policy: a restarted process resolves the same pseudonym
    assert_eq!(
        first.resource.field("subject_pseudonym"),
        second.resource.field("subject_pseudonym")
    );
    assert_eq!(first.resource, second.resource);
}

#[tokio::test]
async fn test_date_intervals_preserved_across_separate_calls() {
    let engine = engine();
    let day1 = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    let day11 = NaiveDate::from_ymd_opt(2024, 3, 11).unwrap();

    let a = engine
        .deidentify(&observation("patient/8f2c01", day1), &actor(), "trend analysis")
        .await
        .unwrap();
    let b = engine
        .deidentify(&observation("patient/8f2c01", day11), &actor(), "trend analysis")
        .await
        .unwrap();

    let shifted = |outcome: &veil::engine::DeidOutcome| match outcome.resource.field("effective") {
        Some(FieldValue::Date { date, shifted }) => {
            assert!(shifted);
            *date
        }
        other => panic!("expected shifted date, got {other:?}"),
    };
    let (da, db) = (shifted(&a), shifted(&b));
    assert_eq!((db - da).num_days(), 10);
    // The applied offset stays within the policy window
    assert!((da - day1).num_days().abs() <= 365);
}

#[tokio::test]
async fn test_every_protected_access_audited() {
    let engine = engine();
    let outcome = engine
        .deidentify(&admission_note("patient/8f2c01"), &actor(), "chart review")
        .await
        .unwrap();

    // name, note, age are protected; blood_type is clinical
    assert_eq!(outcome.events_appended, 3);

    let entries = engine
        .query_audit(&AuditFilter::new().actor(actor()))
        .await
        .unwrap();
    let categories: Vec<&str> = entries.iter().map(|e| e.category.as_str()).collect();
    assert_eq!(
        categories,
        vec!["Patient/name", "Patient/note", "Patient/age"]
    );
    for entry in &entries {
        assert_eq!(entry.action, AuditAction::Access);
        assert_eq!(entry.reason, "chart review");
    }

    let verification = engine.verify_audit(&outcome.chain).await.unwrap();
    assert_eq!(verification, ChainVerification::Valid { checked: 3 });
}

/// Store whose appends always fail, standing in for an audit backend outage
struct DownStore;

#[async_trait]
impl AuditStore for DownStore {
    async fn append(&self, _chain: &ChainId, _entries: &[AuditEntry]) -> Result<()> {
        Err(VeilError::Io("audit backend unavailable".to_string()))
    }

    async fn read(
        &self,
        _chain: &ChainId,
        _start: u64,
        _limit: Option<u64>,
    ) -> Result<Vec<AuditEntry>> {
        Ok(Vec::new())
    }

    async fn len(&self, _chain: &ChainId) -> Result<u64> {
        Ok(0)
    }

    async fn chains(&self) -> Result<Vec<ChainId>> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn test_output_withheld_when_audit_store_is_down() {
    let policy = DeidPolicy::from_yaml(POLICY_YAML).unwrap();
    let mut config = EngineConfig::with_secret("integration-test-secret");
    config.audit.retry.max_retries = 1;
    config.audit.retry.initial_backoff_ms = 1;
    let engine = DeidEngine::new(policy, config, Arc::new(DownStore), None).unwrap();

    let err = engine
        .deidentify(&admission_note("patient/8f2c01"), &actor(), "chart review")
        .await
        .unwrap_err();
    assert!(matches!(err, VeilError::AuditWrite(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_batch_survives_bad_record() {
    let store = Arc::new(InMemoryAuditStore::new());
    let engine = engine_with_store(Arc::clone(&store));

    let records = vec![
        admission_note("patient/8f2c01"),
        // Protected field without any subject in scope: rejected, not leaked
        ClinicalResource::new("Patient").with_field("name", FieldValue::text("Jane Roe")),
        admission_note("patient/77aa02"),
    ];

    let outcomes = engine
        .deidentify_batch(&records, &actor(), "cohort export")
        .await;
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes[0].is_ok());
    match &outcomes[1] {
        Err(failure) => {
            assert!(matches!(failure.error, VeilError::Validation(_)));
            assert!(failure.denial_error.is_none());
        }
        Ok(_) => panic!("expected the subjectless record to fail"),
    }
    assert!(outcomes[2].is_ok());

    let denied = engine
        .query_audit(&AuditFilter::new().action(AuditAction::AccessDenied))
        .await
        .unwrap();
    assert_eq!(denied.len(), 1);

    // The chain stays verifiable with successes and the denial interleaved
    let chain = engine.current_chain();
    assert!(engine.verify_audit(&chain).await.unwrap().is_valid());
}

#[tokio::test]
async fn test_escrow_mode_end_to_end() {
    let yaml = format!("escrow_enabled: true\n{POLICY_YAML}");
    let policy = DeidPolicy::from_yaml(&yaml).unwrap();
    let escrow = Arc::new(InMemoryEscrowStore::new());
    let engine = DeidEngine::new(
        policy,
        EngineConfig::default(),
        Arc::new(InMemoryAuditStore::new()),
        Some(Arc::clone(&escrow) as Arc<dyn veil::pseudonym::EscrowStore>),
    )
    .unwrap();

    let first = engine
        .deidentify(&admission_note("patient/8f2c01"), &actor(), "chart review")
        .await
        .unwrap();
    let second = engine
        .deidentify(&admission_note("patient/8f2c01"), &actor(), "chart review")
        .await
        .unwrap();

    assert_eq!(
        first.resource.field("subject_pseudonym"),
        second.resource.field("subject_pseudonym")
    );
    // The mapping was escrowed for authorized re-identification
    assert_eq!(escrow.len(), 1);
}

#[tokio::test]
async fn test_nested_bundle_processing() {
    let engine = engine();
    let bundle = ClinicalResource::new("Bundle").with_field(
        "entry",
        FieldValue::Collection(vec![
            FieldValue::Resource(admission_note("patient/8f2c01")),
            FieldValue::Resource(observation(
                "patient/8f2c01",
                NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            )),
        ]),
    );

    let outcome = engine
        .deidentify(&bundle, &actor(), "cohort export")
        .await
        .unwrap();

    let entries = engine.query_audit(&AuditFilter::new()).await.unwrap();
    assert_eq!(entries.len(), outcome.events_appended);
    // Nested paths are indexed so individual entries stay attributable
    assert!(entries
        .iter()
        .any(|e| e.category == "Patient/entry[0].name"));
}
