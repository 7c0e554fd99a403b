//! Policy loader and validator
//!
//! Turns a raw [`PolicyDocument`] into an immutable [`DeidPolicy`]. The
//! loader fails closed: every pattern must compile and every parameter must
//! validate, or the whole load aborts with [`PolicyLoadError`] and no
//! partially valid policy is returned.
//!
//! The policy version is the SHA-256 of the document's canonical (sorted-key)
//! JSON serialization, so identical documents loaded on different hosts agree
//! on the version and therefore on every derived pseudonym.

use crate::domain::{FieldClass, PolicyLoadError, PolicyVersion};
use crate::policy::schema::{PatternRuleDocument, PolicyDocument};
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use tracing::info;

/// A compiled PHI pattern rule
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub name: String,
    pub regex: Regex,
    pub replacement: String,
    pub applies_to: Vec<FieldClass>,
}

impl CompiledRule {
    fn compile(doc: &PatternRuleDocument) -> Result<Self, PolicyLoadError> {
        let regex = Regex::new(&doc.regex).map_err(|e| PolicyLoadError::PatternCompile {
            rule: doc.name.clone(),
            message: e.to_string(),
        })?;
        Ok(Self {
            name: doc.name.clone(),
            regex,
            replacement: doc.replacement.clone(),
            applies_to: doc.applies_to.clone(),
        })
    }

    /// Whether this rule applies to fields of the given class
    pub fn applies_to(&self, class: FieldClass) -> bool {
        self.applies_to.contains(&class)
    }
}

/// Validated, immutable de-identification rule set.
///
/// Reloading a changed document produces a new policy with a new version;
/// pseudonym mappings are scoped to a version and never carry over implicitly.
#[derive(Debug)]
pub struct DeidPolicy {
    version: PolicyVersion,
    date_shift_days: u32,
    retention_days: u32,
    escrow_enabled: bool,
    default_class: FieldClass,
    rules: Vec<CompiledRule>,
    classifications: HashMap<String, HashMap<String, FieldClass>>,
    full_identifiers: HashSet<String>,
    age_bucket_years: u32,
    age_top_code: i64,
}

impl DeidPolicy {
    /// Validates and compiles a policy document
    pub fn load(doc: PolicyDocument) -> Result<Self, PolicyLoadError> {
        if doc.date_shift_days == 0 {
            return Err(PolicyLoadError::InvalidDateShiftWindow(
                doc.date_shift_days as i64,
            ));
        }
        if doc.retention_days == 0 {
            return Err(PolicyLoadError::InvalidRetention(doc.retention_days as i64));
        }
        if doc.age_bucket_years == 0 {
            return Err(PolicyLoadError::InvalidAgeBuckets(
                "bucket width must be positive".to_string(),
            ));
        }
        if doc.age_top_code <= 0 {
            return Err(PolicyLoadError::InvalidAgeBuckets(format!(
                "top-code age must be positive, got {}",
                doc.age_top_code
            )));
        }

        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(doc.phi_patterns.len());
        for pattern in &doc.phi_patterns {
            if !seen.insert(pattern.name.clone()) {
                return Err(PolicyLoadError::DuplicateRule(pattern.name.clone()));
            }
            rules.push(CompiledRule::compile(pattern)?);
        }

        for (resource_type, fields) in &doc.field_classifications {
            if resource_type.trim().is_empty() {
                return Err(PolicyLoadError::EmptyFieldName {
                    resource_type: "<empty>".to_string(),
                });
            }
            if fields.keys().any(|f| f.trim().is_empty()) {
                return Err(PolicyLoadError::EmptyFieldName {
                    resource_type: resource_type.clone(),
                });
            }
        }

        let version = policy_version(&doc)?;
        info!(
            version = version.short(),
            rules = rules.len(),
            date_shift_days = doc.date_shift_days,
            escrow = doc.escrow_enabled,
            "Loaded de-identification policy"
        );

        Ok(Self {
            version,
            date_shift_days: doc.date_shift_days,
            retention_days: doc.retention_days,
            escrow_enabled: doc.escrow_enabled,
            default_class: doc.default_classification,
            rules,
            classifications: doc.field_classifications,
            full_identifiers: doc.full_identifiers.into_iter().collect(),
            age_bucket_years: doc.age_bucket_years,
            age_top_code: doc.age_top_code,
        })
    }

    /// Parses a YAML policy document and loads it
    pub fn from_yaml(content: &str) -> Result<Self, PolicyLoadError> {
        let doc: PolicyDocument =
            serde_yaml::from_str(content).map_err(|e| PolicyLoadError::Parse(e.to_string()))?;
        Self::load(doc)
    }

    /// Policy version identifier
    pub fn version(&self) -> &PolicyVersion {
        &self.version
    }

    /// Classification for a field of a resource type.
    ///
    /// Unknown resource types and unknown fields fall back to the policy's
    /// default classification, never to passthrough.
    pub fn classify(&self, resource_type: &str, field: &str) -> FieldClass {
        self.classifications
            .get(resource_type)
            .and_then(|fields| fields.get(field))
            .copied()
            .unwrap_or(self.default_class)
    }

    /// Whether the policy explicitly classifies this field
    pub fn is_classified(&self, resource_type: &str, field: &str) -> bool {
        self.classifications
            .get(resource_type)
            .map(|fields| fields.contains_key(field))
            .unwrap_or(false)
    }

    /// Whether a field name is fully identifying (always replaced)
    pub fn is_full_identifier(&self, field: &str) -> bool {
        self.full_identifiers.contains(field)
    }

    /// Compiled pattern rules in policy order
    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    /// Half-width of the date-shift window in days
    pub fn date_shift_days(&self) -> u32 {
        self.date_shift_days
    }

    /// Audit retention period in days
    pub fn retention_days(&self) -> u32 {
        self.retention_days
    }

    /// Whether pseudonym mappings are escrowed
    pub fn escrow_enabled(&self) -> bool {
        self.escrow_enabled
    }

    /// Age generalization bucket width in years
    pub fn age_bucket_years(&self) -> u32 {
        self.age_bucket_years
    }

    /// Top-code threshold: ages at or above collapse to one bucket
    pub fn age_top_code(&self) -> i64 {
        self.age_top_code
    }
}

/// Compute the policy version hash over canonical JSON
fn policy_version(doc: &PolicyDocument) -> Result<PolicyVersion, PolicyLoadError> {
    let value = serde_json::to_value(doc).map_err(|e| PolicyLoadError::Parse(e.to_string()))?;
    let canonical = serde_json::to_string(&normalize_json(&value))
        .map_err(|e| PolicyLoadError::Parse(e.to_string()))?;

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let digest = hasher.finalize();
    PolicyVersion::new(format!("{digest:x}")).map_err(PolicyLoadError::Parse)
}

/// Normalize JSON to sorted-key form so semantically identical documents
/// produce the same version hash
fn normalize_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: std::collections::BTreeMap<String, Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), normalize_json(v)))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(arr) => Value::Array(arr.iter().map(normalize_json).collect()),
        _ => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_yaml() -> &'static str {
        r#"
date_shift_days: 365
retention_days: 2190
phi_patterns:
  - name: mrn
    regex: '\d{3}-\d{2}-\d{4}'
    replacement: '[MEDICAL RECORD]'
field_classifications:
  Patient:
    name: identifying
    age: quasi_identifying
    blood_type: clinical
"#
    }

    #[test]
    fn test_load_valid_policy() {
        let policy = DeidPolicy::from_yaml(base_yaml()).unwrap();
        assert_eq!(policy.date_shift_days(), 365);
        assert_eq!(policy.rules().len(), 1);
        assert_eq!(policy.version().as_str().len(), 64);
    }

    #[test]
    fn test_bad_pattern_aborts_load() {
        let yaml = r#"
date_shift_days: 30
retention_days: 365
phi_patterns:
  - name: broken
    regex: '([unclosed'
    replacement: '[X]'
"#;
        let err = DeidPolicy::from_yaml(yaml).unwrap_err();
        assert!(matches!(
            err,
            PolicyLoadError::PatternCompile { ref rule, .. } if rule == "broken"
        ));
    }

    #[test]
    fn test_zero_date_shift_rejected() {
        let yaml = "date_shift_days: 0\nretention_days: 365\n";
        let err = DeidPolicy::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, PolicyLoadError::InvalidDateShiftWindow(0)));
    }

    #[test]
    fn test_zero_retention_rejected() {
        let yaml = "date_shift_days: 30\nretention_days: 0\n";
        let err = DeidPolicy::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, PolicyLoadError::InvalidRetention(0)));
    }

    #[test]
    fn test_duplicate_rule_rejected() {
        let yaml = r#"
date_shift_days: 30
retention_days: 365
phi_patterns:
  - name: mrn
    regex: '\d+'
    replacement: '[A]'
  - name: mrn
    regex: '\d+'
    replacement: '[B]'
"#;
        let err = DeidPolicy::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, PolicyLoadError::DuplicateRule(ref n) if n == "mrn"));
    }

    #[test]
    fn test_version_is_stable_across_loads() {
        let a = DeidPolicy::from_yaml(base_yaml()).unwrap();
        let b = DeidPolicy::from_yaml(base_yaml()).unwrap();
        assert_eq!(a.version(), b.version());
    }

    #[test]
    fn test_version_changes_with_content() {
        let a = DeidPolicy::from_yaml(base_yaml()).unwrap();
        let modified = base_yaml().replace("365", "180");
        let b = DeidPolicy::from_yaml(&modified).unwrap();
        assert_ne!(a.version(), b.version());
    }

    #[test]
    fn test_classify_known_and_unknown() {
        let policy = DeidPolicy::from_yaml(base_yaml()).unwrap();
        assert_eq!(policy.classify("Patient", "name"), FieldClass::Identifying);
        assert_eq!(
            policy.classify("Patient", "age"),
            FieldClass::QuasiIdentifying
        );
        assert_eq!(
            policy.classify("Patient", "blood_type"),
            FieldClass::Clinical
        );
        // Unknown field and unknown resource type fail safe to identifying
        assert_eq!(
            policy.classify("Patient", "nickname"),
            FieldClass::Identifying
        );
        assert_eq!(
            policy.classify("CustomResource", "anything"),
            FieldClass::Identifying
        );
    }

    #[test]
    fn test_full_identifier_defaults() {
        let policy = DeidPolicy::from_yaml(base_yaml()).unwrap();
        assert!(policy.is_full_identifier("name"));
        assert!(policy.is_full_identifier("address"));
        assert!(!policy.is_full_identifier("blood_type"));
    }
}
