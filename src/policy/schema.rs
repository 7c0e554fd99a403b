//! De-identification policy document schema
//!
//! Serde schema of the policy document consumed by the loader. The document
//! is authored in YAML by compliance staff; the serving layer hands the raw
//! text to [`crate::policy::DeidPolicy::from_yaml`].

use crate::domain::FieldClass;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One PHI pattern rule as written in the policy document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternRuleDocument {
    /// Unique rule name, e.g. `mrn`
    pub name: String,
    /// Regular expression matched against text values
    pub regex: String,
    /// Replacement template. `{pseudonym}` expands to the subject's pseudonym.
    pub replacement: String,
    /// Field classes this rule applies to (default: identifying only)
    #[serde(default = "default_applies_to")]
    pub applies_to: Vec<FieldClass>,
}

fn default_applies_to() -> Vec<FieldClass> {
    vec![FieldClass::Identifying]
}

/// Raw de-identification policy document
///
/// # Example document
///
/// ```yaml
/// date_shift_days: 365
/// retention_days: 2190
/// escrow_enabled: false
/// phi_patterns:
///   - name: mrn
///     regex: '\d{3}-\d{2}-\d{4}'
///     replacement: '[MEDICAL RECORD]'
/// field_classifications:
///   Patient:
///     name: identifying
///     age: quasi_identifying
///   Observation:
///     value: clinical
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDocument {
    /// Half-width of the per-subject date-shift window, in days
    pub date_shift_days: u32,

    /// How long audit entries must be retained, in days
    pub retention_days: u32,

    /// Whether pseudonym mappings are escrowed for authorized re-identification
    #[serde(default)]
    pub escrow_enabled: bool,

    /// Ordered PHI pattern rules; first match wins
    #[serde(default)]
    pub phi_patterns: Vec<PatternRuleDocument>,

    /// Per-resource-type field classification map
    #[serde(default)]
    pub field_classifications: HashMap<String, HashMap<String, FieldClass>>,

    /// Classification applied to unknown resource types and fields.
    /// Fail-safe default: treat unknown as identifying.
    #[serde(default = "default_classification")]
    pub default_classification: FieldClass,

    /// Field names whose text is replaced even when no pattern matches
    #[serde(default = "default_full_identifiers")]
    pub full_identifiers: Vec<String>,

    /// Width of age generalization buckets, in years
    #[serde(default = "default_age_bucket_years")]
    pub age_bucket_years: u32,

    /// Ages at or above this collapse into a single open-ended bucket
    #[serde(default = "default_age_top_code")]
    pub age_top_code: i64,
}

fn default_classification() -> FieldClass {
    FieldClass::Identifying
}

fn default_full_identifiers() -> Vec<String> {
    ["name", "given", "family", "address", "telecom"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_age_bucket_years() -> u32 {
    10
}

fn default_age_top_code() -> i64 {
    90
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_document() {
        let yaml = r#"
date_shift_days: 30
retention_days: 365
"#;
        let doc: PolicyDocument = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(doc.date_shift_days, 30);
        assert!(!doc.escrow_enabled);
        assert!(doc.phi_patterns.is_empty());
        assert_eq!(doc.default_classification, FieldClass::Identifying);
        assert_eq!(doc.age_bucket_years, 10);
        assert_eq!(doc.age_top_code, 90);
        assert!(doc.full_identifiers.contains(&"name".to_string()));
    }

    #[test]
    fn test_parse_full_document() {
        let yaml = r#"
date_shift_days: 365
retention_days: 2190
escrow_enabled: true
phi_patterns:
  - name: mrn
    regex: '\d{3}-\d{2}-\d{4}'
    replacement: '[MEDICAL RECORD]'
  - name: zip
    regex: '\b\d{5}\b'
    replacement: '[ZIP]'
    applies_to: [identifying, quasi_identifying]
field_classifications:
  Patient:
    name: identifying
    age: quasi_identifying
    blood_type: clinical
default_classification: identifying
"#;
        let doc: PolicyDocument = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(doc.phi_patterns.len(), 2);
        assert_eq!(doc.phi_patterns[0].applies_to, vec![FieldClass::Identifying]);
        assert_eq!(doc.phi_patterns[1].applies_to.len(), 2);
        assert_eq!(
            doc.field_classifications["Patient"]["age"],
            FieldClass::QuasiIdentifying
        );
        assert!(doc.escrow_enabled);
    }

    #[test]
    fn test_unknown_classification_value_rejected() {
        let yaml = r#"
date_shift_days: 30
retention_days: 365
field_classifications:
  Patient:
    name: super_secret
"#;
        assert!(serde_yaml::from_str::<PolicyDocument>(yaml).is_err());
    }
}
