//! Redaction engine
//!
//! Applies pattern-based and field-based redaction to scalar values according
//! to their policy classification and the subject's pseudonym binding.
//!
//! Redaction is idempotent for every classification: shifted temporal values
//! carry a flag, redaction markers (`[...]`) are recognized and left alone,
//! and generalized buckets are recognized by shape. Resources may therefore be
//! retried through the pipeline without double-shifting or re-redacting.

use crate::domain::{FieldClass, FieldValue};
use crate::policy::DeidPolicy;
use crate::pseudonym::PseudonymBinding;
use crate::redaction::dateshift::{shift_date, shift_datetime};
use std::sync::Arc;

/// Classification-driven scalar redaction.
///
/// Nested resources and collections are the resource walker's concern; this
/// engine only transforms leaf values.
pub struct RedactionEngine {
    policy: Arc<DeidPolicy>,
}

impl RedactionEngine {
    /// Creates an engine bound to a loaded policy
    pub fn new(policy: Arc<DeidPolicy>) -> Self {
        Self { policy }
    }

    /// Redact one leaf value.
    ///
    /// `full_identifier` marks fields (like `name`) that are replaced even
    /// when no pattern rule matches.
    pub fn redact(
        &self,
        value: &FieldValue,
        class: FieldClass,
        full_identifier: bool,
        binding: &PseudonymBinding,
    ) -> FieldValue {
        match value {
            // Temporal values shift for every classification; real dates are
            // PHI regardless of how the field is classed.
            FieldValue::Date { date, shifted } => {
                if *shifted {
                    value.clone()
                } else {
                    FieldValue::Date {
                        date: shift_date(*date, binding.date_shift_days),
                        shifted: true,
                    }
                }
            }
            FieldValue::DateTime { at, shifted } => {
                if *shifted {
                    value.clone()
                } else {
                    FieldValue::DateTime {
                        at: shift_datetime(*at, binding.date_shift_days),
                        shifted: true,
                    }
                }
            }

            _ if class == FieldClass::Clinical => value.clone(),

            FieldValue::Text(text) => self.redact_text(text, class, full_identifier, binding),

            FieldValue::Integer(n) if class == FieldClass::QuasiIdentifying => {
                FieldValue::Text(self.generalize(*n))
            }
            FieldValue::Decimal(d) if class == FieldClass::QuasiIdentifying => {
                FieldValue::Text(self.generalize(d.floor() as i64))
            }

            // Identifying scalars never pass through raw
            FieldValue::Integer(_) | FieldValue::Decimal(_) | FieldValue::Boolean(_)
                if class == FieldClass::Identifying =>
            {
                FieldValue::Text(replacement_marker(binding))
            }

            _ => value.clone(),
        }
    }

    fn redact_text(
        &self,
        text: &str,
        class: FieldClass,
        full_identifier: bool,
        binding: &PseudonymBinding,
    ) -> FieldValue {
        // Already-redacted markers are terminal; bucket shapes only count as
        // terminal for quasi-identifying fields, where they are the output of
        // a previous generalization pass
        if is_redaction_marker(text)
            || (class == FieldClass::QuasiIdentifying && is_generalized_bucket(text))
        {
            return FieldValue::Text(text.to_string());
        }

        // Fully-identifying fields are replaced outright, regardless of any
        // pattern match; a rule hitting a fragment must not leave the
        // surrounding text behind
        if class == FieldClass::Identifying && full_identifier {
            return FieldValue::Text(replacement_marker(binding));
        }

        // Rules are evaluated in policy order; first match wins
        for rule in self.policy.rules() {
            if !rule.applies_to(class) {
                continue;
            }
            if rule.regex.is_match(text) {
                let replacement = rule
                    .replacement
                    .replace("{pseudonym}", binding.pseudonym.as_str());
                let redacted = rule.regex.replace_all(text, replacement.as_str());
                return FieldValue::Text(redacted.into_owned());
            }
        }

        FieldValue::Text(text.to_string())
    }

    /// Generalize a quasi-identifying numeric into its policy bucket
    fn generalize(&self, value: i64) -> String {
        let top = self.policy.age_top_code();
        if value >= top {
            return format!("{top}+");
        }
        let width = self.policy.age_bucket_years() as i64;
        let low = (value.max(0) / width) * width;
        format!("{}-{}", low, low + width - 1)
    }
}

/// Deterministic full-replacement marker for a subject
fn replacement_marker(binding: &PseudonymBinding) -> String {
    format!("[REDACTED:{}]", binding.pseudonym.as_str())
}

/// Whether a value is entirely a redaction marker
fn is_redaction_marker(text: &str) -> bool {
    text.len() >= 2 && text.starts_with('[') && text.ends_with(']')
}

/// Whether a value already has generalized-bucket shape (`30-39` or `90+`)
fn is_generalized_bucket(text: &str) -> bool {
    if let Some(stripped) = text.strip_suffix('+') {
        return !stripped.is_empty() && stripped.bytes().all(|b| b.is_ascii_digit());
    }
    match text.split_once('-') {
        Some((low, high)) => {
            !low.is_empty()
                && !high.is_empty()
                && low.bytes().all(|b| b.is_ascii_digit())
                && high.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PseudonymId;
    use chrono::NaiveDate;
    use test_case::test_case;

    fn policy() -> Arc<DeidPolicy> {
        let yaml = r#"
date_shift_days: 365
retention_days: 2190
phi_patterns:
  - name: mrn
    regex: '\d{3}-\d{2}-\d{4}'
    replacement: '[MEDICAL RECORD]'
  - name: subject_ref
    regex: 'patient/[A-Za-z0-9]+'
    replacement: '{pseudonym}'
"#;
        Arc::new(DeidPolicy::from_yaml(yaml).unwrap())
    }

    fn binding(shift: i64) -> PseudonymBinding {
        PseudonymBinding {
            pseudonym: PseudonymId::new("sub-0123456789abcdef").unwrap(),
            date_shift_days: shift,
        }
    }

    #[test]
    fn test_mrn_pattern_replacement() {
        let engine = RedactionEngine::new(policy());
        let out = engine.redact(
            &FieldValue::text("MRN 123-45-6789 admitted"),
            FieldClass::Identifying,
            false,
            &binding(365),
        );
        assert_eq!(out, FieldValue::text("MRN [MEDICAL RECORD] admitted"));
    }

    #[test]
    fn test_pseudonym_template_variable() {
        let engine = RedactionEngine::new(policy());
        let out = engine.redact(
            &FieldValue::text("see patient/abc123 for history"),
            FieldClass::Identifying,
            false,
            &binding(0),
        );
        assert_eq!(
            out,
            FieldValue::text("see sub-0123456789abcdef for history")
        );
    }

    #[test]
    fn test_full_identifier_replaced_without_match() {
        let engine = RedactionEngine::new(policy());
        let out = engine.redact(
            &FieldValue::text("John Doe"),
            FieldClass::Identifying,
            true,
            &binding(0),
        );
        assert_eq!(out, FieldValue::text("[REDACTED:sub-0123456789abcdef]"));
    }

    #[test]
    fn test_full_identifier_with_partial_match_fully_replaced() {
        let engine = RedactionEngine::new(policy());
        // The MRN rule matches a fragment; the surrounding name must not
        // survive in an always-replace field
        let value = FieldValue::text("John 123-45-6789");
        let once = engine.redact(&value, FieldClass::Identifying, true, &binding(0));
        assert_eq!(once, FieldValue::text("[REDACTED:sub-0123456789abcdef]"));

        let twice = engine.redact(&once, FieldClass::Identifying, true, &binding(0));
        assert_eq!(once, twice);
    }

    #[test]
    fn test_no_match_leaves_free_text() {
        let engine = RedactionEngine::new(policy());
        let out = engine.redact(
            &FieldValue::text("complains of mild headache"),
            FieldClass::Identifying,
            false,
            &binding(0),
        );
        assert_eq!(out, FieldValue::text("complains of mild headache"));
    }

    #[test]
    fn test_date_shift_and_idempotence() {
        let engine = RedactionEngine::new(policy());
        let original = FieldValue::date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());

        let once = engine.redact(&original, FieldClass::Clinical, false, &binding(10));
        assert_eq!(
            once,
            FieldValue::Date {
                date: NaiveDate::from_ymd_opt(2024, 1, 11).unwrap(),
                shifted: true,
            }
        );

        let twice = engine.redact(&once, FieldClass::Clinical, false, &binding(10));
        assert_eq!(once, twice);
    }

    #[test]
    fn test_clinical_passthrough() {
        let engine = RedactionEngine::new(policy());
        let value = FieldValue::Decimal(7.2);
        let out = engine.redact(&value, FieldClass::Clinical, false, &binding(10));
        assert_eq!(out, value);
    }

    #[test_case(34, "30-39" ; "mid bucket")]
    #[test_case(0, "0-9" ; "first bucket")]
    #[test_case(89, "80-89" ; "just under top code")]
    #[test_case(90, "90+" ; "top code")]
    #[test_case(104, "90+" ; "above top code")]
    fn test_age_generalization(age: i64, expected: &str) {
        let engine = RedactionEngine::new(policy());
        let out = engine.redact(
            &FieldValue::Integer(age),
            FieldClass::QuasiIdentifying,
            false,
            &binding(0),
        );
        assert_eq!(out, FieldValue::text(expected));
    }

    #[test]
    fn test_redaction_is_idempotent_for_all_classes() {
        let engine = RedactionEngine::new(policy());
        let b = binding(42);
        let inputs = vec![
            (FieldValue::text("MRN 123-45-6789"), FieldClass::Identifying, false),
            (FieldValue::text("Jane Roe"), FieldClass::Identifying, true),
            (FieldValue::text("Jane 123-45-6789"), FieldClass::Identifying, true),
            (FieldValue::Integer(77), FieldClass::QuasiIdentifying, false),
            (
                FieldValue::date(NaiveDate::from_ymd_opt(2023, 5, 5).unwrap()),
                FieldClass::QuasiIdentifying,
                false,
            ),
            (FieldValue::text("glucose normal"), FieldClass::Clinical, false),
        ];

        for (value, class, full) in inputs {
            let once = engine.redact(&value, class, full, &b);
            let twice = engine.redact(&once, class, full, &b);
            assert_eq!(once, twice, "redact(redact(x)) != redact(x) for {value:?}");
        }
    }

    #[test]
    fn test_identifying_scalar_never_passes_raw() {
        let engine = RedactionEngine::new(policy());
        let out = engine.redact(
            &FieldValue::Integer(123456789),
            FieldClass::Identifying,
            false,
            &binding(0),
        );
        assert_eq!(out, FieldValue::text("[REDACTED:sub-0123456789abcdef]"));
    }

    #[test]
    fn test_bucket_shape_recognition() {
        assert!(is_generalized_bucket("30-39"));
        assert!(is_generalized_bucket("90+"));
        assert!(!is_generalized_bucket("thirty"));
        assert!(!is_generalized_bucket("-39"));
        assert!(!is_generalized_bucket("+"));
        assert!(is_redaction_marker("[MEDICAL RECORD]"));
        assert!(!is_redaction_marker("plain text"));
    }
}
