//! Resource walker
//!
//! Traverses a clinical resource tree, classifies every leaf field through
//! the policy, routes it through the redaction engine, and collects one
//! access event per protected field touched. One pseudonym binding is
//! resolved per unique subject per traversal and reused for every entry
//! referencing that subject.
//!
//! The walker is stateless per call: policy, generator, and resource are all
//! supplied explicitly, so independent resources can be processed in
//! parallel.

use crate::domain::{
    ClinicalResource, Field, FieldClass, FieldValue, PseudonymId, Result, SubjectKey, VeilError,
};
use crate::policy::DeidPolicy;
use crate::pseudonym::{PseudonymBinding, PseudonymGenerator};
use crate::redaction::RedactionEngine;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// One protected-field access observed during a traversal.
///
/// Carries the pseudonym, never the raw subject key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessEvent {
    pub subject_pseudonym: PseudonymId,
    pub resource_type: String,
    pub field_path: String,
    pub class: FieldClass,
}

/// Walks resource trees and produces de-identified output plus access events
pub struct ResourceWalker {
    policy: Arc<DeidPolicy>,
    redaction: RedactionEngine,
}

impl ResourceWalker {
    /// Creates a walker bound to a loaded policy
    pub fn new(policy: Arc<DeidPolicy>) -> Self {
        let redaction = RedactionEngine::new(Arc::clone(&policy));
        Self { policy, redaction }
    }

    /// De-identify one resource tree.
    ///
    /// Nested entries without their own subject inherit the enclosing
    /// resource's. A resource with protected fields but no subject in scope
    /// fails closed with a validation error.
    pub async fn process(
        &self,
        resource: &ClinicalResource,
        generator: &PseudonymGenerator,
    ) -> Result<(ClinicalResource, Vec<AccessEvent>)> {
        // First pass: find every subject referenced in the tree, then resolve
        // each binding exactly once. Keeps the traversal itself synchronous.
        let mut seen = HashSet::new();
        let mut subjects = Vec::new();
        collect_subjects(resource, &mut seen, &mut subjects);

        let mut bindings = HashMap::new();
        for subject in subjects {
            let binding = generator.resolve(&subject).await?;
            bindings.insert(subject, binding);
        }

        let mut events = Vec::new();
        let deidentified = self.walk(resource, None, &bindings, &mut events, "")?;

        debug!(
            resource_type = resource.resource_type.as_str(),
            subjects = bindings.len(),
            access_events = events.len(),
            "De-identified resource"
        );
        Ok((deidentified, events))
    }

    fn walk(
        &self,
        resource: &ClinicalResource,
        inherited: Option<&SubjectKey>,
        bindings: &HashMap<SubjectKey, PseudonymBinding>,
        events: &mut Vec<AccessEvent>,
        prefix: &str,
    ) -> Result<ClinicalResource> {
        let subject = resource.subject.as_ref().or(inherited);

        // The raw subject key never appears in output; the pseudonym keeps
        // the record linkable for longitudinal analysis.
        let mut out = ClinicalResource::new(resource.resource_type.clone());
        if let Some(subject) = resource.subject.as_ref() {
            let binding = self.binding_for(subject, bindings, &resource.resource_type, prefix)?;
            out.fields.push(Field::new(
                "subject_pseudonym",
                FieldValue::Text(binding.pseudonym.as_str().to_string()),
            ));
        }

        for field in &resource.fields {
            let path = if prefix.is_empty() {
                field.name.clone()
            } else {
                format!("{prefix}.{}", field.name)
            };
            let value = self.walk_value(
                &field.value,
                &resource.resource_type,
                &field.name,
                subject,
                bindings,
                events,
                &path,
            )?;
            out.fields.push(Field::new(field.name.clone(), value));
        }
        Ok(out)
    }

    #[allow(clippy::too_many_arguments)]
    fn walk_value(
        &self,
        value: &FieldValue,
        resource_type: &str,
        field_name: &str,
        subject: Option<&SubjectKey>,
        bindings: &HashMap<SubjectKey, PseudonymBinding>,
        events: &mut Vec<AccessEvent>,
        path: &str,
    ) -> Result<FieldValue> {
        match value {
            FieldValue::Resource(nested) => Ok(FieldValue::Resource(self.walk(
                nested, subject, bindings, events, path,
            )?)),
            FieldValue::Collection(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (idx, item) in items.iter().enumerate() {
                    let item_path = format!("{path}[{idx}]");
                    out.push(self.walk_value(
                        item,
                        resource_type,
                        field_name,
                        subject,
                        bindings,
                        events,
                        &item_path,
                    )?);
                }
                Ok(FieldValue::Collection(out))
            }
            leaf => {
                let class = self.policy.classify(resource_type, field_name);
                let temporal = matches!(
                    leaf,
                    FieldValue::Date { .. } | FieldValue::DateTime { .. }
                );
                if !class.is_protected() && !temporal {
                    return Ok(leaf.clone());
                }

                let subject = subject.ok_or_else(|| {
                    VeilError::Validation(format!(
                        "resource '{resource_type}' has protected field '{path}' but no subject in scope"
                    ))
                })?;
                let binding = self.binding_for(subject, bindings, resource_type, path)?;

                // Fields the policy never classified fell back to identifying;
                // they are replaced outright, never pattern-scanned into
                // possibly surviving free text.
                let full = self.policy.is_full_identifier(field_name)
                    || (class == FieldClass::Identifying
                        && !self.policy.is_classified(resource_type, field_name));
                let redacted = self.redaction.redact(leaf, class, full, binding);

                if class.is_protected() {
                    events.push(AccessEvent {
                        subject_pseudonym: binding.pseudonym.clone(),
                        resource_type: resource_type.to_string(),
                        field_path: path.to_string(),
                        class,
                    });
                }
                Ok(redacted)
            }
        }
    }

    fn binding_for<'a>(
        &self,
        subject: &SubjectKey,
        bindings: &'a HashMap<SubjectKey, PseudonymBinding>,
        resource_type: &str,
        path: &str,
    ) -> Result<&'a PseudonymBinding> {
        bindings.get(subject).ok_or_else(|| {
            VeilError::Validation(format!(
                "no binding resolved for subject of '{resource_type}' at '{path}'"
            ))
        })
    }
}

fn collect_subjects(
    resource: &ClinicalResource,
    seen: &mut HashSet<SubjectKey>,
    out: &mut Vec<SubjectKey>,
) {
    if let Some(subject) = &resource.subject {
        if seen.insert(subject.clone()) {
            out.push(subject.clone());
        }
    }
    for field in &resource.fields {
        collect_from_value(&field.value, seen, out);
    }
}

fn collect_from_value(value: &FieldValue, seen: &mut HashSet<SubjectKey>, out: &mut Vec<SubjectKey>) {
    match value {
        FieldValue::Resource(nested) => collect_subjects(nested, seen, out),
        FieldValue::Collection(items) => {
            for item in items {
                collect_from_value(item, seen, out);
            }
        }
        _ => {}
    }
}
