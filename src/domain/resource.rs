//! Clinical resource tree
//!
//! The engine never operates on raw FHIR documents directly. Callers build a
//! [`ClinicalResource`] at the boundary: a tagged tree carrying the resource
//! type, an optional subject reference, and an ordered field list. The tree is
//! consumed once by the resource walker and discarded after the de-identified
//! output is produced.

use crate::domain::ids::SubjectKey;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// PHI classification of a resource field, assigned by the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldClass {
    /// Directly identifies a subject (names, MRNs, addresses)
    Identifying,
    /// Identifies in combination with other fields (age, zip prefix)
    QuasiIdentifying,
    /// Clinical content preserved unchanged (lab values, codes)
    Clinical,
}

impl FieldClass {
    /// Stable label used in audit categories and logs
    pub fn label(&self) -> &'static str {
        match self {
            FieldClass::Identifying => "identifying",
            FieldClass::QuasiIdentifying => "quasi_identifying",
            FieldClass::Clinical => "clinical",
        }
    }

    /// Whether a field of this class generates an access event
    pub fn is_protected(&self) -> bool {
        !matches!(self, FieldClass::Clinical)
    }
}

/// Leaf or branch value of a clinical resource field.
///
/// Temporal variants carry a `shifted` flag so that re-running redaction over
/// already-shifted output is a no-op rather than a double shift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Date { date: NaiveDate, shifted: bool },
    DateTime { at: DateTime<Utc>, shifted: bool },
    Integer(i64),
    Decimal(f64),
    Boolean(bool),
    Resource(ClinicalResource),
    Collection(Vec<FieldValue>),
}

impl FieldValue {
    /// Text value
    pub fn text(value: impl Into<String>) -> Self {
        FieldValue::Text(value.into())
    }

    /// Unshifted date value
    pub fn date(date: NaiveDate) -> Self {
        FieldValue::Date {
            date,
            shifted: false,
        }
    }

    /// Unshifted date-time value
    pub fn datetime(at: DateTime<Utc>) -> Self {
        FieldValue::DateTime { at, shifted: false }
    }

    /// Whether this value is a scalar leaf (not a nested resource/collection)
    pub fn is_leaf(&self) -> bool {
        !matches!(self, FieldValue::Resource(_) | FieldValue::Collection(_))
    }

    /// Text content, if this is a text value
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// A named field of a clinical resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub value: FieldValue,
}

impl Field {
    /// Creates a new field
    pub fn new(name: impl Into<String>, value: FieldValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Generic labeled tree for one clinical resource.
///
/// Bundles are modeled as a resource of type `Bundle` whose `entry` fields
/// hold nested [`FieldValue::Resource`] values, each optionally carrying its
/// own subject reference. Entries without a subject inherit the enclosing
/// resource's subject during traversal.
///
/// # Examples
///
/// ```
/// use veil::domain::{ClinicalResource, FieldValue, SubjectKey};
///
/// let observation = ClinicalResource::new("Observation")
///     .with_subject(SubjectKey::new("patient-1").unwrap())
///     .with_field("code", FieldValue::text("8867-4"))
///     .with_field("value", FieldValue::Decimal(72.0));
/// assert_eq!(observation.resource_type, "Observation");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClinicalResource {
    /// Resource type tag, e.g. `Patient`, `Observation`, `Bundle`
    pub resource_type: String,
    /// Natural key of the subject this resource belongs to, if any
    pub subject: Option<SubjectKey>,
    /// Ordered field list
    pub fields: Vec<Field>,
}

impl ClinicalResource {
    /// Creates an empty resource of the given type
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            subject: None,
            fields: Vec::new(),
        }
    }

    /// Sets the subject reference
    pub fn with_subject(mut self, subject: SubjectKey) -> Self {
        self.subject = Some(subject);
        self
    }

    /// Appends a field
    pub fn with_field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.fields.push(Field::new(name, value));
        self
    }

    /// Looks up the first field with the given name
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| &f.value)
    }

    /// Number of leaf fields, counting nested resources recursively
    pub fn leaf_count(&self) -> usize {
        fn count_value(value: &FieldValue) -> usize {
            match value {
                FieldValue::Resource(r) => r.leaf_count(),
                FieldValue::Collection(items) => items.iter().map(count_value).sum(),
                _ => 1,
            }
        }
        self.fields.iter().map(|f| count_value(&f.value)).sum()
    }
}
