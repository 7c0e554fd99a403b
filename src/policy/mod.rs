//! De-identification policy: document schema, validation, and compiled rule set
//!
//! A policy describes PHI pattern rules, the date-shift window, per-resource
//! field classifications, and audit retention. Loading validates everything up
//! front (fail closed) and produces an immutable [`DeidPolicy`] with a
//! content-derived [`crate::domain::PolicyVersion`].

pub mod loader;
pub mod schema;

pub use loader::{CompiledRule, DeidPolicy};
pub use schema::{PatternRuleDocument, PolicyDocument};
