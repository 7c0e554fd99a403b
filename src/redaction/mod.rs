//! Redaction of scalar PHI values
//!
//! Pattern rules, full-field replacement, age generalization, and
//! interval-preserving date shifts, all idempotent so resources can be
//! retried through the pipeline safely.

pub mod dateshift;
pub mod engine;

pub use engine::RedactionEngine;
