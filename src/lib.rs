// Veil - Clinical De-identification and Audit Engine
// Copyright (c) 2026 Veil Contributors
// Licensed under the MIT License

//! # Veil - Clinical De-identification and Audit Engine
//!
//! Veil de-identifies clinical resources for research use and records every
//! access to protected health information in a tamper-evident audit trail.
//!
//! ## Overview
//!
//! This library provides the core functionality for:
//! - **Classifying** fields as identifying, quasi-identifying, or clinical
//!   through versioned, validated policies
//! - **Pseudonymizing** subjects with stable, policy-scoped surrogate
//!   identifiers and per-subject date shifting
//! - **Redacting** free text, generalizing quasi-identifiers, and shifting
//!   temporal fields while preserving per-subject intervals
//! - **Auditing** every protected-field access in hash-chained, append-only
//!   ledgers with query and verification services
//!
//! ## Architecture
//!
//! Veil follows a layered architecture:
//!
//! - [`engine`] - The de-identification pipeline facade
//! - [`policy`] - Policy schema, validation, and versioning
//! - [`pseudonym`] - Pseudonym derivation and escrow
//! - [`redaction`] - Field-level redaction, generalization, date shifting
//! - [`walker`] - Resource tree traversal and access-event collection
//! - [`audit`] - Hash-chained audit trail: writer, stores, query service
//! - [`domain`] - Core domain types and errors
//! - [`config`] - Engine configuration
//! - [`logging`] - Structured logging
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use veil::audit::InMemoryAuditStore;
//! use veil::config::EngineConfig;
//! use veil::domain::{ActorId, ClinicalResource, FieldValue, SubjectKey};
//! use veil::engine::DeidEngine;
//! use veil::policy::DeidPolicy;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let policy = DeidPolicy::from_yaml(&std::fs::read_to_string("policy.yaml")?)?;
//!     let config = EngineConfig::with_secret(std::env::var("VEIL_PSEUDONYM_SECRET")?);
//!     let engine = DeidEngine::new(policy, config, Arc::new(InMemoryAuditStore::new()), None)?;
//!
//!     let patient = ClinicalResource::new("Patient")
//!         .with_subject(SubjectKey::new("patient/8f2c01")?)
//!         .with_field("name", FieldValue::text("John Doe"));
//!
//!     let actor = ActorId::new("researcher@example.org")?;
//!     let outcome = engine.deidentify(&patient, &actor, "research export").await?;
//!     println!("Appended {} audit entries", outcome.events_appended);
//!     Ok(())
//! }
//! ```
//!
//! ## Fail-closed guarantees
//!
//! - A policy that fails validation never loads; there is no partial policy.
//! - Fields the policy does not classify are treated as identifying and
//!   replaced outright.
//! - A resource with protected fields but no subject in scope is rejected.
//! - De-identified output is withheld unless its audit entries were appended.
//!
//! ## Error Handling
//!
//! Veil uses the [`domain::VeilError`] type for all errors:
//!
//! ```rust,no_run
//! use veil::domain::VeilError;
//! use veil::policy::DeidPolicy;
//!
//! fn example() -> Result<(), VeilError> {
//!     let policy = DeidPolicy::from_yaml("date_shift_days: 0")?;
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod config;
pub mod domain;
pub mod engine;
pub mod logging;
pub mod policy;
pub mod pseudonym;
pub mod redaction;
pub mod walker;

pub use engine::{BatchFailure, DeidEngine, DeidOutcome};
pub use policy::DeidPolicy;
