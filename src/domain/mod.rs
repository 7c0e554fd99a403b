//! Domain models and types.
//!
//! The domain layer provides:
//! - **Strongly-typed identifiers** ([`SubjectKey`], [`PseudonymId`],
//!   [`ActorId`], [`PolicyVersion`], [`ChainId`])
//! - **The clinical resource tree** ([`ClinicalResource`], [`Field`],
//!   [`FieldValue`], [`FieldClass`])
//! - **Error types** ([`VeilError`] and the typed failure taxonomy)
//! - **Result type alias** ([`Result`])
//!
//! # Type safety
//!
//! Identifiers use the newtype pattern so a raw subject key can never be
//! passed where a pseudonym is expected:
//!
//! ```rust
//! use veil::domain::{SubjectKey, PseudonymId};
//!
//! # fn example() -> Result<(), String> {
//! let subject = SubjectKey::new("patient/42")?;
//! let pseudonym = PseudonymId::new("sub-9c41d2aa51b0e77f")?;
//! // let wrong: PseudonymId = subject;  // Compile error!
//! # Ok(())
//! # }
//! ```

pub mod errors;
pub mod ids;
pub mod resource;
pub mod result;

// Re-export commonly used types for convenience
pub use errors::{
    AuditWriteFailure, ChainIntegrityError, PolicyLoadError, UnmappedSubjectError, VeilError,
};
pub use ids::{ActorId, ChainId, PolicyVersion, PseudonymId, SubjectKey};
pub use resource::{ClinicalResource, Field, FieldClass, FieldValue};
pub use result::Result;
