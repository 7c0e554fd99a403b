//! Domain error types
//!
//! Error hierarchy for the engine. All errors are domain-specific and don't
//! expose third-party types. The umbrella [`VeilError`] distinguishes
//! retry-later failures (transient store issues) from do-not-retry failures
//! (policy and configuration errors) via [`VeilError::is_retryable`].

use thiserror::Error;

/// Main engine error type
#[derive(Debug, Error)]
pub enum VeilError {
    /// Policy failed validation at load time. Fatal at startup, never retried.
    #[error("Policy load error: {0}")]
    PolicyLoad(#[from] PolicyLoadError),

    /// Escrow-backed pseudonym resolution exhausted its retries
    #[error("Unmapped subject: {0}")]
    UnmappedSubject(#[from] UnmappedSubjectError),

    /// Audit append exhausted its retries; output was withheld
    #[error("Audit write failure: {0}")]
    AuditWrite(#[from] AuditWriteFailure),

    /// Chain verification found a broken link. Never auto-corrected.
    #[error("Chain integrity error: {0}")]
    ChainIntegrity(#[from] ChainIntegrityError),

    /// Malformed resource or traversal-level validation failure
    #[error("Validation error: {0}")]
    Validation(String),

    /// Engine configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Storage backend I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl VeilError {
    /// Whether the caller may retry the failed operation later.
    ///
    /// Transient store failures are retryable; policy, configuration, and
    /// integrity failures are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VeilError::UnmappedSubject(_) | VeilError::AuditWrite(_) | VeilError::Io(_)
        )
    }
}

/// Policy validation failures. The loader fails closed: any invalid rule or
/// parameter aborts the entire load and no partially valid policy is returned.
#[derive(Debug, Error)]
pub enum PolicyLoadError {
    /// Policy document could not be parsed
    #[error("Failed to parse policy document: {0}")]
    Parse(String),

    /// A PHI pattern rule failed to compile
    #[error("Pattern rule '{rule}' failed to compile: {message}")]
    PatternCompile { rule: String, message: String },

    /// Two pattern rules share a name
    #[error("Duplicate pattern rule name: {0}")]
    DuplicateRule(String),

    /// Date-shift window must be a positive number of days
    #[error("Invalid date shift window: {0} days (must be positive)")]
    InvalidDateShiftWindow(i64),

    /// Retention period must be a positive number of days
    #[error("Invalid retention period: {0} days (must be positive)")]
    InvalidRetention(i64),

    /// A field classification references an empty resource type or field name
    #[error("Empty field name in classifications for resource type '{resource_type}'")]
    EmptyFieldName { resource_type: String },

    /// Age bucketing parameters are unusable
    #[error("Invalid age bucket configuration: {0}")]
    InvalidAgeBuckets(String),
}

/// Escrow-backed pseudonym resolution failed after bounded retries.
///
/// The subject's natural key is deliberately absent: it is PHI and must not
/// surface in error messages or logs.
#[derive(Debug, Error)]
#[error("escrow store unreachable after {attempts} attempts: {message}")]
pub struct UnmappedSubjectError {
    pub attempts: u32,
    pub message: String,
}

/// Audit append failed after bounded retries. The triggering de-identification
/// call must abort: PHI is never released without a corresponding audit entry.
#[derive(Debug, Error)]
#[error("append to chain '{chain}' failed after {attempts} attempts: {message}")]
pub struct AuditWriteFailure {
    pub chain: String,
    pub attempts: u32,
    pub message: String,
}

/// Chain verification found the first broken link at `position`
#[derive(Debug, Error)]
#[error("chain '{chain}' broken at position {position}")]
pub struct ChainIntegrityError {
    pub chain: String,
    pub position: u64,
}

impl From<std::io::Error> for VeilError {
    fn from(err: std::io::Error) -> Self {
        VeilError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for VeilError {
    fn from(err: serde_json::Error) -> Self {
        VeilError::Serialization(err.to_string())
    }
}
