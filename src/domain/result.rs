//! Result type alias for the engine

use crate::domain::errors::VeilError;

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, VeilError>;
