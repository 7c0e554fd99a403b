//! Domain identifier types with validation
//!
//! Newtype wrappers for the identifiers that flow through the engine. Each
//! type validates its input and prevents mixing semantically different
//! identifiers at compile time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Natural key identifying a subject (patient) in the source system.
///
/// This is PHI. It must never appear in audit entries, logs, or
/// de-identified output; only the derived [`PseudonymId`] may. The inner
/// string is zeroed when the key is dropped.
///
/// # Examples
///
/// ```
/// use veil::domain::SubjectKey;
/// use std::str::FromStr;
///
/// let key = SubjectKey::from_str("patient/8f2c01").unwrap();
/// assert_eq!(key.as_str(), "patient/8f2c01");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct SubjectKey(String);

impl SubjectKey {
    /// Creates a new SubjectKey from a string
    pub fn new(key: impl Into<String>) -> Result<Self, String> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err("Subject key cannot be empty".to_string());
        }
        Ok(Self(key))
    }

    /// Returns the subject key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes self and returns the inner String
    pub fn into_inner(mut self) -> String {
        std::mem::take(&mut self.0)
    }
}

impl fmt::Display for SubjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SubjectKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for SubjectKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// De-identified surrogate for a subject.
///
/// Safe to store in audit entries and research output. Stable for a given
/// (subject, policy version) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PseudonymId(String);

impl PseudonymId {
    /// Creates a new PseudonymId from a string
    pub fn new(id: impl Into<String>) -> Result<Self, String> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err("Pseudonym ID cannot be empty".to_string());
        }
        Ok(Self(id))
    }

    /// Returns the pseudonym as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes self and returns the inner String
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for PseudonymId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PseudonymId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for PseudonymId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Already-authenticated actor identity supplied by the serving layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorId(String);

impl ActorId {
    /// Creates a new ActorId from a string
    pub fn new(id: impl Into<String>) -> Result<Self, String> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err("Actor ID cannot be empty".to_string());
        }
        Ok(Self(id))
    }

    /// Returns the actor identity as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ActorId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for ActorId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Version identifier of a loaded de-identification policy.
///
/// Computed as the SHA-256 of the policy document's canonical serialization,
/// so two loads of the same document always agree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyVersion(String);

impl PolicyVersion {
    /// Creates a new PolicyVersion from a hash string
    pub fn new(version: impl Into<String>) -> Result<Self, String> {
        let version = version.into();
        if version.trim().is_empty() {
            return Err("Policy version cannot be empty".to_string());
        }
        Ok(Self(version))
    }

    /// Returns the version as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines. Versions are normally hex digests, but
    /// arbitrary strings are accepted, so the cut must respect char
    /// boundaries.
    pub fn short(&self) -> &str {
        let mut end = self.0.len().min(12);
        while !self.0.is_char_boundary(end) {
            end -= 1;
        }
        &self.0[..end]
    }
}

impl fmt::Display for PolicyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for PolicyVersion {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identifier of a logical audit ledger (chain).
///
/// Chains are typically sharded per day: `audit-2026-08-27`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainId(String);

impl ChainId {
    /// Creates a new ChainId from a string
    pub fn new(id: impl Into<String>) -> Result<Self, String> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err("Chain ID cannot be empty".to_string());
        }
        Ok(Self(id))
    }

    /// Daily chain identifier for the given date
    pub fn for_date(date: chrono::NaiveDate) -> Self {
        Self(format!("audit-{}", date.format("%Y-%m-%d")))
    }

    /// Returns the chain identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ChainId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for ChainId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
