//! Engine configuration
//!
//! Runtime settings for the embedding process: the pseudonym derivation
//! secret, audit chain pinning, and retry/timeout policies for the two
//! operations allowed to block on external storage (escrow lookups and audit
//! appends). Loading configuration files from disk is the embedding process's
//! job; this module only defines the schema, validation, and `VEIL_*`
//! environment overrides.

use crate::domain::{Result, VeilError};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

/// Bounded retry policy for store-facing operations
#[derive(Debug, Clone, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff delay; doubles on each retry
    #[serde(default = "default_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Per-attempt timeout for the store call
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    100
}

fn default_timeout_ms() -> u64 {
    2_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_backoff_ms(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl RetryPolicy {
    /// Validate the policy
    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(VeilError::Configuration(
                "store timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Audit writer settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditSettings {
    /// Pin all appends to a fixed chain instead of daily sharding
    #[serde(default)]
    pub chain: Option<String>,

    /// Retry policy for audit appends
    #[serde(default)]
    pub retry: RetryPolicy,
}

/// Engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Secret key for deterministic pseudonym derivation.
    /// Required unless the policy enables escrow.
    #[serde(default = "default_secret")]
    pub pseudonym_secret: SecretString,

    /// Audit writer settings
    #[serde(default)]
    pub audit: AuditSettings,

    /// Retry policy for escrow store lookups
    #[serde(default)]
    pub escrow_retry: RetryPolicy,
}

fn default_secret() -> SecretString {
    SecretString::new(String::new())
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pseudonym_secret: default_secret(),
            audit: AuditSettings::default(),
            escrow_retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Config with the given derivation secret and defaults elsewhere
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            pseudonym_secret: SecretString::new(secret.into()),
            ..Self::default()
        }
    }

    /// Validate the configuration.
    ///
    /// `escrow_enabled` comes from the loaded policy: in escrow mode the
    /// derivation secret is unused and may be empty.
    pub fn validate(&self, escrow_enabled: bool) -> Result<()> {
        if !escrow_enabled && self.pseudonym_secret.expose_secret().is_empty() {
            return Err(VeilError::Configuration(
                "pseudonym secret is required when escrow is disabled".to_string(),
            ));
        }
        self.audit.retry.validate()?;
        self.escrow_retry.validate()?;
        Ok(())
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(val) = std::env::var("VEIL_PSEUDONYM_SECRET") {
            self.pseudonym_secret = SecretString::new(val);
        }
        if let Ok(val) = std::env::var("VEIL_AUDIT_CHAIN") {
            self.audit.chain = Some(val);
        }
        if let Ok(val) = std::env::var("VEIL_AUDIT_MAX_RETRIES") {
            self.audit.retry.max_retries = val
                .parse()
                .map_err(|_| VeilError::Configuration("Invalid VEIL_AUDIT_MAX_RETRIES".into()))?;
        }
        if let Ok(val) = std::env::var("VEIL_AUDIT_TIMEOUT_MS") {
            self.audit.retry.timeout_ms = val
                .parse()
                .map_err(|_| VeilError::Configuration("Invalid VEIL_AUDIT_TIMEOUT_MS".into()))?;
        }
        if let Ok(val) = std::env::var("VEIL_ESCROW_MAX_RETRIES") {
            self.escrow_retry.max_retries = val
                .parse()
                .map_err(|_| VeilError::Configuration("Invalid VEIL_ESCROW_MAX_RETRIES".into()))?;
        }
        if let Ok(val) = std::env::var("VEIL_ESCROW_TIMEOUT_MS") {
            self.escrow_retry.timeout_ms = val
                .parse()
                .map_err(|_| VeilError::Configuration("Invalid VEIL_ESCROW_TIMEOUT_MS".into()))?;
        }
        Ok(())
    }
}
