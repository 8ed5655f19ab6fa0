//! # Configuration Errors
//!
//! Error taxonomy for the unified configuration core.
//!
//! Follows the workspace conventions:
//! - Uses `thiserror` for structured error definitions
//! - Named fields in every message, never positional
//! - Serializable so health endpoints can report them verbatim

use serde::Serialize;
use thiserror::Error;

/// Errors raised while detecting, constructing or validating configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConfigError {
    /// A field mandatory in the active environment is absent after construction.
    #[error("Missing required field {field} for {environment} environment")]
    MissingRequiredField { field: String, environment: String },

    /// A secret-backed field fails the minimum length or entropy rules.
    #[error("Weak secret in {field}: {reason}")]
    WeakSecret { field: String, reason: String },

    /// Neither host nor socket path is usable, or a URL has the wrong scheme.
    #[error("Malformed connection descriptor for {field}: {reason}")]
    MalformedConnectionDescriptor { field: String, reason: String },

    /// The remote secret store could not answer; resolution falls through.
    #[error("Secret source {source_name} unavailable: {reason}")]
    SecretSourceUnavailable { source_name: String, reason: String },

    /// The environment name matched no known variant.
    #[error("Unrecognized environment {value:?}, falling back to {fallback}")]
    EnvironmentDetectionAmbiguous { value: String, fallback: String },

    #[error("Failed to load env file {path}: {reason}")]
    EnvFile { path: String, reason: String },

    #[error("Invalid configuration manager options: {reason}")]
    InvalidOptions { reason: String },
}

impl ConfigError {
    /// Whether this error must abort configuration construction.
    ///
    /// Secret-store outages and environment ambiguity are recovered locally
    /// (fallback source, fallback environment) and never block startup.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ConfigError::SecretSourceUnavailable { .. }
                | ConfigError::EnvironmentDetectionAmbiguous { .. }
        )
    }

    /// The configuration field the error names, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            ConfigError::MissingRequiredField { field, .. }
            | ConfigError::WeakSecret { field, .. }
            | ConfigError::MalformedConnectionDescriptor { field, .. } => Some(field),
            _ => None,
        }
    }
}

/// Remote secret store failures.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SecretError {
    #[error("Secret not found: {name}")]
    NotFound { name: String },

    #[error("Authentication with {store} failed: {reason}")]
    AuthFailed { store: String, reason: String },

    #[error("Connection to {store} failed: {reason}")]
    ConnectionFailed { store: String, reason: String },

    #[error("Lookup of {name} timed out after {timeout_ms}ms")]
    Timeout { name: String, timeout_ms: u64 },

    #[error("Malformed payload for {name}: {reason}")]
    FormatError { name: String, reason: String },
}
