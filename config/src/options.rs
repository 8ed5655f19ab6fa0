//! # Manager Options
//!
//! Settings of the configuration core itself, validated with the
//! `validator` crate before a manager is built.

use crate::env_accessor::EnvAccessor;
use crate::env_keys::{
    AUDIT_CAPACITY_KEY, ENV_FILE_KEY, ENVIRONMENT_KEY, SECRET_TIMEOUT_MS_KEY, TESTING_FLAG_KEY,
};
use crate::environment::Environment;
use errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use validator::{Validate, ValidationError};

/// Options for [`ConfigManager`](crate::ConfigManager).
///
/// # M-CANONICAL-DOCS
///
/// ## Fields
/// - `secret_timeout_ms`: bound on each remote secret lookup (default: 3000)
/// - `audit_capacity`: audit-trail entries kept by the accessor (default: 256)
/// - `environment_var`: variable naming the environment (default: "ENVIRONMENT")
/// - `testing_flag_var`: boolean automated-test signal (default: "TESTING")
/// - `default_environment`: used when the variable is unset (default: development)
/// - `env_file`: optional `KEY=VALUE` file loaded below process variables
///
/// ## Validation
/// - `secret_timeout_ms`: 100-30000
/// - `audit_capacity`: 16-10000
/// - `default_environment`: must not be staging or production
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct ManagerOptions {
    #[serde(default = "default_secret_timeout_ms")]
    #[validate(range(min = 100, max = 30000))]
    pub secret_timeout_ms: u64,

    #[serde(default = "default_audit_capacity")]
    #[validate(range(min = 16, max = 10000))]
    pub audit_capacity: usize,

    #[serde(default = "default_environment_var")]
    #[validate(length(min = 1))]
    pub environment_var: String,

    #[serde(default = "default_testing_flag_var")]
    #[validate(length(min = 1))]
    pub testing_flag_var: String,

    #[serde(default)]
    #[validate(custom(function = "validate_default_environment"))]
    pub default_environment: Environment,

    #[serde(default)]
    pub env_file: Option<PathBuf>,
}

fn default_secret_timeout_ms() -> u64 {
    3000
}

fn default_audit_capacity() -> usize {
    256
}

fn default_environment_var() -> String {
    ENVIRONMENT_KEY.to_string()
}

fn default_testing_flag_var() -> String {
    TESTING_FLAG_KEY.to_string()
}

fn validate_default_environment(value: &Environment) -> Result<(), ValidationError> {
    if value.is_strict() {
        return Err(ValidationError::new("strict_default_environment"));
    }
    Ok(())
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            secret_timeout_ms: default_secret_timeout_ms(),
            audit_capacity: default_audit_capacity(),
            environment_var: default_environment_var(),
            testing_flag_var: default_testing_flag_var(),
            default_environment: Environment::Development,
            env_file: None,
        }
    }
}

impl ManagerOptions {
    /// Defaults overridden by `CONFIG_SECRET_TIMEOUT_MS`,
    /// `CONFIG_AUDIT_CAPACITY` and `CONFIG_ENV_FILE`.
    pub fn from_env(env: &EnvAccessor) -> Result<Self, ConfigError> {
        let mut options = Self::default();

        if let Some(raw) = env.get(SECRET_TIMEOUT_MS_KEY) {
            options.secret_timeout_ms = parse_number(SECRET_TIMEOUT_MS_KEY, &raw)?;
        }
        if let Some(raw) = env.get(AUDIT_CAPACITY_KEY) {
            options.audit_capacity = parse_number(AUDIT_CAPACITY_KEY, &raw)?;
        }
        if let Some(path) = env.get(ENV_FILE_KEY).filter(|p| !p.trim().is_empty()) {
            options.env_file = Some(PathBuf::from(path.trim()));
        }

        options.check()?;
        Ok(options)
    }

    pub fn check(&self) -> Result<(), ConfigError> {
        self.validate().map_err(|e| ConfigError::InvalidOptions {
            reason: e.to_string(),
        })
    }

    pub fn secret_timeout(&self) -> Duration {
        Duration::from_millis(self.secret_timeout_ms)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidOptions {
        reason: format!("{key}='{raw}' is not a number"),
    })
}
