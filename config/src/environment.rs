//! # Environment Detection
//!
//! Decides which deployment context the process runs in.
//!
//! # Detection Order
//! 1. Automated-test flag (`TESTING=1`) forces `testing`
//! 2. `ENVIRONMENT` variable, trimmed and lowercased, with aliases
//! 3. Default environment (never a strict one)

use crate::env_accessor::EnvAccessor;
use errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Deployment context the configuration is built for.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Testing,
    Staging,
    Production,
}

impl Environment {
    pub const ALL: [Environment; 4] = [
        Environment::Development,
        Environment::Testing,
        Environment::Staging,
        Environment::Production,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Testing => "testing",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }

    /// Staging and production refuse weak or missing values outright.
    pub fn is_strict(&self) -> bool {
        matches!(self, Environment::Staging | Environment::Production)
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn is_staging(&self) -> bool {
        matches!(self, Environment::Staging)
    }

    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }

    pub fn is_testing(&self) -> bool {
        matches!(self, Environment::Testing)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" | "local" => Ok(Environment::Development),
            "testing" | "test" | "ci" => Ok(Environment::Testing),
            "staging" | "stage" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            _ => Err(ConfigError::EnvironmentDetectionAmbiguous {
                value: s.to_string(),
                fallback: Environment::Development.to_string(),
            }),
        }
    }
}

/// Outcome of environment detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedEnvironment {
    pub environment: Environment,
    /// Raw value of the environment variable, if it was set
    pub raw: Option<String>,
    /// Whether the automated-test flag forced the testing variant
    pub forced_by_test_flag: bool,
    pub warning: Option<ConfigError>,
}

/// Truthy values accepted for boolean flags.
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Detect the active environment from the accessor.
///
/// An unrecognized name never maps to a strict environment: it falls back to
/// `default` (itself guaranteed non-strict by option validation) with a
/// warning attached.
pub fn detect(
    env: &EnvAccessor,
    environment_key: &str,
    testing_flag_key: &str,
    default: Environment,
) -> DetectedEnvironment {
    let raw = env.get(environment_key);
    let testing_flag = env.get(testing_flag_key).is_some_and(|v| parse_flag(&v));

    if testing_flag {
        return DetectedEnvironment {
            environment: Environment::Testing,
            raw,
            forced_by_test_flag: true,
            warning: None,
        };
    }

    let Some(value) = raw.as_deref().filter(|v| !v.trim().is_empty()) else {
        return DetectedEnvironment {
            environment: default,
            raw,
            forced_by_test_flag: false,
            warning: None,
        };
    };

    match value.parse::<Environment>() {
        Ok(environment) => DetectedEnvironment {
            environment,
            raw,
            forced_by_test_flag: false,
            warning: None,
        },
        Err(_) => {
            let warning = ConfigError::EnvironmentDetectionAmbiguous {
                value: value.to_string(),
                fallback: default.to_string(),
            };
            warn!(error = %warning, "environment detection ambiguous");
            DetectedEnvironment {
                environment: default,
                raw,
                forced_by_test_flag: false,
                warning: Some(warning),
            }
        }
    }
}
