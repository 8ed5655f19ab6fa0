//! # Unified Configuration Management
//!
//! Resolves, validates and serves the single runtime configuration object
//! of a multi-environment backend service.
//!
//! This crate provides:
//! - An override-capable environment accessor with provenance, audit trail
//!   and test isolation
//! - Secret resolution (explicit value, remote store, environment variable)
//! - The only connection-string builder in the workspace
//! - Per-environment configuration variants with fail-fast construction
//! - A scored validator
//! - A concurrency-safe manager with forced reload and env-file hot reload
//!
//! # Best Practices
//!
//! - Uses `validator` crate for the manager's own options
//! - Secrets are zeroized on drop and never printed
//! - Staging and production refuse to start misconfigured

pub mod cache;
pub mod connection;
pub mod env_accessor;
pub mod env_keys;
pub mod environment;
pub mod hot_reload;
pub mod manager;
pub mod options;
pub mod schema;
pub mod secret_store;
pub mod secrets;
pub mod validator;

pub use cache::{CachedConfig, ConfigCache};
pub use connection::{
    BackendKind, BuiltUrl, ConnectionDescriptor, ConnectionUrl, DriverMode, build_url,
};
pub use env_accessor::{
    AuditRecord, EnvAccessor, EnvEntry, EnvSource, MapEnv, Origin, ProcessEnv, Provenance,
};
pub use environment::{DetectedEnvironment, Environment};
pub use errors::{ConfigError, SecretError};
pub use hot_reload::watch_env_file;
pub use manager::{ConfigHealth, ConfigManager, ConfigManagerBuilder};
pub use options::ManagerOptions;
pub use schema::{
    AppConfig, BackendSettings, BaseConfig, DevelopmentConfig, ProductionConfig, StagingConfig,
    TestingConfig,
};
pub use secret_store::{HttpSecretStore, InMemorySecretStore, SecretStore};
pub use secrets::{ResolvedSecret, SecretResolver, SecretSource, SecretValue};
pub use crate::validator::{HardeningRule, RuleCategory, ValidationReport, validate};
