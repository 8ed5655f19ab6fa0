//! # Configuration Manager
//!
//! Detects the environment, constructs the matching [`AppConfig`] variant,
//! validates it and serves it from a [`ConfigCache`].
//!
//! Construction always happens on a local value and is published with a
//! single swap, so concurrent readers observe either the previous
//! configuration or the new one. A failed construction is never cached.
//! The testing environment is rebuilt on every [`ConfigManager::get_config`]
//! call so one test cannot observe another's configuration.

use crate::cache::{CachedConfig, ConfigCache};
use crate::env_accessor::EnvAccessor;
use crate::environment::{self, DetectedEnvironment, Environment};
use crate::options::ManagerOptions;
use crate::schema::AppConfig;
use crate::secret_store::SecretStore;
use crate::secrets::SecretResolver;
use crate::validator::{ValidationReport, validate};
use chrono::{DateTime, Utc};
use errors::ConfigError;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info};

const NOT_LOADED: &str = "configuration has not been loaded";

/// Operational summary for a health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigHealth {
    pub environment: Environment,
    pub loaded: bool,
    pub valid: bool,
    pub score: Option<u8>,
    pub secrets_loaded: usize,
    pub errors: Vec<String>,
    pub warnings: usize,
    pub generation: u64,
    pub cached_at: Option<DateTime<Utc>>,
}

/// Injectable owner of the one configuration cache of a process.
///
/// # M-CANONICAL-DOCS
///
/// ## Usage
/// ```rust,no_run
/// use config::ConfigManager;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let manager = ConfigManager::builder().build()?;
///     let config = manager.get_config().await?;
///     println!("running in {}", config.environment());
///     Ok(())
/// }
/// ```
pub struct ConfigManager {
    env: Arc<EnvAccessor>,
    resolver: SecretResolver,
    cache: ConfigCache,
    options: ManagerOptions,
}

impl ConfigManager {
    pub fn builder() -> ConfigManagerBuilder {
        ConfigManagerBuilder::default()
    }

    /// Manager over `env` with options read from `env`.
    pub fn new(env: Arc<EnvAccessor>) -> Result<Self, ConfigError> {
        Self::builder().env(env).build()
    }

    pub fn detect_environment(&self) -> DetectedEnvironment {
        environment::detect(
            &self.env,
            &self.options.environment_var,
            &self.options.testing_flag_var,
            self.options.default_environment,
        )
    }

    /// The cached configuration, constructing it on a miss.
    pub async fn get_config(&self) -> Result<Arc<AppConfig>, ConfigError> {
        if let Some(cached) = self.cache.get() {
            if !cached.config.is_testing() {
                debug!(generation = cached.generation, "configuration cache hit");
                return Ok(Arc::clone(&cached.config));
            }
        }
        let entry = self.rebuild().await?;
        Ok(Arc::clone(&entry.config))
    }

    /// Re-run detection and construction.
    ///
    /// Without `force` the cached configuration is kept unless the cache is
    /// empty or the detected environment changed. Readers keep being served
    /// the previous configuration until the new one is published.
    pub async fn reload_config(&self, force: bool) -> Result<Arc<AppConfig>, ConfigError> {
        if !force {
            if let Some(cached) = self.cache.get() {
                let detected = self.detect_environment().environment;
                if cached.config.environment() == detected {
                    debug!(environment = %detected, "reload skipped, environment unchanged");
                    return Ok(Arc::clone(&cached.config));
                }
            }
        }
        let entry = self.rebuild().await?;
        Ok(Arc::clone(&entry.config))
    }

    /// Validate the cached configuration without touching the cache.
    pub fn validate_integrity(&self) -> (bool, Vec<String>) {
        match self.cache.get() {
            Some(cached) => validate(&cached.config).outcome(),
            None => (false, vec![NOT_LOADED.to_string()]),
        }
    }

    /// Startup gate: load if needed, then validate.
    pub async fn validate_configuration(&self) -> (bool, Vec<String>) {
        match self.get_config().await {
            Ok(config) => validate(&config).outcome(),
            Err(e) => (false, vec![e.to_string()]),
        }
    }

    /// Report computed when the cached configuration was published.
    pub fn report(&self) -> Option<ValidationReport> {
        self.cache.get().map(|cached| cached.report.clone())
    }

    /// Environment of the cached configuration, or the detected one when
    /// nothing is cached.
    pub fn environment(&self) -> Environment {
        self.cache.get().map_or_else(
            || self.detect_environment().environment,
            |cached| cached.config.environment(),
        )
    }

    pub fn environment_name(&self) -> &'static str {
        self.environment().as_str()
    }

    pub fn is_production(&self) -> bool {
        self.environment().is_production()
    }

    pub fn is_staging(&self) -> bool {
        self.environment().is_staging()
    }

    pub fn is_development(&self) -> bool {
        self.environment().is_development()
    }

    pub fn is_testing(&self) -> bool {
        self.environment().is_testing()
    }

    pub fn invalidate(&self) {
        if self.cache.invalidate().is_some() {
            info!("configuration cache invalidated");
        }
    }

    pub fn secrets(&self) -> &SecretResolver {
        &self.resolver
    }

    pub fn env(&self) -> &Arc<EnvAccessor> {
        &self.env
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    pub fn health(&self) -> ConfigHealth {
        let cached = self.cache.get();
        let environment = self.environment();
        let secrets_loaded = self.resolver.loaded_count();

        match cached {
            Some(cached) => ConfigHealth {
                environment,
                loaded: true,
                valid: cached.report.is_valid(),
                score: Some(cached.report.score),
                secrets_loaded,
                errors: cached.report.errors.clone(),
                warnings: cached.report.warnings.len(),
                generation: cached.generation,
                cached_at: Some(cached.cached_at),
            },
            None => ConfigHealth {
                environment,
                loaded: false,
                valid: false,
                score: None,
                secrets_loaded,
                errors: vec![NOT_LOADED.to_string()],
                warnings: 0,
                generation: self.cache.generation(),
                cached_at: None,
            },
        }
    }

    async fn rebuild(&self) -> Result<Arc<CachedConfig>, ConfigError> {
        let detected = self.detect_environment();
        if detected.warning.is_some() {
            debug!(environment = %detected.environment, "rebuilding with fallback environment");
        }
        let environment = detected.environment;
        let testing_context = detected.forced_by_test_flag || environment.is_testing();

        match AppConfig::construct(environment, &self.env, &self.resolver, testing_context).await {
            Ok(config) => {
                let report = validate(&config);
                if !report.is_valid() {
                    error!(
                        environment = %environment,
                        errors = ?report.errors,
                        "configuration failed validation"
                    );
                }
                let entry = self.cache.publish(config, report);
                info!(
                    environment = %environment,
                    score = entry.report.score,
                    generation = entry.generation,
                    "configuration published"
                );
                Ok(entry)
            }
            Err(e) => {
                self.cache.invalidate();
                error!(environment = %environment, error = %e, "configuration construction failed");
                Err(e)
            }
        }
    }
}

#[derive(Default)]
pub struct ConfigManagerBuilder {
    env: Option<Arc<EnvAccessor>>,
    store: Option<Arc<dyn SecretStore>>,
    options: Option<ManagerOptions>,
}

impl ConfigManagerBuilder {
    pub fn env(mut self, env: Arc<EnvAccessor>) -> Self {
        self.env = Some(env);
        self
    }

    pub fn secret_store(mut self, store: Arc<dyn SecretStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn options(mut self, options: ManagerOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Validate options, load the env file if one is configured and wire
    /// the resolver. Options default to [`ManagerOptions::from_env`].
    ///
    /// `audit_capacity` is applied to the accessor, including an injected one.
    pub fn build(self) -> Result<ConfigManager, ConfigError> {
        let env = self
            .env
            .unwrap_or_else(|| Arc::new(EnvAccessor::from_process()));
        let options = match self.options {
            Some(options) => options,
            None => ManagerOptions::from_env(&env)?,
        };
        options.check()?;
        env.set_audit_capacity(options.audit_capacity);

        if let Some(path) = &options.env_file {
            env.load_env_file(path)?;
        }

        let mut resolver =
            SecretResolver::new(Arc::clone(&env)).with_timeout(options.secret_timeout());
        if let Some(store) = self.store {
            debug!(store = store.name(), "remote secret store configured");
            resolver = resolver.with_store(store);
        }

        Ok(ConfigManager {
            env,
            resolver,
            cache: ConfigCache::new(),
            options,
        })
    }
}
