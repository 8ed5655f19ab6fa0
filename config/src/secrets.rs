//! # Secret Resolution
//!
//! Resolves logical secret names (e.g. `jwt-secret-key`) to values.
//!
//! # Resolution Order (first hit wins)
//! 1. Explicit value supplied at call time
//! 2. Remote secret store, addressed by the environment's project id and
//!    version `latest`, bounded by a short timeout
//! 3. Environment variable mapped from the logical name
//! 4. Absent
//!
//! Resolved values are cached per `(environment, logical name)` for the
//! lifetime of the resolver, so one environment can never observe a value
//! resolved for another. Store failures are logged and fall through to
//! the next source; they never abort resolution of other secrets.

use crate::env_accessor::EnvAccessor;
use crate::env_keys::{SECRET_ENV_MAPPINGS, SECRET_PROJECT_ID_PREFIX};
use crate::environment::Environment;
use crate::secret_store::SecretStore;
use dashmap::DashMap;
use errors::{ConfigError, SecretError};
use serde::{Serialize, Serializer};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const DEFAULT_SECRET_TIMEOUT: Duration = Duration::from_secs(3);
pub const LATEST_VERSION: &str = "latest";

/// A secret string that is zeroized on drop and never printed.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Length in characters.
    pub fn len(&self) -> usize {
        self.0.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretValue(***)")
    }
}

impl Serialize for SecretValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("***")
    }
}

impl From<&str> for SecretValue {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Where a resolved secret came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretSource {
    Explicit,
    RemoteStore,
    Environment,
    Absent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSecret {
    pub name: String,
    pub value: Option<SecretValue>,
    pub source: SecretSource,
}

impl ResolvedSecret {
    fn present(name: &str, value: impl Into<String>, source: SecretSource) -> Self {
        Self {
            name: name.to_string(),
            value: Some(SecretValue::new(value)),
            source,
        }
    }

    fn absent(name: &str) -> Self {
        Self {
            name: name.to_string(),
            value: None,
            source: SecretSource::Absent,
        }
    }

    pub fn is_present(&self) -> bool {
        self.value.is_some()
    }

    pub fn expose(&self) -> Option<&str> {
        self.value.as_ref().map(SecretValue::expose)
    }
}

pub struct SecretResolver {
    env: Arc<EnvAccessor>,
    store: Option<Arc<dyn SecretStore>>,
    timeout: Duration,
    mappings: HashMap<String, String>,
    cache: DashMap<(Environment, String), ResolvedSecret>,
    project_ids: DashMap<Environment, Option<String>>,
    /// Generated stand-ins, kept across reloads and cache clears
    placeholders: DashMap<(Environment, String), SecretValue>,
}

impl SecretResolver {
    pub fn new(env: Arc<EnvAccessor>) -> Self {
        Self {
            env,
            store: None,
            timeout: DEFAULT_SECRET_TIMEOUT,
            mappings: SECRET_ENV_MAPPINGS
                .iter()
                .map(|(name, var)| ((*name).to_string(), (*var).to_string()))
                .collect(),
            cache: DashMap::new(),
            project_ids: DashMap::new(),
            placeholders: DashMap::new(),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn SecretStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Upper bound for a single remote lookup.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_mapping(mut self, name: &str, env_var: &str) -> Self {
        self.mappings.insert(name.to_string(), env_var.to_string());
        self
    }

    /// Fallback variable for a logical name; unmapped names become
    /// upper snake case (`my-api-key` -> `MY_API_KEY`).
    pub fn env_var_for(&self, name: &str) -> String {
        self.mappings
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.replace(['-', '.'], "_").to_uppercase())
    }

    /// Numeric secret-store project id for `environment`, resolved once.
    pub fn project_id(&self, environment: Environment) -> Option<String> {
        if let Some(cached) = self.project_ids.get(&environment) {
            return cached.value().clone();
        }

        let key = format!(
            "{SECRET_PROJECT_ID_PREFIX}{}",
            environment.as_str().to_uppercase()
        );
        let project_id = match self.env.get(&key) {
            Some(raw) if raw.trim().parse::<u64>().is_ok() => Some(raw.trim().to_string()),
            Some(raw) => {
                warn!(key = %key, value = %raw, "ignoring non-numeric secret project id");
                None
            }
            None => None,
        };

        self.project_ids.insert(environment, project_id.clone());
        project_id
    }

    pub async fn resolve(&self, environment: Environment, name: &str) -> ResolvedSecret {
        self.resolve_with(environment, name, None).await
    }

    /// Resolve `name`, preferring `explicit` when it is non-empty.
    ///
    /// Explicit values and absent results are not cached.
    pub async fn resolve_with(
        &self,
        environment: Environment,
        name: &str,
        explicit: Option<&str>,
    ) -> ResolvedSecret {
        if let Some(value) = explicit.filter(|v| !v.is_empty()) {
            return ResolvedSecret::present(name, value, SecretSource::Explicit);
        }

        let key = (environment, name.to_string());
        let cached = self.cache.get(&key).map(|entry| entry.value().clone());
        if let Some(cached) = cached {
            debug!(secret = name, environment = %environment, "secret cache hit");
            return cached;
        }

        let resolved = if let Some(value) = self.from_remote(environment, name).await {
            ResolvedSecret::present(name, value, SecretSource::RemoteStore)
        } else if let Some(value) = self.from_env(name) {
            ResolvedSecret::present(name, value, SecretSource::Environment)
        } else {
            debug!(secret = name, environment = %environment, "secret absent from every source");
            return ResolvedSecret::absent(name);
        };

        debug!(
            secret = name,
            environment = %environment,
            source = ?resolved.source,
            "secret resolved"
        );
        self.cache.insert(key, resolved.clone());
        resolved
    }

    /// Number of distinct logical names currently resolved to a value.
    pub fn loaded_count(&self) -> usize {
        self.loaded_names().len()
    }

    pub fn loaded_names(&self) -> BTreeSet<String> {
        self.cache
            .iter()
            .filter(|entry| entry.value().is_present())
            .map(|entry| entry.key().1.clone())
            .collect()
    }

    /// Stand-in for an absent secret, generated once per environment and
    /// name for the lifetime of the resolver.
    pub fn placeholder(
        &self,
        environment: Environment,
        name: &str,
        generate: impl FnOnce() -> String,
    ) -> SecretValue {
        self.placeholders
            .entry((environment, name.to_string()))
            .or_insert_with(|| SecretValue::new(generate()))
            .value()
            .clone()
    }

    /// Forget every resolved secret and project id. Placeholders survive.
    pub fn clear_cache(&self) {
        self.cache.clear();
        self.project_ids.clear();
    }

    async fn from_remote(&self, environment: Environment, name: &str) -> Option<String> {
        let store = self.store.as_ref()?;
        let project_id = self.project_id(environment)?;

        let lookup = store.get_secret(&project_id, name, LATEST_VERSION);
        let outcome = match tokio::time::timeout(self.timeout, lookup).await {
            Ok(result) => result,
            Err(_) => Err(SecretError::Timeout {
                name: name.to_string(),
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        };

        match outcome {
            Ok(Some(value)) if !value.is_empty() => Some(value),
            Ok(_) => {
                debug!(secret = name, project_id = %project_id, "secret not in remote store");
                None
            }
            Err(e) => {
                let err = ConfigError::SecretSourceUnavailable {
                    source_name: store.name().to_string(),
                    reason: e.to_string(),
                };
                warn!(secret = name, environment = %environment, error = %err, "falling back to environment");
                None
            }
        }
    }

    fn from_env(&self, name: &str) -> Option<String> {
        self.env
            .get(&self.env_var_for(name))
            .filter(|value| !value.trim().is_empty())
    }
}
