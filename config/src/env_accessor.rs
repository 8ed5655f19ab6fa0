//! # Environment Accessor
//!
//! Override-capable key/value view layered over a base environment source.
//!
//! # Layers (highest first)
//! 1. Isolation sandbox (only while isolation is enabled)
//! 2. Committed overrides (`set`/`delete` outside isolation, `.env` files)
//! 3. Base source (the real process environment or an in-memory map)
//!
//! The real process environment is never mutated. Tests inject a
//! [`MapEnv`] base or enable isolation instead of patching global state.
//!
//! # Precedence
//! Every value carries an [`Origin`]. A write only replaces the visible value
//! when its origin ranks the same or higher: `EnvFile < Process < Override`.
//! A `.env` file therefore never overrides a variable set on the process.

use chrono::{DateTime, Utc};
use errors::ConfigError;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

pub const DEFAULT_AUDIT_CAPACITY: usize = 256;

const REDACTED: &str = "***";
const SENSITIVE_MARKERS: &[&str] = &["SECRET", "PASSWORD", "TOKEN", "KEY", "DSN"];

/// Read-only source of raw environment variables.
pub trait EnvSource: Send + Sync + fmt::Debug {
    fn var(&self, key: &str) -> Option<String>;

    fn vars(&self) -> Vec<(String, String)>;
}

/// The real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn vars(&self) -> Vec<(String, String)> {
        std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect()
    }
}

/// In-memory environment, used by tests and per-request sandboxes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapEnv {
    vars: BTreeMap<String, String>,
}

impl MapEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapEnv {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl EnvSource for MapEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }

    fn vars(&self) -> Vec<(String, String)> {
        self.vars
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Who set a value. Ordered by priority, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    EnvFile,
    Process,
    Override,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Provenance {
    pub origin: Origin,
    pub reason: String,
}

impl Provenance {
    fn process() -> Self {
        Self {
            origin: Origin::Process,
            reason: "process environment".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvEntry {
    pub value: String,
    pub provenance: Provenance,
}

/// One `set`/`delete`, kept for postmortem debugging of configuration drift.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditRecord {
    pub key: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub origin: Origin,
    pub reason: String,
    pub isolated: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
enum Slot {
    Present(EnvEntry),
    Removed(Provenance),
}

#[derive(Debug, Default)]
struct AccessorState {
    committed: BTreeMap<String, Slot>,
    sandbox: Option<BTreeMap<String, Slot>>,
    audit: VecDeque<AuditRecord>,
}

impl AccessorState {
    fn slot(&self, key: &str) -> Option<&Slot> {
        self.sandbox
            .as_ref()
            .and_then(|sandbox| sandbox.get(key))
            .or_else(|| self.committed.get(key))
    }

    fn active_layer(&mut self) -> &mut BTreeMap<String, Slot> {
        match self.sandbox.as_mut() {
            Some(sandbox) => sandbox,
            None => &mut self.committed,
        }
    }
}

/// Isolated, override-capable environment view.
///
/// One accessor serves one logical context at a time. Concurrent callers
/// that each need their own sandbox must each hold their own accessor.
#[derive(Debug)]
pub struct EnvAccessor {
    base: Arc<dyn EnvSource>,
    state: RwLock<AccessorState>,
    audit_capacity: AtomicUsize,
}

impl Default for EnvAccessor {
    fn default() -> Self {
        Self::from_process()
    }
}

impl EnvAccessor {
    pub fn new(base: Arc<dyn EnvSource>) -> Self {
        Self {
            base,
            state: RwLock::new(AccessorState::default()),
            audit_capacity: AtomicUsize::new(DEFAULT_AUDIT_CAPACITY),
        }
    }

    pub fn from_process() -> Self {
        Self::new(Arc::new(ProcessEnv))
    }

    pub fn from_map(map: MapEnv) -> Self {
        Self::new(Arc::new(map))
    }

    pub fn with_audit_capacity(self, capacity: usize) -> Self {
        self.set_audit_capacity(capacity);
        self
    }

    /// Change the audit-trail cap, dropping the oldest records that no
    /// longer fit.
    pub fn set_audit_capacity(&self, capacity: usize) {
        let capacity = capacity.max(1);
        let mut state = self.state.write();
        self.audit_capacity.store(capacity, Ordering::Relaxed);
        while state.audit.len() > capacity {
            state.audit.pop_front();
        }
    }

    pub fn audit_capacity(&self) -> usize {
        self.audit_capacity.load(Ordering::Relaxed)
    }

    /// Visible value for `key`; `None` means absent, which is distinct from
    /// an empty string.
    pub fn get(&self, key: &str) -> Option<String> {
        self.entry(key).map(|entry| entry.value)
    }

    /// Visible value for `key` together with its provenance.
    pub fn entry(&self, key: &str) -> Option<EnvEntry> {
        let state = self.state.read();
        self.visible(&state, key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entry(key).is_some()
    }

    /// Set `key` with the highest (`Override`) priority.
    pub fn set(&self, key: &str, value: impl Into<String>, reason: impl Into<String>) {
        self.set_with_origin(key, value, Origin::Override, reason);
    }

    /// Set `key` if `origin` ranks at least as high as the current value's.
    ///
    /// Returns whether the write was applied.
    pub fn set_with_origin(
        &self,
        key: &str,
        value: impl Into<String>,
        origin: Origin,
        reason: impl Into<String>,
    ) -> bool {
        let value = value.into();
        let reason = reason.into();
        let mut state = self.state.write();

        let current = self.visible_origin(&state, key);
        if let Some(current) = current.filter(|current| *current > origin) {
            debug!(
                key,
                current = ?current,
                attempted = ?origin,
                "write rejected by precedence"
            );
            return false;
        }

        let old_value = self.visible(&state, key).map(|entry| entry.value);
        let isolated = state.sandbox.is_some();
        state.active_layer().insert(
            key.to_string(),
            Slot::Present(EnvEntry {
                value: value.clone(),
                provenance: Provenance {
                    origin,
                    reason: reason.clone(),
                },
            }),
        );
        self.record(
            &mut state,
            AuditRecord {
                key: key.to_string(),
                old_value: redact(key, old_value),
                new_value: redact(key, Some(value)),
                origin,
                reason,
                isolated,
                timestamp: Utc::now(),
            },
        );

        true
    }

    /// Remove `key` entirely, hiding any base value. Returns the old value.
    pub fn delete(&self, key: &str, reason: impl Into<String>) -> Option<String> {
        let reason = reason.into();
        let mut state = self.state.write();

        let old_value = self.visible(&state, key).map(|entry| entry.value);
        let isolated = state.sandbox.is_some();
        state.active_layer().insert(
            key.to_string(),
            Slot::Removed(Provenance {
                origin: Origin::Override,
                reason: reason.clone(),
            }),
        );
        self.record(
            &mut state,
            AuditRecord {
                key: key.to_string(),
                old_value: redact(key, old_value.clone()),
                new_value: None,
                origin: Origin::Override,
                reason,
                isolated,
                timestamp: Utc::now(),
            },
        );

        old_value
    }

    /// Ordered view of every visible variable.
    pub fn snapshot(&self) -> BTreeMap<String, EnvEntry> {
        let state = self.state.read();
        let mut view: BTreeMap<String, EnvEntry> = self
            .base
            .vars()
            .into_iter()
            .map(|(key, value)| {
                (
                    key,
                    EnvEntry {
                        value,
                        provenance: Provenance::process(),
                    },
                )
            })
            .collect();

        for layer in std::iter::once(&state.committed).chain(state.sandbox.as_ref()) {
            for (key, slot) in layer {
                match slot {
                    Slot::Present(entry) => {
                        view.insert(key.clone(), entry.clone());
                    }
                    Slot::Removed(_) => {
                        view.remove(key);
                    }
                }
            }
        }

        view
    }

    /// Route subsequent writes to a sandbox that shadows the current view.
    pub fn enable_isolation(&self) {
        let mut state = self.state.write();
        if state.sandbox.is_some() {
            debug!("isolation already enabled");
            return;
        }
        state.sandbox = Some(BTreeMap::new());
        debug!("isolation enabled");
    }

    /// Discard the sandbox, restoring the view from before isolation.
    pub fn disable_isolation(&self) {
        let discarded = self
            .state
            .write()
            .sandbox
            .take()
            .map_or(0, |sandbox| sandbox.len());
        debug!(discarded, "isolation disabled");
    }

    pub fn is_isolated(&self) -> bool {
        self.state.read().sandbox.is_some()
    }

    /// Enable isolation until the returned guard is dropped.
    pub fn isolate(&self) -> IsolationGuard<'_> {
        self.enable_isolation();
        IsolationGuard { accessor: self }
    }

    pub fn audit_trail(&self) -> Vec<AuditRecord> {
        self.state.read().audit.iter().cloned().collect()
    }

    /// Apply a `KEY=VALUE` file with `EnvFile` precedence.
    ///
    /// Lines are `KEY=VALUE`; `#` comments and blank lines are skipped.
    /// The file is parsed completely before anything is applied. Returns the
    /// number of keys actually written.
    pub fn load_env_file(&self, path: &Path) -> Result<usize, ConfigError> {
        let env_file_error = |reason: String| ConfigError::EnvFile {
            path: path.display().to_string(),
            reason,
        };

        let pairs = dotenvy::from_path_iter(path)
            .map_err(|e| env_file_error(e.to_string()))?
            .collect::<Result<Vec<(String, String)>, _>>()
            .map_err(|e| env_file_error(e.to_string()))?;

        let reason = format!("env file {}", path.display());
        let mut applied = 0;
        for (key, value) in pairs {
            if self.set_with_origin(&key, value, Origin::EnvFile, reason.clone()) {
                applied += 1;
            }
        }

        info!(path = %path.display(), applied, "env file loaded");
        Ok(applied)
    }

    fn visible(&self, state: &AccessorState, key: &str) -> Option<EnvEntry> {
        match state.slot(key) {
            Some(Slot::Present(entry)) => Some(entry.clone()),
            Some(Slot::Removed(_)) => None,
            None => self.base.var(key).map(|value| EnvEntry {
                value,
                provenance: Provenance::process(),
            }),
        }
    }

    fn visible_origin(&self, state: &AccessorState, key: &str) -> Option<Origin> {
        match state.slot(key) {
            Some(Slot::Present(entry)) => Some(entry.provenance.origin),
            Some(Slot::Removed(provenance)) => Some(provenance.origin),
            None => self.base.var(key).map(|_| Origin::Process),
        }
    }

    fn record(&self, state: &mut AccessorState, record: AuditRecord) {
        debug!(key = %record.key, reason = %record.reason, "environment changed");
        while state.audit.len() >= self.audit_capacity() {
            state.audit.pop_front();
        }
        state.audit.push_back(record);
    }
}

/// Disables isolation on drop.
#[must_use = "isolation ends when the guard is dropped"]
pub struct IsolationGuard<'a> {
    accessor: &'a EnvAccessor,
}

impl Drop for IsolationGuard<'_> {
    fn drop(&mut self) {
        self.accessor.disable_isolation();
    }
}

fn redact(key: &str, value: Option<String>) -> Option<String> {
    let upper = key.to_uppercase();
    if SENSITIVE_MARKERS.iter().any(|marker| upper.contains(marker)) {
        value.map(|_| REDACTED.to_string())
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn accessor(vars: &[(&str, &str)]) -> EnvAccessor {
        EnvAccessor::from_map(vars.iter().copied().collect())
    }

    #[test]
    fn test_absent_is_distinct_from_empty() {
        let env = accessor(&[("EMPTY", "")]);
        assert_eq!(env.get("EMPTY"), Some(String::new()));
        assert_eq!(env.get("MISSING"), None);
        assert!(env.contains("EMPTY"));
        assert!(!env.contains("MISSING"));
    }

    #[test]
    fn test_set_overrides_base_and_records_provenance() {
        let env = accessor(&[("PG_HOST", "db.internal")]);
        env.set("PG_HOST", "replica.internal", "failover drill");

        let entry = env.entry("PG_HOST").unwrap();
        assert_eq!(entry.value, "replica.internal");
        assert_eq!(entry.provenance.origin, Origin::Override);
        assert_eq!(entry.provenance.reason, "failover drill");
    }

    #[test]
    fn test_delete_removes_key_entirely() {
        let env = accessor(&[("PG_HOST", "db.internal")]);
        let old = env.delete("PG_HOST", "decommissioned");

        assert_eq!(old.as_deref(), Some("db.internal"));
        assert_eq!(env.get("PG_HOST"), None);
        assert!(!env.snapshot().contains_key("PG_HOST"));
    }

    #[test]
    fn test_lower_priority_write_is_rejected() {
        let env = accessor(&[("API_PORT", "8080")]);

        assert!(!env.set_with_origin("API_PORT", "9090", Origin::EnvFile, "env file"));
        assert_eq!(env.get("API_PORT").as_deref(), Some("8080"));

        assert!(env.set_with_origin("API_PORT", "7070", Origin::Process, "bootstrap"));
        assert_eq!(env.get("API_PORT").as_deref(), Some("7070"));
    }

    #[test]
    fn test_same_priority_write_overwrites() {
        let env = accessor(&[]);
        assert!(env.set_with_origin("A", "1", Origin::EnvFile, "first"));
        assert!(env.set_with_origin("A", "2", Origin::EnvFile, "second"));
        assert_eq!(env.get("A").as_deref(), Some("2"));
    }

    #[test]
    fn test_isolation_discards_sandbox_writes() {
        let env = accessor(&[("REDIS_HOST", "cache.internal")]);
        env.set("LOG_LEVEL", "debug", "before isolation");

        env.enable_isolation();
        assert!(env.is_isolated());
        env.set("REDIS_HOST", "sandbox", "test");
        env.delete("LOG_LEVEL", "test");
        env.set("NEW_KEY", "value", "test");
        assert_eq!(env.get("REDIS_HOST").as_deref(), Some("sandbox"));
        assert_eq!(env.get("LOG_LEVEL"), None);

        env.disable_isolation();
        assert!(!env.is_isolated());
        assert_eq!(env.get("REDIS_HOST").as_deref(), Some("cache.internal"));
        assert_eq!(env.get("LOG_LEVEL").as_deref(), Some("debug"));
        assert_eq!(env.get("NEW_KEY"), None);
    }

    #[test]
    fn test_isolation_guard_restores_on_drop() {
        let env = accessor(&[("A", "base")]);
        {
            let _guard = env.isolate();
            env.set("A", "sandboxed", "test");
            assert_eq!(env.get("A").as_deref(), Some("sandboxed"));
        }
        assert_eq!(env.get("A").as_deref(), Some("base"));
    }

    #[test]
    fn test_snapshot_is_ordered_and_layered() {
        let env = accessor(&[("B", "2"), ("A", "1"), ("C", "3")]);
        env.set("D", "4", "test");
        env.delete("B", "test");

        let snapshot = env.snapshot();
        let keys: Vec<&str> = snapshot.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["A", "C", "D"]);
        assert_eq!(snapshot["A"].provenance.origin, Origin::Process);
        assert_eq!(snapshot["D"].provenance.origin, Origin::Override);
    }

    #[test]
    fn test_audit_trail_is_capped() {
        let env = accessor(&[]).with_audit_capacity(16);
        for i in 0..40 {
            env.set("COUNTER", i.to_string(), "loop");
        }

        let trail = env.audit_trail();
        assert_eq!(trail.len(), 16);
        assert_eq!(trail.last().unwrap().new_value.as_deref(), Some("39"));
        assert_eq!(trail.first().unwrap().new_value.as_deref(), Some("24"));
    }

    #[test]
    fn test_shrinking_audit_capacity_drops_oldest_records() {
        let env = accessor(&[]);
        for i in 0..10 {
            env.set("COUNTER", i.to_string(), "loop");
        }

        env.set_audit_capacity(4);
        let trail = env.audit_trail();
        assert_eq!(env.audit_capacity(), 4);
        assert_eq!(trail.len(), 4);
        assert_eq!(trail.first().unwrap().new_value.as_deref(), Some("6"));
    }

    #[test]
    fn test_audit_redacts_sensitive_keys() {
        let env = accessor(&[("JWT_SECRET_KEY", "old-value")]);
        env.set("JWT_SECRET_KEY", "new-value", "rotation");
        env.delete("JWT_SECRET_KEY", "revoked");

        let trail = env.audit_trail();
        assert_eq!(trail[0].old_value.as_deref(), Some("***"));
        assert_eq!(trail[0].new_value.as_deref(), Some("***"));
        assert_eq!(trail[1].new_value, None);
        assert!(!trail[1].isolated);
    }

    #[test]
    fn test_env_file_never_overrides_process_values() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "# local overrides").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "POSTGRES_HOST=from-file").unwrap();
        writeln!(file, "POSTGRES_DB=app").unwrap();

        let env = accessor(&[("POSTGRES_HOST", "from-process")]);
        let applied = env.load_env_file(file.path()).unwrap();

        assert_eq!(applied, 1);
        assert_eq!(env.get("POSTGRES_HOST").as_deref(), Some("from-process"));
        assert_eq!(env.get("POSTGRES_DB").as_deref(), Some("app"));
        assert_eq!(
            env.entry("POSTGRES_DB").unwrap().provenance.origin,
            Origin::EnvFile
        );
    }

    #[test]
    fn test_missing_env_file_is_an_error() {
        let env = accessor(&[]);
        let err = env
            .load_env_file(Path::new("/definitely/not/here/.env"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::EnvFile { .. }));
    }

    #[test]
    #[serial]
    fn test_process_env_reads_real_variables() {
        unsafe {
            std::env::set_var("UNIFIED_CONFIG_ACCESSOR_PROBE", "present");
        }

        let env = EnvAccessor::from_process();
        assert_eq!(
            env.get("UNIFIED_CONFIG_ACCESSOR_PROBE").as_deref(),
            Some("present")
        );
        env.set("UNIFIED_CONFIG_ACCESSOR_PROBE", "overridden", "test");
        assert_eq!(
            std::env::var("UNIFIED_CONFIG_ACCESSOR_PROBE").unwrap(),
            "present"
        );

        unsafe {
            std::env::remove_var("UNIFIED_CONFIG_ACCESSOR_PROBE");
        }
    }
}
