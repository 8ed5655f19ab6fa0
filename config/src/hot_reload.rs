//! # Env File Hot Reload
//!
//! Watches a `KEY=VALUE` file and, on every change, re-applies it to the
//! manager's accessor with env-file precedence, drops resolved secrets and
//! forces a configuration reload.

use crate::environment::Environment;
use crate::manager::ConfigManager;
use errors::ConfigError;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Configuration reload event.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigReloadEvent {
    Ready,

    /// File re-applied and a new configuration published
    Reloaded {
        path: PathBuf,
        environment: Environment,
        generation: u64,
    },

    /// Watched file was removed; the current configuration stays in place
    Removed(PathBuf),

    /// Re-applying the file or rebuilding the configuration failed
    Error { path: PathBuf, error: String },
}

/// Watch `path` and reload `manager` whenever it changes.
///
/// # M-CANONICAL-DOCS
///
/// ## Purpose
/// Lets long-running services pick up edits to their `.env` file without a
/// restart. Uses the `notify` crate for cross-platform file watching.
///
/// ## Usage
/// ```rust,no_run
/// use config::{ConfigManager, hot_reload::ConfigReloadEvent, watch_env_file};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let manager = Arc::new(ConfigManager::builder().build()?);
///     let mut events = watch_env_file(manager, std::path::Path::new(".env")).await?;
///
///     while let Some(event) = events.recv().await {
///         if let ConfigReloadEvent::Error { path, error } = event {
///             eprintln!("reload of {:?} failed: {}", path, error);
///         }
///     }
///     Ok(())
/// }
/// ```
///
/// ## Lifecycle
/// The watcher stops once the returned receiver is dropped.
pub async fn watch_env_file(
    manager: Arc<ConfigManager>,
    path: &Path,
) -> Result<mpsc::Receiver<ConfigReloadEvent>, ConfigError> {
    let env_path = path.to_path_buf();

    if !env_path.exists() {
        return Err(ConfigError::EnvFile {
            path: env_path.display().to_string(),
            reason: "file not found".to_string(),
        });
    }

    let (tx, rx) = mpsc::channel(100);

    tokio::spawn(async move {
        let (event_tx, mut event_rx) = mpsc::channel(100);
        let mut watcher = match RecommendedWatcher::new(
            move |res| {
                let _ = event_tx.blocking_send(res);
            },
            notify::Config::default(),
        ) {
            Ok(w) => w,
            Err(e) => {
                let error_msg = format!("Failed to create file watcher: {e}");
                error!("{}", error_msg);
                let _ = tx
                    .send(ConfigReloadEvent::Error {
                        path: env_path,
                        error: error_msg,
                    })
                    .await;
                return;
            }
        };

        if let Err(e) = watcher.watch(&env_path, RecursiveMode::NonRecursive) {
            let error_msg = format!("Failed to watch env file: {e}");
            error!("{}", error_msg);
            let _ = tx
                .send(ConfigReloadEvent::Error {
                    path: env_path,
                    error: error_msg,
                })
                .await;
            return;
        }

        info!(path = %env_path.display(), "watching env file");
        let _ = tx.send(ConfigReloadEvent::Ready).await;

        loop {
            tokio::select! {
                () = tx.closed() => {
                    debug!(path = %env_path.display(), "receiver dropped, stopping watcher");
                    break;
                }
                event_result = event_rx.recv() => {
                    let Some(event_result) = event_result else {
                        break;
                    };

                    let event = match event_result {
                        Ok(event) => event,
                        Err(e) => {
                            warn!(error = %e, "watch error");
                            continue;
                        }
                    };
                    let Some(path) = event.paths.first().cloned() else {
                        continue;
                    };

                    let reload_event = match event.kind {
                        EventKind::Create(_) | EventKind::Modify(_) => {
                            apply_and_reload(&manager, path).await
                        }
                        EventKind::Remove(_) => {
                            warn!(path = %path.display(), "env file removed, keeping current configuration");
                            ConfigReloadEvent::Removed(path)
                        }
                        _ => {
                            debug!(kind = ?event.kind, "ignoring event");
                            continue;
                        }
                    };

                    if tx.send(reload_event).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    Ok(rx)
}

async fn apply_and_reload(manager: &ConfigManager, path: PathBuf) -> ConfigReloadEvent {
    if let Err(e) = manager.env().load_env_file(&path) {
        return ConfigReloadEvent::Error {
            path,
            error: e.to_string(),
        };
    }

    manager.secrets().clear_cache();
    match manager.reload_config(true).await {
        Ok(config) => {
            info!(path = %path.display(), environment = %config.environment(), "configuration reloaded from env file");
            ConfigReloadEvent::Reloaded {
                path,
                environment: config.environment(),
                generation: manager.health().generation,
            }
        }
        Err(e) => ConfigReloadEvent::Error {
            path,
            error: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env_accessor::{EnvAccessor, MapEnv};
    use crate::options::ManagerOptions;
    use std::fs;
    use tokio::time::Duration;

    fn manager() -> Arc<ConfigManager> {
        let manager = ConfigManager::builder()
            .env(Arc::new(EnvAccessor::from_map(MapEnv::new())))
            .options(ManagerOptions::default())
            .build()
            .unwrap();
        Arc::new(manager)
    }

    /// Changes made before the watcher is registered are never reported.
    async fn wait_for_ready(rx: &mut mpsc::Receiver<ConfigReloadEvent>) {
        let ready = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("Timeout waiting for Ready event")
            .expect("No event received");
        assert_eq!(ready, ConfigReloadEvent::Ready);
    }

    /// Skip events until a reload publishes `expected`; a single write can
    /// surface as several modify events.
    async fn wait_for_environment(
        rx: &mut mpsc::Receiver<ConfigReloadEvent>,
        expected: Environment,
    ) {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("Timeout waiting for reload event")
                .expect("No event received");
            if let ConfigReloadEvent::Reloaded { environment, .. } = event {
                if environment == expected {
                    return;
                }
            }
        }
    }

    #[tokio::test]
    async fn test_watch_missing_file_is_an_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let err = watch_env_file(manager(), &temp_dir.path().join(".env"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::EnvFile { .. }));
    }

    #[tokio::test]
    async fn test_change_is_applied_and_published() {
        let temp_dir = tempfile::tempdir().unwrap();
        let env_path = temp_dir.path().join(".env");
        fs::write(&env_path, "REDIS_HOST=cache-a\n").unwrap();

        let manager = manager();
        manager.get_config().await.unwrap();
        let mut rx = watch_env_file(Arc::clone(&manager), &env_path)
            .await
            .unwrap();

        wait_for_ready(&mut rx).await;

        fs::write(&env_path, "REDIS_HOST=cache-b\nENVIRONMENT=testing\n").unwrap();

        wait_for_environment(&mut rx, Environment::Testing).await;
        assert_eq!(manager.env().get("REDIS_HOST").as_deref(), Some("cache-b"));
        let config = manager.get_config().await.unwrap();
        assert!(config.redis_url().unwrap().expose().contains("cache-b"));
    }

    #[tokio::test]
    async fn test_env_file_never_overrides_explicit_values() {
        let temp_dir = tempfile::tempdir().unwrap();
        let env_path = temp_dir.path().join(".env");
        fs::write(&env_path, "").unwrap();

        let manager = manager();
        manager.env().set("REDIS_HOST", "pinned", "operator");
        let mut rx = watch_env_file(Arc::clone(&manager), &env_path)
            .await
            .unwrap();
        wait_for_ready(&mut rx).await;

        fs::write(&env_path, "REDIS_HOST=from-file\nENVIRONMENT=testing\n").unwrap();
        wait_for_environment(&mut rx, Environment::Testing).await;
        assert_eq!(manager.env().get("REDIS_HOST").as_deref(), Some("pinned"));
    }
}
