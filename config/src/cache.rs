//! # Configuration Cache
//!
//! A single slot holding the published configuration and its report.
//!
//! Entries are immutable and published by swapping an `Arc` under a short
//! write lock. Readers clone the `Arc` and drop the lock immediately, so a
//! reader holding an old entry is never affected by a later publish or
//! invalidation.

use crate::schema::AppConfig;
use crate::validator::ValidationReport;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
pub struct CachedConfig {
    pub config: Arc<AppConfig>,
    pub report: ValidationReport,
    pub cached_at: DateTime<Utc>,
    /// Increases by one on every publish
    pub generation: u64,
}

#[derive(Debug, Default)]
pub struct ConfigCache {
    slot: RwLock<Option<Arc<CachedConfig>>>,
    generation: AtomicU64,
}

impl ConfigCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Arc<CachedConfig>> {
        self.slot.read().clone()
    }

    /// Replace the current entry; the previous one is dropped once its
    /// last reader lets go.
    ///
    /// The generation is assigned under the write lock, so the slot always
    /// holds the newest generation handed out.
    pub fn publish(&self, config: AppConfig, report: ValidationReport) -> Arc<CachedConfig> {
        let config = Arc::new(config);
        let mut slot = self.slot.write();
        let entry = Arc::new(CachedConfig {
            config,
            report,
            cached_at: Utc::now(),
            generation: self.generation.fetch_add(1, Ordering::SeqCst) + 1,
        });
        *slot = Some(Arc::clone(&entry));
        entry
    }

    pub fn invalidate(&self) -> Option<Arc<CachedConfig>> {
        self.slot.write().take()
    }

    pub fn is_populated(&self) -> bool {
        self.slot.read().is_some()
    }

    /// Number of publishes so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}
