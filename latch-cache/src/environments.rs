//! Environment-scoped cache lookup.

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use latch_core::{CacheConfig, EnvironmentId, LatchResult};
use tracing::debug;

use crate::data_cache::DataCache;
use crate::environment::Environment;
use crate::lock;
use crate::scheduler::{Scheduler, TokioScheduler};

/// One [`DataCache`] per environment, created on first access.
///
/// Caches live as long as this table; there is no per-environment teardown.
/// Hold the table wherever the environments themselves are owned and pass it
/// to the code that reads through them.
pub struct EnvironmentCaches {
    config: CacheConfig,
    capacity: NonZeroUsize,
    scheduler: Arc<dyn Scheduler>,
    caches: Mutex<HashMap<EnvironmentId, DataCache>>,
}

impl EnvironmentCaches {
    pub fn new(config: CacheConfig, scheduler: Arc<dyn Scheduler>) -> LatchResult<Self> {
        let capacity = config.capacity_nonzero()?;
        Ok(Self {
            config,
            capacity,
            scheduler,
            caches: Mutex::new(HashMap::new()),
        })
    }

    /// Build with retention timed on the current tokio runtime.
    pub fn with_tokio(config: CacheConfig) -> LatchResult<Self> {
        let scheduler = TokioScheduler::from_current()?;
        Self::new(config, Arc::new(scheduler))
    }

    /// The cache for `environment`, creating it on first use.
    pub fn for_environment(&self, environment: Arc<dyn Environment>) -> DataCache {
        let id = environment.id();
        let mut caches = lock(&self.caches);
        caches
            .entry(id)
            .or_insert_with(|| {
                debug!(environment = %id, capacity = self.capacity.get(), "Creating data cache");
                DataCache::with_capacity(
                    environment,
                    self.config.clone(),
                    self.capacity,
                    Arc::clone(&self.scheduler),
                )
            })
            .clone()
    }

    pub fn get(&self, id: EnvironmentId) -> Option<DataCache> {
        lock(&self.caches).get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.caches).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for EnvironmentCaches {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvironmentCaches")
            .field("config", &self.config)
            .field("environments", &self.len())
            .finish()
    }
}
