//! Encore cache layer
//!
//! Cache-aside reads with pattern-based bulk invalidation over a shared
//! key-value store:
//!
//! - [`KeySchema`] names every cached listing and detail payload
//! - [`CacheAccessor`] serves hits and populates misses
//! - [`Invalidator`] clears whatever a write could have made stale
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! backend = "redis"          # or "memory"
//! redis_url = "redis://127.0.0.1:6379"
//! key_prefix = "encore:"
//! default_ttl_secs = 3600
//! scan_count = 500
//!
//! [cache.ttl_overrides]
//! notifications = 60
//! ```

mod accessor;
mod config;
mod invalidate;
mod keys;
pub(crate) mod lock;
pub mod memory;
mod store;

use std::sync::Arc;

pub use accessor::CacheAccessor;
pub use config::{CacheBackend, CacheConfig, DEFAULT_SCAN_COUNT, DEFAULT_TTL_SECS};
pub use invalidate::{InvalidationReport, Invalidator};
pub use keys::{
    CacheKey, DEFAULT_KEY_PREFIX, Entity, InvalidationPattern, KeyError, KeySchema, ListFilters,
};
pub use memory::MemoryStore;
pub use store::{DisabledStore, KeyValueStore, StoreError};

/// Shared handles to the cache layer, built once at startup.
#[derive(Clone)]
pub struct CacheLayer {
    schema: Arc<KeySchema>,
    accessor: Arc<CacheAccessor>,
    invalidator: Invalidator,
    store: Arc<dyn KeyValueStore>,
}

impl CacheLayer {
    pub fn new(config: CacheConfig, store: Arc<dyn KeyValueStore>) -> Self {
        let schema = Arc::new(KeySchema::new(config.key_prefix.clone()));
        let config = Arc::new(config);
        Self {
            accessor: Arc::new(CacheAccessor::new(Arc::clone(&store), config)),
            invalidator: Invalidator::new(Arc::clone(&store), Arc::clone(&schema)),
            schema,
            store,
        }
    }

    /// Memory-backed layer with default settings.
    pub fn in_memory() -> Self {
        Self::new(CacheConfig::in_memory(), Arc::new(MemoryStore::new()))
    }

    pub fn keys(&self) -> &KeySchema {
        &self.schema
    }

    pub fn reads(&self) -> &CacheAccessor {
        &self.accessor
    }

    pub fn invalidator(&self) -> &Invalidator {
        &self.invalidator
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }
}
