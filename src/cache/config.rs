//! Cache configuration.
//!
//! Built from the `[cache]` section of `encore.toml` (or the matching
//! `ENCORE__CACHE__*` environment variables).

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use super::keys::{DEFAULT_KEY_PREFIX, Entity};

pub const DEFAULT_TTL_SECS: u64 = 3600;
pub const DEFAULT_SCAN_COUNT: u32 = 500;
const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    Redis,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// When false every read goes to the database and writes skip invalidation.
    pub enabled: bool,
    pub backend: CacheBackend,
    pub redis_url: String,
    /// Prepended to every key, e.g. `encore:`.
    pub key_prefix: String,
    pub default_ttl: Duration,
    pub ttl_overrides: BTreeMap<Entity, Duration>,
    /// `COUNT` hint for each `SCAN` round trip.
    pub scan_count: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: CacheBackend::Redis,
            redis_url: DEFAULT_REDIS_URL.to_string(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            default_ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            ttl_overrides: BTreeMap::new(),
            scan_count: DEFAULT_SCAN_COUNT,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            backend: settings.backend,
            redis_url: settings.redis_url.clone(),
            key_prefix: settings.key_prefix.clone(),
            default_ttl: Duration::from_secs(settings.default_ttl_secs.get()),
            ttl_overrides: settings
                .ttl_overrides
                .iter()
                .map(|(entity, secs)| (*entity, Duration::from_secs(secs.get())))
                .collect(),
            scan_count: settings.scan_count.get(),
        }
    }
}

impl CacheConfig {
    /// Memory-backed configuration used by tests and single-node runs.
    pub fn in_memory() -> Self {
        Self {
            backend: CacheBackend::Memory,
            ..Self::default()
        }
    }

    pub fn ttl_for(&self, entity: Entity) -> Duration {
        self.ttl_overrides
            .get(&entity)
            .copied()
            .unwrap_or(self.default_ttl)
    }
}
