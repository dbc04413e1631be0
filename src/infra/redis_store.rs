//! Redis-backed key-value store and store selection at startup.

use std::{
    sync::{Arc, RwLock},
    time::Duration,
};

use async_trait::async_trait;
use redis::{
    AsyncCommands, RedisError,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use tokio::{sync::Mutex, time::Instant};
use tracing::{info, warn};

use crate::cache::{
    CacheBackend, CacheConfig, DisabledStore, KeyValueStore, StoreError,
    lock::{rw_read, rw_write},
    memory::MemoryStore,
};

const LOCK_TARGET: &str = "infra::redis_store";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);
const CONNECT_RETRIES: usize = 1;
const MAX_RETRY_DELAY_MS: u64 = 500;
/// Minimum gap between connection attempts while Redis is unreachable.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// Store backed by a reconnecting Redis connection.
///
/// The connection is opened on first use. Until it succeeds every operation
/// fails with [`StoreError::Unavailable`], and a new attempt is made at most
/// once per [`RECONNECT_BACKOFF`]. Once open, the connection manager
/// reconnects on its own.
pub struct RedisStore {
    client: redis::Client,
    scan_count: u32,
    conn: RwLock<Option<ConnectionManager>>,
    next_attempt: Mutex<Option<Instant>>,
}

impl RedisStore {
    /// Parses `url` without connecting.
    pub fn new(url: &str, scan_count: u32) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(|err| map_redis_error("CONNECT", err))?;
        Ok(Self {
            client,
            scan_count: scan_count.max(1),
            conn: RwLock::new(None),
            next_attempt: Mutex::new(None),
        })
    }

    /// Parses `url` and fails unless the server answers `PING`.
    pub async fn connect(url: &str, scan_count: u32) -> Result<Self, StoreError> {
        let store = Self::new(url, scan_count)?;
        store.ping().await?;
        Ok(store)
    }

    fn manager_config() -> ConnectionManagerConfig {
        ConnectionManagerConfig::new()
            .set_connection_timeout(CONNECT_TIMEOUT)
            .set_response_timeout(RESPONSE_TIMEOUT)
            .set_number_of_retries(CONNECT_RETRIES)
            .set_max_delay(MAX_RETRY_DELAY_MS)
    }

    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        let current = rw_read(&self.conn, LOCK_TARGET, "connection").clone();
        if let Some(conn) = current {
            return Ok(conn);
        }

        let Ok(mut next_attempt) = self.next_attempt.try_lock() else {
            return Err(StoreError::unavailable("redis connection attempt in progress"));
        };
        let current = rw_read(&self.conn, LOCK_TARGET, "connection").clone();
        if let Some(conn) = current {
            return Ok(conn);
        }

        let now = Instant::now();
        if next_attempt.is_some_and(|at| now < at) {
            return Err(StoreError::unavailable(
                "redis unreachable; waiting before reconnecting",
            ));
        }

        match ConnectionManager::new_with_config(self.client.clone(), Self::manager_config()).await
        {
            Ok(conn) => {
                *rw_write(&self.conn, LOCK_TARGET, "connection") = Some(conn.clone());
                *next_attempt = None;
                info!(target: "encore::cache", backend = "redis", "cache store connected");
                Ok(conn)
            }
            Err(err) => {
                *next_attempt = Some(now + RECONNECT_BACKOFF);
                let err = map_redis_error("CONNECT", err);
                warn!(
                    target: "encore::cache",
                    error = %err,
                    retry_in_secs = RECONNECT_BACKOFF.as_secs(),
                    "redis connection failed"
                );
                Err(err)
            }
        }
    }
}

fn map_redis_error(command: &'static str, err: RedisError) -> StoreError {
    if err.is_io_error()
        || err.is_connection_refusal()
        || err.is_timeout()
        || err.is_connection_dropped()
    {
        StoreError::unavailable(err.to_string())
    } else {
        StoreError::command(command, err.to_string())
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.connection().await?;
        conn.get(key)
            .await
            .map_err(|err| map_redis_error("GET", err))
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let seconds = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(key, value, seconds)
            .await
            .map_err(|err| map_redis_error("SETEX", err))
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connection().await?;
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(self.scan_count)
                .query_async(&mut conn)
                .await
                .map_err(|err| map_redis_error("SCAN", err))?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        // SCAN may return a key more than once across iterations.
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }

    async fn bulk_delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection().await?;
        conn.del::<_, u64>(keys.to_vec())
            .await
            .map_err(|err| map_redis_error("DEL", err))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let _pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|err| map_redis_error("PING", err))?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

/// Picks the store the server runs with.
///
/// A Redis store stays selected even when the server is unreachable at boot:
/// reads fall through to Postgres and invalidations fail loudly until the
/// store reconnects. Only a malformed URL is an error here.
pub async fn build_store(config: &CacheConfig) -> Result<Arc<dyn KeyValueStore>, StoreError> {
    if !config.enabled {
        info!(target: "encore::cache", "cache disabled by configuration");
        return Ok(Arc::new(DisabledStore));
    }

    match config.backend {
        CacheBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        CacheBackend::Redis => {
            let store = RedisStore::new(&config.redis_url, config.scan_count)?;
            if let Err(err) = store.ping().await {
                warn!(
                    target: "encore::cache",
                    error = %err,
                    "redis unreachable at startup; serving from the database until it reconnects"
                );
            }
            Ok(Arc::new(store))
        }
    }
}

/// Store for one-shot operational commands, which must act on the shared
/// Redis or not at all.
pub async fn connect_shared_store(
    config: &CacheConfig,
) -> Result<Arc<dyn KeyValueStore>, StoreError> {
    if !config.enabled {
        return Err(StoreError::unavailable(
            "cache is disabled by configuration; nothing to invalidate",
        ));
    }
    match config.backend {
        CacheBackend::Memory => Err(StoreError::unavailable(
            "the memory backend is private to each server process; use the HTTP endpoint instead",
        )),
        CacheBackend::Redis => {
            let store = RedisStore::connect(&config.redis_url, config.scan_count).await?;
            Ok(Arc::new(store))
        }
    }
}
