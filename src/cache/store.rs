//! Key-value store seam.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache store unavailable: {0}")]
    Unavailable(String),
    #[error("cache store command `{command}` failed: {message}")]
    Command {
        command: &'static str,
        message: String,
    },
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn command(command: &'static str, message: impl Into<String>) -> Self {
        Self::Command {
            command,
            message: message.into(),
        }
    }
}

/// Operations the cache layer needs from a store.
///
/// Implementations must be safe to share across tasks; single operations are
/// expected to be atomic but no multi-key transactions are required.
#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn set_with_expiry(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    /// Every key matching the glob `pattern`. Iterates incrementally on stores
    /// that support it.
    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// Deletes `keys`, returning how many existed.
    async fn bulk_delete(&self, keys: &[String]) -> Result<u64, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;

    fn backend(&self) -> &'static str;
}

/// Store used when caching is turned off: every read misses and every write
/// is dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledStore;

#[async_trait]
impl KeyValueStore for DisabledStore {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(None)
    }

    async fn set_with_expiry(
        &self,
        _key: &str,
        _value: Vec<u8>,
        _ttl: Duration,
    ) -> Result<(), StoreError> {
        Ok(())
    }

    async fn scan(&self, _pattern: &str) -> Result<Vec<String>, StoreError> {
        Ok(Vec::new())
    }

    async fn bulk_delete(&self, _keys: &[String]) -> Result<u64, StoreError> {
        Ok(0)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "disabled"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_store_never_retains_values() {
        let store = DisabledStore;
        store
            .set_with_expiry("k", b"v".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.scan("*").await.unwrap().is_empty());
        assert_eq!(store.bulk_delete(&["k".to_string()]).await.unwrap(), 0);
    }
}
