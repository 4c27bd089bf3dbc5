use async_trait::async_trait;

use crate::CoreError;

/// A stored value together with the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

/// Distributed key/value map with per-key versions.
///
/// Versions grow monotonically per key; a removed and re-created key never
/// reuses an old version. Values are opaque JSON documents.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Versioned<String>>, CoreError>;

    /// Unconditional write. Returns the new version.
    async fn put(&self, key: &str, value: String) -> Result<u64, CoreError>;

    /// Write only when the key is absent. Returns the new version, or `None` if the key exists.
    async fn put_if_absent(&self, key: &str, value: String) -> Result<Option<u64>, CoreError>;

    /// Compare-and-swap against `expected` version.
    ///
    /// Returns the new version, or `None` when the stored version differs or the key is gone.
    async fn replace(
        &self,
        key: &str,
        expected: u64,
        value: String,
    ) -> Result<Option<u64>, CoreError>;

    async fn remove(&self, key: &str) -> Result<Option<Versioned<String>>, CoreError>;

    /// Every key starting with `prefix`, sorted.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, CoreError>;
}
