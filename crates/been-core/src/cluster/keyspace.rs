use std::{fmt::Display, marker::PhantomData, sync::Arc};

use serde::{Serialize, de::DeserializeOwned};
use tracing::trace;

use been_model::{
    ContextId, RuntimeId, RuntimeInfo, TaskContextEntry, TaskEntry, TaskId, TaskTreeAddress,
};

use super::{ClusterStore, Versioned};
use crate::{CoreError, TreeNode};

/// Compile-time description of one map in the cluster: key prefix, key type and value type.
pub trait Keyspace: Send + Sync + 'static {
    const PREFIX: &'static str;
    type Key: Display + Send + Sync;
    type Value: Serialize + DeserializeOwned + Send + Sync;

    /// Error reported when an update targets a missing key.
    fn not_found(id: &Self::Key) -> CoreError {
        CoreError::NotFound(format!("{}{id}", Self::PREFIX))
    }
}

/// `tasks/{taskId}`
pub struct Tasks;
impl Keyspace for Tasks {
    const PREFIX: &'static str = "tasks/";
    type Key = TaskId;
    type Value = TaskEntry;

    fn not_found(id: &TaskId) -> CoreError {
        CoreError::TaskNotFound(id.clone())
    }
}

/// `contexts/{contextId}`
pub struct Contexts;
impl Keyspace for Contexts {
    const PREFIX: &'static str = "contexts/";
    type Key = ContextId;
    type Value = TaskContextEntry;
}

/// `runtimes/{runtimeId}`
pub struct Runtimes;
impl Keyspace for Runtimes {
    const PREFIX: &'static str = "runtimes/";
    type Key = RuntimeId;
    type Value = RuntimeInfo;
}

/// `tree/{address}`
pub struct TreeNodes;
impl Keyspace for TreeNodes {
    const PREFIX: &'static str = "tree/";
    type Key = TaskTreeAddress;
    type Value = TreeNode;
}

/// Typed view of one keyspace over a [`ClusterStore`].
pub struct TypedMap<K: Keyspace> {
    store: Arc<dyn ClusterStore>,
    _keyspace: PhantomData<fn() -> K>,
}

impl<K: Keyspace> Clone for TypedMap<K> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            _keyspace: PhantomData,
        }
    }
}

impl<K: Keyspace> TypedMap<K> {
    pub fn new(store: Arc<dyn ClusterStore>) -> Self {
        Self {
            store,
            _keyspace: PhantomData,
        }
    }

    pub fn key(id: &K::Key) -> String {
        format!("{}{id}", K::PREFIX)
    }

    pub async fn get(&self, id: &K::Key) -> Result<Option<Versioned<K::Value>>, CoreError> {
        let key = Self::key(id);
        match self.store.get(&key).await? {
            Some(raw) => Ok(Some(Versioned {
                version: raw.version,
                value: decode(&key, &raw.value)?,
            })),
            None => Ok(None),
        }
    }

    pub async fn put(&self, id: &K::Key, value: &K::Value) -> Result<u64, CoreError> {
        let key = Self::key(id);
        let raw = encode(&key, value)?;
        self.store.put(&key, raw).await
    }

    /// Returns `false` when the key already exists.
    pub async fn insert_new(&self, id: &K::Key, value: &K::Value) -> Result<bool, CoreError> {
        let key = Self::key(id);
        let raw = encode(&key, value)?;
        Ok(self.store.put_if_absent(&key, raw).await?.is_some())
    }

    pub async fn replace(
        &self,
        id: &K::Key,
        expected: u64,
        value: &K::Value,
    ) -> Result<bool, CoreError> {
        let key = Self::key(id);
        let raw = encode(&key, value)?;
        Ok(self.store.replace(&key, expected, raw).await?.is_some())
    }

    pub async fn remove(&self, id: &K::Key) -> Result<Option<K::Value>, CoreError> {
        let key = Self::key(id);
        match self.store.remove(&key).await? {
            Some(raw) => Ok(Some(decode(&key, &raw.value)?)),
            None => Ok(None),
        }
    }

    /// Every value in the keyspace. Entries that fail to decode are skipped with a warning.
    pub async fn values(&self) -> Result<Vec<K::Value>, CoreError> {
        let keys = self.store.keys(K::PREFIX).await?;
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(raw) = self.store.get(&key).await? else {
                continue;
            };
            match decode::<K::Value>(&key, &raw.value) {
                Ok(v) => out.push(v),
                Err(e) => tracing::warn!(%key, error = %e, "skipping undecodable entry"),
            }
        }
        Ok(out)
    }

    /// Read-modify-write with compare-and-swap.
    ///
    /// `f` sees the latest stored value and returns the replacement, or an error
    /// that aborts the update. On a version conflict the value is re-read and `f`
    /// runs again, at most `retries + 1` times in total.
    pub async fn update<F>(
        &self,
        id: &K::Key,
        retries: u32,
        mut f: F,
    ) -> Result<K::Value, CoreError>
    where
        F: FnMut(K::Value) -> Result<K::Value, CoreError> + Send,
    {
        let attempts = retries + 1;
        for attempt in 1..=attempts {
            let Some(current) = self.get(id).await? else {
                return Err(K::not_found(id));
            };
            let next = f(current.value)?;
            if self.replace(id, current.version, &next).await? {
                return Ok(next);
            }
            trace!(key = %Self::key(id), attempt, "cas conflict, retrying");
        }
        Err(CoreError::CasExhausted {
            key: Self::key(id),
            attempts,
        })
    }
}

fn encode<T: Serialize>(key: &str, value: &T) -> Result<String, CoreError> {
    serde_json::to_string(value).map_err(|source| CoreError::Codec {
        key: key.to_string(),
        source,
    })
}

fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T, CoreError> {
    serde_json::from_str(raw).map_err(|source| CoreError::Codec {
        key: key.to_string(),
        source,
    })
}
