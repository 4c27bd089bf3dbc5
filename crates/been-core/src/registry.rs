use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use been_model::{RuntimeId, RuntimeInfo, TimestampMs, now_ms};

use crate::{ClusterStore, CoreError, Runtimes, TypedMap};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// A runtime whose last heartbeat is older than this is treated as gone.
    pub heartbeat_timeout_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_ms: 15_000,
        }
    }
}

impl RegistryConfig {
    pub fn with_heartbeat_timeout_ms(mut self, ms: u64) -> Self {
        self.heartbeat_timeout_ms = ms;
        self
    }
}

/// Read model over the `runtimes/` keyspace.
///
/// The view is eventually consistent: it reflects the last heartbeat each
/// runtime wrote, filtered by staleness at read time.
#[derive(Clone)]
pub struct RegistryView {
    runtimes: TypedMap<Runtimes>,
    config: RegistryConfig,
}

impl RegistryView {
    pub fn new(store: Arc<dyn ClusterStore>, config: RegistryConfig) -> Self {
        Self {
            runtimes: TypedMap::new(store),
            config,
        }
    }

    /// Runtimes with a fresh heartbeat, sorted by id.
    pub async fn live(&self) -> Result<Vec<RuntimeInfo>, CoreError> {
        let now = now_ms();
        let mut out: Vec<RuntimeInfo> = self
            .runtimes
            .values()
            .await?
            .into_iter()
            .filter(|r| self.is_fresh(r, now))
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    pub async fn get(&self, id: &RuntimeId) -> Result<Option<RuntimeInfo>, CoreError> {
        Ok(self.runtimes.get(id).await?.map(|v| v.value))
    }

    /// Present and fresh.
    pub async fn is_alive(&self, id: &RuntimeId) -> Result<bool, CoreError> {
        let now = now_ms();
        Ok(self
            .get(id)
            .await?
            .is_some_and(|r| self.is_fresh(&r, now)))
    }

    /// Write or refresh the presence record of a runtime.
    pub async fn publish(&self, info: &RuntimeInfo) -> Result<(), CoreError> {
        self.runtimes.put(&info.id, info).await?;
        debug!(runtime_id = %info.id, task_count = info.task_count, "runtime record published");
        Ok(())
    }

    pub async fn withdraw(&self, id: &RuntimeId) -> Result<(), CoreError> {
        self.runtimes.remove(id).await?;
        debug!(runtime_id = %id, "runtime record withdrawn");
        Ok(())
    }

    fn is_fresh(&self, info: &RuntimeInfo, now: TimestampMs) -> bool {
        info.heartbeat_age_ms(now) <= self.config.heartbeat_timeout_ms
    }
}
