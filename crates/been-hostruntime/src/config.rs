use std::{collections::BTreeMap, path::PathBuf};

use serde::Deserialize;

use crate::RlimitConfig;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HostRuntimeConfig {
    /// Runtime id; the process-wide node id when unset.
    pub runtime_id: Option<String>,
    pub max_tasks: u32,
    /// Root under which per-task working directories are created.
    pub work_dir: PathBuf,
    pub heartbeat_interval_ms: u64,
    /// Time a task gets between SIGTERM and SIGKILL.
    pub kill_grace_ms: u64,
    pub cas_retries: u32,
    /// Static attributes advertised for placement queries.
    pub attributes: BTreeMap<String, String>,
    pub limits: RlimitConfig,
}

impl Default for HostRuntimeConfig {
    fn default() -> Self {
        Self {
            runtime_id: None,
            max_tasks: 8,
            work_dir: std::env::temp_dir().join("been"),
            heartbeat_interval_ms: 5_000,
            kill_grace_ms: 3_000,
            cas_retries: 8,
            attributes: BTreeMap::new(),
            limits: RlimitConfig::default(),
        }
    }
}

impl HostRuntimeConfig {
    pub fn with_runtime_id(mut self, id: impl Into<String>) -> Self {
        self.runtime_id = Some(id.into());
        self
    }

    pub fn with_max_tasks(mut self, n: u32) -> Self {
        self.max_tasks = n;
        self
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    pub fn with_heartbeat_interval_ms(mut self, ms: u64) -> Self {
        self.heartbeat_interval_ms = ms;
        self
    }

    pub fn with_kill_grace_ms(mut self, ms: u64) -> Self {
        self.kill_grace_ms = ms;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_limits(mut self, limits: RlimitConfig) -> Self {
        self.limits = limits;
        self
    }
}
