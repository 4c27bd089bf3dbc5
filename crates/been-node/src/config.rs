use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use been_core::{OrchestratorConfig, RegistryConfig, SelectorConfig};
use been_hostruntime::HostRuntimeConfig;
use been_model::TaskContextDescriptor;
use been_observe::LoggerConfig;

/// Everything a node needs, read from the JSON file named by `BEEN_CONFIG`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub logger: LoggerConfig,
    pub selector: SelectorConfig,
    pub registry: RegistryConfig,
    pub orchestrator: OrchestratorConfig,
    pub runtime: HostRuntimeConfig,
    /// Contexts submitted once the node is up.
    pub contexts: Vec<TaskContextDescriptor>,
    /// Where to write the Prometheus text exposition on shutdown.
    pub metrics_path: Option<PathBuf>,
}

impl NodeConfig {
    /// Config file (if any) plus `BEEN_LOG_LEVEL` / `BEEN_LOG_FORMAT` overrides.
    pub fn load() -> anyhow::Result<Self> {
        let cfg = match std::env::var_os("BEEN_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        cfg.with_log_overrides(
            std::env::var("BEEN_LOG_LEVEL").ok(),
            std::env::var("BEEN_LOG_FORMAT").ok(),
        )
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn with_log_overrides(
        mut self,
        level: Option<String>,
        format: Option<String>,
    ) -> anyhow::Result<Self> {
        self.logger = self
            .logger
            .with_overrides(level, format)
            .context("invalid logger override")?;
        Ok(self)
    }
}
