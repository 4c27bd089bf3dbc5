use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{ContextId, Exclusivity, RuntimeId, TimestampMs, inbox_name, now_ms};

/// Presence record a host runtime publishes under `runtimes/{id}` and refreshes on every heartbeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeInfo {
    pub id: RuntimeId,
    #[serde(default)]
    pub hostname: String,
    /// Point-to-point inbox the runtime listens on.
    pub inbox: String,
    pub task_count: u32,
    /// Upper bound of concurrent tasks the runtime is willing to host.
    pub max_tasks: u32,
    /// Fraction of memory in use, `0.0..=1.0`.
    pub memory_pressure: f64,
    pub exclusivity: Exclusivity,
    /// Task or context the runtime is pinned to while exclusive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserved_for: Option<ContextId>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    pub last_heartbeat_ms: TimestampMs,
}

impl RuntimeInfo {
    pub fn new(id: RuntimeId, max_tasks: u32) -> Self {
        let inbox = inbox_name(&id);
        Self {
            id,
            hostname: String::new(),
            inbox,
            task_count: 0,
            max_tasks,
            memory_pressure: 0.0,
            exclusivity: Exclusivity::NonExclusive,
            reserved_for: None,
            attributes: BTreeMap::new(),
            last_heartbeat_ms: now_ms(),
        }
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn with_task_count(mut self, count: u32) -> Self {
        self.task_count = count;
        self
    }

    pub fn with_memory_pressure(mut self, pressure: f64) -> Self {
        self.memory_pressure = pressure.clamp(0.0, 1.0);
        self
    }

    pub fn with_exclusivity(mut self, mode: Exclusivity, reserved_for: Option<ContextId>) -> Self {
        self.exclusivity = mode;
        self.reserved_for = reserved_for;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_heartbeat_ms(mut self, ts: TimestampMs) -> Self {
        self.last_heartbeat_ms = ts;
        self
    }

    pub fn is_idle(&self) -> bool {
        self.task_count == 0
    }

    /// Milliseconds since the last heartbeat as seen at `now`.
    pub fn heartbeat_age_ms(&self, now: TimestampMs) -> u64 {
        now.saturating_sub(self.last_heartbeat_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_runtime_is_idle_and_open() {
        let info = RuntimeInfo::new(RuntimeId::from("R1"), 4);
        assert!(info.is_idle());
        assert_eq!(info.exclusivity, Exclusivity::NonExclusive);
        assert_eq!(info.inbox, "inbox/R1");
        assert!(info.reserved_for.is_none());
    }

    #[test]
    fn memory_pressure_is_clamped() {
        let info = RuntimeInfo::new(RuntimeId::from("R1"), 4).with_memory_pressure(1.7);
        assert_eq!(info.memory_pressure, 1.0);
    }

    #[test]
    fn heartbeat_age_saturates() {
        let info = RuntimeInfo::new(RuntimeId::from("R1"), 1).with_heartbeat_ms(1_000);
        assert_eq!(info.heartbeat_age_ms(1_500), 500);
        assert_eq!(info.heartbeat_age_ms(500), 0);
    }
}
