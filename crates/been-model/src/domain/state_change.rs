use serde::{Deserialize, Serialize};

use crate::{TaskState, TimestampMs, now_ms};

/// One record of the append-only state change log of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChangeEntry {
    state: TaskState,
    reason: String,
    timestamp_ms: TimestampMs,
}

impl StateChangeEntry {
    pub fn new(state: TaskState, reason: impl Into<String>) -> Self {
        Self {
            state,
            reason: reason.into(),
            timestamp_ms: now_ms(),
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn timestamp_ms(&self) -> TimestampMs {
        self.timestamp_ms
    }
}
