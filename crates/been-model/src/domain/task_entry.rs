use serde::{Deserialize, Serialize};

use crate::{
    ContextId, NodeId, RuntimeId, StateChangeEntry, TaskDescriptor, TaskId, TaskState,
    TaskTreeAddress, TimestampMs, now_ms,
};

/// Stored record of one task.
///
/// Entries are values: every update produces a new entry which is written back
/// to the cluster with compare-and-swap. The state and its log only change
/// through the lifecycle functions of `been-core`, which check every move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEntry {
    id: TaskId,
    descriptor: TaskDescriptor,
    state: TaskState,
    log: Vec<StateChangeEntry>,
    context_id: ContextId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    owner_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    runtime_id: Option<RuntimeId>,
    created_at_ms: TimestampMs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    address: Option<TaskTreeAddress>,
}

impl TaskEntry {
    /// Fresh entry in `Created` with a single log record.
    pub fn create(id: TaskId, descriptor: TaskDescriptor, context_id: ContextId) -> Self {
        Self {
            id,
            descriptor,
            state: TaskState::Created,
            log: vec![StateChangeEntry::new(TaskState::Created, "task created")],
            context_id,
            owner_id: None,
            runtime_id: None,
            created_at_ms: now_ms(),
            address: None,
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn descriptor(&self) -> &TaskDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn log(&self) -> &[StateChangeEntry] {
        &self.log
    }

    pub fn context_id(&self) -> &ContextId {
        &self.context_id
    }

    pub fn owner_id(&self) -> Option<&NodeId> {
        self.owner_id.as_ref()
    }

    pub fn runtime_id(&self) -> Option<&RuntimeId> {
        self.runtime_id.as_ref()
    }

    pub fn created_at_ms(&self) -> TimestampMs {
        self.created_at_ms
    }

    pub fn address(&self) -> Option<&TaskTreeAddress> {
        self.address.as_ref()
    }

    /// Timestamp of the latest log record.
    pub fn last_change_ms(&self) -> TimestampMs {
        self.log
            .last()
            .map(StateChangeEntry::timestamp_ms)
            .unwrap_or(self.created_at_ms)
    }

    /// Set the state and append a log record, without any legality check.
    ///
    /// Hidden from the docs: callers go through `been_core::transition` or
    /// `been_core::advance_to`, which check the move before delegating here.
    #[doc(hidden)]
    pub fn record_state(mut self, state: TaskState, reason: impl Into<String>) -> Self {
        self.state = state;
        self.log.push(StateChangeEntry::new(state, reason));
        self
    }

    pub fn with_owner(mut self, owner: Option<NodeId>) -> Self {
        self.owner_id = owner;
        self
    }

    pub fn with_runtime(mut self, runtime: Option<RuntimeId>) -> Self {
        self.runtime_id = runtime;
        self
    }

    pub fn with_address(mut self, address: TaskTreeAddress) -> Self {
        self.address = Some(address);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> TaskEntry {
        TaskEntry::create(
            TaskId::from("T1"),
            TaskDescriptor::new("bench", "/bin/true"),
            ContextId::from("C1"),
        )
    }

    #[test]
    fn create_starts_in_created_with_one_record() {
        let e = entry();
        assert_eq!(e.state(), TaskState::Created);
        assert_eq!(e.log().len(), 1);
        assert_eq!(e.log()[0].state(), TaskState::Created);
        assert!(e.runtime_id().is_none());
        assert!(e.owner_id().is_none());
    }

    #[test]
    fn record_state_appends() {
        let e = entry().record_state(TaskState::Submitted, "submitted");
        assert_eq!(e.state(), TaskState::Submitted);
        assert_eq!(e.log().len(), 2);
        assert_eq!(e.log()[1].reason(), "submitted");
    }

    #[test]
    fn serde_keeps_placement() {
        let e = entry()
            .with_runtime(Some(RuntimeId::from("R1")))
            .with_owner(Some(NodeId::from("N1")));
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains(r#""runtimeId":"R1""#));

        let back: TaskEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }
}
