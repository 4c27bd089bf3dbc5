mod ids;
pub use ids::{ContextId, NodeId, OperationId, RuntimeId, TaskId};

mod kv;
pub use kv::KeyValue;

mod properties;
pub use properties::TaskProperties;

mod task_state;
pub use task_state::TaskState;

mod state_change;
pub use state_change::StateChangeEntry;

mod exclusivity;
pub use exclusivity::Exclusivity;

mod query;
pub use query::PlacementQuery;

mod descriptor;
pub use descriptor::TaskDescriptor;

mod task_entry;
pub use task_entry::TaskEntry;

mod context;
pub use context::{
    TaskContextDescriptor, TaskContextEntry, TaskContextState, TaskDeclaration, TaskSource,
};

mod runtime_info;
pub use runtime_info::RuntimeInfo;

mod address;
pub use address::TaskTreeAddress;

/// Milliseconds since the unix epoch.
///
/// Used for every timestamp persisted in the cluster so that values survive a serde round-trip unchanged.
pub type TimestampMs = u64;

/// Current wall-clock time in milliseconds since the unix epoch (0 if the clock is before the epoch).
pub fn now_ms() -> TimestampMs {
    use std::time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as TimestampMs)
        .unwrap_or(0)
}
