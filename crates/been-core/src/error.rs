use thiserror::Error;

use been_model::{ModelError, TaskId, TaskState};

/// A requested state change that the lifecycle rules forbid.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("illegal transition of task {task_id}: {from} -> {to}")]
pub struct IllegalTransition {
    pub task_id: TaskId,
    pub from: TaskState,
    pub to: TaskState,
}

/// No live runtime can take the task right now. Recoverable: the task stays queued.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("no runtime available for task {task_id}")]
pub struct NoRuntimeFound {
    pub task_id: TaskId,
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    IllegalTransition(#[from] IllegalTransition),
    #[error(transparent)]
    NoRuntimeFound(#[from] NoRuntimeFound),
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("entry not found: {0}")]
    NotFound(String),
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),
    #[error("address not found: {0}")]
    AddressNotFound(String),
    #[error("leaves can't have children: {0}")]
    LeafHasNoChildren(String),
    #[error("address already taken: {0}")]
    AddressTaken(String),
    #[error("not a leaf: {0}")]
    NotALeaf(String),
    #[error("tree node is not empty: {0}")]
    NodeNotEmpty(String),

    #[error("compare-and-swap on '{key}' kept failing after {attempts} attempts")]
    CasExhausted { key: String, attempts: u32 },
    #[error("failed to encode/decode '{key}': {source}")]
    Codec {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("messaging session is closed")]
    SessionClosed,
}

impl CoreError {
    /// Outcomes callers are expected to absorb rather than propagate.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CoreError::IllegalTransition(_)
                | CoreError::NoRuntimeFound(_)
                | CoreError::AddressNotFound(_)
                | CoreError::Model(ModelError::MalformedAddress(_))
        )
    }
}
