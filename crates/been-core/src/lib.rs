//! Scheduling core of BEEN.
//!
//! The crate is transport agnostic: everything it needs from the cluster is
//! expressed by [`ClusterStore`] (versioned key/value map) and [`Transport`]
//! (broadcast topic plus point-to-point inboxes). [`MemoryCluster`] implements
//! both in-process.
//!
//! Main entry points:
//! - [`transition`]: the task state machine;
//! - [`Selector`]: runtime placement;
//! - [`TaskTree`]: hierarchical addressing;
//! - [`MessagingSession`]: a node's attachment to the message channels;
//! - [`Orchestrator`]: submission, dispatch and reaction to lifecycle messages.

pub mod error;
pub use error::{CoreError, IllegalTransition, NoRuntimeFound};

mod lifecycle;
pub use lifecycle::{advance_to, transition};

pub mod cluster;
pub use cluster::{
    ClusterOp, ClusterStore, Contexts, Keyspace, MemoryCluster, Runtimes, Tasks, Transport,
    TreeNodes, TypedMap, Versioned,
};

mod messaging;
pub use messaging::{MessageSender, MessagingSession};

mod registry;
pub use registry::{RegistryConfig, RegistryView};

mod selector;
pub use selector::{SelectionStrategy, Selector, SelectorConfig};

mod tree;
pub use tree::{TaskTree, TreeNode};

mod metrics;
pub use metrics::{MetricsBackend, NoopMetrics, ScheduleOutcome};

mod orchestrator;
pub use orchestrator::{Orchestrator, OrchestratorConfig, ScanReport};

pub mod system;
