//! Shared cluster state seen through two capabilities: a versioned key/value
//! map and a message transport.

mod store;
pub use store::{ClusterStore, Versioned};

mod keyspace;
pub use keyspace::{Contexts, Keyspace, Runtimes, Tasks, TreeNodes, TypedMap};

mod transport;
pub use transport::Transport;

mod memory;
pub use memory::{ClusterOp, MemoryCluster};
