//! Shared data model of the BEEN scheduling core.
//!
//! Everything stored in the shared cluster state or sent over the wire lives here:
//! task and context entries, runtime descriptors, tree addresses and protocol messages.

mod error;
pub use error::ModelError;

mod domain;
pub use domain::*;

mod protocol;
pub use protocol::*;
