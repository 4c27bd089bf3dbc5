//! Host runtime agent for BEEN.
//!
//! A [`HostRuntime`] sits on a worker machine, advertises itself in the
//! `runtimes/` keyspace and executes the tasks an orchestrator places on it.
//! Every accepted task runs as a child process in its own working directory;
//! its end is reported with exactly one terminal broadcast.

mod error;
pub use error::AgentError;

mod config;
pub use config::HostRuntimeConfig;

mod limits;
pub use limits::{RlimitConfig, attach_rlimits};

mod process;
pub use process::{ProcessOutcome, kill_graceful, supervise};

mod pressure;
pub use pressure::memory_pressure;

mod workdir;
pub use workdir::WorkDirs;

mod agent;
pub use agent::HostRuntime;
