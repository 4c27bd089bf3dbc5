//! Logging for BEEN nodes.
//!
//! - [`logger_init`] installs the global `tracing` subscriber (text, json or journald);
//! - [`MessageJournal`] writes every cluster message it is fed to the log.

mod logger;
pub use logger::*;

mod journal;
pub use journal::{MessageJournal, message_for};
