//! Identity of the local node.

use std::{sync::OnceLock, time::Instant};

use been_model::NodeId;

static NODE_ID: OnceLock<String> = OnceLock::new();
static START_TIME: OnceLock<Instant> = OnceLock::new();

/// Pin the start instant used by [`uptime_seconds`].
pub fn init_uptime() {
    START_TIME.get_or_init(Instant::now);
}

pub fn uptime_seconds() -> u64 {
    START_TIME.get_or_init(Instant::now).elapsed().as_secs()
}

#[inline]
pub fn platform() -> &'static str {
    std::env::consts::OS
}

#[inline]
pub fn arch() -> &'static str {
    std::env::consts::ARCH
}

/// Host name, or an empty string when it can't be read.
pub fn hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_default()
}

/// Process-wide node id: `BEEN_NODE_ID` if set, otherwise `{hostname}-{uuid}`.
///
/// The random suffix keeps two nodes on one host apart.
pub fn node_id() -> NodeId {
    let id = NODE_ID.get_or_init(|| {
        if let Ok(id) = std::env::var("BEEN_NODE_ID")
            && !id.trim().is_empty()
        {
            return id.trim().to_string();
        }
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        match hostname() {
            h if h.is_empty() => suffix,
            h => format!("{h}-{}", &suffix[..8]),
        }
    });
    NodeId::new(id.clone())
}

/// Fresh unique identifier for tasks, contexts and operations.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
