use std::fmt;

use serde::{Deserialize, Serialize};

/// Co-location mode shared by task requirements and runtime descriptors.
///
/// On a task it states what the task demands; on a runtime it states what the runtime is currently pinned to.
///
/// Parsing is fail-closed: any unrecognized value becomes [`Exclusivity::Exclusive`],
/// so a typo can only under-pack workers, never over-pack them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Exclusivity {
    /// Sole occupant of a runtime.
    Exclusive,
    /// May share a runtime with any other non-exclusive task.
    #[default]
    NonExclusive,
    /// May share a runtime only with tasks of the same context.
    ContextExclusive,
}

impl Exclusivity {
    pub fn as_str(self) -> &'static str {
        match self {
            Exclusivity::Exclusive => "EXCLUSIVE",
            Exclusivity::NonExclusive => "NON_EXCLUSIVE",
            Exclusivity::ContextExclusive => "CONTEXT_EXCLUSIVE",
        }
    }

    /// Strict parse; `None` for unknown values.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "EXCLUSIVE" => Some(Exclusivity::Exclusive),
            "NON_EXCLUSIVE" => Some(Exclusivity::NonExclusive),
            "CONTEXT_EXCLUSIVE" => Some(Exclusivity::ContextExclusive),
            _ => None,
        }
    }

    /// Lenient parse falling back to `Exclusive`.
    pub fn parse_or_exclusive(s: &str) -> Self {
        Self::parse(s).unwrap_or_else(|| {
            tracing::warn!(value = s, "unrecognized exclusivity, treating as EXCLUSIVE");
            Exclusivity::Exclusive
        })
    }
}

impl fmt::Display for Exclusivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Exclusivity {
    fn from(s: String) -> Self {
        Exclusivity::parse_or_exclusive(&s)
    }
}

impl From<Exclusivity> for String {
    fn from(e: Exclusivity) -> Self {
        e.as_str().to_string()
    }
}
