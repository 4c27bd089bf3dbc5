use std::{borrow::Borrow, fmt};

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Cluster-unique task identifier.
    TaskId
);
string_id!(
    /// Identifier of a task context.
    ContextId
);
string_id!(
    /// Identifier of a host runtime (worker node).
    RuntimeId
);
string_id!(
    /// Identifier of any cluster member (orchestrators and runtimes alike).
    NodeId
);
string_id!(
    /// Deduplication key for retried control operations.
    OperationId
);

impl From<RuntimeId> for NodeId {
    fn from(id: RuntimeId) -> Self {
        NodeId(id.0)
    }
}

impl From<&RuntimeId> for NodeId {
    fn from(id: &RuntimeId) -> Self {
        NodeId(id.0.clone())
    }
}
