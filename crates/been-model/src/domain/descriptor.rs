use serde::{Deserialize, Serialize};

use crate::{Exclusivity, PlacementQuery, TaskProperties};

/// Immutable description of what to run and where it may run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDescriptor {
    /// Human readable task name, also the leaf name in the task tree.
    pub name: String,
    /// Executable to launch on the runtime.
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment passed to the process.
    #[serde(default)]
    pub env: TaskProperties,
    /// Free-form task properties, merged with context properties on submission.
    #[serde(default)]
    pub properties: TaskProperties,
    #[serde(default)]
    pub exclusivity: Exclusivity,
    /// When set, placement goes through predicate evaluation instead of random eligibility.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<PlacementQuery>,
    /// Overrides the orchestrator dispatch timeout for this task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatch_timeout_ms: Option<u64>,
}

impl TaskDescriptor {
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push(key, value);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.push(key, value);
        self
    }

    pub fn with_exclusivity(mut self, exclusivity: Exclusivity) -> Self {
        self.exclusivity = exclusivity;
        self
    }

    pub fn with_query(mut self, query: PlacementQuery) -> Self {
        self.query = Some(query);
        self
    }

    pub fn with_dispatch_timeout_ms(mut self, ms: u64) -> Self {
        self.dispatch_timeout_ms = Some(ms);
        self
    }
}
