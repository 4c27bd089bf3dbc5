use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{ContextId, ModelError, TaskDescriptor, TaskId, TaskProperties, TaskState, TaskTreeAddress, TimestampMs, now_ms};

/// Aggregate state of a context, derived from its member tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskContextState {
    Waiting,
    Running,
    Finished,
    Failed,
}

impl TaskContextState {
    /// Derive the context state from member task states.
    ///
    /// - no members, or every member still `Created`/`Submitted`: `Waiting`;
    /// - every member terminal: `Failed` if any was aborted, otherwise `Finished`;
    /// - anything else: `Running`.
    pub fn derive<I>(states: I) -> Self
    where
        I: IntoIterator<Item = TaskState>,
    {
        let mut any = false;
        let mut all_pending = true;
        let mut all_terminal = true;
        let mut any_aborted = false;

        for s in states {
            any = true;
            all_pending &= matches!(s, TaskState::Created | TaskState::Submitted);
            all_terminal &= s.is_terminal();
            any_aborted |= s == TaskState::Aborted;
        }

        if !any || all_pending {
            TaskContextState::Waiting
        } else if all_terminal && any_aborted {
            TaskContextState::Failed
        } else if all_terminal {
            TaskContextState::Finished
        } else {
            TaskContextState::Running
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskContextState::Finished | TaskContextState::Failed)
    }
}

/// Where a declared task takes its descriptor from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskSource {
    Inline(TaskDescriptor),
    /// Name of a template declared on the context.
    Template(String),
}

/// One task of a context submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDeclaration {
    pub name: String,
    pub source: TaskSource,
    #[serde(default)]
    pub properties: TaskProperties,
}

impl TaskDeclaration {
    pub fn inline(name: impl Into<String>, descriptor: TaskDescriptor) -> Self {
        Self {
            name: name.into(),
            source: TaskSource::Inline(descriptor),
            properties: TaskProperties::new(),
        }
    }

    pub fn from_template(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: TaskSource::Template(template.into()),
            properties: TaskProperties::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.push(key, value);
        self
    }
}

/// A group of related tasks submitted together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskContextDescriptor {
    pub name: String,
    #[serde(default)]
    pub properties: TaskProperties,
    #[serde(default)]
    pub templates: BTreeMap<String, TaskDescriptor>,
    #[serde(default)]
    pub tasks: Vec<TaskDeclaration>,
}

impl TaskContextDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.push(key, value);
        self
    }

    pub fn with_template(mut self, name: impl Into<String>, descriptor: TaskDescriptor) -> Self {
        self.templates.insert(name.into(), descriptor);
        self
    }

    pub fn with_task(mut self, task: TaskDeclaration) -> Self {
        self.tasks.push(task);
        self
    }

    /// Produce the final descriptor of every declared task.
    ///
    /// Properties are layered context, then descriptor or template, then declaration;
    /// the declaration name replaces the descriptor name.
    pub fn resolve(&self) -> Result<Vec<TaskDescriptor>, ModelError> {
        self.tasks
            .iter()
            .map(|decl| {
                let base = match &decl.source {
                    TaskSource::Inline(d) => d,
                    TaskSource::Template(name) => {
                        self.templates
                            .get(name)
                            .ok_or_else(|| ModelError::UnknownTemplate {
                                context: self.name.clone(),
                                template: name.clone(),
                            })?
                    }
                };
                TaskTreeAddress::validate_segment(&decl.name)?;

                let mut d = base.clone();
                d.name = decl.name.clone();
                d.properties = self
                    .properties
                    .merged(&base.properties)
                    .merged(&decl.properties);
                Ok(d)
            })
            .collect()
    }
}

/// Stored record of a submitted context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskContextEntry {
    pub id: ContextId,
    pub name: String,
    pub tasks: Vec<TaskId>,
    pub state: TaskContextState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<TaskTreeAddress>,
    #[serde(default)]
    pub properties: TaskProperties,
    pub created_at_ms: TimestampMs,
    /// Set once the context turned terminal; the entry may be removed after this instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at_ms: Option<TimestampMs>,
}

impl TaskContextEntry {
    pub fn new(id: ContextId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            tasks: Vec::new(),
            state: TaskContextState::Waiting,
            address: None,
            properties: TaskProperties::new(),
            created_at_ms: now_ms(),
            expires_at_ms: None,
        }
    }
}
