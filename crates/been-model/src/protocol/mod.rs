//! Cluster messages.
//!
//! Two channels exist: the broadcast topic every node listens on and one
//! point-to-point inbox per runtime. A [`Message`] is an envelope around a
//! tagged [`MessageBody`]; on the wire it looks like
//! `{"tag": "...", "senderId": "...", "receiverId": ...|null, "payload": {...}}`.

use serde::{Deserialize, Serialize};

use crate::{NodeId, OperationId, RuntimeId, TaskId};

/// Name of the cluster-wide broadcast topic.
pub const GLOBAL_TOPIC: &str = "been.global";

/// Inbox a runtime consumes point-to-point messages from.
pub fn inbox_name(runtime: &RuntimeId) -> String {
    format!("inbox/{runtime}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tag", content = "payload", rename_all_fields = "camelCase")]
pub enum MessageBody {
    /// Start the task now.
    RunTask { task_id: TaskId },
    /// Terminate the task regardless of phase.
    KillTask { task_id: TaskId, reason: String },
    /// The task working directory may be reclaimed.
    DeleteTaskWrkDir {
        task_id: TaskId,
        operation_id: OperationId,
    },
    TaskStarted { task_id: TaskId },
    TaskFinished {
        task_id: TaskId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
    },
    TaskKilled {
        task_id: TaskId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    NodeRegistered { reason: String },
    NodeTerminated { reason: String },
}

impl MessageBody {
    pub fn tag(&self) -> &'static str {
        match self {
            MessageBody::RunTask { .. } => "RunTask",
            MessageBody::KillTask { .. } => "KillTask",
            MessageBody::DeleteTaskWrkDir { .. } => "DeleteTaskWrkDir",
            MessageBody::TaskStarted { .. } => "TaskStarted",
            MessageBody::TaskFinished { .. } => "TaskFinished",
            MessageBody::TaskKilled { .. } => "TaskKilled",
            MessageBody::NodeRegistered { .. } => "NodeRegistered",
            MessageBody::NodeTerminated { .. } => "NodeTerminated",
        }
    }

    /// Whether the message belongs on the broadcast topic rather than an inbox.
    pub fn is_broadcast(&self) -> bool {
        !matches!(
            self,
            MessageBody::RunTask { .. }
                | MessageBody::KillTask { .. }
                | MessageBody::DeleteTaskWrkDir { .. }
        )
    }

    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            MessageBody::RunTask { task_id }
            | MessageBody::KillTask { task_id, .. }
            | MessageBody::DeleteTaskWrkDir { task_id, .. }
            | MessageBody::TaskStarted { task_id }
            | MessageBody::TaskFinished { task_id, .. }
            | MessageBody::TaskKilled { task_id, .. } => Some(task_id),
            MessageBody::NodeRegistered { .. } | MessageBody::NodeTerminated { .. } => None,
        }
    }
}

/// Immutable message envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    sender_id: NodeId,
    receiver_id: Option<NodeId>,
    #[serde(flatten)]
    body: MessageBody,
}

impl Message {
    /// Broadcast message; no receiver.
    pub fn broadcast(sender: NodeId, body: MessageBody) -> Self {
        Self {
            sender_id: sender,
            receiver_id: None,
            body,
        }
    }

    /// Point-to-point message addressed to `receiver`.
    pub fn direct(sender: NodeId, receiver: NodeId, body: MessageBody) -> Self {
        Self {
            sender_id: sender,
            receiver_id: Some(receiver),
            body,
        }
    }

    pub fn sender_id(&self) -> &NodeId {
        &self.sender_id
    }

    pub fn receiver_id(&self) -> Option<&NodeId> {
        self.receiver_id.as_ref()
    }

    pub fn body(&self) -> &MessageBody {
        &self.body
    }

    pub fn into_body(self) -> MessageBody {
        self.body
    }

    pub fn tag(&self) -> &'static str {
        self.body.tag()
    }
}
