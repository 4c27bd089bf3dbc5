use tracing::{debug, info, trace, warn};

use been_model::{Message, MessageBody};

/// Human readable description of a message kind.
#[inline]
pub fn message_for(body: &MessageBody) -> &'static str {
    match body {
        // control
        MessageBody::RunTask { .. } => "run request sent to runtime",
        MessageBody::KillTask { .. } => "kill request sent to runtime",
        MessageBody::DeleteTaskWrkDir { .. } => "working directory may be reclaimed",

        // lifecycle
        MessageBody::TaskStarted { .. } => "task process started",
        MessageBody::TaskFinished { .. } => "task process finished",
        MessageBody::TaskKilled { .. } => "task process killed",

        // membership
        MessageBody::NodeRegistered { .. } => "node joined the cluster",
        MessageBody::NodeTerminated { .. } => "node left the cluster",
    }
}

/// Writes cluster messages to the log, one line per message.
///
/// Membership changes and kills log at `info`/`warn`, routine lifecycle traffic at `debug`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageJournal;

impl MessageJournal {
    pub fn new() -> Self {
        Self
    }

    pub fn record(&self, message: &Message) {
        let msg = message_for(message.body());
        let sender = message.sender_id().as_str();

        match message.body() {
            MessageBody::RunTask { task_id } => {
                trace!(sender, task_id = %task_id, "{msg}")
            }
            MessageBody::KillTask { task_id, reason } => {
                debug!(sender, task_id = %task_id, reason = %reason, "{msg}")
            }
            MessageBody::DeleteTaskWrkDir {
                task_id,
                operation_id,
            } => {
                trace!(sender, task_id = %task_id, operation_id = %operation_id, "{msg}")
            }

            MessageBody::TaskStarted { task_id } => {
                debug!(sender, task_id = %task_id, "{msg}")
            }
            MessageBody::TaskFinished { task_id, exit_code } => match exit_code {
                Some(0) | None => debug!(sender, task_id = %task_id, "{msg}"),
                Some(code) => info!(sender, task_id = %task_id, exit_code = code, "{msg}"),
            },
            MessageBody::TaskKilled { task_id, reason } => warn!(
                sender,
                task_id = %task_id,
                reason = reason.as_deref().unwrap_or("unknown"),
                "{msg}"
            ),

            MessageBody::NodeRegistered { reason } => {
                info!(sender, reason = %reason, "{msg}")
            }
            MessageBody::NodeTerminated { reason } => {
                warn!(sender, reason = %reason, "{msg}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use been_model::{NodeId, TaskId};

    #[test]
    fn every_tag_has_a_description() {
        let t = TaskId::from("T1");
        let bodies = [
            MessageBody::RunTask { task_id: t.clone() },
            MessageBody::TaskStarted { task_id: t.clone() },
            MessageBody::TaskFinished {
                task_id: t.clone(),
                exit_code: Some(3),
            },
            MessageBody::TaskKilled {
                task_id: t,
                reason: None,
            },
            MessageBody::NodeTerminated {
                reason: "bye".into(),
            },
        ];
        for body in bodies {
            assert!(!message_for(&body).is_empty());
            // no subscriber installed: must not panic
            MessageJournal::new().record(&Message::broadcast(NodeId::from("N1"), body));
        }
    }
}
