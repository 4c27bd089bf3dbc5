use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a task entry.
///
/// Variants are declared in lifecycle order; [`TaskState::ordinal`] reflects that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Entry exists but has not been handed to an orchestrator yet.
    Created,
    /// Waiting for placement on a runtime.
    Submitted,
    /// Placed on a runtime, run request sent.
    Scheduled,
    /// The runtime reported the process as started.
    Running,
    /// The process exited; the runtime is wrapping up.
    Sleeping,
    /// Completed normally.
    Finished,
    /// Terminated abnormally or on request.
    Aborted,
}

impl TaskState {
    pub const ALL: [TaskState; 7] = [
        TaskState::Created,
        TaskState::Submitted,
        TaskState::Scheduled,
        TaskState::Running,
        TaskState::Sleeping,
        TaskState::Finished,
        TaskState::Aborted,
    ];

    pub fn ordinal(self) -> u8 {
        self as u8
    }

    /// The state one ordinal step ahead, if any.
    pub fn successor(self) -> Option<TaskState> {
        Self::ALL.get(self.ordinal() as usize + 1).copied()
    }

    /// Returns `true` for `Finished` and `Aborted`.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Finished | TaskState::Aborted)
    }

    /// Legality of `self -> target`.
    ///
    /// - nothing leaves a terminal state;
    /// - `Aborted` is reachable from every other state;
    /// - one ordinal step forward is always legal;
    /// - `Scheduled -> Submitted` is legal (runtime declined the task).
    pub fn can_transition_to(self, target: TaskState) -> bool {
        if self.is_terminal() {
            return false;
        }
        if target == TaskState::Aborted {
            return true;
        }
        if self.successor() == Some(target) {
            return true;
        }
        self == TaskState::Scheduled && target == TaskState::Submitted
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Created => "CREATED",
            TaskState::Submitted => "SUBMITTED",
            TaskState::Scheduled => "SCHEDULED",
            TaskState::Running => "RUNNING",
            TaskState::Sleeping => "SLEEPING",
            TaskState::Finished => "FINISHED",
            TaskState::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::TaskState::{self, *};

    #[test]
    fn ordinals_follow_declaration_order() {
        for (i, s) in TaskState::ALL.iter().enumerate() {
            assert_eq!(s.ordinal() as usize, i);
        }
        assert_eq!(Aborted.successor(), None);
        assert_eq!(Running.successor(), Some(Sleeping));
    }

    #[test]
    fn transition_table_matches_rules() {
        for from in TaskState::ALL {
            for to in TaskState::ALL {
                let expected = !from.is_terminal()
                    && (to == Aborted
                        || to.ordinal() == from.ordinal() + 1
                        || (from == Scheduled && to == Submitted));
                assert_eq!(
                    from.can_transition_to(to),
                    expected,
                    "{from} -> {to} legality mismatch"
                );
            }
        }
    }

    #[test]
    fn terminal_states_reject_everything() {
        for to in TaskState::ALL {
            assert!(!Finished.can_transition_to(to));
            assert!(!Aborted.can_transition_to(to));
        }
    }

    #[test]
    fn serde_uses_upper_case_names() {
        let json = serde_json::to_string(&Scheduled).unwrap();
        assert_eq!(json, r#""SCHEDULED""#);
        let back: TaskState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Scheduled);
    }
}
