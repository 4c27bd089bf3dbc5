use been_model::{TaskEntry, TaskState};

use crate::IllegalTransition;

/// Move `entry` to `target`, appending exactly one state change record.
///
/// Pure: nothing is persisted. The entry is consumed; on failure it is dropped
/// and the error names the offending pair.
pub fn transition(
    entry: TaskEntry,
    target: TaskState,
    reason: impl Into<String>,
) -> Result<TaskEntry, IllegalTransition> {
    let from = entry.state();
    if !from.can_transition_to(target) {
        return Err(IllegalTransition {
            task_id: entry.id().clone(),
            from,
            to: target,
        });
    }
    Ok(entry.record_state(target, reason))
}

/// Reach `target` through legal single steps.
///
/// Used when intermediate notifications were lost or are implied, e.g. a
/// `TaskFinished` arriving for a `Running` task walks through `Sleeping`.
/// Direct moves (abort, revert to `Submitted`) are taken as one step.
/// Every intermediate state gets its own record; the last record carries `reason`.
pub fn advance_to(
    entry: TaskEntry,
    target: TaskState,
    reason: impl Into<String>,
) -> Result<TaskEntry, IllegalTransition> {
    let from = entry.state();
    let illegal = |entry: &TaskEntry| IllegalTransition {
        task_id: entry.id().clone(),
        from,
        to: target,
    };

    if from.can_transition_to(target) {
        return transition(entry, target, reason);
    }
    if from.is_terminal() || target.ordinal() <= from.ordinal() {
        return Err(illegal(&entry));
    }

    let mut cur = entry;
    while let Some(next) = cur.state().successor() {
        if next == target {
            return transition(cur, target, reason);
        }
        cur = transition(cur, next, implied_reason(next))?;
    }
    Err(illegal(&cur))
}

fn implied_reason(state: TaskState) -> &'static str {
    match state {
        TaskState::Submitted => "task submitted",
        TaskState::Scheduled => "task scheduled",
        TaskState::Running => "task process started",
        TaskState::Sleeping => "task process exited",
        _ => "implied transition",
    }
}
