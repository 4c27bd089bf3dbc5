use been_model::TaskState;

/// Result of one scheduling attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// Task placed and the run request sent.
    Dispatched,
    /// No eligible runtime; the task waits in the backlog.
    Backlogged,
    /// The run request could not be delivered; the scanner will retry.
    SendFailed,
}

impl ScheduleOutcome {
    pub fn as_label(self) -> &'static str {
        match self {
            ScheduleOutcome::Dispatched => "dispatched",
            ScheduleOutcome::Backlogged => "backlogged",
            ScheduleOutcome::SendFailed => "send_failed",
        }
    }
}

/// Metrics sink of the orchestrator. Implementations must be cheap and non-blocking.
pub trait MetricsBackend: Send + Sync {
    fn record_task_submitted(&self);
    fn record_schedule(&self, outcome: ScheduleOutcome);
    fn record_transition(&self, to: TaskState);
    fn record_illegal_transition(&self, from: TaskState, to: TaskState);
    fn set_backlog_size(&self, size: usize);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsBackend for NoopMetrics {
    fn record_task_submitted(&self) {}
    fn record_schedule(&self, _outcome: ScheduleOutcome) {}
    fn record_transition(&self, _to: TaskState) {}
    fn record_illegal_transition(&self, _from: TaskState, _to: TaskState) {}
    fn set_backlog_size(&self, _size: usize) {}
}
