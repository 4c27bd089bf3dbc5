use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry, proto::MetricFamily};

use been_core::{MetricsBackend, ScheduleOutcome};
use been_model::TaskState;

/// Orchestrator metrics registered in a private [`Registry`].
///
/// Clones share the same collectors.
#[derive(Clone)]
pub struct PrometheusMetrics {
    registry: Registry,
    submitted: IntCounter,
    schedule: IntCounterVec,
    transitions: IntCounterVec,
    illegal: IntCounterVec,
    backlog: IntGauge,
}

impl PrometheusMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let submitted = IntCounter::with_opts(Opts::new(
            "been_tasks_submitted_total",
            "Tasks accepted for scheduling",
        ))?;
        let schedule = IntCounterVec::new(
            Opts::new("been_schedule_total", "Scheduling attempts by outcome"),
            &["outcome"],
        )?;
        let transitions = IntCounterVec::new(
            Opts::new(
                "been_task_transitions_total",
                "Task state changes by target state",
            ),
            &["state"],
        )?;
        let illegal = IntCounterVec::new(
            Opts::new(
                "been_illegal_transitions_total",
                "Rejected task state changes",
            ),
            &["from", "to"],
        )?;
        let backlog = IntGauge::with_opts(Opts::new(
            "been_backlog_size",
            "Submitted tasks waiting for a runtime",
        ))?;

        registry.register(Box::new(submitted.clone()))?;
        registry.register(Box::new(schedule.clone()))?;
        registry.register(Box::new(transitions.clone()))?;
        registry.register(Box::new(illegal.clone()))?;
        registry.register(Box::new(backlog.clone()))?;

        Ok(Self {
            registry,
            submitted,
            schedule,
            transitions,
            illegal,
            backlog,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn gather(&self) -> Vec<MetricFamily> {
        self.registry.gather()
    }
}

impl MetricsBackend for PrometheusMetrics {
    fn record_task_submitted(&self) {
        self.submitted.inc();
    }

    fn record_schedule(&self, outcome: ScheduleOutcome) {
        self.schedule.with_label_values(&[outcome.as_label()]).inc();
    }

    fn record_transition(&self, to: TaskState) {
        self.transitions.with_label_values(&[to.as_str()]).inc();
    }

    fn record_illegal_transition(&self, from: TaskState, to: TaskState) {
        self.illegal
            .with_label_values(&[from.as_str(), to.as_str()])
            .inc();
    }

    fn set_backlog_size(&self, size: usize) {
        self.backlog.set(size as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{Encoder, TextEncoder};

    fn render(m: &PrometheusMetrics) -> String {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&m.gather(), &mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn counters_carry_their_labels() {
        let m = PrometheusMetrics::new().unwrap();
        m.record_task_submitted();
        m.record_schedule(ScheduleOutcome::Dispatched);
        m.record_schedule(ScheduleOutcome::Backlogged);
        m.record_schedule(ScheduleOutcome::Backlogged);
        m.record_transition(TaskState::Running);
        m.record_illegal_transition(TaskState::Finished, TaskState::Running);

        let out = render(&m);
        assert!(out.contains("been_tasks_submitted_total 1"));
        assert!(out.contains(r#"been_schedule_total{outcome="dispatched"} 1"#));
        assert!(out.contains(r#"been_schedule_total{outcome="backlogged"} 2"#));
        assert!(out.contains(r#"been_task_transitions_total{state="RUNNING"} 1"#));
        assert!(out.contains(r#"been_illegal_transitions_total{from="FINISHED",to="RUNNING"} 1"#));
    }

    #[test]
    fn backlog_gauge_follows_the_last_value() {
        let m = PrometheusMetrics::new().unwrap();
        m.set_backlog_size(5);
        m.set_backlog_size(2);
        assert!(render(&m).contains("been_backlog_size 2"));
    }

    #[test]
    fn clones_share_collectors() {
        let m = PrometheusMetrics::new().unwrap();
        let c = m.clone();
        c.record_task_submitted();
        assert!(render(&m).contains("been_tasks_submitted_total 1"));
    }
}
