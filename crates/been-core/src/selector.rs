use rand::{Rng, seq::SliceRandom};
use serde::Deserialize;
use tracing::{debug, trace};

use been_model::{Exclusivity, PlacementQuery, RuntimeId, RuntimeInfo, TaskDescriptor, TaskEntry};

use crate::NoRuntimeFound;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Cluster-wide cap on tasks per runtime; the effective cap is the lower of this and the runtime's own.
    pub max_tasks: u32,
    /// Runtimes above this memory pressure are not considered.
    pub max_memory_pressure: f64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            max_tasks: 16,
            max_memory_pressure: 0.9,
        }
    }
}

impl SelectorConfig {
    pub fn with_max_tasks(mut self, n: u32) -> Self {
        self.max_tasks = n;
        self
    }

    pub fn with_max_memory_pressure(mut self, p: f64) -> Self {
        self.max_memory_pressure = p;
        self
    }
}

/// How a task is placed. Chosen once per task from its descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionStrategy {
    RandomEligibility,
    PredicateQuery(PlacementQuery),
}

impl SelectionStrategy {
    pub fn for_descriptor(descriptor: &TaskDescriptor) -> Self {
        match &descriptor.query {
            Some(q) => SelectionStrategy::PredicateQuery(q.clone()),
            None => SelectionStrategy::RandomEligibility,
        }
    }
}

/// Picks the runtime a task goes to.
#[derive(Debug, Clone, Default)]
pub struct Selector {
    config: SelectorConfig,
}

impl Selector {
    pub fn new(config: SelectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    pub fn select(
        &self,
        task: &TaskEntry,
        runtimes: &[RuntimeInfo],
    ) -> Result<RuntimeId, NoRuntimeFound> {
        self.select_with(task, runtimes, &mut rand::rng())
    }

    /// Same as [`Selector::select`] with a caller supplied random source.
    pub fn select_with<R: Rng + ?Sized>(
        &self,
        task: &TaskEntry,
        runtimes: &[RuntimeInfo],
        rng: &mut R,
    ) -> Result<RuntimeId, NoRuntimeFound> {
        let mut candidates: Vec<&RuntimeInfo> = runtimes
            .iter()
            .filter(|r| {
                let overloaded = self.is_overloaded(r);
                let compatible = Self::is_compatible(r, task);
                trace!(task_id = %task.id(), runtime_id = %r.id, overloaded, compatible, "candidate");
                !overloaded && compatible
            })
            .collect();

        let chosen = match SelectionStrategy::for_descriptor(task.descriptor()) {
            SelectionStrategy::RandomEligibility => {
                candidates.shuffle(rng);
                // stable: equal loads keep their shuffled order
                candidates.sort_by_key(|r| r.task_count);
                candidates.first().copied()
            }
            SelectionStrategy::PredicateQuery(query) => candidates
                .into_iter()
                .filter(|r| query.evaluate(&r.attributes))
                .min_by(|a, b| a.task_count.cmp(&b.task_count).then_with(|| a.id.cmp(&b.id))),
        };

        match chosen {
            Some(r) => {
                debug!(task_id = %task.id(), runtime_id = %r.id, "runtime selected");
                Ok(r.id.clone())
            }
            None => Err(NoRuntimeFound {
                task_id: task.id().clone(),
            }),
        }
    }

    /// At or above the task cap, or above the memory pressure limit.
    pub fn is_overloaded(&self, runtime: &RuntimeInfo) -> bool {
        let cap = runtime.max_tasks.min(self.config.max_tasks);
        runtime.task_count >= cap || runtime.memory_pressure > self.config.max_memory_pressure
    }

    /// Whether the runtime's current exclusivity mode admits the task.
    ///
    /// Host runtimes apply the same rule when a run request arrives.
    pub fn is_compatible(runtime: &RuntimeInfo, task: &TaskEntry) -> bool {
        let wants = task.descriptor().exclusivity;
        match runtime.exclusivity {
            Exclusivity::NonExclusive => match wants {
                Exclusivity::NonExclusive => true,
                Exclusivity::Exclusive | Exclusivity::ContextExclusive => runtime.is_idle(),
            },
            Exclusivity::ContextExclusive => {
                wants != Exclusivity::Exclusive
                    && runtime.reserved_for.as_ref() == Some(task.context_id())
            }
            Exclusivity::Exclusive => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use been_model::{ContextId, TaskId};
    use rand::{SeedableRng, rngs::StdRng};

    fn task(ctx: &str, mode: Exclusivity) -> TaskEntry {
        TaskEntry::create(
            TaskId::from("T1"),
            TaskDescriptor::new("t", "/bin/true").with_exclusivity(mode),
            ContextId::from(ctx),
        )
    }

    fn rt(id: &str, count: u32) -> RuntimeInfo {
        RuntimeInfo::new(RuntimeId::from(id), 8).with_task_count(count)
    }

    fn selector() -> Selector {
        Selector::new(SelectorConfig::default().with_max_tasks(4).with_max_memory_pressure(0.8))
    }

    #[test]
    fn prefers_lighter_runtime() {
        let s = selector();
        let runtimes = [rt("R1", 3), rt("R2", 0), rt("R3", 1)];
        for seed in 0..16 {
            let got = s
                .select_with(&task("C", Exclusivity::NonExclusive), &runtimes, &mut StdRng::seed_from_u64(seed))
                .unwrap();
            assert_eq!(got.as_str(), "R2");
        }
    }

    #[test]
    fn ties_are_randomized() {
        let s = selector();
        let runtimes = [rt("R1", 0), rt("R2", 0)];
        let mut seen = std::collections::BTreeSet::new();
        for seed in 0..64 {
            let got = s
                .select_with(&task("C", Exclusivity::NonExclusive), &runtimes, &mut StdRng::seed_from_u64(seed))
                .unwrap();
            seen.insert(got);
        }
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn overloaded_runtimes_are_skipped() {
        let s = selector();
        // config caps at 4, runtime caps at 8
        assert!(s.is_overloaded(&rt("R1", 4)));
        assert!(!s.is_overloaded(&rt("R1", 3)));
        // runtime's own cap wins when lower
        assert!(s.is_overloaded(&RuntimeInfo::new(RuntimeId::from("R1"), 2).with_task_count(2)));
        assert!(s.is_overloaded(&rt("R1", 0).with_memory_pressure(0.95)));
        assert!(!s.is_overloaded(&rt("R1", 0).with_memory_pressure(0.8)));

        let err = s
            .select(&task("C", Exclusivity::NonExclusive), &[rt("R1", 4)])
            .unwrap_err();
        assert_eq!(err.task_id.as_str(), "T1");
    }

    #[test]
    fn exclusive_task_needs_idle_runtime() {
        let s = selector();
        let t = task("C", Exclusivity::Exclusive);

        assert!(s.select(&t, &[rt("R1", 1)]).is_err());
        assert_eq!(s.select(&t, &[rt("R1", 1), rt("R2", 0)]).unwrap().as_str(), "R2");
    }

    #[test]
    fn exclusive_runtime_accepts_nothing() {
        let s = selector();
        let busy = rt("R1", 1).with_exclusivity(Exclusivity::Exclusive, None);
        for mode in [Exclusivity::NonExclusive, Exclusivity::Exclusive, Exclusivity::ContextExclusive] {
            assert!(s.select(&task("C", mode), std::slice::from_ref(&busy)).is_err());
        }
    }

    #[test]
    fn context_exclusive_runtime_only_takes_its_context() {
        let s = selector();
        let pinned = rt("R1", 1).with_exclusivity(Exclusivity::ContextExclusive, Some(ContextId::from("C")));
        let runtimes = std::slice::from_ref(&pinned);

        assert!(s.select(&task("C", Exclusivity::NonExclusive), runtimes).is_ok());
        assert!(s.select(&task("C", Exclusivity::ContextExclusive), runtimes).is_ok());
        assert!(s.select(&task("C", Exclusivity::Exclusive), runtimes).is_err());
        assert!(s.select(&task("D", Exclusivity::NonExclusive), runtimes).is_err());
    }

    #[test]
    fn context_exclusive_task_needs_idle_open_runtime() {
        let s = selector();
        let t = task("C", Exclusivity::ContextExclusive);
        assert!(s.select(&t, &[rt("R1", 2)]).is_err());
        assert!(s.select(&t, &[rt("R1", 0)]).is_ok());
    }

    #[test]
    fn predicate_strategy_picks_lightest_match() {
        let s = selector();
        let q = PlacementQuery::eq("os", "linux");
        let t = TaskEntry::create(
            TaskId::from("T1"),
            TaskDescriptor::new("t", "/bin/true").with_query(q),
            ContextId::from("C"),
        );
        let runtimes = [
            rt("R1", 0).with_attribute("os", "windows"),
            rt("R2", 2).with_attribute("os", "linux"),
            rt("R3", 1).with_attribute("os", "linux"),
            rt("R4", 1).with_attribute("os", "linux"),
        ];
        assert_eq!(s.select(&t, &runtimes).unwrap().as_str(), "R3");

        assert!(s.select(&t, &runtimes[..1]).is_err());
    }

    #[test]
    fn strategy_follows_descriptor() {
        let plain = TaskDescriptor::new("t", "/bin/true");
        assert_eq!(SelectionStrategy::for_descriptor(&plain), SelectionStrategy::RandomEligibility);

        let q = PlacementQuery::exists("gpu");
        let with_q = plain.with_query(q.clone());
        assert_eq!(SelectionStrategy::for_descriptor(&with_q), SelectionStrategy::PredicateQuery(q));
    }
}
