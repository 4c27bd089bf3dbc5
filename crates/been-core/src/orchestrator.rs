use std::{
    collections::{BTreeSet, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use serde::Deserialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use been_model::{
    ContextId, Message, MessageBody, NodeId, OperationId, RuntimeId, TaskContextDescriptor,
    TaskContextEntry, TaskContextState, TaskDescriptor, TaskEntry, TaskId, TaskState,
    TaskTreeAddress, now_ms,
};

use crate::{
    ClusterStore, Contexts, CoreError, IllegalTransition, MessageSender, MessagingSession,
    MetricsBackend, NoopMetrics, RegistryView, ScheduleOutcome, Selector, TaskTree, Tasks,
    TypedMap, advance_to, system, transition,
};

/// Tree node every submitted context is published under.
const CONTEXTS_NODE: &str = "contexts";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// A scheduled task not confirmed as started within this window is re-dispatched.
    pub dispatch_timeout_ms: u64,
    pub scan_interval_ms: u64,
    /// Extra attempts of a compare-and-swap after a version conflict.
    pub cas_retries: u32,
    /// How long a finished or failed context stays in the cluster.
    pub context_ttl_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            dispatch_timeout_ms: 30_000,
            scan_interval_ms: 5_000,
            cas_retries: 8,
            context_ttl_ms: 10 * 60 * 1_000,
        }
    }
}

impl OrchestratorConfig {
    pub fn with_dispatch_timeout_ms(mut self, ms: u64) -> Self {
        self.dispatch_timeout_ms = ms;
        self
    }

    pub fn with_scan_interval_ms(mut self, ms: u64) -> Self {
        self.scan_interval_ms = ms;
        self
    }

    pub fn with_cas_retries(mut self, n: u32) -> Self {
        self.cas_retries = n;
        self
    }

    pub fn with_context_ttl_ms(mut self, ms: u64) -> Self {
        self.context_ttl_ms = ms;
        self
    }
}

/// What one [`Orchestrator::scan`] pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Scheduled tasks reverted to submitted (timeout or vanished runtime).
    pub redispatched: usize,
    /// Running tasks aborted because their runtime vanished.
    pub aborted: usize,
    /// Submitted tasks that went through selection again.
    pub retried: usize,
    /// Contexts removed after their TTL.
    pub expired: usize,
}

/// Accepts tasks, places them on runtimes and follows their lifecycle.
///
/// The orchestrator keeps no task state of its own besides the backlog of ids
/// waiting for a runtime; entries live in the cluster store and every change is
/// a compare-and-swap, so several orchestrators may run side by side. Each one
/// only reacts to lifecycle messages of tasks it owns.
pub struct Orchestrator {
    node_id: NodeId,
    tasks: TypedMap<Tasks>,
    contexts: TypedMap<Contexts>,
    registry: RegistryView,
    selector: Selector,
    tree: TaskTree,
    sender: MessageSender,
    backlog: Mutex<BTreeSet<TaskId>>,
    metrics: Arc<dyn MetricsBackend>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn ClusterStore>,
        sender: MessageSender,
        registry: RegistryView,
        selector: Selector,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            node_id: sender.node_id().clone(),
            tasks: TypedMap::new(store.clone()),
            contexts: TypedMap::new(store.clone()),
            registry,
            selector,
            tree: TaskTree::new(store, config.cas_retries),
            sender,
            backlog: Mutex::new(BTreeSet::new()),
            metrics: Arc::new(NoopMetrics),
            config,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsBackend>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn tree(&self) -> &TaskTree {
        &self.tree
    }

    pub async fn task(&self, id: &TaskId) -> Result<Option<TaskEntry>, CoreError> {
        Ok(self.tasks.get(id).await?.map(|v| v.value))
    }

    pub async fn context(&self, id: &ContextId) -> Result<Option<TaskContextEntry>, CoreError> {
        Ok(self.contexts.get(id).await?.map(|v| v.value))
    }

    /// Ids waiting for an eligible runtime, sorted.
    pub fn backlog(&self) -> Vec<TaskId> {
        self.lock_backlog().iter().cloned().collect()
    }

    /// Store a new task as submitted and try to place it right away.
    ///
    /// Not finding a runtime is not an error: the task stays submitted in the backlog.
    #[instrument(skip_all, fields(task = %descriptor.name, context_id = %context_id))]
    pub async fn submit(
        &self,
        descriptor: TaskDescriptor,
        context_id: ContextId,
    ) -> Result<TaskId, CoreError> {
        let id = TaskId::new(system::generate_id());
        let entry = transition(
            TaskEntry::create(id.clone(), descriptor, context_id.clone()),
            TaskState::Submitted,
            "task submitted",
        )?
        .with_owner(Some(self.node_id.clone()));

        self.tasks.put(&id, &entry).await?;
        self.attach_to_context(&context_id, &id).await?;
        self.metrics.record_task_submitted();
        self.metrics.record_transition(TaskState::Submitted);
        info!(task_id = %id, "task submitted");

        self.try_schedule(&id).await;
        self.refresh_context(&context_id).await;
        Ok(id)
    }

    /// Submit every task of a context and publish them under `/contexts/{name}/{task}`.
    #[instrument(skip_all, fields(context = %descriptor.name))]
    pub async fn submit_context(
        &self,
        descriptor: TaskContextDescriptor,
    ) -> Result<TaskContextEntry, CoreError> {
        let resolved = descriptor.resolve()?;
        let address = TaskTreeAddress::root()
            .child(CONTEXTS_NODE)?
            .child(&descriptor.name)?;

        let mut names = BTreeSet::new();
        for d in &resolved {
            if !names.insert(d.name.as_str()) {
                return Err(CoreError::AddressTaken(address.child(&d.name)?.to_string()));
            }
        }
        self.tree.create_node(&address).await?;

        let ctx_id = ContextId::new(system::generate_id());
        let mut placed = Vec::with_capacity(resolved.len());
        let entries = match self
            .store_context(&ctx_id, &descriptor, &address, resolved, &mut placed)
            .await
        {
            Ok(entries) => entries,
            Err(e) => {
                warn!(context_id = %ctx_id, error = %e, "context submission failed, rolling back");
                self.rollback_context(&ctx_id, &address, &placed).await;
                return Err(e);
            }
        };
        for _ in &entries {
            self.metrics.record_task_submitted();
            self.metrics.record_transition(TaskState::Submitted);
        }
        info!(context_id = %ctx_id, tasks = entries.len(), "context submitted");

        for e in &entries {
            self.try_schedule(e.id()).await;
        }
        self.refresh_context(&ctx_id).await;

        match self.context(&ctx_id).await? {
            Some(ctx) => Ok(ctx),
            None => Err(CoreError::NotFound(ctx_id.to_string())),
        }
    }

    /// Place a submitted task: select a runtime, mark it scheduled, send `RunTask`.
    #[instrument(skip_all, fields(task_id = %id))]
    pub async fn schedule(&self, id: &TaskId) -> Result<ScheduleOutcome, CoreError> {
        let entry = self
            .task(id)
            .await?
            .ok_or_else(|| CoreError::TaskNotFound(id.clone()))?;
        if entry.state() != TaskState::Submitted {
            return Err(IllegalTransition {
                task_id: id.clone(),
                from: entry.state(),
                to: TaskState::Scheduled,
            }
            .into());
        }

        let live = self.registry.live().await?;
        let runtime = match self.selector.select(&entry, &live) {
            Ok(r) => r,
            Err(e) => {
                debug!(live = live.len(), "{e}, task stays in backlog");
                self.enqueue(id);
                self.metrics.record_schedule(ScheduleOutcome::Backlogged);
                return Ok(ScheduleOutcome::Backlogged);
            }
        };

        let owner = self.node_id.clone();
        let reason = format!("scheduled on {runtime}");
        self.apply(id, |e| {
            Ok(transition(e, TaskState::Scheduled, reason.clone())?
                .with_runtime(Some(runtime.clone()))
                .with_owner(Some(owner.clone())))
        })
        .await?;
        self.dequeue(id);

        let outcome = match self
            .sender
            .send_to(&runtime, MessageBody::RunTask { task_id: id.clone() })
            .await
        {
            Ok(()) => {
                info!(runtime_id = %runtime, "task dispatched");
                ScheduleOutcome::Dispatched
            }
            Err(e) => {
                warn!(runtime_id = %runtime, error = %e, "run request not delivered, waiting for dispatch timeout");
                ScheduleOutcome::SendFailed
            }
        };
        self.metrics.record_schedule(outcome);
        Ok(outcome)
    }

    /// Ask for termination of a task.
    ///
    /// Placed tasks get a `KillTask`; the terminal state follows from the
    /// runtime's broadcast. Unplaced tasks are aborted directly. Killing a
    /// finished or aborted task does nothing.
    #[instrument(skip_all, fields(task_id = %id))]
    pub async fn kill(&self, id: &TaskId, reason: &str) -> Result<(), CoreError> {
        let entry = self
            .task(id)
            .await?
            .ok_or_else(|| CoreError::TaskNotFound(id.clone()))?;

        if entry.state().is_terminal() {
            debug!(state = %entry.state(), "kill of a terminal task ignored");
            return Ok(());
        }

        let placed = matches!(
            entry.state(),
            TaskState::Scheduled | TaskState::Running | TaskState::Sleeping
        );
        if placed && let Some(runtime) = entry.runtime_id() {
            let body = MessageBody::KillTask {
                task_id: id.clone(),
                reason: reason.to_string(),
            };
            match self.sender.send_to(runtime, body).await {
                Ok(()) => {
                    info!(runtime_id = %runtime, reason, "kill requested");
                    return Ok(());
                }
                Err(e) => {
                    warn!(runtime_id = %runtime, error = %e, "kill request not delivered, aborting in place");
                }
            }
        }

        self.dequeue(id);
        let reason = reason.to_string();
        self.apply(id, |e| Ok(transition(e, TaskState::Aborted, reason.clone())?))
            .await?;
        info!("task aborted");
        Ok(())
    }

    /// React to one broadcast message.
    ///
    /// Late or duplicate lifecycle messages are logged and dropped.
    pub async fn handle(&self, message: &Message) -> Result<(), CoreError> {
        let sender = message.sender_id();
        match message.body() {
            MessageBody::TaskStarted { task_id } => {
                self.on_lifecycle(sender, task_id, TaskState::Running, "task started".into())
                    .await
            }
            MessageBody::TaskFinished { task_id, exit_code } => {
                let reason = match exit_code {
                    Some(code) => format!("task finished with exit code {code}"),
                    None => "task finished".to_string(),
                };
                self.on_lifecycle(sender, task_id, TaskState::Finished, reason)
                    .await
            }
            MessageBody::TaskKilled { task_id, reason } => {
                let reason = reason.clone().unwrap_or_else(|| "task killed".to_string());
                self.on_lifecycle(sender, task_id, TaskState::Aborted, reason)
                    .await
            }
            MessageBody::NodeRegistered { reason } => {
                debug!(node_id = %sender, reason = %reason, "node registered, retrying backlog");
                self.retry_backlog().await;
                Ok(())
            }
            MessageBody::NodeTerminated { reason } => {
                self.on_runtime_gone(&RuntimeId::new(sender.as_str()), reason)
                    .await
            }
            other => {
                trace!(tag = other.tag(), "point-to-point message on topic ignored");
                Ok(())
            }
        }
    }

    /// Periodic sweep over owned tasks and all contexts.
    pub async fn scan(&self) -> Result<ScanReport, CoreError> {
        let now = now_ms();
        let mut report = ScanReport::default();
        let live: HashSet<RuntimeId> = self
            .registry
            .live()
            .await?
            .into_iter()
            .map(|r| r.id)
            .collect();

        for entry in self.tasks.values().await? {
            if entry.owner_id() != Some(&self.node_id) {
                continue;
            }
            let id = entry.id().clone();
            let vanished = entry.runtime_id().is_none_or(|r| !live.contains(r));

            match entry.state() {
                TaskState::Scheduled => {
                    let timeout = entry
                        .descriptor()
                        .dispatch_timeout_ms
                        .unwrap_or(self.config.dispatch_timeout_ms);
                    let timed_out = now.saturating_sub(entry.last_change_ms()) > timeout;
                    if !(vanished || timed_out) {
                        continue;
                    }
                    let reason = if vanished {
                        "runtime vanished before start"
                    } else {
                        "dispatch timed out"
                    };
                    if self.revert_to_submitted(&id, reason).await {
                        report.redispatched += 1;
                        self.try_schedule(&id).await;
                    }
                }
                TaskState::Running | TaskState::Sleeping if vanished => {
                    match self
                        .apply(&id, |e| Ok(transition(e, TaskState::Aborted, "runtime vanished")?))
                        .await
                    {
                        Ok(_) => {
                            warn!(task_id = %id, "task aborted, its runtime vanished");
                            report.aborted += 1;
                        }
                        Err(e) => debug!(task_id = %id, error = %e, "abort skipped"),
                    }
                }
                TaskState::Submitted => {
                    report.retried += 1;
                    self.try_schedule(&id).await;
                }
                _ => {}
            }
        }

        for ctx in self.contexts.values().await? {
            match ctx.expires_at_ms {
                Some(at) if at <= now => match self.expire_context(&ctx.id, now).await {
                    Ok(true) => report.expired += 1,
                    Ok(false) => {}
                    Err(e) => warn!(context_id = %ctx.id, error = %e, "context expiry failed"),
                },
                Some(_) => {}
                None => self.refresh_context(&ctx.id).await,
            }
        }

        self.metrics.set_backlog_size(self.lock_backlog().len());
        if report != ScanReport::default() {
            debug!(?report, "scan complete");
        }
        Ok(report)
    }

    /// Consume broadcasts and scan periodically until `cancel` fires or the topic closes.
    pub async fn run(&self, session: &mut MessagingSession, cancel: CancellationToken) {
        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.config.scan_interval_ms.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(node_id = %self.node_id, "orchestrator running");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                msg = session.recv_broadcast() => match msg {
                    Some(msg) => {
                        if let Err(e) = self.handle(&msg).await {
                            warn!(tag = msg.tag(), error = %e, "failed to handle message");
                        }
                    }
                    None => {
                        warn!("broadcast topic closed");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    if let Err(e) = self.scan().await {
                        warn!(error = %e, "scan failed");
                    }
                }
            }
        }
        info!(node_id = %self.node_id, "orchestrator stopped");
    }

    async fn on_lifecycle(
        &self,
        sender: &NodeId,
        id: &TaskId,
        target: TaskState,
        reason: String,
    ) -> Result<(), CoreError> {
        let Some(entry) = self.task(id).await? else {
            debug!(task_id = %id, "lifecycle message for unknown task");
            return Ok(());
        };
        if entry.owner_id() != Some(&self.node_id) {
            return Ok(());
        }
        if entry.runtime_id().is_some_and(|r| r.as_str() != sender.as_str()) {
            debug!(task_id = %id, node_id = %sender, "lifecycle message from a previous runtime ignored");
            return Ok(());
        }

        let result = self
            .apply(id, |e| {
                if e.state() < TaskState::Scheduled {
                    return Err(IllegalTransition {
                        task_id: e.id().clone(),
                        from: e.state(),
                        to: target,
                    }
                    .into());
                }
                Ok(advance_to(e, target, reason.clone())?)
            })
            .await;

        match result {
            Ok(entry) => {
                info!(task_id = %id, state = %entry.state(), "task state changed");
                if target.is_terminal() {
                    self.request_cleanup(&entry).await;
                }
                Ok(())
            }
            Err(CoreError::IllegalTransition(e)) => {
                debug!(error = %e, "late or duplicate lifecycle message ignored");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn on_runtime_gone(&self, runtime: &RuntimeId, reason: &str) -> Result<(), CoreError> {
        info!(runtime_id = %runtime, reason = %reason, "runtime terminated");
        for entry in self.tasks.values().await? {
            if entry.owner_id() != Some(&self.node_id) || entry.runtime_id() != Some(runtime) {
                continue;
            }
            let id = entry.id().clone();
            match entry.state() {
                TaskState::Scheduled => {
                    if self.revert_to_submitted(&id, "runtime terminated").await {
                        self.try_schedule(&id).await;
                    }
                }
                TaskState::Running | TaskState::Sleeping => {
                    let why = format!("runtime terminated: {reason}");
                    if let Err(e) = self
                        .apply(&id, |e| Ok(transition(e, TaskState::Aborted, why.clone())?))
                        .await
                    {
                        debug!(task_id = %id, error = %e, "abort skipped");
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    async fn revert_to_submitted(&self, id: &TaskId, reason: &str) -> bool {
        match self
            .apply(id, |e| {
                Ok(transition(e, TaskState::Submitted, reason)?.with_runtime(None))
            })
            .await
        {
            Ok(_) => {
                info!(task_id = %id, reason, "task returned to submitted");
                true
            }
            Err(e) => {
                debug!(task_id = %id, error = %e, "revert skipped");
                false
            }
        }
    }

    async fn request_cleanup(&self, entry: &TaskEntry) {
        let Some(runtime) = entry.runtime_id() else {
            return;
        };
        let body = MessageBody::DeleteTaskWrkDir {
            task_id: entry.id().clone(),
            operation_id: OperationId::new(system::generate_id()),
        };
        if let Err(e) = self.sender.send_to(runtime, body).await {
            warn!(task_id = %entry.id(), runtime_id = %runtime, error = %e, "working directory cleanup not delivered");
        }
    }

    async fn retry_backlog(&self) {
        let pending = self.backlog();
        for id in pending {
            self.try_schedule(&id).await;
        }
        self.metrics.set_backlog_size(self.lock_backlog().len());
    }

    async fn try_schedule(&self, id: &TaskId) -> Option<ScheduleOutcome> {
        match self.schedule(id).await {
            Ok(outcome) => Some(outcome),
            Err(e) if e.is_recoverable() => {
                debug!(task_id = %id, error = %e, "scheduling skipped");
                self.dequeue(id);
                None
            }
            Err(e) => {
                warn!(task_id = %id, error = %e, "scheduling failed");
                None
            }
        }
    }

    /// Compare-and-swap `f` onto the stored entry, then account and re-derive the context.
    async fn apply<F>(&self, id: &TaskId, f: F) -> Result<TaskEntry, CoreError>
    where
        F: FnMut(TaskEntry) -> Result<TaskEntry, CoreError> + Send,
    {
        match self.tasks.update(id, self.config.cas_retries, f).await {
            Ok(entry) => {
                self.metrics.record_transition(entry.state());
                self.refresh_context(entry.context_id()).await;
                Ok(entry)
            }
            Err(CoreError::IllegalTransition(e)) => {
                self.metrics.record_illegal_transition(e.from, e.to);
                Err(e.into())
            }
            Err(e) => Err(e),
        }
    }

    async fn attach_to_context(&self, ctx: &ContextId, task: &TaskId) -> Result<(), CoreError> {
        let mut fresh = TaskContextEntry::new(ctx.clone(), ctx.as_str());
        fresh.tasks.push(task.clone());
        if self.contexts.insert_new(ctx, &fresh).await? {
            return Ok(());
        }
        self.contexts
            .update(ctx, self.config.cas_retries, |mut c| {
                if !c.tasks.contains(task) {
                    c.tasks.push(task.clone());
                }
                Ok(c)
            })
            .await?;
        Ok(())
    }

    /// Publish the leaves, then the context entry, then the task entries.
    ///
    /// Every leaf is pushed to `placed` as soon as it exists, so a failure
    /// part way through can be undone.
    async fn store_context(
        &self,
        ctx_id: &ContextId,
        descriptor: &TaskContextDescriptor,
        address: &TaskTreeAddress,
        resolved: Vec<TaskDescriptor>,
        placed: &mut Vec<(TaskId, TaskTreeAddress)>,
    ) -> Result<Vec<TaskEntry>, CoreError> {
        let mut entries = Vec::with_capacity(resolved.len());
        for d in resolved {
            let id = TaskId::new(system::generate_id());
            let leaf = self.tree.insert(address, &d.name, &id).await?;
            placed.push((id.clone(), leaf.clone()));
            let entry = transition(
                TaskEntry::create(id, d, ctx_id.clone()),
                TaskState::Submitted,
                "task submitted with context",
            )?
            .with_owner(Some(self.node_id.clone()))
            .with_address(leaf);
            entries.push(entry);
        }

        let mut ctx = TaskContextEntry::new(ctx_id.clone(), descriptor.name.clone());
        ctx.tasks = entries.iter().map(|e| e.id().clone()).collect();
        ctx.address = Some(address.clone());
        ctx.properties = descriptor.properties.clone();
        self.contexts.put(ctx_id, &ctx).await?;

        for e in &entries {
            self.tasks.put(e.id(), e).await?;
        }
        Ok(entries)
    }

    async fn rollback_context(
        &self,
        ctx_id: &ContextId,
        address: &TaskTreeAddress,
        placed: &[(TaskId, TaskTreeAddress)],
    ) {
        for (id, leaf) in placed {
            if let Err(e) = self.tasks.remove(id).await {
                warn!(task_id = %id, error = %e, "rollback could not remove task entry");
            }
            if let Err(e) = self.tree.remove(leaf).await {
                warn!(address = %leaf, error = %e, "rollback could not remove tree leaf");
            }
        }
        if let Err(e) = self.contexts.remove(ctx_id).await {
            warn!(context_id = %ctx_id, error = %e, "rollback could not remove context entry");
        }
        if let Err(e) = self.tree.remove(address).await {
            warn!(address = %address, error = %e, "rollback could not remove context node");
        }
    }

    /// Best effort; a failed refresh is repaired by the next scan.
    async fn refresh_context(&self, id: &ContextId) {
        if let Err(e) = self.try_refresh_context(id).await {
            warn!(context_id = %id, error = %e, "context state refresh failed");
        }
    }

    /// Derive the context state from its members and store it.
    ///
    /// Members are read after the context on every attempt, and the write is
    /// conditional on the context version that was read, so a derivation from
    /// stale member states never overwrites a newer one.
    async fn try_refresh_context(&self, id: &ContextId) -> Result<(), CoreError> {
        let attempts = self.config.cas_retries + 1;
        for attempt in 1..=attempts {
            let Some(current) = self.contexts.get(id).await? else {
                return Ok(());
            };
            let derived = TaskContextState::derive(self.member_states(&current.value).await?);
            let expires_at_ms = match current.value.expires_at_ms {
                _ if !derived.is_terminal() => None,
                Some(at) => Some(at),
                None => Some(now_ms() + self.config.context_ttl_ms),
            };
            if derived == current.value.state && expires_at_ms == current.value.expires_at_ms {
                return Ok(());
            }

            let mut next = current.value;
            next.state = derived;
            next.expires_at_ms = expires_at_ms;
            if self.contexts.replace(id, current.version, &next).await? {
                info!(context_id = %id, state = ?derived, "context state changed");
                return Ok(());
            }
            trace!(context_id = %id, attempt, "context changed while deriving its state, retrying");
        }
        Err(CoreError::CasExhausted {
            key: TypedMap::<Contexts>::key(id),
            attempts,
        })
    }

    /// States of the members still present in the store.
    async fn member_states(&self, ctx: &TaskContextEntry) -> Result<Vec<TaskState>, CoreError> {
        let mut states = Vec::with_capacity(ctx.tasks.len());
        for t in &ctx.tasks {
            if let Some(e) = self.task(t).await? {
                states.push(e.state());
            }
        }
        Ok(states)
    }

    /// Remove a due context with its tasks and tree nodes.
    ///
    /// Re-reads the context first. Nothing is removed while a member is still
    /// live; the state is re-derived instead, which drops the stale expiry.
    async fn expire_context(&self, id: &ContextId, now: u64) -> Result<bool, CoreError> {
        let Some(ctx) = self.context(id).await? else {
            return Ok(false);
        };
        if !ctx.expires_at_ms.is_some_and(|at| at <= now) {
            return Ok(false);
        }
        if !self.member_states(&ctx).await?.iter().all(|s| s.is_terminal()) {
            debug!(context_id = %id, "context has live tasks, expiry postponed");
            self.try_refresh_context(id).await?;
            return Ok(false);
        }

        for t in &ctx.tasks {
            if let Some(entry) = self.tasks.remove(t).await?
                && let Some(address) = entry.address()
                && let Err(e) = self.tree.remove(address).await
            {
                debug!(address = %address, error = %e, "tree leaf already gone");
            }
        }
        if let Some(address) = &ctx.address
            && let Err(e) = self.tree.remove(address).await
        {
            debug!(address = %address, error = %e, "context node not removed");
        }
        self.contexts.remove(&ctx.id).await?;
        info!(context_id = %ctx.id, "context expired");
        Ok(true)
    }

    fn enqueue(&self, id: &TaskId) {
        let size = {
            let mut backlog = self.lock_backlog();
            backlog.insert(id.clone());
            backlog.len()
        };
        self.metrics.set_backlog_size(size);
    }

    fn dequeue(&self, id: &TaskId) {
        let size = {
            let mut backlog = self.lock_backlog();
            backlog.remove(id);
            backlog.len()
        };
        self.metrics.set_backlog_size(size);
    }

    fn lock_backlog(&self) -> MutexGuard<'_, BTreeSet<TaskId>> {
        self.backlog.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryCluster, RegistryConfig, SelectorConfig, Transport};
    use been_model::{Exclusivity, RuntimeInfo, TaskDeclaration};

    struct Fixture {
        cluster: MemoryCluster,
        orch: Orchestrator,
        registry: RegistryView,
    }

    async fn fixture(config: OrchestratorConfig) -> Fixture {
        let cluster = MemoryCluster::new();
        let store: Arc<dyn ClusterStore> = Arc::new(cluster.clone());
        let session = MessagingSession::connect(Arc::new(cluster.clone()), NodeId::from("N1"))
            .await
            .unwrap();
        let registry = RegistryView::new(store.clone(), RegistryConfig::default());
        let orch = Orchestrator::new(
            store,
            session.sender(),
            registry.clone(),
            Selector::new(SelectorConfig::default()),
            config,
        );
        Fixture {
            cluster,
            orch,
            registry,
        }
    }

    fn descriptor() -> TaskDescriptor {
        TaskDescriptor::new("bench", "/bin/true")
    }

    #[tokio::test]
    async fn submit_without_runtime_goes_to_backlog() {
        let f = fixture(OrchestratorConfig::default()).await;
        let id = f.orch.submit(descriptor(), ContextId::from("C1")).await.unwrap();

        let entry = f.orch.task(&id).await.unwrap().unwrap();
        assert_eq!(entry.state(), TaskState::Submitted);
        assert_eq!(entry.owner_id(), Some(&NodeId::from("N1")));
        assert_eq!(f.orch.backlog(), [id.clone()]);

        let ctx = f.orch.context(&ContextId::from("C1")).await.unwrap().unwrap();
        assert_eq!(ctx.tasks, [id]);
        assert_eq!(ctx.state, TaskContextState::Waiting);
    }

    #[tokio::test]
    async fn submit_with_runtime_dispatches() {
        let f = fixture(OrchestratorConfig::default()).await;
        let mut inbox = f.cluster.open_inbox("inbox/R1").await.unwrap();
        f.registry
            .publish(&RuntimeInfo::new(RuntimeId::from("R1"), 4))
            .await
            .unwrap();

        let id = f.orch.submit(descriptor(), ContextId::from("C1")).await.unwrap();

        let entry = f.orch.task(&id).await.unwrap().unwrap();
        assert_eq!(entry.state(), TaskState::Scheduled);
        assert_eq!(entry.runtime_id(), Some(&RuntimeId::from("R1")));
        assert!(f.orch.backlog().is_empty());

        let msg = inbox.recv().await.unwrap();
        assert_eq!(msg.body(), &MessageBody::RunTask { task_id: id.clone() });

        let ctx = f.orch.context(&ContextId::from("C1")).await.unwrap().unwrap();
        assert_eq!(ctx.state, TaskContextState::Running);
    }

    #[tokio::test]
    async fn node_registered_drains_backlog() {
        let f = fixture(OrchestratorConfig::default()).await;
        let id = f.orch.submit(descriptor(), ContextId::from("C1")).await.unwrap();
        assert_eq!(f.orch.backlog().len(), 1);

        let _inbox = f.cluster.open_inbox("inbox/R1").await.unwrap();
        f.registry
            .publish(&RuntimeInfo::new(RuntimeId::from("R1"), 4))
            .await
            .unwrap();
        f.orch
            .handle(&Message::broadcast(
                NodeId::from("R1"),
                MessageBody::NodeRegistered {
                    reason: "up".into(),
                },
            ))
            .await
            .unwrap();

        assert!(f.orch.backlog().is_empty());
        let entry = f.orch.task(&id).await.unwrap().unwrap();
        assert_eq!(entry.state(), TaskState::Scheduled);
    }

    #[tokio::test]
    async fn kill_unplaced_task_aborts_it() {
        let f = fixture(OrchestratorConfig::default()).await;
        let id = f.orch.submit(descriptor(), ContextId::from("C1")).await.unwrap();

        f.orch.kill(&id, "user request").await.unwrap();
        let entry = f.orch.task(&id).await.unwrap().unwrap();
        assert_eq!(entry.state(), TaskState::Aborted);
        assert_eq!(entry.log().last().unwrap().reason(), "user request");
        assert!(f.orch.backlog().is_empty());

        // again: terminal, nothing happens
        f.orch.kill(&id, "again").await.unwrap();
        assert_eq!(f.orch.task(&id).await.unwrap().unwrap().log().len(), entry.log().len());

        let ctx = f.orch.context(&ContextId::from("C1")).await.unwrap().unwrap();
        assert_eq!(ctx.state, TaskContextState::Failed);
        assert!(ctx.expires_at_ms.is_some());
    }

    #[tokio::test]
    async fn kill_placed_task_sends_kill_message() {
        let f = fixture(OrchestratorConfig::default()).await;
        let mut inbox = f.cluster.open_inbox("inbox/R1").await.unwrap();
        f.registry
            .publish(&RuntimeInfo::new(RuntimeId::from("R1"), 4))
            .await
            .unwrap();
        let id = f.orch.submit(descriptor(), ContextId::from("C1")).await.unwrap();
        let _run = inbox.recv().await.unwrap();

        f.orch.kill(&id, "timeout").await.unwrap();
        let msg = inbox.recv().await.unwrap();
        assert_eq!(
            msg.body(),
            &MessageBody::KillTask {
                task_id: id.clone(),
                reason: "timeout".into()
            }
        );
        // still scheduled until the runtime reports
        assert_eq!(f.orch.task(&id).await.unwrap().unwrap().state(), TaskState::Scheduled);
    }

    #[tokio::test]
    async fn submit_context_publishes_tree() {
        let f = fixture(OrchestratorConfig::default()).await;
        let ctx = TaskContextDescriptor::new("suite")
            .with_property("runs", "2")
            .with_template("client", TaskDescriptor::new("tpl", "/bin/client"))
            .with_task(TaskDeclaration::from_template("c1", "client"))
            .with_task(TaskDeclaration::inline("srv", TaskDescriptor::new("x", "/bin/srv")));

        let entry = f.orch.submit_context(ctx.clone()).await.unwrap();
        assert_eq!(entry.tasks.len(), 2);
        assert_eq!(entry.address.as_ref().unwrap().as_str(), "/contexts/suite");
        assert_eq!(entry.state, TaskContextState::Waiting);

        assert_eq!(
            f.orch.tree().children("/contexts/suite").await.unwrap(),
            ["c1", "srv"]
        );
        let leaf = f.orch.tree().resolve("/contexts/suite/c1").await.unwrap();
        let task = f.orch.task(leaf.task_id().unwrap()).await.unwrap().unwrap();
        assert_eq!(task.descriptor().program, "/bin/client");
        assert_eq!(task.descriptor().properties.get("runs"), Some("2"));
        assert_eq!(task.address().unwrap().as_str(), "/contexts/suite/c1");

        let again = f.orch.submit_context(ctx).await.unwrap_err();
        assert!(matches!(again, CoreError::AddressTaken(_)));
    }

    #[tokio::test]
    async fn submit_context_rejects_duplicate_task_names() {
        let f = fixture(OrchestratorConfig::default()).await;
        let ctx = TaskContextDescriptor::new("dup")
            .with_task(TaskDeclaration::inline("a", descriptor()))
            .with_task(TaskDeclaration::inline("a", descriptor()));
        assert!(matches!(
            f.orch.submit_context(ctx).await,
            Err(CoreError::AddressTaken(_))
        ));
        assert!(f.orch.tree().resolve("/contexts/dup").await.is_err());
    }

    #[tokio::test]
    async fn exclusive_task_waits_for_idle_runtime() {
        let f = fixture(OrchestratorConfig::default()).await;
        let _inbox = f.cluster.open_inbox("inbox/R1").await.unwrap();
        f.registry
            .publish(&RuntimeInfo::new(RuntimeId::from("R1"), 4).with_task_count(1))
            .await
            .unwrap();

        let id = f
            .orch
            .submit(
                descriptor().with_exclusivity(Exclusivity::Exclusive),
                ContextId::from("C1"),
            )
            .await
            .unwrap();
        assert_eq!(f.orch.backlog(), [id]);
    }
}
