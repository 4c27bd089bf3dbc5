use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::{
    sync::mpsc,
    time::{MissedTickBehavior, interval, timeout},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use been_core::{
    ClusterStore, IllegalTransition, MessageSender, MessagingSession, RegistryConfig, RegistryView,
    Selector, Tasks, Transport, TypedMap, system, transition,
};
use been_model::{
    ContextId, Exclusivity, Message, MessageBody, NodeId, OperationId, RuntimeId, RuntimeInfo,
    TaskEntry, TaskId, TaskState, now_ms,
};

use crate::{AgentError, HostRuntimeConfig, ProcessOutcome, WorkDirs, memory_pressure, process};

/// A task this runtime has accepted and not yet reported as ended.
struct Slot {
    context_id: ContextId,
    exclusivity: Exclusivity,
    cancel: CancellationToken,
    kill_reason: Option<String>,
}

struct TaskExit {
    task_id: TaskId,
    outcome: ProcessOutcome,
}

/// Executes tasks placed on this machine and reports their lifecycle.
///
/// [`start`](Self::start) attaches to the cluster: inbox and topic first, then
/// the presence record, then `NodeRegistered`. [`serve`](Self::serve) handles
/// the inbox until cancelled and then detaches in reverse order.
pub struct HostRuntime {
    id: RuntimeId,
    config: HostRuntimeConfig,
    transport: Arc<dyn Transport>,
    registry: RegistryView,
    tasks: TypedMap<Tasks>,
    workdirs: WorkDirs,
    running: Mutex<HashMap<TaskId, Slot>>,
}

impl HostRuntime {
    pub fn new(
        config: HostRuntimeConfig,
        store: Arc<dyn ClusterStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let id = match &config.runtime_id {
            Some(id) => RuntimeId::new(id.clone()),
            None => RuntimeId::new(system::node_id().as_str()),
        };
        let workdirs = WorkDirs::new(config.work_dir.join(id.as_str()));
        Self {
            registry: RegistryView::new(store.clone(), RegistryConfig::default()),
            tasks: TypedMap::new(store),
            transport,
            workdirs,
            running: Mutex::new(HashMap::new()),
            config,
            id,
        }
    }

    pub fn id(&self) -> &RuntimeId {
        &self.id
    }

    pub fn workdirs(&self) -> &WorkDirs {
        &self.workdirs
    }

    pub fn running_tasks(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.lock_running().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Current presence record: load, exclusivity pin and static attributes.
    pub fn info(&self) -> RuntimeInfo {
        let (count, mode, reserved) = {
            let running = self.lock_running();
            let (mode, reserved) = pin(&running);
            (running.len() as u32, mode, reserved)
        };
        let mut info = RuntimeInfo::new(self.id.clone(), self.config.max_tasks)
            .with_hostname(system::hostname())
            .with_task_count(count)
            .with_memory_pressure(memory_pressure())
            .with_exclusivity(mode, reserved)
            .with_attribute("os", system::platform())
            .with_attribute("arch", system::arch())
            .with_heartbeat_ms(now_ms());
        for (k, v) in &self.config.attributes {
            info = info.with_attribute(k.clone(), v.clone());
        }
        info
    }

    /// Attach to the cluster and announce this runtime.
    ///
    /// Listeners are in place before the presence record becomes visible, so
    /// a `RunTask` sent right after discovery is never lost.
    pub async fn start(&self) -> Result<MessagingSession, AgentError> {
        let mut session =
            MessagingSession::connect(self.transport.clone(), NodeId::from(&self.id)).await?;
        session.open_inbox(&self.id).await?;
        self.registry.publish(&self.info()).await?;
        session
            .sender()
            .publish(MessageBody::NodeRegistered {
                reason: "host runtime started".to_string(),
            })
            .await?;
        info!(runtime_id = %self.id, work_dir = %self.workdirs.root().display(), "host runtime registered");
        Ok(session)
    }

    /// Handle the inbox and refresh presence until `cancel` fires, then shut down.
    pub async fn serve(
        &self,
        mut session: MessagingSession,
        cancel: CancellationToken,
    ) -> Result<(), AgentError> {
        let sender = session.sender();
        let (exits_tx, mut exits_rx) = mpsc::unbounded_channel::<TaskExit>();
        let mut heartbeat =
            interval(Duration::from_millis(self.config.heartbeat_interval_ms.max(1)));
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(exit) = exits_rx.recv() => self.on_exit(exit, &sender).await,
                msg = session.recv_direct() => match msg {
                    Some(msg) => {
                        if let Err(e) = self.handle(&msg, &sender, &exits_tx).await {
                            warn!(runtime_id = %self.id, tag = msg.tag(), error = %e, "failed to handle message");
                        }
                    }
                    None => {
                        warn!(runtime_id = %self.id, "inbox closed, stopping");
                        break;
                    }
                },
                _ = heartbeat.tick() => self.refresh_presence().await,
            }
        }

        self.stop(session, &sender, &mut exits_rx).await
    }

    /// [`start`](Self::start) followed by [`serve`](Self::serve).
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), AgentError> {
        let session = self.start().await?;
        self.serve(session, cancel).await
    }

    async fn handle(
        &self,
        message: &Message,
        sender: &MessageSender,
        exits: &mpsc::UnboundedSender<TaskExit>,
    ) -> Result<(), AgentError> {
        match message.body() {
            MessageBody::RunTask { task_id } => self.on_run(task_id, sender, exits).await,
            MessageBody::KillTask { task_id, reason } => {
                self.on_kill(task_id, reason, sender).await
            }
            MessageBody::DeleteTaskWrkDir {
                task_id,
                operation_id,
            } => self.on_delete(task_id, operation_id).await,
            other => {
                trace!(tag = other.tag(), "unexpected message in inbox");
                Ok(())
            }
        }
    }

    #[instrument(skip_all, fields(runtime_id = %self.id, task_id = %task_id))]
    async fn on_run(
        &self,
        task_id: &TaskId,
        sender: &MessageSender,
        exits: &mpsc::UnboundedSender<TaskExit>,
    ) -> Result<(), AgentError> {
        let Some(entry) = self.tasks.get(task_id).await?.map(|v| v.value) else {
            debug!("run request for unknown task ignored");
            return Ok(());
        };
        if entry.state() != TaskState::Scheduled || entry.runtime_id() != Some(&self.id) {
            debug!(state = %entry.state(), "run request ignored, task is not scheduled here");
            return Ok(());
        }

        let duplicate = self.lock_running().contains_key(task_id);
        if duplicate {
            debug!("duplicate run request ignored");
            return Ok(());
        }

        let cancel = CancellationToken::new();
        if let Err(reason) = self.admit(&entry, cancel.clone()) {
            return self.decline(task_id, &reason).await;
        }

        let child = match self.launch(&entry).await {
            Ok(child) => child,
            Err(e) => {
                self.lock_running().remove(task_id);
                warn!(error = %e, "task failed to start");
                self.report(
                    sender,
                    MessageBody::TaskKilled {
                        task_id: task_id.clone(),
                        reason: Some(format!("failed to start: {e}")),
                    },
                )
                .await;
                return Ok(());
            }
        };

        self.report(
            sender,
            MessageBody::TaskStarted {
                task_id: task_id.clone(),
            },
        )
        .await;
        info!(pid = ?child.id(), "task started");
        self.refresh_presence().await;

        let grace = Duration::from_millis(self.config.kill_grace_ms);
        let exits = exits.clone();
        let task_id = task_id.clone();
        tokio::spawn(async move {
            let outcome = process::supervise(child, cancel, grace).await;
            let _ = exits.send(TaskExit { task_id, outcome });
        });
        Ok(())
    }

    /// Reserve a slot for `entry`, or say why it can't run here.
    fn admit(&self, entry: &TaskEntry, cancel: CancellationToken) -> Result<(), String> {
        let mut running = self.lock_running();
        if running.len() as u32 >= self.config.max_tasks {
            return Err(format!("runtime full ({} tasks)", running.len()));
        }
        let (mode, reserved) = pin(&running);
        let current = RuntimeInfo::new(self.id.clone(), self.config.max_tasks)
            .with_task_count(running.len() as u32)
            .with_exclusivity(mode, reserved);
        if !Selector::is_compatible(&current, entry) {
            return Err(format!("exclusivity conflict ({mode})"));
        }
        running.insert(
            entry.id().clone(),
            Slot {
                context_id: entry.context_id().clone(),
                exclusivity: entry.descriptor().exclusivity,
                cancel,
                kill_reason: None,
            },
        );
        Ok(())
    }

    /// Hand a task back to its orchestrator: SCHEDULED -> SUBMITTED with no runtime.
    async fn decline(&self, task_id: &TaskId, reason: &str) -> Result<(), AgentError> {
        let me = &self.id;
        let note = format!("declined by {me}: {reason}");
        let result = self
            .tasks
            .update(task_id, self.config.cas_retries, |e| {
                if e.runtime_id() != Some(me) {
                    return Err(IllegalTransition {
                        task_id: task_id.clone(),
                        from: e.state(),
                        to: TaskState::Submitted,
                    }
                    .into());
                }
                Ok(transition(e, TaskState::Submitted, note.clone())?.with_runtime(None))
            })
            .await;
        match result {
            Ok(_) => {
                info!(task_id = %task_id, reason = %reason, "task declined");
                Ok(())
            }
            Err(e) if e.is_recoverable() => {
                debug!(task_id = %task_id, error = %e, "decline skipped, task moved on");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn launch(&self, entry: &TaskEntry) -> Result<tokio::process::Child, AgentError> {
        let dir = self.workdirs.create(entry.id()).await?;
        let env = [
            ("BEEN_TASK_ID", entry.id().as_str()),
            ("BEEN_CONTEXT_ID", entry.context_id().as_str()),
            ("BEEN_RUNTIME_ID", self.id.as_str()),
        ];
        process::spawn(
            entry.id(),
            entry.descriptor(),
            &dir,
            &env,
            &self.config.limits,
        )
    }

    #[instrument(skip_all, fields(runtime_id = %self.id, task_id = %task_id))]
    async fn on_kill(
        &self,
        task_id: &TaskId,
        reason: &str,
        sender: &MessageSender,
    ) -> Result<(), AgentError> {
        {
            let mut running = self.lock_running();
            if let Some(slot) = running.get_mut(task_id) {
                slot.kill_reason.get_or_insert_with(|| reason.to_string());
                slot.cancel.cancel();
                debug!(reason = %reason, "kill requested");
                return Ok(());
            }
        }

        // Placed here but never started: confirm so the orchestrator can settle it.
        let Some(entry) = self.tasks.get(task_id).await?.map(|v| v.value) else {
            return Ok(());
        };
        if entry.state() == TaskState::Scheduled && entry.runtime_id() == Some(&self.id) {
            self.report(
                sender,
                MessageBody::TaskKilled {
                    task_id: task_id.clone(),
                    reason: Some(reason.to_string()),
                },
            )
            .await;
        } else {
            trace!(state = %entry.state(), "kill for a task not running here ignored");
        }
        Ok(())
    }

    async fn on_delete(&self, task_id: &TaskId, op: &OperationId) -> Result<(), AgentError> {
        let busy = self.lock_running().contains_key(task_id);
        if busy {
            warn!(task_id = %task_id, operation_id = %op, "refusing to delete the directory of a running task");
            return Ok(());
        }
        self.workdirs.delete(task_id, op).await?;
        Ok(())
    }

    async fn on_exit(&self, exit: TaskExit, sender: &MessageSender) {
        let kill_reason = self
            .lock_running()
            .remove(&exit.task_id)
            .and_then(|slot| slot.kill_reason);
        let task_id = exit.task_id;
        let body = match exit.outcome {
            ProcessOutcome::Exited { code } => {
                info!(task_id = %task_id, exit_code = ?code, "task exited");
                MessageBody::TaskFinished { task_id, exit_code: code }
            }
            ProcessOutcome::Killed => {
                let reason = kill_reason.unwrap_or_else(|| "killed".to_string());
                info!(task_id = %task_id, reason = %reason, "task killed");
                MessageBody::TaskKilled {
                    task_id,
                    reason: Some(reason),
                }
            }
            ProcessOutcome::WaitFailed(reason) => {
                warn!(task_id = %task_id, reason = %reason, "lost track of task process");
                MessageBody::TaskKilled {
                    task_id,
                    reason: Some(reason),
                }
            }
        };
        self.report(sender, body).await;
        self.refresh_presence().await;
    }

    /// Kill what is still running, then detach: presence, `NodeTerminated`, listeners.
    async fn stop(
        &self,
        session: MessagingSession,
        sender: &MessageSender,
        exits: &mut mpsc::UnboundedReceiver<TaskExit>,
    ) -> Result<(), AgentError> {
        let pending = {
            let mut running = self.lock_running();
            for slot in running.values_mut() {
                slot.kill_reason
                    .get_or_insert_with(|| "host runtime stopping".to_string());
                slot.cancel.cancel();
            }
            running.len()
        };
        if pending > 0 {
            info!(runtime_id = %self.id, pending, "terminating running tasks");
            let budget = Duration::from_millis(self.config.kill_grace_ms.saturating_mul(2) + 1_000);
            let drained = timeout(budget, async {
                loop {
                    let idle = self.lock_running().is_empty();
                    if idle {
                        break;
                    }
                    match exits.recv().await {
                        Some(exit) => self.on_exit(exit, sender).await,
                        None => break,
                    }
                }
            })
            .await;
            if drained.is_err() {
                warn!(runtime_id = %self.id, "tasks did not terminate in time");
            }
        }

        let withdrawn = self.registry.withdraw(&self.id).await;
        self.report(
            sender,
            MessageBody::NodeTerminated {
                reason: "host runtime stopped".to_string(),
            },
        )
        .await;
        session.close();
        info!(runtime_id = %self.id, "host runtime stopped");
        withdrawn.map_err(AgentError::from)
    }

    /// Best effort: a lost broadcast is recovered by the orchestrator's scan.
    async fn report(&self, sender: &MessageSender, body: MessageBody) {
        let tag = body.tag();
        if let Err(e) = sender.publish(body).await {
            warn!(runtime_id = %self.id, tag, error = %e, "failed to publish");
        }
    }

    async fn refresh_presence(&self) {
        if let Err(e) = self.registry.publish(&self.info()).await {
            warn!(runtime_id = %self.id, error = %e, "failed to refresh presence");
        }
    }

    fn lock_running(&self) -> MutexGuard<'_, HashMap<TaskId, Slot>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusivity the running set imposes on newcomers.
fn pin(running: &HashMap<TaskId, Slot>) -> (Exclusivity, Option<ContextId>) {
    if running
        .values()
        .any(|s| s.exclusivity == Exclusivity::Exclusive)
    {
        return (Exclusivity::Exclusive, None);
    }
    match running
        .values()
        .find(|s| s.exclusivity == Exclusivity::ContextExclusive)
    {
        Some(s) => (Exclusivity::ContextExclusive, Some(s.context_id.clone())),
        None => (Exclusivity::NonExclusive, None),
    }
}
