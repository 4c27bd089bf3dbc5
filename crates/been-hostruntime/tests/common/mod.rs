#![allow(dead_code)]

use std::{path::PathBuf, sync::Arc, time::Duration};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use been_core::{
    MemoryCluster, MessagingSession, Orchestrator, OrchestratorConfig, RegistryConfig,
    RegistryView, Selector, SelectorConfig,
};
use been_hostruntime::{AgentError, HostRuntime, HostRuntimeConfig};
use been_model::{NodeId, TaskDescriptor, TaskEntry, TaskId, TaskState};

pub fn scratch(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("been-it-{name}-{}", std::process::id()))
}

pub fn shell(name: &str, script: &str) -> TaskDescriptor {
    TaskDescriptor::new(name, "/bin/sh").with_args(["-c", script])
}

/// Orchestrator `N1` with its event loop running in the background.
pub async fn orchestrator(cluster: &MemoryCluster, cancel: CancellationToken) -> Arc<Orchestrator> {
    let mut session = MessagingSession::connect(Arc::new(cluster.clone()), NodeId::from("N1"))
        .await
        .unwrap();
    let store = Arc::new(cluster.clone());
    let orch = Arc::new(Orchestrator::new(
        store.clone(),
        session.sender(),
        RegistryView::new(store, RegistryConfig::default()),
        Selector::new(SelectorConfig::default()),
        OrchestratorConfig::default().with_scan_interval_ms(100),
    ));
    let looped = orch.clone();
    tokio::spawn(async move { looped.run(&mut session, cancel).await });
    orch
}

pub fn runtime_config(id: &str, test: &str) -> HostRuntimeConfig {
    HostRuntimeConfig::default()
        .with_runtime_id(id)
        .with_work_dir(scratch(test))
        .with_heartbeat_interval_ms(200)
        .with_kill_grace_ms(500)
}

/// Start a host runtime and serve its inbox in the background.
pub async fn runtime(
    cluster: &MemoryCluster,
    config: HostRuntimeConfig,
    cancel: CancellationToken,
) -> (Arc<HostRuntime>, JoinHandle<Result<(), AgentError>>) {
    let rt = Arc::new(HostRuntime::new(
        config,
        Arc::new(cluster.clone()),
        Arc::new(cluster.clone()),
    ));
    let session = rt.start().await.unwrap();
    let served = rt.clone();
    let handle = tokio::spawn(async move { served.serve(session, cancel).await });
    (rt, handle)
}

/// Poll until `check` holds, for at most ten seconds.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}

pub async fn wait_for_state(orch: &Orchestrator, id: &TaskId, state: TaskState) -> TaskEntry {
    eventually(&format!("{id} to reach {state}"), || async {
        orch.task(id)
            .await
            .unwrap()
            .is_some_and(|e| e.state() == state)
    })
    .await;
    orch.task(id).await.unwrap().unwrap()
}
