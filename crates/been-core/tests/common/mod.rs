#![allow(dead_code)]

use std::sync::Arc;

use tokio::sync::mpsc;

use been_core::{
    ClusterStore, MemoryCluster, MessagingSession, Orchestrator, OrchestratorConfig,
    RegistryConfig, RegistryView, Selector, SelectorConfig, Transport,
};
use been_model::{Message, MessageBody, NodeId, RuntimeId, RuntimeInfo, TaskId};

pub struct Harness {
    pub cluster: MemoryCluster,
    pub registry: RegistryView,
    pub orch: Orchestrator,
    pub session: MessagingSession,
}

pub async fn harness(config: OrchestratorConfig) -> Harness {
    let cluster = MemoryCluster::new();
    harness_over(Arc::new(cluster.clone()), cluster, config).await
}

/// Like [`harness`], with the orchestrator and registry reading and writing through `store`.
pub async fn harness_over(
    store: Arc<dyn ClusterStore>,
    cluster: MemoryCluster,
    config: OrchestratorConfig,
) -> Harness {
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
    Harness {
        cluster,
        registry,
        orch,
        session,
    }
}

impl Harness {
    /// Register a runtime record and open its inbox, like a host runtime would.
    pub async fn fake_runtime(&self, id: &str) -> mpsc::UnboundedReceiver<Message> {
        let rx = self
            .cluster
            .open_inbox(&been_model::inbox_name(&RuntimeId::from(id)))
            .await
            .unwrap();
        self.registry
            .publish(&RuntimeInfo::new(RuntimeId::from(id), 8))
            .await
            .unwrap();
        rx
    }

    pub async fn from_runtime(&self, runtime: &str, body: MessageBody) {
        self.orch
            .handle(&Message::broadcast(NodeId::from(runtime), body))
            .await
            .unwrap();
    }
}

pub fn started(id: &TaskId) -> MessageBody {
    MessageBody::TaskStarted {
        task_id: id.clone(),
    }
}

pub fn finished(id: &TaskId) -> MessageBody {
    MessageBody::TaskFinished {
        task_id: id.clone(),
        exit_code: Some(0),
    }
}
