//! Single-process BEEN node: an orchestrator and a host runtime sharing an
//! in-memory cluster.

mod config;

use std::{path::Path, sync::Arc};

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use been_core::{
    ClusterStore, MemoryCluster, MessagingSession, Orchestrator, RegistryView, Selector,
    Transport, system,
};
use been_hostruntime::HostRuntime;
use been_model::NodeId;
use been_observe::{MessageJournal, logger_init};
use been_prometheus::{Encoder, PrometheusMetrics, TextEncoder};

use crate::config::NodeConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    system::init_uptime();

    // 1) Config + logger
    let mut cfg = NodeConfig::load()?;
    logger_init(&cfg.logger)?;
    let node_id = system::node_id();
    info!(node_id = %node_id, platform = system::platform(), arch = system::arch(), "logger initialized");

    // 2) Cluster + metrics
    let cluster = MemoryCluster::new();
    let store: Arc<dyn ClusterStore> = Arc::new(cluster.clone());
    let transport: Arc<dyn Transport> = Arc::new(cluster);
    let metrics = PrometheusMetrics::new().context("registering metrics")?;

    let cancel = CancellationToken::new();
    let runtime_cancel = cancel.child_token();

    // 3) Journal
    let journal_session =
        MessagingSession::connect(transport.clone(), NodeId::new(format!("{node_id}-journal")))
            .await?;
    let journal = tokio::spawn(journal_loop(journal_session, cancel.clone()));

    // 4) Orchestrator, listening before any runtime announces itself
    let mut session = MessagingSession::connect(transport.clone(), node_id.clone()).await?;
    let orch = Arc::new(
        Orchestrator::new(
            store.clone(),
            session.sender(),
            RegistryView::new(store.clone(), cfg.registry.clone()),
            Selector::new(cfg.selector.clone()),
            cfg.orchestrator.clone(),
        )
        .with_metrics(Arc::new(metrics.clone())),
    );
    let orch_task = {
        let orch = orch.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { orch.run(&mut session, cancel).await })
    };

    // 5) Host runtime
    cfg.runtime
        .runtime_id
        .get_or_insert_with(|| format!("{node_id}-rt"));
    let runtime = Arc::new(HostRuntime::new(cfg.runtime.clone(), store, transport));
    let runtime_session = runtime.start().await?;
    let runtime_task = {
        let runtime = runtime.clone();
        let cancel = runtime_cancel.clone();
        tokio::spawn(async move { runtime.serve(runtime_session, cancel).await })
    };

    // 6) Initial workload
    for ctx in std::mem::take(&mut cfg.contexts) {
        let name = ctx.name.clone();
        match orch.submit_context(ctx).await {
            Ok(entry) => info!(context_id = %entry.id, name = %name, tasks = entry.tasks.len(), "context submitted"),
            Err(e) => warn!(name = %name, error = %e, "context rejected"),
        }
    }

    info!("node is running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutting down...");

    // The runtime reports its last tasks before the orchestrator stops listening.
    for id in runtime.running_tasks() {
        info!(task_id = %id, "terminating task");
    }
    runtime_cancel.cancel();
    match runtime_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "host runtime stopped with an error"),
        Err(e) => warn!(error = %e, "host runtime task failed"),
    }
    cancel.cancel();
    orch_task.await?;
    journal.await?;

    if let Some(path) = &cfg.metrics_path {
        write_metrics(&metrics, path)?;
        info!(path = %path.display(), "metrics written");
    }
    info!(uptime_s = system::uptime_seconds(), "node stopped");
    Ok(())
}

async fn journal_loop(mut session: MessagingSession, cancel: CancellationToken) {
    let journal = MessageJournal::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = session.recv_broadcast() => match msg {
                Some(msg) => journal.record(&msg),
                None => break,
            },
        }
    }
}

fn write_metrics(metrics: &PrometheusMetrics, path: &Path) -> anyhow::Result<()> {
    let mut buf = Vec::new();
    TextEncoder::new()
        .encode(&metrics.gather(), &mut buf)
        .context("encoding metrics")?;
    std::fs::write(path, buf).with_context(|| format!("writing {}", path.display()))
}
