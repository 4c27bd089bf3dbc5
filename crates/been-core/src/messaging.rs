use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use been_model::{GLOBAL_TOPIC, Message, MessageBody, NodeId, RuntimeId, inbox_name};

use crate::{CoreError, Transport};

/// Cheap, cloneable handle for sending messages on behalf of a node.
#[derive(Clone)]
pub struct MessageSender {
    node_id: NodeId,
    transport: Arc<dyn Transport>,
}

impl MessageSender {
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Publish on the global topic.
    pub async fn publish(&self, body: MessageBody) -> Result<(), CoreError> {
        debug_assert!(body.is_broadcast(), "{} is a point-to-point message", body.tag());
        let msg = Message::broadcast(self.node_id.clone(), body);
        self.transport.publish(GLOBAL_TOPIC, msg).await
    }

    /// Send to the inbox of `runtime`.
    pub async fn send_to(&self, runtime: &RuntimeId, body: MessageBody) -> Result<(), CoreError> {
        debug_assert!(!body.is_broadcast(), "{} is a broadcast message", body.tag());
        let msg = Message::direct(self.node_id.clone(), runtime.into(), body);
        self.transport.send(&inbox_name(runtime), msg).await
    }
}

/// A node's attachment to the cluster message channels.
///
/// Connecting subscribes to the global topic immediately, so a node that
/// connects before announcing itself cannot miss replies to the announcement.
/// The inbox, when opened, and the subscription are released on [`close`] or drop.
///
/// [`close`]: MessagingSession::close
pub struct MessagingSession {
    sender: MessageSender,
    topic: broadcast::Receiver<Message>,
    inbox: Option<(String, mpsc::UnboundedReceiver<Message>)>,
}

impl MessagingSession {
    pub async fn connect(transport: Arc<dyn Transport>, node_id: NodeId) -> Result<Self, CoreError> {
        let topic = transport.subscribe(GLOBAL_TOPIC).await?;
        debug!(node_id = %node_id, topic = GLOBAL_TOPIC, "messaging session connected");
        Ok(Self {
            sender: MessageSender { node_id, transport },
            topic,
            inbox: None,
        })
    }

    /// Start consuming the point-to-point inbox of `runtime`. Returns the inbox name.
    pub async fn open_inbox(&mut self, runtime: &RuntimeId) -> Result<String, CoreError> {
        let name = inbox_name(runtime);
        let rx = self.sender.transport.open_inbox(&name).await?;
        if let Some((old, _)) = self.inbox.replace((name.clone(), rx))
            && old != name
        {
            self.sender.transport.close_inbox(&old);
        }
        Ok(name)
    }

    pub fn node_id(&self) -> &NodeId {
        &self.sender.node_id
    }

    pub fn sender(&self) -> MessageSender {
        self.sender.clone()
    }

    /// Next broadcast message. `None` once the topic is closed.
    ///
    /// A lagging receiver skips what it missed; broadcast delivery is at-most-once anyway.
    pub async fn recv_broadcast(&mut self) -> Option<Message> {
        loop {
            match self.topic.recv().await {
                Ok(msg) => return Some(msg),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(node_id = %self.sender.node_id, skipped = n, "broadcast receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next inbox message. `None` when no inbox is open or it was closed.
    pub async fn recv_direct(&mut self) -> Option<Message> {
        match self.inbox.as_mut() {
            Some((_, rx)) => rx.recv().await,
            None => None,
        }
    }

    /// Release the inbox and the topic subscription.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some((name, mut rx)) = self.inbox.take() {
            rx.close();
            self.sender.transport.close_inbox(&name);
            debug!(node_id = %self.sender.node_id, inbox = %name, "inbox released");
        }
    }
}

impl Drop for MessagingSession {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClusterOp, MemoryCluster};
    use been_model::TaskId;

    #[tokio::test]
    async fn connect_subscribes_before_anything_else() {
        let cluster = MemoryCluster::new();
        let _session = MessagingSession::connect(Arc::new(cluster.clone()), NodeId::from("N1"))
            .await
            .unwrap();

        assert_eq!(
            cluster.journal(),
            [ClusterOp::Subscribed {
                topic: GLOBAL_TOPIC.into()
            }]
        );
    }

    #[tokio::test]
    async fn direct_message_reaches_inbox_owner() {
        let cluster = Arc::new(MemoryCluster::new());
        let orch = MessagingSession::connect(cluster.clone(), NodeId::from("N1"))
            .await
            .unwrap();
        let mut rt = MessagingSession::connect(cluster.clone(), NodeId::from("R1"))
            .await
            .unwrap();
        rt.open_inbox(&RuntimeId::from("R1")).await.unwrap();

        orch.sender()
            .send_to(
                &RuntimeId::from("R1"),
                MessageBody::RunTask {
                    task_id: TaskId::from("T1"),
                },
            )
            .await
            .unwrap();

        let msg = rt.recv_direct().await.unwrap();
        assert_eq!(msg.sender_id().as_str(), "N1");
        assert_eq!(msg.receiver_id().map(NodeId::as_str), Some("R1"));
    }

    #[tokio::test]
    async fn broadcast_reaches_every_session() {
        let cluster = Arc::new(MemoryCluster::new());
        let mut a = MessagingSession::connect(cluster.clone(), NodeId::from("A"))
            .await
            .unwrap();
        let mut b = MessagingSession::connect(cluster.clone(), NodeId::from("B"))
            .await
            .unwrap();

        a.sender()
            .publish(MessageBody::NodeRegistered {
                reason: "up".into(),
            })
            .await
            .unwrap();

        assert_eq!(a.recv_broadcast().await.unwrap().tag(), "NodeRegistered");
        assert_eq!(b.recv_broadcast().await.unwrap().tag(), "NodeRegistered");
    }

    #[tokio::test]
    async fn drop_releases_inbox() {
        let cluster = MemoryCluster::new();
        {
            let mut s = MessagingSession::connect(Arc::new(cluster.clone()), NodeId::from("R1"))
                .await
                .unwrap();
            s.open_inbox(&RuntimeId::from("R1")).await.unwrap();
        }
        assert!(cluster.journal().contains(&ClusterOp::InboxClosed {
            inbox: "inbox/R1".into()
        }));
    }
}
