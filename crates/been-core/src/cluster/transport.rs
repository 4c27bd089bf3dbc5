use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use been_model::Message;

use crate::CoreError;

/// Message channels of the cluster.
///
/// Topics are many-to-many and at-most-once: a subscriber sees only messages
/// published after it subscribed. Inboxes are point-to-point queues with a
/// single consumer. Implementations bridge their wire protocol into tokio
/// channels so the core stays runtime-agnostic about the transport itself.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn subscribe(&self, topic: &str) -> Result<broadcast::Receiver<Message>, CoreError>;

    /// Publishing with no subscribers is not an error.
    async fn publish(&self, topic: &str, message: Message) -> Result<(), CoreError>;

    async fn open_inbox(&self, inbox: &str)
    -> Result<mpsc::UnboundedReceiver<Message>, CoreError>;

    /// Fails when nobody consumes the inbox.
    async fn send(&self, inbox: &str, message: Message) -> Result<(), CoreError>;

    /// Detach the consumer of `inbox`; later sends fail.
    fn close_inbox(&self, inbox: &str);
}
