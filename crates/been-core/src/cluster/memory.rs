use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tracing::trace;

use been_model::Message;

use super::{ClusterStore, Transport, Versioned};
use crate::CoreError;

const DEFAULT_TOPIC_CAPACITY: usize = 1024;

/// Observable side effect recorded by [`MemoryCluster`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterOp {
    Subscribed { topic: String },
    Published { topic: String, tag: &'static str },
    InboxOpened { inbox: String },
    InboxClosed { inbox: String },
    Sent { inbox: String, tag: &'static str },
    Put { key: String },
    Removed { key: String },
}

/// In-process cluster: key/value map, topics and inboxes behind mutexes.
///
/// Cheap to clone; clones share state. Every mutation is appended to a journal
/// readable through [`MemoryCluster::journal`].
#[derive(Clone)]
pub struct MemoryCluster {
    inner: Arc<Inner>,
}

struct Inner {
    entries: Mutex<BTreeMap<String, Versioned<String>>>,
    next_version: AtomicU64,
    topics: Mutex<HashMap<String, broadcast::Sender<Message>>>,
    inboxes: Mutex<HashMap<String, mpsc::UnboundedSender<Message>>>,
    journal: Mutex<Vec<ClusterOp>>,
    topic_capacity: usize,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::with_topic_capacity(DEFAULT_TOPIC_CAPACITY)
    }

    pub fn with_topic_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(BTreeMap::new()),
                next_version: AtomicU64::new(1),
                topics: Mutex::new(HashMap::new()),
                inboxes: Mutex::new(HashMap::new()),
                journal: Mutex::new(Vec::new()),
                topic_capacity: capacity.max(1),
            }),
        }
    }

    /// Snapshot of every recorded operation, oldest first.
    pub fn journal(&self) -> Vec<ClusterOp> {
        lock(&self.inner.journal).clone()
    }

    fn record(&self, op: ClusterOp) {
        trace!(?op, "cluster op");
        lock(&self.inner.journal).push(op);
    }

    fn bump(&self) -> u64 {
        self.inner.next_version.fetch_add(1, Ordering::Relaxed)
    }

    fn topic(&self, name: &str) -> broadcast::Sender<Message> {
        lock(&self.inner.topics)
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(self.inner.topic_capacity).0)
            .clone()
    }
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterStore for MemoryCluster {
    async fn get(&self, key: &str) -> Result<Option<Versioned<String>>, CoreError> {
        Ok(lock(&self.inner.entries).get(key).cloned())
    }

    async fn put(&self, key: &str, value: String) -> Result<u64, CoreError> {
        let version = self.bump();
        lock(&self.inner.entries).insert(key.to_string(), Versioned { version, value });
        self.record(ClusterOp::Put {
            key: key.to_string(),
        });
        Ok(version)
    }

    async fn put_if_absent(&self, key: &str, value: String) -> Result<Option<u64>, CoreError> {
        let mut entries = lock(&self.inner.entries);
        if entries.contains_key(key) {
            return Ok(None);
        }
        let version = self.bump();
        entries.insert(key.to_string(), Versioned { version, value });
        drop(entries);

        self.record(ClusterOp::Put {
            key: key.to_string(),
        });
        Ok(Some(version))
    }

    async fn replace(
        &self,
        key: &str,
        expected: u64,
        value: String,
    ) -> Result<Option<u64>, CoreError> {
        let mut entries = lock(&self.inner.entries);
        match entries.get_mut(key) {
            Some(slot) if slot.version == expected => {
                let version = self.bump();
                *slot = Versioned { version, value };
                drop(entries);

                self.record(ClusterOp::Put {
                    key: key.to_string(),
                });
                Ok(Some(version))
            }
            _ => Ok(None),
        }
    }

    async fn remove(&self, key: &str) -> Result<Option<Versioned<String>>, CoreError> {
        let removed = lock(&self.inner.entries).remove(key);
        if removed.is_some() {
            self.record(ClusterOp::Removed {
                key: key.to_string(),
            });
        }
        Ok(removed)
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, CoreError> {
        Ok(lock(&self.inner.entries)
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

#[async_trait]
impl Transport for MemoryCluster {
    async fn subscribe(&self, topic: &str) -> Result<broadcast::Receiver<Message>, CoreError> {
        let rx = self.topic(topic).subscribe();
        self.record(ClusterOp::Subscribed {
            topic: topic.to_string(),
        });
        Ok(rx)
    }

    async fn publish(&self, topic: &str, message: Message) -> Result<(), CoreError> {
        let tag = message.tag();
        // No receivers is fine: nobody subscribed yet means nobody misses anything.
        let _ = self.topic(topic).send(message);
        self.record(ClusterOp::Published {
            topic: topic.to_string(),
            tag,
        });
        Ok(())
    }

    async fn open_inbox(
        &self,
        inbox: &str,
    ) -> Result<mpsc::UnboundedReceiver<Message>, CoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.inner.inboxes).insert(inbox.to_string(), tx);
        self.record(ClusterOp::InboxOpened {
            inbox: inbox.to_string(),
        });
        Ok(rx)
    }

    async fn send(&self, inbox: &str, message: Message) -> Result<(), CoreError> {
        let tag = message.tag();
        let tx = lock(&self.inner.inboxes).get(inbox).cloned();
        let Some(tx) = tx else {
            return Err(CoreError::Transport(format!("no consumer on {inbox}")));
        };
        if tx.send(message).is_err() {
            lock(&self.inner.inboxes).remove(inbox);
            return Err(CoreError::Transport(format!("consumer of {inbox} is gone")));
        }
        self.record(ClusterOp::Sent {
            inbox: inbox.to_string(),
            tag,
        });
        Ok(())
    }

    fn close_inbox(&self, inbox: &str) {
        if lock(&self.inner.inboxes).remove(inbox).is_some() {
            self.record(ClusterOp::InboxClosed {
                inbox: inbox.to_string(),
            });
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
