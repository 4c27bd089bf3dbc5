use std::{
    collections::{HashMap, VecDeque},
    fmt::Write,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};

use tracing::{debug, trace};

use been_model::{OperationId, TaskId};

use crate::AgentError;

/// How many tasks keep their last delete request id around.
const DEFAULT_HISTORY: usize = 1024;

/// Last delete request per task, oldest task evicted first.
#[derive(Debug, Default)]
struct Handled {
    last: HashMap<TaskId, OperationId>,
    order: VecDeque<TaskId>,
}

impl Handled {
    fn contains(&self, task_id: &TaskId, op: &OperationId) -> bool {
        self.last.get(task_id) == Some(op)
    }

    fn record(&mut self, task_id: &TaskId, op: &OperationId, capacity: usize) {
        if self.last.insert(task_id.clone(), op.clone()).is_some() {
            return;
        }
        self.order.push_back(task_id.clone());
        while self.order.len() > capacity {
            if let Some(old) = self.order.pop_front() {
                self.last.remove(&old);
            }
        }
    }
}

/// Per-task working directories under one root.
///
/// Directories outlive their processes; they go away only on an explicit
/// delete request. A replayed request is recognised as long as it is the
/// latest one for its task and the task is among the last `history` tasks
/// that had a delete.
#[derive(Debug)]
pub struct WorkDirs {
    root: PathBuf,
    history: usize,
    handled: Mutex<Handled>,
}

impl WorkDirs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_history(root, DEFAULT_HISTORY)
    }

    pub fn with_history(root: impl Into<PathBuf>, history: usize) -> Self {
        Self {
            root: root.into(),
            history: history.max(1),
            handled: Mutex::new(Handled::default()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, task_id: &TaskId) -> PathBuf {
        self.root.join(dir_name(task_id.as_str()))
    }

    pub async fn create(&self, task_id: &TaskId) -> Result<PathBuf, AgentError> {
        let path = self.path_for(task_id);
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|source| AgentError::WorkDir {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }

    /// Remove the task's directory.
    ///
    /// Returns `false` when `op` was already handled; a directory that is
    /// already gone counts as removed.
    pub async fn delete(&self, task_id: &TaskId, op: &OperationId) -> Result<bool, AgentError> {
        if self.lock().contains(task_id, op) {
            trace!(task_id = %task_id, operation_id = %op, "delete already handled");
            return Ok(false);
        }
        let path = self.path_for(task_id);
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => debug!(task_id = %task_id, path = %path.display(), "working directory removed"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(source) => return Err(AgentError::WorkDir { path, source }),
        }
        let mut handled = self.lock();
        if handled.contains(task_id, op) {
            return Ok(false);
        }
        handled.record(task_id, op, self.history);
        Ok(true)
    }

    fn lock(&self) -> MutexGuard<'_, Handled> {
        self.handled.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Task ids are opaque strings. Characters outside `[A-Za-z0-9_-]` are
/// percent-encoded per UTF-8 byte, so distinct ids never share a directory.
fn dir_name(id: &str) -> String {
    if id.is_empty() {
        return "%".to_string();
    }
    let mut name = String::with_capacity(id.len());
    for c in id.chars() {
        match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => name.push(c),
            _ => {
                let mut buf = [0u8; 4];
                for b in c.encode_utf8(&mut buf).bytes() {
                    let _ = write!(name, "%{b:02X}");
                }
            }
        }
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dirs(name: &str) -> WorkDirs {
        WorkDirs::new(std::env::temp_dir().join(format!("been-wd-{name}-{}", std::process::id())))
    }

    #[test]
    fn unsafe_characters_are_encoded() {
        assert_eq!(dir_name("a/../b"), "a%2F%2E%2E%2Fb");
        assert_eq!(dir_name("T-1_x"), "T-1_x");
        assert_eq!(dir_name("é"), "%C3%A9");
        assert_eq!(dir_name(""), "%");
    }

    #[test]
    fn distinct_ids_get_distinct_directories() {
        let wd = WorkDirs::new("/tmp/been");
        let ids = ["a.b", "a_b", "a%2Eb", "a b", "a/b", "", "%"];
        let paths: std::collections::HashSet<_> = ids
            .iter()
            .map(|id| wd.path_for(&TaskId::from(*id)))
            .collect();
        assert_eq!(paths.len(), ids.len());
    }

    #[tokio::test]
    async fn delete_history_is_bounded() {
        let wd = WorkDirs::with_history(
            std::env::temp_dir().join(format!("been-wd-bounded-{}", std::process::id())),
            2,
        );
        let op = |n: u32| OperationId::new(format!("op-{n}"));
        for n in 0..5 {
            assert!(wd.delete(&TaskId::new(format!("T{n}")), &op(n)).await.unwrap());
        }
        assert_eq!(wd.lock().last.len(), 2);
        assert_eq!(wd.lock().order.len(), 2);

        // recent replays are still recognised
        assert!(!wd.delete(&TaskId::from("T4"), &op(4)).await.unwrap());
        assert!(!wd.delete(&TaskId::from("T3"), &op(3)).await.unwrap());

        // a newer request for the same task replaces the old id without growing
        assert!(wd.delete(&TaskId::from("T4"), &op(9)).await.unwrap());
        assert_eq!(wd.lock().last.len(), 2);
    }

    #[tokio::test]
    async fn delete_is_idempotent_per_operation() {
        let wd = dirs("idem");
        let task = TaskId::from("T1");
        let path = wd.create(&task).await.unwrap();
        std::fs::write(path.join("out.txt"), "x").unwrap();

        let op = OperationId::from("op-1");
        assert!(wd.delete(&task, &op).await.unwrap());
        assert!(!path.exists());

        // Recreated after the first delete; a replay of the same op must not touch it.
        wd.create(&task).await.unwrap();
        assert!(!wd.delete(&task, &op).await.unwrap());
        assert!(path.exists());

        assert!(wd.delete(&task, &OperationId::from("op-2")).await.unwrap());
        assert!(!path.exists());
        let _ = std::fs::remove_dir_all(wd.root());
    }

    #[tokio::test]
    async fn deleting_a_missing_directory_succeeds() {
        let wd = dirs("missing");
        assert!(
            wd.delete(&TaskId::from("nope"), &OperationId::from("op"))
                .await
                .unwrap()
        );
    }
}
