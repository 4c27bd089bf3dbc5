use std::{collections::BTreeSet, sync::Arc};

use serde::{Deserialize, Serialize};
use tracing::debug;

use been_model::{TaskId, TaskTreeAddress};

use crate::{ClusterStore, CoreError, TreeNodes, TypedMap};

/// A node of the task tree, stored under `tree/{address}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum TreeNode {
    /// Named container. Children are segment names.
    Internal { children: BTreeSet<String> },
    /// Holds exactly one task.
    Leaf { task_id: TaskId },
}

impl TreeNode {
    fn empty() -> Self {
        TreeNode::Internal {
            children: BTreeSet::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, TreeNode::Leaf { .. })
    }

    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            TreeNode::Leaf { task_id } => Some(task_id),
            TreeNode::Internal { .. } => None,
        }
    }
}

/// Hierarchical namespace of contexts and tasks.
///
/// The root always exists, even before anything was stored. Parent nodes own
/// the list of child names; linking a child is a compare-and-swap on the parent.
#[derive(Clone)]
pub struct TaskTree {
    nodes: TypedMap<TreeNodes>,
    cas_retries: u32,
}

impl TaskTree {
    pub fn new(store: Arc<dyn ClusterStore>, cas_retries: u32) -> Self {
        Self {
            nodes: TypedMap::new(store),
            cas_retries,
        }
    }

    /// Walk from the root one segment at a time.
    ///
    /// Malformed input is reported as not found.
    pub async fn resolve(&self, raw: &str) -> Result<TreeNode, CoreError> {
        let not_found = || CoreError::AddressNotFound(raw.to_string());
        let address = TaskTreeAddress::parse(raw).map_err(|_| not_found())?;

        let mut node = self.load(&TaskTreeAddress::root()).await?.unwrap_or_else(TreeNode::empty);
        let mut cur = TaskTreeAddress::root();
        for segment in address.segments() {
            let TreeNode::Internal { children } = &node else {
                return Err(not_found());
            };
            if !children.contains(segment) {
                return Err(not_found());
            }
            cur = cur.child(segment)?;
            node = self.load(&cur).await?.ok_or_else(not_found)?;
        }
        Ok(node)
    }

    /// Create `address` and every missing ancestor as internal nodes.
    pub async fn ensure_node(&self, address: &TaskTreeAddress) -> Result<(), CoreError> {
        self.ensure_internal(&TaskTreeAddress::root()).await?;
        for a in address.ancestors().iter().skip(1).chain(std::iter::once(address)) {
            if a.is_root() {
                continue;
            }
            self.ensure_internal(a).await?;
            self.link(a).await?;
        }
        Ok(())
    }

    /// Create `address` as a fresh internal node, claiming it for one owner.
    ///
    /// Missing ancestors are created as with [`ensure_node`](Self::ensure_node);
    /// the node itself must not exist yet.
    pub async fn create_node(&self, address: &TaskTreeAddress) -> Result<(), CoreError> {
        let Some(parent) = address.parent() else {
            return Err(CoreError::AddressTaken(address.to_string()));
        };
        self.ensure_node(&parent).await?;
        if !self.nodes.insert_new(address, &TreeNode::empty()).await? {
            return Err(CoreError::AddressTaken(address.to_string()));
        }
        self.link(address).await?;
        debug!(address = %address, "tree node created");
        Ok(())
    }

    /// Publish `task_id` as leaf `name` under `parent`, creating the parent path if needed.
    pub async fn insert(
        &self,
        parent: &TaskTreeAddress,
        name: &str,
        task_id: &TaskId,
    ) -> Result<TaskTreeAddress, CoreError> {
        let address = parent.child(name)?;
        self.ensure_node(parent).await?;

        let leaf = TreeNode::Leaf {
            task_id: task_id.clone(),
        };
        if !self.nodes.insert_new(&address, &leaf).await? {
            return Err(CoreError::AddressTaken(address.to_string()));
        }
        self.link(&address).await?;

        debug!(address = %address, task_id = %task_id, "tree leaf inserted");
        Ok(address)
    }

    /// Remove a leaf or an empty internal node.
    pub async fn remove(&self, address: &TaskTreeAddress) -> Result<TreeNode, CoreError> {
        let node = self
            .load(address)
            .await?
            .ok_or_else(|| CoreError::AddressNotFound(address.to_string()))?;
        if let TreeNode::Internal { children } = &node
            && !children.is_empty()
        {
            return Err(CoreError::NodeNotEmpty(address.to_string()));
        }

        self.unlink(address).await?;
        self.nodes.remove(address).await?;
        debug!(address = %address, "tree node removed");
        Ok(node)
    }

    /// Child names of an internal node; empty for a leaf.
    pub async fn children(&self, raw: &str) -> Result<Vec<String>, CoreError> {
        match self.resolve(raw).await? {
            TreeNode::Internal { children } => Ok(children.into_iter().collect()),
            TreeNode::Leaf { .. } => Ok(Vec::new()),
        }
    }

    /// Move a leaf: insert it at the new place, then remove the old one.
    pub async fn relocate(
        &self,
        from: &TaskTreeAddress,
        new_parent: &TaskTreeAddress,
        new_name: &str,
    ) -> Result<TaskTreeAddress, CoreError> {
        let task_id = match self.load(from).await? {
            Some(TreeNode::Leaf { task_id }) => task_id,
            Some(TreeNode::Internal { .. }) => return Err(CoreError::NotALeaf(from.to_string())),
            None => return Err(CoreError::AddressNotFound(from.to_string())),
        };
        let to = self.insert(new_parent, new_name, &task_id).await?;
        self.remove(from).await?;
        Ok(to)
    }

    async fn load(&self, address: &TaskTreeAddress) -> Result<Option<TreeNode>, CoreError> {
        Ok(self.nodes.get(address).await?.map(|v| v.value))
    }

    async fn ensure_internal(&self, address: &TaskTreeAddress) -> Result<(), CoreError> {
        let created = self.nodes.insert_new(address, &TreeNode::empty()).await?;
        if !created && self.load(address).await?.is_some_and(|n| n.is_leaf()) {
            return Err(CoreError::LeafHasNoChildren(address.to_string()));
        }
        Ok(())
    }

    async fn link(&self, address: &TaskTreeAddress) -> Result<(), CoreError> {
        let (Some(parent), Some(name)) = (address.parent(), address.name()) else {
            return Ok(());
        };
        self.nodes
            .update(&parent, self.cas_retries, |node| match node {
                TreeNode::Internal { mut children } => {
                    children.insert(name.to_string());
                    Ok(TreeNode::Internal { children })
                }
                TreeNode::Leaf { .. } => Err(CoreError::LeafHasNoChildren(parent.to_string())),
            })
            .await?;
        Ok(())
    }

    async fn unlink(&self, address: &TaskTreeAddress) -> Result<(), CoreError> {
        let (Some(parent), Some(name)) = (address.parent(), address.name()) else {
            return Ok(());
        };
        match self
            .nodes
            .update(&parent, self.cas_retries, |node| match node {
                TreeNode::Internal { mut children } => {
                    children.remove(name);
                    Ok(TreeNode::Internal { children })
                }
                leaf => Ok(leaf),
            })
            .await
        {
            Ok(_) | Err(CoreError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
