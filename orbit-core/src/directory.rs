//! Cluster directory collaborators: placement index and membership view.
//!
//! [`AddressableDirectory`] is the shared placement index — a key/value store
//! with compare-and-set semantics that every node in the cluster reads and
//! writes. Its `get_or_put` is the single-winner operation the whole
//! placement protocol hangs on: concurrent callers proposing different nodes
//! all observe the same result.
//!
//! [`NodeDirectory`] is the membership view the router consults when it needs
//! a capable host for an unplaced reference.
//!
//! Both traits model an external store; calls may block on I/O and fail
//! transiently. Neither implementation here retries — retry policy belongs to
//! the caller. The in-memory implementations provide the reference semantics
//! for tests and single-process clusters.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::OrbitResult;
use crate::types::{AddressableReference, NetTarget, NodeIdentity, NodeInfo};

/// The cluster-wide placement index.
#[async_trait]
pub trait AddressableDirectory: Send + Sync + 'static {
    /// Read-only lookup of a placement.
    async fn get(&self, reference: &AddressableReference) -> OrbitResult<Option<NetTarget>>;

    /// Atomic get-or-put: returns the existing placement if any, else stores
    /// and returns `target`. All concurrent callers agree on the winner.
    async fn get_or_put(
        &self,
        reference: &AddressableReference,
        target: &NetTarget,
    ) -> OrbitResult<NetTarget>;

    /// Unconditional write.
    async fn put(&self, reference: &AddressableReference, target: &NetTarget) -> OrbitResult<()>;

    /// Conditional delete: removes only when the stored value equals
    /// `expected`. Returns whether a removal happened.
    async fn remove_if(
        &self,
        reference: &AddressableReference,
        expected: &NetTarget,
    ) -> OrbitResult<bool>;
}

/// The cluster membership view.
#[async_trait]
pub trait NodeDirectory: Send + Sync + 'static {
    /// Insert or update a node's advertised info.
    async fn upsert_node(&self, info: NodeInfo) -> OrbitResult<()>;

    /// Remove a node from the view.
    async fn remove_node(&self, identity: &NodeIdentity) -> OrbitResult<()>;

    /// Snapshot of all known nodes, in unspecified order.
    async fn list_nodes(&self) -> OrbitResult<Vec<NodeInfo>>;
}

/// In-memory [`AddressableDirectory`] with CAS semantics over a locked map.
///
/// Shared between stages via `Arc` to form a single-process cluster in tests.
#[derive(Debug, Default)]
pub struct InMemoryAddressableDirectory {
    entries: Mutex<HashMap<AddressableReference, NetTarget>>,
}

impl InMemoryAddressableDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored placements.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True if no placements are stored.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<AddressableReference, NetTarget>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl AddressableDirectory for InMemoryAddressableDirectory {
    async fn get(&self, reference: &AddressableReference) -> OrbitResult<Option<NetTarget>> {
        Ok(self.lock().get(reference).cloned())
    }

    async fn get_or_put(
        &self,
        reference: &AddressableReference,
        target: &NetTarget,
    ) -> OrbitResult<NetTarget> {
        let mut entries = self.lock();
        Ok(entries
            .entry(reference.clone())
            .or_insert_with(|| target.clone())
            .clone())
    }

    async fn put(&self, reference: &AddressableReference, target: &NetTarget) -> OrbitResult<()> {
        self.lock().insert(reference.clone(), target.clone());
        Ok(())
    }

    async fn remove_if(
        &self,
        reference: &AddressableReference,
        expected: &NetTarget,
    ) -> OrbitResult<bool> {
        let mut entries = self.lock();
        match entries.get(reference) {
            Some(current) if current == expected => {
                entries.remove(reference);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// In-memory [`NodeDirectory`].
#[derive(Debug, Default)]
pub struct InMemoryNodeDirectory {
    nodes: Mutex<HashMap<NodeIdentity, NodeInfo>>,
}

impl InMemoryNodeDirectory {
    /// Create an empty membership view.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<NodeIdentity, NodeInfo>> {
        self.nodes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl NodeDirectory for InMemoryNodeDirectory {
    async fn upsert_node(&self, info: NodeInfo) -> OrbitResult<()> {
        self.lock().insert(info.identity.clone(), info);
        Ok(())
    }

    async fn remove_node(&self, identity: &NodeIdentity) -> OrbitResult<()> {
        self.lock().remove(identity);
        Ok(())
    }

    async fn list_nodes(&self) -> OrbitResult<Vec<NodeInfo>> {
        Ok(self.lock().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InterfaceId, Key, NodeMode, NodeStatus};

    fn reference(key: &str) -> AddressableReference {
        AddressableReference::new(InterfaceId::new("greeter"), Key::string(key))
    }

    fn unicast(node: &str) -> NetTarget {
        NetTarget::Unicast(NodeIdentity::new(node))
    }

    #[tokio::test]
    async fn test_get_or_put_single_winner() {
        let directory = InMemoryAddressableDirectory::new();
        let reference = reference("alice");

        let first = directory
            .get_or_put(&reference, &unicast("n1"))
            .await
            .expect("get_or_put");
        assert_eq!(first, unicast("n1"));

        // A competing proposal observes the existing winner.
        let second = directory
            .get_or_put(&reference, &unicast("n2"))
            .await
            .expect("get_or_put");
        assert_eq!(second, unicast("n1"));

        assert_eq!(
            directory.get(&reference).await.expect("get"),
            Some(unicast("n1"))
        );
    }

    #[tokio::test]
    async fn test_remove_if_is_conditional() {
        let directory = InMemoryAddressableDirectory::new();
        let reference = reference("alice");
        directory
            .put(&reference, &unicast("n1"))
            .await
            .expect("put");

        // Wrong expected value: no removal.
        assert!(
            !directory
                .remove_if(&reference, &unicast("n2"))
                .await
                .expect("remove_if")
        );
        assert_eq!(directory.len(), 1);

        // Matching expected value: removed.
        assert!(
            directory
                .remove_if(&reference, &unicast("n1"))
                .await
                .expect("remove_if")
        );
        assert!(directory.is_empty());

        // Removing an absent entry reports false.
        assert!(
            !directory
                .remove_if(&reference, &unicast("n1"))
                .await
                .expect("remove_if")
        );
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let directory = InMemoryAddressableDirectory::new();
        let reference = reference("alice");
        directory
            .put(&reference, &unicast("n1"))
            .await
            .expect("put");
        directory
            .put(&reference, &unicast("n2"))
            .await
            .expect("put");
        assert_eq!(
            directory.get(&reference).await.expect("get"),
            Some(unicast("n2"))
        );
    }

    #[tokio::test]
    async fn test_node_directory_upsert_and_remove() {
        let nodes = InMemoryNodeDirectory::new();
        let info = NodeInfo {
            cluster_name: "orbit".to_string(),
            identity: NodeIdentity::new("n1"),
            mode: NodeMode::Host,
            status: NodeStatus::Running,
            capabilities: vec![InterfaceId::new("greeter")],
        };
        nodes.upsert_node(info.clone()).await.expect("upsert");

        let listed = nodes.list_nodes().await.expect("list");
        assert_eq!(listed, vec![info.clone()]);

        let updated = NodeInfo {
            status: NodeStatus::Stopping,
            ..info
        };
        nodes.upsert_node(updated.clone()).await.expect("upsert");
        assert_eq!(nodes.list_nodes().await.expect("list"), vec![updated]);

        nodes
            .remove_node(&NodeIdentity::new("n1"))
            .await
            .expect("remove");
        assert!(nodes.list_nodes().await.expect("list").is_empty());
    }
}
