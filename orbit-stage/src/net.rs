//! Local node identity and message-id allocation.

use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use orbit_core::{InterfaceId, NodeIdentity, NodeInfo, NodeMode, NodeStatus};

/// Holds this node's identity, status, and advertised capabilities, and
/// allocates per-node-unique message ids.
pub struct NetSystem {
    info: RwLock<NodeInfo>,
    next_message_id: AtomicU64,
}

impl NetSystem {
    /// Create a net system for a node in `Idle` status with no capabilities.
    pub fn new(cluster_name: String, identity: NodeIdentity, mode: NodeMode) -> Self {
        Self {
            info: RwLock::new(NodeInfo {
                cluster_name,
                identity,
                mode,
                status: NodeStatus::Idle,
                capabilities: Vec::new(),
            }),
            next_message_id: AtomicU64::new(1),
        }
    }

    /// Allocate the next message id. Unique for this node's lifetime.
    pub fn next_message_id(&self) -> u64 {
        self.next_message_id.fetch_add(1, Ordering::Relaxed)
    }

    /// This node's identity.
    pub fn local_identity(&self) -> NodeIdentity {
        self.read().identity.clone()
    }

    /// True if `identity` names this node.
    pub fn is_local(&self, identity: &NodeIdentity) -> bool {
        self.read().identity == *identity
    }

    /// Snapshot of this node's advertised info.
    pub fn local_info(&self) -> NodeInfo {
        self.read().clone()
    }

    /// Current lifecycle status.
    pub fn status(&self) -> NodeStatus {
        self.read().status
    }

    /// Update the lifecycle status.
    pub fn set_status(&self, status: NodeStatus) {
        self.write().status = status;
    }

    /// Replace the advertised capabilities.
    pub fn set_capabilities(&self, capabilities: Vec<InterfaceId>) {
        self.write().capabilities = capabilities;
    }

    /// True if this node hosts addressables and advertises `interface`.
    pub fn can_host(&self, interface: &InterfaceId) -> bool {
        self.read().can_host(interface)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, NodeInfo> {
        self.info.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, NodeInfo> {
        self.info.write().unwrap_or_else(|e| e.into_inner())
    }
}
