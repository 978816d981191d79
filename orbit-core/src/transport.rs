//! Message transport collaborator.
//!
//! The runtime hands fully encoded frames to a [`MessageTransport`] and
//! receives inbound frames through a channel registered at stage start. The
//! wire format is not normative: any carrier that round-trips frames intact
//! works.
//!
//! [`InMemoryNetwork`] is a loopback mesh for tests and single-process
//! clusters, with a fault-injection switch ([`InMemoryNetwork::isolate`])
//! that silently drops frames to a node — modelling an unresponsive host for
//! timeout scenarios.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{OrbitError, OrbitResult};
use crate::types::NodeIdentity;

/// Carrier of encoded message frames between nodes.
#[async_trait]
pub trait MessageTransport: Send + Sync + 'static {
    /// Deliver a frame to the named node. At-most-once: a returned `Ok` does
    /// not guarantee processing, and an error does not guarantee
    /// non-delivery.
    async fn send(&self, to: &NodeIdentity, frame: Vec<u8>) -> OrbitResult<()>;
}

struct MeshState {
    links: Mutex<HashMap<NodeIdentity, mpsc::UnboundedSender<Vec<u8>>>>,
    isolated: Mutex<HashSet<NodeIdentity>>,
}

impl MeshState {
    fn lock_links(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<NodeIdentity, mpsc::UnboundedSender<Vec<u8>>>> {
        self.links.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_isolated(&self) -> std::sync::MutexGuard<'_, HashSet<NodeIdentity>> {
        self.isolated.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// In-memory full-mesh transport fabric.
///
/// Each node registers once and receives a transport handle plus the channel
/// its inbound frames arrive on.
///
/// # Examples
///
/// ```
/// use orbit_core::{InMemoryNetwork, MessageTransport, NodeIdentity};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let network = InMemoryNetwork::new();
/// let n1 = NodeIdentity::new("n1");
/// let n2 = NodeIdentity::new("n2");
/// let (transport, _inbound_n1) = network.register(&n1);
/// let (_t2, mut inbound_n2) = network.register(&n2);
///
/// transport.send(&n2, b"hello".to_vec()).await.unwrap();
/// assert_eq!(inbound_n2.recv().await.unwrap(), b"hello".to_vec());
/// # });
/// ```
#[derive(Clone)]
pub struct InMemoryNetwork {
    state: Arc<MeshState>,
}

impl InMemoryNetwork {
    /// Create an empty mesh.
    pub fn new() -> Self {
        Self {
            state: Arc::new(MeshState {
                links: Mutex::new(HashMap::new()),
                isolated: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Join the mesh as `identity`. Returns the node's sending transport and
    /// the channel its inbound frames arrive on. Registering the same
    /// identity again replaces the previous link.
    pub fn register(
        &self,
        identity: &NodeIdentity,
    ) -> (Arc<InMemoryTransport>, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock_links().insert(identity.clone(), tx);
        let transport = Arc::new(InMemoryTransport {
            state: Arc::clone(&self.state),
        });
        (transport, rx)
    }

    /// Silently drop all frames addressed to `identity` until healed. The
    /// node looks reachable but never responds.
    pub fn isolate(&self, identity: &NodeIdentity) {
        self.state.lock_isolated().insert(identity.clone());
    }

    /// Undo [`InMemoryNetwork::isolate`].
    pub fn heal(&self, identity: &NodeIdentity) {
        self.state.lock_isolated().remove(identity);
    }
}

impl Default for InMemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// Sending half handed out by [`InMemoryNetwork::register`].
pub struct InMemoryTransport {
    state: Arc<MeshState>,
}

#[async_trait]
impl MessageTransport for InMemoryTransport {
    async fn send(&self, to: &NodeIdentity, frame: Vec<u8>) -> OrbitResult<()> {
        if self.state.lock_isolated().contains(to) {
            tracing::debug!(node = %to, "dropping frame to isolated node");
            return Ok(());
        }
        let sender = self
            .state
            .lock_links()
            .get(to)
            .cloned()
            .ok_or_else(|| OrbitError::transport(format!("unknown node: {}", to)))?;
        sender
            .send(frame)
            .map_err(|_| OrbitError::transport(format!("node {} is gone", to)))
    }
}

/// Transport for stages that never send remotely. Sending is an error; the
/// held inbound channel never yields.
pub struct NullTransport {
    // Keeps the paired receiver open so the stage's receive loop idles
    // instead of observing a closed channel.
    _inbound: mpsc::UnboundedSender<Vec<u8>>,
}

impl NullTransport {
    /// Create the transport and the (never-yielding) inbound channel for it.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { _inbound: tx }), rx)
    }
}

#[async_trait]
impl MessageTransport for NullTransport {
    async fn send(&self, to: &NodeIdentity, _frame: Vec<u8>) -> OrbitResult<()> {
        Err(OrbitError::transport(format!(
            "no transport configured (tried to reach {})",
            to
        )))
    }
}
