//! Routing: deciding which node an outbound invocation targets.
//!
//! Routing is a pure function of directory state plus the cluster capability
//! map: it never creates instances and never contacts the chosen node. The
//! decision ladder for a request without an explicit target:
//!
//! 1. an existing placement in the directory wins;
//! 2. a capable local node with `prefer_local` claims the reference;
//! 3. otherwise a capable cluster node is picked (round-robin over the
//!    lexicographically sorted candidates, for determinism) and proposed via
//!    the directory's single-winner get-or-put;
//! 4. no capable node ⇒ `NoAvailableNode`.
//!
//! Readers may observe stale directory state; a send that fails because a
//! placement is gone surfaces to the caller, whose retry loops back through
//! `locate_or_place`.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use orbit_core::{
    AddressableReference, NetTarget, NodeDirectory, NodeStatus, OrbitError, OrbitResult,
    RoutingPolicy,
};

use crate::directory::DirectoryFacade;
use crate::net::NetSystem;
use crate::registry::AddressableRegistry;

/// Chooses the target node for outbound invocations.
pub struct Router {
    net: Arc<NetSystem>,
    registry: Arc<AddressableRegistry>,
    directory: Arc<DirectoryFacade>,
    nodes: Arc<dyn NodeDirectory>,
    cursor: AtomicUsize,
}

impl Router {
    /// Build a router over this node's view of the cluster.
    pub fn new(
        net: Arc<NetSystem>,
        registry: Arc<AddressableRegistry>,
        directory: Arc<DirectoryFacade>,
        nodes: Arc<dyn NodeDirectory>,
    ) -> Self {
        Self {
            net,
            registry,
            directory,
            nodes,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Resolve the target node for `reference`.
    pub async fn target_for(&self, reference: &AddressableReference) -> OrbitResult<NetTarget> {
        // Local interfaces carry their registered policy; references to
        // interfaces this node does not host route with defaults.
        let routing = self
            .registry
            .definition(&reference.interface)
            .map(|d| d.routing)
            .unwrap_or_default();

        if routing.persistent {
            if let Some(existing) = self.directory.locate(reference).await? {
                tracing::debug!(%reference, target = %existing, "using existing placement");
                return Ok(existing);
            }
        }

        if routing.prefer_local && self.net.can_host(&reference.interface) {
            return self.place_local(reference, routing).await;
        }

        self.place_on_candidate(reference, routing).await
    }

    async fn place_local(
        &self,
        reference: &AddressableReference,
        routing: RoutingPolicy,
    ) -> OrbitResult<NetTarget> {
        let local = NetTarget::Unicast(self.net.local_identity());
        if routing.persistent {
            self.directory.force_place_local(reference).await?;
            tracing::debug!(%reference, "placed on local node");
        }
        Ok(local)
    }

    async fn place_on_candidate(
        &self,
        reference: &AddressableReference,
        routing: RoutingPolicy,
    ) -> OrbitResult<NetTarget> {
        let mut candidates: Vec<_> = self
            .nodes
            .list_nodes()
            .await?
            .into_iter()
            .filter(|node| node.status == NodeStatus::Running)
            .filter(|node| node.can_host(&reference.interface))
            .map(|node| node.identity)
            .collect();

        if candidates.is_empty() {
            return Err(OrbitError::NoAvailableNode {
                interface: reference.interface.to_string(),
            });
        }

        // Deterministic tie-break, then round-robin over the stable order.
        candidates.sort();
        let pick = self.cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
        let proposed = NetTarget::Unicast(candidates[pick].clone());

        if !routing.persistent {
            return Ok(proposed);
        }

        let winner = self.directory.locate_or_place(reference, proposed).await?;
        tracing::debug!(%reference, target = %winner, "placement resolved");
        Ok(winner)
    }
}
