//! Façade over the external placement directory.
//!
//! A thin, safe wrapper binding the cluster-wide [`AddressableDirectory`] to
//! this node's identity. It performs no retries: transient store errors
//! propagate to the caller, which owns the retry policy.

use std::sync::Arc;

use orbit_core::{
    AddressableDirectory, AddressableReference, NetTarget, NodeIdentity, OrbitResult,
};

/// Placement operations from this node's point of view.
pub struct DirectoryFacade {
    backend: Arc<dyn AddressableDirectory>,
    local: NodeIdentity,
}

impl DirectoryFacade {
    /// Wrap a backend for the given local node.
    pub fn new(backend: Arc<dyn AddressableDirectory>, local: NodeIdentity) -> Self {
        Self { backend, local }
    }

    /// Read-only placement lookup.
    pub async fn locate(&self, reference: &AddressableReference) -> OrbitResult<Option<NetTarget>> {
        self.backend.get(reference).await
    }

    /// Atomic get-or-put: the returned target is the cluster-wide winner,
    /// whether it is `target` or a pre-existing placement.
    pub async fn locate_or_place(
        &self,
        reference: &AddressableReference,
        target: NetTarget,
    ) -> OrbitResult<NetTarget> {
        self.backend.get_or_put(reference, &target).await
    }

    /// Unconditionally bind the reference to this node.
    pub async fn force_place_local(&self, reference: &AddressableReference) -> OrbitResult<()> {
        self.backend
            .put(reference, &NetTarget::Unicast(self.local.clone()))
            .await
    }

    /// Remove the placement only if it currently points at this node.
    /// Returns whether a removal happened.
    pub async fn remove_if_local(&self, reference: &AddressableReference) -> OrbitResult<bool> {
        self.backend
            .remove_if(reference, &NetTarget::Unicast(self.local.clone()))
            .await
    }
}
