//! Addressable registration: the capability surface of a node.
//!
//! The registry is the registration-map re-expression of a reflective
//! capability scan: the embedding application registers each hosted
//! interface with its definition and a factory (or a ready-made singleton
//! instance), and everything else — the capability list advertised to the
//! cluster, the router's local-capability check, the execution system's
//! definition lookups — derives from it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use orbit_core::{
    Addressable, AddressableFactory, AddressableInterfaceDefinition, AddressableReference,
    InterfaceId, Key, OrbitError, OrbitResult,
};

struct Registration {
    definition: Arc<AddressableInterfaceDefinition>,
    factory: Option<AddressableFactory>,
}

/// Registry of the interfaces this node can host.
#[derive(Default)]
pub struct AddressableRegistry {
    entries: RwLock<HashMap<InterfaceId, Registration>>,
    // Externally managed singletons, keyed by full reference. An instance is
    // taken exactly once, when its handler is created.
    instances: Mutex<HashMap<AddressableReference, Box<dyn Addressable>>>,
}

impl AddressableRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an auto-activated interface with a factory producing fresh
    /// instances.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidState` if the interface is already registered.
    pub fn register(
        &self,
        definition: AddressableInterfaceDefinition,
        factory: AddressableFactory,
    ) -> OrbitResult<()> {
        self.insert(definition, Some(factory))
    }

    /// Install a singleton addressable whose lifecycle is externally managed:
    /// activation/deactivation hooks are skipped and the instance is never
    /// idle-deactivated.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidState` if the interface is already registered.
    pub fn register_instance(
        &self,
        definition: AddressableInterfaceDefinition,
        key: Key,
        instance: Box<dyn Addressable>,
    ) -> OrbitResult<()> {
        let reference = AddressableReference::new(definition.interface.clone(), key);
        self.insert(definition, None)?;
        self.lock_instances().insert(reference, instance);
        Ok(())
    }

    fn insert(
        &self,
        definition: AddressableInterfaceDefinition,
        factory: Option<AddressableFactory>,
    ) -> OrbitResult<()> {
        let mut entries = self.write();
        if entries.contains_key(&definition.interface) {
            return Err(OrbitError::invalid_state(format!(
                "interface {} is already registered",
                definition.interface
            )));
        }
        entries.insert(
            definition.interface.clone(),
            Registration {
                definition: Arc::new(definition),
                factory,
            },
        );
        Ok(())
    }

    /// Definition for an interface, if registered here.
    pub fn definition(&self, interface: &InterfaceId) -> Option<Arc<AddressableInterfaceDefinition>> {
        self.read().get(interface).map(|r| Arc::clone(&r.definition))
    }

    /// Factory for an interface, if it was registered with one.
    pub fn factory(&self, interface: &InterfaceId) -> Option<AddressableFactory> {
        self.read().get(interface).and_then(|r| r.factory.clone())
    }

    /// Take the singleton instance registered for `reference`, if any.
    /// Subsequent calls return `None`.
    pub fn take_instance(
        &self,
        reference: &AddressableReference,
    ) -> Option<Box<dyn Addressable>> {
        self.lock_instances().remove(reference)
    }

    /// The interfaces registered here, sorted for deterministic capability
    /// advertisements.
    pub fn interfaces(&self) -> Vec<InterfaceId> {
        let mut interfaces: Vec<InterfaceId> = self.read().keys().cloned().collect();
        interfaces.sort();
        interfaces
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<InterfaceId, Registration>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<InterfaceId, Registration>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_instances(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<AddressableReference, Box<dyn Addressable>>> {
        self.instances.lock().unwrap_or_else(|e| e.into_inner())
    }
}
