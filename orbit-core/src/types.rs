//! Identity and metadata types for addressables and cluster nodes.
//!
//! This module provides the fundamental naming types of the runtime:
//! - [`AddressableReference`]: `(interface, key)` identity of a virtual actor
//! - [`NodeIdentity`] / [`NodeInfo`]: node naming, mode, status, capabilities
//! - [`NetTarget`]: message destination (unicast / multicast / any)
//! - [`AddressableInterfaceDefinition`]: static per-interface metadata

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Name of an addressable interface, unique within a cluster.
///
/// Interfaces are the unit of capability: a node advertises the interfaces it
/// can host, and placement only ever considers capable nodes.
///
/// # Examples
///
/// ```
/// use orbit_core::InterfaceId;
///
/// let id = InterfaceId::new("greeter");
/// assert_eq!(id.as_str(), "greeter");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InterfaceId(String);

impl InterfaceId {
    /// Create an interface id from a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The interface name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InterfaceId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Key distinguishing addressables of the same interface.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Key {
    /// Singleton interfaces carry no key.
    NoKey,
    /// String-keyed addressable.
    StringKey(String),
    /// Integer-keyed addressable.
    Int64Key(i64),
}

impl Key {
    /// Convenience constructor for a string key.
    pub fn string(key: impl Into<String>) -> Self {
        Self::StringKey(key.into())
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Key::NoKey => f.write_str("none"),
            Key::StringKey(key) => f.write_str(key),
            Key::Int64Key(key) => write!(f, "{}", key),
        }
    }
}

/// Identity and lookup key of a virtual actor: `(interface, key)`.
///
/// References are immutable and cheap to clone; they are the key of both the
/// cluster-wide placement directory and the per-node active-handler map.
///
/// # Examples
///
/// ```
/// use orbit_core::{AddressableReference, InterfaceId, Key};
///
/// let reference = AddressableReference::new(InterfaceId::new("greeter"), Key::string("alice"));
/// assert_eq!(reference.to_string(), "greeter/alice");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AddressableReference {
    /// Interface this addressable implements.
    pub interface: InterfaceId,
    /// Key distinguishing it from other addressables of the same interface.
    pub key: Key,
}

impl AddressableReference {
    /// Create a reference from an interface and key.
    pub fn new(interface: InterfaceId, key: Key) -> Self {
        Self { interface, key }
    }
}

impl std::fmt::Display for AddressableReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.interface, self.key)
    }
}

/// Opaque string uniquely naming a node within a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeIdentity(String);

impl NodeIdentity {
    /// Create a node identity from a string.
    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }

    /// Generate a random node identity (`node-<hex>`).
    ///
    /// Used when the embedding application does not assign one explicitly.
    pub fn random() -> Self {
        let suffix: u64 = rand::random();
        Self(format!("node-{:016x}", suffix))
    }

    /// The identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeIdentity {
    fn from(identity: &str) -> Self {
        Self::new(identity)
    }
}

/// Destination of a message. Only [`NetTarget::Unicast`] participates in
/// placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetTarget {
    /// A single node.
    Unicast(NodeIdentity),
    /// A fixed set of nodes.
    Multicast(BTreeSet<NodeIdentity>),
    /// Any node; resolved by routing.
    Any,
}

impl NetTarget {
    /// The node identity if this target is a unicast.
    pub fn unicast(&self) -> Option<&NodeIdentity> {
        match self {
            NetTarget::Unicast(node) => Some(node),
            _ => None,
        }
    }
}

impl std::fmt::Display for NetTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetTarget::Unicast(node) => write!(f, "unicast:{}", node),
            NetTarget::Multicast(nodes) => write!(f, "multicast:{} nodes", nodes.len()),
            NetTarget::Any => f.write_str("any"),
        }
    }
}

/// Role of a node within the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeMode {
    /// Hosts addressables.
    Host,
    /// Invokes addressables but never hosts them.
    Client,
}

/// Lifecycle status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    /// Constructed, never started.
    Idle,
    /// `start()` in progress.
    Starting,
    /// Serving invocations.
    Running,
    /// `stop()` in progress.
    Stopping,
    /// Fully stopped.
    Stopped,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            NodeStatus::Idle => "idle",
            NodeStatus::Starting => "starting",
            NodeStatus::Running => "running",
            NodeStatus::Stopping => "stopping",
            NodeStatus::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// Everything the cluster knows about one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Cluster this node belongs to.
    pub cluster_name: String,
    /// Unique identity within the cluster.
    pub identity: NodeIdentity,
    /// Host or client role.
    pub mode: NodeMode,
    /// Current lifecycle status.
    pub status: NodeStatus,
    /// Interfaces this node can host.
    pub capabilities: Vec<InterfaceId>,
}

impl NodeInfo {
    /// True if this node advertises the given interface.
    pub fn can_host(&self, interface: &InterfaceId) -> bool {
        self.mode == NodeMode::Host && self.capabilities.contains(interface)
    }
}

/// Activation/deactivation behavior of an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecyclePolicy {
    /// Activate an instance on demand when an invocation arrives.
    pub auto_activate: bool,
    /// Deactivate the instance after the idle time-to-live elapses.
    pub auto_deactivate: bool,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            auto_activate: true,
            auto_deactivate: true,
        }
    }
}

/// Placement behavior of an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingPolicy {
    /// Record placement in the shared directory so repeat invocations land on
    /// the same node. Non-persistent interfaces are routed fresh per call.
    pub persistent: bool,
    /// Prefer activating on the calling node when it is capable.
    pub prefer_local: bool,
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self {
            persistent: true,
            prefer_local: false,
        }
    }
}

/// Static metadata for one addressable interface.
///
/// Derived once when the hosting node registers the interface; immutable
/// thereafter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressableInterfaceDefinition {
    /// Interface this definition describes.
    pub interface: InterfaceId,
    /// Activation/deactivation behavior.
    pub lifecycle: LifecyclePolicy,
    /// Placement behavior.
    pub routing: RoutingPolicy,
    /// Per-invocation response timeout; `None` falls back to the stage's
    /// `message_timeout`.
    pub timeout: Option<Duration>,
}

impl AddressableInterfaceDefinition {
    /// Create a definition with default lifecycle and routing policies.
    pub fn new(interface: impl Into<InterfaceId>) -> Self {
        Self {
            interface: interface.into(),
            lifecycle: LifecyclePolicy::default(),
            routing: RoutingPolicy::default(),
            timeout: None,
        }
    }

    /// Override the lifecycle policy.
    pub fn with_lifecycle(mut self, lifecycle: LifecyclePolicy) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// Override the routing policy.
    pub fn with_routing(mut self, routing: RoutingPolicy) -> Self {
        self.routing = routing;
        self
    }

    /// Override the response timeout for invocations on this interface.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl From<String> for InterfaceId {
    fn from(name: String) -> Self {
        Self(name)
    }
}
