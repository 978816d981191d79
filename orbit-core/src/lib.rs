//! # orbit-core
//!
//! Core abstractions for the Orbit virtual-actor runtime.
//!
//! This crate provides the foundational traits and types that the per-node
//! runtime (`orbit-stage`) is built on. Application code and backends depend
//! on these abstractions rather than concrete implementations, so a node can
//! run against a real cluster store and transport in production and against
//! the bundled in-memory implementations in tests.
//!
//! ## The Collaborator Pattern
//!
//! The runtime core touches the outside world through a small set of
//! operations: time, the shared placement directory, cluster membership, and
//! the message transport. Each is a trait with at least one reference
//! implementation shipped here.
//!
//! | Trait | Reference impl | Purpose |
//! |-------|----------------|---------|
//! | [`Clock`] | [`TokioClock`], [`ManualClock`] | Monotonic millisecond time |
//! | [`AddressableDirectory`] | [`InMemoryAddressableDirectory`] | Cluster-wide placement index (CAS semantics) |
//! | [`NodeDirectory`] | [`InMemoryNodeDirectory`] | Cluster membership view |
//! | [`MessageTransport`] | [`InMemoryNetwork`], [`NullTransport`] | Frame carrier between nodes |
//! | [`MessageCodec`] | [`JsonCodec`] | Pluggable message serialization |
//!
//! ## Core Types
//!
//! - [`AddressableReference`]: `(interface, key)` identity of a virtual actor
//! - [`NodeIdentity`] / [`NodeInfo`]: node naming and advertised capabilities
//! - [`NetTarget`]: where a message is headed (unicast / multicast / any)
//! - [`Message`] / [`AddressableInvocation`]: the pipeline payload
//! - [`Completion`] / [`CompletionHandle`]: the one-shot result cell a caller
//!   awaits while the runtime routes, executes, and correlates the reply

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod addressable;
mod clock;
mod codec;
mod completion;
mod directory;
mod error;
mod message;
mod transport;
mod types;

pub use addressable::{Addressable, AddressableFactory, unknown_method};
pub use clock::{Clock, ManualClock, TokioClock};
pub use codec::{CodecError, JsonCodec, MessageCodec};
pub use completion::{Completion, CompletionHandle, CompletionResult, completion};
pub use directory::{
    AddressableDirectory, InMemoryAddressableDirectory, InMemoryNodeDirectory, NodeDirectory,
};
pub use error::{OrbitError, OrbitResult};
pub use message::{
    AddressableInvocation, Message, MessageContent, RemoteError, TIMEOUT_OVERRIDE_HEADER,
};
pub use transport::{InMemoryNetwork, InMemoryTransport, MessageTransport, NullTransport};
pub use types::{
    AddressableInterfaceDefinition, AddressableReference, InterfaceId, Key, LifecyclePolicy,
    NetTarget, NodeIdentity, NodeInfo, NodeMode, NodeStatus, RoutingPolicy,
};
