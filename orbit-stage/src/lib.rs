//! # orbit-stage
//!
//! Per-node runtime core for the Orbit virtual-actor system.
//!
//! Clients hold references to logical addressables identified by an
//! `(interface, key)` pair and invoke methods on them. The stage locates the
//! node currently hosting an addressable through a shared cluster directory,
//! activates it on demand, forwards invocations, correlates the responses,
//! and reaps idle activations on a maintenance tick.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                 AddressableProxy                      │
//! │        invoke() → Completion, awaited by caller       │
//! ├──────────────────────────────────────────────────────┤
//! │  Pipeline (symmetric staged chain, bounded admission) │
//! │   identity → tracking → routing → local-dispatch      │
//! │            → serialization → transport                │
//! ├───────────────┬──────────────────────────────────────┤
//! │  Router       │  ExecutionSystem                      │
//! │  directory    │  reference → handler, one serialized  │
//! │  get-or-put   │  worker per activation                │
//! ├───────────────┴──────────────────────────────────────┤
//! │  Stage: composition, start/stop, tick loop            │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```
//! use orbit_stage::{Stage, StageConfig};
//! use orbit_core::{Addressable, AddressableInterfaceDefinition, Key, OrbitResult, unknown_method};
//! use async_trait::async_trait;
//! use serde_json::{Value, json};
//! use std::sync::Arc;
//!
//! struct Greeter;
//!
//! #[async_trait]
//! impl Addressable for Greeter {
//!     async fn invoke(&mut self, method: &str, args: Vec<Value>) -> OrbitResult<Value> {
//!         match method {
//!             "greet" => Ok(json!(format!("hello, {}", args[0].as_str().unwrap_or("world")))),
//!             other => Err(unknown_method(other)),
//!         }
//!     }
//! }
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let builder = Stage::builder().with_config(StageConfig::named("demo-node"));
//! builder
//!     .registry()
//!     .register(
//!         AddressableInterfaceDefinition::new("greeter"),
//!         Arc::new(|| Box::new(Greeter)),
//!     )
//!     .expect("register");
//! let stage = builder.build();
//! stage.start().await.expect("start");
//!
//! let proxy = stage.proxy_factory().reference("greeter", Key::string("alice"));
//! let reply = proxy.invoke("greet", vec![json!("alice")]).await.expect("invoke");
//! assert_eq!(reply, json!("hello, alice"));
//!
//! stage.stop().await.expect("stop");
//! # });
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod config;
mod directory;
mod execution;
mod net;
mod pipeline;
mod pools;
mod proxy;
mod registry;
mod responses;
mod retry;
mod router;
mod stage;

pub use config::StageConfig;
pub use directory::DirectoryFacade;
pub use execution::{ExecutionConfig, ExecutionSystem, HandlerState};
pub use net::NetSystem;
pub use pipeline::{
    CodecStep, ContainerBody, IdentityStep, LocalDispatchStep, MessageContainer, Pipeline,
    PipelineStep, RoutingStep, StepOutcome, TrackingStep, TransportStep,
};
pub use pools::{ErrorHandler, Pools, logging_error_handler};
pub use proxy::{AddressableProxy, ProxyFactory};
pub use registry::AddressableRegistry;
pub use responses::ResponseTracker;
pub use retry::{RetryPolicy, attempt};
pub use router::Router;
pub use stage::{Stage, StageBuilder};
