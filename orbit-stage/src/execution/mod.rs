//! The execution system: local actor lifecycle and invocation dispatch.
//!
//! Owns the `active` map of reference → handler. An invocation for an absent
//! reference atomically creates the handler (single-winner get-or-put on the
//! local map) and spawns its serialized worker; invocations for the same
//! reference never overlap, invocations across references run in parallel.
//! The tick sweep signals idle handlers to deactivate; stage shutdown
//! deactivates everything in parallel under a deadline.

mod handler;

pub use handler::HandlerState;

use handler::{ExecutionHandle, HandlerShared, InstanceSource, WorkerContext, run_handler};

use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::mpsc;

use orbit_core::{
    AddressableInvocation, AddressableReference, Clock, Completion, Message, MessageContent,
    OrbitError, OrbitResult, RemoteError, completion,
};

use crate::directory::DirectoryFacade;
use crate::pipeline::{MessageContainer, Pipeline};
use crate::pools::{ErrorHandler, Pools};
use crate::registry::AddressableRegistry;

/// Tunables the execution system needs from the stage config.
#[derive(Clone, Debug)]
pub struct ExecutionConfig {
    /// Bounded capacity of each handler's mailbox.
    pub mailbox_capacity: usize,
    /// Idle time after which auto-deactivating handlers are reaped.
    pub time_to_live: Duration,
}

/// Per-node actor lifecycle and invocation dispatch.
pub struct ExecutionSystem {
    active: Arc<DashMap<AddressableReference, ExecutionHandle>>,
    registry: Arc<AddressableRegistry>,
    directory: Arc<DirectoryFacade>,
    clock: Arc<dyn Clock>,
    pools: Arc<Pools>,
    config: ExecutionConfig,
    pipeline: OnceLock<Weak<Pipeline>>,
    error_handler: ErrorHandler,
}

impl ExecutionSystem {
    /// Build the execution system.
    pub fn new(
        registry: Arc<AddressableRegistry>,
        directory: Arc<DirectoryFacade>,
        clock: Arc<dyn Clock>,
        pools: Arc<Pools>,
        config: ExecutionConfig,
        error_handler: ErrorHandler,
    ) -> Arc<Self> {
        Arc::new(Self {
            active: Arc::new(DashMap::new()),
            registry,
            directory,
            clock,
            pools,
            config,
            pipeline: OnceLock::new(),
            error_handler,
        })
    }

    /// Late-bind the outbound pipeline (set once during stage assembly).
    pub fn bind_pipeline(&self, pipeline: Weak<Pipeline>) {
        let _ = self.pipeline.set(pipeline);
    }

    /// Number of active handlers on this node.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// True if a handler exists for the reference.
    pub fn is_active(&self, reference: &AddressableReference) -> bool {
        self.active.contains_key(reference)
    }

    /// Accept an inbound invocation request from the pipeline, wiring its
    /// eventual result into a response message back to the source node.
    pub(crate) fn accept(self: &Arc<Self>, message: Message) -> OrbitResult<()> {
        let Message {
            message_id,
            source,
            content,
            ..
        } = message;
        let MessageContent::InvocationRequest(invocation) = content else {
            return Err(OrbitError::invalid_state(
                "execution received a non-request message",
            ));
        };
        let (Some(id), Some(source)) = (message_id, source) else {
            return Err(OrbitError::invalid_state(
                "invocation request missing id or source",
            ));
        };

        let (completion_cell, handle) = completion();
        let pipeline = self.pipeline.get().cloned();
        self.pools.spawn_io("invocation-response", async move {
            let result = handle.wait().await;
            let Some(pipeline) = pipeline.and_then(|weak| weak.upgrade()) else {
                tracing::debug!("pipeline gone, dropping response");
                return Ok(());
            };
            let response = match result {
                Ok(value) => Message::response_value(id, value, source),
                Err(error) => Message::response_error(id, RemoteError::from(&error), source),
            };
            pipeline
                .submit_outbound(MessageContainer::outbound(response))
                .await
        });

        self.handle_invocation(invocation, completion_cell);
        Ok(())
    }

    /// Dispatch an invocation to its handler, creating one if the interface
    /// activates on demand. Every failure path settles the completion.
    pub fn handle_invocation(&self, invocation: AddressableInvocation, completion: Completion) {
        let reference = invocation.reference.clone();

        let Some(definition) = self.registry.definition(&reference.interface) else {
            tracing::warn!(%reference, "invocation for unregistered interface");
            completion.fail(OrbitError::NoActiveAddressable {
                reference: reference.to_string(),
            });
            return;
        };

        match self.active.entry(reference.clone()) {
            Entry::Occupied(entry) => {
                entry
                    .get()
                    .enqueue(invocation, completion, self.config.mailbox_capacity);
            }
            Entry::Vacant(slot) => {
                let source = if let Some(instance) = self.registry.take_instance(&reference) {
                    InstanceSource::Singleton(instance)
                } else if definition.lifecycle.auto_activate {
                    match self.registry.factory(&reference.interface) {
                        Some(factory) => InstanceSource::Factory(factory),
                        None => {
                            completion.fail(OrbitError::NoActiveAddressable {
                                reference: reference.to_string(),
                            });
                            return;
                        }
                    }
                } else {
                    completion.fail(OrbitError::NoActiveAddressable {
                        reference: reference.to_string(),
                    });
                    return;
                };

                let externally_managed = matches!(source, InstanceSource::Singleton(_));
                let shared = Arc::new(HandlerShared::new(
                    reference.clone(),
                    Arc::clone(&definition),
                    externally_managed,
                    self.clock.now(),
                ));
                let (mailbox_tx, mailbox_rx) = mpsc::channel(self.config.mailbox_capacity);

                let ctx = WorkerContext {
                    shared: Arc::clone(&shared),
                    active: Arc::clone(&self.active),
                    directory: Arc::clone(&self.directory),
                    clock: Arc::clone(&self.clock),
                    error_handler: Arc::clone(&self.error_handler),
                };
                let join = self
                    .pools
                    .spawn_cpu("addressable-worker", run_handler(ctx, source, mailbox_rx));

                let handle = ExecutionHandle {
                    mailbox: mailbox_tx,
                    shared,
                    join: std::sync::Mutex::new(Some(join)),
                };
                handle.enqueue(invocation, completion, self.config.mailbox_capacity);
                slot.insert(handle);
            }
        }
    }

    /// Tick sweep: signal deactivation for handlers idle past the
    /// time-to-live.
    pub fn on_tick(&self) {
        let now = self.clock.now();
        let ttl = self.config.time_to_live.as_millis() as u64;

        for entry in self.active.iter() {
            let shared = &entry.shared;
            if shared.externally_managed || !shared.definition.lifecycle.auto_deactivate {
                continue;
            }
            if shared.state() != HandlerState::Active {
                continue;
            }
            let idle = now.saturating_sub(shared.last_activity());
            if idle > ttl {
                tracing::debug!(reference = %shared.reference, idle_ms = idle, "idle deactivation");
                shared.deactivate.cancel();
            }
        }
    }

    /// Deactivate every handler in parallel, waiting up to `deadline` before
    /// aborting stragglers. Called on stage stop.
    pub async fn stop_all(&self, deadline: Duration) {
        let mut joins = Vec::new();
        for entry in self.active.iter() {
            entry.shared.deactivate.cancel();
            if let Some(join) = entry
                .join
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take()
            {
                joins.push(join);
            }
        }
        if joins.is_empty() {
            return;
        }
        tracing::debug!(handlers = joins.len(), "deactivating all handlers");

        let drain = async {
            for join in &mut joins {
                let _ = join.await;
            }
        };
        if tokio::time::timeout(deadline, drain).await.is_err() {
            tracing::warn!("shutdown deadline exceeded, aborting remaining handlers");
            for join in &joins {
                join.abort();
            }
            // Aborted workers never reached their cleanup; release their
            // placements and clear the map.
            let leftovers: Vec<AddressableReference> = self
                .active
                .iter()
                .map(|entry| entry.key().clone())
                .collect();
            for reference in leftovers {
                if let Err(error) = self.directory.remove_if_local(&reference).await {
                    (self.error_handler)(&error);
                }
                self.active.remove(&reference);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pools::logging_error_handler;
    use async_trait::async_trait;
    use orbit_core::{
        Addressable, AddressableDirectory, AddressableInterfaceDefinition,
        InMemoryAddressableDirectory, InterfaceId, Key, LifecyclePolicy, ManualClock,
        NodeIdentity, unknown_method,
    };
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    struct Fixture {
        clock: Arc<ManualClock>,
        backend: Arc<InMemoryAddressableDirectory>,
        registry: Arc<AddressableRegistry>,
        execution: Arc<ExecutionSystem>,
    }

    fn fixture(mailbox_capacity: usize, ttl: Duration) -> Fixture {
        let clock = Arc::new(ManualClock::new());
        let backend = Arc::new(InMemoryAddressableDirectory::new());
        let registry = Arc::new(AddressableRegistry::new());
        let directory = Arc::new(DirectoryFacade::new(
            Arc::clone(&backend) as Arc<dyn AddressableDirectory>,
            NodeIdentity::new("n1"),
        ));
        let pools = Arc::new(Pools::from_current(logging_error_handler()));
        let execution = ExecutionSystem::new(
            Arc::clone(&registry),
            directory,
            Arc::clone(&clock) as Arc<dyn Clock>,
            pools,
            ExecutionConfig {
                mailbox_capacity,
                time_to_live: ttl,
            },
            logging_error_handler(),
        );
        Fixture {
            clock,
            backend,
            registry,
            execution,
        }
    }

    struct Counter {
        count: i64,
        activations: Arc<AtomicUsize>,
        deactivations: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Addressable for Counter {
        async fn on_activate(&mut self) -> OrbitResult<()> {
            self.activations.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_deactivate(&mut self) -> OrbitResult<()> {
            self.deactivations.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn invoke(&mut self, method: &str, _args: Vec<Value>) -> OrbitResult<Value> {
            match method {
                "increment" => {
                    self.count += 1;
                    Ok(json!(self.count))
                }
                other => Err(unknown_method(other)),
            }
        }
    }

    fn register_counter(fx: &Fixture) -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let activations = Arc::new(AtomicUsize::new(0));
        let deactivations = Arc::new(AtomicUsize::new(0));
        let (a, d) = (Arc::clone(&activations), Arc::clone(&deactivations));
        fx.registry
            .register(
                AddressableInterfaceDefinition::new("counter"),
                Arc::new(move || {
                    Box::new(Counter {
                        count: 0,
                        activations: Arc::clone(&a),
                        deactivations: Arc::clone(&d),
                    })
                }),
            )
            .expect("register");
        (activations, deactivations)
    }

    fn reference(key: &str) -> AddressableReference {
        AddressableReference::new(InterfaceId::new("counter"), Key::string(key))
    }

    fn invocation(key: &str, method: &str) -> AddressableInvocation {
        AddressableInvocation::new(reference(key), method, Vec::new())
    }

    async fn invoke(fx: &Fixture, key: &str, method: &str) -> orbit_core::CompletionResult {
        let (completion_cell, handle) = completion();
        fx.execution
            .handle_invocation(invocation(key, method), completion_cell);
        handle.wait().await
    }

    #[tokio::test]
    async fn test_activates_once_and_serializes_state() {
        let fx = fixture(16, Duration::from_secs(600));
        let (activations, _) = register_counter(&fx);

        assert_eq!(invoke(&fx, "a", "increment").await.expect("value"), json!(1));
        assert_eq!(invoke(&fx, "a", "increment").await.expect("value"), json!(2));
        assert_eq!(activations.load(Ordering::SeqCst), 1);
        assert_eq!(fx.execution.active_count(), 1);

        // A different key gets its own handler and instance.
        assert_eq!(invoke(&fx, "b", "increment").await.expect("value"), json!(1));
        assert_eq!(fx.execution.active_count(), 2);
    }

    #[tokio::test]
    async fn test_unregistered_interface_fails() {
        let fx = fixture(16, Duration::from_secs(600));
        let result = invoke(&fx, "a", "increment").await;
        assert!(matches!(
            result,
            Err(OrbitError::NoActiveAddressable { .. })
        ));
    }

    #[tokio::test]
    async fn test_non_auto_activate_requires_instance() {
        let fx = fixture(16, Duration::from_secs(600));
        fx.registry
            .register(
                AddressableInterfaceDefinition::new("counter").with_lifecycle(LifecyclePolicy {
                    auto_activate: false,
                    auto_deactivate: false,
                }),
                Arc::new(|| panic!("must not activate")),
            )
            .expect("register");

        let result = invoke(&fx, "a", "increment").await;
        assert!(matches!(
            result,
            Err(OrbitError::NoActiveAddressable { .. })
        ));
        assert_eq!(fx.execution.active_count(), 0);
    }

    #[tokio::test]
    async fn test_activation_failure_fails_queued_invocations() {
        struct Faulty;

        #[async_trait]
        impl Addressable for Faulty {
            async fn on_activate(&mut self) -> OrbitResult<()> {
                Err(OrbitError::invocation("refusing to start"))
            }

            async fn invoke(&mut self, _method: &str, _args: Vec<Value>) -> OrbitResult<Value> {
                unreachable!("never activated")
            }
        }

        let fx = fixture(16, Duration::from_secs(600));
        fx.registry
            .register(
                AddressableInterfaceDefinition::new("counter"),
                Arc::new(|| Box::new(Faulty)),
            )
            .expect("register");

        let result = invoke(&fx, "a", "increment").await;
        assert!(matches!(result, Err(OrbitError::ActivationFailed { .. })));

        // The handler is gone; nothing lingers in the map.
        tokio::task::yield_now().await;
        assert_eq!(fx.execution.active_count(), 0);
    }

    #[tokio::test]
    async fn test_idle_deactivation_sweep() {
        let fx = fixture(16, Duration::from_millis(100));
        let (_, deactivations) = register_counter(&fx);

        invoke(&fx, "a", "increment").await.expect("value");
        assert!(fx.execution.is_active(&reference("a")));

        // Not yet idle long enough.
        fx.clock.advance(Duration::from_millis(50));
        fx.execution.on_tick();
        tokio::task::yield_now().await;
        assert!(fx.execution.is_active(&reference("a")));

        // Past the time-to-live.
        fx.clock.advance(Duration::from_millis(100));
        fx.execution.on_tick();
        while fx.execution.is_active(&reference("a")) {
            tokio::task::yield_now().await;
        }
        assert_eq!(deactivations.load(Ordering::SeqCst), 1);

        // Placement record was released.
        assert!(fx.backend.is_empty());

        // Re-activation works after the reap.
        assert_eq!(invoke(&fx, "a", "increment").await.expect("value"), json!(1));
    }

    #[tokio::test]
    async fn test_mailbox_overflow_and_drain_order() {
        struct Gated {
            release: Arc<Notify>,
            started: Arc<Notify>,
            first: bool,
        }

        #[async_trait]
        impl Addressable for Gated {
            async fn invoke(&mut self, _method: &str, _args: Vec<Value>) -> OrbitResult<Value> {
                if self.first {
                    self.first = false;
                    self.started.notify_one();
                    self.release.notified().await;
                }
                Ok(json!("done"))
            }
        }

        let fx = fixture(1, Duration::from_secs(600));
        let release = Arc::new(Notify::new());
        let started = Arc::new(Notify::new());
        let (r, s) = (Arc::clone(&release), Arc::clone(&started));
        fx.registry
            .register(
                AddressableInterfaceDefinition::new("counter"),
                Arc::new(move || {
                    Box::new(Gated {
                        release: Arc::clone(&r),
                        started: Arc::clone(&s),
                        first: true,
                    })
                }),
            )
            .expect("register");

        // First invocation is dequeued and blocks inside the instance.
        let (c1, h1) = completion();
        fx.execution.handle_invocation(invocation("a", "call"), c1);
        started.notified().await;

        // Second fills the single mailbox slot.
        let (c2, h2) = completion();
        fx.execution.handle_invocation(invocation("a", "call"), c2);

        // Further invocations overflow.
        let (c3, h3) = completion();
        fx.execution.handle_invocation(invocation("a", "call"), c3);
        assert!(matches!(
            h3.wait().await,
            Err(OrbitError::CapacityExceeded {
                resource: "mailbox",
                capacity: 1
            })
        ));

        // Unblock: both queued invocations complete in order.
        release.notify_one();
        assert_eq!(h1.wait().await.expect("first"), json!("done"));
        assert_eq!(h2.wait().await.expect("second"), json!("done"));
    }

    #[tokio::test]
    async fn test_stop_all_deactivates_everything() {
        let fx = fixture(16, Duration::from_secs(600));
        let (_, deactivations) = register_counter(&fx);

        invoke(&fx, "a", "increment").await.expect("value");
        invoke(&fx, "b", "increment").await.expect("value");
        assert_eq!(fx.execution.active_count(), 2);

        fx.execution.stop_all(Duration::from_secs(1)).await;
        assert_eq!(fx.execution.active_count(), 0);
        assert_eq!(deactivations.load(Ordering::SeqCst), 2);
        assert!(fx.backend.is_empty());
    }

    #[tokio::test]
    async fn test_no_overlapping_invocations_per_reference() {
        struct OverlapDetector {
            busy: Arc<std::sync::atomic::AtomicBool>,
            overlaps: Arc<AtomicUsize>,
        }

        #[async_trait]
        impl Addressable for OverlapDetector {
            async fn invoke(&mut self, _method: &str, _args: Vec<Value>) -> OrbitResult<Value> {
                if self.busy.swap(true, Ordering::SeqCst) {
                    self.overlaps.fetch_add(1, Ordering::SeqCst);
                }
                tokio::task::yield_now().await;
                self.busy.store(false, Ordering::SeqCst);
                Ok(Value::Null)
            }
        }

        let fx = fixture(64, Duration::from_secs(600));
        let overlaps = Arc::new(AtomicUsize::new(0));
        let busy = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let (o, b) = (Arc::clone(&overlaps), Arc::clone(&busy));
        fx.registry
            .register(
                AddressableInterfaceDefinition::new("counter"),
                Arc::new(move || {
                    Box::new(OverlapDetector {
                        busy: Arc::clone(&b),
                        overlaps: Arc::clone(&o),
                    })
                }),
            )
            .expect("register");

        let mut handles = Vec::new();
        for _ in 0..32 {
            let (completion_cell, handle) = completion();
            fx.execution
                .handle_invocation(invocation("a", "call"), completion_cell);
            handles.push(handle);
        }
        for handle in handles {
            handle.wait().await.expect("value");
        }
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }
}
