//! Stage: composition root and lifecycle of one node's runtime.
//!
//! The stage builds every subsystem, wires the pipeline ↔ execution
//! cross-references (two-phase: construct, then bind weak back-references —
//! no owning back-pointers), and owns the lifecycle:
//!
//! - `start()`: IDLE/STOPPED → STARTING → publish capabilities → launch the
//!   transport receive loop and the tick loop → RUNNING
//! - `stop()`: RUNNING → STOPPING → deactivate all handlers (bounded by the
//!   shutdown deadline) → cancel background loops → close the pipeline →
//!   settle outstanding calls → STOPPED
//!
//! The tick loop fires every `tick_rate`: response-tracker sweep first, then
//! the execution idle sweep. A slow tick is logged and the next one is
//! scheduled immediately — there is no catch-up backlog.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use orbit_core::{
    AddressableDirectory, Clock, InMemoryAddressableDirectory, InMemoryNodeDirectory, JsonCodec,
    MessageCodec, MessageTransport, NodeDirectory, NodeStatus, NullTransport, OrbitError,
    OrbitResult, TokioClock,
};

use crate::config::StageConfig;
use crate::directory::DirectoryFacade;
use crate::execution::{ExecutionConfig, ExecutionSystem};
use crate::net::NetSystem;
use crate::pipeline::{
    CodecStep, IdentityStep, LocalDispatchStep, MessageContainer, Pipeline, PipelineStep,
    RoutingStep, TrackingStep, TransportStep,
};
use crate::pools::{ErrorHandler, Pools, logging_error_handler};
use crate::proxy::ProxyFactory;
use crate::registry::AddressableRegistry;
use crate::responses::ResponseTracker;
use crate::router::Router;

type InboundSlot = Arc<Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>>;

struct StageInner {
    config: StageConfig,
    pools: Arc<Pools>,
    net: Arc<NetSystem>,
    registry: Arc<AddressableRegistry>,
    node_directory: Arc<dyn NodeDirectory>,
    tracker: Arc<ResponseTracker>,
    pipeline: Arc<Pipeline>,
    execution: Arc<ExecutionSystem>,
    inbound: InboundSlot,
    run_token: Mutex<Option<CancellationToken>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// One node's runtime: every subsystem composed and ready to start.
#[derive(Clone)]
pub struct Stage {
    inner: Arc<StageInner>,
}

impl Stage {
    /// Start building a stage with default configuration.
    pub fn builder() -> StageBuilder<JsonCodec> {
        StageBuilder::new()
    }

    /// The registry of interfaces this node hosts. Registrations made after
    /// `start()` are not advertised until the next start.
    pub fn registry(&self) -> &Arc<AddressableRegistry> {
        &self.inner.registry
    }

    /// Factory for client proxies bound to this stage's pipeline.
    pub fn proxy_factory(&self) -> ProxyFactory {
        ProxyFactory::new(Arc::clone(&self.inner.pipeline))
    }

    /// This node's current lifecycle status.
    pub fn status(&self) -> NodeStatus {
        self.inner.net.status()
    }

    /// Number of addressables currently active on this node.
    pub fn active_count(&self) -> usize {
        self.inner.execution.active_count()
    }

    /// Start the stage: advertise capabilities, launch the receive and tick
    /// loops, and transition to RUNNING.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless the stage is IDLE or STOPPED; `Directory` when
    /// publishing node info fails.
    pub async fn start(&self) -> OrbitResult<()> {
        let inner = &self.inner;
        match inner.net.status() {
            NodeStatus::Idle | NodeStatus::Stopped => {}
            other => {
                return Err(OrbitError::invalid_state(format!(
                    "cannot start a stage in status {}",
                    other
                )));
            }
        }
        inner.net.set_status(NodeStatus::Starting);
        tracing::info!(identity = %inner.net.local_identity(), "stage starting");

        // Capability scan: the registry is the authoritative enumeration.
        inner.net.set_capabilities(inner.registry.interfaces());
        inner.node_directory.upsert_node(inner.net.local_info()).await?;

        let token = inner.pools.root_token().child_token();

        // Transport receive loop feeding the inbound pipeline.
        if let Some(inbound) = inner
            .inbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            let task = inner.pools.spawn_io(
                "transport-receive",
                receive_loop(
                    inbound,
                    Arc::clone(&inner.pipeline),
                    Arc::clone(&inner.inbound),
                    token.clone(),
                ),
            );
            inner
                .tasks
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(task);
        }

        // Tick loop: response-tracker sweep first, then execution.
        let task = inner.pools.spawn_cpu(
            "stage-tick",
            tick_loop(
                Arc::clone(&inner.tracker),
                Arc::clone(&inner.execution),
                inner.config.tick_rate,
                token.clone(),
            ),
        );
        inner
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(task);

        *inner.run_token.lock().unwrap_or_else(|e| e.into_inner()) = Some(token);

        inner.net.set_status(NodeStatus::Running);
        inner.node_directory.upsert_node(inner.net.local_info()).await?;
        tracing::info!(identity = %inner.net.local_identity(), "stage started");
        Ok(())
    }

    /// Stop the stage: deactivate all handlers, cancel the loops, close the
    /// pipeline, and settle everything still pending.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless the stage is RUNNING.
    pub async fn stop(&self) -> OrbitResult<()> {
        let inner = &self.inner;
        if inner.net.status() != NodeStatus::Running {
            return Err(OrbitError::invalid_state(format!(
                "cannot stop a stage in status {}",
                inner.net.status()
            )));
        }
        inner.net.set_status(NodeStatus::Stopping);
        tracing::info!(identity = %inner.net.local_identity(), "stage stopping");
        if let Err(error) = inner.node_directory.upsert_node(inner.net.local_info()).await {
            tracing::warn!(%error, "failed to publish stopping status");
        }

        // Drain execution first so in-flight invocations settle.
        inner
            .execution
            .stop_all(inner.config.shutdown_deadline)
            .await;

        // Cancel and join the background loops.
        if let Some(token) = inner
            .run_token
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            token.cancel();
        }
        let tasks: Vec<JoinHandle<()>> = inner
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for task in tasks {
            let _ = task.await;
        }

        // Stop the pipeline and settle whatever is still pending.
        inner.pipeline.close();
        inner.tracker.fail_all_cancelled();

        if let Err(error) = inner
            .node_directory
            .remove_node(&inner.net.local_identity())
            .await
        {
            tracing::warn!(%error, "failed to withdraw node info");
        }
        inner.net.set_status(NodeStatus::Stopped);
        tracing::info!(identity = %inner.net.local_identity(), "stage stopped");
        Ok(())
    }
}

async fn receive_loop(
    mut inbound: mpsc::UnboundedReceiver<Vec<u8>>,
    pipeline: Arc<Pipeline>,
    slot: InboundSlot,
    token: CancellationToken,
) -> OrbitResult<()> {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            frame = inbound.recv() => match frame {
                Some(frame) => {
                    if let Err(error) = pipeline
                        .submit_inbound(MessageContainer::inbound_frame(frame))
                        .await
                    {
                        // At-most-once: a rejected frame is dropped.
                        tracing::warn!(%error, "dropped inbound frame");
                    }
                }
                None => {
                    tracing::debug!("transport inbound channel closed");
                    return Ok(());
                }
            },
        }
    }
    // Park the receiver for a future restart.
    *slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(inbound);
    Ok(())
}

async fn tick_loop(
    tracker: Arc<ResponseTracker>,
    execution: Arc<ExecutionSystem>,
    tick_rate: Duration,
    token: CancellationToken,
) -> OrbitResult<()> {
    let mut delay = tick_rate;
    loop {
        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            _ = tokio::time::sleep(delay) => {}
        }

        let started = Instant::now();
        tracker.on_tick();
        execution.on_tick();
        let elapsed = started.elapsed();

        if elapsed > tick_rate {
            tracing::warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                tick_rate_ms = tick_rate.as_millis() as u64,
                "slow tick"
            );
            delay = Duration::ZERO;
        } else {
            delay = tick_rate - elapsed;
        }
    }
}

/// Builder assembling a [`Stage`] from configuration and collaborators.
///
/// Collaborators default to the in-memory implementations, which makes a
/// freshly built stage a self-contained single-node cluster.
pub struct StageBuilder<C: MessageCodec> {
    config: StageConfig,
    codec: C,
    clock: Option<Arc<dyn Clock>>,
    addressable_directory: Option<Arc<dyn AddressableDirectory>>,
    node_directory: Option<Arc<dyn NodeDirectory>>,
    transport: Option<(Arc<dyn MessageTransport>, mpsc::UnboundedReceiver<Vec<u8>>)>,
    error_handler: Option<ErrorHandler>,
    executors: Option<(Handle, Handle)>,
    registry: Arc<AddressableRegistry>,
}

impl StageBuilder<JsonCodec> {
    /// Start a builder with the JSON codec and default config.
    pub fn new() -> Self {
        Self {
            config: StageConfig::default(),
            codec: JsonCodec,
            clock: None,
            addressable_directory: None,
            node_directory: None,
            transport: None,
            error_handler: None,
            executors: None,
            registry: Arc::new(AddressableRegistry::new()),
        }
    }
}

impl Default for StageBuilder<JsonCodec> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: MessageCodec> StageBuilder<C> {
    /// Replace the stage configuration.
    pub fn with_config(mut self, config: StageConfig) -> Self {
        self.config = config;
        self
    }

    /// Swap the message codec.
    pub fn with_codec<D: MessageCodec>(self, codec: D) -> StageBuilder<D> {
        StageBuilder {
            config: self.config,
            codec,
            clock: self.clock,
            addressable_directory: self.addressable_directory,
            node_directory: self.node_directory,
            transport: self.transport,
            error_handler: self.error_handler,
            executors: self.executors,
            registry: self.registry,
        }
    }

    /// Use an explicit clock (tests use [`orbit_core::ManualClock`]).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use a shared placement directory backend.
    pub fn with_addressable_directory(mut self, directory: Arc<dyn AddressableDirectory>) -> Self {
        self.addressable_directory = Some(directory);
        self
    }

    /// Use a shared cluster membership view.
    pub fn with_node_directory(mut self, nodes: Arc<dyn NodeDirectory>) -> Self {
        self.node_directory = Some(nodes);
        self
    }

    /// Attach the message transport and the channel its inbound frames
    /// arrive on.
    pub fn with_transport(
        mut self,
        transport: Arc<dyn MessageTransport>,
        inbound: mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> Self {
        self.transport = Some((transport, inbound));
        self
    }

    /// Install the global error handler.
    pub fn with_error_handler(mut self, error_handler: ErrorHandler) -> Self {
        self.error_handler = Some(error_handler);
        self
    }

    /// Run logic and I/O on explicit executor handles instead of the
    /// ambient runtime.
    pub fn with_executors(mut self, cpu: Handle, io: Handle) -> Self {
        self.executors = Some((cpu, io));
        self
    }

    /// The registry to install hosted interfaces into.
    pub fn registry(&self) -> &Arc<AddressableRegistry> {
        &self.registry
    }

    /// Assemble the stage.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime and no explicit executors
    /// were provided.
    pub fn build(self) -> Stage {
        let error_handler = self.error_handler.unwrap_or_else(logging_error_handler);
        let pools = Arc::new(match self.executors {
            Some((cpu, io)) => Pools::new(cpu, io, Arc::clone(&error_handler)),
            None => Pools::from_current(Arc::clone(&error_handler)),
        });
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(TokioClock::new()) as Arc<dyn Clock>);
        let backend = self
            .addressable_directory
            .unwrap_or_else(|| Arc::new(InMemoryAddressableDirectory::new()));
        let node_directory = self
            .node_directory
            .unwrap_or_else(|| Arc::new(InMemoryNodeDirectory::new()));
        let (transport, inbound) = match self.transport {
            Some((transport, inbound)) => (transport, inbound),
            None => {
                let (transport, inbound) = NullTransport::new();
                (transport as Arc<dyn MessageTransport>, inbound)
            }
        };

        let net = Arc::new(NetSystem::new(
            self.config.cluster_name.clone(),
            self.config.node_identity.clone(),
            self.config.node_mode,
        ));
        let tracker = Arc::new(ResponseTracker::new(Arc::clone(&clock)));
        let directory = Arc::new(DirectoryFacade::new(backend, net.local_identity()));
        let router = Arc::new(Router::new(
            Arc::clone(&net),
            Arc::clone(&self.registry),
            Arc::clone(&directory),
            Arc::clone(&node_directory),
        ));

        let steps: Vec<Arc<dyn PipelineStep>> = vec![
            Arc::new(IdentityStep::new(Arc::clone(&net), Arc::clone(&clock))),
            Arc::new(TrackingStep::new(
                Arc::clone(&tracker),
                Arc::clone(&self.registry),
                self.config.message_timeout,
            )),
            Arc::new(RoutingStep::new(router)),
            Arc::new(LocalDispatchStep::new(Arc::clone(&net))),
            Arc::new(CodecStep::new(self.codec)),
            Arc::new(TransportStep::new(transport)),
        ];
        let pipeline = Pipeline::new(
            steps,
            self.config.pipeline_buffer_count,
            Arc::clone(&tracker),
            Arc::clone(&net),
            Arc::clone(&pools),
            Arc::clone(&error_handler),
        );
        let execution = ExecutionSystem::new(
            Arc::clone(&self.registry),
            Arc::clone(&directory),
            Arc::clone(&clock),
            Arc::clone(&pools),
            ExecutionConfig {
                mailbox_capacity: self.config.mailbox_capacity,
                time_to_live: self.config.time_to_live,
            },
            Arc::clone(&error_handler),
        );

        // Bind the pipeline ↔ execution cycle through weak references.
        pipeline.bind_execution(Arc::downgrade(&execution));
        execution.bind_pipeline(Arc::downgrade(&pipeline));

        Stage {
            inner: Arc::new(StageInner {
                config: self.config,
                pools,
                net,
                registry: self.registry,
                node_directory,
                tracker,
                pipeline,
                execution,
                inbound: Arc::new(Mutex::new(Some(inbound))),
                run_token: Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }
}
