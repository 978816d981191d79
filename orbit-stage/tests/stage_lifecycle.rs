//! Single-node stage tests: lifecycle transitions, local activation and
//! dispatch, idle deactivation, and externally managed singletons.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use orbit_core::{
    Addressable, AddressableDirectory, AddressableInterfaceDefinition, CodecError,
    InMemoryAddressableDirectory, Key, MessageCodec, NetTarget, NodeIdentity, NodeStatus,
    OrbitError, OrbitResult, RoutingPolicy, unknown_method,
};
use orbit_stage::{Stage, StageConfig};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
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

struct CounterHooks {
    activations: Arc<AtomicUsize>,
    deactivations: Arc<AtomicUsize>,
}

fn register_counter(
    builder: &orbit_stage::StageBuilder<impl MessageCodec>,
    definition: AddressableInterfaceDefinition,
) -> CounterHooks {
    let activations = Arc::new(AtomicUsize::new(0));
    let deactivations = Arc::new(AtomicUsize::new(0));
    let (a, d) = (Arc::clone(&activations), Arc::clone(&deactivations));
    builder
        .registry()
        .register(
            definition,
            Arc::new(move || {
                Box::new(Counter {
                    count: 0,
                    activations: Arc::clone(&a),
                    deactivations: Arc::clone(&d),
                })
            }),
        )
        .expect("register");
    CounterHooks {
        activations,
        deactivations,
    }
}

/// A codec wrapper that counts encodes, to prove local dispatch never
/// serializes.
#[derive(Clone)]
struct CountingCodec {
    inner: orbit_core::JsonCodec,
    encodes: Arc<AtomicUsize>,
}

impl MessageCodec for CountingCodec {
    fn encode<T: serde::Serialize>(&self, msg: &T) -> Result<Vec<u8>, CodecError> {
        self.encodes.fetch_add(1, Ordering::SeqCst);
        self.inner.encode(msg)
    }

    fn decode<T: serde::de::DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError> {
        self.inner.decode(buf)
    }
}

#[tokio::test]
async fn test_local_activation_roundtrip_without_serialization() {
    init_tracing();
    let backend = Arc::new(InMemoryAddressableDirectory::new());
    let encodes = Arc::new(AtomicUsize::new(0));

    let builder = Stage::builder()
        .with_config(StageConfig::named("n1"))
        .with_codec(CountingCodec {
            inner: orbit_core::JsonCodec,
            encodes: Arc::clone(&encodes),
        })
        .with_addressable_directory(Arc::clone(&backend) as Arc<dyn AddressableDirectory>);
    let hooks = register_counter(
        &builder,
        AddressableInterfaceDefinition::new("counter").with_routing(RoutingPolicy {
            persistent: true,
            prefer_local: true,
        }),
    );
    let stage = builder.build();
    stage.start().await.expect("start");

    let proxy = stage.proxy_factory().reference("counter", Key::string("k1"));
    assert_eq!(proxy.invoke("increment", vec![]).await.expect("invoke"), json!(1));
    assert_eq!(proxy.invoke("increment", vec![]).await.expect("invoke"), json!(2));

    // Activated once, placed locally, never serialized.
    assert_eq!(hooks.activations.load(Ordering::SeqCst), 1);
    assert_eq!(encodes.load(Ordering::SeqCst), 0);
    let reference = proxy.reference().clone();
    assert_eq!(
        backend.get(&reference).await.expect("get"),
        Some(NetTarget::Unicast(NodeIdentity::new("n1")))
    );

    stage.stop().await.expect("stop");
    assert_eq!(hooks.deactivations.load(Ordering::SeqCst), 1);
    // Stop released the placement.
    assert!(backend.is_empty());
}

#[tokio::test]
async fn test_lifecycle_status_transitions() {
    init_tracing();
    let stage = Stage::builder()
        .with_config(StageConfig::named("n1"))
        .build();
    assert_eq!(stage.status(), NodeStatus::Idle);

    stage.start().await.expect("start");
    assert_eq!(stage.status(), NodeStatus::Running);

    // Starting twice is a state violation.
    let err = stage.start().await.expect_err("double start");
    assert!(matches!(err, OrbitError::InvalidState { .. }));

    stage.stop().await.expect("stop");
    assert_eq!(stage.status(), NodeStatus::Stopped);

    let err = stage.stop().await.expect_err("double stop");
    assert!(matches!(err, OrbitError::InvalidState { .. }));
}

#[tokio::test]
async fn test_idle_deactivation_and_reactivation() {
    init_tracing();
    let builder = Stage::builder().with_config(
        StageConfig::named("n1")
            .with_tick_rate(Duration::from_millis(25))
            .with_time_to_live(Duration::from_millis(100)),
    );
    let hooks = register_counter(&builder, AddressableInterfaceDefinition::new("counter"));
    let stage = builder.build();
    stage.start().await.expect("start");

    let proxy = stage.proxy_factory().reference("counter", Key::string("k1"));
    assert_eq!(proxy.invoke("increment", vec![]).await.expect("invoke"), json!(1));
    assert_eq!(stage.active_count(), 1);

    // Wait well past the time-to-live so a tick reaps the handler.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(stage.active_count(), 0);
    assert_eq!(hooks.deactivations.load(Ordering::SeqCst), 1);

    // A new invocation re-activates a fresh instance.
    assert_eq!(proxy.invoke("increment", vec![]).await.expect("invoke"), json!(1));
    assert_eq!(hooks.activations.load(Ordering::SeqCst), 2);

    stage.stop().await.expect("stop");
}

#[tokio::test]
async fn test_registered_singleton_is_externally_managed() {
    init_tracing();
    let activations = Arc::new(AtomicUsize::new(0));
    let deactivations = Arc::new(AtomicUsize::new(0));

    let builder = Stage::builder().with_config(
        StageConfig::named("n1")
            .with_tick_rate(Duration::from_millis(25))
            .with_time_to_live(Duration::from_millis(50)),
    );
    builder
        .registry()
        .register_instance(
            AddressableInterfaceDefinition::new("counter"),
            Key::NoKey,
            Box::new(Counter {
                count: 0,
                activations: Arc::clone(&activations),
                deactivations: Arc::clone(&deactivations),
            }),
        )
        .expect("register instance");
    let stage = builder.build();
    stage.start().await.expect("start");

    let proxy = stage.proxy_factory().reference("counter", Key::NoKey);
    assert_eq!(proxy.invoke("increment", vec![]).await.expect("invoke"), json!(1));

    // Idle well past the time-to-live: the singleton must survive the sweep
    // with its state intact and its hooks never called.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(stage.active_count(), 1);
    assert_eq!(proxy.invoke("increment", vec![]).await.expect("invoke"), json!(2));
    assert_eq!(activations.load(Ordering::SeqCst), 0);
    assert_eq!(deactivations.load(Ordering::SeqCst), 0);

    stage.stop().await.expect("stop");
}

#[tokio::test]
async fn test_unhosted_interface_has_no_available_node() {
    init_tracing();
    let stage = Stage::builder()
        .with_config(StageConfig::named("n1"))
        .build();
    stage.start().await.expect("start");

    let proxy = stage.proxy_factory().reference("missing", Key::NoKey);
    let err = proxy.invoke("anything", vec![]).await.expect_err("no host");
    assert!(matches!(err, OrbitError::NoAvailableNode { .. }));

    stage.stop().await.expect("stop");
}
