//! Stage configuration.

use std::time::Duration;

use orbit_core::{NodeIdentity, NodeMode};

/// Configuration for one stage (one node's runtime).
///
/// Defaults are production-oriented; tests typically shrink `tick_rate`,
/// `time_to_live`, and `message_timeout`.
#[derive(Clone, Debug)]
pub struct StageConfig {
    /// Cluster this node joins.
    pub cluster_name: String,

    /// Unique identity of this node. Generated randomly when not assigned.
    pub node_identity: NodeIdentity,

    /// Whether this node hosts addressables or only invokes them.
    pub node_mode: NodeMode,

    /// Interval between maintenance ticks (timeout sweep, idle deactivation).
    pub tick_rate: Duration,

    /// Idle time after which an auto-deactivating handler is reaped.
    pub time_to_live: Duration,

    /// Default response timeout for invocations, when neither the interface
    /// definition nor the call overrides it.
    pub message_timeout: Duration,

    /// Maximum messages in flight through the pipeline.
    pub pipeline_buffer_count: usize,

    /// Bounded capacity of each handler's mailbox.
    pub mailbox_capacity: usize,

    /// How long `stop()` waits for handlers to deactivate before aborting
    /// the stragglers.
    pub shutdown_deadline: Duration,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            cluster_name: "orbit".to_string(),
            node_identity: NodeIdentity::random(),
            node_mode: NodeMode::Host,
            tick_rate: Duration::from_millis(1_000),
            time_to_live: Duration::from_millis(600_000),
            message_timeout: Duration::from_millis(10_000),
            pipeline_buffer_count: 10_000,
            mailbox_capacity: 128,
            shutdown_deadline: Duration::from_secs(10),
        }
    }
}

impl StageConfig {
    /// Configuration with a fixed node identity, defaults otherwise.
    pub fn named(identity: impl Into<String>) -> Self {
        Self {
            node_identity: NodeIdentity::new(identity),
            ..Self::default()
        }
    }

    /// Set the cluster name.
    pub fn with_cluster_name(mut self, name: impl Into<String>) -> Self {
        self.cluster_name = name.into();
        self
    }

    /// Set the node mode.
    pub fn with_node_mode(mut self, mode: NodeMode) -> Self {
        self.node_mode = mode;
        self
    }

    /// Set the tick interval.
    pub fn with_tick_rate(mut self, tick_rate: Duration) -> Self {
        self.tick_rate = tick_rate;
        self
    }

    /// Set the idle time-to-live.
    pub fn with_time_to_live(mut self, ttl: Duration) -> Self {
        self.time_to_live = ttl;
        self
    }

    /// Set the default response timeout.
    pub fn with_message_timeout(mut self, timeout: Duration) -> Self {
        self.message_timeout = timeout;
        self
    }

    /// Set the pipeline admission capacity.
    pub fn with_pipeline_buffer_count(mut self, count: usize) -> Self {
        self.pipeline_buffer_count = count;
        self
    }

    /// Set the per-handler mailbox capacity.
    pub fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity;
        self
    }

    /// Set the shutdown deadline for handler deactivation.
    pub fn with_shutdown_deadline(mut self, deadline: Duration) -> Self {
        self.shutdown_deadline = deadline;
        self
    }
}
