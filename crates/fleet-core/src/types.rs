//! Domain types for the fleet controller.
//!
//! These types describe worker classes, instance lifecycle states, the
//! events fed into the controller loop, and the metric records it emits.

use std::collections::BTreeMap;
use std::fmt;

/// Opaque provider-assigned instance identifier.
pub type InstanceId = String;

// ── Component ─────────────────────────────────────────────────────

/// A worker class with its own desired count, queue signal, and pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Component {
    Spider,
    Scraper,
}

impl Component {
    /// Every component, in a stable order.
    pub const ALL: [Component; 2] = [Component::Spider, Component::Scraper];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Spider => "spider",
            Component::Scraper => "scraper",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Instance state ────────────────────────────────────────────────

/// Lifecycle state of a compute instance, as named by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InstanceStateName {
    Pending,
    Running,
    Stopping,
    Stopped,
    ShuttingDown,
    Terminated,
}

impl InstanceStateName {
    /// Every state, in lifecycle order.
    pub const ALL: [InstanceStateName; 6] = [
        InstanceStateName::Pending,
        InstanceStateName::Running,
        InstanceStateName::Stopping,
        InstanceStateName::Stopped,
        InstanceStateName::ShuttingDown,
        InstanceStateName::Terminated,
    ];

    /// Wire name used in webhook paths and provider responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStateName::Pending => "pending",
            InstanceStateName::Running => "running",
            InstanceStateName::Stopping => "stopping",
            InstanceStateName::Stopped => "stopped",
            InstanceStateName::ShuttingDown => "shutting-down",
            InstanceStateName::Terminated => "terminated",
        }
    }

    /// Name of the occupancy metric reported for this state.
    pub fn metric_name(&self) -> &'static str {
        match self {
            InstanceStateName::Pending => "PendingInstances",
            InstanceStateName::Running => "RunningInstances",
            InstanceStateName::Stopping => "StoppingInstances",
            InstanceStateName::Stopped => "StoppedInstances",
            InstanceStateName::ShuttingDown => "ShuttingDownInstances",
            InstanceStateName::Terminated => "TerminatedInstances",
        }
    }

    /// Whether the instance is booting or serving, i.e. eligible for a
    /// forced recycle.
    pub fn is_active(&self) -> bool {
        matches!(self, InstanceStateName::Pending | InstanceStateName::Running)
    }
}

impl fmt::Display for InstanceStateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Events ────────────────────────────────────────────────────────

/// A lifecycle notification: instance `instance_id` is now in `state`.
///
/// Produced by the webhook ingress and by periodic refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceUpdate {
    pub instance_id: InstanceId,
    pub state: InstanceStateName,
}

impl InstanceUpdate {
    pub fn new(instance_id: impl Into<InstanceId>, state: InstanceStateName) -> Self {
        Self {
            instance_id: instance_id.into(),
            state,
        }
    }
}

/// A change in a component's queue backlog signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueUpdate {
    pub component: Component,
    pub has_items: bool,
}

/// An instance as reported by the provider (launch or describe result).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceDescription {
    pub instance_id: InstanceId,
    pub state: InstanceStateName,
}

impl From<InstanceDescription> for InstanceUpdate {
    fn from(desc: InstanceDescription) -> Self {
        InstanceUpdate {
            instance_id: desc.instance_id,
            state: desc.state,
        }
    }
}

// ── Metrics ───────────────────────────────────────────────────────

/// Per-state instance counts for one component at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSnapshot {
    pub component: Component,
    /// Unix timestamp, rounded to the nearest second.
    pub timestamp: u64,
    /// Count for every state; states with no instances map to zero.
    pub counts: BTreeMap<InstanceStateName, u32>,
}

impl MetricSnapshot {
    /// A snapshot with every state present and zeroed.
    pub fn empty(component: Component, timestamp: u64) -> Self {
        Self {
            component,
            timestamp,
            counts: InstanceStateName::ALL.into_iter().map(|s| (s, 0)).collect(),
        }
    }

    pub fn count(&self, state: InstanceStateName) -> u32 {
        self.counts.get(&state).copied().unwrap_or(0)
    }
}

/// A single data point written to the monitoring sink.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    /// e.g. `RunningInstances`.
    pub metric_name: String,
    pub environment: String,
    pub component: Component,
    pub timestamp: u64,
    pub value: f64,
    /// Storage resolution in seconds.
    pub storage_resolution: u32,
}
