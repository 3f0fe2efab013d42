//! fleet-controller — keeps a worker fleet sized, recycled, and measured.
//!
//! ```text
//!   webhook ──► updates/queue ─┐
//!   reboot timers ──► due ─────┤
//!   reconcile tasks ──► scale ─┼──► Controller::handle ──► spawned provider calls
//!   ticks (reconcile, refresh, │
//!          collect, report) ───┘
//! ```
//!
//! The [`Controller`] owns the registry, fleet index, queue signals, metric
//! buffer, and recycle timers. Nothing else mutates them.

pub mod controller;
pub mod error;
pub mod metrics;
pub mod reboot;
pub mod reconcile;
pub mod refresh;
pub mod registry;

pub use controller::{Controller, Event};
pub use error::{ControllerError, ControllerResult};
pub use reboot::{RebootDue, RebootTimers};
pub use reconcile::{DesiredCount, ScaleDecision, ScaleEvent};
pub use registry::{FleetRegistry, InstanceRecord, UpdateOutcome};
