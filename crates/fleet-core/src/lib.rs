//! fleet-core — shared vocabulary for the fleet controller.
//!
//! Every other crate speaks in these types: the worker [`Component`]s, the
//! provider's [`InstanceStateName`]s, the events flowing into the controller
//! loop, the metric records flowing out of it, and the [`FleetConfig`]
//! resolved once at startup.

pub mod config;
pub mod error;
pub mod types;

pub use config::{ComponentConfig, ComponentTable, FleetConfig, TimingConfig, WebhookConfig};
pub use error::{ConfigError, ConfigResult};
pub use types::*;
