//! fleet-provider — the controller's view of the compute provider.
//!
//! The [`CloudProvider`] trait is the narrow request/response contract the
//! controller issues commands through: instance lifecycle calls, desired
//! count reads, alarm and trigger toggles, and metric writes. Every call is
//! independent and may fail; the controller decides what a failure means.
//!
//! [`SimulatedProvider`] is an in-process implementation that applies
//! commands immediately and records every call. The daemon uses it in
//! development and the test suites use it as their fake.

pub mod error;
pub mod provider;
pub mod simulated;

pub use error::{ProviderError, ProviderResult};
pub use provider::{CloudProvider, LATEST_TEMPLATE_VERSION, LaunchRequest};
pub use simulated::{Operation, ProviderCall, SimulatedProvider};
