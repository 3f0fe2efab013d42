//! Desired-count reconciliation.
//!
//! Runs in two phases so the loop never blocks on the provider:
//!
//! 1. [`read_desired_counts`] runs in a background task and reports every
//!    component's desired count back as [`ScaleEvent::DesiredCounts`].
//! 2. The loop compares each count with the current fleet size
//!    ([`evaluate`]) and spawns [`launch`] or [`terminate`] tasks, whose
//!    results come back as further [`ScaleEvent`]s.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info};

use fleet_core::{Component, FleetConfig, InstanceDescription, InstanceId};
use fleet_provider::{CloudProvider, LATEST_TEMPLATE_VERSION, LaunchRequest};

/// Results of background provider tasks, delivered to the controller loop.
#[derive(Debug, Clone, PartialEq)]
pub enum ScaleEvent {
    /// Desired counts read this round. Components whose read failed are
    /// absent and are left alone until the next round.
    DesiredCounts(Vec<DesiredCount>),
    /// A launch call finished. `instances` is empty if it failed.
    Launched {
        component: Component,
        requested: u32,
        instances: Vec<InstanceDescription>,
    },
    /// A terminate call failed; the instances are still live.
    TerminateFailed {
        component: Component,
        instance_ids: Vec<InstanceId>,
    },
    /// A start call for a stopped instance failed.
    StartFailed { instance_id: InstanceId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DesiredCount {
    pub component: Component,
    pub desired: u32,
}

/// What to do about one component's fleet size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    Launch(u32),
    Terminate(u32),
    NoChange,
}

/// Compare a desired count with the current fleet size.
pub fn evaluate(desired: u32, current: u32) -> ScaleDecision {
    match desired.cmp(&current) {
        std::cmp::Ordering::Greater => ScaleDecision::Launch(desired - current),
        std::cmp::Ordering::Less => ScaleDecision::Terminate(current - desired),
        std::cmp::Ordering::Equal => ScaleDecision::NoChange,
    }
}

/// Read every component's desired count. A failed read is logged and the
/// component is skipped for this round.
pub async fn read_desired_counts(
    provider: &dyn CloudProvider,
    config: &FleetConfig,
) -> Vec<DesiredCount> {
    let mut counts = Vec::with_capacity(Component::ALL.len());
    for component in Component::ALL {
        let parameter = &config.component(component).count_parameter_name;
        match provider.get_desired_count(parameter).await {
            Ok(desired) => counts.push(DesiredCount { component, desired }),
            Err(e) => error!(%component, %parameter, error = %e, "failed to read desired count"),
        }
    }
    counts
}

/// Build the launch request for `count` new instances of `component`.
pub fn launch_request(config: &FleetConfig, component: Component, count: u32) -> LaunchRequest {
    LaunchRequest {
        component,
        template_id: config.component(component).launch_template_id.clone(),
        template_version: LATEST_TEMPLATE_VERSION.to_string(),
        count,
        name_tag: config.worker_name(component),
    }
}

/// Launch instances and report the result to the loop.
pub async fn launch(
    provider: Arc<dyn CloudProvider>,
    request: LaunchRequest,
    tx: mpsc::UnboundedSender<ScaleEvent>,
) {
    let component = request.component;
    let instances = match provider.launch_instances(&request).await {
        Ok(instances) => {
            info!(%component, count = instances.len(), "launched instances");
            instances
        }
        Err(e) => {
            error!(%component, count = request.count, error = %e, "failed to launch instances");
            Vec::new()
        }
    };
    let _ = tx.send(ScaleEvent::Launched {
        component,
        requested: request.count,
        instances,
    });
}

/// Terminate instances. Only a failure is reported back; success is
/// observed through the `terminated` lifecycle updates that follow.
pub async fn terminate(
    provider: Arc<dyn CloudProvider>,
    component: Component,
    instance_ids: Vec<InstanceId>,
    tx: mpsc::UnboundedSender<ScaleEvent>,
) {
    match provider.terminate_instances(&instance_ids).await {
        Ok(()) => info!(%component, count = instance_ids.len(), "terminating instances"),
        Err(e) => {
            error!(%component, count = instance_ids.len(), error = %e, "failed to terminate instances");
            let _ = tx.send(ScaleEvent::TerminateFailed {
                component,
                instance_ids,
            });
        }
    }
}
