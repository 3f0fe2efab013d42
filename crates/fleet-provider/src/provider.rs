//! The cloud provider contract.

use async_trait::async_trait;

use fleet_core::{Component, InstanceDescription, InstanceId, InstanceStateName, MetricPoint};

use crate::error::ProviderResult;

/// Launch template version that always resolves to the newest revision.
pub const LATEST_TEMPLATE_VERSION: &str = "$Latest";

/// Parameters for one launch call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub component: Component,
    pub template_id: String,
    pub template_version: String,
    /// Exact number of instances to launch.
    pub count: u32,
    /// Value of the `Name` tag applied to the instance and its volumes.
    pub name_tag: String,
}

/// Commands and queries the controller issues to the compute provider.
///
/// Implementations must be cheap to share (`Arc<dyn CloudProvider>`); every
/// call runs in its own task.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Launch exactly `request.count` instances.
    async fn launch_instances(
        &self,
        request: &LaunchRequest,
    ) -> ProviderResult<Vec<InstanceDescription>>;

    /// Start a stopped instance, returning its state after the call.
    async fn start_instance(&self, instance_id: &str) -> ProviderResult<InstanceStateName>;

    async fn stop_instance(&self, instance_id: &str) -> ProviderResult<()>;

    async fn terminate_instances(&self, instance_ids: &[InstanceId]) -> ProviderResult<()>;

    /// Current state of each known instance in `instance_ids`.
    async fn describe_instances(
        &self,
        instance_ids: &[InstanceId],
    ) -> ProviderResult<Vec<InstanceDescription>>;

    /// Read the desired instance count stored under `parameter_name`.
    async fn get_desired_count(&self, parameter_name: &str) -> ProviderResult<u32>;

    /// Whether the queue-backlog alarm is currently firing.
    async fn alarm_has_items(&self, alarm_name: &str) -> ProviderResult<bool>;

    async fn enable_alarm_actions(&self, alarm_name: &str) -> ProviderResult<()>;

    async fn disable_alarm_actions(&self, alarm_name: &str) -> ProviderResult<()>;

    async fn enable_lifecycle_trigger(&self, rule_name: &str) -> ProviderResult<()>;

    async fn disable_lifecycle_trigger(&self, rule_name: &str) -> ProviderResult<()>;

    async fn put_metrics(&self, namespace: &str, points: &[MetricPoint]) -> ProviderResult<()>;
}
