//! Periodic state refresh.
//!
//! Lifecycle notifications can be lost. Every refresh period the controller
//! asks the provider for the current state of every tracked instance and
//! feeds the answers back through the same channel the webhook uses, so
//! they are applied exactly like notifications.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use fleet_core::{InstanceId, InstanceUpdate};
use fleet_provider::CloudProvider;

/// Describe `instance_ids` and send the results as one update batch.
pub async fn refresh(
    provider: Arc<dyn CloudProvider>,
    instance_ids: Vec<InstanceId>,
    updates: mpsc::Sender<Vec<InstanceUpdate>>,
) {
    let described = match provider.describe_instances(&instance_ids).await {
        Ok(described) => described,
        Err(e) => {
            error!(count = instance_ids.len(), error = %e, "failed to refresh instance states");
            return;
        }
    };

    debug!(
        requested = instance_ids.len(),
        described = described.len(),
        "refreshed instance states"
    );
    let batch: Vec<InstanceUpdate> = described.into_iter().map(InstanceUpdate::from).collect();
    if batch.is_empty() {
        return;
    }
    if updates.send(batch).await.is_err() {
        warn!("controller stopped before refresh results were delivered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::{Component, FleetConfig, InstanceStateName};
    use fleet_provider::{Operation, SimulatedProvider};

    use crate::reconcile::launch_request;

    #[tokio::test]
    async fn refresh_sends_current_states() {
        let config = FleetConfig::scaffold("development");
        let provider = Arc::new(SimulatedProvider::from_config(&config));
        let launched = provider
            .launch_instances(&launch_request(&config, Component::Spider, 2))
            .await
            .unwrap();
        provider
            .set_instance_state(&launched[0].instance_id, InstanceStateName::Running)
            .await;

        let (tx, mut rx) = mpsc::channel(4);
        let ids = launched.iter().map(|d| d.instance_id.clone()).collect();
        refresh(provider, ids, tx).await;

        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].instance_id, launched[0].instance_id);
        assert_eq!(batch[0].state, InstanceStateName::Running);
        assert_eq!(batch[1].state, InstanceStateName::Pending);
    }

    #[tokio::test]
    async fn describe_failure_sends_nothing() {
        let provider = Arc::new(SimulatedProvider::new());
        provider.fail(Operation::Describe).await;
        let (tx, mut rx) = mpsc::channel(4);

        refresh(provider, vec!["i-1".to_string()], tx).await;
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn unknown_instances_are_skipped() {
        let provider = Arc::new(SimulatedProvider::new());
        let (tx, mut rx) = mpsc::channel(4);

        refresh(provider, vec!["i-gone".to_string()], tx).await;
        assert!(rx.recv().await.is_none());
    }
}
