//! Fleet occupancy metrics: periodic snapshots and batched reporting.
//!
//! Collection is synchronous and runs on the controller loop, so a snapshot
//! always reflects a consistent registry. Reporting drains the buffer into
//! [`MetricPoint`]s which a background task writes to the provider.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, error};

use fleet_core::{Component, InstanceStateName, MetricPoint, MetricSnapshot};
use fleet_provider::CloudProvider;

use crate::registry::FleetRegistry;

/// Storage resolution requested for every point, in seconds.
pub const STORAGE_RESOLUTION_SECS: u32 = 1;

/// Snapshots collected since the last report, per component.
#[derive(Debug, Default)]
pub struct MetricsBuffer {
    snapshots: BTreeMap<Component, Vec<MetricSnapshot>>,
}

impl MetricsBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one snapshot per component.
    pub fn collect(&mut self, registry: &FleetRegistry, timestamp: u64) {
        for component in Component::ALL {
            self.snapshots
                .entry(component)
                .or_default()
                .push(registry.snapshot(component, timestamp));
        }
    }

    /// Total number of buffered snapshots across all components.
    pub fn len(&self) -> usize {
        self.snapshots.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Convert every buffered snapshot to points and clear the buffer.
    ///
    /// Each snapshot yields one point per instance state, zeros included.
    pub fn drain_points(&mut self, environment: &str) -> Vec<MetricPoint> {
        let mut points = Vec::with_capacity(self.len() * InstanceStateName::ALL.len());
        for (component, snapshots) in std::mem::take(&mut self.snapshots) {
            for snapshot in snapshots {
                for state in InstanceStateName::ALL {
                    points.push(MetricPoint {
                        metric_name: state.metric_name().to_string(),
                        environment: environment.to_string(),
                        component,
                        timestamp: snapshot.timestamp,
                        value: f64::from(snapshot.count(state)),
                        storage_resolution: STORAGE_RESOLUTION_SECS,
                    });
                }
            }
        }
        points
    }
}

/// Round a wall-clock time to the nearest whole second since the epoch.
pub fn round_to_second(time: SystemTime) -> u64 {
    let since_epoch = time.duration_since(UNIX_EPOCH).unwrap_or_default();
    let secs = since_epoch.as_secs();
    if since_epoch.subsec_millis() >= 500 {
        secs + 1
    } else {
        secs
    }
}

/// Current time, rounded to the nearest second.
pub fn now_rounded() -> u64 {
    round_to_second(SystemTime::now())
}

/// Write `points` to the provider. Failures are logged; the points are
/// not retried.
pub async fn flush(provider: Arc<dyn CloudProvider>, namespace: String, points: Vec<MetricPoint>) {
    match provider.put_metrics(&namespace, &points).await {
        Ok(()) => debug!(count = points.len(), %namespace, "metrics reported"),
        Err(e) => error!(count = points.len(), error = %e, "failed to report metrics"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use fleet_provider::SimulatedProvider;

    fn registry() -> FleetRegistry {
        let mut registry = FleetRegistry::new();
        registry.insert("i-1", Component::Spider, InstanceStateName::Running);
        registry.insert("i-2", Component::Spider, InstanceStateName::Stopped);
        registry.insert("i-3", Component::Scraper, InstanceStateName::Pending);
        registry
    }

    #[test]
    fn collect_appends_one_snapshot_per_component() {
        let registry = registry();
        let mut buffer = MetricsBuffer::new();
        for t in 0..3 {
            buffer.collect(&registry, 100 + t);
        }
        assert_eq!(buffer.len(), 3 * Component::ALL.len());
    }

    #[test]
    fn drain_emits_every_state_and_clears() {
        let registry = registry();
        let mut buffer = MetricsBuffer::new();
        buffer.collect(&registry, 100);
        buffer.collect(&registry, 101);

        let points = buffer.drain_points("production");
        assert_eq!(points.len(), 2 * 2 * 6);
        assert!(buffer.is_empty());
        assert!(buffer.drain_points("production").is_empty());

        let running_spider: Vec<_> = points
            .iter()
            .filter(|p| p.component == Component::Spider && p.metric_name == "RunningInstances")
            .collect();
        assert_eq!(running_spider.len(), 2);
        assert!(running_spider.iter().all(|p| p.value == 1.0));
        assert!(points.iter().all(|p| p.environment == "production"));
        assert!(points.iter().all(|p| p.storage_resolution == 1));

        let terminated: Vec<_> = points
            .iter()
            .filter(|p| p.metric_name == "TerminatedInstances")
            .collect();
        assert_eq!(terminated.len(), 4);
        assert!(terminated.iter().all(|p| p.value == 0.0));
    }

    #[test]
    fn empty_fleet_still_reports_zeros() {
        let mut buffer = MetricsBuffer::new();
        buffer.collect(&FleetRegistry::new(), 7);
        let points = buffer.drain_points("development");
        assert_eq!(points.len(), 12);
        assert!(points.iter().all(|p| p.value == 0.0 && p.timestamp == 7));
    }

    #[test]
    fn timestamps_round_to_nearest_second() {
        let at = |ms: u64| UNIX_EPOCH + Duration::from_millis(ms);
        assert_eq!(round_to_second(at(10_000)), 10);
        assert_eq!(round_to_second(at(10_499)), 10);
        assert_eq!(round_to_second(at(10_500)), 11);
        assert_eq!(round_to_second(at(10_999)), 11);
    }

    #[tokio::test]
    async fn flush_writes_to_provider() {
        let provider = Arc::new(SimulatedProvider::new());
        let mut buffer = MetricsBuffer::new();
        buffer.collect(&registry(), 5);
        let points = buffer.drain_points("development");

        flush(provider.clone(), "CaseHarvester".to_string(), points).await;
        assert_eq!(provider.metrics().await.len(), 12);
    }

    #[tokio::test]
    async fn flush_failure_is_absorbed() {
        let provider = Arc::new(SimulatedProvider::new());
        provider.fail(fleet_provider::Operation::PutMetrics).await;
        let mut buffer = MetricsBuffer::new();
        buffer.collect(&registry(), 5);

        flush(provider.clone(), "CaseHarvester".to_string(), buffer.drain_points("development")).await;
        assert!(provider.metrics().await.is_empty());
    }
}
