//! Instance registry and per-component fleet index.
//!
//! Pure state: no I/O and no timers. The controller loop is the only owner
//! and interprets the [`UpdateOutcome`] of each lifecycle update to decide
//! which commands to issue.

use std::collections::{BTreeMap, HashMap};

use fleet_core::{Component, InstanceId, InstanceStateName, InstanceUpdate, MetricSnapshot};

/// What the controller knows about one tracked instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRecord {
    pub component: Component,
    pub state: InstanceStateName,
    /// Selected for scale-down; a terminate call is in flight.
    pub pending_termination: bool,
    /// A start was issued since the instance last entered `stopped`.
    pub start_issued: bool,
}

/// Result of applying a lifecycle update to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The id is not tracked; nothing changed.
    Untracked,
    /// The instance was already in this state.
    Unchanged,
    /// State recorded; no side effect required.
    Recorded { previous: InstanceStateName },
    /// The instance is `stopped` and no start has been issued for it since
    /// it stopped. Reported again for repeated `stopped` updates until
    /// [`FleetRegistry::mark_start_issued`] is called.
    Stopped { component: Component },
    /// The instance terminated and was removed from registry and index.
    Removed { component: Component },
}

/// Registry of live instances plus the per-component index.
///
/// Every id in the index has a registry entry and no entry is ever in the
/// `terminated` state: both structures change together in every method.
#[derive(Debug, Default)]
pub struct FleetRegistry {
    instances: HashMap<InstanceId, InstanceRecord>,
    index: BTreeMap<Component, Vec<InstanceId>>,
}

impl FleetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a newly launched instance.
    ///
    /// Returns `false` (and records nothing) if the id is already tracked or
    /// the reported state is `terminated`.
    pub fn insert(
        &mut self,
        instance_id: &str,
        component: Component,
        state: InstanceStateName,
    ) -> bool {
        if state == InstanceStateName::Terminated || self.instances.contains_key(instance_id) {
            return false;
        }
        self.instances.insert(
            instance_id.to_string(),
            InstanceRecord {
                component,
                state,
                pending_termination: false,
                start_issued: false,
            },
        );
        self.index
            .entry(component)
            .or_default()
            .push(instance_id.to_string());
        true
    }

    /// Apply a lifecycle update.
    pub fn apply(&mut self, update: &InstanceUpdate) -> UpdateOutcome {
        let Some(record) = self.instances.get_mut(&update.instance_id) else {
            return UpdateOutcome::Untracked;
        };

        let previous = record.state;
        let component = record.component;
        if previous == update.state {
            if previous == InstanceStateName::Stopped && !record.start_issued {
                return UpdateOutcome::Stopped { component };
            }
            return UpdateOutcome::Unchanged;
        }

        match update.state {
            InstanceStateName::Terminated => {
                self.remove(&update.instance_id);
                UpdateOutcome::Removed { component }
            }
            InstanceStateName::Stopped => {
                record.state = update.state;
                record.start_issued = false;
                UpdateOutcome::Stopped { component }
            }
            state => {
                record.state = state;
                record.start_issued = false;
                UpdateOutcome::Recorded { previous }
            }
        }
    }

    fn remove(&mut self, instance_id: &str) -> Option<InstanceRecord> {
        let record = self.instances.remove(instance_id)?;
        if let Some(ids) = self.index.get_mut(&record.component) {
            ids.retain(|id| id != instance_id);
        }
        Some(record)
    }

    pub fn get(&self, instance_id: &str) -> Option<&InstanceRecord> {
        self.instances.get(instance_id)
    }

    pub fn contains(&self, instance_id: &str) -> bool {
        self.instances.contains_key(instance_id)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Every tracked id, grouped by component.
    pub fn ids(&self) -> Vec<InstanceId> {
        self.index.values().flatten().cloned().collect()
    }

    /// Ids in `component`'s index, in insertion order.
    pub fn component_ids(&self, component: Component) -> &[InstanceId] {
        self.index.get(&component).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Indexed instances of `component` not already selected for scale-down.
    pub fn live_count(&self, component: Component) -> usize {
        self.component_ids(component)
            .iter()
            .filter(|id| {
                self.instances
                    .get(*id)
                    .is_some_and(|r| !r.pending_termination)
            })
            .count()
    }

    /// Pick up to `count` instances of `component` to terminate.
    ///
    /// Selection is arbitrary: nothing tells us whether an instance is busy,
    /// so this takes the first eligible ids in index order.
    pub fn termination_candidates(&self, component: Component, count: usize) -> Vec<InstanceId> {
        self.component_ids(component)
            .iter()
            .filter(|id| {
                self.instances
                    .get(*id)
                    .is_some_and(|r| !r.pending_termination)
            })
            .take(count)
            .cloned()
            .collect()
    }

    pub fn mark_pending_termination(&mut self, instance_ids: &[InstanceId]) {
        for id in instance_ids {
            if let Some(record) = self.instances.get_mut(id) {
                record.pending_termination = true;
            }
        }
    }

    /// Undo [`Self::mark_pending_termination`] after a failed terminate call.
    pub fn clear_pending_termination(&mut self, instance_ids: &[InstanceId]) {
        for id in instance_ids {
            if let Some(record) = self.instances.get_mut(id) {
                record.pending_termination = false;
            }
        }
    }

    /// Record that a start call is out for a stopped instance. Cleared when
    /// the instance leaves `stopped`.
    pub fn mark_start_issued(&mut self, instance_id: &str) {
        if let Some(record) = self.instances.get_mut(instance_id) {
            record.start_issued = true;
        }
    }

    /// Undo [`Self::mark_start_issued`] after a failed start call.
    pub fn clear_start_issued(&mut self, instance_id: &str) {
        if let Some(record) = self.instances.get_mut(instance_id) {
            record.start_issued = false;
        }
    }

    /// Count `component`'s instances in each state.
    pub fn snapshot(&self, component: Component, timestamp: u64) -> MetricSnapshot {
        let mut snapshot = MetricSnapshot::empty(component, timestamp);
        for id in self.component_ids(component) {
            if let Some(record) = self.instances.get(id) {
                *snapshot.counts.entry(record.state).or_insert(0) += 1;
            }
        }
        snapshot
    }

    /// Whether registry and index agree.
    pub fn is_consistent(&self) -> bool {
        let indexed: usize = self.index.values().map(Vec::len).sum();
        indexed == self.instances.len()
            && self.index.iter().all(|(component, ids)| {
                ids.iter().all(|id| {
                    self.instances.get(id).is_some_and(|r| {
                        r.component == *component && r.state != InstanceStateName::Terminated
                    })
                })
            })
    }
}
