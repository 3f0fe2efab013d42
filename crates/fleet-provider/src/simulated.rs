//! In-process simulated provider.
//!
//! Keeps instances, alarms, rules, and parameters in memory and applies
//! every command immediately:
//!
//! ```text
//! launch    → pending
//! start     → pending   (only from stopped)
//! stop      → stopped   (only from pending/running)
//! terminate → terminated
//! ```
//!
//! Desired counts can be read from a TOML parameter file that is re-read on
//! every call, so an operator can resize a development fleet by editing it.
//! Recent calls and metric points are kept in bounded histories, and
//! individual operations can be made to fail.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use fleet_core::{
    Component, FleetConfig, InstanceDescription, InstanceId, InstanceStateName, MetricPoint,
};

use crate::error::{ProviderError, ProviderResult};
use crate::provider::{CloudProvider, LaunchRequest};

/// Calls and metric points retained by default. A multiple of the twelve
/// points written per collection, so whole collections are kept.
const DEFAULT_HISTORY_LIMIT: usize = 12_000;

/// Provider operations, used to inject failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Launch,
    Start,
    Stop,
    Terminate,
    Describe,
    GetDesiredCount,
    AlarmState,
    EnableAlarmActions,
    DisableAlarmActions,
    EnableTrigger,
    DisableTrigger,
    PutMetrics,
}

impl Operation {
    fn name(&self) -> &'static str {
        match self {
            Operation::Launch => "RunInstances",
            Operation::Start => "StartInstances",
            Operation::Stop => "StopInstances",
            Operation::Terminate => "TerminateInstances",
            Operation::Describe => "DescribeInstances",
            Operation::GetDesiredCount => "GetParameter",
            Operation::AlarmState => "DescribeAlarms",
            Operation::EnableAlarmActions => "EnableAlarmActions",
            Operation::DisableAlarmActions => "DisableAlarmActions",
            Operation::EnableTrigger => "EnableRule",
            Operation::DisableTrigger => "DisableRule",
            Operation::PutMetrics => "PutMetricData",
        }
    }
}

/// A recorded provider call.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderCall {
    Launch { component: Component, count: u32 },
    Start(InstanceId),
    Stop(InstanceId),
    Terminate(Vec<InstanceId>),
    Describe(Vec<InstanceId>),
    GetDesiredCount(String),
    AlarmState(String),
    EnableAlarmActions(String),
    DisableAlarmActions(String),
    EnableTrigger(String),
    DisableTrigger(String),
    PutMetrics { namespace: String, points: usize },
}

#[derive(Debug, Clone)]
struct SimInstance {
    component: Component,
    state: InstanceStateName,
    name_tag: String,
}

#[derive(Debug, Clone, Copy, Default)]
struct SimAlarm {
    in_alarm: bool,
    actions_enabled: bool,
}

#[derive(Debug)]
struct SimState {
    instances: BTreeMap<InstanceId, SimInstance>,
    next_id: u64,
    /// Raw parameter values, as a parameter store would hold them.
    parameters: HashMap<String, String>,
    alarms: HashMap<String, SimAlarm>,
    rules: HashMap<String, bool>,
    metrics: VecDeque<MetricPoint>,
    calls: VecDeque<ProviderCall>,
    history_limit: usize,
    failing: HashSet<Operation>,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            instances: BTreeMap::new(),
            next_id: 0,
            parameters: HashMap::new(),
            alarms: HashMap::new(),
            rules: HashMap::new(),
            metrics: VecDeque::new(),
            calls: VecDeque::new(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            failing: HashSet::new(),
        }
    }
}

/// Append to a history, dropping the oldest entries past `limit`.
fn push_bounded<T>(history: &mut VecDeque<T>, limit: usize, items: impl IntoIterator<Item = T>) {
    history.extend(items);
    let excess = history.len().saturating_sub(limit);
    history.drain(..excess);
}

impl SimState {
    fn record(&mut self, op: Operation, call: ProviderCall) -> ProviderResult<()> {
        push_bounded(&mut self.calls, self.history_limit, [call]);
        if self.failing.contains(&op) {
            return Err(ProviderError::Api {
                operation: op.name(),
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn alarm_mut(&mut self, name: &str) -> ProviderResult<&mut SimAlarm> {
        self.alarms
            .get_mut(name)
            .ok_or_else(|| ProviderError::AlarmNotFound(name.to_string()))
    }
}

/// A [`CloudProvider`] that lives entirely in memory.
#[derive(Debug, Default)]
pub struct SimulatedProvider {
    state: Mutex<SimState>,
    parameter_file: Option<PathBuf>,
}

impl SimulatedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// A provider pre-populated with every alarm, rule, and count parameter
    /// named in `config`. Counts start at zero and alarms are not firing.
    pub fn from_config(config: &FleetConfig) -> Self {
        let mut state = SimState::default();
        state.rules.insert(config.notifier_rule_name.clone(), false);
        for component in Component::ALL {
            let c = config.component(component);
            state
                .parameters
                .insert(c.count_parameter_name.clone(), "0".to_string());
            state
                .alarms
                .insert(c.queue_alarm_name.clone(), SimAlarm::default());
        }
        Self {
            state: Mutex::new(state),
            parameter_file: None,
        }
    }

    /// Read desired counts from a TOML file of `"<parameter>" = <count>`
    /// pairs. Parameters missing from the file fall back to in-memory values.
    pub fn with_parameter_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.parameter_file = Some(path.into());
        self
    }

    /// Keep at most `limit` recorded calls and `limit` metric points.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.state.get_mut().history_limit = limit;
        self
    }

    /// Make every subsequent call to `op` fail.
    pub async fn fail(&self, op: Operation) {
        self.state.lock().await.failing.insert(op);
    }

    pub async fn recover(&self, op: Operation) {
        self.state.lock().await.failing.remove(&op);
    }

    pub async fn set_parameter(&self, name: &str, value: impl Into<String>) {
        self.state
            .lock()
            .await
            .parameters
            .insert(name.to_string(), value.into());
    }

    /// Register an alarm, or change whether an existing one is firing.
    pub async fn set_alarm(&self, name: &str, in_alarm: bool) {
        self.state
            .lock()
            .await
            .alarms
            .entry(name.to_string())
            .or_default()
            .in_alarm = in_alarm;
    }

    /// Force an instance into a state, as an out-of-band transition would.
    pub async fn set_instance_state(&self, instance_id: &str, state: InstanceStateName) {
        if let Some(inst) = self.state.lock().await.instances.get_mut(instance_id) {
            inst.state = state;
        }
    }

    pub async fn instance_state(&self, instance_id: &str) -> Option<InstanceStateName> {
        self.state
            .lock()
            .await
            .instances
            .get(instance_id)
            .map(|i| i.state)
    }

    pub async fn instance_name_tag(&self, instance_id: &str) -> Option<String> {
        self.state
            .lock()
            .await
            .instances
            .get(instance_id)
            .map(|i| i.name_tag.clone())
    }

    /// Instances of `component` that are not terminated.
    pub async fn live_instances(&self, component: Component) -> Vec<InstanceId> {
        self.state
            .lock()
            .await
            .instances
            .iter()
            .filter(|(_, i)| i.component == component && i.state != InstanceStateName::Terminated)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub async fn alarm_actions_enabled(&self, name: &str) -> bool {
        self.state
            .lock()
            .await
            .alarms
            .get(name)
            .is_some_and(|a| a.actions_enabled)
    }

    pub async fn rule_enabled(&self, name: &str) -> bool {
        self.state
            .lock()
            .await
            .rules
            .get(name)
            .copied()
            .unwrap_or(false)
    }

    /// Retained metric points, oldest first.
    pub async fn metrics(&self) -> Vec<MetricPoint> {
        self.state.lock().await.metrics.iter().cloned().collect()
    }

    /// Retained calls, in order.
    pub async fn calls(&self) -> Vec<ProviderCall> {
        self.state.lock().await.calls.iter().cloned().collect()
    }

    fn read_parameter_file(path: &Path, name: &str) -> ProviderResult<Option<String>> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ProviderError::ParameterFile(e.to_string())),
        };
        let table: toml::Table =
            toml::from_str(&content).map_err(|e| ProviderError::ParameterFile(e.to_string()))?;
        Ok(table.get(name).map(|value| match value {
            toml::Value::String(s) => s.clone(),
            other => other.to_string(),
        }))
    }
}

#[async_trait]
impl CloudProvider for SimulatedProvider {
    async fn launch_instances(
        &self,
        request: &LaunchRequest,
    ) -> ProviderResult<Vec<InstanceDescription>> {
        let mut state = self.state.lock().await;
        state.record(
            Operation::Launch,
            ProviderCall::Launch {
                component: request.component,
                count: request.count,
            },
        )?;

        let mut launched = Vec::with_capacity(request.count as usize);
        for _ in 0..request.count {
            state.next_id += 1;
            let instance_id = format!("i-{:017x}", state.next_id);
            state.instances.insert(
                instance_id.clone(),
                SimInstance {
                    component: request.component,
                    state: InstanceStateName::Pending,
                    name_tag: request.name_tag.clone(),
                },
            );
            launched.push(InstanceDescription {
                instance_id,
                state: InstanceStateName::Pending,
            });
        }
        debug!(
            component = %request.component,
            template = %request.template_id,
            count = request.count,
            "simulated launch"
        );
        Ok(launched)
    }

    async fn start_instance(&self, instance_id: &str) -> ProviderResult<InstanceStateName> {
        let mut state = self.state.lock().await;
        state.record(Operation::Start, ProviderCall::Start(instance_id.to_string()))?;
        let inst = state
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| ProviderError::InstanceNotFound(instance_id.to_string()))?;
        if inst.state == InstanceStateName::Stopped {
            inst.state = InstanceStateName::Pending;
        }
        Ok(inst.state)
    }

    async fn stop_instance(&self, instance_id: &str) -> ProviderResult<()> {
        let mut state = self.state.lock().await;
        state.record(Operation::Stop, ProviderCall::Stop(instance_id.to_string()))?;
        let inst = state
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| ProviderError::InstanceNotFound(instance_id.to_string()))?;
        if inst.state.is_active() {
            inst.state = InstanceStateName::Stopped;
        }
        Ok(())
    }

    async fn terminate_instances(&self, instance_ids: &[InstanceId]) -> ProviderResult<()> {
        let mut state = self.state.lock().await;
        state.record(
            Operation::Terminate,
            ProviderCall::Terminate(instance_ids.to_vec()),
        )?;
        if let Some(missing) = instance_ids
            .iter()
            .find(|id| !state.instances.contains_key(*id))
        {
            return Err(ProviderError::InstanceNotFound(missing.clone()));
        }
        for id in instance_ids {
            if let Some(inst) = state.instances.get_mut(id) {
                inst.state = InstanceStateName::Terminated;
            }
        }
        Ok(())
    }

    async fn describe_instances(
        &self,
        instance_ids: &[InstanceId],
    ) -> ProviderResult<Vec<InstanceDescription>> {
        let mut state = self.state.lock().await;
        state.record(
            Operation::Describe,
            ProviderCall::Describe(instance_ids.to_vec()),
        )?;
        Ok(instance_ids
            .iter()
            .filter_map(|id| {
                state.instances.get(id).map(|inst| InstanceDescription {
                    instance_id: id.clone(),
                    state: inst.state,
                })
            })
            .collect())
    }

    async fn get_desired_count(&self, parameter_name: &str) -> ProviderResult<u32> {
        let mut state = self.state.lock().await;
        state.record(
            Operation::GetDesiredCount,
            ProviderCall::GetDesiredCount(parameter_name.to_string()),
        )?;

        let from_file = match &self.parameter_file {
            Some(path) => Self::read_parameter_file(path, parameter_name)?,
            None => None,
        };
        let raw = from_file
            .or_else(|| state.parameters.get(parameter_name).cloned())
            .ok_or_else(|| ProviderError::ParameterNotFound(parameter_name.to_string()))?;

        raw.trim()
            .parse::<u32>()
            .map_err(|_| ProviderError::InvalidParameter {
                name: parameter_name.to_string(),
                value: raw,
            })
    }

    async fn alarm_has_items(&self, alarm_name: &str) -> ProviderResult<bool> {
        let mut state = self.state.lock().await;
        state.record(
            Operation::AlarmState,
            ProviderCall::AlarmState(alarm_name.to_string()),
        )?;
        Ok(state.alarm_mut(alarm_name)?.in_alarm)
    }

    async fn enable_alarm_actions(&self, alarm_name: &str) -> ProviderResult<()> {
        let mut state = self.state.lock().await;
        state.record(
            Operation::EnableAlarmActions,
            ProviderCall::EnableAlarmActions(alarm_name.to_string()),
        )?;
        state.alarm_mut(alarm_name)?.actions_enabled = true;
        Ok(())
    }

    async fn disable_alarm_actions(&self, alarm_name: &str) -> ProviderResult<()> {
        let mut state = self.state.lock().await;
        state.record(
            Operation::DisableAlarmActions,
            ProviderCall::DisableAlarmActions(alarm_name.to_string()),
        )?;
        state.alarm_mut(alarm_name)?.actions_enabled = false;
        Ok(())
    }

    async fn enable_lifecycle_trigger(&self, rule_name: &str) -> ProviderResult<()> {
        let mut state = self.state.lock().await;
        state.record(
            Operation::EnableTrigger,
            ProviderCall::EnableTrigger(rule_name.to_string()),
        )?;
        state.rules.insert(rule_name.to_string(), true);
        Ok(())
    }

    async fn disable_lifecycle_trigger(&self, rule_name: &str) -> ProviderResult<()> {
        let mut state = self.state.lock().await;
        state.record(
            Operation::DisableTrigger,
            ProviderCall::DisableTrigger(rule_name.to_string()),
        )?;
        state.rules.insert(rule_name.to_string(), false);
        Ok(())
    }

    async fn put_metrics(&self, namespace: &str, points: &[MetricPoint]) -> ProviderResult<()> {
        let mut state = self.state.lock().await;
        state.record(
            Operation::PutMetrics,
            ProviderCall::PutMetrics {
                namespace: namespace.to_string(),
                points: points.len(),
            },
        )?;
        let limit = state.history_limit;
        push_bounded(&mut state.metrics, limit, points.iter().cloned());
        info!(%namespace, points = points.len(), "metrics written");
        Ok(())
    }
}
