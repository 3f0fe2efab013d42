//! The controller loop: the single owner of fleet state.
//!
//! Every input (webhook notifications, recycle deadlines, reconciliation
//! results, periodic ticks) becomes an [`Event`] and is applied one at a
//! time by [`Controller::handle`]. Provider calls are spawned as detached
//! tasks and report back through channels, so no handler ever awaits.

use std::any::Any;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use fleet_core::{Component, FleetConfig, InstanceId, InstanceStateName, InstanceUpdate, QueueUpdate};
use fleet_provider::CloudProvider;
use fleet_webhook::{WebhookServer, WebhookState};

use crate::error::{ControllerError, ControllerResult};
use crate::metrics::{self, MetricsBuffer};
use crate::reboot::{RebootDue, RebootTimers};
use crate::reconcile::{self, DesiredCount, ScaleDecision, ScaleEvent};
use crate::refresh;
use crate::registry::{FleetRegistry, UpdateOutcome};

const UPDATE_CHANNEL_CAPACITY: usize = 1024;
const QUEUE_CHANNEL_CAPACITY: usize = 64;
/// How long teardown waits for launches still in flight.
const LAUNCH_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// One unit of work for the controller loop.
#[derive(Debug)]
pub enum Event {
    /// Lifecycle updates from the webhook or a refresh.
    Lifecycle(Vec<InstanceUpdate>),
    Queue(QueueUpdate),
    RebootDue(RebootDue),
    Scale(ScaleEvent),
    ReconcileTick,
    RefreshTick,
    CollectTick,
    ReportTick,
}

/// Fleet controller for all components.
pub struct Controller {
    config: Arc<FleetConfig>,
    provider: Arc<dyn CloudProvider>,

    registry: FleetRegistry,
    queue_signals: BTreeMap<Component, bool>,
    /// Instances requested from the provider but not yet registered.
    in_flight: BTreeMap<Component, u32>,
    metrics: MetricsBuffer,
    reboots: RebootTimers,

    updates_tx: mpsc::Sender<Vec<InstanceUpdate>>,
    updates_rx: mpsc::Receiver<Vec<InstanceUpdate>>,
    queue_tx: mpsc::Sender<QueueUpdate>,
    queue_rx: mpsc::Receiver<QueueUpdate>,
    reboot_rx: mpsc::UnboundedReceiver<RebootDue>,
    scale_tx: mpsc::UnboundedSender<ScaleEvent>,
    scale_rx: mpsc::UnboundedReceiver<ScaleEvent>,

    webhook: Option<WebhookServer>,
}

impl Controller {
    pub fn new(config: Arc<FleetConfig>, provider: Arc<dyn CloudProvider>) -> Self {
        let (updates_tx, updates_rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        let (queue_tx, queue_rx) = mpsc::channel(QUEUE_CHANNEL_CAPACITY);
        let (reboot_tx, reboot_rx) = mpsc::unbounded_channel();
        let (scale_tx, scale_rx) = mpsc::unbounded_channel();
        let reboots = RebootTimers::new(config.timing.reboot, reboot_tx);

        Self {
            config,
            provider,
            registry: FleetRegistry::new(),
            queue_signals: BTreeMap::new(),
            in_flight: BTreeMap::new(),
            metrics: MetricsBuffer::new(),
            reboots,
            updates_tx,
            updates_rx,
            queue_tx,
            queue_rx,
            reboot_rx,
            scale_tx,
            scale_rx,
            webhook: None,
        }
    }

    /// Senders for the webhook ingress.
    pub fn webhook_state(&self) -> WebhookState {
        WebhookState {
            updates: self.updates_tx.clone(),
            queue: self.queue_tx.clone(),
        }
    }

    pub fn registry(&self) -> &FleetRegistry {
        &self.registry
    }

    pub fn queue_has_items(&self, component: Component) -> bool {
        self.queue_signals.get(&component).copied().unwrap_or(false)
    }

    pub fn in_flight_launches(&self, component: Component) -> u32 {
        self.in_flight.get(&component).copied().unwrap_or(0)
    }

    pub fn is_reboot_armed(&self, instance_id: &str) -> bool {
        self.reboots.is_armed(instance_id)
    }

    pub fn buffered_snapshots(&self) -> usize {
        self.metrics.len()
    }

    /// Address of the webhook listener once started.
    pub fn webhook_addr(&self) -> Option<SocketAddr> {
        self.webhook.as_ref().map(WebhookServer::local_addr)
    }

    // ── Lifecycle ─────────────────────────────────────────────────

    /// Seed queue signals, start the webhook listener, enable triggers,
    /// and kick off the first reconciliation. Any failure is fatal.
    pub async fn start(&mut self) -> ControllerResult<()> {
        info!("checking current queue alarm states");
        for component in Component::ALL {
            let alarm = &self.config.component(component).queue_alarm_name;
            let has_items = self.provider.alarm_has_items(alarm).await.map_err(|source| {
                ControllerError::AlarmState {
                    component,
                    alarm: alarm.clone(),
                    source,
                }
            })?;
            info!(%component, has_items, "queue signal seeded");
            self.queue_signals.insert(component, has_items);
        }

        let addr = self.config.webhook.bind;
        let server = WebhookServer::start(addr, self.webhook_state())
            .await
            .map_err(|source| ControllerError::WebhookBind { addr, source })?;
        self.webhook = Some(server);

        self.enable_triggers().await?;

        info!("checking initial desired counts");
        self.start_reconcile();
        Ok(())
    }

    async fn enable_triggers(&self) -> ControllerResult<()> {
        let rule = &self.config.notifier_rule_name;
        self.provider
            .enable_lifecycle_trigger(rule)
            .await
            .map_err(|source| ControllerError::EnableTriggers {
                target: format!("lifecycle trigger {rule}"),
                source,
            })?;

        for component in Component::ALL {
            let alarm = &self.config.component(component).queue_alarm_name;
            self.provider
                .enable_alarm_actions(alarm)
                .await
                .map_err(|source| ControllerError::EnableTriggers {
                    target: format!("alarm actions for {alarm}"),
                    source,
                })?;
        }
        info!("lifecycle trigger and alarm actions enabled");
        Ok(())
    }

    /// Start, then process events until `shutdown` flips or a handler
    /// faults. Teardown always runs before returning.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> ControllerResult<()> {
        if let Err(e) = self.start().await {
            error!(error = %e, "controller startup failed");
            self.teardown().await;
            return Err(e);
        }

        let timing = self.config.timing.clone();
        let mut reconcile_tick = ticker(timing.reconcile);
        let mut refresh_tick = ticker(timing.refresh);
        let mut collect_tick = ticker(timing.collect);
        let mut report_tick = ticker(timing.report);

        info!("controller running");
        let outcome = loop {
            let event = tokio::select! {
                _ = shutdown.changed() => {
                    info!("shutdown requested");
                    break Ok(());
                }
                Some(batch) = self.updates_rx.recv() => Event::Lifecycle(batch),
                Some(update) = self.queue_rx.recv() => Event::Queue(update),
                Some(due) = self.reboot_rx.recv() => Event::RebootDue(due),
                Some(result) = self.scale_rx.recv() => Event::Scale(result),
                _ = reconcile_tick.tick() => Event::ReconcileTick,
                _ = refresh_tick.tick() => Event::RefreshTick,
                _ = collect_tick.tick() => Event::CollectTick,
                _ = report_tick.tick() => Event::ReportTick,
            };

            if let Err(fault) = self.guarded(|c| c.handle(event)) {
                break Err(fault);
            }
        };

        self.teardown().await;
        outcome
    }

    /// Run `f`, converting a panic into [`ControllerError::Fault`].
    fn guarded<F>(&mut self, f: F) -> ControllerResult<()>
    where
        F: FnOnce(&mut Self),
    {
        catch_unwind(AssertUnwindSafe(|| f(self))).map_err(|payload| {
            let message = panic_message(payload.as_ref());
            error!(%message, "event handler panicked, shutting down");
            ControllerError::Fault(message)
        })
    }

    /// Terminate the fleet, disable triggers, and stop the listener. Every
    /// step is best effort.
    async fn teardown(&mut self) {
        self.drain_launches().await;
        let ids = self.registry.ids();
        if !ids.is_empty() {
            info!(count = ids.len(), "terminating all instances");
            if let Err(e) = self.provider.terminate_instances(&ids).await {
                error!(count = ids.len(), error = %e, "failed to terminate instances");
            }
        }

        let cancelled = self.reboots.cancel_all();
        debug!(cancelled, "recycle timers cancelled");

        let rule = &self.config.notifier_rule_name;
        if let Err(e) = self.provider.disable_lifecycle_trigger(rule).await {
            error!(%rule, error = %e, "failed to disable lifecycle trigger");
        }
        for component in Component::ALL {
            let alarm = &self.config.component(component).queue_alarm_name;
            if let Err(e) = self.provider.disable_alarm_actions(alarm).await {
                error!(%component, %alarm, error = %e, "failed to disable alarm actions");
            }
        }

        // Unblock any handler still waiting on a full channel before draining.
        self.updates_rx.close();
        self.queue_rx.close();
        if let Some(server) = self.webhook.take() {
            server.shutdown().await;
        }
        info!("controller stopped");
    }

    /// Register instances from launch results that have not been applied
    /// yet, waiting a bounded time for launches still in flight, so
    /// teardown can terminate them too.
    async fn drain_launches(&mut self) {
        let deadline = Instant::now() + LAUNCH_DRAIN_TIMEOUT;
        loop {
            while let Ok(event) = self.scale_rx.try_recv() {
                self.absorb_at_shutdown(event);
            }
            let outstanding: u32 = self.in_flight.values().sum();
            if outstanding == 0 {
                return;
            }
            debug!(outstanding, "waiting for in-flight launches");
            match tokio::time::timeout_at(deadline, self.scale_rx.recv()).await {
                Ok(Some(event)) => self.absorb_at_shutdown(event),
                Ok(None) => return,
                Err(_) => {
                    warn!(outstanding, "launches still in flight at shutdown, their instances may be orphaned");
                    return;
                }
            }
        }
    }

    /// Apply a task result during teardown. New desired counts are ignored.
    fn absorb_at_shutdown(&mut self, event: ScaleEvent) {
        if !matches!(event, ScaleEvent::DesiredCounts(_)) {
            self.on_scale_event(event);
        }
    }

    // ── Event handling ────────────────────────────────────────────

    /// Apply one event. Never awaits; provider calls are spawned.
    pub fn handle(&mut self, event: Event) {
        match event {
            Event::Lifecycle(batch) => {
                for update in batch {
                    self.apply_update(update);
                }
            }
            Event::Queue(update) => self.set_queue_signal(update),
            Event::RebootDue(due) => self.on_reboot_due(due),
            Event::Scale(result) => self.on_scale_event(result),
            Event::ReconcileTick => self.start_reconcile(),
            Event::RefreshTick => self.start_refresh(),
            Event::CollectTick => self.metrics.collect(&self.registry, metrics::now_rounded()),
            Event::ReportTick => self.report_metrics(),
        }
    }

    fn apply_update(&mut self, update: InstanceUpdate) {
        let instance_id = update.instance_id.as_str();
        match self.registry.apply(&update) {
            UpdateOutcome::Untracked => {
                trace!(instance_id, state = %update.state, "ignoring update for untracked instance");
            }
            UpdateOutcome::Unchanged => {}
            UpdateOutcome::Recorded { previous } => {
                debug!(instance_id, from = %previous, to = %update.state, "instance state changed");
            }
            UpdateOutcome::Stopped { component } => {
                if self.queue_has_items(component) {
                    info!(instance_id, %component, "instance stopped with queued work, restarting");
                    self.registry.mark_start_issued(instance_id);
                    self.spawn_start(update.instance_id.clone());
                    self.reboots.arm(instance_id);
                } else {
                    debug!(instance_id, %component, "instance stopped, queue empty");
                }
            }
            UpdateOutcome::Removed { component } => {
                self.reboots.cancel(instance_id);
                info!(instance_id, %component, "instance terminated");
            }
        }
    }

    fn set_queue_signal(&mut self, update: QueueUpdate) {
        let previous = self.queue_signals.insert(update.component, update.has_items);
        if previous != Some(update.has_items) {
            info!(component = %update.component, has_items = update.has_items, "queue signal changed");
        }
    }

    fn on_reboot_due(&mut self, due: RebootDue) {
        if !self.reboots.fire(&due) {
            trace!(instance_id = %due.instance_id, "ignoring stale recycle deadline");
            return;
        }
        match self.registry.get(&due.instance_id).map(|r| r.state) {
            Some(state) if state.is_active() => {
                info!(instance_id = %due.instance_id, %state, "recycle deadline reached, stopping instance");
                self.spawn_stop(due.instance_id);
            }
            Some(state) => {
                debug!(instance_id = %due.instance_id, %state, "recycle deadline reached, instance not active");
            }
            None => {}
        }
    }

    fn on_scale_event(&mut self, event: ScaleEvent) {
        match event {
            ScaleEvent::DesiredCounts(counts) => {
                for count in counts {
                    self.scale(count);
                }
            }
            ScaleEvent::Launched {
                component,
                requested,
                instances,
            } => {
                let in_flight = self.in_flight.entry(component).or_insert(0);
                *in_flight = in_flight.saturating_sub(requested);

                for instance in instances {
                    if self
                        .registry
                        .insert(&instance.instance_id, component, instance.state)
                    {
                        debug!(instance_id = %instance.instance_id, %component, state = %instance.state, "tracking launched instance");
                        self.reboots.arm(&instance.instance_id);
                    }
                }
            }
            ScaleEvent::TerminateFailed {
                component,
                instance_ids,
            } => {
                warn!(%component, count = instance_ids.len(), "scale-down failed, instances kept in the fleet");
                self.registry.clear_pending_termination(&instance_ids);
            }
            ScaleEvent::StartFailed { instance_id } => {
                self.registry.clear_start_issued(&instance_id);
            }
        }
    }

    fn scale(&mut self, DesiredCount { component, desired }: DesiredCount) {
        let live = u32::try_from(self.registry.live_count(component)).unwrap_or(u32::MAX);
        let current = live.saturating_add(self.in_flight_launches(component));

        match reconcile::evaluate(desired, current) {
            ScaleDecision::NoChange => {
                trace!(%component, desired, "fleet size matches desired count");
            }
            ScaleDecision::Launch(count) => {
                info!(%component, desired, current, count, "scaling up");
                *self.in_flight.entry(component).or_insert(0) += count;
                let request = reconcile::launch_request(&self.config, component, count);
                tokio::spawn(reconcile::launch(
                    Arc::clone(&self.provider),
                    request,
                    self.scale_tx.clone(),
                ));
            }
            ScaleDecision::Terminate(count) => {
                let instance_ids = self.registry.termination_candidates(component, count as usize);
                if instance_ids.len() < count as usize {
                    warn!(
                        %component,
                        requested = count,
                        available = instance_ids.len(),
                        "not enough instances to scale down"
                    );
                }
                if instance_ids.is_empty() {
                    return;
                }
                info!(%component, desired, current, count = instance_ids.len(), "scaling down");
                self.registry.mark_pending_termination(&instance_ids);
                tokio::spawn(reconcile::terminate(
                    Arc::clone(&self.provider),
                    component,
                    instance_ids,
                    self.scale_tx.clone(),
                ));
            }
        }
    }

    fn start_reconcile(&self) {
        let provider = Arc::clone(&self.provider);
        let config = Arc::clone(&self.config);
        let tx = self.scale_tx.clone();
        tokio::spawn(async move {
            let counts = reconcile::read_desired_counts(provider.as_ref(), &config).await;
            let _ = tx.send(ScaleEvent::DesiredCounts(counts));
        });
    }

    fn start_refresh(&self) {
        if self.registry.is_empty() {
            trace!("no instances to refresh");
            return;
        }
        tokio::spawn(refresh::refresh(
            Arc::clone(&self.provider),
            self.registry.ids(),
            self.updates_tx.clone(),
        ));
    }

    fn report_metrics(&mut self) {
        let points = self.metrics.drain_points(&self.config.environment);
        if points.is_empty() {
            return;
        }
        tokio::spawn(metrics::flush(
            Arc::clone(&self.provider),
            self.config.metrics_namespace.clone(),
            points,
        ));
    }

    fn spawn_start(&self, instance_id: InstanceId) {
        let provider = Arc::clone(&self.provider);
        let tx = self.scale_tx.clone();
        tokio::spawn(async move {
            match provider.start_instance(&instance_id).await {
                Ok(InstanceStateName::Pending) => debug!(%instance_id, "instance starting"),
                Ok(state) => warn!(%instance_id, %state, "instance did not enter pending after start"),
                Err(e) => {
                    error!(%instance_id, error = %e, "failed to start instance");
                    let _ = tx.send(ScaleEvent::StartFailed { instance_id });
                }
            }
        });
    }

    fn spawn_stop(&self, instance_id: InstanceId) {
        let provider = Arc::clone(&self.provider);
        tokio::spawn(async move {
            if let Err(e) = provider.stop_instance(&instance_id).await {
                error!(%instance_id, error = %e, "failed to stop instance");
            }
        });
    }

    /// Next queued event, if any, without waiting.
    #[cfg(test)]
    fn try_next_event(&mut self) -> Option<Event> {
        if let Ok(batch) = self.updates_rx.try_recv() {
            return Some(Event::Lifecycle(batch));
        }
        if let Ok(update) = self.queue_rx.try_recv() {
            return Some(Event::Queue(update));
        }
        if let Ok(due) = self.reboot_rx.try_recv() {
            return Some(Event::RebootDue(due));
        }
        self.scale_rx.try_recv().ok().map(Event::Scale)
    }
}

/// An interval whose first tick is one period from now.
fn ticker(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
