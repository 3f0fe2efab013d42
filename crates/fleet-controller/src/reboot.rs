//! Per-instance recycle timers.
//!
//! Each tracked instance has at most one armed timer. When it elapses a
//! [`RebootDue`] is sent back to the controller loop, which decides whether
//! to stop the instance. Re-arming replaces the previous timer; the
//! generation number lets the loop drop a fire that was already queued when
//! the timer was replaced or cancelled.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use fleet_core::InstanceId;

/// A recycle deadline elapsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebootDue {
    pub instance_id: InstanceId,
    pub generation: u64,
}

struct ArmedTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

/// The set of armed recycle timers, keyed by instance id.
pub struct RebootTimers {
    deadline: Duration,
    tx: mpsc::UnboundedSender<RebootDue>,
    armed: HashMap<InstanceId, ArmedTimer>,
    next_generation: u64,
}

impl RebootTimers {
    pub fn new(deadline: Duration, tx: mpsc::UnboundedSender<RebootDue>) -> Self {
        Self {
            deadline,
            tx,
            armed: HashMap::new(),
            next_generation: 0,
        }
    }

    /// Arm (or re-arm) the timer for `instance_id`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm(&mut self, instance_id: &str) -> u64 {
        self.cancel(instance_id);

        self.next_generation += 1;
        let generation = self.next_generation;
        let due = RebootDue {
            instance_id: instance_id.to_string(),
            generation,
        };
        let tx = self.tx.clone();
        let fire_at = Instant::now() + self.deadline;
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(fire_at).await;
            let _ = tx.send(due);
        });

        debug!(instance_id, generation, deadline = ?self.deadline, "recycle timer armed");
        self.armed.insert(
            instance_id.to_string(),
            ArmedTimer { generation, handle },
        );
        generation
    }

    /// Cancel the timer for `instance_id`. Returns whether one was armed.
    pub fn cancel(&mut self, instance_id: &str) -> bool {
        match self.armed.remove(instance_id) {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every armed timer, returning how many there were.
    pub fn cancel_all(&mut self) -> usize {
        let count = self.armed.len();
        for (_, timer) in self.armed.drain() {
            timer.handle.abort();
        }
        count
    }

    /// Consume a fire. Returns `false` if it is stale: the timer was
    /// cancelled or re-armed after this fire was sent.
    pub fn fire(&mut self, due: &RebootDue) -> bool {
        match self.armed.get(&due.instance_id) {
            Some(timer) if timer.generation == due.generation => {
                self.armed.remove(&due.instance_id);
                true
            }
            _ => false,
        }
    }

    pub fn is_armed(&self, instance_id: &str) -> bool {
        self.armed.contains_key(instance_id)
    }

    /// Generation of the armed timer for `instance_id`, if any.
    pub fn generation(&self, instance_id: &str) -> Option<u64> {
        self.armed.get(instance_id).map(|t| t.generation)
    }

    pub fn len(&self) -> usize {
        self.armed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }
}

impl Drop for RebootTimers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEADLINE: Duration = Duration::from_secs(300);

    fn timers() -> (RebootTimers, mpsc::UnboundedReceiver<RebootDue>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (RebootTimers::new(DEADLINE, tx), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_deadline() {
        let (mut timers, mut rx) = timers();
        let started = Instant::now();
        let generation = timers.arm("i-1");

        let due = rx.recv().await.unwrap();
        assert!(started.elapsed() >= DEADLINE);
        assert_eq!(due.instance_id, "i-1");
        assert_eq!(due.generation, generation);
        assert!(timers.fire(&due));
        assert!(!timers.is_armed("i-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn does_not_fire_early() {
        let (mut timers, mut rx) = timers();
        timers.arm("i-1");

        tokio::time::advance(DEADLINE - Duration::from_secs(1)).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
        assert!(timers.is_armed("i-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let (mut timers, mut rx) = timers();
        timers.arm("i-1");
        assert!(timers.cancel("i-1"));
        assert!(!timers.cancel("i-1"));

        tokio::time::advance(DEADLINE * 2).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_makes_queued_fire_stale() {
        let (mut timers, mut rx) = timers();
        let first = timers.arm("i-1");
        let old = rx.recv().await.unwrap();
        assert_eq!(old.generation, first);

        // A new stop/start cycle re-arms before the loop gets to the fire.
        let second = timers.arm("i-1");
        assert_ne!(first, second);
        assert!(!timers.fire(&old));
        assert_eq!(timers.generation("i-1"), Some(second));
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_restarts_the_deadline() {
        let (mut timers, mut rx) = timers();
        timers.arm("i-1");
        tokio::time::advance(DEADLINE / 2).await;

        let rearmed_at = Instant::now();
        timers.arm("i-1");
        let due = rx.recv().await.unwrap();
        assert!(rearmed_at.elapsed() >= DEADLINE);
        assert!(timers.fire(&due));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_clears_everything() {
        let (mut timers, mut rx) = timers();
        for id in ["i-1", "i-2", "i-3"] {
            timers.arm(id);
        }
        assert_eq!(timers.len(), 3);
        assert_eq!(timers.cancel_all(), 3);
        assert!(timers.is_empty());

        tokio::time::advance(DEADLINE * 2).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }
}
