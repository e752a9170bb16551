//! The cooperative event loop.
//!
//! One dedicated loop task executes ticks at a fixed cadence; it is the
//! only place queued actions run, and therefore the only writer to client
//! sockets. Everything else in the process is a producer: it enqueues
//! actions or delayed actions and gets an opaque handle back.
//!
//! ## Ordering
//! The ready and delayed sets are sharded maps keyed by action id; they
//! give no iteration order of their own. Priority order (High, Normal,
//! Low) and FIFO order within a priority come from sorting the drained ids,
//! never from map iteration.
//!
//! ## Eligibility
//! An enqueued action becomes runnable on the tick *after* the one current
//! at enqueue time. An action that enqueues another action can therefore
//! never starve the tick it runs in, no matter how deep the chain goes.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::scheduler::action::{
    ActionBody, ActionHandle, ActionPriority, DelayedAction, QueuedAction,
};
use crate::scheduler::metrics::{EventLoopMetrics, EventLoopMetricsSnapshot};

/// Accumulated-time counters reset (and `on_tick_reset` fires) this often.
const TICKS_PER_RESET: u64 = 1000;

type TickSubscriber = Box<dyn Fn(u64) + Send + Sync + 'static>;
type ResetSubscriber = Box<dyn Fn() + Send + Sync + 'static>;

/// Fixed-rate cooperative executor with priority queues, delayed actions,
/// and per-tick metrics.
pub struct EventLoopScheduler {
    config: SchedulerConfig,
    next_id: AtomicU64,
    /// Number of the tick currently (or most recently) executing.
    tick_counter: AtomicU64,
    ready: DashMap<u64, QueuedAction>,
    delayed: DashMap<u64, DelayedAction>,
    metrics: EventLoopMetrics,
    tick_subscribers: RwLock<Vec<TickSubscriber>>,
    reset_subscribers: RwLock<Vec<ResetSubscriber>>,
    /// Tick re-entrancy guard; an overlapping tick is skipped, not queued.
    in_tick: AtomicBool,
    cancel: CancellationToken,
    loop_task: Mutex<Option<JoinHandle<()>>>,
}

impl EventLoopScheduler {
    pub fn new(config: SchedulerConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            next_id: AtomicU64::new(0),
            tick_counter: AtomicU64::new(0),
            ready: DashMap::new(),
            delayed: DashMap::new(),
            metrics: EventLoopMetrics::new(),
            tick_subscribers: RwLock::new(Vec::new()),
            reset_subscribers: RwLock::new(Vec::new()),
            in_tick: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            loop_task: Mutex::new(None),
        })
    }

    pub fn with_defaults() -> Arc<Self> {
        Self::new(SchedulerConfig::default())
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Queue an action; it becomes eligible on the next tick.
    pub fn enqueue_action(
        &self,
        name: impl Into<String>,
        body: impl FnOnce() + Send + 'static,
        priority: ActionPriority,
    ) -> ActionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let action = QueuedAction {
            id,
            name: name.into(),
            body: Mutex::new(Box::new(body) as ActionBody),
            priority,
            enqueued_at: Instant::now(),
            eligible_tick: self.tick_counter.load(Ordering::Acquire) + 1,
            execution_start: None,
            execution_end: None,
        };
        self.ready.insert(id, action);
        ActionHandle(id)
    }

    /// Queue an action that becomes eligible once `delay` has elapsed.
    ///
    /// Promotion happens at the start of the first tick that observes the
    /// due time; the action then runs within that same tick, budget
    /// permitting.
    pub fn enqueue_delayed_action(
        &self,
        name: impl Into<String>,
        body: impl FnOnce() + Send + 'static,
        delay: Duration,
        priority: ActionPriority,
    ) -> ActionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let action = QueuedAction {
            id,
            name: name.into(),
            body: Mutex::new(Box::new(body) as ActionBody),
            priority,
            enqueued_at: Instant::now(),
            eligible_tick: 0,
            execution_start: None,
            execution_end: None,
        };
        self.delayed.insert(
            id,
            DelayedAction {
                action,
                execute_at: Instant::now() + delay,
            },
        );
        ActionHandle(id)
    }

    /// Cancel a queued or delayed action.
    ///
    /// Returns `true` only for the call that actually removed it; an
    /// already-executed, already-cancelled, or unknown handle yields
    /// `false`.
    pub fn try_cancel_action(&self, handle: ActionHandle) -> bool {
        if self.ready.remove(&handle.0).is_some() {
            return true;
        }
        self.delayed.remove(&handle.0).is_some()
    }

    /// Subscribe to tick completion; receives the tick duration in ms.
    pub fn on_tick(&self, subscriber: impl Fn(u64) + Send + Sync + 'static) {
        match self.tick_subscribers.write() {
            Ok(mut subs) => subs.push(Box::new(subscriber)),
            Err(poisoned) => poisoned.into_inner().push(Box::new(subscriber)),
        }
    }

    /// Subscribe to the periodic counter reset (every 1000 ticks).
    pub fn on_tick_reset(&self, subscriber: impl Fn() + Send + Sync + 'static) {
        match self.reset_subscribers.write() {
            Ok(mut subs) => subs.push(Box::new(subscriber)),
            Err(poisoned) => poisoned.into_inner().push(Box::new(subscriber)),
        }
    }

    /// Spawn the dedicated loop task.
    pub fn start(self: &Arc<Self>) {
        let mut slot = match self.loop_task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if slot.is_some() {
            warn!("Event loop already started");
            return;
        }

        let this = Arc::clone(self);
        *slot = Some(tokio::spawn(async move {
            info!(
                tick_interval_ms = this.config.tick_interval.as_millis() as u64,
                max_actions_per_tick = this.config.max_actions_per_tick,
                "Event loop started"
            );
            loop {
                if this.cancel.is_cancelled() {
                    break;
                }
                let tick_duration = this.tick_once();

                // Never sleep past the interval, never spin: at least 1 ms
                // of yield even when the tick overran.
                let sleep_for = this
                    .config
                    .tick_interval
                    .saturating_sub(tick_duration)
                    .max(Duration::from_millis(1));

                tokio::select! {
                    () = this.cancel.cancelled() => break,
                    () = tokio::time::sleep(sleep_for) => {}
                }
            }
            debug!("Event loop task exiting");
        }));
    }

    /// Signal the loop to stop and wait for it, bounded by the configured
    /// shutdown timeout. On timeout, shutdown proceeds anyway; an in-flight
    /// tick may be abandoned mid-sleep.
    pub async fn stop(&self) {
        self.cancel.cancel();

        let task = {
            let mut slot = match self.loop_task.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            slot.take()
        };

        if let Some(task) = task {
            match tokio::time::timeout(self.config.shutdown_timeout, task).await {
                Ok(Ok(())) => info!("Event loop stopped"),
                Ok(Err(e)) => warn!(error = %e, "Event loop task ended abnormally"),
                Err(_) => warn!(
                    timeout_secs = self.config.shutdown_timeout.as_secs(),
                    "Event loop did not stop in time; proceeding with shutdown"
                ),
            }
        }
    }

    /// Execute one tick: promote due delayed actions, then drain the ready
    /// set High → Normal → Low within the per-tick budget.
    ///
    /// Public so tests (and embedders with their own loop) can drive ticks
    /// deterministically without the background task.
    pub fn tick_once(&self) -> Duration {
        if self.in_tick.swap(true, Ordering::Acquire) {
            warn!("Overlapping tick invocation skipped");
            return Duration::ZERO;
        }

        let tick = self.tick_counter.fetch_add(1, Ordering::AcqRel) + 1;
        let tick_started = Instant::now();

        self.promote_due(tick);
        self.drain_ready(tick);

        let tick_duration = tick_started.elapsed();
        self.metrics.record_tick(tick_duration);

        let millis = tick_duration.as_millis() as u64;
        match self.tick_subscribers.read() {
            Ok(subs) => {
                for sub in subs.iter() {
                    sub(millis);
                }
            }
            Err(poisoned) => {
                for sub in poisoned.into_inner().iter() {
                    sub(millis);
                }
            }
        }

        if tick % TICKS_PER_RESET == 0 {
            match self.reset_subscribers.read() {
                Ok(subs) => {
                    for sub in subs.iter() {
                        sub();
                    }
                }
                Err(poisoned) => {
                    for sub in poisoned.into_inner().iter() {
                        sub();
                    }
                }
            }
            self.metrics.reset_accumulated();
        }

        self.in_tick.store(false, Ordering::Release);
        tick_duration
    }

    /// Move every delayed action whose due time has passed into the ready
    /// set, eligible for the current tick.
    fn promote_due(&self, tick: u64) {
        let now = Instant::now();
        let due: Vec<u64> = self
            .delayed
            .iter()
            .filter(|entry| entry.execute_at <= now)
            .map(|entry| *entry.key())
            .collect();

        for id in due {
            // A concurrent cancel may have won the removal; that is fine.
            if let Some((_, delayed)) = self.delayed.remove(&id) {
                let mut action = delayed.action;
                action.eligible_tick = tick;
                self.ready.insert(id, action);
            }
        }
    }

    fn drain_ready(&self, tick: u64) {
        let mut buckets: [Vec<u64>; 3] = [Vec::new(), Vec::new(), Vec::new()];
        for entry in self.ready.iter() {
            if entry.eligible_tick <= tick {
                buckets[entry.priority.index()].push(*entry.key());
            }
        }
        // Ids are monotonic: sorted ids within a bucket is enqueue order.
        for bucket in &mut buckets {
            bucket.sort_unstable();
        }

        let mut executed = 0usize;
        'priorities: for priority in ActionPriority::DRAIN_ORDER {
            for &id in &buckets[priority.index()] {
                if executed >= self.config.max_actions_per_tick {
                    // Remainder rolls over untouched, whole lower groups
                    // included.
                    break 'priorities;
                }
                let Some((_, action)) = self.ready.remove(&id) else {
                    continue; // cancelled between snapshot and removal
                };
                executed += 1;
                self.run_action(action);
            }
        }
    }

    fn run_action(&self, mut action: QueuedAction) {
        let name = std::mem::take(&mut action.name);
        let priority = action.priority;
        let queued_for = action.enqueued_at.elapsed();

        let body = match action.body.into_inner() {
            Ok(body) => body,
            Err(poisoned) => poisoned.into_inner(),
        };

        action.execution_start = Some(Instant::now());
        let result = panic::catch_unwind(AssertUnwindSafe(body));
        action.execution_end = Some(Instant::now());

        let duration = match (action.execution_start, action.execution_end) {
            (Some(start), Some(end)) => end.duration_since(start),
            _ => Duration::ZERO,
        };
        self.metrics.record_action(duration);

        if let Err(payload) = result {
            self.metrics.record_failure();
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| String::from("non-string panic payload"));
            error!(
                action = %name,
                ?priority,
                reason = %reason,
                "Action panicked during tick; continuing"
            );
        }

        if duration > self.config.slow_action_threshold {
            warn!(
                action = %name,
                ?priority,
                duration_ms = duration.as_millis() as u64,
                queued_ms = queued_for.as_millis() as u64,
                "Slow action"
            );
        }
    }

    /// Current metrics, with live queue depths filled in.
    pub fn metrics(&self) -> EventLoopMetricsSnapshot {
        let mut snapshot = self.metrics.snapshot();
        for entry in self.ready.iter() {
            match entry.priority {
                ActionPriority::High => snapshot.queued_high += 1,
                ActionPriority::Normal => snapshot.queued_normal += 1,
                ActionPriority::Low => snapshot.queued_low += 1,
            }
        }
        snapshot.delayed_pending = self.delayed.len() as u64;
        snapshot
    }

    /// Number of ticks completed so far.
    pub fn tick_count(&self) -> u64 {
        self.tick_counter.load(Ordering::Acquire)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn scheduler() -> Arc<EventLoopScheduler> {
        EventLoopScheduler::new(SchedulerConfig {
            tick_interval: Duration::from_millis(10),
            ..SchedulerConfig::default()
        })
    }

    #[test]
    fn action_runs_exactly_once() {
        let scheduler = scheduler();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        scheduler.enqueue_action("count", move || {
            c.fetch_add(1, Ordering::SeqCst);
        }, ActionPriority::Normal);

        scheduler.tick_once();
        scheduler.tick_once();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.metrics().actions_processed, 1);
    }

    #[test]
    fn cancel_before_tick_prevents_execution() {
        let scheduler = scheduler();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let handle = scheduler.enqueue_action("cancelled", move || {
            c.fetch_add(1, Ordering::SeqCst);
        }, ActionPriority::Normal);

        assert!(scheduler.try_cancel_action(handle));
        assert!(!scheduler.try_cancel_action(handle));

        scheduler.tick_once();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn priorities_drain_high_to_low() {
        let scheduler = scheduler();
        let order = Arc::new(Mutex::new(Vec::new()));

        for (priority, label) in [
            (ActionPriority::Low, "low"),
            (ActionPriority::High, "high"),
            (ActionPriority::Normal, "normal"),
        ] {
            let order = order.clone();
            scheduler.enqueue_action(label, move || {
                order.lock().unwrap().push(label);
            }, priority);
        }

        scheduler.tick_once();
        assert_eq!(*order.lock().unwrap(), vec!["high", "normal", "low"]);
    }

    #[test]
    fn per_tick_budget_rolls_over() {
        let scheduler = EventLoopScheduler::new(SchedulerConfig {
            max_actions_per_tick: 2,
            ..SchedulerConfig::default()
        });
        let count = Arc::new(AtomicUsize::new(0));
        for i in 0..5 {
            let c = count.clone();
            scheduler.enqueue_action(format!("a{i}"), move || {
                c.fetch_add(1, Ordering::SeqCst);
            }, ActionPriority::Normal);
        }

        scheduler.tick_once();
        assert_eq!(count.load(Ordering::SeqCst), 2);
        scheduler.tick_once();
        assert_eq!(count.load(Ordering::SeqCst), 4);
        scheduler.tick_once();
        assert_eq!(count.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn budget_spent_on_high_starves_low_for_a_tick() {
        let scheduler = EventLoopScheduler::new(SchedulerConfig {
            max_actions_per_tick: 2,
            ..SchedulerConfig::default()
        });
        let ran_low = Arc::new(AtomicBool::new(false));

        for i in 0..2 {
            scheduler.enqueue_action(format!("high{i}"), || {}, ActionPriority::High);
        }
        let flag = ran_low.clone();
        scheduler.enqueue_action("low", move || {
            flag.store(true, Ordering::SeqCst);
        }, ActionPriority::Low);

        scheduler.tick_once();
        assert!(!ran_low.load(Ordering::SeqCst));
        scheduler.tick_once();
        assert!(ran_low.load(Ordering::SeqCst));
    }

    #[test]
    fn action_enqueued_inside_tick_waits_for_next_tick() {
        let scheduler = scheduler();
        let count = Arc::new(AtomicUsize::new(0));

        let inner_count = count.clone();
        let inner_scheduler = scheduler.clone();
        scheduler.enqueue_action("outer", move || {
            let c = inner_count.clone();
            inner_scheduler.enqueue_action("inner", move || {
                c.fetch_add(1, Ordering::SeqCst);
            }, ActionPriority::High);
        }, ActionPriority::Normal);

        scheduler.tick_once();
        assert_eq!(count.load(Ordering::SeqCst), 0);
        scheduler.tick_once();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delayed_action_waits_for_due_time() {
        let scheduler = scheduler();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        scheduler.enqueue_delayed_action(
            "later",
            move || {
                c.fetch_add(1, Ordering::SeqCst);
            },
            Duration::from_millis(30),
            ActionPriority::Normal,
        );

        scheduler.tick_once();
        assert_eq!(count.load(Ordering::SeqCst), 0);

        std::thread::sleep(Duration::from_millis(40));
        scheduler.tick_once();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delayed_action_cancel_found_in_delayed_set() {
        let scheduler = scheduler();
        let handle = scheduler.enqueue_delayed_action(
            "never",
            || {},
            Duration::from_secs(60),
            ActionPriority::Low,
        );
        assert!(scheduler.try_cancel_action(handle));
        assert!(!scheduler.try_cancel_action(handle));
        assert_eq!(scheduler.metrics().delayed_pending, 0);
    }

    #[test]
    fn panicking_action_does_not_abort_tick() {
        let scheduler = scheduler();
        let count = Arc::new(AtomicUsize::new(0));

        scheduler.enqueue_action("boom", || panic!("kaboom"), ActionPriority::High);
        let c = count.clone();
        scheduler.enqueue_action("after", move || {
            c.fetch_add(1, Ordering::SeqCst);
        }, ActionPriority::Normal);

        scheduler.tick_once();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        let metrics = scheduler.metrics();
        assert_eq!(metrics.actions_failed, 1);
        assert_eq!(metrics.actions_processed, 2);
    }

    #[test]
    fn on_tick_fires_every_tick() {
        let scheduler = scheduler();
        let ticks = Arc::new(AtomicUsize::new(0));
        let t = ticks.clone();
        scheduler.on_tick(move |_millis| {
            t.fetch_add(1, Ordering::SeqCst);
        });

        scheduler.tick_once();
        scheduler.tick_once();
        scheduler.tick_once();
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn start_and_stop_lifecycle() {
        let scheduler = EventLoopScheduler::new(SchedulerConfig {
            tick_interval: Duration::from_millis(5),
            ..SchedulerConfig::default()
        });
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        scheduler.enqueue_action("once", move || {
            c.fetch_add(1, Ordering::SeqCst);
        }, ActionPriority::Normal);

        scheduler.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.stop().await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(scheduler.tick_count() >= 1);
    }
}
