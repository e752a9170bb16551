//! Scheduler behavior through the public API: eligibility, ordering,
//! cancellation, delay promotion, and the loop-task lifecycle.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use shardnet::config::SchedulerConfig;
use shardnet::{ActionPriority, EventLoopScheduler};

fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        tick_interval: Duration::from_millis(20),
        ..SchedulerConfig::default()
    }
}

#[test]
fn enqueue_then_tick_runs_exactly_once_and_cancel_after_is_false() {
    let scheduler = EventLoopScheduler::new(test_config());
    let runs = Arc::new(AtomicUsize::new(0));

    let r = runs.clone();
    let handle = scheduler.enqueue_action(
        "once",
        move || {
            r.fetch_add(1, Ordering::SeqCst);
        },
        ActionPriority::Normal,
    );

    scheduler.tick_once();
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    // Already executed: nothing left to cancel.
    assert!(!scheduler.try_cancel_action(handle));

    scheduler.tick_once();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn cancel_before_tick_returns_true_once_and_action_never_runs() {
    let scheduler = EventLoopScheduler::new(test_config());
    let runs = Arc::new(AtomicUsize::new(0));

    let r = runs.clone();
    let handle = scheduler.enqueue_action(
        "cancel-me",
        move || {
            r.fetch_add(1, Ordering::SeqCst);
        },
        ActionPriority::Normal,
    );

    assert!(scheduler.try_cancel_action(handle));
    assert!(!scheduler.try_cancel_action(handle));

    scheduler.tick_once();
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}

#[test]
fn one_of_each_priority_runs_high_normal_low() {
    let scheduler = EventLoopScheduler::new(test_config());
    assert!(scheduler.config().max_actions_per_tick >= 3);

    let order = Arc::new(Mutex::new(Vec::new()));
    for (priority, label) in [
        (ActionPriority::Normal, "normal"),
        (ActionPriority::Low, "low"),
        (ActionPriority::High, "high"),
    ] {
        let order = order.clone();
        scheduler.enqueue_action(
            label,
            move || order.lock().expect("order lock").push(label),
            priority,
        );
    }

    scheduler.tick_once();
    assert_eq!(*order.lock().expect("order lock"), vec!["high", "normal", "low"]);
}

#[test]
fn delayed_action_skips_next_tick_but_runs_within_three() {
    let config = test_config();
    let interval = config.tick_interval;
    let scheduler = EventLoopScheduler::new(config);

    let runs = Arc::new(AtomicUsize::new(0));
    let r = runs.clone();
    scheduler.enqueue_delayed_action(
        "later",
        move || {
            r.fetch_add(1, Ordering::SeqCst);
        },
        interval * 2,
        ActionPriority::Normal,
    );

    // Tick 1, immediately: the due time cannot have passed.
    scheduler.tick_once();
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    // Ticks 2 and 3 at the configured cadence.
    std::thread::sleep(interval);
    scheduler.tick_once();
    std::thread::sleep(interval + Duration::from_millis(5));
    scheduler.tick_once();

    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn rollover_keeps_leftovers_for_the_next_tick() {
    let scheduler = EventLoopScheduler::new(SchedulerConfig {
        max_actions_per_tick: 3,
        ..test_config()
    });

    let runs = Arc::new(AtomicUsize::new(0));
    for priority in [ActionPriority::High, ActionPriority::Normal, ActionPriority::Low] {
        for i in 0..2 {
            let r = runs.clone();
            scheduler.enqueue_action(
                format!("{priority:?}-{i}"),
                move || {
                    r.fetch_add(1, Ordering::SeqCst);
                },
                priority,
            );
        }
    }

    // Budget 3: both High plus the first Normal; Low untouched.
    scheduler.tick_once();
    assert_eq!(runs.load(Ordering::SeqCst), 3);
    let metrics = scheduler.metrics();
    assert_eq!(metrics.queued_normal, 1);
    assert_eq!(metrics.queued_low, 2);

    scheduler.tick_once();
    assert_eq!(runs.load(Ordering::SeqCst), 6);
}

#[test]
fn metrics_count_ticks_and_actions() {
    let scheduler = EventLoopScheduler::new(test_config());
    scheduler.enqueue_action("a", || {}, ActionPriority::Normal);
    scheduler.enqueue_action("b", || {}, ActionPriority::Normal);

    scheduler.tick_once();
    scheduler.tick_once();

    let metrics = scheduler.metrics();
    assert_eq!(metrics.ticks_processed, 2);
    assert_eq!(metrics.actions_processed, 2);
    assert_eq!(metrics.actions_failed, 0);
}

#[tokio::test]
async fn loop_task_runs_actions_and_stops_cleanly() {
    let scheduler = EventLoopScheduler::new(SchedulerConfig {
        tick_interval: Duration::from_millis(5),
        ..SchedulerConfig::default()
    });

    let runs = Arc::new(AtomicUsize::new(0));
    let ticks = Arc::new(AtomicUsize::new(0));

    let t = ticks.clone();
    scheduler.on_tick(move |_millis| {
        t.fetch_add(1, Ordering::SeqCst);
    });

    let r = runs.clone();
    scheduler.enqueue_action(
        "from-loop",
        move || {
            r.fetch_add(1, Ordering::SeqCst);
        },
        ActionPriority::High,
    );

    scheduler.start();
    tokio::time::sleep(Duration::from_millis(60)).await;
    scheduler.stop().await;

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(ticks.load(Ordering::SeqCst) >= 2);

    // Enqueues after stop sit in the queue; nothing executes them.
    let late = Arc::new(AtomicUsize::new(0));
    let l = late.clone();
    scheduler.enqueue_action(
        "too-late",
        move || {
            l.fetch_add(1, Ordering::SeqCst);
        },
        ActionPriority::High,
    );
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(late.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn delayed_action_fires_under_the_running_loop() {
    let scheduler = EventLoopScheduler::new(SchedulerConfig {
        tick_interval: Duration::from_millis(10),
        ..SchedulerConfig::default()
    });

    let runs = Arc::new(AtomicUsize::new(0));
    let r = runs.clone();
    scheduler.enqueue_delayed_action(
        "timer",
        move || {
            r.fetch_add(1, Ordering::SeqCst);
        },
        Duration::from_millis(25),
        ActionPriority::Normal,
    );

    scheduler.start();
    tokio::time::sleep(Duration::from_millis(15)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    tokio::time::sleep(Duration::from_millis(60)).await;
    scheduler.stop().await;

    assert_eq!(runs.load(Ordering::SeqCst), 1);
}
