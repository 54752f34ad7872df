#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

mod common;

use chimp_oom_agent::clock::StartupClock;
use chimp_oom_agent::{AllocationPolicy, Config, DeadlineOutcome, OomError, PolicyEngine, WatchdogState};
use common::FakeTelemetry;
use std::sync::Arc;
use std::time::Duration;

fn time_config(duration: u64, rate: u64) -> Config {
    Config {
        policy: AllocationPolicy::TimeBound,
        time_duration_seconds: duration,
        time_target_rate: rate,
        touch_pages: false,
        ..Config::default()
    }
}

#[test]
fn deadline_without_traffic_allocates_all_headroom_once() {
    let tel = FakeTelemetry::new(0, 1000);
    let clock = StartupClock::started_ago(Duration::from_secs(10));
    let engine = PolicyEngine::with_clock(time_config(10, 2), tel.clone(), clock).expect("engine");

    let outcome = engine.on_deadline().expect("deadline");
    assert_eq!(
        outcome,
        DeadlineOutcome::Fired { bytes_allocated: 1000, capped: false }
    );
    tel.grow(1000);

    let st = engine.status().expect("status");
    assert!(st.time_deadline_triggered);
    assert_eq!(st.watchdog, WatchdogState::Fired);
    assert_eq!(st.request_count, 0);
    assert_eq!(st.retained_bytes, 1000);

    assert_eq!(engine.on_deadline().expect("deadline"), DeadlineOutcome::AlreadyFired);

    // Traffic afterwards follows the normal path and never re-fires.
    let r = engine.on_invoke().expect("invoke");
    assert_eq!(r.bytes_remaining_to_target, 0);
    assert_eq!(engine.on_deadline().expect("deadline"), DeadlineOutcome::AlreadyFired);
    assert!(engine.status().expect("status").time_deadline_triggered);
}

#[test]
fn deadline_with_exhausted_headroom_fires_without_allocating() {
    let tel = FakeTelemetry::new(1000, 1000);
    let clock = StartupClock::started_ago(Duration::from_secs(11));
    let engine = PolicyEngine::with_clock(time_config(10, 2), tel, clock).expect("engine");
    assert_eq!(
        engine.on_deadline().expect("deadline"),
        DeadlineOutcome::Fired { bytes_allocated: 0, capped: false }
    );
    assert_eq!(engine.status().expect("status").retained_chunks, 0);
}

#[test]
fn deadline_not_due_before_duration() {
    let engine =
        PolicyEngine::new(time_config(30, 2), FakeTelemetry::new(0, 1000)).expect("engine");
    assert_eq!(engine.on_deadline().expect("deadline"), DeadlineOutcome::NotDue);
    assert_eq!(engine.status().expect("status").watchdog, WatchdogState::Armed);
}

#[test]
fn deadline_not_applicable_when_disabled_or_other_policy() {
    let clock = StartupClock::started_ago(Duration::from_secs(60));
    let disabled = Config { time_auto_allocate: false, ..time_config(10, 2) };
    let engine = PolicyEngine::with_clock(disabled, FakeTelemetry::new(0, 1000), clock).expect("engine");
    assert_eq!(engine.on_deadline().expect("deadline"), DeadlineOutcome::NotApplicable);
    assert_eq!(engine.status().expect("status").watchdog, WatchdogState::Disabled);

    let request = Config { policy: AllocationPolicy::RequestBound, ..time_config(10, 2) };
    let engine = PolicyEngine::with_clock(request, FakeTelemetry::new(0, 1000), clock).expect("engine");
    assert_eq!(engine.on_deadline().expect("deadline"), DeadlineOutcome::NotApplicable);
    let st = engine.status().expect("status");
    assert!(!st.time_deadline_triggered);
    assert_eq!(st.watchdog, WatchdogState::Disabled);
}

#[test]
fn deadline_telemetry_failure_stays_armed() {
    let tel = FakeTelemetry::new(0, 1000);
    let clock = StartupClock::started_ago(Duration::from_secs(10));
    let engine = PolicyEngine::with_clock(time_config(10, 2), tel.clone(), clock).expect("engine");
    tel.set_failing(true);
    assert!(engine.on_deadline().is_err());
    tel.set_failing(false);
    assert!(matches!(
        engine.on_deadline().expect("deadline"),
        DeadlineOutcome::Fired { .. }
    ));
}

#[test]
fn racing_deadline_ticks_fire_exactly_once() {
    let tel = FakeTelemetry::new(0, 1000);
    let clock = StartupClock::started_ago(Duration::from_secs(20));
    let engine = Arc::new(PolicyEngine::with_clock(time_config(10, 2), tel, clock).expect("engine"));
    let fired: Vec<DeadlineOutcome> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let engine = Arc::clone(&engine);
                s.spawn(move || engine.on_deadline().expect("deadline"))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("join"))
            .filter(|o| matches!(o, DeadlineOutcome::Fired { .. }))
            .collect()
    });
    assert_eq!(fired.len(), 1);
    assert_eq!(engine.status().expect("status").retained_bytes, 1000);
}

#[test]
fn catch_up_charges_missed_units_and_stays_monotonic() {
    let tel = FakeTelemetry::new(0, 1000);
    // Just past 3s at 2 units/s: six units are overdue, with most of a second
    // of slack before the next one comes due.
    let clock = StartupClock::started_ago(Duration::from_millis(3_050));
    let engine = PolicyEngine::with_clock(time_config(10, 2), tel.clone(), clock).expect("engine");

    let first = engine.on_invoke().expect("invoke");
    assert_eq!(first.units_left, 20);
    assert_eq!(first.bytes_allocated, 7 * 50);
    tel.grow(first.bytes_allocated);
    assert_eq!(engine.status().expect("status").time_virtual_applied, 7);

    let mut last = 7;
    for _ in 0..5 {
        let r = engine.on_invoke().expect("invoke");
        tel.grow(r.bytes_allocated);
        engine.on_deadline().expect("deadline");
        let applied = engine.status().expect("status").time_virtual_applied;
        assert!(applied >= last);
        last = applied;
    }
    assert!(last >= 12, "applied {last}");
}

#[test]
fn overflowing_plan_fails_without_side_effects() {
    let tel = FakeTelemetry::new(0, u64::MAX);
    let clock = StartupClock::started_ago(Duration::from_secs(2));
    let engine = PolicyEngine::with_clock(time_config(1, u64::MAX), tel, clock).expect("engine");
    let err = engine.on_invoke().expect_err("overflow");
    assert!(matches!(err, OomError::ArithmeticOverflow(_)));
    let st = engine.status().expect("status");
    assert_eq!(st.request_count, 0);
    assert_eq!(st.time_virtual_applied, 0);
}
