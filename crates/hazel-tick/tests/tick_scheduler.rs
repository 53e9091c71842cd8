//! Integration tests for the flush scheduler.
//!
//! Every async test runs on a paused clock, so sleeps resolve as soon as
//! the runtime is otherwise idle and timings are exact.

use std::time::Duration;

use hazel_tick::{TickConfig, TickPolicy, TickScheduler};
use tokio::time::Instant;

fn no_jitter(rate: u32) -> TickConfig {
    TickConfig {
        initial_jitter_us: 0,
        ..TickConfig::with_rate(rate)
    }
}

// =========================================================================
// TickConfig
// =========================================================================

#[test]
fn test_default_config_is_twenty_hz() {
    let cfg = TickConfig::default();
    assert_eq!(cfg.tick_rate_hz, 20);
    assert_eq!(cfg.tick_duration(), Some(Duration::from_millis(50)));
}

#[test]
fn test_zero_rate_disables_ticking() {
    let s = TickScheduler::new(TickConfig::with_rate(0));
    assert!(s.is_disabled());
    assert_eq!(s.tick_duration(), None);
}

#[test]
fn test_validated_clamps_rate() {
    let cfg = TickConfig::with_rate(1_000).validated();
    assert_eq!(cfg.tick_rate_hz, TickConfig::MAX_TICK_RATE_HZ);
}

// =========================================================================
// Firing
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_wait_for_tick_fires_at_interval() {
    let start = Instant::now();
    let mut s = TickScheduler::new(no_jitter(20));

    let first = s.wait_for_tick().await;
    assert_eq!(first.tick, 1);
    assert_eq!(first.dt, Duration::from_millis(50));
    assert!(!first.overrun);
    assert_eq!(Instant::now() - start, Duration::from_millis(50));

    let second = s.wait_for_tick().await;
    assert_eq!(second.tick, 2);
    assert_eq!(Instant::now() - start, Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn test_jitter_delays_first_tick_within_bound() {
    let start = Instant::now();
    let mut s = TickScheduler::new(TickConfig {
        initial_jitter_us: 5_000,
        ..TickConfig::with_rate(20)
    });

    s.wait_for_tick().await;
    let elapsed = Instant::now() - start;
    assert!(elapsed >= Duration::from_millis(50));
    assert!(elapsed <= Duration::from_millis(55));
}

#[tokio::test(start_paused = true)]
async fn test_skip_policy_reports_skipped_ticks() {
    let mut s = TickScheduler::new(no_jitter(20));

    tokio::time::sleep(Duration::from_millis(210)).await;
    let info = s.wait_for_tick().await;

    assert!(info.overrun);
    assert_eq!(info.ticks_skipped, 3);
}

#[tokio::test(start_paused = true)]
async fn test_drop_policy_keeps_cadence() {
    let start = Instant::now();
    let mut s = TickScheduler::new(TickConfig {
        policy: TickPolicy::Drop,
        ..no_jitter(20)
    });

    tokio::time::sleep(Duration::from_millis(120)).await;
    let late = s.wait_for_tick().await;
    assert!(late.overrun);
    assert_eq!(late.ticks_skipped, 0);

    // The second deadline (100 ms) is already past, so it fires at once.
    s.wait_for_tick().await;
    assert_eq!(Instant::now() - start, Duration::from_millis(120));
}

// =========================================================================
// Pause / resume
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_paused_scheduler_never_fires() {
    let mut s = TickScheduler::new(no_jitter(20));
    s.pause();
    assert!(s.is_paused());

    let result = tokio::time::timeout(Duration::from_secs(1), s.wait_for_tick()).await;
    assert!(result.is_err());
    assert_eq!(s.tick_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_resume_schedules_one_interval_ahead() {
    let mut s = TickScheduler::new(no_jitter(20));
    s.pause();
    tokio::time::sleep(Duration::from_secs(2)).await;

    let resumed_at = Instant::now();
    s.resume();
    let info = s.wait_for_tick().await;

    assert!(!info.overrun);
    assert_eq!(Instant::now() - resumed_at, Duration::from_millis(50));
}
