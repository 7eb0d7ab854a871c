//! Heartbeat monitoring: stall detection, recovery and hard timeouts, both
//! on the monitor directly and under a live executor.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use common::{healthy_result, phases_with_limits};
use pipewarden_core::{
    work_fn, HealthMonitor, HealthStatus, PhaseExecutor, PhaseId, PhaseSet, PhaseSpec,
    PhaseStatus, RunStatus,
};
use pipewarden_state::fakes::MemoryStore;

fn at(ms: i64) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap() + chrono::Duration::milliseconds(ms)
}

fn monitor() -> HealthMonitor {
    let phases = PhaseSet::new(vec![PhaseSpec::new(
        PhaseId::Evidence,
        1.0,
        Duration::from_secs(60),
        Duration::from_secs(10),
    )])
    .unwrap();
    HealthMonitor::new(&phases)
}

#[test]
fn silent_phase_stalls_then_recovers() {
    let monitor = monitor();
    monitor.start(PhaseId::Evidence, at(0));

    assert!(monitor.check_timeouts(at(5_000)).is_empty());

    let stalled = monitor.check_timeouts(at(11_000));
    assert_eq!(stalled.len(), 1);
    assert_eq!(stalled[0].to, HealthStatus::Stalled);
    assert_eq!(stalled[0].since_heartbeat, Duration::from_secs(11));

    // Still stalled: no repeated transition.
    assert!(monitor.check_timeouts(at(12_000)).is_empty());

    let recovered = monitor.heartbeat(PhaseId::Evidence, at(13_000)).unwrap();
    assert_eq!(recovered.from, HealthStatus::Stalled);
    assert_eq!(recovered.to, HealthStatus::Alive);
    assert_eq!(monitor.status(PhaseId::Evidence), Some(HealthStatus::Alive));
}

#[test]
fn hard_timeout_wins_over_fresh_heartbeats() {
    let monitor = monitor();
    monitor.start(PhaseId::Evidence, at(0));
    monitor.heartbeat(PhaseId::Evidence, at(60_500));

    let transitions = monitor.check_timeouts(at(61_000));
    assert_eq!(transitions.len(), 1);
    assert_eq!(transitions[0].to, HealthStatus::TimedOut);
    assert_eq!(transitions[0].limit, Duration::from_secs(60));

    // Heartbeats after a timeout change nothing.
    assert!(monitor.heartbeat(PhaseId::Evidence, at(62_000)).is_none());
    assert_eq!(monitor.status(PhaseId::Evidence), Some(HealthStatus::TimedOut));
}

#[test]
fn stopped_phases_are_not_checked() {
    let monitor = monitor();
    monitor.start(PhaseId::Evidence, at(0));
    monitor.stop(PhaseId::Evidence);
    assert!(monitor.check_timeouts(at(120_000)).is_empty());

    let summary = monitor.summary(at(120_000));
    let evidence = summary.get(PhaseId::Evidence).unwrap();
    assert!(!evidence.running);
    assert_eq!(evidence.status, HealthStatus::Alive);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stalled_phase_that_finishes_in_time_completes() {
    let mut builder = PhaseExecutor::builder(Arc::new(MemoryStore::new()))
        .phases(phases_with_limits(
            Duration::from_secs(5),
            Duration::from_millis(60),
        ))
        .watchdog_interval(Duration::from_millis(10));
    for phase in PhaseId::ALL {
        builder = builder.work(
            phase,
            work_fn(move |ctx| async move {
                if phase == PhaseId::Synthesis {
                    // Long enough without heartbeats for the watchdog to flag it.
                    tokio::time::sleep(Duration::from_millis(250)).await;
                    ctx.heartbeat();
                }
                Ok(healthy_result(phase))
            }),
        );
    }
    let mut executor = builder.build().unwrap();

    let summary = executor.run().await.unwrap();
    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.phase_status(PhaseId::Synthesis), Some(PhaseStatus::Complete));

    let synthesis = summary.health.get(PhaseId::Synthesis).unwrap();
    assert_eq!(synthesis.status, HealthStatus::Alive);
    assert!(!synthesis.running);
}
