//! Observability tests for pipeline run lifecycle tracing.
//!
//! These tests verify that structured tracing events are emitted for the
//! run lifecycle: start, phase transitions, gate evaluation, stalls,
//! checkpoints and metric flushes.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{fast_phases, healthy_result, phases_with_limits};
use pipewarden_core::{
    emit_checkpoint_saved, emit_gate_evaluated, emit_phase_stalled, emit_run_finished,
    emit_run_started, evaluate_findings, instrument, run_span, work_fn, PhaseExecutor, PhaseId,
    RunId, Severity, ValidationPolicy, ValidationResult,
};
use pipewarden_state::fakes::MemoryStore;
use tracing_test::traced_test;

#[traced_test]
#[test]
fn test_emit_run_started_logs_run_id() {
    emit_run_started("run-123", 5, 0);
    assert!(logs_contain("run.started"));
    assert!(logs_contain("run-123"));
}

#[traced_test]
#[test]
fn test_emit_run_finished_logs_status() {
    emit_run_finished("run-456", 5000, "completed", 1.0, false);
    assert!(logs_contain("run.finished"));
    assert!(logs_contain("completed"));
}

#[traced_test]
#[test]
fn test_gate_evaluation_logs_each_failing_finding() {
    let verdict = evaluate_findings(
        PhaseId::Synthesis,
        vec![
            ValidationResult::fail(Severity::Warning, "3 contradictions").named("contradictions"),
            ValidationResult::pass(Severity::Critical, "2 conclusions").named("conclusions"),
        ],
        &ValidationPolicy::default(),
    );
    emit_gate_evaluated("run-gate-001", &verdict);
    assert!(logs_contain("gate.evaluated"));
    assert!(logs_contain("gate.finding"));
    assert!(logs_contain("3 contradictions"));
    assert!(!logs_contain("2 conclusions"));
}

#[traced_test]
#[test]
fn test_stall_and_checkpoint_events() {
    emit_phase_stalled(
        "run-stall",
        PhaseId::Evidence,
        Duration::from_secs(130),
        Duration::from_secs(120),
    );
    emit_checkpoint_saved("run-stall", PhaseId::Hypotheses, 0, "a1b2c3d4e5f6");
    assert!(logs_contain("phase.stalled"));
    assert!(logs_contain("since_heartbeat_ms=130000"));
    assert!(logs_contain("checkpoint.saved"));
}

#[traced_test]
#[test]
fn test_events_inside_run_span_carry_run_id() {
    run_span("test-span-run").in_scope(|| tracing::info!("inside run span"));
    assert!(logs_contain("test-span-run"));
}

#[tokio::test]
#[traced_test]
async fn test_executor_emits_lifecycle_and_metric_events() {
    let mut builder = PhaseExecutor::builder(Arc::new(MemoryStore::new()))
        .run_id(RunId("run-traced".into()))
        .phases(fast_phases());
    for phase in PhaseId::ALL {
        builder = builder.work(
            phase,
            instrument(work_fn(move |_| async move { Ok(healthy_result(phase)) })),
        );
    }
    builder.build().unwrap().run().await.unwrap();

    assert!(logs_contain("run.started"));
    assert!(logs_contain("phase.started"));
    assert!(logs_contain("gate.evaluated"));
    assert!(logs_contain("checkpoint.saved"));
    assert!(logs_contain("metric=\"flush\""));
    assert!(logs_contain("run.finished"));
    assert!(logs_contain("run-traced"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[traced_test]
async fn test_watchdog_logs_stall_and_recovery() {
    let mut builder = PhaseExecutor::builder(Arc::new(MemoryStore::new()))
        .run_id(RunId("run-stall-live".into()))
        .phases(phases_with_limits(
            Duration::from_secs(5),
            Duration::from_millis(50),
        ))
        .watchdog_interval(Duration::from_millis(10));
    for phase in PhaseId::ALL {
        builder = builder.work(
            phase,
            work_fn(move |ctx| async move {
                if phase == PhaseId::Evidence {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    ctx.heartbeat();
                }
                Ok(healthy_result(phase))
            }),
        );
    }
    builder.build().unwrap().run().await.unwrap();

    assert!(logs_contain("phase.stalled"));
    assert!(logs_contain("phase.recovered"));
}
