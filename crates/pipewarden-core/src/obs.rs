//! Structured observability hooks for pipeline run lifecycle events.
//!
//! This module provides:
//! - The run-scoped tracing span, `run_span`
//! - Emission functions for lifecycle events: run start/finish, phase
//!   start/completion, gate evaluation, stalls, timeouts and checkpoints
//!
//! Events are emitted at `info!` level, stalls at `warn!` and timeouts at
//! `error!`. Filtering and JSON output are configured by
//! [`crate::telemetry::init_tracing`].

use std::time::Duration;

use tracing::{error, info, warn};

use crate::domain::PhaseId;
use crate::validation::GateVerdict;

/// The run span; the executor instruments its run future with it.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("pipewarden.run", run_id = %run_id)
}

/// Emit event: run started (or resumed) with its phase count.
pub fn emit_run_started(run_id: &str, phases: usize, iteration: u32) {
    info!(
        event = "run.started",
        run_id = %run_id,
        phases = phases,
        iteration = iteration,
    );
}

/// Emit event: run finished with duration, final status and overall progress.
pub fn emit_run_finished(
    run_id: &str,
    duration_ms: u64,
    status: &str,
    overall_progress: f64,
    degraded: bool,
) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        status = %status,
        overall_progress = overall_progress,
        degraded = degraded,
    );
}

/// Emit event: phase entered RUNNING.
pub fn emit_phase_started(run_id: &str, phase: PhaseId, iteration: u32) {
    info!(event = "phase.started", run_id = %run_id, phase = %phase, iteration = iteration);
}

/// Emit event: phase reached a terminal status.
pub fn emit_phase_finished(run_id: &str, phase: PhaseId, status: &str, elapsed: Duration) {
    info!(
        event = "phase.finished",
        run_id = %run_id,
        phase = %phase,
        status = %status,
        elapsed_ms = elapsed.as_millis() as u64,
    );
}

/// Emit event: gate evaluated with decision and finding counts.
pub fn emit_gate_evaluated(run_id: &str, verdict: &GateVerdict) {
    info!(
        event = "gate.evaluated",
        run_id = %run_id,
        phase = %verdict.phase,
        decision = ?verdict.decision,
        findings = verdict.findings.len(),
        blocking = verdict.blocking.len(),
        errors = verdict.errors,
        warnings = verdict.warnings,
    );
    for finding in verdict.findings.iter().filter(|f| !f.passed) {
        warn!(
            event = "gate.finding",
            run_id = %run_id,
            phase = %verdict.phase,
            severity = %finding.severity,
            check = %finding.check,
            message = %finding.message,
        );
    }
}

/// Emit event: no heartbeat within the threshold (warning level).
pub fn emit_phase_stalled(run_id: &str, phase: PhaseId, since_heartbeat: Duration, threshold: Duration) {
    warn!(
        event = "phase.stalled",
        run_id = %run_id,
        phase = %phase,
        since_heartbeat_ms = since_heartbeat.as_millis() as u64,
        threshold_ms = threshold.as_millis() as u64,
    );
}

/// Emit event: hard timeout exceeded (error level).
pub fn emit_phase_timed_out(run_id: &str, phase: PhaseId, elapsed: Duration, limit: Duration) {
    error!(
        event = "phase.timed_out",
        run_id = %run_id,
        phase = %phase,
        elapsed_ms = elapsed.as_millis() as u64,
        limit_ms = limit.as_millis() as u64,
    );
}

/// Emit event: checkpoint record and pointer written.
pub fn emit_checkpoint_saved(run_id: &str, phase: PhaseId, iteration: u32, digest: &str) {
    info!(
        event = "checkpoint.saved",
        run_id = %run_id,
        phase = %phase,
        iteration = iteration,
        digest = %digest,
    );
}

/// Emit event: run resumed from a checkpoint.
pub fn emit_run_resumed(run_id: &str, phase: PhaseId, iteration: u32) {
    info!(
        event = "run.resumed",
        run_id = %run_id,
        from_phase = %phase,
        iteration = iteration,
    );
}
