//! Phase executor: drives the phase state machine for one run.
//!
//! ```text
//! PENDING -> RUNNING -> VALIDATING -> COMPLETE | FAILED
//!            RUNNING -> TIMED_OUT
//!            any non-terminal -> ABORTED
//! ```
//!
//! Exactly one phase runs at a time. Its work is spawned on its own task
//! with a child cancellation token; a separate watchdog task polls the
//! [`HealthMonitor`] and reports hard timeouts back over a channel. Progress
//! signals from the work are applied here, on the single control path that
//! owns the [`ProgressTracker`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument as _;

use pipewarden_state::{DurableStore, RunId};

use crate::checkpoint::{Checkpoint, CheckpointManager, CheckpointRef};
use crate::config::PipelineConfig;
use crate::context::{PhaseContext, PhaseSignal, PhaseWork};
use crate::domain::{
    exit_codes, CheckpointError, ConfigError, PhaseId, PhaseResult, PhaseSet, PhaseStatus,
    RunError, StateBlobs, TimeoutKind,
};
use crate::health::{HealthMonitor, HealthStatus, HealthSummary, HealthTransition};
use crate::metrics::{MetricsCollector, MetricsSummary, RateTable};
use crate::obs;
use crate::progress::{PhaseProgress, ProgressSnapshot, ProgressTracker, ProgressUpdate};
use crate::validation::{GateDecision, GateVerdict, Severity, ValidationGate};

/// Final state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    ValidationFailed,
    TimedOut,
    Cancelled,
    Failed,
}

impl RunStatus {
    pub fn from_error(err: &RunError) -> Self {
        match err {
            RunError::ValidationFailure { .. } => RunStatus::ValidationFailed,
            RunError::TimeoutFailure { .. } => RunStatus::TimedOut,
            RunError::CancellationRequested { .. } => RunStatus::Cancelled,
            _ => RunStatus::Failed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::ValidationFailed => "validation_failed",
            RunStatus::TimedOut => "timed_out",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Failed => "failed",
        }
    }
}

/// Everything known about a run once it stops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub status: RunStatus,
    pub exit_code: i32,
    /// Set when any gate let ERROR findings through.
    pub degraded: bool,
    pub iteration: u32,
    pub phases: Vec<PhaseProgress>,
    pub overall_progress: f64,
    pub errors: usize,
    pub warnings: usize,
    pub verdicts: Vec<GateVerdict>,
    pub metrics: MetricsSummary,
    pub health: HealthSummary,
    pub latest_checkpoint: Option<CheckpointRef>,
    pub elapsed_secs: f64,
}

impl RunSummary {
    pub fn phase_status(&self, phase: PhaseId) -> Option<PhaseStatus> {
        self.phases.iter().find(|p| p.phase == phase).map(|p| p.status)
    }
}

enum PhaseOutcome {
    Cancelled,
    TimedOut(HealthTransition),
    Finished(Result<anyhow::Result<PhaseResult>, tokio::task::JoinError>),
}

/// Builder for [`PhaseExecutor`].
pub struct PhaseExecutorBuilder {
    store: Arc<dyn DurableStore>,
    run_id: Option<RunId>,
    config: PipelineConfig,
    phases: Option<PhaseSet>,
    gate: Option<ValidationGate>,
    work: BTreeMap<PhaseId, Arc<dyn PhaseWork>>,
    watchdog_interval: Option<Duration>,
    cancel_grace: Option<Duration>,
    keep_last: Option<usize>,
    pricing: Option<RateTable>,
    cancel: Option<CancellationToken>,
}

impl PhaseExecutorBuilder {
    pub fn run_id(mut self, run_id: RunId) -> Self {
        self.run_id = Some(run_id);
        self
    }

    /// Base configuration; explicit builder settings take precedence.
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn phases(mut self, phases: PhaseSet) -> Self {
        self.phases = Some(phases);
        self
    }

    pub fn gate(mut self, gate: ValidationGate) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Register the work for `phase`.
    pub fn work(mut self, phase: PhaseId, work: impl PhaseWork + 'static) -> Self {
        self.work.insert(phase, Arc::new(work));
        self
    }

    pub fn watchdog_interval(mut self, interval: Duration) -> Self {
        self.watchdog_interval = Some(interval);
        self
    }

    pub fn cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = Some(grace);
        self
    }

    pub fn keep_last(mut self, keep_last: usize) -> Self {
        self.keep_last = Some(keep_last);
        self
    }

    pub fn pricing(mut self, rates: RateTable) -> Self {
        self.pricing = Some(rates);
        self
    }

    /// Use `token` as the run's cancellation token.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn build(self) -> Result<PhaseExecutor, RunError> {
        let config = self.config;
        let phases = match self.phases {
            Some(phases) => phases,
            None => config.phase_set()?,
        };
        for id in phases.ids() {
            if !self.work.contains_key(&id) {
                return Err(ConfigError::MissingWork(id).into());
            }
        }

        let watchdog_interval = self
            .watchdog_interval
            .unwrap_or_else(|| config.watchdog_interval());
        if watchdog_interval.is_zero() {
            return Err(ConfigError::InvalidSetting {
                field: "watchdog_interval",
            }
            .into());
        }

        let run_id = self.run_id.unwrap_or_default();
        let checkpoints = CheckpointManager::new(self.store, run_id.clone())
            .map_err(|e| ConfigError::InvalidRunId {
                run_id: run_id.0.clone(),
                reason: e.to_string(),
            })?
            .with_keep_last(self.keep_last.unwrap_or(config.checkpoint_keep_last));

        let now = Utc::now();
        let tracker = ProgressTracker::new(phases.clone(), now);
        let (progress_tx, _) = watch::channel(tracker.snapshot(now));

        Ok(PhaseExecutor {
            health: Arc::new(HealthMonitor::new(&phases)),
            metrics: Arc::new(MetricsCollector::new(
                self.pricing.unwrap_or_else(|| config.pricing.clone()),
            )),
            gate: self
                .gate
                .unwrap_or_else(|| ValidationGate::standard(&config.validation)),
            cancel_grace: self.cancel_grace.unwrap_or_else(|| config.cancel_grace()),
            cancel: self.cancel.unwrap_or_default(),
            run_id,
            phases,
            work: self.work,
            checkpoints,
            tracker,
            watchdog_interval,
            progress_tx,
            blobs: StateBlobs::new(),
            iteration: 0,
            resume_from: None,
            degraded: false,
            verdicts: Vec::new(),
            summary: None,
        })
    }
}

/// Orchestrates the phases of one run.
pub struct PhaseExecutor {
    run_id: RunId,
    phases: PhaseSet,
    work: BTreeMap<PhaseId, Arc<dyn PhaseWork>>,
    gate: ValidationGate,
    checkpoints: CheckpointManager,
    health: Arc<HealthMonitor>,
    metrics: Arc<MetricsCollector>,
    tracker: ProgressTracker,
    watchdog_interval: Duration,
    cancel_grace: Duration,
    cancel: CancellationToken,
    progress_tx: watch::Sender<ProgressSnapshot>,
    blobs: StateBlobs,
    iteration: u32,
    /// Last checkpoint known to be durable. `accept` checkpoints every
    /// validated phase before the next one starts, so this always names the
    /// last fully-validated phase and cancellation has nothing left to save.
    resume_from: Option<CheckpointRef>,
    degraded: bool,
    verdicts: Vec<GateVerdict>,
    summary: Option<RunSummary>,
}

impl std::fmt::Debug for PhaseExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseExecutor")
            .field("run_id", &self.run_id)
            .field("iteration", &self.iteration)
            .field("current_phase", &self.tracker.current_phase())
            .finish()
    }
}

impl PhaseExecutor {
    pub fn builder(store: Arc<dyn DurableStore>) -> PhaseExecutorBuilder {
        PhaseExecutorBuilder {
            store,
            run_id: None,
            config: PipelineConfig::default(),
            phases: None,
            gate: None,
            work: BTreeMap::new(),
            watchdog_interval: None,
            cancel_grace: None,
            keep_last: None,
            pricing: None,
            cancel: None,
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Cancelling this token aborts the run.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<ProgressSnapshot> {
        self.progress_tx.subscribe()
    }

    pub fn health(&self) -> Arc<HealthMonitor> {
        self.health.clone()
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    /// Summary of the last `run`, whether it succeeded or not.
    pub fn summary(&self) -> Option<&RunSummary> {
        self.summary.as_ref()
    }

    fn publish(&self) {
        self.progress_tx
            .send_replace(self.tracker.snapshot(Utc::now()));
    }

    /// Restore from the latest checkpoint, if one exists.
    ///
    /// Phases up to and including the checkpointed one become COMPLETE, the
    /// state blobs and metrics are restored verbatim, and the next run
    /// attempt uses the following iteration number. Call before [`run`].
    ///
    /// [`run`]: PhaseExecutor::run
    pub async fn resume(&mut self) -> Result<Option<CheckpointRef>, RunError> {
        let Some(checkpoint) = self.checkpoints.load_latest().await? else {
            tracing::debug!(run_id = %self.run_id, "no checkpoint, starting fresh");
            return Ok(None);
        };
        let key = self
            .checkpoints
            .record_key(checkpoint.phase, checkpoint.iteration)?;
        let Some(position) = self.phases.position(checkpoint.phase) else {
            return Err(RunError::CheckpointCorruption {
                key: key.to_string(),
                reason: format!("phase {} is not configured for this run", checkpoint.phase),
            });
        };

        let now = Utc::now();
        let restored: Vec<PhaseId> = self.phases.ids().take(position + 1).collect();
        for phase in restored {
            self.tracker.mark_restored_complete(phase, now)?;
        }
        self.blobs = checkpoint.state_blobs;
        self.metrics.restore(checkpoint.metrics_snapshot);
        self.iteration = checkpoint.iteration.saturating_add(1);

        let reference = CheckpointRef {
            key: key.to_string(),
            phase: checkpoint.phase,
            iteration: checkpoint.iteration,
        };
        self.resume_from = Some(reference.clone());
        obs::emit_run_resumed(&self.run_id.0, checkpoint.phase, checkpoint.iteration);
        self.publish();
        Ok(Some(reference))
    }

    /// Run every phase not yet COMPLETE, in order.
    pub async fn run(&mut self) -> Result<RunSummary, RunError> {
        let span = obs::run_span(&self.run_id.0);
        self.run_phases().instrument(span).await
    }

    async fn run_phases(&mut self) -> Result<RunSummary, RunError> {
        let started = Instant::now();
        obs::emit_run_started(&self.run_id.0, self.phases.len(), self.iteration);
        self.publish();

        let order: Vec<PhaseId> = self.phases.ids().collect();
        let mut outcome = Ok(());
        for phase in order {
            if self.tracker.status(phase) == Some(PhaseStatus::Complete) {
                continue;
            }
            if self.cancel.is_cancelled() {
                outcome = Err(RunError::CancellationRequested {
                    phase: None,
                    resume_from: self.resume_from.clone(),
                });
                break;
            }
            if let Err(e) = self.run_phase(phase).await {
                outcome = Err(e);
                break;
            }
        }

        let summary = self.build_summary(started.elapsed(), outcome.as_ref().err());
        obs::emit_run_finished(
            &self.run_id.0,
            started.elapsed().as_millis() as u64,
            summary.status.as_str(),
            summary.overall_progress,
            summary.degraded,
        );
        self.summary = Some(summary.clone());
        self.publish();
        outcome.map(|()| summary)
    }

    fn build_summary(&self, elapsed: Duration, error: Option<&RunError>) -> RunSummary {
        let now = Utc::now();
        let snapshot = self.tracker.snapshot(now);
        let (status, exit_code) = match error {
            None => (RunStatus::Completed, exit_codes::SUCCESS),
            Some(e) => (RunStatus::from_error(e), e.exit_code()),
        };
        RunSummary {
            run_id: self.run_id.0.clone(),
            status,
            exit_code,
            degraded: self.degraded,
            iteration: self.iteration,
            phases: snapshot.phases,
            overall_progress: snapshot.overall,
            errors: self.verdicts.iter().map(|v| v.errors).sum(),
            warnings: self.verdicts.iter().map(|v| v.warnings).sum(),
            verdicts: self.verdicts.clone(),
            metrics: self.metrics.summary(),
            health: self.health.summary(now),
            latest_checkpoint: self.resume_from.clone(),
            elapsed_secs: elapsed.as_secs_f64(),
        }
    }

    async fn run_phase(&mut self, phase: PhaseId) -> Result<(), RunError> {
        let work = self
            .work
            .get(&phase)
            .cloned()
            .ok_or(ConfigError::MissingWork(phase))?;

        let now = Utc::now();
        self.tracker.start_phase(phase, now)?;
        self.health.start(phase, now);
        obs::emit_phase_started(&self.run_id.0, phase, self.iteration);
        self.publish();

        let run_token = self.cancel.clone();
        let phase_token = self.cancel.child_token();
        let (signal_tx, mut signal_rx) = mpsc::unbounded_channel();
        let ctx = PhaseContext::new(
            self.run_id.clone(),
            phase,
            self.iteration,
            self.health.clone(),
            self.metrics.clone(),
            signal_tx,
            phase_token.clone(),
            Arc::new(self.blobs.clone()),
        );

        let phase_span = tracing::info_span!("pipewarden.phase", phase = %phase, iteration = self.iteration);
        let mut handle: JoinHandle<anyhow::Result<PhaseResult>> =
            tokio::spawn(async move { work.execute(ctx).await }.instrument(phase_span));

        let (timeout_tx, mut timeout_rx) = mpsc::channel(1);
        let watchdog_stop = CancellationToken::new();
        let watchdog = spawn_watchdog(
            self.run_id.0.clone(),
            self.health.clone(),
            self.watchdog_interval,
            watchdog_stop.clone(),
            timeout_tx,
        );

        let outcome = loop {
            tokio::select! {
                biased;
                _ = run_token.cancelled() => break PhaseOutcome::Cancelled,
                Some(t) = timeout_rx.recv() => break PhaseOutcome::TimedOut(t),
                Some(signal) = signal_rx.recv() => self.apply_signal(signal),
                joined = &mut handle => break PhaseOutcome::Finished(joined),
            }
        };

        watchdog_stop.cancel();
        if let Err(e) = watchdog.await {
            tracing::warn!(phase = %phase, error = %e, "watchdog task failed");
        }
        while let Ok(signal) = signal_rx.try_recv() {
            self.apply_signal(signal);
        }

        let result = match outcome {
            PhaseOutcome::Cancelled => {
                phase_token.cancel();
                self.wait_for_stop(phase, &mut handle).await;
                self.tracker.mark_aborted(phase, Utc::now())?;
                Err(RunError::CancellationRequested {
                    phase: Some(phase),
                    resume_from: self.resume_from.clone(),
                })
            }
            PhaseOutcome::TimedOut(t) => {
                obs::emit_phase_timed_out(&self.run_id.0, phase, t.elapsed, t.limit);
                phase_token.cancel();
                self.wait_for_stop(phase, &mut handle).await;
                self.tracker.mark_timed_out(phase, Utc::now())?;
                Err(RunError::TimeoutFailure {
                    phase,
                    kind: TimeoutKind::Hard,
                    elapsed: t.elapsed,
                    limit: t.limit,
                    resume_from: self.resume_from.clone(),
                })
            }
            PhaseOutcome::Finished(Err(join_error)) => {
                let message = if join_error.is_panic() {
                    format!("phase work panicked: {join_error}")
                } else {
                    format!("phase work was cancelled: {join_error}")
                };
                self.fail_phase(phase, message)
            }
            PhaseOutcome::Finished(Ok(Err(e))) => self.fail_phase(phase, format!("{e:#}")),
            PhaseOutcome::Finished(Ok(Ok(result))) => self.accept(phase, result).await,
        };

        self.health.stop(phase);
        if let Some(state) = self.tracker.state(phase) {
            obs::emit_phase_finished(
                &self.run_id.0,
                phase,
                state.status.as_str(),
                state.elapsed_at(Utc::now()),
            );
        }
        self.publish();
        result
    }

    fn apply_signal(&mut self, signal: PhaseSignal) {
        match signal {
            PhaseSignal::Progress { phase, fraction } => {
                match self.tracker.update_progress(phase, fraction) {
                    Ok(ProgressUpdate::Applied) => self.publish(),
                    Ok(ProgressUpdate::NotRunning | ProgressUpdate::Rejected) => {}
                    Err(e) => tracing::warn!(phase = %phase, error = %e, "ignoring progress report"),
                }
            }
            PhaseSignal::Heartbeat { phase, at } => self.tracker.record_heartbeat(phase, at),
        }
    }

    async fn wait_for_stop(
        &self,
        phase: PhaseId,
        handle: &mut JoinHandle<anyhow::Result<PhaseResult>>,
    ) {
        match tokio::time::timeout(self.cancel_grace, handle).await {
            Ok(_) => tracing::debug!(phase = %phase, "phase work stopped after cancellation"),
            Err(_) => tracing::warn!(
                phase = %phase,
                grace_ms = self.cancel_grace.as_millis() as u64,
                "phase work ignored cancellation, detaching"
            ),
        }
    }

    fn fail_phase(&mut self, phase: PhaseId, message: String) -> Result<(), RunError> {
        self.tracker.mark_failed(phase, Utc::now())?;
        tracing::error!(run_id = %self.run_id, phase = %phase, error = %message, "phase work failed");
        Err(RunError::PhaseExecution {
            phase,
            message,
            resume_from: self.resume_from.clone(),
        })
    }

    /// VALIDATING, then COMPLETE plus checkpoint, or FAILED.
    async fn accept(&mut self, phase: PhaseId, result: PhaseResult) -> Result<(), RunError> {
        self.tracker.mark_validating(phase, Utc::now())?;
        self.publish();

        let verdict = self.gate.judge(phase, &result.output);
        obs::emit_gate_evaluated(&self.run_id.0, &verdict);
        self.tracker.note_findings(phase, &verdict.findings);
        self.verdicts.push(verdict.clone());

        if verdict.decision == GateDecision::Abort {
            self.tracker.mark_failed(phase, Utc::now())?;
            return Err(RunError::ValidationFailure {
                phase,
                severity: verdict.blocking_severity().unwrap_or(Severity::Critical),
                findings: verdict.findings,
                resume_from: self.resume_from.clone(),
            });
        }
        if verdict.decision == GateDecision::ProceedDegraded {
            self.degraded = true;
        }

        self.blobs.extend(result.state_blobs);
        self.tracker.complete_phase(phase, Utc::now())?;
        self.metrics.flush(phase);
        self.save_checkpoint(phase).await
    }

    async fn save_checkpoint(&mut self, phase: PhaseId) -> Result<(), RunError> {
        let checkpoint = Checkpoint::new(
            self.run_id.clone(),
            phase,
            self.iteration,
            self.blobs.clone(),
            self.metrics.snapshot(),
        );
        match self.checkpoints.save(&checkpoint).await {
            Ok(reference) => {
                self.resume_from = Some(reference);
                Ok(())
            }
            Err(CheckpointError::Write { key, source }) => Err(RunError::CheckpointWriteFailure {
                key,
                source,
                resume_from: self.resume_from.clone(),
            }),
            Err(other) => Err(other.into()),
        }
    }
}

fn spawn_watchdog(
    run_id: String,
    health: Arc<HealthMonitor>,
    interval: Duration,
    stop: CancellationToken,
    timeouts: mpsc::Sender<HealthTransition>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = stop.cancelled() => return,
                _ = ticker.tick() => {}
            }
            for transition in health.check_timeouts(Utc::now()) {
                match transition.to {
                    HealthStatus::Stalled => obs::emit_phase_stalled(
                        &run_id,
                        transition.phase,
                        transition.since_heartbeat,
                        transition.limit,
                    ),
                    HealthStatus::TimedOut => {
                        // Only one phase runs, so the first hard timeout ends the watch.
                        let _ = timeouts.send(transition).await;
                        return;
                    }
                    HealthStatus::Alive => {}
                }
            }
        }
    }
    .in_current_span())
}
