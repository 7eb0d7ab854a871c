//! The contract between the orchestrator and phase work.
//!
//! Phase work receives a [`PhaseContext`] scoped to one phase attempt. It
//! uses it to send heartbeats, report progress, record model calls and
//! observe cancellation. Nothing on the context blocks.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument as _;

use pipewarden_state::RunId;

use crate::domain::{PhaseId, PhaseResult, StateBlobs};
use crate::health::HealthMonitor;
use crate::metrics::MetricsCollector;

/// Messages from phase work to the orchestrator's control path.
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseSignal {
    Progress { phase: PhaseId, fraction: f64 },
    Heartbeat { phase: PhaseId, at: DateTime<Utc> },
}

/// Handle given to phase work for one phase attempt.
#[derive(Clone)]
pub struct PhaseContext {
    run_id: RunId,
    phase: PhaseId,
    iteration: u32,
    health: Arc<HealthMonitor>,
    metrics: Arc<MetricsCollector>,
    signals: mpsc::UnboundedSender<PhaseSignal>,
    cancel: CancellationToken,
    blobs: Arc<StateBlobs>,
}

impl std::fmt::Debug for PhaseContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseContext")
            .field("run_id", &self.run_id)
            .field("phase", &self.phase)
            .field("iteration", &self.iteration)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl PhaseContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        run_id: RunId,
        phase: PhaseId,
        iteration: u32,
        health: Arc<HealthMonitor>,
        metrics: Arc<MetricsCollector>,
        signals: mpsc::UnboundedSender<PhaseSignal>,
        cancel: CancellationToken,
        blobs: Arc<StateBlobs>,
    ) -> Self {
        Self {
            run_id,
            phase,
            iteration,
            health,
            metrics,
            signals,
            cancel,
            blobs,
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn phase(&self) -> PhaseId {
        self.phase
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Signal liveness to the watchdog.
    pub fn heartbeat(&self) {
        let now = Utc::now();
        if let Some(t) = self.health.heartbeat(self.phase, now) {
            tracing::info!(
                event = "phase.recovered",
                run_id = %self.run_id,
                phase = %self.phase,
                from = %t.from,
                "heartbeat resumed"
            );
        }
        // Receiver is dropped once the phase is finalized.
        let _ = self.signals.send(PhaseSignal::Heartbeat {
            phase: self.phase,
            at: now,
        });
    }

    /// Report the completion fraction of this phase, in [0, 1].
    pub fn report_progress(&self, fraction: f64) {
        let _ = self.signals.send(PhaseSignal::Progress {
            phase: self.phase,
            fraction,
        });
    }

    /// Record one model call against this phase.
    pub fn record_call(&self, tier: &str, input_tokens: u64, output_tokens: u64, latency: Duration) {
        self.metrics
            .record_call(self.phase, tier, input_tokens, output_tokens, latency);
    }

    /// Run `call`, timing it and recording the token usage it reports.
    pub async fn timed_call<F, T>(&self, tier: &str, call: F) -> anyhow::Result<T>
    where
        F: Future<Output = anyhow::Result<(T, u64, u64)>>,
    {
        let started = Instant::now();
        let outcome = call.await;
        let latency = started.elapsed();
        match outcome {
            Ok((value, input_tokens, output_tokens)) => {
                self.record_call(tier, input_tokens, output_tokens, latency);
                Ok(value)
            }
            Err(e) => {
                self.record_call(tier, 0, 0, latency);
                Err(e)
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the orchestrator cancels this phase.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Token for handing to nested tasks.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// State carried forward from earlier phases (and restored checkpoints).
    pub fn blobs(&self) -> &StateBlobs {
        &self.blobs
    }

    pub fn blob(&self, key: &str) -> Option<&serde_json::Value> {
        self.blobs.get(key)
    }
}

/// The external computation of one phase.
#[async_trait]
pub trait PhaseWork: Send + Sync {
    async fn execute(&self, ctx: PhaseContext) -> anyhow::Result<PhaseResult>;
}

/// [`PhaseWork`] backed by an async closure.
pub struct FnWork<F> {
    f: F,
}

/// Wrap an async closure as phase work.
pub fn work_fn<F, Fut>(f: F) -> FnWork<F>
where
    F: Fn(PhaseContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<PhaseResult>> + Send + 'static,
{
    FnWork { f }
}

#[async_trait]
impl<F, Fut> PhaseWork for FnWork<F>
where
    F: Fn(PhaseContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<PhaseResult>> + Send + 'static,
{
    async fn execute(&self, ctx: PhaseContext) -> anyhow::Result<PhaseResult> {
        (self.f)(ctx).await
    }
}

/// Phase work wrapped with a span, heartbeats and a metric sample.
pub struct InstrumentedWork<W> {
    inner: W,
}

/// Wrap `work` so every execution heartbeats before and after, runs inside
/// a `pipewarden.phase_work` span, and records one metric sample. The
/// sample carries the result's token usage when present and latency only
/// otherwise.
pub fn instrument<W: PhaseWork>(work: W) -> InstrumentedWork<W> {
    InstrumentedWork { inner: work }
}

#[async_trait]
impl<W: PhaseWork> PhaseWork for InstrumentedWork<W> {
    async fn execute(&self, ctx: PhaseContext) -> anyhow::Result<PhaseResult> {
        let span = tracing::info_span!(
            "pipewarden.phase_work",
            run_id = %ctx.run_id,
            phase = %ctx.phase,
            iteration = ctx.iteration,
        );
        ctx.heartbeat();
        let started = Instant::now();
        let result = self.inner.execute(ctx.clone()).instrument(span).await;
        let latency = started.elapsed();
        ctx.heartbeat();

        let default_tier = ctx.metrics.rates().default_tier.clone();
        match &result {
            Ok(r) => match &r.usage {
                Some(usage) => ctx.record_call(
                    &usage.tier,
                    usage.input_tokens,
                    usage.output_tokens,
                    latency,
                ),
                None => ctx.record_call(&default_tier, 0, 0, latency),
            },
            Err(e) => {
                tracing::debug!(phase = %ctx.phase, error = %e, "instrumented work failed");
                ctx.record_call(&default_tier, 0, 0, latency);
            }
        }
        result
    }
}
