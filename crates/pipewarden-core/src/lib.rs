//! Pipewarden Core Library
//!
//! Orchestration and monitoring for multi-phase analysis pipelines: an
//! ordered, weighted phase set driven by [`PhaseExecutor`], with progress
//! and ETA tracking, severity-gated validation between phases, a heartbeat
//! watchdog, crash-safe checkpoints and per-call cost metrics.

pub mod checkpoint;
pub mod config;
pub mod context;
pub mod domain;
pub mod executor;
pub mod health;
pub mod metrics;
pub mod obs;
pub mod progress;
pub mod telemetry;
pub mod validation;

pub use checkpoint::{
    Checkpoint, CheckpointManager, CheckpointPointer, CheckpointRef, DEFAULT_KEEP_LAST,
    FORMAT_VERSION,
};
pub use config::{PhaseConfig, PipelineConfig};
pub use context::{instrument, work_fn, PhaseContext, PhaseSignal, PhaseWork};
pub use domain::{
    exit_codes, CheckpointError, ConfigError, EvidenceBundle, EvidenceItem, Hypothesis,
    HypothesisSet, NarrativeDraft, NarrativeSection, PhaseId, PhaseOutput, PhaseResult,
    PhaseRunState, PhaseSet, PhaseSpec, PhaseStatus, ProgressError, Result, RunError, StateBlobs,
    SynthesisReport, TimeoutKind, TokenUsage, ValuationOutput,
};
pub use executor::{PhaseExecutor, PhaseExecutorBuilder, RunStatus, RunSummary};
pub use health::{HealthMonitor, HealthStatus, HealthSummary, HealthTransition, PhaseHealth};
pub use metrics::{
    percentile, LatencyStats, MetricSample, MetricsAggregate, MetricsCollector, MetricsScope,
    MetricsSnapshot, MetricsSummary, PricingRate, RateTable,
};
pub use obs::{
    emit_checkpoint_saved, emit_gate_evaluated, emit_phase_finished, emit_phase_stalled,
    emit_phase_started, emit_phase_timed_out, emit_run_finished, emit_run_resumed,
    emit_run_started, run_span,
};
pub use progress::{
    EtaBreakdown, PendingFinding, PhaseProgress, ProgressSnapshot, ProgressTracker, ProgressUpdate,
};
pub use telemetry::{init_tracing, LogFormat};
pub use validation::{
    evaluate_findings, DetailValue, GateDecision, GateVerdict, PhaseValidator, Severity,
    ValidationConfig, ValidationGate, ValidationPolicy, ValidationResult,
};

pub use pipewarden_state::{DurableStore, FsStore, RunId, StorageError, StoreKey};

/// Pipewarden version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
