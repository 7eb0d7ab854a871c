//! Error taxonomy for pipewarden.

use std::time::Duration;

use pipewarden_state::StorageError;

use super::phase::PhaseId;
use super::run_state::PhaseStatus;
use crate::checkpoint::CheckpointRef;
use crate::validation::{Severity, ValidationResult};

/// Process exit codes reported by a run.
pub mod exit_codes {
    /// Every phase completed and passed its gate.
    pub const SUCCESS: i32 = 0;
    /// Unclassified failure (phase work error, configuration, storage).
    pub const FAILURE: i32 = 1;
    /// A validation gate aborted the run.
    pub const VALIDATION_ABORT: i32 = 10;
    /// A phase exceeded its hard timeout.
    pub const TIMEOUT_ABORT: i32 = 11;
    /// The run was cancelled from outside.
    pub const CANCELLED: i32 = 12;
    /// A stored checkpoint could not be trusted.
    pub const CHECKPOINT_CORRUPTION: i32 = 13;
    /// A checkpoint could not be written.
    pub const CHECKPOINT_WRITE_FAILURE: i32 = 14;
}

/// Configuration problems detected before a run starts.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("phase set must not be empty")]
    EmptyPhaseSet,

    #[error("phase {phase} has weight {weight}, expected a value in (0, 1]")]
    InvalidWeight { phase: PhaseId, weight: f64 },

    #[error("phase weights sum to {sum}, expected 1.0")]
    WeightSum { sum: f64 },

    #[error("phase {0} is configured more than once")]
    DuplicatePhase(PhaseId),

    #[error("phase {phase} is listed after {after}, phases must follow pipeline order")]
    OutOfOrder { phase: PhaseId, after: PhaseId },

    #[error("phase {phase} has a zero {field}")]
    InvalidDuration { phase: PhaseId, field: &'static str },

    #[error("{field} must be positive")]
    InvalidSetting { field: &'static str },

    #[error("no work registered for phase {0}")]
    MissingWork(PhaseId),

    #[error("invalid run id '{run_id}': {reason}")]
    InvalidRunId { run_id: String, reason: String },

    #[error("failed to parse pipeline config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to read pipeline config {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Misuse of the progress tracker.
#[derive(Debug, thiserror::Error)]
pub enum ProgressError {
    #[error("phase {0} is not part of this run")]
    UnknownPhase(PhaseId),

    #[error("phase {phase} was already started (status {status})")]
    AlreadyStarted { phase: PhaseId, status: PhaseStatus },

    #[error("fraction {fraction} for phase {phase} is outside [0, 1]")]
    FractionOutOfRange { phase: PhaseId, fraction: f64 },

    #[error("phase {phase} cannot move from {from} to {to}")]
    InvalidTransition {
        phase: PhaseId,
        from: PhaseStatus,
        to: PhaseStatus,
    },
}

/// Checkpoint persistence failures.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint {key} is corrupt: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("failed to write checkpoint {key}: {source}")]
    Write {
        key: String,
        #[source]
        source: StorageError,
    },

    #[error("failed to read checkpoint {key}: {source}")]
    Read {
        key: String,
        #[source]
        source: StorageError,
    },

    #[error("failed to serialize checkpoint: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("checkpoint belongs to run {found}, expected {expected}")]
    RunMismatch { expected: String, found: String },

    #[error("invalid checkpoint key: {0}")]
    InvalidKey(#[source] StorageError),
}

/// Whether a timeout came from missing heartbeats or the hard limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutKind {
    Stalled,
    Hard,
}

impl std::fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutKind::Stalled => f.write_str("stalled"),
            TimeoutKind::Hard => f.write_str("hard timeout"),
        }
    }
}

/// Fatal outcomes of a pipeline run.
///
/// Every phase-level abort names the phase and carries `resume_from`, the
/// last checkpoint that is safe to resume from (`None` when no phase has
/// been checkpointed yet).
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Progress(#[from] ProgressError),

    #[error("validation failed for phase {phase} at {severity}: {}", summarize(.findings))]
    ValidationFailure {
        phase: PhaseId,
        severity: Severity,
        findings: Vec<ValidationResult>,
        resume_from: Option<CheckpointRef>,
    },

    #[error("phase {phase} {kind} after {elapsed:?} (limit {limit:?})")]
    TimeoutFailure {
        phase: PhaseId,
        kind: TimeoutKind,
        elapsed: Duration,
        limit: Duration,
        resume_from: Option<CheckpointRef>,
    },

    #[error("checkpoint {key} is corrupt: {reason}")]
    CheckpointCorruption { key: String, reason: String },

    #[error("failed to write checkpoint {key}: {source}")]
    CheckpointWriteFailure {
        key: String,
        #[source]
        source: StorageError,
        resume_from: Option<CheckpointRef>,
    },

    #[error("run cancelled{}", .phase.map(|p| format!(" during phase {p}")).unwrap_or_default())]
    CancellationRequested {
        phase: Option<PhaseId>,
        resume_from: Option<CheckpointRef>,
    },

    #[error("phase {phase} failed: {message}")]
    PhaseExecution {
        phase: PhaseId,
        message: String,
        resume_from: Option<CheckpointRef>,
    },

    #[error("checkpoint error: {0}")]
    Checkpoint(CheckpointError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

fn summarize(findings: &[ValidationResult]) -> String {
    let failing: Vec<&str> = findings
        .iter()
        .filter(|f| !f.passed)
        .map(|f| f.message.as_str())
        .collect();
    if failing.is_empty() {
        "no failing checks".to_string()
    } else {
        failing.join("; ")
    }
}

impl From<CheckpointError> for RunError {
    fn from(err: CheckpointError) -> Self {
        match err {
            CheckpointError::Corrupt { key, reason } => {
                RunError::CheckpointCorruption { key, reason }
            }
            CheckpointError::Write { key, source } => RunError::CheckpointWriteFailure {
                key,
                source,
                resume_from: None,
            },
            other => RunError::Checkpoint(other),
        }
    }
}

impl RunError {
    /// Process exit code for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::ValidationFailure { .. } => exit_codes::VALIDATION_ABORT,
            RunError::TimeoutFailure { .. } => exit_codes::TIMEOUT_ABORT,
            RunError::CancellationRequested { .. } => exit_codes::CANCELLED,
            RunError::CheckpointCorruption { .. } => exit_codes::CHECKPOINT_CORRUPTION,
            RunError::CheckpointWriteFailure { .. } => exit_codes::CHECKPOINT_WRITE_FAILURE,
            RunError::Config(_)
            | RunError::Progress(_)
            | RunError::PhaseExecution { .. }
            | RunError::Checkpoint(_)
            | RunError::Storage(_) => exit_codes::FAILURE,
        }
    }

    /// Phase the run stopped in, when the failure is phase-scoped.
    pub fn phase(&self) -> Option<PhaseId> {
        match self {
            RunError::ValidationFailure { phase, .. }
            | RunError::TimeoutFailure { phase, .. }
            | RunError::PhaseExecution { phase, .. } => Some(*phase),
            RunError::CancellationRequested { phase, .. } => *phase,
            _ => None,
        }
    }

    /// Last checkpoint that is safe to resume from.
    pub fn resume_from(&self) -> Option<&CheckpointRef> {
        match self {
            RunError::ValidationFailure { resume_from, .. }
            | RunError::TimeoutFailure { resume_from, .. }
            | RunError::CheckpointWriteFailure { resume_from, .. }
            | RunError::CancellationRequested { resume_from, .. }
            | RunError::PhaseExecution { resume_from, .. } => resume_from.as_ref(),
            _ => None,
        }
    }

    /// Failing findings behind a validation abort.
    pub fn failing_checks(&self) -> Vec<&ValidationResult> {
        match self {
            RunError::ValidationFailure { findings, .. } => {
                findings.iter().filter(|f| !f.passed).collect()
            }
            _ => Vec::new(),
        }
    }
}

/// Result type for pipeline runs.
pub type Result<T> = std::result::Result<T, RunError>;
