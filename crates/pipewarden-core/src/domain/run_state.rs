//! Per-phase run state and its status machine.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::phase::PhaseId;

/// Lifecycle status of one phase within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseStatus {
    Pending,
    Running,
    Validating,
    Complete,
    Failed,
    TimedOut,
    Aborted,
}

impl PhaseStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PhaseStatus::Complete
                | PhaseStatus::Failed
                | PhaseStatus::TimedOut
                | PhaseStatus::Aborted
        )
    }

    /// Whether the status machine allows moving from `self` to `next`.
    ///
    /// `Pending -> Complete` is only used when restoring from a checkpoint.
    pub fn can_transition_to(&self, next: PhaseStatus) -> bool {
        use PhaseStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Aborted)
                | (Pending, Complete)
                | (Running, Validating)
                | (Running, TimedOut)
                | (Running, Failed)
                | (Running, Aborted)
                | (Validating, Complete)
                | (Validating, Failed)
                | (Validating, Aborted)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseStatus::Pending => "PENDING",
            PhaseStatus::Running => "RUNNING",
            PhaseStatus::Validating => "VALIDATING",
            PhaseStatus::Complete => "COMPLETE",
            PhaseStatus::Failed => "FAILED",
            PhaseStatus::TimedOut => "TIMED_OUT",
            PhaseStatus::Aborted => "ABORTED",
        }
    }
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable record of one phase, owned by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRunState {
    pub phase: PhaseId,
    pub status: PhaseStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Completion fraction in [0, 1].
    pub fraction: f64,
    /// Frozen elapsed time once the phase is terminal.
    pub elapsed: Option<Duration>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PhaseRunState {
    pub fn pending(phase: PhaseId) -> Self {
        Self {
            phase,
            status: PhaseStatus::Pending,
            started_at: None,
            last_heartbeat: None,
            fraction: 0.0,
            elapsed: None,
            finished_at: None,
        }
    }

    /// Elapsed time as of `now`: frozen value if terminal, live otherwise.
    pub fn elapsed_at(&self, now: DateTime<Utc>) -> Duration {
        if let Some(frozen) = self.elapsed {
            return frozen;
        }
        match self.started_at {
            Some(start) => (now - start).to_std().unwrap_or(Duration::ZERO),
            None => Duration::ZERO,
        }
    }
}
