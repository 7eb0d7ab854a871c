//! Domain models for pipewarden.
//!
//! Canonical definitions for the core entities:
//! - `PhaseId` / `PhaseSpec` / `PhaseSet`: the ordered, weighted stages of a run
//! - `PhaseRunState`: per-phase status record owned by the orchestrator
//! - `PhaseOutput` / `PhaseResult`: what phase work hands back for validation
//! - `RunError` and friends: the error taxonomy and exit codes

pub mod error;
pub mod output;
pub mod phase;
pub mod run_state;

pub use error::{
    exit_codes, CheckpointError, ConfigError, ProgressError, Result, RunError, TimeoutKind,
};
pub use output::{
    EvidenceBundle, EvidenceItem, Hypothesis, HypothesisSet, NarrativeDraft, NarrativeSection,
    PhaseOutput, PhaseResult, StateBlobs, SynthesisReport, TokenUsage, ValuationOutput,
};
pub use phase::{PhaseId, PhaseSet, PhaseSpec};
pub use run_state::{PhaseRunState, PhaseStatus};
