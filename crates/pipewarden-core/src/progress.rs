//! Weighted progress and ETA across the phases of a run.
//!
//! The tracker is owned by the orchestrator's control path; phase work
//! reports fractions over a channel and never touches it directly.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{PhaseId, PhaseRunState, PhaseSet, PhaseStatus, ProgressError};
use crate::validation::{Severity, ValidationResult};

/// Outcome of [`ProgressTracker::update_progress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressUpdate {
    Applied,
    /// The phase is not RUNNING; nothing changed.
    NotRunning,
    /// The fraction was below the last recorded value; nothing changed.
    Rejected,
}

/// The two terms of the run ETA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EtaBreakdown {
    /// Remaining time of the phase currently running.
    pub current: Duration,
    /// Weighted nominal time of phases not yet started.
    pub pending: Duration,
}

impl EtaBreakdown {
    pub fn total(&self) -> Duration {
        self.current.saturating_add(self.pending)
    }
}

/// Seconds to a `Duration`, saturating at `Duration::MAX`. Negative and NaN
/// inputs map to zero.
fn saturating_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingFinding {
    pub phase: PhaseId,
    pub finding: ValidationResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseProgress {
    pub phase: PhaseId,
    pub status: PhaseStatus,
    pub fraction: f64,
    pub elapsed_secs: f64,
}

/// Point-in-time view published to progress subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub phases: Vec<PhaseProgress>,
    pub overall: f64,
    pub elapsed_secs: f64,
    pub eta_secs: f64,
    /// Failing WARNING and ERROR findings seen so far.
    pub pending_findings: Vec<PendingFinding>,
    pub taken_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ProgressTracker {
    phases: PhaseSet,
    states: BTreeMap<PhaseId, PhaseRunState>,
    run_started_at: DateTime<Utc>,
    findings: Vec<PendingFinding>,
}

impl ProgressTracker {
    pub fn new(phases: PhaseSet, run_started_at: DateTime<Utc>) -> Self {
        let states = phases
            .ids()
            .map(|id| (id, PhaseRunState::pending(id)))
            .collect();
        Self {
            phases,
            states,
            run_started_at,
            findings: Vec::new(),
        }
    }

    fn state_mut(&mut self, phase: PhaseId) -> Result<&mut PhaseRunState, ProgressError> {
        self.states
            .get_mut(&phase)
            .ok_or(ProgressError::UnknownPhase(phase))
    }

    pub fn phases(&self) -> &PhaseSet {
        &self.phases
    }

    pub fn state(&self, phase: PhaseId) -> Option<&PhaseRunState> {
        self.states.get(&phase)
    }

    pub fn status(&self, phase: PhaseId) -> Option<PhaseStatus> {
        self.states.get(&phase).map(|s| s.status)
    }

    /// The phase currently RUNNING or VALIDATING, if any.
    pub fn current_phase(&self) -> Option<PhaseId> {
        self.states
            .values()
            .find(|s| matches!(s.status, PhaseStatus::Running | PhaseStatus::Validating))
            .map(|s| s.phase)
    }

    pub fn start_phase(&mut self, phase: PhaseId, now: DateTime<Utc>) -> Result<(), ProgressError> {
        let state = self.state_mut(phase)?;
        if state.status != PhaseStatus::Pending {
            return Err(ProgressError::AlreadyStarted {
                phase,
                status: state.status,
            });
        }
        state.status = PhaseStatus::Running;
        state.started_at = Some(now);
        state.last_heartbeat = Some(now);
        state.fraction = 0.0;
        Ok(())
    }

    /// Record the completion fraction of a running phase.
    pub fn update_progress(
        &mut self,
        phase: PhaseId,
        fraction: f64,
    ) -> Result<ProgressUpdate, ProgressError> {
        if !(0.0..=1.0).contains(&fraction) {
            return Err(ProgressError::FractionOutOfRange { phase, fraction });
        }
        let state = self.state_mut(phase)?;
        if state.status != PhaseStatus::Running {
            return Ok(ProgressUpdate::NotRunning);
        }
        if fraction < state.fraction {
            tracing::debug!(
                phase = %phase,
                current = state.fraction,
                rejected = fraction,
                "progress regression ignored"
            );
            return Ok(ProgressUpdate::Rejected);
        }
        state.fraction = fraction;
        Ok(ProgressUpdate::Applied)
    }

    pub fn record_heartbeat(&mut self, phase: PhaseId, at: DateTime<Utc>) {
        if let Some(state) = self.states.get_mut(&phase) {
            if state.last_heartbeat.map_or(true, |last| at > last) {
                state.last_heartbeat = Some(at);
            }
        }
    }

    fn transition(
        &mut self,
        phase: PhaseId,
        to: PhaseStatus,
        now: DateTime<Utc>,
    ) -> Result<(), ProgressError> {
        let state = self.state_mut(phase)?;
        if !state.status.can_transition_to(to) {
            return Err(ProgressError::InvalidTransition {
                phase,
                from: state.status,
                to,
            });
        }
        if to.is_terminal() {
            state.elapsed = Some(state.elapsed_at(now));
            state.finished_at = Some(now);
        }
        state.status = to;
        Ok(())
    }

    pub fn mark_validating(&mut self, phase: PhaseId, now: DateTime<Utc>) -> Result<(), ProgressError> {
        self.transition(phase, PhaseStatus::Validating, now)
    }

    /// Mark the phase COMPLETE with fraction 1.0 and freeze its elapsed time.
    ///
    /// A RUNNING phase passes through VALIDATING implicitly.
    pub fn complete_phase(&mut self, phase: PhaseId, now: DateTime<Utc>) -> Result<(), ProgressError> {
        if self.status(phase) == Some(PhaseStatus::Running) {
            self.transition(phase, PhaseStatus::Validating, now)?;
        }
        self.transition(phase, PhaseStatus::Complete, now)?;
        self.state_mut(phase)?.fraction = 1.0;
        Ok(())
    }

    pub fn mark_failed(&mut self, phase: PhaseId, now: DateTime<Utc>) -> Result<(), ProgressError> {
        self.transition(phase, PhaseStatus::Failed, now)
    }

    pub fn mark_timed_out(&mut self, phase: PhaseId, now: DateTime<Utc>) -> Result<(), ProgressError> {
        self.transition(phase, PhaseStatus::TimedOut, now)
    }

    pub fn mark_aborted(&mut self, phase: PhaseId, now: DateTime<Utc>) -> Result<(), ProgressError> {
        self.transition(phase, PhaseStatus::Aborted, now)
    }

    /// Mark a phase COMPLETE because a checkpoint covers it.
    pub fn mark_restored_complete(
        &mut self,
        phase: PhaseId,
        now: DateTime<Utc>,
    ) -> Result<(), ProgressError> {
        self.transition(phase, PhaseStatus::Complete, now)?;
        let state = self.state_mut(phase)?;
        state.fraction = 1.0;
        state.elapsed = Some(Duration::ZERO);
        Ok(())
    }

    /// Keep failing WARNING and ERROR findings for progress subscribers.
    pub fn note_findings(&mut self, phase: PhaseId, findings: &[ValidationResult]) {
        self.findings.extend(
            findings
                .iter()
                .filter(|f| !f.passed && matches!(f.severity, Severity::Warning | Severity::Error))
                .map(|f| PendingFinding {
                    phase,
                    finding: f.clone(),
                }),
        );
    }

    pub fn pending_findings(&self) -> &[PendingFinding] {
        &self.findings
    }

    /// Σ weight × fraction, clamped to [0, 1].
    pub fn overall_progress(&self) -> f64 {
        let sum: f64 = self
            .phases
            .iter()
            .filter_map(|spec| self.states.get(&spec.id).map(|s| spec.weight * s.fraction))
            .sum();
        sum.clamp(0.0, 1.0)
    }

    /// Remaining time of one running phase.
    ///
    /// With elapsed E and fraction F > 0 this is E × (1 − F) / F. Before the
    /// first progress report (F = 0) it is the nominal duration minus E,
    /// floored at zero. `None` unless the phase is RUNNING.
    pub fn phase_eta(&self, phase: PhaseId, now: DateTime<Utc>) -> Option<Duration> {
        let state = self.states.get(&phase)?;
        if state.status != PhaseStatus::Running {
            return None;
        }
        let elapsed = state.elapsed_at(now);
        if state.fraction > 0.0 {
            let remaining = elapsed.as_secs_f64() * (1.0 - state.fraction) / state.fraction;
            Some(saturating_secs(remaining))
        } else {
            let nominal = self.phases.get(phase)?.nominal_or_max();
            Some(nominal.saturating_sub(elapsed))
        }
    }

    pub fn eta_breakdown(&self, now: DateTime<Utc>) -> EtaBreakdown {
        let current = self
            .current_phase()
            .and_then(|p| self.phase_eta(p, now))
            .unwrap_or(Duration::ZERO);
        let pending_secs: f64 = self
            .phases
            .iter()
            .filter(|spec| self.status(spec.id) == Some(PhaseStatus::Pending))
            .map(|spec| spec.weight * spec.nominal_or_max().as_secs_f64())
            .sum();
        EtaBreakdown {
            current,
            pending: saturating_secs(pending_secs),
        }
    }

    pub fn eta(&self, now: DateTime<Utc>) -> Duration {
        self.eta_breakdown(now).total()
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> ProgressSnapshot {
        let phases = self
            .phases
            .ids()
            .filter_map(|id| self.states.get(&id))
            .map(|s| PhaseProgress {
                phase: s.phase,
                status: s.status,
                fraction: s.fraction,
                elapsed_secs: s.elapsed_at(now).as_secs_f64(),
            })
            .collect();
        ProgressSnapshot {
            phases,
            overall: self.overall_progress(),
            elapsed_secs: (now - self.run_started_at)
                .to_std()
                .unwrap_or(Duration::ZERO)
                .as_secs_f64(),
            eta_secs: self.eta(now).as_secs_f64(),
            pending_findings: self.findings.clone(),
            taken_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PhaseSpec;

    fn research_phases() -> PhaseSet {
        let weights = [0.1, 0.4, 0.25, 0.15, 0.1];
        PhaseSet::new(
            PhaseId::ALL
                .iter()
                .zip(weights)
                .map(|(&id, w)| {
                    PhaseSpec::new(id, w, Duration::from_secs(900), Duration::from_secs(60))
                        .with_nominal_duration(Duration::from_secs(100))
                })
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn start_twice_is_an_error() {
        let now = Utc::now();
        let mut t = ProgressTracker::new(research_phases(), now);
        t.start_phase(PhaseId::Hypotheses, now).unwrap();
        let err = t.start_phase(PhaseId::Hypotheses, now).unwrap_err();
        assert!(matches!(err, ProgressError::AlreadyStarted { .. }));
    }

    #[test]
    fn update_outside_unit_interval_is_an_error() {
        let now = Utc::now();
        let mut t = ProgressTracker::new(research_phases(), now);
        t.start_phase(PhaseId::Hypotheses, now).unwrap();
        assert!(t.update_progress(PhaseId::Hypotheses, 1.5).is_err());
        assert!(t.update_progress(PhaseId::Hypotheses, -0.1).is_err());
        assert!(t.update_progress(PhaseId::Hypotheses, f64::NAN).is_err());
    }

    #[test]
    fn update_on_idle_phase_is_a_no_op() {
        let now = Utc::now();
        let mut t = ProgressTracker::new(research_phases(), now);
        assert_eq!(
            t.update_progress(PhaseId::Evidence, 0.5).unwrap(),
            ProgressUpdate::NotRunning
        );
        assert_eq!(t.overall_progress(), 0.0);
    }

    #[test]
    fn regressions_are_rejected() {
        let now = Utc::now();
        let mut t = ProgressTracker::new(research_phases(), now);
        t.start_phase(PhaseId::Hypotheses, now).unwrap();
        t.update_progress(PhaseId::Hypotheses, 0.6).unwrap();
        assert_eq!(
            t.update_progress(PhaseId::Hypotheses, 0.3).unwrap(),
            ProgressUpdate::Rejected
        );
        assert_eq!(t.state(PhaseId::Hypotheses).unwrap().fraction, 0.6);
    }

    #[test]
    fn overall_progress_is_weighted() {
        let now = Utc::now();
        let mut t = ProgressTracker::new(research_phases(), now);
        for phase in [PhaseId::Hypotheses, PhaseId::Evidence] {
            t.start_phase(phase, now).unwrap();
            t.complete_phase(phase, now).unwrap();
        }
        t.start_phase(PhaseId::Synthesis, now).unwrap();
        t.update_progress(PhaseId::Synthesis, 0.5).unwrap();
        assert!((t.overall_progress() - 0.625).abs() < 1e-9);
    }

    #[test]
    fn running_phase_eta_extrapolates() {
        let t0 = Utc::now();
        let mut t = ProgressTracker::new(research_phases(), t0);
        t.start_phase(PhaseId::Hypotheses, t0).unwrap();
        t.update_progress(PhaseId::Hypotheses, 0.4).unwrap();
        let eta = t
            .phase_eta(PhaseId::Hypotheses, t0 + chrono::Duration::seconds(120))
            .unwrap();
        assert!((eta.as_secs_f64() - 180.0).abs() < 1e-6);
    }

    #[test]
    fn zero_fraction_uses_nominal_remaining() {
        let t0 = Utc::now();
        let mut t = ProgressTracker::new(research_phases(), t0);
        t.start_phase(PhaseId::Hypotheses, t0).unwrap();
        let later = t0 + chrono::Duration::seconds(30);
        assert_eq!(
            t.phase_eta(PhaseId::Hypotheses, later),
            Some(Duration::from_secs(70))
        );
        let much_later = t0 + chrono::Duration::seconds(500);
        assert_eq!(
            t.phase_eta(PhaseId::Hypotheses, much_later),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn eta_adds_weighted_nominal_of_pending_phases() {
        let t0 = Utc::now();
        let mut t = ProgressTracker::new(research_phases(), t0);
        t.start_phase(PhaseId::Hypotheses, t0).unwrap();
        t.update_progress(PhaseId::Hypotheses, 0.5).unwrap();
        let now = t0 + chrono::Duration::seconds(10);
        let breakdown = t.eta_breakdown(now);
        assert!((breakdown.current.as_secs_f64() - 10.0).abs() < 1e-6);
        // (0.4 + 0.25 + 0.15 + 0.1) * 100 s
        assert!((breakdown.pending.as_secs_f64() - 90.0).abs() < 1e-6);
        assert_eq!(t.eta(now), breakdown.total());
    }

    #[test]
    fn tiny_fraction_saturates_eta() {
        let t0 = Utc::now();
        let mut t = ProgressTracker::new(research_phases(), t0);
        t.start_phase(PhaseId::Hypotheses, t0).unwrap();
        t.update_progress(PhaseId::Hypotheses, 1e-300).unwrap();
        let now = t0 + chrono::Duration::seconds(120);

        assert_eq!(t.phase_eta(PhaseId::Hypotheses, now), Some(Duration::MAX));
        assert_eq!(t.eta(now), Duration::MAX);
        assert!(t.snapshot(now).eta_secs.is_finite());
    }

    #[test]
    fn terminal_phase_rejects_further_transitions() {
        let now = Utc::now();
        let mut t = ProgressTracker::new(research_phases(), now);
        t.start_phase(PhaseId::Hypotheses, now).unwrap();
        t.mark_timed_out(PhaseId::Hypotheses, now).unwrap();
        assert!(t.mark_aborted(PhaseId::Hypotheses, now).is_err());
        assert!(t.complete_phase(PhaseId::Hypotheses, now).is_err());
    }

    #[test]
    fn snapshot_collects_failing_warnings_and_errors() {
        let now = Utc::now();
        let mut t = ProgressTracker::new(research_phases(), now);
        t.note_findings(
            PhaseId::Hypotheses,
            &[
                ValidationResult::fail(Severity::Warning, "low diversity"),
                ValidationResult::pass(Severity::Error, "count ok"),
                ValidationResult::fail(Severity::Info, "fyi"),
            ],
        );
        let snap = t.snapshot(now);
        assert_eq!(snap.pending_findings.len(), 1);
        assert_eq!(snap.phases.len(), 5);
        assert_eq!(snap.overall, 0.0);
    }
}
