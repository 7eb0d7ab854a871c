//! Phase identifiers and the validated, ordered phase set.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::ConfigError;

/// Stages of the research pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseId {
    /// Candidate hypothesis generation.
    Hypotheses,
    /// Evidence research per hypothesis.
    Evidence,
    /// Synthesis of evidence into conclusions.
    Synthesis,
    /// Quantitative valuation.
    Valuation,
    /// Final narrative write-up.
    Narrative,
}

impl PhaseId {
    /// Every phase in execution order.
    pub const ALL: [PhaseId; 5] = [
        PhaseId::Hypotheses,
        PhaseId::Evidence,
        PhaseId::Synthesis,
        PhaseId::Valuation,
        PhaseId::Narrative,
    ];

    /// Stable snake_case name, used in storage keys and logs.
    pub fn name(&self) -> &'static str {
        match self {
            PhaseId::Hypotheses => "hypotheses",
            PhaseId::Evidence => "evidence",
            PhaseId::Synthesis => "synthesis",
            PhaseId::Valuation => "valuation",
            PhaseId::Narrative => "narrative",
        }
    }

    /// Position in the canonical ordering (0-based).
    pub fn ordinal(&self) -> usize {
        match self {
            PhaseId::Hypotheses => 0,
            PhaseId::Evidence => 1,
            PhaseId::Synthesis => 2,
            PhaseId::Valuation => 3,
            PhaseId::Narrative => 4,
        }
    }

    /// Parse a phase from its name.
    pub fn from_name(name: &str) -> Option<Self> {
        PhaseId::ALL.into_iter().find(|p| p.name() == name)
    }
}

impl std::fmt::Display for PhaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Static attributes of one phase.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseSpec {
    pub id: PhaseId,
    /// Relative share of overall progress, in (0, 1].
    pub weight: f64,
    /// Hard limit; exceeding it times the phase out.
    pub max_duration: Duration,
    /// Longest tolerated silence between heartbeats before the phase is STALLED.
    pub heartbeat_threshold: Duration,
    /// Expected duration, used by ETA for phases that have not started.
    pub nominal_duration: Option<Duration>,
}

impl PhaseSpec {
    pub fn new(
        id: PhaseId,
        weight: f64,
        max_duration: Duration,
        heartbeat_threshold: Duration,
    ) -> Self {
        Self {
            id,
            weight,
            max_duration,
            heartbeat_threshold,
            nominal_duration: None,
        }
    }

    pub fn with_nominal_duration(mut self, nominal: Duration) -> Self {
        self.nominal_duration = Some(nominal);
        self
    }

    /// Nominal duration, falling back to the hard limit when unset.
    pub fn nominal_or_max(&self) -> Duration {
        self.nominal_duration.unwrap_or(self.max_duration)
    }
}

/// Ordered, validated set of phases for one run.
///
/// # Invariants
///
/// - non-empty, no duplicates, canonical [`PhaseId`] order
/// - every weight in (0, 1]
/// - weights sum to 1.0 within [`PhaseSet::WEIGHT_EPSILON`]
/// - every duration is non-zero
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseSet {
    phases: Vec<PhaseSpec>,
}

impl PhaseSet {
    pub const WEIGHT_EPSILON: f64 = 1e-6;

    pub fn new(phases: Vec<PhaseSpec>) -> Result<Self, ConfigError> {
        if phases.is_empty() {
            return Err(ConfigError::EmptyPhaseSet);
        }

        for (i, spec) in phases.iter().enumerate() {
            if !(spec.weight > 0.0 && spec.weight <= 1.0) {
                return Err(ConfigError::InvalidWeight {
                    phase: spec.id,
                    weight: spec.weight,
                });
            }
            if spec.max_duration.is_zero() {
                return Err(ConfigError::InvalidDuration {
                    phase: spec.id,
                    field: "max_duration",
                });
            }
            if spec.heartbeat_threshold.is_zero() {
                return Err(ConfigError::InvalidDuration {
                    phase: spec.id,
                    field: "heartbeat_threshold",
                });
            }
            if i > 0 {
                let prev = phases[i - 1].id;
                if prev == spec.id {
                    return Err(ConfigError::DuplicatePhase(spec.id));
                }
                if prev > spec.id {
                    return Err(ConfigError::OutOfOrder {
                        phase: spec.id,
                        after: prev,
                    });
                }
            }
        }

        let sum: f64 = phases.iter().map(|p| p.weight).sum();
        if (sum - 1.0).abs() > Self::WEIGHT_EPSILON {
            return Err(ConfigError::WeightSum { sum });
        }

        Ok(Self { phases })
    }

    pub fn iter(&self) -> impl Iterator<Item = &PhaseSpec> {
        self.phases.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = PhaseId> + '_ {
        self.phases.iter().map(|p| p.id)
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    pub fn get(&self, id: PhaseId) -> Option<&PhaseSpec> {
        self.phases.iter().find(|p| p.id == id)
    }

    pub fn position(&self, id: PhaseId) -> Option<usize> {
        self.phases.iter().position(|p| p.id == id)
    }

    pub fn contains(&self, id: PhaseId) -> bool {
        self.position(id).is_some()
    }

    pub fn weight_sum(&self) -> f64 {
        self.phases.iter().map(|p| p.weight).sum()
    }

    pub fn first(&self) -> PhaseId {
        self.phases[0].id
    }

    pub fn last(&self) -> PhaseId {
        self.phases[self.phases.len() - 1].id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: PhaseId, weight: f64) -> PhaseSpec {
        PhaseSpec::new(id, weight, Duration::from_secs(900), Duration::from_secs(30))
    }

    #[test]
    fn phase_names_round_trip() {
        for phase in PhaseId::ALL {
            assert_eq!(PhaseId::from_name(phase.name()), Some(phase));
        }
        assert_eq!(PhaseId::from_name("bogus"), None);
    }

    #[test]
    fn ordinals_follow_execution_order() {
        let ordinals: Vec<usize> = PhaseId::ALL.iter().map(|p| p.ordinal()).collect();
        assert_eq!(ordinals, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn accepts_weights_summing_to_one() {
        let set = PhaseSet::new(vec![
            spec(PhaseId::Hypotheses, 0.1),
            spec(PhaseId::Evidence, 0.4),
            spec(PhaseId::Synthesis, 0.25),
            spec(PhaseId::Valuation, 0.15),
            spec(PhaseId::Narrative, 0.1),
        ])
        .unwrap();
        assert!((set.weight_sum() - 1.0).abs() <= PhaseSet::WEIGHT_EPSILON);
        assert_eq!(set.first(), PhaseId::Hypotheses);
        assert_eq!(set.last(), PhaseId::Narrative);
    }

    #[test]
    fn rejects_bad_weight_sum() {
        let err = PhaseSet::new(vec![
            spec(PhaseId::Hypotheses, 0.5),
            spec(PhaseId::Evidence, 0.4),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::WeightSum { .. }));
    }

    #[test]
    fn rejects_zero_and_oversized_weights() {
        let err = PhaseSet::new(vec![
            spec(PhaseId::Hypotheses, 0.0),
            spec(PhaseId::Evidence, 1.0),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidWeight { .. }));
    }

    #[test]
    fn rejects_duplicates_and_disorder() {
        let dup = PhaseSet::new(vec![
            spec(PhaseId::Evidence, 0.5),
            spec(PhaseId::Evidence, 0.5),
        ])
        .unwrap_err();
        assert!(matches!(dup, ConfigError::DuplicatePhase(PhaseId::Evidence)));

        let disorder = PhaseSet::new(vec![
            spec(PhaseId::Synthesis, 0.5),
            spec(PhaseId::Evidence, 0.5),
        ])
        .unwrap_err();
        assert!(matches!(disorder, ConfigError::OutOfOrder { .. }));
    }

    #[test]
    fn nominal_falls_back_to_max() {
        let s = spec(PhaseId::Evidence, 1.0);
        assert_eq!(s.nominal_or_max(), Duration::from_secs(900));
        let s = s.with_nominal_duration(Duration::from_secs(300));
        assert_eq!(s.nominal_or_max(), Duration::from_secs(300));
    }
}
