//! Validation gate between phases.
//!
//! Each phase has exactly one [`PhaseValidator`]. Validators are pure: they
//! inspect a phase's output and return leveled findings. The gate folds the
//! findings into a [`GateVerdict`] according to the [`ValidationPolicy`].

mod evidence;
mod hypothesis;
mod narrative;
mod synthesis;
mod valuation;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{PhaseId, PhaseOutput};

pub use evidence::{EvidenceThresholds, EvidenceValidator};
pub use hypothesis::{HypothesisThresholds, HypothesisValidator};
pub use narrative::{NarrativeThresholds, NarrativeValidator};
pub use synthesis::{SynthesisThresholds, SynthesisValidator};
pub use valuation::{ValuationThresholds, ValuationValidator};

/// Finding severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => f.write_str("INFO"),
            Severity::Warning => f.write_str("WARNING"),
            Severity::Error => f.write_str("ERROR"),
            Severity::Critical => f.write_str("CRITICAL"),
        }
    }
}

/// Typed value in a finding's detail map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DetailValue {
    Flag(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl From<bool> for DetailValue {
    fn from(v: bool) -> Self {
        DetailValue::Flag(v)
    }
}

impl From<i64> for DetailValue {
    fn from(v: i64) -> Self {
        DetailValue::Integer(v)
    }
}

impl From<usize> for DetailValue {
    fn from(v: usize) -> Self {
        DetailValue::Integer(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for DetailValue {
    fn from(v: f64) -> Self {
        DetailValue::Float(v)
    }
}

impl From<&str> for DetailValue {
    fn from(v: &str) -> Self {
        DetailValue::Text(v.to_string())
    }
}

impl From<String> for DetailValue {
    fn from(v: String) -> Self {
        DetailValue::Text(v)
    }
}

/// One finding produced by a validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub severity: Severity,
    pub passed: bool,
    /// Short name of the check that produced the finding.
    #[serde(default)]
    pub check: String,
    pub message: String,
    #[serde(default)]
    pub details: BTreeMap<String, DetailValue>,
}

impl ValidationResult {
    pub fn pass(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            passed: true,
            check: String::new(),
            message: message.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn fail(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            passed: false,
            ..Self::pass(severity, message)
        }
    }

    /// Pass or fail depending on `ok`.
    pub fn outcome(
        name: &str,
        ok: bool,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        let base = if ok {
            Self::pass(severity, message)
        } else {
            Self::fail(severity, message)
        };
        base.named(name)
    }

    pub fn named(mut self, check: &str) -> Self {
        self.check = check.to_string();
        self
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<DetailValue>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    /// A failing finding at `threshold` or above.
    pub fn blocks_at(&self, threshold: Severity) -> bool {
        !self.passed && self.severity >= threshold
    }
}

/// Judges one phase's output.
pub trait PhaseValidator: Send + Sync {
    fn phase(&self) -> PhaseId;

    fn name(&self) -> &'static str;

    /// Inspect `output`. An output of another phase's shape yields a single
    /// CRITICAL finding.
    fn validate(&self, output: &PhaseOutput) -> Vec<ValidationResult>;
}

pub(crate) fn wrong_shape(expected: PhaseId, output: &PhaseOutput) -> Vec<ValidationResult> {
    vec![ValidationResult::fail(
        Severity::Critical,
        format!(
            "expected {expected} output, got {} output",
            output.phase()
        ),
    )
    .named("output_shape")
    .with_detail("expected", expected.name())
    .with_detail("actual", output.phase().name())]
}

/// Which failing severity aborts a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationPolicy {
    pub fail_on: Severity,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            fail_on: Severity::Critical,
        }
    }
}

impl ValidationPolicy {
    pub fn strict() -> Self {
        Self {
            fail_on: Severity::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    Proceed,
    /// Continue, but the run summary is marked degraded.
    ProceedDegraded,
    Abort,
}

/// Outcome of judging one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateVerdict {
    pub phase: PhaseId,
    pub decision: GateDecision,
    pub findings: Vec<ValidationResult>,
    /// Failing findings at or above the policy threshold.
    pub blocking: Vec<ValidationResult>,
    pub errors: usize,
    pub warnings: usize,
}

impl GateVerdict {
    pub fn passed(&self) -> bool {
        self.decision != GateDecision::Abort
    }

    /// Highest severity among blocking findings.
    pub fn blocking_severity(&self) -> Option<Severity> {
        self.blocking.iter().map(|f| f.severity).max()
    }
}

/// Fold findings into a decision under `policy`.
pub fn evaluate_findings(
    phase: PhaseId,
    findings: Vec<ValidationResult>,
    policy: &ValidationPolicy,
) -> GateVerdict {
    let blocking: Vec<ValidationResult> = findings
        .iter()
        .filter(|f| f.blocks_at(policy.fail_on))
        .cloned()
        .collect();
    let errors = findings
        .iter()
        .filter(|f| !f.passed && f.severity == Severity::Error)
        .count();
    let warnings = findings
        .iter()
        .filter(|f| !f.passed && f.severity == Severity::Warning)
        .count();

    let decision = if !blocking.is_empty() {
        GateDecision::Abort
    } else if errors > 0 {
        GateDecision::ProceedDegraded
    } else {
        GateDecision::Proceed
    };

    GateVerdict {
        phase,
        decision,
        findings,
        blocking,
        errors,
        warnings,
    }
}

/// Per-validator thresholds and the abort policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub policy: ValidationPolicy,
    pub hypotheses: HypothesisThresholds,
    pub evidence: EvidenceThresholds,
    pub synthesis: SynthesisThresholds,
    pub valuation: ValuationThresholds,
    pub narrative: NarrativeThresholds,
}

/// One validator per phase plus the abort policy.
pub struct ValidationGate {
    validators: BTreeMap<PhaseId, Box<dyn PhaseValidator>>,
    policy: ValidationPolicy,
}

impl std::fmt::Debug for ValidationGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationGate")
            .field("validators", &self.validators.keys().collect::<Vec<_>>())
            .field("policy", &self.policy)
            .finish()
    }
}

impl Default for ValidationGate {
    fn default() -> Self {
        Self::standard(&ValidationConfig::default())
    }
}

impl ValidationGate {
    /// Gate with no validators; every phase fails until one is registered.
    pub fn empty(policy: ValidationPolicy) -> Self {
        Self {
            validators: BTreeMap::new(),
            policy,
        }
    }

    /// The five research validators.
    pub fn standard(config: &ValidationConfig) -> Self {
        Self::empty(config.policy)
            .with_validator(HypothesisValidator::new(config.hypotheses.clone()))
            .with_validator(EvidenceValidator::new(config.evidence.clone()))
            .with_validator(SynthesisValidator::new(config.synthesis.clone()))
            .with_validator(ValuationValidator::new(config.valuation.clone()))
            .with_validator(NarrativeValidator::new(config.narrative.clone()))
    }

    /// Register (or replace) the validator for its phase.
    pub fn with_validator(mut self, validator: impl PhaseValidator + 'static) -> Self {
        self.validators
            .insert(validator.phase(), Box::new(validator));
        self
    }

    pub fn with_policy(mut self, policy: ValidationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &ValidationPolicy {
        &self.policy
    }

    pub fn findings(&self, phase: PhaseId, output: &PhaseOutput) -> Vec<ValidationResult> {
        match self.validators.get(&phase) {
            Some(validator) => validator.validate(output),
            None => vec![ValidationResult::fail(
                Severity::Critical,
                format!("no validator registered for phase {phase}"),
            )
            .named("validator_registered")],
        }
    }

    /// Validate `output` as the result of `phase` and decide.
    pub fn judge(&self, phase: PhaseId, output: &PhaseOutput) -> GateVerdict {
        evaluate_findings(phase, self.findings(phase, output), &self.policy)
    }
}
