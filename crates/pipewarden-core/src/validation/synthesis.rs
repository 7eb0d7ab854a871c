use serde::{Deserialize, Serialize};

use super::{wrong_shape, PhaseValidator, Severity, ValidationResult};
use crate::domain::{PhaseId, PhaseOutput, SynthesisReport};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisThresholds {
    pub min_confidence: f64,
    /// Contradictions tolerated before a warning is raised.
    pub max_contradictions: usize,
}

impl Default for SynthesisThresholds {
    fn default() -> Self {
        Self {
            min_confidence: 0.6,
            max_contradictions: 2,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SynthesisValidator {
    thresholds: SynthesisThresholds,
}

impl SynthesisValidator {
    pub fn new(thresholds: SynthesisThresholds) -> Self {
        Self { thresholds }
    }

    fn check(&self, report: &SynthesisReport) -> Vec<ValidationResult> {
        let t = &self.thresholds;
        let mut findings = Vec::new();
        let confidence = report.confidence;
        let in_range = (0.0..=1.0).contains(&confidence);

        findings.push(
            ValidationResult::outcome(
                "confidence_range",
                in_range,
                Severity::Critical,
                format!("confidence {confidence} must lie in [0, 1]"),
            )
            .with_detail("confidence", confidence),
        );
        if in_range {
            findings.push(ValidationResult::outcome(
                "confidence_threshold",
                confidence >= t.min_confidence,
                Severity::Error,
                format!(
                    "confidence {confidence:.2} (threshold {:.2})",
                    t.min_confidence
                ),
            ));
        }

        let conclusions = report
            .conclusions
            .iter()
            .filter(|c| !c.trim().is_empty())
            .count();
        findings.push(
            ValidationResult::outcome(
                "conclusions",
                conclusions > 0,
                Severity::Critical,
                format!("{conclusions} conclusions"),
            )
            .with_detail("conclusions", conclusions),
        );

        let contradictions = report.contradictions.len();
        findings.push(
            ValidationResult::outcome(
                "contradictions",
                contradictions <= t.max_contradictions,
                Severity::Warning,
                format!("{contradictions} unresolved contradictions"),
            )
            .with_detail("contradictions", contradictions),
        );

        findings
    }
}

impl PhaseValidator for SynthesisValidator {
    fn phase(&self) -> PhaseId {
        PhaseId::Synthesis
    }

    fn name(&self) -> &'static str {
        "synthesis"
    }

    fn validate(&self, output: &PhaseOutput) -> Vec<ValidationResult> {
        match output {
            PhaseOutput::Synthesis(report) => self.check(report),
            other => wrong_shape(self.phase(), other),
        }
    }
}
