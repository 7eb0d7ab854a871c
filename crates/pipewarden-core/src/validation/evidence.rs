use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::{wrong_shape, PhaseValidator, Severity, ValidationResult};
use crate::domain::{EvidenceBundle, PhaseId, PhaseOutput};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceThresholds {
    /// Share of hypotheses that must have at least one evidence item.
    pub min_coverage: f64,
    pub min_sources: usize,
    pub min_mean_relevance: f64,
}

impl Default for EvidenceThresholds {
    fn default() -> Self {
        Self {
            min_coverage: 0.8,
            min_sources: 3,
            min_mean_relevance: 0.4,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EvidenceValidator {
    thresholds: EvidenceThresholds,
}

impl EvidenceValidator {
    pub fn new(thresholds: EvidenceThresholds) -> Self {
        Self { thresholds }
    }

    fn check(&self, bundle: &EvidenceBundle) -> Vec<ValidationResult> {
        let t = &self.thresholds;
        let mut findings = Vec::new();

        let expected: BTreeSet<&str> = bundle.hypothesis_ids.iter().map(String::as_str).collect();
        let covered: BTreeSet<&str> = bundle
            .items
            .iter()
            .map(|i| i.hypothesis_id.as_str())
            .filter(|id| expected.contains(id))
            .collect();
        let coverage = if expected.is_empty() {
            0.0
        } else {
            covered.len() as f64 / expected.len() as f64
        };

        let coverage_finding = if coverage == 0.0 {
            ValidationResult::outcome(
                "coverage",
                false,
                Severity::Critical,
                "no hypothesis has supporting evidence",
            )
        } else {
            let uncovered: Vec<&str> = expected.difference(&covered).copied().collect();
            let mut finding = ValidationResult::outcome(
                "coverage",
                coverage >= t.min_coverage,
                Severity::Error,
                format!(
                    "{} of {} hypotheses have evidence (minimum {:.0}%)",
                    covered.len(),
                    expected.len(),
                    t.min_coverage * 100.0
                ),
            );
            if !uncovered.is_empty() {
                finding = finding.with_detail("uncovered", uncovered.join(","));
            }
            finding
        };
        findings.push(coverage_finding.with_detail("coverage", coverage));

        let unknown = bundle
            .items
            .iter()
            .filter(|i| !expected.contains(i.hypothesis_id.as_str()))
            .count();
        if unknown > 0 {
            findings.push(
                ValidationResult::outcome(
                    "unknown_hypothesis",
                    false,
                    Severity::Warning,
                    format!("{unknown} evidence items reference unknown hypotheses"),
                )
                .with_detail("unknown_items", unknown),
            );
        }

        let sources: BTreeSet<&str> = bundle.items.iter().map(|i| i.source.as_str()).collect();
        findings.push(
            ValidationResult::outcome(
                "source_count",
                sources.len() >= t.min_sources,
                Severity::Warning,
                format!(
                    "{} distinct sources (minimum {})",
                    sources.len(),
                    t.min_sources
                ),
            )
            .with_detail("sources", sources.len()),
        );

        if !bundle.items.is_empty() {
            let mean_relevance = bundle.items.iter().map(|i| i.relevance).sum::<f64>()
                / bundle.items.len() as f64;
            findings.push(
                ValidationResult::outcome(
                    "mean_relevance",
                    mean_relevance >= t.min_mean_relevance,
                    Severity::Info,
                    format!("mean evidence relevance {mean_relevance:.2}"),
                )
                .with_detail("mean_relevance", mean_relevance),
            );
        }

        findings
    }
}

impl PhaseValidator for EvidenceValidator {
    fn phase(&self) -> PhaseId {
        PhaseId::Evidence
    }

    fn name(&self) -> &'static str {
        "evidence"
    }

    fn validate(&self, output: &PhaseOutput) -> Vec<ValidationResult> {
        match output {
            PhaseOutput::Evidence(bundle) => self.check(bundle),
            other => wrong_shape(self.phase(), other),
        }
    }
}
