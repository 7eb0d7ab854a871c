use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::{wrong_shape, PhaseValidator, Severity, ValidationResult};
use crate::domain::{HypothesisSet, PhaseId, PhaseOutput};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HypothesisThresholds {
    pub min_count: usize,
    pub max_count: usize,
    pub min_mean_quality: f64,
    pub min_distinct_categories: usize,
}

impl Default for HypothesisThresholds {
    fn default() -> Self {
        Self {
            min_count: 3,
            max_count: 12,
            min_mean_quality: 0.5,
            min_distinct_categories: 2,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HypothesisValidator {
    thresholds: HypothesisThresholds,
}

impl HypothesisValidator {
    pub fn new(thresholds: HypothesisThresholds) -> Self {
        Self { thresholds }
    }

    fn check(&self, set: &HypothesisSet) -> Vec<ValidationResult> {
        let t = &self.thresholds;
        let count = set.hypotheses.len();
        let mut findings = Vec::new();

        let count_finding = if count == 0 {
            ValidationResult::outcome("count", false, Severity::Critical, "no hypotheses generated")
        } else if count < t.min_count {
            ValidationResult::outcome(
                "count",
                false,
                Severity::Error,
                format!("{count} hypotheses, expected at least {}", t.min_count),
            )
        } else if count > t.max_count {
            ValidationResult::outcome(
                "count",
                false,
                Severity::Error,
                format!("{count} hypotheses, expected at most {}", t.max_count),
            )
        } else {
            ValidationResult::outcome(
                "count",
                true,
                Severity::Critical,
                format!("{count} hypotheses"),
            )
        };
        findings.push(
            count_finding
                .with_detail("count", count)
                .with_detail("min", t.min_count)
                .with_detail("max", t.max_count),
        );

        if count == 0 {
            return findings;
        }

        let mean_quality =
            set.hypotheses.iter().map(|h| h.quality).sum::<f64>() / count as f64;
        findings.push(
            ValidationResult::outcome(
                "mean_quality",
                mean_quality >= t.min_mean_quality,
                Severity::Error,
                format!(
                    "mean hypothesis quality {mean_quality:.2} (threshold {:.2})",
                    t.min_mean_quality
                ),
            )
            .with_detail("mean_quality", mean_quality),
        );

        let categories: BTreeSet<String> = set
            .hypotheses
            .iter()
            .map(|h| h.category.trim().to_lowercase())
            .collect();
        findings.push(
            ValidationResult::outcome(
                "category_diversity",
                categories.len() >= t.min_distinct_categories,
                Severity::Warning,
                format!(
                    "{} distinct categories (minimum {})",
                    categories.len(),
                    t.min_distinct_categories
                ),
            )
            .with_detail("distinct_categories", categories.len()),
        );

        let mut seen = BTreeSet::new();
        let duplicates = set
            .hypotheses
            .iter()
            .filter(|h| !seen.insert(normalize(&h.statement)))
            .count();
        findings.push(
            ValidationResult::outcome(
                "duplicates",
                duplicates == 0,
                Severity::Warning,
                format!("{duplicates} duplicate hypothesis statements"),
            )
            .with_detail("duplicates", duplicates),
        );

        findings
    }
}

fn normalize(statement: &str) -> String {
    statement
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

impl PhaseValidator for HypothesisValidator {
    fn phase(&self) -> PhaseId {
        PhaseId::Hypotheses
    }

    fn name(&self) -> &'static str {
        "hypothesis"
    }

    fn validate(&self, output: &PhaseOutput) -> Vec<ValidationResult> {
        match output {
            PhaseOutput::Hypotheses(set) => self.check(set),
            other => wrong_shape(self.phase(), other),
        }
    }
}
