use serde::{Deserialize, Serialize};

use super::{wrong_shape, PhaseValidator, Severity, ValidationResult};
use crate::domain::{PhaseId, PhaseOutput, ValuationOutput};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValuationThresholds {
    /// Largest plausible fair-value to price ratio, in either direction.
    pub max_upside_ratio: f64,
}

impl Default for ValuationThresholds {
    fn default() -> Self {
        Self {
            max_upside_ratio: 3.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValuationValidator {
    thresholds: ValuationThresholds,
}

impl ValuationValidator {
    pub fn new(thresholds: ValuationThresholds) -> Self {
        Self { thresholds }
    }

    fn check(&self, v: &ValuationOutput) -> Vec<ValidationResult> {
        let mut findings = Vec::new();

        let mut values = vec![("fair_value", v.fair_value), ("low", v.low), ("high", v.high)];
        if let Some(price) = v.current_price {
            values.push(("current_price", price));
        }
        let non_finite: Vec<&str> = values
            .iter()
            .filter(|(_, x)| !x.is_finite())
            .map(|(name, _)| *name)
            .collect();
        if !non_finite.is_empty() {
            findings.push(
                ValidationResult::outcome(
                    "finite",
                    false,
                    Severity::Critical,
                    format!("non-finite valuation outputs: {}", non_finite.join(", ")),
                )
                .with_detail("fields", non_finite.join(",")),
            );
            return findings;
        }
        findings.push(ValidationResult::outcome(
            "finite",
            true,
            Severity::Critical,
            "all valuation outputs are finite",
        ));

        findings.push(
            ValidationResult::outcome(
                "positive_fair_value",
                v.fair_value > 0.0,
                Severity::Critical,
                format!("fair value {:.2}", v.fair_value),
            )
            .with_detail("fair_value", v.fair_value),
        );

        findings.push(
            ValidationResult::outcome(
                "range_order",
                v.low <= v.fair_value && v.fair_value <= v.high,
                Severity::Error,
                format!(
                    "range low {:.2} <= base {:.2} <= high {:.2}",
                    v.low, v.fair_value, v.high
                ),
            )
            .with_detail("low", v.low)
            .with_detail("high", v.high),
        );

        if let Some(price) = v.current_price.filter(|p| *p > 0.0) {
            let ratio = v.fair_value / price;
            let bound = self.thresholds.max_upside_ratio;
            findings.push(
                ValidationResult::outcome(
                    "upside_bound",
                    ratio <= bound && ratio >= 1.0 / bound,
                    Severity::Warning,
                    format!("fair value is {ratio:.2}x the current price (bound {bound:.1}x)"),
                )
                .with_detail("ratio", ratio),
            );
        }

        findings
    }
}

impl PhaseValidator for ValuationValidator {
    fn phase(&self) -> PhaseId {
        PhaseId::Valuation
    }

    fn name(&self) -> &'static str {
        "valuation"
    }

    fn validate(&self, output: &PhaseOutput) -> Vec<ValidationResult> {
        match output {
            PhaseOutput::Valuation(v) => self.check(v),
            other => wrong_shape(self.phase(), other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valuation(fair_value: f64, low: f64, high: f64, price: Option<f64>) -> PhaseOutput {
        PhaseOutput::Valuation(ValuationOutput {
            fair_value,
            low,
            high,
            current_price: price,
        })
    }

    fn failing(findings: &[ValidationResult]) -> Vec<(&str, Severity)> {
        findings
            .iter()
            .filter(|f| !f.passed)
            .map(|f| (f.check.as_str(), f.severity))
            .collect()
    }

    #[test]
    fn sane_valuation_passes() {
        let findings = ValuationValidator::default().validate(&valuation(50.0, 40.0, 60.0, Some(45.0)));
        assert!(failing(&findings).is_empty());
    }

    #[test]
    fn infinite_output_is_critical() {
        let findings =
            ValuationValidator::default().validate(&valuation(f64::INFINITY, 1.0, 2.0, None));
        assert_eq!(failing(&findings), vec![("finite", Severity::Critical)]);
    }

    #[test]
    fn negative_fair_value_is_critical() {
        let findings = ValuationValidator::default().validate(&valuation(-5.0, -10.0, 1.0, None));
        assert_eq!(
            failing(&findings),
            vec![("positive_fair_value", Severity::Critical)]
        );
    }

    #[test]
    fn inverted_range_and_wild_upside() {
        let findings =
            ValuationValidator::default().validate(&valuation(100.0, 120.0, 90.0, Some(10.0)));
        assert_eq!(
            failing(&findings),
            vec![
                ("range_order", Severity::Error),
                ("upside_bound", Severity::Warning)
            ]
        );
    }
}
