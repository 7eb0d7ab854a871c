use serde::{Deserialize, Serialize};

use super::{wrong_shape, PhaseValidator, Severity, ValidationResult};
use crate::domain::{NarrativeDraft, PhaseId, PhaseOutput};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrativeThresholds {
    pub min_words: usize,
    pub max_words: usize,
    /// Headings that must appear (case-insensitive).
    pub required_sections: Vec<String>,
}

impl Default for NarrativeThresholds {
    fn default() -> Self {
        Self {
            min_words: 300,
            max_words: 5000,
            required_sections: ["Summary", "Thesis", "Risks", "Valuation"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NarrativeValidator {
    thresholds: NarrativeThresholds,
}

impl NarrativeValidator {
    pub fn new(thresholds: NarrativeThresholds) -> Self {
        Self { thresholds }
    }

    fn check(&self, draft: &NarrativeDraft) -> Vec<ValidationResult> {
        let t = &self.thresholds;
        let words = draft.word_count();
        let mut findings = vec![ValidationResult::outcome(
            "non_empty",
            words > 0,
            Severity::Critical,
            "narrative body is present",
        )];
        if words == 0 {
            return findings;
        }

        findings.push(
            ValidationResult::outcome(
                "min_words",
                words >= t.min_words,
                Severity::Error,
                format!("{words} words (minimum {})", t.min_words),
            )
            .with_detail("words", words),
        );

        for required in &t.required_sections {
            let present = draft
                .sections
                .iter()
                .any(|s| s.heading.trim().eq_ignore_ascii_case(required.trim()));
            findings.push(
                ValidationResult::outcome(
                    "required_section",
                    present,
                    Severity::Error,
                    format!("section '{required}'"),
                )
                .with_detail("section", required.as_str()),
            );
        }

        findings.push(
            ValidationResult::outcome(
                "max_words",
                words <= t.max_words,
                Severity::Info,
                format!("{words} words (soft limit {})", t.max_words),
            )
            .with_detail("words", words),
        );

        findings
    }
}

impl PhaseValidator for NarrativeValidator {
    fn phase(&self) -> PhaseId {
        PhaseId::Narrative
    }

    fn name(&self) -> &'static str {
        "narrative"
    }

    fn validate(&self, output: &PhaseOutput) -> Vec<ValidationResult> {
        match output {
            PhaseOutput::Narrative(draft) => self.check(draft),
            other => wrong_shape(self.phase(), other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::NarrativeSection;

    fn section(heading: &str, words: usize) -> NarrativeSection {
        NarrativeSection {
            heading: heading.into(),
            body: vec!["word"; words].join(" "),
        }
    }

    fn draft(sections: Vec<NarrativeSection>) -> PhaseOutput {
        PhaseOutput::Narrative(NarrativeDraft {
            title: "Report".into(),
            sections,
        })
    }

    #[test]
    fn complete_draft_passes() {
        let findings = NarrativeValidator::default().validate(&draft(vec![
            section("Summary", 100),
            section("thesis", 100),
            section("Risks", 100),
            section("Valuation", 100),
        ]));
        assert!(findings.iter().all(|f| f.passed), "{findings:?}");
    }

    #[test]
    fn empty_body_is_critical_only() {
        let findings = NarrativeValidator::default().validate(&draft(vec![section("Summary", 0)]));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Critical);
        assert!(!findings[0].passed);
    }

    #[test]
    fn each_missing_section_is_an_error() {
        let findings =
            NarrativeValidator::default().validate(&draft(vec![section("Summary", 400)]));
        let missing: Vec<_> = findings
            .iter()
            .filter(|f| f.check == "required_section" && !f.passed)
            .collect();
        assert_eq!(missing.len(), 3);
        assert!(missing.iter().all(|f| f.severity == Severity::Error));
    }

    #[test]
    fn overlong_draft_is_informational() {
        let findings = NarrativeValidator::default().validate(&draft(vec![
            section("Summary", 6000),
            section("Thesis", 1),
            section("Risks", 1),
            section("Valuation", 1),
        ]));
        let max = findings.iter().find(|f| f.check == "max_words").unwrap();
        assert!(!max.passed);
        assert_eq!(max.severity, Severity::Info);
    }
}
