//! Phase outputs handed to the validation gate.
//!
//! The orchestrator never interprets these beyond validation; the shapes
//! only carry the fields the validators inspect.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::phase::PhaseId;

/// Opaque state carried across phases and persisted verbatim in checkpoints.
pub type StateBlobs = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    pub id: String,
    pub statement: String,
    pub category: String,
    /// Self-assessed quality in [0, 1].
    pub quality: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HypothesisSet {
    pub hypotheses: Vec<Hypothesis>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub hypothesis_id: String,
    pub source: String,
    /// Relevance score in [0, 1].
    pub relevance: f64,
    #[serde(default)]
    pub summary: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceBundle {
    /// Hypotheses the evidence phase was asked to cover.
    pub hypothesis_ids: Vec<String>,
    pub items: Vec<EvidenceItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SynthesisReport {
    pub confidence: f64,
    pub conclusions: Vec<String>,
    #[serde(default)]
    pub contradictions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuationOutput {
    pub fair_value: f64,
    pub low: f64,
    pub high: f64,
    /// Market reference used for the upside sanity bound.
    pub current_price: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrativeSection {
    pub heading: String,
    pub body: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NarrativeDraft {
    pub title: String,
    pub sections: Vec<NarrativeSection>,
}

impl NarrativeDraft {
    pub fn word_count(&self) -> usize {
        self.sections
            .iter()
            .map(|s| s.body.split_whitespace().count())
            .sum()
    }
}

/// Result of one phase, tagged by phase shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "output", rename_all = "snake_case")]
pub enum PhaseOutput {
    Hypotheses(HypothesisSet),
    Evidence(EvidenceBundle),
    Synthesis(SynthesisReport),
    Valuation(ValuationOutput),
    Narrative(NarrativeDraft),
}

impl PhaseOutput {
    /// Phase whose shape this output has.
    pub fn phase(&self) -> PhaseId {
        match self {
            PhaseOutput::Hypotheses(_) => PhaseId::Hypotheses,
            PhaseOutput::Evidence(_) => PhaseId::Evidence,
            PhaseOutput::Synthesis(_) => PhaseId::Synthesis,
            PhaseOutput::Valuation(_) => PhaseId::Valuation,
            PhaseOutput::Narrative(_) => PhaseId::Narrative,
        }
    }
}

/// Token usage reported by phase work for one model call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub tier: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// What a phase's work returns to the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseResult {
    pub output: PhaseOutput,
    pub state_blobs: StateBlobs,
    /// Aggregate usage, recorded by [`crate::instrument`] when present.
    pub usage: Option<TokenUsage>,
}

impl PhaseResult {
    pub fn new(output: PhaseOutput) -> Self {
        Self {
            output,
            state_blobs: StateBlobs::new(),
            usage: None,
        }
    }

    pub fn with_blob(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.state_blobs.insert(key.into(), value);
        self
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_reports_its_phase() {
        let out = PhaseOutput::Synthesis(SynthesisReport::default());
        assert_eq!(out.phase(), PhaseId::Synthesis);
    }

    #[test]
    fn output_is_tagged_by_phase() {
        let out = PhaseOutput::Valuation(ValuationOutput {
            fair_value: 42.0,
            low: 30.0,
            high: 55.0,
            current_price: Some(35.0),
        });
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["phase"], "valuation");
        assert_eq!(json["output"]["fair_value"], 42.0);
    }

    #[test]
    fn narrative_word_count_spans_sections() {
        let draft = NarrativeDraft {
            title: "t".into(),
            sections: vec![
                NarrativeSection {
                    heading: "Summary".into(),
                    body: "one two three".into(),
                },
                NarrativeSection {
                    heading: "Risks".into(),
                    body: "  four\nfive ".into(),
                },
            ],
        };
        assert_eq!(draft.word_count(), 5);
    }

    #[test]
    fn result_builder_collects_blobs() {
        let result = PhaseResult::new(PhaseOutput::Hypotheses(HypothesisSet::default()))
            .with_blob("hypotheses", serde_json::json!(["h1"]));
        assert_eq!(result.state_blobs["hypotheses"], serde_json::json!(["h1"]));
        assert!(result.usage.is_none());
    }
}
