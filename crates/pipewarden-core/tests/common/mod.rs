//! Shared fixtures: outputs that pass every standard validator and a fast
//! phase set for exercising the executor in milliseconds.

#![allow(dead_code)]

use std::time::Duration;

use pipewarden_core::{
    EvidenceBundle, EvidenceItem, Hypothesis, HypothesisSet, NarrativeDraft, NarrativeSection,
    PhaseId, PhaseOutput, PhaseResult, PhaseSet, PhaseSpec, SynthesisReport, TokenUsage,
    ValuationOutput,
};

pub const WEIGHTS: [(PhaseId, f64); 5] = [
    (PhaseId::Hypotheses, 0.10),
    (PhaseId::Evidence, 0.40),
    (PhaseId::Synthesis, 0.25),
    (PhaseId::Valuation, 0.15),
    (PhaseId::Narrative, 0.10),
];

/// All five phases with generous limits for tests that should not time out.
pub fn fast_phases() -> PhaseSet {
    phases_with_limits(Duration::from_secs(10), Duration::from_secs(5))
}

pub fn phases_with_limits(max_duration: Duration, heartbeat: Duration) -> PhaseSet {
    PhaseSet::new(
        WEIGHTS
            .iter()
            .map(|(id, w)| PhaseSpec::new(*id, *w, max_duration, heartbeat))
            .collect(),
    )
    .expect("valid phase set")
}

pub fn hypotheses() -> HypothesisSet {
    let hypothesis = |id: &str, category: &str| Hypothesis {
        id: id.to_string(),
        statement: format!("statement for {id}"),
        category: category.to_string(),
        quality: 0.8,
    };
    HypothesisSet {
        hypotheses: vec![
            hypothesis("h1", "growth"),
            hypothesis("h2", "margin"),
            hypothesis("h3", "competition"),
        ],
    }
}

pub fn evidence() -> EvidenceBundle {
    let item = |h: &str, source: &str| EvidenceItem {
        hypothesis_id: h.to_string(),
        source: source.to_string(),
        relevance: 0.7,
        summary: String::new(),
    };
    EvidenceBundle {
        hypothesis_ids: vec!["h1".into(), "h2".into(), "h3".into()],
        items: vec![
            item("h1", "10-K"),
            item("h2", "earnings call"),
            item("h3", "industry report"),
        ],
    }
}

pub fn synthesis() -> SynthesisReport {
    SynthesisReport {
        confidence: 0.8,
        conclusions: vec!["margins expand".into(), "share gains persist".into()],
        contradictions: vec![],
    }
}

pub fn valuation() -> ValuationOutput {
    ValuationOutput {
        fair_value: 120.0,
        low: 95.0,
        high: 140.0,
        current_price: Some(100.0),
    }
}

pub fn narrative() -> NarrativeDraft {
    let body = "word ".repeat(100);
    NarrativeDraft {
        title: "Initiating coverage".into(),
        sections: ["Summary", "Thesis", "Risks", "Valuation"]
            .iter()
            .map(|heading| NarrativeSection {
                heading: heading.to_string(),
                body: body.clone(),
            })
            .collect(),
    }
}

pub fn healthy_output(phase: PhaseId) -> PhaseOutput {
    match phase {
        PhaseId::Hypotheses => PhaseOutput::Hypotheses(hypotheses()),
        PhaseId::Evidence => PhaseOutput::Evidence(evidence()),
        PhaseId::Synthesis => PhaseOutput::Synthesis(synthesis()),
        PhaseId::Valuation => PhaseOutput::Valuation(valuation()),
        PhaseId::Narrative => PhaseOutput::Narrative(narrative()),
    }
}

pub fn healthy_result(phase: PhaseId) -> PhaseResult {
    PhaseResult::new(healthy_output(phase))
        .with_blob(phase.name(), serde_json::json!({ "done": true }))
        .with_usage(TokenUsage {
            tier: "standard".into(),
            input_tokens: 1_000,
            output_tokens: 500,
        })
}
