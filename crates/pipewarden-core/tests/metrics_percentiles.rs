//! Cost accounting and latency percentiles.

use std::sync::Arc;
use std::time::Duration;

use pipewarden_core::{
    percentile, MetricsCollector, MetricsScope, PhaseId, PricingRate, RateTable,
};

#[test]
fn nearest_rank_percentiles_over_one_to_hundred() {
    let values: Vec<u64> = (1..=100).collect();
    assert_eq!(percentile(&values, 0.50), Some(50));
    assert_eq!(percentile(&values, 0.95), Some(95));
    assert_eq!(percentile(&values, 0.99), Some(99));
    assert_eq!(percentile(&values, 1.0), Some(100));
    assert_eq!(percentile(&[], 0.5), None);
}

#[test]
fn small_samples_use_the_ceiling_rank() {
    let values = [10, 20, 30];
    assert_eq!(percentile(&values, 0.50), Some(20));
    assert_eq!(percentile(&values, 0.95), Some(30));
    assert_eq!(percentile(&[7], 0.99), Some(7));
}

#[test]
fn cost_is_priced_per_tier() {
    let metrics = MetricsCollector::new(RateTable::default());
    metrics.record_call(PhaseId::Evidence, "standard", 1_000, 500, Duration::from_millis(900));
    metrics.record_call(PhaseId::Evidence, "premium", 1_000, 500, Duration::from_millis(1_500));

    let agg = metrics.aggregate(MetricsScope::Phase(PhaseId::Evidence));
    assert_eq!(agg.calls, 2);
    assert_eq!(agg.total_tokens(), 3_000);
    // standard: 1000 * 3e-6 + 500 * 15e-6; premium: 1000 * 15e-6 + 500 * 75e-6
    assert!((agg.cost_usd - (0.0105 + 0.0525)).abs() < 1e-9);

    let latency = agg.latency.unwrap();
    assert_eq!(latency.min_ms, 900);
    assert_eq!(latency.max_ms, 1_500);
}

#[test]
fn unknown_tier_falls_back_to_default_rate() {
    let rates = RateTable::default().with_tier(
        "batch",
        PricingRate {
            input_per_token: 1e-6,
            output_per_token: 2e-6,
        },
    );
    let expected = rates.cost("standard", 100, 100);
    assert_eq!(rates.cost("no-such-tier", 100, 100), expected);
    assert!((rates.cost("batch", 100, 100) - 3e-4).abs() < 1e-12);
}

#[test]
fn summary_breaks_down_by_phase() {
    let metrics = MetricsCollector::new(RateTable::default());
    for ms in [100, 200, 300] {
        metrics.record_call(PhaseId::Hypotheses, "economy", 10, 10, Duration::from_millis(ms));
    }
    metrics.record_call(PhaseId::Narrative, "standard", 10, 10, Duration::from_millis(50));

    let summary = metrics.summary();
    assert_eq!(summary.total.calls, 4);
    assert_eq!(summary.by_phase[&PhaseId::Hypotheses].calls, 3);
    assert_eq!(
        summary.by_phase[&PhaseId::Hypotheses].latency.unwrap().p50_ms,
        200
    );
    assert!(!summary.by_phase.contains_key(&PhaseId::Evidence));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_recording_loses_no_samples() {
    let metrics = Arc::new(MetricsCollector::new(RateTable::default()));
    let tasks = (0..64u64).map(|i| {
        let metrics = metrics.clone();
        tokio::spawn(async move {
            metrics.record_call(PhaseId::Evidence, "standard", i, 1, Duration::from_millis(i));
        })
    });
    for joined in futures::future::join_all(tasks).await {
        joined.unwrap();
    }

    let agg = metrics.aggregate(MetricsScope::All);
    assert_eq!(agg.calls, 64);
    assert_eq!(agg.input_tokens, (0..64).sum::<u64>());
    assert_eq!(agg.latency.unwrap().max_ms, 63);
}

#[test]
fn snapshot_restores_into_a_fresh_collector() {
    let first = MetricsCollector::new(RateTable::default());
    first.record_call(PhaseId::Valuation, "standard", 5, 5, Duration::from_millis(10));

    let second = MetricsCollector::new(RateTable::default());
    second.restore(first.snapshot());
    assert_eq!(second.summary(), first.summary());
}
