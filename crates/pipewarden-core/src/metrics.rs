//! Per-call cost and latency metrics for a pipeline run.
//!
//! Samples are appended silently at the call site. Aggregates are derived on
//! demand. Call [`MetricsCollector::flush`] at a phase boundary to emit the
//! phase aggregate as a single `tracing::info!` event.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::PhaseId;

/// Per-token prices for one pricing tier, in USD.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricingRate {
    pub input_per_token: f64,
    pub output_per_token: f64,
}

impl PricingRate {
    pub const fn new(input_per_token: f64, output_per_token: f64) -> Self {
        Self {
            input_per_token,
            output_per_token,
        }
    }

    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        input_tokens as f64 * self.input_per_token + output_tokens as f64 * self.output_per_token
    }
}

/// Pricing rates keyed by tier name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateTable {
    /// Tier used for unknown tier names.
    pub default_tier: String,
    pub tiers: BTreeMap<String, PricingRate>,
}

impl Default for RateTable {
    fn default() -> Self {
        let mut tiers = BTreeMap::new();
        tiers.insert("economy".to_string(), PricingRate::new(0.8e-6, 4e-6));
        tiers.insert("standard".to_string(), PricingRate::new(3e-6, 15e-6));
        tiers.insert("premium".to_string(), PricingRate::new(15e-6, 75e-6));
        Self {
            default_tier: "standard".to_string(),
            tiers,
        }
    }
}

impl RateTable {
    /// Rate for `tier`, falling back to the default tier, then to zero.
    pub fn rate_for(&self, tier: &str) -> PricingRate {
        self.tiers
            .get(tier)
            .or_else(|| self.tiers.get(&self.default_tier))
            .copied()
            .unwrap_or(PricingRate::new(0.0, 0.0))
    }

    pub fn cost(&self, tier: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        self.rate_for(tier).cost(input_tokens, output_tokens)
    }

    pub fn with_tier(mut self, tier: impl Into<String>, rate: PricingRate) -> Self {
        self.tiers.insert(tier.into(), rate);
        self
    }
}

/// One recorded model call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub phase: PhaseId,
    pub tier: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Cost at record time, in USD.
    pub cost_usd: f64,
    pub latency_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

/// What to aggregate over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricsScope {
    All,
    Phase(PhaseId),
}

/// Latency distribution, nearest-rank percentiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub min_ms: u64,
    pub max_ms: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsAggregate {
    pub calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    /// `None` when there are no samples.
    pub latency: Option<LatencyStats>,
}

impl MetricsAggregate {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Run-level metrics view.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub total: MetricsAggregate,
    pub by_phase: BTreeMap<PhaseId, MetricsAggregate>,
}

/// Raw samples, stored inside checkpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub samples: Vec<MetricSample>,
}

/// Nearest-rank percentile over ascending `sorted` values.
///
/// Index is `ceil(p * n) - 1`, clamped to the slice. Returns `None` when empty.
pub fn percentile(sorted: &[u64], p: f64) -> Option<u64> {
    if sorted.is_empty() {
        return None;
    }
    let n = sorted.len();
    // The epsilon keeps p * n from landing just above an integer.
    let rank = ((p * n as f64) - 1e-9).ceil().max(1.0) as usize;
    Some(sorted[rank.min(n) - 1])
}

/// Thread-safe sample store for one run.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    rates: RateTable,
    samples: Mutex<Vec<MetricSample>>,
}

impl MetricsCollector {
    pub fn new(rates: RateTable) -> Self {
        Self {
            rates,
            samples: Mutex::new(Vec::new()),
        }
    }

    fn samples(&self) -> MutexGuard<'_, Vec<MetricSample>> {
        self.samples
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn rates(&self) -> &RateTable {
        &self.rates
    }

    /// Append one sample, preserving arrival order.
    pub fn record(&self, sample: MetricSample) {
        tracing::trace!(
            metric = "call_recorded",
            phase = %sample.phase,
            latency_ms = sample.latency_ms,
        );
        self.samples().push(sample);
    }

    /// Record a call, pricing it from the rate table.
    pub fn record_call(
        &self,
        phase: PhaseId,
        tier: &str,
        input_tokens: u64,
        output_tokens: u64,
        latency: Duration,
    ) {
        let cost_usd = self.rates.cost(tier, input_tokens, output_tokens);
        self.record(MetricSample {
            phase,
            tier: tier.to_string(),
            input_tokens,
            output_tokens,
            cost_usd,
            latency_ms: latency.as_millis() as u64,
            recorded_at: Utc::now(),
        });
    }

    pub fn len(&self) -> usize {
        self.samples().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Totals and latency percentiles over `scope`.
    ///
    /// Cost is recomputed from the collector's rate table.
    pub fn aggregate(&self, scope: MetricsScope) -> MetricsAggregate {
        let samples = self.samples();
        let selected = samples.iter().filter(|s| match scope {
            MetricsScope::All => true,
            MetricsScope::Phase(phase) => s.phase == phase,
        });
        aggregate_samples(&self.rates, selected)
    }

    /// Global totals plus a per-phase breakdown.
    pub fn summary(&self) -> MetricsSummary {
        let samples = self.samples();
        let mut grouped: BTreeMap<PhaseId, Vec<&MetricSample>> = BTreeMap::new();
        for sample in samples.iter() {
            grouped.entry(sample.phase).or_default().push(sample);
        }
        MetricsSummary {
            total: aggregate_samples(&self.rates, samples.iter()),
            by_phase: grouped
                .into_iter()
                .map(|(phase, group)| (phase, aggregate_samples(&self.rates, group)))
                .collect(),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            samples: self.samples().clone(),
        }
    }

    /// Replace all samples with those from a checkpoint.
    pub fn restore(&self, snapshot: MetricsSnapshot) {
        *self.samples() = snapshot.samples;
    }

    /// Emit the phase aggregate as a single `info!` event.
    pub fn flush(&self, phase: PhaseId) {
        let agg = self.aggregate(MetricsScope::Phase(phase));
        let latency = agg.latency.unwrap_or(LatencyStats {
            min_ms: 0,
            max_ms: 0,
            p50_ms: 0,
            p95_ms: 0,
            p99_ms: 0,
        });
        tracing::info!(
            metric = "flush",
            phase = %phase,
            calls = agg.calls,
            input_tokens = agg.input_tokens,
            output_tokens = agg.output_tokens,
            cost_usd = agg.cost_usd,
            p50_ms = latency.p50_ms,
            p95_ms = latency.p95_ms,
            p99_ms = latency.p99_ms,
        );
    }
}

fn aggregate_samples<'a>(
    rates: &RateTable,
    samples: impl IntoIterator<Item = &'a MetricSample>,
) -> MetricsAggregate {
    let mut agg = MetricsAggregate::default();
    let mut latencies = Vec::new();
    for s in samples {
        agg.calls += 1;
        agg.input_tokens += s.input_tokens;
        agg.output_tokens += s.output_tokens;
        agg.cost_usd += rates.cost(&s.tier, s.input_tokens, s.output_tokens);
        latencies.push(s.latency_ms);
    }
    latencies.sort_unstable();
    agg.latency = match (latencies.first(), latencies.last()) {
        (Some(&min_ms), Some(&max_ms)) => Some(LatencyStats {
            min_ms,
            max_ms,
            p50_ms: percentile(&latencies, 0.50).unwrap_or(min_ms),
            p95_ms: percentile(&latencies, 0.95).unwrap_or(max_ms),
            p99_ms: percentile(&latencies, 0.99).unwrap_or(max_ms),
        }),
        _ => None,
    };
    agg
}
