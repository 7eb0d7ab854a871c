//! Pipeline configuration loaded from TOML.
//!
//! Every field has a default, so an empty file yields the five-phase
//! research pipeline:
//!
//! ```toml
//! watchdog_interval_ms = 5000
//! cancel_grace_ms = 10000
//! checkpoint_keep_last = 10
//!
//! [validation.policy]
//! fail_on = "critical"
//!
//! [[phases]]
//! phase = "hypotheses"
//! weight = 0.1
//! max_duration_secs = 600
//! heartbeat_threshold_secs = 60
//! nominal_duration_secs = 120
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{ConfigError, PhaseId, PhaseSet, PhaseSpec};
use crate::metrics::RateTable;
use crate::validation::ValidationConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseConfig {
    pub phase: PhaseId,
    pub weight: f64,
    pub max_duration_secs: f64,
    pub heartbeat_threshold_secs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nominal_duration_secs: Option<f64>,
}

impl PhaseConfig {
    fn duration(&self, field: &'static str, secs: f64) -> Result<Duration, ConfigError> {
        Duration::try_from_secs_f64(secs)
            .ok()
            .filter(|d| !d.is_zero())
            .ok_or(ConfigError::InvalidDuration {
                phase: self.phase,
                field,
            })
    }

    fn to_spec(&self) -> Result<PhaseSpec, ConfigError> {
        let mut spec = PhaseSpec::new(
            self.phase,
            self.weight,
            self.duration("max_duration", self.max_duration_secs)?,
            self.duration("heartbeat_threshold", self.heartbeat_threshold_secs)?,
        );
        if let Some(nominal) = self.nominal_duration_secs {
            spec = spec.with_nominal_duration(self.duration("nominal_duration", nominal)?);
        }
        Ok(spec)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub phases: Vec<PhaseConfig>,
    pub watchdog_interval_ms: u64,
    pub cancel_grace_ms: u64,
    /// Checkpoint records kept per run; older ones are pruned.
    pub checkpoint_keep_last: usize,
    pub validation: ValidationConfig,
    pub pricing: RateTable,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        // (phase, weight, max, heartbeat, nominal) in seconds
        let table = [
            (PhaseId::Hypotheses, 0.10, 600.0, 60.0, 120.0),
            (PhaseId::Evidence, 0.40, 1800.0, 120.0, 900.0),
            (PhaseId::Synthesis, 0.25, 900.0, 90.0, 300.0),
            (PhaseId::Valuation, 0.15, 600.0, 60.0, 180.0),
            (PhaseId::Narrative, 0.10, 900.0, 90.0, 240.0),
        ];
        Self {
            phases: table
                .into_iter()
                .map(|(phase, weight, max, heartbeat, nominal)| PhaseConfig {
                    phase,
                    weight,
                    max_duration_secs: max,
                    heartbeat_threshold_secs: heartbeat,
                    nominal_duration_secs: Some(nominal),
                })
                .collect(),
            watchdog_interval_ms: 5_000,
            cancel_grace_ms: 10_000,
            checkpoint_keep_last: 10,
            validation: ValidationConfig::default(),
            pricing: RateTable::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&raw)?;
        tracing::debug!(path = %path.display(), phases = config.phases.len(), "pipeline config loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.watchdog_interval_ms == 0 {
            return Err(ConfigError::InvalidSetting {
                field: "watchdog_interval_ms",
            });
        }
        if self.checkpoint_keep_last == 0 {
            return Err(ConfigError::InvalidSetting {
                field: "checkpoint_keep_last",
            });
        }
        self.phase_set().map(|_| ())
    }

    /// Build the validated phase set.
    pub fn phase_set(&self) -> Result<PhaseSet, ConfigError> {
        let specs = self
            .phases
            .iter()
            .map(PhaseConfig::to_spec)
            .collect::<Result<Vec<_>, _>>()?;
        PhaseSet::new(specs)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::Severity;

    #[test]
    fn default_weights_sum_to_one() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        let set = config.phase_set().unwrap();
        assert!((set.weight_sum() - 1.0).abs() <= PhaseSet::WEIGHT_EPSILON);
        assert_eq!(set.len(), 5);
    }

    #[test]
    fn empty_toml_yields_defaults() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn toml_overrides_phases_and_policy() {
        let config = PipelineConfig::from_toml_str(
            r#"
            watchdog_interval_ms = 250
            checkpoint_keep_last = 3

            [validation.policy]
            fail_on = "error"

            [validation.narrative]
            min_words = 50

            [[phases]]
            phase = "evidence"
            weight = 0.5
            max_duration_secs = 30
            heartbeat_threshold_secs = 5

            [[phases]]
            phase = "narrative"
            weight = 0.5
            max_duration_secs = 0.5
            heartbeat_threshold_secs = 0.1
            nominal_duration_secs = 0.2
            "#,
        )
        .unwrap();
        assert_eq!(config.watchdog_interval(), Duration::from_millis(250));
        assert_eq!(config.validation.policy.fail_on, Severity::Error);
        assert_eq!(config.validation.narrative.min_words, 50);
        assert_eq!(config.validation.narrative.max_words, 5000);
        let set = config.phase_set().unwrap();
        assert_eq!(
            set.get(PhaseId::Narrative).unwrap().max_duration,
            Duration::from_millis(500)
        );
    }

    #[test]
    fn rejects_weights_not_summing_to_one() {
        let err = PipelineConfig::from_toml_str(
            r#"
            [[phases]]
            phase = "evidence"
            weight = 0.7
            max_duration_secs = 30
            heartbeat_threshold_secs = 5
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::WeightSum { .. }));
    }

    #[test]
    fn rejects_negative_durations() {
        let mut config = PipelineConfig::default();
        config.phases[0].heartbeat_threshold_secs = -1.0;
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::InvalidDuration { .. }
        ));
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(matches!(
            PipelineConfig::from_toml_str("phases = 3").unwrap_err(),
            ConfigError::Parse(_)
        ));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        std::fs::write(&path, "cancel_grace_ms = 42\n").unwrap();
        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.cancel_grace(), Duration::from_millis(42));
        assert!(PipelineConfig::load(dir.path().join("missing.toml")).is_err());
    }
}
