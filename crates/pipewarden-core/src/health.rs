//! Heartbeat and timeout tracking for running phases.
//!
//! Phase work calls [`HealthMonitor::heartbeat`] from any task; the watchdog
//! calls [`HealthMonitor::check_timeouts`] on its own interval. The lock is
//! never held across an await point.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{PhaseId, PhaseSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Alive,
    Stalled,
    TimedOut,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Alive => f.write_str("ALIVE"),
            HealthStatus::Stalled => f.write_str("STALLED"),
            HealthStatus::TimedOut => f.write_str("TIMED_OUT"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthRecord {
    pub phase: PhaseId,
    pub started_at: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub heartbeat_threshold: Duration,
    pub hard_timeout: Duration,
    pub status: HealthStatus,
    pub running: bool,
}

impl HealthRecord {
    fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        since(self.started_at, now)
    }

    fn since_heartbeat(&self, now: DateTime<Utc>) -> Duration {
        since(self.last_heartbeat, now)
    }
}

fn since(at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Duration {
    at.and_then(|t| (now - t).to_std().ok())
        .unwrap_or(Duration::ZERO)
}

/// A status change observed by the monitor.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthTransition {
    pub phase: PhaseId,
    pub from: HealthStatus,
    pub to: HealthStatus,
    pub elapsed: Duration,
    pub since_heartbeat: Duration,
    /// Threshold that was crossed (heartbeat threshold or hard timeout).
    pub limit: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseHealth {
    pub phase: PhaseId,
    pub status: HealthStatus,
    pub running: bool,
    pub since_heartbeat_secs: Option<f64>,
    pub elapsed_secs: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthSummary {
    pub phases: Vec<PhaseHealth>,
}

impl HealthSummary {
    pub fn get(&self, phase: PhaseId) -> Option<&PhaseHealth> {
        self.phases.iter().find(|p| p.phase == phase)
    }
}

#[derive(Debug)]
pub struct HealthMonitor {
    records: Mutex<BTreeMap<PhaseId, HealthRecord>>,
}

impl HealthMonitor {
    pub fn new(phases: &PhaseSet) -> Self {
        let records = phases
            .iter()
            .map(|spec| {
                (
                    spec.id,
                    HealthRecord {
                        phase: spec.id,
                        started_at: None,
                        last_heartbeat: None,
                        heartbeat_threshold: spec.heartbeat_threshold,
                        hard_timeout: spec.max_duration,
                        status: HealthStatus::Alive,
                        running: false,
                    },
                )
            })
            .collect();
        Self {
            records: Mutex::new(records),
        }
    }

    fn records(&self) -> MutexGuard<'_, BTreeMap<PhaseId, HealthRecord>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Begin watching `phase`; the start counts as the first heartbeat.
    pub fn start(&self, phase: PhaseId, now: DateTime<Utc>) {
        if let Some(rec) = self.records().get_mut(&phase) {
            rec.started_at = Some(now);
            rec.last_heartbeat = Some(now);
            rec.status = HealthStatus::Alive;
            rec.running = true;
        }
    }

    /// Stop watching `phase`. Its last status is kept for the summary.
    pub fn stop(&self, phase: PhaseId) {
        if let Some(rec) = self.records().get_mut(&phase) {
            rec.running = false;
        }
    }

    /// Record a liveness signal.
    ///
    /// Ignored for phases that are not running or already timed out. A
    /// heartbeat on a STALLED phase returns it to ALIVE and reports that
    /// transition. Out-of-order timestamps never move the heartbeat back.
    pub fn heartbeat(&self, phase: PhaseId, at: DateTime<Utc>) -> Option<HealthTransition> {
        let mut records = self.records();
        let rec = records.get_mut(&phase)?;
        if !rec.running || rec.status == HealthStatus::TimedOut {
            return None;
        }
        if rec.last_heartbeat.map_or(true, |last| at > last) {
            rec.last_heartbeat = Some(at);
        }
        if rec.status == HealthStatus::Stalled {
            rec.status = HealthStatus::Alive;
            return Some(HealthTransition {
                phase,
                from: HealthStatus::Stalled,
                to: HealthStatus::Alive,
                elapsed: rec.elapsed(at),
                since_heartbeat: Duration::ZERO,
                limit: rec.heartbeat_threshold,
            });
        }
        None
    }

    /// Evaluate every running phase against its limits.
    ///
    /// The hard timeout is checked first and wins regardless of heartbeat
    /// freshness. Only status changes are returned.
    pub fn check_timeouts(&self, now: DateTime<Utc>) -> Vec<HealthTransition> {
        let mut transitions = Vec::new();
        for rec in self.records().values_mut() {
            if !rec.running || rec.status == HealthStatus::TimedOut {
                continue;
            }
            let elapsed = rec.elapsed(now);
            let since_heartbeat = rec.since_heartbeat(now);

            let (next, limit) = if elapsed > rec.hard_timeout {
                (HealthStatus::TimedOut, rec.hard_timeout)
            } else if since_heartbeat > rec.heartbeat_threshold {
                (HealthStatus::Stalled, rec.heartbeat_threshold)
            } else {
                continue;
            };

            if next != rec.status {
                transitions.push(HealthTransition {
                    phase: rec.phase,
                    from: rec.status,
                    to: next,
                    elapsed,
                    since_heartbeat,
                    limit,
                });
                rec.status = next;
            }
        }
        transitions
    }

    pub fn status(&self, phase: PhaseId) -> Option<HealthStatus> {
        self.records().get(&phase).map(|r| r.status)
    }

    pub fn record(&self, phase: PhaseId) -> Option<HealthRecord> {
        self.records().get(&phase).cloned()
    }

    pub fn summary(&self, now: DateTime<Utc>) -> HealthSummary {
        let phases = self
            .records()
            .values()
            .map(|rec| PhaseHealth {
                phase: rec.phase,
                status: rec.status,
                running: rec.running,
                since_heartbeat_secs: rec
                    .last_heartbeat
                    .map(|_| rec.since_heartbeat(now).as_secs_f64()),
                elapsed_secs: rec.started_at.map(|_| rec.elapsed(now).as_secs_f64()),
            })
            .collect();
        HealthSummary { phases }
    }
}
