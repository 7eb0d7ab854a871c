//! Resumable checkpoints on top of a [`DurableStore`].
//!
//! Layout under the run namespace:
//!
//! ```text
//! <run_id>/checkpoints/<iteration:06>-<ordinal:02>-<phase>.json   envelope
//! <run_id>/latest.json                                            pointer
//! ```
//!
//! A record is written first; the pointer is replaced only after the record
//! is durable, so the pointer always names a complete record. Each envelope
//! carries the SHA-256 of its body; any mismatch is reported as corruption.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use pipewarden_state::{ContentDigest, DurableStore, RunId, StoreKey};

use crate::domain::{CheckpointError, PhaseId, StateBlobs};
use crate::metrics::MetricsSnapshot;
use crate::obs;

/// Envelope and pointer format written by this version.
pub const FORMAT_VERSION: u32 = 1;

pub const DEFAULT_KEEP_LAST: usize = 10;

const LATEST: &str = "latest.json";
const CHECKPOINTS: &str = "checkpoints";

/// Immutable snapshot of a run after a validated phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: RunId,
    pub phase: PhaseId,
    /// Attempt number: 0 for a fresh run, incremented on every resume.
    pub iteration: u32,
    pub timestamp: DateTime<Utc>,
    /// Passed through verbatim.
    pub state_blobs: StateBlobs,
    pub metrics_snapshot: MetricsSnapshot,
}

impl Checkpoint {
    pub fn new(
        run_id: RunId,
        phase: PhaseId,
        iteration: u32,
        state_blobs: StateBlobs,
        metrics_snapshot: MetricsSnapshot,
    ) -> Self {
        Self {
            run_id,
            phase,
            iteration,
            timestamp: Utc::now(),
            state_blobs,
            metrics_snapshot,
        }
    }
}

/// Where a checkpoint lives; carried by run errors as the resume point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRef {
    pub key: String,
    pub phase: PhaseId,
    pub iteration: u32,
}

impl std::fmt::Display for CheckpointRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} #{})", self.key, self.phase, self.iteration)
    }
}

/// Contents of `<run_id>/latest.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointPointer {
    pub format_version: u32,
    pub key: String,
    pub phase: PhaseId,
    pub iteration: u32,
    pub digest: String,
    pub updated_at: DateTime<Utc>,
}

impl CheckpointPointer {
    pub fn to_ref(&self) -> CheckpointRef {
        CheckpointRef {
            key: self.key.clone(),
            phase: self.phase,
            iteration: self.iteration,
        }
    }
}

#[derive(Serialize)]
struct EnvelopeOut<'a> {
    format_version: u32,
    digest: &'a str,
    body: &'a RawValue,
}

#[derive(Deserialize)]
struct EnvelopeIn {
    format_version: u32,
    digest: String,
    body: Box<RawValue>,
}

#[derive(Clone)]
pub struct CheckpointManager {
    store: Arc<dyn DurableStore>,
    run_id: RunId,
    root: StoreKey,
    keep_last: usize,
}

impl std::fmt::Debug for CheckpointManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointManager")
            .field("run_id", &self.run_id)
            .field("keep_last", &self.keep_last)
            .finish()
    }
}

fn corrupt(key: &StoreKey, reason: impl Into<String>) -> CheckpointError {
    CheckpointError::Corrupt {
        key: key.to_string(),
        reason: reason.into(),
    }
}

impl CheckpointManager {
    /// Manager for `run_id`; the id must be a valid store key segment.
    pub fn new(store: Arc<dyn DurableStore>, run_id: RunId) -> Result<Self, CheckpointError> {
        let root = StoreKey::new(run_id.0.clone()).map_err(CheckpointError::InvalidKey)?;
        if root.segments().count() != 1 {
            return Err(CheckpointError::InvalidKey(
                pipewarden_state::StorageError::InvalidKey {
                    key: run_id.0.clone(),
                    reason: "run id must be a single segment".to_string(),
                },
            ));
        }
        Ok(Self {
            store,
            run_id,
            root,
            keep_last: DEFAULT_KEEP_LAST,
        })
    }

    /// Records to retain; values below 1 are treated as 1.
    pub fn with_keep_last(mut self, keep_last: usize) -> Self {
        self.keep_last = keep_last.max(1);
        self
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    fn join(&self, suffix: &str) -> Result<StoreKey, CheckpointError> {
        self.root.join(suffix).map_err(CheckpointError::InvalidKey)
    }

    fn pointer_key(&self) -> Result<StoreKey, CheckpointError> {
        self.join(LATEST)
    }

    fn checkpoints_prefix(&self) -> Result<StoreKey, CheckpointError> {
        self.join(CHECKPOINTS)
    }

    /// Key of the record for `phase` in attempt `iteration`.
    pub fn record_key(&self, phase: PhaseId, iteration: u32) -> Result<StoreKey, CheckpointError> {
        self.join(&format!(
            "{CHECKPOINTS}/{iteration:06}-{:02}-{}.json",
            phase.ordinal(),
            phase.name()
        ))
    }

    /// Persist `checkpoint`, then point `latest` at it.
    ///
    /// If either write fails the previous pointer stays in place. Pruning
    /// afterwards is best effort.
    pub async fn save(&self, checkpoint: &Checkpoint) -> Result<CheckpointRef, CheckpointError> {
        if checkpoint.run_id != self.run_id {
            return Err(CheckpointError::RunMismatch {
                expected: self.run_id.to_string(),
                found: checkpoint.run_id.to_string(),
            });
        }

        let key = self.record_key(checkpoint.phase, checkpoint.iteration)?;
        let body = RawValue::from_string(serde_json::to_string(checkpoint)?)?;
        let digest = ContentDigest::from_bytes(body.get().as_bytes());
        let envelope = serde_json::to_vec(&EnvelopeOut {
            format_version: FORMAT_VERSION,
            digest: digest.as_str(),
            body: &body,
        })?;

        self.store
            .put_atomic(&key, &envelope)
            .await
            .map_err(|source| CheckpointError::Write {
                key: key.to_string(),
                source,
            })?;

        let pointer = CheckpointPointer {
            format_version: FORMAT_VERSION,
            key: key.to_string(),
            phase: checkpoint.phase,
            iteration: checkpoint.iteration,
            digest: digest.to_string(),
            updated_at: Utc::now(),
        };
        let pointer_key = self.pointer_key()?;
        self.store
            .put_atomic(&pointer_key, &serde_json::to_vec(&pointer)?)
            .await
            .map_err(|source| CheckpointError::Write {
                key: pointer_key.to_string(),
                source,
            })?;

        obs::emit_checkpoint_saved(
            &self.run_id.0,
            checkpoint.phase,
            checkpoint.iteration,
            digest.short(),
        );

        if let Err(e) = self.prune().await {
            tracing::warn!(run_id = %self.run_id, error = %e, "checkpoint prune failed");
        }

        Ok(pointer.to_ref())
    }

    async fn read_pointer(&self) -> Result<Option<CheckpointPointer>, CheckpointError> {
        let key = self.pointer_key()?;
        let Some(bytes) = self
            .store
            .get(&key)
            .await
            .map_err(|source| CheckpointError::Read {
                key: key.to_string(),
                source,
            })?
        else {
            return Ok(None);
        };
        let pointer: CheckpointPointer = serde_json::from_slice(&bytes)
            .map_err(|e| corrupt(&key, format!("undecodable pointer: {e}")))?;
        if pointer.format_version != FORMAT_VERSION {
            return Err(corrupt(
                &key,
                format!("unsupported pointer format version {}", pointer.format_version),
            ));
        }
        Ok(Some(pointer))
    }

    /// Reference to the latest checkpoint without loading it.
    pub async fn latest_ref(&self) -> Result<Option<CheckpointRef>, CheckpointError> {
        Ok(self.read_pointer().await?.map(|p| p.to_ref()))
    }

    /// The checkpoint `latest` points at, or `None` for a fresh run.
    pub async fn load_latest(&self) -> Result<Option<Checkpoint>, CheckpointError> {
        let Some(pointer) = self.read_pointer().await? else {
            return Ok(None);
        };
        let pointer_key = self.pointer_key()?;
        let key = StoreKey::new(pointer.key.clone())
            .map_err(|e| corrupt(&pointer_key, format!("pointer names an invalid key: {e}")))?;
        let (checkpoint, digest) = self.read_record(&key).await?.ok_or_else(|| {
            corrupt(
                &pointer_key,
                format!("pointer references missing record {key}"),
            )
        })?;
        if digest.as_str() != pointer.digest.to_ascii_lowercase() {
            return Err(corrupt(&key, "record digest does not match the latest pointer"));
        }
        if checkpoint.phase != pointer.phase || checkpoint.iteration != pointer.iteration {
            return Err(corrupt(&key, "record does not match the latest pointer"));
        }
        Ok(Some(checkpoint))
    }

    /// Load one record by key.
    pub async fn load(&self, key: &StoreKey) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self.read_record(key).await?.map(|(checkpoint, _)| checkpoint))
    }

    async fn read_record(
        &self,
        key: &StoreKey,
    ) -> Result<Option<(Checkpoint, ContentDigest)>, CheckpointError> {
        let Some(bytes) = self
            .store
            .get(key)
            .await
            .map_err(|source| CheckpointError::Read {
                key: key.to_string(),
                source,
            })?
        else {
            return Ok(None);
        };

        let envelope: EnvelopeIn = serde_json::from_slice(&bytes)
            .map_err(|e| corrupt(key, format!("undecodable envelope: {e}")))?;
        if envelope.format_version != FORMAT_VERSION {
            return Err(corrupt(
                key,
                format!("unsupported format version {}", envelope.format_version),
            ));
        }
        let expected = ContentDigest::try_from(envelope.digest)
            .map_err(|e| corrupt(key, e.to_string()))?;
        let actual = ContentDigest::from_bytes(envelope.body.get().as_bytes());
        if actual != expected {
            return Err(corrupt(
                key,
                format!("digest mismatch: expected {}, got {}", expected.short(), actual.short()),
            ));
        }
        let checkpoint: Checkpoint = serde_json::from_str(envelope.body.get())
            .map_err(|e| corrupt(key, format!("undecodable body: {e}")))?;
        if checkpoint.run_id != self.run_id {
            return Err(CheckpointError::RunMismatch {
                expected: self.run_id.to_string(),
                found: checkpoint.run_id.to_string(),
            });
        }
        Ok(Some((checkpoint, actual)))
    }

    /// Record keys for this run, oldest first.
    pub async fn list(&self) -> Result<Vec<StoreKey>, CheckpointError> {
        let prefix = self.checkpoints_prefix()?;
        self.store
            .list(&prefix)
            .await
            .map_err(|source| CheckpointError::Read {
                key: prefix.to_string(),
                source,
            })
    }

    /// Delete all but the newest `keep_last` records. The record `latest`
    /// points at is always kept. Returns the number of deleted records.
    pub async fn prune(&self) -> Result<usize, CheckpointError> {
        let keys = self.list().await?;
        if keys.len() <= self.keep_last {
            return Ok(0);
        }
        let protected = self.read_pointer().await?.map(|p| p.key);
        let cutoff = keys.len() - self.keep_last;
        let mut deleted = 0;
        for key in keys.into_iter().take(cutoff) {
            if protected.as_deref() == Some(key.as_str()) {
                continue;
            }
            self.store
                .delete(&key)
                .await
                .map_err(|source| CheckpointError::Write {
                    key: key.to_string(),
                    source,
                })?;
            deleted += 1;
        }
        if deleted > 0 {
            tracing::debug!(run_id = %self.run_id, deleted, "pruned old checkpoints");
        }
        Ok(deleted)
    }
}
