//! Storage trait definitions for pipewarden
//!
//! These types define the core storage abstraction:
//! - `DurableStore`: key-value store with atomic whole-value replacement
//! - `StoreKey`: validated, backend-agnostic key (slash separated segments)
//! - `ContentDigest`: SHA-256 digest used to detect corrupt records
//! - `RunId`: storage namespace of one pipeline run
//!
//! The trait is async and backend-agnostic. A filesystem backend lives in
//! `fs_store`; in-memory fakes are provided for testing via the `fakes` module.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// ContentDigest
// ---------------------------------------------------------------------------

/// Content digest (SHA-256 hex string).
///
/// The inner field is private to guarantee the string is always valid
/// lowercase hex produced by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl From<ContentDigest> for String {
    fn from(d: ContentDigest) -> Self {
        d.0
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// Unique identifier for a pipeline run. Doubles as the storage namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a new random RunId
    pub fn new() -> Self {
        RunId(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// StoreKey
// ---------------------------------------------------------------------------

/// Key into a [`DurableStore`].
///
/// Grammar: one or more `/`-separated segments, each made of ASCII
/// alphanumerics, `-`, `_` or `.`, never starting with `.`. Segments that
/// start with `.` are reserved for backend scratch files.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StoreKey(String);

impl StoreKey {
    /// Parse and validate a key.
    pub fn new(key: impl Into<String>) -> StorageResult<Self> {
        let key = key.into();
        validate_key(&key)?;
        Ok(StoreKey(key))
    }

    /// Append one or more segments.
    pub fn join(&self, suffix: &str) -> StorageResult<Self> {
        StoreKey::new(format!("{}/{}", self.0, suffix))
    }

    /// Full key string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterate over the key segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Last segment of the key.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Whether `self` lives under `prefix` (segment-wise).
    pub fn starts_with(&self, prefix: &StoreKey) -> bool {
        self.0 == prefix.0 || self.0.starts_with(&format!("{}/", prefix.0))
    }
}

impl TryFrom<String> for StoreKey {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        StoreKey::new(s)
    }
}

impl From<StoreKey> for String {
    fn from(k: StoreKey) -> Self {
        k.0
    }
}

impl std::fmt::Display for StoreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn validate_key(key: &str) -> StorageResult<()> {
    let invalid = |reason: &str| StorageError::InvalidKey {
        key: key.to_string(),
        reason: reason.to_string(),
    };

    if key.is_empty() {
        return Err(invalid("key must not be empty"));
    }
    for segment in key.split('/') {
        if segment.is_empty() {
            return Err(invalid("empty segment"));
        }
        if segment.starts_with('.') {
            return Err(invalid("segments must not start with '.'"));
        }
        if !segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(invalid("segments may only contain [A-Za-z0-9._-]"));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// DurableStore
// ---------------------------------------------------------------------------

/// Durable key-value store.
///
/// Guarantees:
/// - `put_atomic` replaces the whole value or nothing: a concurrent or
///   later reader sees either the previous value or the new one, never a
///   partially written value, even if the process dies mid-write.
/// - When `put_atomic` returns `Ok`, the value is durable.
/// - Writes to the same key from concurrent callers are serialized; the
///   last completed write wins.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Atomically write `data` under `key`.
    async fn put_atomic(&self, key: &StoreKey, data: &[u8]) -> StorageResult<()>;

    /// Read the value under `key`; `None` if absent.
    async fn get(&self, key: &StoreKey) -> StorageResult<Option<Vec<u8>>>;

    /// List every key under `prefix`, sorted ascending.
    async fn list(&self, prefix: &StoreKey) -> StorageResult<Vec<StoreKey>>;

    /// Delete `key`. No-op if absent.
    async fn delete(&self, key: &StoreKey) -> StorageResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_stable_hex() {
        let d = ContentDigest::from_bytes(b"checkpoint body");
        assert_eq!(d.as_str().len(), 64);
        assert_eq!(d, ContentDigest::from_bytes(b"checkpoint body"));
        assert_eq!(d.short().len(), 12);
    }

    #[test]
    fn digest_try_from_rejects_garbage() {
        assert!(ContentDigest::try_from("zz".to_string()).is_err());
        let ok = ContentDigest::from_bytes(b"x").as_str().to_uppercase();
        assert!(ContentDigest::try_from(ok).is_ok());
    }

    #[test]
    fn store_key_accepts_nested_keys() {
        let key = StoreKey::new("run-1/checkpoints/000000-evidence.json").unwrap();
        assert_eq!(key.file_name(), "000000-evidence.json");
        assert_eq!(key.segments().count(), 3);
    }

    #[test]
    fn store_key_rejects_traversal_and_hidden() {
        assert!(StoreKey::new("").is_err());
        assert!(StoreKey::new("a//b").is_err());
        assert!(StoreKey::new("../etc/passwd").is_err());
        assert!(StoreKey::new("run/.tmp123").is_err());
        assert!(StoreKey::new("run/with space").is_err());
    }

    #[test]
    fn store_key_prefix_is_segment_wise() {
        let prefix = StoreKey::new("run-1").unwrap();
        assert!(StoreKey::new("run-1/latest.json").unwrap().starts_with(&prefix));
        assert!(!StoreKey::new("run-10/latest.json").unwrap().starts_with(&prefix));
    }

    #[test]
    fn run_ids_are_unique() {
        assert_ne!(RunId::new(), RunId::new());
    }
}
