//! Pipewarden-State: durable storage for pipeline checkpoints
//!
//! This crate provides the persistence layer for the pipeline orchestrator.
//! It knows nothing about phases or checkpoints; it offers a key-value store
//! whose writes are atomic and durable, which is all the checkpoint manager
//! needs to keep its "latest" pointer trustworthy across crashes.
//!
//! ## Key Components
//!
//! - `DurableStore`: backend-agnostic async key-value trait
//! - `FsStore`: filesystem backend (scratch file + fsync + rename)
//! - `fakes::MemoryStore` / `fakes::FaultyStore`: test doubles

mod error;
pub mod fakes;
mod fs_store;
pub mod storage_traits;

pub use error::StorageError;
pub use fs_store::FsStore;
pub use storage_traits::{ContentDigest, DurableStore, RunId, StorageResult, StoreKey};
