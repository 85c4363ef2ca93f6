//! Error handling for the sort engine.
//!
//! This module defines the error types used throughout the crate. All
//! public APIs return `Result<T, SortError>` for consistent error handling.
//!
//! # Error Handling Pattern
//!
//! ```rust
//! use xsort::{SortConfig, Result};
//!
//! fn configure() -> Result<SortConfig> {
//!     Ok(SortConfig::default())
//! }
//! ```

use std::io;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::error;

/// Result type for sort-engine operations.
pub type Result<T> = std::result::Result<T, SortError>;

/// Errors that can occur while running the external sort.
///
/// Every variant corresponds to one of the error kinds of the propagation
/// table: all but the disk-full preallocation retry surface at the call
/// boundary with the first error captured, and trigger cleanup.
#[derive(Debug, Error)]
pub enum SortError {
    /// I/O error from the underlying filesystem or memory-mapped region.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The arena, a run ledger, or a long-record buffer could not grow.
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// The record producer (`get_record`) returned `ERROR`.
    #[error("producer error: {0}")]
    Producer(String),

    /// The paged-file or buffer-pool service reported a failure on
    /// create/allocate/read/write.
    #[error("file service error: {0}")]
    FileService(String),

    /// The overflow-record service reported a failure on insert/get/length.
    #[error("overflow service error: {0}")]
    Overflow(String),

    /// A slotted page returned a missing slot when the merge expected one,
    /// or otherwise failed an internal consistency check. The sort
    /// invariant is broken; this is not recoverable.
    #[error("temp page corrupted: {0}")]
    Corruption(String),

    /// An internal invariant was violated outside the long-record path,
    /// e.g. a single record failing to fit an empty page.
    #[error("sort invariant violation: {0}")]
    InvariantViolation(String),

    /// An argument to the public entry point was invalid.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl SortError {
    /// True for the disk-full case while forcing preallocation, which gets
    /// one local retry at a reduced page count rather than propagating.
    pub fn is_single_volume_disk_full(&self) -> bool {
        matches!(self, SortError::FileService(msg) if msg.contains("disk full"))
    }
}

/// Safely acquires a mutex lock, converting poison into `SortError::Corruption`
/// instead of panicking. Used by the long-record buffer pool, the only
/// internally shared mutable state in the core.
pub fn acquire_lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex.lock().map_err(|_| {
        error!("sort engine lock poisoned - fatal error");
        SortError::Corruption("internal lock poisoned".into())
    })
}
