//! External (disk-based) sort engine: bounded-memory run generation and a
//! balanced k-way merge for variable-length records.
//!
//! A host embedding this crate supplies the three narrow collaborators of
//! [`services`] (a paged-file service, a buffer-pool service, and an
//! overflow-record service) plus the three callbacks of [`callbacks`] (a
//! record producer, a record consumer, and a comparator), and drives the
//! whole sort through [`sort_listfile`]. [`tempfile_provisioner::FsBackend`]
//! is a ready-made implementation of the three services, backed by real
//! temp files, for callers with no pager of their own.

pub mod arena;
pub mod callbacks;
pub mod config;
pub mod error;
pub mod inmem_sort;
pub mod ledger;
pub mod logging;
pub mod merge;
pub mod orchestrator;
pub mod overflow;
pub mod run_generator;
pub mod services;
pub mod storage;
pub mod tempfile_provisioner;

pub use callbacks::{Comparator, GetRecord, PutRecord, RecordSink, RecordSource};
pub use config::{DuplicatePolicy, SortConfig};
pub use error::{Result, SortError};
pub use logging::init_logging;
pub use orchestrator::{sort_listfile, SortReport};
pub use services::{
    BufferPoolService, OverflowHandle, OverflowService, PagedFileService, VolumeId, Vpid,
};
pub use tempfile_provisioner::{FsBackend, TempFileProvisioner};
