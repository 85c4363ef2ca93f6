//! The narrow interfaces the sort core consumes.
//!
//! The paged-file service, the buffer pool, and the overflow-record
//! service are excluded from this core's scope — they are the host
//! database's pager and overflow module. This module defines only the
//! seam: the traits the orchestrator, run generator, and merge driver are
//! written against. [`crate::tempfile_provisioner::FsBackend`] is one
//! concrete, swappable implementation of all three traits, shipped for
//! testing and the `cli` demo binary — a host embedding this crate is
//! expected to supply its own, backed by its existing pager.

use crate::error::Result;

/// Identifies one temp or overflow file created through
/// [`PagedFileService::create_temp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VolumeId(pub u32);

/// A page's location: which volume, and which page within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Vpid {
    pub volume: VolumeId,
    pub page: u32,
}

/// The paged-file service: create/destroy temp files, allocate and locate
/// pages within them.
pub trait PagedFileService {
    /// Creates a new temp file. `size_hint` pages may be over-promised by
    /// the creator.
    fn create_temp(&mut self, size_hint: u32) -> Result<VolumeId>;

    /// Destroys a temp file. Idempotent: destroying an already-destroyed
    /// or never-created volume is not an error.
    fn destroy(&mut self, volume: VolumeId) -> Result<()>;

    /// Allocates `n` consecutive-in-ledger (not necessarily
    /// contiguous-on-disk) pages, returning the page number of the first.
    /// Allocated pages are deliberately uninitialized.
    fn allocate_pages(&mut self, volume: VolumeId, n: u32) -> Result<u32>;

    /// Locates the `n`th page (zero-based) within `volume`.
    fn find_nth_page(&self, volume: VolumeId, n: u32) -> Result<Vpid>;

    /// Total pages allocated in `volume` so far.
    fn num_pages(&self, volume: VolumeId) -> Result<u32>;

    /// Upper bound on pages a single new volume can hold; used to size the
    /// forced-preallocation retry after a single-volume disk-full error.
    fn max_pages_new_volume(&self) -> u32;
}

/// The buffer pool: move bytes between caller-owned memory and a page,
/// addressed globally by [`Vpid`] rather than by a file handle.
pub trait BufferPoolService {
    fn copy_from_area(&mut self, vpid: Vpid, offset: usize, src: &[u8]) -> Result<()>;
    fn copy_to_area(&mut self, vpid: Vpid, offset: usize, len: usize, dst: &mut [u8]) -> Result<()>;
}

/// A compact, fixed-size handle to one long record stored by
/// [`OverflowService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OverflowHandle {
    pub volume: VolumeId,
    pub page: u32,
}

/// The overflow-record service: store and retrieve records larger than
/// one page's payload capacity.
pub trait OverflowService {
    fn insert(&mut self, volume: VolumeId, record: &[u8]) -> Result<OverflowHandle>;
    fn length(&self, handle: OverflowHandle) -> Result<u32>;
    fn get(&self, handle: OverflowHandle, into: &mut Vec<u8>) -> Result<()>;
}
