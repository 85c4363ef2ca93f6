//! The overflow adapter: long-record storage and retrieval.

use crate::error::Result;
use crate::services::{OverflowHandle, OverflowService, PagedFileService, VolumeId};

/// Size hint, in pages, used the first time the overflow file is created.
/// Modest because most sorts never touch it.
const OVERFLOW_FILE_INITIAL_PAGES: u32 = 4;

/// Lazily creates the overflow file on first long record, and stores
/// subsequent long records through it. The arena only ever holds the
/// resulting 8-byte [`OverflowHandle`] for a long record, never its bytes.
#[derive(Debug, Default)]
pub struct OverflowAdapter {
    volume: Option<VolumeId>,
}

impl OverflowAdapter {
    pub fn new() -> Self {
        Self { volume: None }
    }

    pub fn is_created(&self) -> bool {
        self.volume.is_some()
    }

    /// Stores `record` via the overflow service, creating the backing
    /// volume on first use. Takes one backend bounded by both traits
    /// rather than two separate objects: every host this crate ships for
    /// (and every test fixture) implements the paged-file and overflow
    /// seams on the same concrete type, and splitting them into two
    /// parameters would force call sites to borrow that one type mutably
    /// twice at once.
    pub fn store<F>(&mut self, files: &mut F, record: &[u8]) -> Result<OverflowHandle>
    where
        F: PagedFileService + OverflowService,
    {
        let volume = match self.volume {
            Some(v) => v,
            None => {
                let v = files.create_temp(OVERFLOW_FILE_INITIAL_PAGES)?;
                self.volume = Some(v);
                v
            }
        };
        files.insert(volume, record)
    }

    /// Destroys the overflow file, if one was ever created. Idempotent.
    pub fn destroy<F: PagedFileService>(&mut self, files: &mut F) -> Result<()> {
        if let Some(volume) = self.volume.take() {
            files.destroy(volume)?;
        }
        Ok(())
    }
}

/// A growable buffer owned by one merge input stream, used to materialize
/// `BigOne` records dereferenced from an [`OverflowHandle`] during merge.
/// Grows monotonically and is reused across runs within the same input,
/// freed only when the merge input itself is dropped.
#[derive(Debug, Default)]
pub struct LongRecordBuffer {
    buf: Vec<u8>,
    len: usize,
}

impl LongRecordBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dereferences `handle` through `overflow`, growing the backing
    /// buffer if needed, and returns the materialized record bytes.
    pub fn fetch<'a, O: OverflowService>(
        &'a mut self,
        overflow: &O,
        handle: OverflowHandle,
    ) -> Result<&'a [u8]> {
        let needed = overflow.length(handle)? as usize;
        if self.buf.len() < needed {
            self.buf.resize(needed, 0);
        }
        let mut scratch = std::mem::take(&mut self.buf);
        scratch.resize(needed, 0);
        overflow.get(handle, &mut scratch)?;
        self.buf = scratch;
        self.len = needed;
        Ok(&self.buf[..self.len])
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}
