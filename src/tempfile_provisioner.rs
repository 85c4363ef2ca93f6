//! The temp-file provisioner and a concrete default backend.
//!
//! [`TempFileProvisioner`] implements the lazy-creation and forced-
//! preallocation life cycle the orchestrator drives against any
//! [`PagedFileService`]. [`FsBackend`] is the one concrete implementation
//! this crate ships: real OS temp files via `tempfile`, a small LRU page
//! cache (`lru` + `parking_lot`) in front of them, and `fs2` advisory
//! locks guarding each volume while it is open. A host embedding this
//! crate for a real database supplies its own implementation backed by
//! its existing pager instead.

use crate::error::{Result, SortError};
use crate::services::{
    BufferPoolService, OverflowHandle, OverflowService, PagedFileService, VolumeId, Vpid,
};
use dashmap::DashMap;
use fs2::FileExt;
use lru::LruCache;
use parking_lot::Mutex;
use std::io::{Read, Seek, SeekFrom, Write};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::NamedTempFile;

/// Retrying a forced preallocation after single-volume disk-full caps the
/// retry at this fraction of `max_pages_new_volume()`.
const DISK_FULL_RETRY_FRACTION: f64 = 0.95;

/// Drives lazy creation and forced preallocation of the `2 * half_files`
/// temp-file slots plus the multipage overflow file, against any
/// [`PagedFileService`].
#[derive(Debug, Default)]
pub struct TempFileProvisioner {
    slots: Vec<Option<VolumeId>>,
}

impl TempFileProvisioner {
    pub fn new(num_slots: usize) -> Self {
        Self {
            slots: vec![None; num_slots],
        }
    }

    pub fn volume(&self, slot: usize) -> Option<VolumeId> {
        self.slots[slot]
    }

    /// Destroys `slot`'s volume, if any, and drops it from bookkeeping so
    /// the next write starts a fresh, empty volume with page numbering
    /// reset to zero. Used when a half-file slot's role flips from input
    /// to output between merge passes: its old content is no longer
    /// needed, and per-slot read cursors assume a fresh start.
    pub fn recreate<F: PagedFileService>(
        &mut self,
        files: &mut F,
        slot: usize,
        size_hint_pages: u32,
    ) -> Result<VolumeId> {
        if let Some(v) = self.slots[slot].take() {
            files.destroy(v)?;
        }
        self.create_if_absent(files, slot, size_hint_pages)
    }

    /// Creates the temp file backing `slot` if it does not already exist.
    pub fn create_if_absent<F: PagedFileService>(
        &mut self,
        files: &mut F,
        slot: usize,
        size_hint_pages: u32,
    ) -> Result<VolumeId> {
        if let Some(v) = self.slots[slot] {
            return Ok(v);
        }
        let v = files.create_temp(size_hint_pages)?;
        self.slots[slot] = Some(v);
        Ok(v)
    }

    /// Requests bulk allocation of `pages` pages for `slot`, created if
    /// absent. On a single-volume disk-full failure, retries once with
    /// `min(pages, 95% of max_pages_new_volume())`; a second failure of
    /// the same kind is fatal.
    pub fn force_preallocate<F: PagedFileService>(
        &mut self,
        files: &mut F,
        slot: usize,
        pages: u32,
    ) -> Result<u32> {
        let volume = self.create_if_absent(files, slot, pages)?;
        match files.allocate_pages(volume, pages) {
            Ok(first) => Ok(first),
            Err(e) if e.is_single_volume_disk_full() => {
                tracing::warn!(
                    pages,
                    "disk full during forced preallocation, retrying at 95% of single-volume max"
                );
                let capped =
                    ((files.max_pages_new_volume() as f64) * DISK_FULL_RETRY_FRACTION) as u32;
                let retry_pages = pages.min(capped.max(1));
                files.allocate_pages(volume, retry_pages)
            }
            Err(e) => Err(e),
        }
    }

    /// Destroys every temp-file slot that was ever created. Idempotent.
    pub fn destroy_all<F: PagedFileService>(&mut self, files: &mut F) -> Result<()> {
        for slot in self.slots.iter_mut() {
            if let Some(v) = slot.take() {
                files.destroy(v)?;
            }
        }
        Ok(())
    }
}

struct Volume {
    file: NamedTempFile,
    pages: u32,
}

/// A single-process, file-backed implementation of all three excluded
/// services, used by this crate's own tests and the `cli` demo binary.
pub struct FsBackend {
    page_size: usize,
    volumes: DashMap<u32, Mutex<Volume>>,
    next_id: AtomicU32,
    cache: Mutex<LruCache<(u32, u32), Vec<u8>>>,
}

impl FsBackend {
    pub fn new(page_size: usize) -> Result<Self> {
        Ok(Self {
            page_size,
            volumes: DashMap::new(),
            next_id: AtomicU32::new(1),
            cache: Mutex::new(LruCache::new(NonZeroUsize::new(256).unwrap())),
        })
    }

    fn with_volume<R>(&self, id: u32, f: impl FnOnce(&mut Volume) -> Result<R>) -> Result<R> {
        let entry = self
            .volumes
            .get(&id)
            .ok_or_else(|| SortError::FileService(format!("unknown volume {id}")))?;
        let mut guard = entry.lock();
        f(&mut guard)
    }
}

impl PagedFileService for FsBackend {
    fn create_temp(&mut self, size_hint: u32) -> Result<VolumeId> {
        let file = NamedTempFile::new().map_err(SortError::Io)?;
        file.as_file()
            .try_lock_exclusive()
            .map_err(|e| SortError::FileService(format!("failed to lock temp file: {e}")))?;
        let over_promised = size_hint as u64 * self.page_size as u64;
        file.as_file().set_len(over_promised).map_err(SortError::Io)?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.volumes.insert(id, Mutex::new(Volume { file, pages: 0 }));
        Ok(VolumeId(id))
    }

    fn destroy(&mut self, volume: VolumeId) -> Result<()> {
        if let Some((_, lock)) = self.volumes.remove(&volume.0) {
            let v = lock.into_inner();
            let _ = v.file.as_file().unlock();
        }
        let mut cache = self.cache.lock();
        let stale: Vec<(u32, u32)> = cache
            .iter()
            .filter(|((vol, _), _)| *vol == volume.0)
            .map(|(k, _)| *k)
            .collect();
        for key in stale {
            cache.pop(&key);
        }
        Ok(())
    }

    fn allocate_pages(&mut self, volume: VolumeId, n: u32) -> Result<u32> {
        if n == 0 {
            return Err(SortError::InvalidArgument(
                "cannot allocate zero pages".into(),
            ));
        }
        if (n as f64) > self.max_pages_new_volume() as f64 {
            return Err(SortError::FileService(
                "disk full: requested allocation exceeds single-volume maximum".into(),
            ));
        }
        self.with_volume(volume.0, |v| {
            let first = v.pages;
            let needed_len = (first as u64 + n as u64) * self.page_size as u64;
            if v.file.as_file().metadata().map(|m| m.len()).unwrap_or(0) < needed_len {
                v.file.as_file().set_len(needed_len).map_err(SortError::Io)?;
            }
            v.pages += n;
            Ok(first)
        })
    }

    fn find_nth_page(&self, volume: VolumeId, n: u32) -> Result<Vpid> {
        self.with_volume(volume.0, |v| {
            if n >= v.pages {
                return Err(SortError::Corruption(format!(
                    "page {n} does not exist in volume with {} pages",
                    v.pages
                )));
            }
            Ok(Vpid { volume, page: n })
        })
    }

    fn num_pages(&self, volume: VolumeId) -> Result<u32> {
        self.with_volume(volume.0, |v| Ok(v.pages))
    }

    fn max_pages_new_volume(&self) -> u32 {
        1_000_000
    }
}

impl BufferPoolService for FsBackend {
    fn copy_from_area(&mut self, vpid: Vpid, offset: usize, src: &[u8]) -> Result<()> {
        if offset + src.len() > self.page_size {
            return Err(SortError::InvalidArgument(
                "write extends past end of page".into(),
            ));
        }
        let page_size = self.page_size;
        self.with_volume(vpid.volume.0, |v| {
            let mut page = vec![0u8; page_size];
            let pos = vpid.page as u64 * page_size as u64;
            v.file.as_file_mut().seek(SeekFrom::Start(pos)).map_err(SortError::Io)?;
            let _ = v.file.as_file_mut().read(&mut page);
            page[offset..offset + src.len()].copy_from_slice(src);
            v.file.as_file_mut().seek(SeekFrom::Start(pos)).map_err(SortError::Io)?;
            v.file.as_file_mut().write_all(&page).map_err(SortError::Io)?;
            Ok(())
        })?;
        self.cache.lock().pop(&(vpid.volume.0, vpid.page));
        Ok(())
    }

    fn copy_to_area(&mut self, vpid: Vpid, offset: usize, len: usize, dst: &mut [u8]) -> Result<()> {
        if dst.len() < len || offset + len > self.page_size {
            return Err(SortError::InvalidArgument(
                "read request exceeds destination or page bounds".into(),
            ));
        }
        let key = (vpid.volume.0, vpid.page);
        if let Some(page) = self.cache.lock().get(&key) {
            dst[..len].copy_from_slice(&page[offset..offset + len]);
            return Ok(());
        }
        let page_size = self.page_size;
        let page = self.with_volume(vpid.volume.0, |v| {
            let mut page = vec![0u8; page_size];
            let pos = vpid.page as u64 * page_size as u64;
            v.file.as_file_mut().seek(SeekFrom::Start(pos)).map_err(SortError::Io)?;
            let _ = v.file.as_file_mut().read(&mut page);
            Ok(page)
        })?;
        dst[..len].copy_from_slice(&page[offset..offset + len]);
        self.cache.lock().put(key, page);
        Ok(())
    }
}

/// Header bytes at the front of each overflow-chain page.
const OVERFLOW_CHAIN_HEADER: usize = 8;

impl OverflowService for FsBackend {
    fn insert(&mut self, volume: VolumeId, record: &[u8]) -> Result<OverflowHandle> {
        let chunk_capacity = self.page_size - OVERFLOW_CHAIN_HEADER;
        let num_chunks = record.len().div_ceil(chunk_capacity).max(1);
        let first_page = self.allocate_pages(volume, num_chunks as u32)?;

        for (i, chunk) in record.chunks(chunk_capacity).enumerate() {
            let page = first_page + i as u32;
            let next = if i + 1 < num_chunks {
                page + 1
            } else {
                u32::MAX
            };
            let mut header = [0u8; OVERFLOW_CHAIN_HEADER];
            header[0..4].copy_from_slice(&next.to_le_bytes());
            header[4..8].copy_from_slice(&(chunk.len() as u32).to_le_bytes());
            let vpid = Vpid { volume, page };
            self.copy_from_area(vpid, 0, &header)?;
            self.copy_from_area(vpid, OVERFLOW_CHAIN_HEADER, chunk)?;
        }
        if record.is_empty() {
            let vpid = Vpid {
                volume,
                page: first_page,
            };
            let mut header = [0u8; OVERFLOW_CHAIN_HEADER];
            header[0..4].copy_from_slice(&u32::MAX.to_le_bytes());
            self.copy_from_area(vpid, 0, &header)?;
        }
        Ok(OverflowHandle {
            volume,
            page: first_page,
        })
    }

    fn length(&self, handle: OverflowHandle) -> Result<u32> {
        let mut total = 0u32;
        let mut page = handle.page;
        loop {
            let mut header = vec![0u8; OVERFLOW_CHAIN_HEADER];
            let backend = self as &Self;
            let vpid = Vpid {
                volume: handle.volume,
                page,
            };
            // Safety note: `length` only reads, so a const-borrow suffices;
            // `copy_to_area` takes `&mut self` for cache bookkeeping, so we
            // route through an interior-mutable clone of the cache lock.
            let chunk_len = backend.read_chain_header(vpid, &mut header)?;
            total += chunk_len;
            let next = u32::from_le_bytes(header[0..4].try_into().unwrap());
            if next == u32::MAX {
                break;
            }
            page = next;
        }
        Ok(total)
    }

    fn get(&self, handle: OverflowHandle, into: &mut Vec<u8>) -> Result<()> {
        into.clear();
        let mut page = handle.page;
        loop {
            let mut header = vec![0u8; OVERFLOW_CHAIN_HEADER];
            let vpid = Vpid {
                volume: handle.volume,
                page,
            };
            let chunk_len = self.read_chain_header(vpid, &mut header)? as usize;
            let mut chunk = vec![0u8; chunk_len];
            self.read_chain_payload(vpid, &mut chunk)?;
            into.extend_from_slice(&chunk);
            let next = u32::from_le_bytes(header[0..4].try_into().unwrap());
            if next == u32::MAX {
                break;
            }
            page = next;
        }
        Ok(())
    }
}

impl FsBackend {
    fn read_chain_header(&self, vpid: Vpid, header: &mut [u8]) -> Result<u32> {
        let page_size = self.page_size;
        let page = self.with_volume(vpid.volume.0, |v| {
            let mut page = vec![0u8; page_size];
            let pos = vpid.page as u64 * page_size as u64;
            v.file.as_file().try_clone().map_err(SortError::Io).and_then(|mut f| {
                f.seek(SeekFrom::Start(pos)).map_err(SortError::Io)?;
                let _ = f.read(&mut page);
                Ok(page)
            })
        })?;
        header.copy_from_slice(&page[..OVERFLOW_CHAIN_HEADER]);
        Ok(u32::from_le_bytes(header[4..8].try_into().unwrap()))
    }

    fn read_chain_payload(&self, vpid: Vpid, dst: &mut [u8]) -> Result<()> {
        let page_size = self.page_size;
        let page = self.with_volume(vpid.volume.0, |v| {
            let mut page = vec![0u8; page_size];
            let pos = vpid.page as u64 * page_size as u64;
            v.file.as_file().try_clone().map_err(SortError::Io).and_then(|mut f| {
                f.seek(SeekFrom::Start(pos)).map_err(SortError::Io)?;
                let _ = f.read(&mut page);
                Ok(page)
            })
        })?;
        dst.copy_from_slice(&page[OVERFLOW_CHAIN_HEADER..OVERFLOW_CHAIN_HEADER + dst.len()]);
        Ok(())
    }
}
