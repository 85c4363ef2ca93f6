//! The run generator: drains the producer into sorted runs.

use crate::arena::{Arena, NO_NEXT};
use crate::callbacks::{Comparator, GetRecord, RecordSource};
use crate::config::{DuplicatePolicy, SortConfig};
use crate::error::{Result, SortError};
use crate::inmem_sort::sort_pointers;
use crate::ledger::RunLedger;
use crate::overflow::OverflowAdapter;
use crate::services::{BufferPoolService, OverflowService, PagedFileService};
use crate::storage::page::{AnchorPolicy, InsertOutcome, SlottedPage};
use crate::storage::record::RecordKind;
use crate::tempfile_provisioner::TempFileProvisioner;

/// What [`RunGenerator::generate`] handed back at end of stream.
pub enum RunGenOutcome {
    /// Nothing was ever flushed to disk; `arena`/`pointers` hold the
    /// entire (already sorted, deduped) input ready to stream straight to
    /// the consumer.
    Direct { arena: Arena, pointers: Vec<u32> },
    /// At least one run was flushed; `tot_runs` says how many.
    Flushed { tot_runs: u32 },
}

pub struct RunGenerator<'a, F> {
    config: &'a SortConfig,
    files: &'a mut F,
    provisioner: &'a mut TempFileProvisioner,
    ledgers: &'a mut [RunLedger],
    overflow: &'a mut OverflowAdapter,
    arena_capacity_bytes: usize,
    next_output_half: usize,
    tot_runs: u32,
}

impl<'a, F> RunGenerator<'a, F>
where
    F: PagedFileService + BufferPoolService + OverflowService,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &'a SortConfig,
        files: &'a mut F,
        provisioner: &'a mut TempFileProvisioner,
        ledgers: &'a mut [RunLedger],
        overflow: &'a mut OverflowAdapter,
        arena_capacity_bytes: usize,
    ) -> Self {
        Self {
            config,
            files,
            provisioner,
            ledgers,
            overflow,
            arena_capacity_bytes,
            next_output_half: 0,
            tot_runs: 0,
        }
    }

    pub fn tot_runs(&self) -> u32 {
        self.tot_runs
    }

    pub fn generate<S: RecordSource, C: Comparator>(
        &mut self,
        source: &mut S,
        cmp: &mut C,
    ) -> Result<RunGenOutcome> {
        let mut arena = Arena::new(self.arena_capacity_bytes);
        let mut pointers: Vec<u32> = Vec::new();
        let mut scratch: Vec<u8> = Vec::with_capacity(self.config.page_payload_max());

        loop {
            scratch.clear();
            match source.get_record(&mut scratch) {
                GetRecord::Success(n) => {
                    scratch.truncate(n);
                    if scratch.len() > self.config.page_payload_max() {
                        if !pointers.is_empty() {
                            self.sort_and_flush(&mut arena, &mut pointers, cmp)?;
                        }
                        self.flush_long_record(&scratch)?;
                        continue;
                    }
                    if !arena.has_room_for(scratch.len()) {
                        self.sort_and_flush(&mut arena, &mut pointers, cmp)?;
                    }
                    let idx = arena.push_record(&scratch);
                    pointers.push(idx);
                }
                GetRecord::DoesNotFit => {
                    let grown = (scratch.capacity() * 2).max(self.config.page_payload_max() * 2);
                    scratch.reserve(grown.saturating_sub(scratch.capacity()));
                }
                GetRecord::EndOfStream => break,
                GetRecord::Error(msg) => return Err(SortError::Producer(msg)),
            }
        }

        if pointers.is_empty() {
            return if self.tot_runs == 0 {
                Ok(RunGenOutcome::Direct { arena, pointers })
            } else {
                Ok(RunGenOutcome::Flushed {
                    tot_runs: self.tot_runs,
                })
            };
        }

        let live = sort_pointers(&mut pointers, &mut arena, cmp, self.config.duplicate_policy);
        pointers.truncate(live);

        if self.tot_runs == 0 {
            return Ok(RunGenOutcome::Direct { arena, pointers });
        }
        self.flush(&mut arena, &pointers)?;
        Ok(RunGenOutcome::Flushed {
            tot_runs: self.tot_runs,
        })
    }

    fn sort_and_flush<C: Comparator>(
        &mut self,
        arena: &mut Arena,
        pointers: &mut Vec<u32>,
        cmp: &mut C,
    ) -> Result<()> {
        let live = sort_pointers(pointers, arena, cmp, self.config.duplicate_policy);
        pointers.truncate(live);
        self.flush(arena, pointers)?;
        arena.reset();
        pointers.clear();
        Ok(())
    }

    fn flush_long_record(&mut self, record: &[u8]) -> Result<()> {
        let mut arena = Arena::new(self.arena_capacity_bytes);
        let handle = self.overflow.store(self.files, record)?;
        let idx = arena.push_overflow_stub(handle);
        self.flush(&mut arena, &[idx])
    }

    /// Writes `pointers` (already sorted and deduped) as one run into the
    /// current round-robin half file.
    fn flush(&mut self, arena: &mut Arena, pointers: &[u32]) -> Result<()> {
        let half = self.next_output_half;
        let volume = self.provisioner.create_if_absent(
            self.files,
            half,
            self.config.default_temp_file_pages,
        )?;

        let mut page_buf = vec![0u8; self.config.page_size];
        let mut pages_written = 0u32;
        {
            let mut page = SlottedPage::from_bytes(&mut page_buf)?;
            page.init(AnchorPolicy::Anchored, self.config.alignment as u16)?;
        }

        for &p in pointers {
            let mut node = p;
            loop {
                let overflow = arena.slot(node).overflow_handle();
                let record_bytes = if overflow.is_none() {
                    Some(arena.record_bytes(node).to_vec())
                } else {
                    None
                };
                let next_index = arena.slot(node).next_index;

                let (bytes, kind) = match overflow {
                    Some(handle) => (handle_bytes(handle), RecordKind::BigOne),
                    None => (record_bytes.unwrap(), RecordKind::Home),
                };
                pages_written += self.write_record_into_run(
                    volume,
                    &mut page_buf,
                    &bytes,
                    kind,
                )?;

                if self.config.duplicate_policy != DuplicatePolicy::Link {
                    break;
                }
                if next_index == NO_NEXT {
                    break;
                }
                node = next_index;
            }
        }

        let live = {
            let page = SlottedPage::from_bytes(&mut page_buf)?;
            page.live_record_count()
        };
        if live > 0 {
            self.commit_page(volume, &page_buf)?;
            pages_written += 1;
        }

        self.ledgers[half].append(pages_written);
        self.tot_runs += 1;
        self.next_output_half = (self.next_output_half + 1) % self.ledgers.len();
        Ok(())
    }

    /// Inserts one record into the in-progress output page, committing and
    /// reinitializing the page first if it does not fit. Returns how many
    /// pages were committed to disk as a side effect (0 or 1).
    fn write_record_into_run(
        &mut self,
        volume: crate::services::VolumeId,
        page_buf: &mut [u8],
        record: &[u8],
        kind: RecordKind,
    ) -> Result<u32> {
        let mut committed = 0u32;
        loop {
            let outcome = {
                let mut page = SlottedPage::from_bytes(page_buf)?;
                page.insert_as(record, kind)?
            };
            match outcome {
                InsertOutcome::Inserted(_) => return Ok(committed),
                InsertOutcome::NotEnoughSpace => {
                    let live = {
                        let page = SlottedPage::from_bytes(page_buf)?;
                        page.live_record_count()
                    };
                    if live == 0 {
                        return Err(SortError::InvariantViolation(
                            "record does not fit an empty page".into(),
                        ));
                    }
                    self.commit_page(volume, page_buf)?;
                    committed += 1;
                    let mut page = SlottedPage::from_bytes(page_buf)?;
                    page.init(AnchorPolicy::Anchored, self.config.alignment as u16)?;
                }
            }
        }
    }

    fn commit_page(&mut self, volume: crate::services::VolumeId, buf: &[u8]) -> Result<()> {
        let page_no = self.files.allocate_pages(volume, 1)?;
        let vpid = self.files.find_nth_page(volume, page_no)?;
        self.files.copy_from_area(vpid, 0, buf)
    }
}

pub fn handle_bytes(handle: crate::services::OverflowHandle) -> Vec<u8> {
    let mut out = Vec::with_capacity(8);
    out.extend_from_slice(&handle.volume.0.to_le_bytes());
    out.extend_from_slice(&handle.page.to_le_bytes());
    out
}

pub fn handle_from_bytes(bytes: &[u8]) -> crate::services::OverflowHandle {
    crate::services::OverflowHandle {
        volume: crate::services::VolumeId(u32::from_le_bytes(bytes[0..4].try_into().unwrap())),
        page: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
    }
}
