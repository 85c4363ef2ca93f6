//! The k-way merge driver.
//!
//! Each outer pass reads the oldest run off every input-half file with
//! work left, merges the contributions by rescanning for the smallest
//! head record each iteration (kept linear rather than heap-ified since
//! the number of active inputs is bounded by `half_files`), and writes one
//! new run per iteration to the opposite half. A file whose ledger
//! contributed the lone run that iteration is copied straight through with
//! no comparator call, exactly as when only one input is active.

use crate::callbacks::{Comparator, PutRecord, RecordSink};
use crate::config::{DuplicatePolicy, SortConfig};
use crate::error::{Result, SortError};
use crate::ledger::RunLedger;
use crate::overflow::LongRecordBuffer;
use crate::run_generator::handle_from_bytes;
use crate::services::{BufferPoolService, OverflowService, PagedFileService, VolumeId, Vpid};
use crate::storage::page::{AnchorPolicy, InsertOutcome, SlottedPage};
use crate::storage::record::RecordKind;
use crate::tempfile_provisioner::TempFileProvisioner;
use std::cmp::Ordering;

/// Where one surviving run lives once the merge has reduced the sort to a
/// single run, ready for [`stream_final_run`].
pub struct FinalRun {
    pub volume: VolumeId,
    pub start_page: u32,
    pub num_pages: u32,
}

/// Owns the two (input, output) groups of half-file ledgers and drives
/// outer passes until one run remains.
pub struct MergeState {
    ledgers: Vec<RunLedger>,
    read_cursor: Vec<u32>,
    half_files: usize,
    in_base: usize,
}

impl MergeState {
    pub fn new(ledgers: Vec<RunLedger>, half_files: usize) -> Self {
        let read_cursor = vec![0u32; ledgers.len()];
        Self {
            ledgers,
            read_cursor,
            half_files,
            in_base: 0,
        }
    }

    fn in_slots(&self) -> std::ops::Range<usize> {
        self.in_base..self.in_base + self.half_files
    }

    fn out_slots(&self) -> std::ops::Range<usize> {
        let out_base = self.half_files - self.in_base;
        out_base..out_base + self.half_files
    }

    fn total_active_runs(&self) -> usize {
        self.in_slots().map(|s| self.ledgers[s].active_length()).sum()
    }

    /// Runs passes until exactly one run remains, returning its location
    /// and how many passes that took (0 if the input was already a single
    /// run when this was called).
    pub fn run_to_convergence<F, C>(
        &mut self,
        config: &SortConfig,
        files: &mut F,
        provisioner: &mut TempFileProvisioner,
        cmp: &mut C,
    ) -> Result<(FinalRun, u32)>
    where
        F: PagedFileService + BufferPoolService + OverflowService,
        C: Comparator,
    {
        let mut passes = 0u32;
        while self.total_active_runs() > 1 {
            self.run_one_pass(config, files, provisioner, cmp)?;
            passes += 1;
        }

        let slot = self
            .in_slots()
            .find(|&s| !self.ledgers[s].is_empty())
            .ok_or_else(|| SortError::InvariantViolation("merge converged with no surviving run".into()))?;
        let pages = self.ledgers[slot]
            .peek_first()
            .ok_or_else(|| SortError::InvariantViolation("surviving ledger entry vanished".into()))?;
        let volume = provisioner
            .volume(slot)
            .ok_or_else(|| SortError::InvariantViolation("surviving run has no backing volume".into()))?;
        Ok((
            FinalRun {
                volume,
                start_page: self.read_cursor[slot],
                num_pages: pages,
            },
            passes,
        ))
    }

    fn run_one_pass<F, C>(
        &mut self,
        config: &SortConfig,
        files: &mut F,
        provisioner: &mut TempFileProvisioner,
        cmp: &mut C,
    ) -> Result<()>
    where
        F: PagedFileService + BufferPoolService + OverflowService,
        C: Comparator,
    {
        let active_inputs: Vec<usize> = self
            .in_slots()
            .filter(|&s| !self.ledgers[s].is_empty())
            .collect();
        let num_runs_this_pass = active_inputs
            .iter()
            .map(|&s| self.ledgers[s].active_length())
            .max()
            .unwrap_or(0);

        let out_slots: Vec<usize> = self.out_slots().collect();
        for &slot in &out_slots {
            provisioner.recreate(files, slot, config.default_temp_file_pages)?;
            self.read_cursor[slot] = 0;
            self.ledgers[slot] = RunLedger::new();
        }
        let mut next_out = 0usize;

        for _ in 0..num_runs_this_pass {
            let mut contributions: Vec<(usize, u32, u32)> = Vec::new();
            for &slot in &active_inputs {
                if let Some(pages) = self.ledgers[slot].pop_first() {
                    let start = self.read_cursor[slot];
                    self.read_cursor[slot] += pages;
                    contributions.push((slot, start, pages));
                }
            }

            let out_slot = out_slots[next_out];
            next_out = (next_out + 1) % out_slots.len();
            let out_volume = provisioner.volume(out_slot).expect("recreated above");

            let pages_written = if contributions.len() == 1 {
                let (slot, start, pages) = contributions[0];
                let in_volume = provisioner.volume(slot).expect("active input has a volume");
                copy_run_verbatim(config, files, in_volume, start, pages, out_volume)?
            } else {
                merge_contributions(config, files, provisioner, cmp, &contributions, out_volume)?
            };

            self.ledgers[out_slot].append(pages_written);
        }

        self.in_base = self.half_files - self.in_base;
        Ok(())
    }
}

fn copy_run_verbatim<B: PagedFileService + BufferPoolService>(
    config: &SortConfig,
    files: &mut B,
    in_volume: VolumeId,
    start_page: u32,
    num_pages: u32,
    out_volume: VolumeId,
) -> Result<u32> {
    let mut buf = vec![0u8; config.page_size];
    for i in 0..num_pages {
        let src = files.find_nth_page(in_volume, start_page + i)?;
        files.copy_to_area(src, 0, config.page_size, &mut buf)?;
        let dst_page_no = files.allocate_pages(out_volume, 1)?;
        let dst = files.find_nth_page(out_volume, dst_page_no)?;
        files.copy_from_area(dst, 0, &buf)?;
    }
    Ok(num_pages)
}

fn merge_contributions<F, C>(
    config: &SortConfig,
    files: &mut F,
    provisioner: &TempFileProvisioner,
    cmp: &mut C,
    contributions: &[(usize, u32, u32)],
    out_volume: VolumeId,
) -> Result<u32>
where
    F: PagedFileService + BufferPoolService + OverflowService,
    C: Comparator,
{
    // Materialize each contributing run fully; runs are bounded by the
    // arena size that produced them, so this stays proportionate to the
    // per-input section a streaming merge would have buffered anyway. A
    // record that started life as a `BigOne` keeps its handle alongside its
    // dereferenced bytes: the comparator needs the full content, but the
    // merged output writes the handle straight through rather than
    // re-inserting bytes that are already sitting in the overflow file.
    struct Stream {
        records: Vec<(Vec<u8>, Option<crate::services::OverflowHandle>)>,
        cursor: usize,
    }

    let mut streams = Vec::with_capacity(contributions.len());
    for &(slot, start_page, num_pages) in contributions {
        let volume = provisioner.volume(slot).expect("active input has a volume");
        let mut long_buf = LongRecordBuffer::new();
        let records = read_run_records(config, files, volume, start_page, num_pages, &mut long_buf)?;
        streams.push(Stream { records, cursor: 0 });
    }

    let mut page_buf = vec![0u8; config.page_size];
    {
        let mut page = SlottedPage::from_bytes(&mut page_buf)?;
        page.init(AnchorPolicy::Anchored, config.alignment as u16)?;
    }
    let mut pages_written = 0u32;

    // With only a handful of active inputs (bounded by `half_files`), a
    // linear rescan for the smallest head record each iteration is simpler
    // than a heap and, critically, lets every
    // comparison go through the caller's `cmp` instead of `Vec<u8>`'s
    // byte-lexicographic `Ord`.
    let mut pending_keeper: Option<Vec<u8>> = None;
    loop {
        let mut smallest: Option<usize> = None;
        for (i, s) in streams.iter().enumerate() {
            if s.cursor >= s.records.len() {
                continue;
            }
            smallest = match smallest {
                None => Some(i),
                Some(best) => {
                    if cmp.compare(
                        &s.records[s.cursor].0,
                        &streams[best].records[streams[best].cursor].0,
                    ) == Ordering::Less
                    {
                        Some(i)
                    } else {
                        Some(best)
                    }
                }
            };
        }
        let Some(i) = smallest else { break };
        let (bytes, handle) = streams[i].records[streams[i].cursor].clone();
        streams[i].cursor += 1;

        let is_duplicate = pending_keeper
            .as_ref()
            .map(|k| cmp.compare(k, &bytes) == Ordering::Equal)
            .unwrap_or(false);

        if is_duplicate && config.duplicate_policy == DuplicatePolicy::Eliminate {
            continue;
        }
        let (to_write, kind): (Vec<u8>, RecordKind) = match handle {
            Some(h) => (crate::run_generator::handle_bytes(h), RecordKind::BigOne),
            None => (bytes.clone(), RecordKind::Home),
        };
        pages_written += write_record_into_run(config, files, out_volume, &mut page_buf, &to_write, kind)?;
        pending_keeper = Some(bytes);
    }

    let live = {
        let page = SlottedPage::from_bytes(&mut page_buf)?;
        page.live_record_count()
    };
    if live > 0 {
        let page_no = files.allocate_pages(out_volume, 1)?;
        let vpid = files.find_nth_page(out_volume, page_no)?;
        files.copy_from_area(vpid, 0, &page_buf)?;
        pages_written += 1;
    }

    Ok(pages_written)
}

/// Reads every record of one run into memory in order, dereferencing
/// `BigOne` stubs through `files` (which also implements `OverflowService`)
/// via `long_buf`.
fn read_run_records<F>(
    config: &SortConfig,
    files: &mut F,
    volume: VolumeId,
    start_page: u32,
    num_pages: u32,
    long_buf: &mut LongRecordBuffer,
) -> Result<Vec<(Vec<u8>, Option<crate::services::OverflowHandle>)>>
where
    F: PagedFileService + BufferPoolService + OverflowService,
{
    let mut out = Vec::new();
    let mut buf = vec![0u8; config.page_size];
    for i in 0..num_pages {
        let vpid: Vpid = files.find_nth_page(volume, start_page + i)?;
        files.copy_to_area(vpid, 0, config.page_size, &mut buf)?;
        let page = SlottedPage::from_bytes(&mut buf)?;
        for slot_id in 0..page.num_records() {
            let kind = page.record_kind(slot_id)?;
            if kind.is_free() {
                continue;
            }
            let (bytes, kind) = page.peek(slot_id)?;
            match kind {
                RecordKind::BigOne => {
                    let handle = handle_from_bytes(bytes);
                    let resolved = long_buf.fetch(&*files, handle)?;
                    out.push((resolved.to_vec(), Some(handle)));
                }
                _ => out.push((bytes.to_vec(), None)),
            }
        }
    }
    Ok(out)
}

fn write_record_into_run<B: PagedFileService + BufferPoolService>(
    config: &SortConfig,
    files: &mut B,
    volume: VolumeId,
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
                        "record does not fit an empty page during merge".into(),
                    ));
                }
                let page_no = files.allocate_pages(volume, 1)?;
                let vpid = files.find_nth_page(volume, page_no)?;
                files.copy_from_area(vpid, 0, page_buf)?;
                committed += 1;
                let mut page = SlottedPage::from_bytes(page_buf)?;
                page.init(AnchorPolicy::Anchored, config.alignment as u16)?;
            }
        }
    }
}

/// Streams the single surviving run directly to the consumer, honoring
/// `PutRecord::Stop`.
pub fn stream_final_run<F, S>(
    config: &SortConfig,
    files: &mut F,
    sink: &mut S,
    run: &FinalRun,
) -> Result<()>
where
    F: PagedFileService + BufferPoolService + OverflowService,
    S: RecordSink,
{
    let mut long_buf = LongRecordBuffer::new();
    let mut buf = vec![0u8; config.page_size];
    for i in 0..run.num_pages {
        let vpid = files.find_nth_page(run.volume, run.start_page + i)?;
        files.copy_to_area(vpid, 0, config.page_size, &mut buf)?;
        let page = SlottedPage::from_bytes(&mut buf)?;
        for slot_id in 0..page.num_records() {
            let kind = page.record_kind(slot_id)?;
            if kind.is_free() {
                continue;
            }
            let (bytes, kind) = page.peek(slot_id)?;
            let outcome = match kind {
                RecordKind::BigOne => {
                    let handle = handle_from_bytes(bytes);
                    let resolved = long_buf.fetch(&*files, handle)?;
                    sink.put_record(resolved)
                }
                _ => sink.put_record(bytes),
            };
            match outcome {
                PutRecord::Ok => {}
                PutRecord::Stop => return Ok(()),
                PutRecord::Error(msg) => return Err(SortError::Producer(msg)),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tempfile_provisioner::FsBackend;

    struct VecSink {
        records: Vec<Vec<u8>>,
        stop_after: Option<usize>,
    }

    impl RecordSink for VecSink {
        fn put_record(&mut self, record: &[u8]) -> PutRecord {
            self.records.push(record.to_vec());
            if self.stop_after.map(|n| self.records.len() >= n).unwrap_or(false) {
                return PutRecord::Stop;
            }
            PutRecord::Ok
        }
    }

    /// Writes `records` into `volume` as one run, exactly the page-filling
    /// loop `run_generator::flush` uses, and returns the page count.
    fn write_run(
        config: &SortConfig,
        files: &mut FsBackend,
        volume: VolumeId,
        records: &[(Vec<u8>, RecordKind)],
    ) -> u32 {
        let mut page_buf = vec![0u8; config.page_size];
        {
            let mut page = SlottedPage::from_bytes(&mut page_buf).unwrap();
            page.init(AnchorPolicy::Anchored, config.alignment as u16).unwrap();
        }
        let mut pages_written = 0u32;
        for (bytes, kind) in records {
            pages_written += write_record_into_run(config, files, volume, &mut page_buf, bytes, *kind).unwrap();
        }
        let live = SlottedPage::from_bytes(&mut page_buf).unwrap().live_record_count();
        if live > 0 {
            let page_no = files.allocate_pages(volume, 1).unwrap();
            let vpid = files.find_nth_page(volume, page_no).unwrap();
            files.copy_from_area(vpid, 0, &page_buf).unwrap();
            pages_written += 1;
        }
        pages_written
    }

    fn int_cmp(a: &[u8], b: &[u8]) -> Ordering {
        i32::from_le_bytes(a.try_into().unwrap()).cmp(&i32::from_le_bytes(b.try_into().unwrap()))
    }

    #[test]
    fn copy_run_verbatim_preserves_bytes_across_pages() {
        let config = SortConfig::default_config();
        let mut files = FsBackend::new(config.page_size).unwrap();
        let in_volume = files.create_temp(4).unwrap();
        let out_volume = files.create_temp(4).unwrap();

        let records: Vec<(Vec<u8>, RecordKind)> =
            (0..20i32).map(|v| (v.to_le_bytes().to_vec(), RecordKind::Home)).collect();
        let num_pages = write_run(&config, &mut files, in_volume, &records);

        let copied = copy_run_verbatim(&config, &mut files, in_volume, 0, num_pages, out_volume).unwrap();
        assert_eq!(copied, num_pages);

        let mut long_buf = LongRecordBuffer::new();
        let out = read_run_records(&config, &mut files, out_volume, 0, copied, &mut long_buf).unwrap();
        let values: Vec<i32> = out.iter().map(|(b, _)| i32::from_le_bytes(b.as_slice().try_into().unwrap())).collect();
        assert_eq!(values, (0..20).collect::<Vec<i32>>());
    }

    #[test]
    fn merge_contributions_interleaves_two_sorted_runs_with_eliminate() {
        let config = SortConfig::default_config();
        let mut files = FsBackend::new(config.page_size).unwrap();
        let mut provisioner = TempFileProvisioner::new(3);
        let vol_a = provisioner.create_if_absent(&mut files, 0, 4).unwrap();
        let vol_b = provisioner.create_if_absent(&mut files, 1, 4).unwrap();
        let out_vol = provisioner.create_if_absent(&mut files, 2, 4).unwrap();

        let run_a: Vec<(Vec<u8>, RecordKind)> =
            [1, 3, 3, 5].iter().map(|v: &i32| (v.to_le_bytes().to_vec(), RecordKind::Home)).collect();
        let run_b: Vec<(Vec<u8>, RecordKind)> =
            [2, 3, 4].iter().map(|v: &i32| (v.to_le_bytes().to_vec(), RecordKind::Home)).collect();
        let pages_a = write_run(&config, &mut files, vol_a, &run_a);
        let pages_b = write_run(&config, &mut files, vol_b, &run_b);

        let contributions = [(0usize, 0u32, pages_a), (1usize, 0u32, pages_b)];
        let mut cmp = int_cmp;
        let pages_written =
            merge_contributions(&config, &mut files, &provisioner, &mut cmp, &contributions, out_vol).unwrap();

        let mut long_buf = LongRecordBuffer::new();
        let merged = read_run_records(&config, &mut files, out_vol, 0, pages_written, &mut long_buf).unwrap();
        let values: Vec<i32> = merged.iter().map(|(b, _)| i32::from_le_bytes(b.as_slice().try_into().unwrap())).collect();
        assert_eq!(values, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn merge_contributions_link_keeps_every_duplicate() {
        let mut config = SortConfig::default_config();
        config.duplicate_policy = DuplicatePolicy::Link;
        let mut files = FsBackend::new(config.page_size).unwrap();
        let mut provisioner = TempFileProvisioner::new(3);
        let vol_a = provisioner.create_if_absent(&mut files, 0, 4).unwrap();
        let vol_b = provisioner.create_if_absent(&mut files, 1, 4).unwrap();
        let out_vol = provisioner.create_if_absent(&mut files, 2, 4).unwrap();

        let run_a: Vec<(Vec<u8>, RecordKind)> =
            [1, 3].iter().map(|v: &i32| (v.to_le_bytes().to_vec(), RecordKind::Home)).collect();
        let run_b: Vec<(Vec<u8>, RecordKind)> =
            [3, 3].iter().map(|v: &i32| (v.to_le_bytes().to_vec(), RecordKind::Home)).collect();
        let pages_a = write_run(&config, &mut files, vol_a, &run_a);
        let pages_b = write_run(&config, &mut files, vol_b, &run_b);

        let contributions = [(0usize, 0u32, pages_a), (1usize, 0u32, pages_b)];
        let mut cmp = int_cmp;
        let pages_written =
            merge_contributions(&config, &mut files, &provisioner, &mut cmp, &contributions, out_vol).unwrap();

        let mut long_buf = LongRecordBuffer::new();
        let merged = read_run_records(&config, &mut files, out_vol, 0, pages_written, &mut long_buf).unwrap();
        let values: Vec<i32> = merged.iter().map(|(b, _)| i32::from_le_bytes(b.as_slice().try_into().unwrap())).collect();
        assert_eq!(values, vec![1, 3, 3, 3]);
    }

    #[test]
    fn merge_preserves_overflow_handles_without_reinlining() {
        let config = SortConfig::default_config();
        let mut files = FsBackend::new(config.page_size).unwrap();
        let overflow_volume = files.create_temp(8).unwrap();
        let long_record = vec![5u8; 4 * config.page_size];
        let handle = files.insert(overflow_volume, &long_record).unwrap();

        let mut provisioner = TempFileProvisioner::new(3);
        let vol_a = provisioner.create_if_absent(&mut files, 0, 4).unwrap();
        let vol_b = provisioner.create_if_absent(&mut files, 1, 4).unwrap();
        let out_vol = provisioner.create_if_absent(&mut files, 2, 4).unwrap();

        let pages_a = write_run(
            &config,
            &mut files,
            vol_a,
            &[(crate::run_generator::handle_bytes(handle), RecordKind::BigOne)],
        );
        let pages_b = write_run(&config, &mut files, vol_b, &[(vec![9u8; 4], RecordKind::Home)]);

        let contributions = [(0usize, 0u32, pages_a), (1usize, 0u32, pages_b)];
        let mut cmp = |a: &[u8], b: &[u8]| a[0].cmp(&b[0]);
        let pages_written =
            merge_contributions(&config, &mut files, &provisioner, &mut cmp, &contributions, out_vol).unwrap();

        let mut long_buf = LongRecordBuffer::new();
        let merged = read_run_records(&config, &mut files, out_vol, 0, pages_written, &mut long_buf).unwrap();
        assert_eq!(merged.len(), 2);
        // 5 < 9, so the long (overflow) record comes first.
        assert_eq!(merged[0].0.len(), 4 * config.page_size);
        assert_eq!(merged[0].1, Some(handle));
        assert_eq!(merged[1].0, vec![9u8; 4]);
        assert_eq!(merged[1].1, None);
    }

    #[test]
    fn stream_final_run_honors_put_record_stop() {
        let config = SortConfig::default_config();
        let mut files = FsBackend::new(config.page_size).unwrap();
        let volume = files.create_temp(4).unwrap();
        let records: Vec<(Vec<u8>, RecordKind)> =
            [1, 2, 3].iter().map(|v: &i32| (v.to_le_bytes().to_vec(), RecordKind::Home)).collect();
        let num_pages = write_run(&config, &mut files, volume, &records);

        let run = FinalRun { volume, start_page: 0, num_pages };
        let mut sink = VecSink { records: Vec::new(), stop_after: Some(1) };
        stream_final_run(&config, &mut files, &mut sink, &run).unwrap();

        assert_eq!(sink.records.len(), 1);
        assert_eq!(i32::from_le_bytes(sink.records[0].as_slice().try_into().unwrap()), 1);
    }
}
