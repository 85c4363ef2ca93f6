//! `sort_listfile`: buffer-budget decisions, the state machine, and
//! unconditional resource cleanup.

use crate::arena::NO_NEXT;
use crate::callbacks::{Comparator, PutRecord, RecordSink, RecordSource};
use crate::config::SortConfig;
use crate::error::Result;
use crate::ledger::RunLedger;
use crate::merge::{stream_final_run, FinalRun, MergeState};
use crate::overflow::OverflowAdapter;
use crate::run_generator::{RunGenOutcome, RunGenerator};
use crate::services::{BufferPoolService, OverflowService, PagedFileService};
use crate::tempfile_provisioner::TempFileProvisioner;
use serde::{Deserialize, Serialize};

/// Summary of one `sort_listfile` invocation, returned for diagnostics,
/// minus anything caller-sensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortReport {
    /// Runs flushed to disk during run generation. 0 if everything fit in
    /// the arena and was streamed directly.
    pub tot_runs: u32,
    /// Outer merge passes executed. 0 for `DIRECT_STREAM` and
    /// `RESTREAM_SINGLE`.
    pub merge_passes: u32,
    /// How many temp files per half the orchestrator sized for this sort.
    pub half_files: usize,
}

/// Sorts every record `source` produces and delivers them, in order, to
/// `sink`, honoring `config.duplicate_policy` and `cmp`.
///
/// `estimated_input_pages` is an optional sizing hint (0 if unknown): more
/// estimated pages biases `half_files` upward toward the configured
/// ceiling.
///
/// Every temp file and the overflow file are destroyed before this
/// function returns, on every path including early errors.
pub fn sort_listfile<F, S, K, C>(
    config: &SortConfig,
    files: &mut F,
    source: &mut S,
    sink: &mut K,
    cmp: &mut C,
    estimated_input_pages: u32,
) -> Result<SortReport>
where
    F: PagedFileService + BufferPoolService + OverflowService,
    S: RecordSource,
    K: RecordSink,
    C: Comparator,
{
    let tot_buffers = config.sort_buffer_pages.max(4);
    let arena_capacity_bytes = (tot_buffers - 1) * config.page_size;
    let half_files = compute_half_files(config, tot_buffers, estimated_input_pages);

    let mut provisioner = TempFileProvisioner::new(2 * half_files);
    let mut overflow_adapter = OverflowAdapter::new();
    let mut ledgers: Vec<RunLedger> = (0..half_files).map(|_| RunLedger::new()).collect();

    tracing::debug!(tot_buffers, half_files, "starting sort_listfile");

    let result = run_body(
        config,
        files,
        source,
        sink,
        cmp,
        &mut provisioner,
        &mut overflow_adapter,
        &mut ledgers,
        arena_capacity_bytes,
        half_files,
    );

    let cleanup = cleanup_all(files, &mut provisioner, &mut overflow_adapter);
    if result.is_err() {
        tracing::warn!("sort_listfile failing, resources cleaned up");
    }
    let (tot_runs, merge_passes) = result?;
    cleanup?;
    Ok(SortReport {
        tot_runs,
        merge_passes,
        half_files,
    })
}

#[allow(clippy::too_many_arguments)]
fn run_body<F, S, K, C>(
    config: &SortConfig,
    files: &mut F,
    source: &mut S,
    sink: &mut K,
    cmp: &mut C,
    provisioner: &mut TempFileProvisioner,
    overflow_adapter: &mut OverflowAdapter,
    ledgers: &mut [RunLedger],
    arena_capacity_bytes: usize,
    half_files: usize,
) -> Result<(u32, u32)>
where
    F: PagedFileService + BufferPoolService + OverflowService,
    S: RecordSource,
    K: RecordSink,
    C: Comparator,
{
    let mut run_generator = RunGenerator::new(
        config,
        files,
        provisioner,
        ledgers,
        overflow_adapter,
        arena_capacity_bytes,
    );
    let outcome = run_generator.generate(source, cmp)?;

    match outcome {
        RunGenOutcome::Direct { arena, pointers } => {
            tracing::debug!("direct stream: sort produced zero runs on disk");
            stream_direct(&arena, &pointers, sink)?;
            Ok((0, 0))
        }
        RunGenOutcome::Flushed { tot_runs } if tot_runs <= 1 => {
            tracing::debug!(tot_runs, "restream single: exactly one run on disk");
            let slot = (0..half_files)
                .find(|&s| !ledgers[s].is_empty())
                .expect("one run must exist somewhere");
            let pages = ledgers[slot].peek_first().expect("checked non-empty");
            let volume = provisioner.volume(slot).expect("flushed run has a volume");
            let run = FinalRun {
                volume,
                start_page: 0,
                num_pages: pages,
            };
            stream_final_run(config, files, sink, &run)?;
            Ok((tot_runs, 0))
        }
        RunGenOutcome::Flushed { tot_runs } => {
            tracing::debug!(tot_runs, half_files, "entering merge");
            let mut full_ledgers = Vec::with_capacity(2 * half_files);
            full_ledgers.extend(ledgers.iter().cloned());
            full_ledgers.extend((0..half_files).map(|_| RunLedger::new()));

            let mut merge_state = MergeState::new(full_ledgers, half_files);
            let (final_run, passes) =
                merge_state.run_to_convergence(config, files, provisioner, cmp)?;
            stream_final_run(config, files, sink, &final_run)?;
            Ok((tot_runs, passes))
        }
    }
}

/// Streams an in-memory, already-sorted batch straight to the consumer,
/// following `LINK` duplicate chains in encounter order.
fn stream_direct<K: RecordSink>(
    arena: &crate::arena::Arena,
    pointers: &[u32],
    sink: &mut K,
) -> Result<()> {
    for &p in pointers {
        let mut node = p;
        loop {
            debug_assert!(!arena.slot(node).is_overflow());
            let outcome = sink.put_record(arena.record_bytes(node));
            match outcome {
                PutRecord::Ok => {}
                PutRecord::Stop => return Ok(()),
                PutRecord::Error(msg) => return Err(crate::error::SortError::Producer(msg)),
            }
            match arena.slot(node).next_index {
                NO_NEXT => break,
                next => node = next,
            }
        }
    }
    Ok(())
}

/// Sizes the number of temp files per half: more estimated input pages
/// (hence more expected runs) biases toward more files per half, clamped
/// to the configured floor/ceiling.
fn compute_half_files(config: &SortConfig, tot_buffers: usize, estimated_input_pages: u32) -> usize {
    let estimated_runs = if tot_buffers == 0 {
        0
    } else {
        (estimated_input_pages as usize).div_ceil(tot_buffers)
    };
    (config.half_files_floor + estimated_runs.min(config.half_files_ceiling))
        .clamp(config.half_files_floor, config.half_files_ceiling)
}

fn cleanup_all<B: PagedFileService>(
    files: &mut B,
    provisioner: &mut TempFileProvisioner,
    overflow_adapter: &mut OverflowAdapter,
) -> Result<()> {
    provisioner.destroy_all(files)?;
    overflow_adapter.destroy(files)
}
