//! The indexed in-memory sort: natural-run detection with flip-in-place
//! run reversal and a stack-based pairwise merge.
//!
//! Operates purely on the pointer array — arena payload bytes are never
//! moved, only read for comparison. A long record is flushed as its own
//! run the moment the run generator sees it, so by the time a batch
//! reaches this module every pointer refers to an inline record; overflow
//! dereferencing only happens later, during merge.

use crate::arena::{Arena, NO_NEXT};
use crate::callbacks::Comparator;
use crate::config::DuplicatePolicy;
use std::cmp::Ordering;

/// One run on the merge stack: `[start, stop)` into whichever of the two
/// ping-pong buffers is currently "live", ascending.
struct Srun {
    start: usize,
    stop: usize,
    tree_depth: u32,
}

/// Sorts `pointers` (arena slot indices) ascending by `cmp`, applying
/// `policy` to equal-key pairs, and returns the number of entries still
/// live at the front of `pointers` after duplicate handling. Entries past
/// the returned length are stale and must not be flushed.
pub fn sort_pointers(
    pointers: &mut Vec<u32>,
    arena: &mut Arena,
    cmp: &mut dyn Comparator,
    policy: DuplicatePolicy,
) -> usize {
    if pointers.len() <= 1 {
        return pointers.len();
    }

    let mut runs = detect_and_flip_runs(pointers, arena, cmp);
    let mut scratch = pointers.clone();
    let mut reading_from_primary = true;

    // Stack-based merge: push runs one at a time, collapsing equal-depth
    // pairs eagerly, then drain whatever remains.
    let mut stack: Vec<Srun> = Vec::new();
    for run in runs.drain(..) {
        stack.push(run);
        while stack.len() >= 2 {
            let top = &stack[stack.len() - 1];
            let below = &stack[stack.len() - 2];
            if top.tree_depth != below.tree_depth {
                break;
            }
            let b = stack.pop().unwrap();
            let a = stack.pop().unwrap();
            let (src, dst): (&mut Vec<u32>, &mut Vec<u32>) = if reading_from_primary {
                (&mut *pointers, &mut scratch)
            } else {
                (&mut scratch, &mut *pointers)
            };
            let merged = merge_runs(&a, &b, src, dst, arena, cmp);
            reading_from_primary = !reading_from_primary;
            stack.push(merged);
        }
    }
    while stack.len() >= 2 {
        let b = stack.pop().unwrap();
        let a = stack.pop().unwrap();
        let (src, dst): (&mut Vec<u32>, &mut Vec<u32>) = if reading_from_primary {
            (&mut *pointers, &mut scratch)
        } else {
            (&mut scratch, &mut *pointers)
        };
        let merged = merge_runs(&a, &b, src, dst, arena, cmp);
        reading_from_primary = !reading_from_primary;
        stack.push(merged);
    }

    if !reading_from_primary {
        *pointers = scratch;
    }

    apply_duplicate_policy(pointers, arena, cmp, policy)
}

/// Reverses a weakly-descending slice so it reads ascending, without
/// disturbing the relative order of any tied (equal-key) records within
/// it: equal keys are adjacent in a weakly-monotone run, so they are
/// grouped into blocks first, the block order is reversed, and each
/// block's internal order — which is encounter order — is left alone.
/// A plain `slice::reverse` would flip tied pairs too, handing the
/// duplicate-policy pass the wrong keeper.
fn stable_reverse_descending(pointers: &mut [u32], arena: &Arena, cmp: &mut dyn Comparator) {
    let n = pointers.len();
    let mut blocks: Vec<(usize, usize)> = Vec::new();
    let mut i = 0;
    while i < n {
        let mut j = i + 1;
        while j < n
            && cmp.compare(arena.record_bytes(pointers[i]), arena.record_bytes(pointers[j]))
                == Ordering::Equal
        {
            j += 1;
        }
        blocks.push((i, j));
        i = j;
    }

    let original: Vec<u32> = pointers.to_vec();
    let mut out = 0;
    for &(start, end) in blocks.iter().rev() {
        let len = end - start;
        pointers[out..out + len].copy_from_slice(&original[start..end]);
        out += len;
    }
}

/// Scans left to right, closing each maximal weakly-monotone run and
/// flipping it in place if it was discovered descending so every run
/// this function returns is ascending in `pointers`, with tied records
/// inside a flipped run kept in their original encounter order.
fn detect_and_flip_runs(pointers: &mut [u32], arena: &Arena, cmp: &mut dyn Comparator) -> Vec<Srun> {
    let n = pointers.len();
    let mut runs = Vec::new();
    let mut start = 0usize;
    while start < n {
        let mut end = start + 1;
        if end < n {
            let first_cmp = cmp.compare(
                arena.record_bytes(pointers[start]),
                arena.record_bytes(pointers[end]),
            );
            let descending = first_cmp == Ordering::Greater;
            end += 1;
            while end < n {
                let c = cmp.compare(
                    arena.record_bytes(pointers[end - 1]),
                    arena.record_bytes(pointers[end]),
                );
                let continues = if descending {
                    c != Ordering::Less
                } else {
                    c != Ordering::Greater
                };
                if !continues {
                    break;
                }
                end += 1;
            }
            if descending {
                stable_reverse_descending(&mut pointers[start..end], arena, cmp);
            }
        }
        runs.push(Srun {
            start,
            stop: end,
            tree_depth: 0,
        });
        start = end;
    }
    runs
}

/// Merges two adjacent ascending runs from `src` into `dst` at the same
/// index range, returning the combined run with an incremented depth.
/// Equal keys are not resolved here; they land adjacent in `dst` and
/// `apply_duplicate_policy` handles them in one pass afterward.
fn merge_runs(
    a: &Srun,
    b: &Srun,
    src: &[u32],
    dst: &mut [u32],
    arena: &Arena,
    cmp: &mut dyn Comparator,
) -> Srun {
    debug_assert_eq!(a.stop, b.start);
    let tree_depth = a.tree_depth.max(b.tree_depth) + 1;

    if cmp.compare(
        arena.record_bytes(src[a.stop - 1]),
        arena.record_bytes(src[b.start]),
    ) != Ordering::Greater
    {
        dst[a.start..b.stop].copy_from_slice(&src[a.start..b.stop]);
        return Srun {
            start: a.start,
            stop: b.stop,
            tree_depth,
        };
    }

    let (mut i, mut j, mut k) = (a.start, b.start, a.start);
    while i < a.stop && j < b.stop {
        let ord = cmp.compare(arena.record_bytes(src[i]), arena.record_bytes(src[j]));
        if ord == Ordering::Greater {
            dst[k] = src[j];
            j += 1;
        } else {
            dst[k] = src[i];
            i += 1;
        }
        k += 1;
    }
    if i < a.stop {
        dst[k..b.stop].copy_from_slice(&src[i..a.stop]);
    }
    if j < b.stop {
        dst[k..b.stop].copy_from_slice(&src[j..b.stop]);
    }
    Srun {
        start: a.start,
        stop: b.stop,
        tree_depth,
    }
}

/// Walks the fully-sorted pointer array once, resolving every adjacent
/// equal-key run per `policy`, and compacts `pointers` down to only the
/// entries that remain independently live. Returns the new length.
fn apply_duplicate_policy(
    pointers: &mut Vec<u32>,
    arena: &mut Arena,
    cmp: &mut dyn Comparator,
    policy: DuplicatePolicy,
) -> usize {
    if pointers.is_empty() {
        return 0;
    }
    let mut write = 1usize;
    for read in 1..pointers.len() {
        let keeper = pointers[write - 1];
        let candidate = pointers[read];
        let equal = cmp.compare(arena.record_bytes(keeper), arena.record_bytes(candidate)) == Ordering::Equal;
        if !equal {
            pointers[write] = candidate;
            write += 1;
            continue;
        }
        match policy {
            DuplicatePolicy::Eliminate => {
                arena.slot_mut(candidate).eliminated = true;
            }
            DuplicatePolicy::Link => {
                let mut tail = keeper;
                while arena.slot(tail).next_index != NO_NEXT {
                    tail = arena.slot(tail).next_index;
                }
                arena.slot_mut(tail).next_index = candidate;
            }
        }
    }
    pointers.truncate(write);
    write
}
