//! The slotted page codec.
//!
//! Lays out variable-length records in a fixed-size page: a small header,
//! a record area growing upward from the header, and a slot directory
//! growing downward from the page's tail. This is the format every run
//! page and every merge-section page uses on disk.
//!
//! Each slot directory entry holds a three-field `{offset, length, kind}`
//! record, and every offset is driven through an explicit `alignment`
//! rather than a fixed stride.

use crate::error::{Result, SortError};
use crate::storage::record::RecordKind;
use std::convert::TryInto;

/// Bytes reserved for the page header: eight `u16` fields (slot count,
/// live record count, anchor policy, alignment, wasted-alignment bytes,
/// total free bytes, contiguous free bytes, free-area offset).
pub const PAGE_HEADER_SIZE: usize = 16;

/// Bytes occupied by one slot directory entry: offset, length, kind byte,
/// and one reserved padding byte.
pub const SLOT_SIZE: usize = 6;

const SLOT_COUNT_OFFSET: usize = 0;
const LIVE_COUNT_OFFSET: usize = 2;
const ANCHOR_OFFSET: usize = 4;
const ALIGNMENT_OFFSET: usize = 6;
const WASTE_OFFSET: usize = 8;
const TOTAL_FREE_OFFSET: usize = 10;
const CONTIG_FREE_OFFSET: usize = 12;
const FREE_AREA_OFFSET: usize = 14;

/// Governs whether slots are renumbered or kept stable across compaction
/// and reuse. The sort core always uses `Anchored`: a slot id, once
/// assigned, never moves, which is what lets the merge driver hold a
/// stable `(page, slot)` cursor while records are read back in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorPolicy {
    Anchored = 0,
    AnchoredDontReuseSlots = 1,
}

impl AnchorPolicy {
    fn from_u16(v: u16) -> Result<Self> {
        match v {
            0 => Ok(Self::Anchored),
            1 => Ok(Self::AnchoredDontReuseSlots),
            other => Err(SortError::Corruption(format!(
                "unknown anchor policy: {other}"
            ))),
        }
    }
}

/// Outcome of [`SlottedPage::insert`]. Running out of contiguous-and-total
/// space is an ordinary, expected control-flow signal (the run generator
/// and merge driver both react to it by flushing), not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(u16),
    NotEnoughSpace,
}

/// Outcome of [`SlottedPage::copy_into`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    /// The record was copied; this many bytes were written.
    Copied(usize),
    /// The destination buffer was too small; this is the length needed.
    NeedsLen(usize),
}

/// A zero-copy view over one page-sized buffer.
#[derive(Debug)]
pub struct SlottedPage<'a> {
    data: &'a mut [u8],
}

impl<'a> SlottedPage<'a> {
    pub fn from_bytes(data: &'a mut [u8]) -> Result<Self> {
        if data.len() < PAGE_HEADER_SIZE + SLOT_SIZE {
            return Err(SortError::Corruption(
                "page smaller than header plus one slot".into(),
            ));
        }
        Ok(Self { data })
    }

    /// Zeroes the header and slot directory and positions the record area
    /// right after the header, rounded up to `alignment`.
    pub fn init(&mut self, anchor: AnchorPolicy, alignment: u16) -> Result<()> {
        self.data[..PAGE_HEADER_SIZE].fill(0);
        self.write_u16(ANCHOR_OFFSET, anchor as u16);
        self.write_u16(ALIGNMENT_OFFSET, alignment);

        let page_len = self.data.len() as u16;
        let header_end = PAGE_HEADER_SIZE as u16;
        let aligned = align_up(header_end, alignment);
        let waste = aligned - header_end;

        self.write_u16(WASTE_OFFSET, waste);
        self.write_u16(FREE_AREA_OFFSET, aligned);
        let free = page_len - aligned;
        self.write_u16(TOTAL_FREE_OFFSET, free);
        self.write_u16(CONTIG_FREE_OFFSET, free);
        Ok(())
    }

    pub fn slot_count(&self) -> u16 {
        self.read_u16(SLOT_COUNT_OFFSET)
    }

    pub fn live_record_count(&self) -> u16 {
        self.read_u16(LIVE_COUNT_OFFSET)
    }

    pub fn anchor_policy(&self) -> Result<AnchorPolicy> {
        AnchorPolicy::from_u16(self.read_u16(ANCHOR_OFFSET))
    }

    pub fn alignment(&self) -> u16 {
        self.read_u16(ALIGNMENT_OFFSET)
    }

    pub fn wasted_alignment(&self) -> u16 {
        self.read_u16(WASTE_OFFSET)
    }

    pub fn total_free(&self) -> u16 {
        self.read_u16(TOTAL_FREE_OFFSET)
    }

    pub fn contiguous_free(&self) -> u16 {
        self.read_u16(CONTIG_FREE_OFFSET)
    }

    pub fn free_area_offset(&self) -> u16 {
        self.read_u16(FREE_AREA_OFFSET)
    }

    fn slot_entry_offset(&self, slot_id: u16) -> usize {
        self.data.len() - (slot_id as usize + 1) * SLOT_SIZE
    }

    fn read_slot(&self, slot_id: u16) -> Result<(u16, u16, RecordKind)> {
        if slot_id >= self.slot_count() {
            return Err(SortError::Corruption(format!(
                "slot {slot_id} does not exist on page"
            )));
        }
        let at = self.slot_entry_offset(slot_id);
        let offset = u16::from_le_bytes(self.data[at..at + 2].try_into().unwrap());
        let length = u16::from_le_bytes(self.data[at + 2..at + 4].try_into().unwrap());
        let kind = RecordKind::from_byte(self.data[at + 4])?;
        Ok((offset, length, kind))
    }

    fn write_slot(&mut self, slot_id: u16, offset: u16, length: u16, kind: RecordKind) {
        let at = self.slot_entry_offset(slot_id);
        self.data[at..at + 2].copy_from_slice(&offset.to_le_bytes());
        self.data[at + 2..at + 4].copy_from_slice(&length.to_le_bytes());
        self.data[at + 4] = kind.to_byte();
        self.data[at + 5] = 0;
    }

    /// Largest record this page could ever hold, fresh and empty.
    pub fn payload_capacity(&self) -> usize {
        self.data
            .len()
            .saturating_sub(PAGE_HEADER_SIZE)
            .saturating_sub(SLOT_SIZE)
    }

    /// Inserts `record`, reclaiming a `DeletedWillReuse` slot before
    /// appending a fresh one, and compacting in place if contiguous space
    /// is insufficient but total space suffices.
    pub fn insert(&mut self, record: &[u8]) -> Result<InsertOutcome> {
        self.insert_as(record, RecordKind::Home)
    }

    /// Same as [`Self::insert`], but writes the slot with `kind` instead
    /// of defaulting to [`RecordKind::Home`]. The sort core uses this to
    /// write `BigOne` stubs (an 8-byte overflow handle standing in for a
    /// record too large for any page) into run and merge-section pages.
    pub fn insert_as(&mut self, record: &[u8], kind: RecordKind) -> Result<InsertOutcome> {
        if record.len() > u16::MAX as usize {
            return Err(SortError::InvalidArgument(
                "record exceeds slotted page's 16-bit length field".into(),
            ));
        }
        let alignment = self.alignment();
        let record_len = record.len() as u16;
        let padded = align_up(record_len, alignment);
        let waste = padded - record_len;

        let reusable = self.find_reusable_slot();
        let needs_new_slot = reusable.is_none();
        let space_needed = padded + if needs_new_slot { SLOT_SIZE as u16 } else { 0 };

        if space_needed > self.total_free() {
            return Ok(InsertOutcome::NotEnoughSpace);
        }
        if space_needed > self.contiguous_free() {
            self.compact()?;
            if space_needed > self.contiguous_free() {
                return Ok(InsertOutcome::NotEnoughSpace);
            }
        }

        let write_at = self.free_area_offset();
        self.data[write_at as usize..write_at as usize + record.len()].copy_from_slice(record);
        if padded > record_len {
            let pad_start = write_at as usize + record.len();
            self.data[pad_start..pad_start + (padded - record_len) as usize].fill(0);
        }

        let slot_id = match reusable {
            Some(id) => id,
            None => {
                let id = self.slot_count();
                self.write_u16(SLOT_COUNT_OFFSET, id + 1);
                id
            }
        };
        self.write_slot(slot_id, write_at, record_len, kind);

        self.write_u16(LIVE_COUNT_OFFSET, self.live_record_count() + 1);
        self.write_u16(TOTAL_FREE_OFFSET, self.total_free() - space_needed);
        self.write_u16(CONTIG_FREE_OFFSET, self.contiguous_free() - space_needed);
        self.write_u16(FREE_AREA_OFFSET, write_at + padded);
        self.write_u16(WASTE_OFFSET, self.wasted_alignment() + waste);

        Ok(InsertOutcome::Inserted(slot_id))
    }

    fn find_reusable_slot(&self) -> Option<u16> {
        for slot_id in 0..self.slot_count() {
            if let Ok((_, _, kind)) = self.read_slot(slot_id) {
                if kind == RecordKind::DeletedWillReuse {
                    return Some(slot_id);
                }
            }
        }
        None
    }

    /// Borrows the record at `slot_id` without copying.
    pub fn peek(&self, slot_id: u16) -> Result<(&[u8], RecordKind)> {
        let (offset, length, kind) = self.read_slot(slot_id)?;
        if kind.is_free() {
            return Err(SortError::Corruption(format!(
                "slot {slot_id} is free, not a live record"
            )));
        }
        let start = offset as usize;
        let end = start + length as usize;
        if end > self.data.len() {
            return Err(SortError::Corruption(
                "record extends past end of page".into(),
            ));
        }
        Ok((&self.data[start..end], kind))
    }

    /// Copies the record at `slot_id` into `dst`; returns the length
    /// needed if `dst` is too small.
    pub fn copy_into(&self, slot_id: u16, dst: &mut [u8]) -> Result<CopyOutcome> {
        let (bytes, _) = self.peek(slot_id)?;
        if dst.len() < bytes.len() {
            return Ok(CopyOutcome::NeedsLen(bytes.len()));
        }
        dst[..bytes.len()].copy_from_slice(bytes);
        Ok(CopyOutcome::Copied(bytes.len()))
    }

    pub fn record_kind(&self, slot_id: u16) -> Result<RecordKind> {
        self.read_slot(slot_id).map(|(_, _, kind)| kind)
    }

    /// Marks a slot free for later reuse by `insert`. The sort core never
    /// calls this on its own write-once run pages; it exists so the codec
    /// is a complete primitive, shared with the rest of a host database's
    /// page format.
    pub fn mark_deleted(&mut self, slot_id: u16, reuse: bool) -> Result<()> {
        let (offset, length, kind) = self.read_slot(slot_id)?;
        if kind.is_free() {
            return Ok(());
        }
        let new_kind = if reuse {
            RecordKind::DeletedWillReuse
        } else {
            RecordKind::MarkDeleted
        };
        self.write_slot(slot_id, offset, length, new_kind);
        self.write_u16(LIVE_COUNT_OFFSET, self.live_record_count() - 1);
        Ok(())
    }

    /// Number of records physically addressable on the page (including
    /// free slots); iterate `0..num_records()` to visit every slot id.
    pub fn num_records(&self) -> u16 {
        self.slot_count()
    }

    /// Rewrites live records bottom-up in ascending offset order,
    /// eliminating fragmentation from reused slots; slot ids are stable.
    /// Tie-break among equal offsets is undefined (can't happen for live
    /// records, since they never overlap).
    pub fn compact(&mut self) -> Result<()> {
        let alignment = self.alignment();
        let slot_count = self.slot_count();

        let mut live: Vec<(u16, u16, u16)> = Vec::with_capacity(slot_count as usize);
        for slot_id in 0..slot_count {
            let (offset, length, kind) = self.read_slot(slot_id)?;
            if !kind.is_free() {
                live.push((offset, length, slot_id));
            }
        }
        live.sort_by_key(|&(offset, _, _)| offset);

        let header_end = PAGE_HEADER_SIZE as u16;
        let mut to_offset = align_up(header_end, alignment);
        let mut waste = to_offset - header_end;
        for (offset, length, slot_id) in live {
            let aligned = align_up(to_offset, alignment);
            waste += aligned - to_offset;
            to_offset = aligned;
            if to_offset != offset {
                let src_start = offset as usize;
                let src_end = src_start + length as usize;
                self.data.copy_within(src_start..src_end, to_offset as usize);
                let (_, _, kind) = self.read_slot(slot_id)?;
                self.write_slot(slot_id, to_offset, length, kind);
            }
            to_offset += length;
        }
        let aligned = align_up(to_offset, alignment);
        waste += aligned - to_offset;
        to_offset = aligned;

        let page_len = self.data.len() as u16;
        let free = page_len - to_offset - slot_count * SLOT_SIZE as u16;
        self.write_u16(FREE_AREA_OFFSET, to_offset);
        self.write_u16(TOTAL_FREE_OFFSET, free);
        self.write_u16(CONTIG_FREE_OFFSET, free);
        self.write_u16(WASTE_OFFSET, waste);
        Ok(())
    }

    fn read_u16(&self, offset: usize) -> u16 {
        u16::from_le_bytes(self.data[offset..offset + 2].try_into().unwrap())
    }

    fn write_u16(&mut self, offset: usize, value: u16) {
        self.data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }
}

fn align_up(value: u16, alignment: u16) -> u16 {
    if alignment <= 1 {
        return value;
    }
    let rem = value % alignment;
    if rem == 0 {
        value
    } else {
        value + (alignment - rem)
    }
}
