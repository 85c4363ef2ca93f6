//! Record-type tagging for slotted-page slots.
//!
//! Each slot in a [`crate::storage::page::SlottedPage`] carries a record
//! type alongside its offset and length. `Home` and `BigOne` are the only
//! kinds this crate's own run generator and merge driver ever write; the
//! rest exist because the slotted-page codec is a general page format,
//! shared with the rest of a host database, rather than a sort-only
//! layout.

use crate::error::{Result, SortError};

/// The type tag stored in a slot's directory entry.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RecordKind {
    /// An ordinary record stored entirely within this page.
    Home = 0x00,
    /// A stub whose payload is a fixed-size overflow handle; the real
    /// record lives in the overflow file.
    BigOne = 0x01,
    /// The slot is free; its space is reused by a future insert in
    /// preference to appending a new slot.
    DeletedWillReuse = 0x02,
    /// The slot is free but its space is not reclaimed until the next
    /// compaction.
    MarkDeleted = 0x03,
    /// The slot's content moved elsewhere; reserved for host reuse of the
    /// page format, unused by this crate's own code paths.
    Relocation = 0x04,
    /// The slot is the new home of a relocated record.
    NewHome = 0x05,
    /// The slot reserves an address without content yet assigned.
    AssignAddress = 0x06,
}

impl RecordKind {
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0x00 => Ok(Self::Home),
            0x01 => Ok(Self::BigOne),
            0x02 => Ok(Self::DeletedWillReuse),
            0x03 => Ok(Self::MarkDeleted),
            0x04 => Ok(Self::Relocation),
            0x05 => Ok(Self::NewHome),
            0x06 => Ok(Self::AssignAddress),
            other => Err(SortError::Corruption(format!(
                "unknown record kind: 0x{other:02X}"
            ))),
        }
    }

    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Slots in either deleted state hold no live payload.
    pub fn is_free(self) -> bool {
        matches!(self, Self::DeletedWillReuse | Self::MarkDeleted)
    }
}
