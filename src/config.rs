//! Sort engine configuration.
//!
//! This module provides the configuration consumed by the orchestrator.
//! Rather than process-wide globals for page size and tuning parameters,
//! everything here is explicit and passed into [`crate::sort_listfile`]
//! per invocation.
//!
//! # Example
//!
//! ```rust
//! use xsort::SortConfig;
//!
//! let config = SortConfig::default();
//! let small = SortConfig::small_memory();
//! assert!(small.sort_buffer_pages < config.sort_buffer_pages);
//! ```

/// How duplicates discovered by the comparator are handled.
///
/// Applies identically during the internal sort and during merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Drop every record but the first-encountered in each equivalence
    /// class.
    Eliminate,
    /// Keep the first-encountered record ("keeper") and chain later
    /// duplicates to it in encounter order.
    Link,
}

/// Tuning and sizing parameters for one sort invocation.
///
/// `SortConfig` controls the page geometry, the buffer budget, and how many
/// temp files are used per half. Use the presets ([`SortConfig::default`],
/// [`SortConfig::small_memory`], [`SortConfig::large_memory`]) or customize
/// individual fields.
#[derive(Debug, Clone)]
pub struct SortConfig {
    /// Page size in bytes, including the per-page checksum/metadata
    /// trailer. Pin this in tests for deterministic page geometry.
    pub page_size: usize,

    /// Alignment in bytes applied to record offsets within a page. Must be
    /// one of {1, 2, 4, 8} (char/short/int-or-float/long-or-double).
    pub alignment: usize,

    /// Sort-buffer tuning parameter: a page-size-normalized count of pages
    /// the orchestrator targets for the arena. The actual `tot_buffers` is
    /// this value clamped to at least 4.
    pub sort_buffer_pages: usize,

    /// Minimum number of temp files per half.
    pub half_files_floor: usize,

    /// Maximum number of temp files per half.
    pub half_files_ceiling: usize,

    /// Duplicate policy applied when the caller does not override it
    /// per-call.
    pub duplicate_policy: DuplicatePolicy,

    /// Size hint, in pages, used the first time a temp file is created
    /// when no better estimate is available.
    pub default_temp_file_pages: u32,
}

impl SortConfig {
    /// Balanced default: 16 KiB pages, 8-byte alignment, a moderate arena,
    /// and `ELIMINATE` duplicates.
    pub fn default_config() -> Self {
        Self {
            page_size: 16 * 1024,
            alignment: 8,
            sort_buffer_pages: 64,
            half_files_floor: 2,
            half_files_ceiling: 4,
            duplicate_policy: DuplicatePolicy::Eliminate,
            default_temp_file_pages: 32,
        }
    }

    /// A constrained arena, useful for exercising multi-pass merges in
    /// tests without sorting millions of records.
    pub fn small_memory() -> Self {
        Self {
            sort_buffer_pages: 4,
            default_temp_file_pages: 4,
            ..Self::default_config()
        }
    }

    /// A generous arena for bulk sorts where minimizing pass count matters
    /// more than memory footprint.
    pub fn large_memory() -> Self {
        Self {
            sort_buffer_pages: 1024,
            half_files_ceiling: 4,
            default_temp_file_pages: 256,
            ..Self::default_config()
        }
    }

    /// Header size reserved at the front of every slotted page, rounded up
    /// to `alignment` by [`crate::storage::page::SlottedPage::init`].
    pub fn page_header_size(&self) -> usize {
        crate::storage::page::PAGE_HEADER_SIZE
    }

    /// Bytes available to one slot directory entry.
    pub fn slot_size(&self) -> usize {
        crate::storage::page::SLOT_SIZE
    }

    /// Largest record payload that fits an otherwise-empty page:
    /// `page_size - header_size - one_slot_size`.
    pub fn page_payload_max(&self) -> usize {
        self.page_size
            .saturating_sub(self.page_header_size())
            .saturating_sub(self.slot_size())
    }
}

impl Default for SortConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_internally_consistent() {
        let small = SortConfig::small_memory();
        let large = SortConfig::large_memory();
        assert!(small.sort_buffer_pages < large.sort_buffer_pages);
        assert!(small.page_payload_max() > 0);
    }

    #[test]
    fn payload_max_accounts_for_header_and_one_slot() {
        let cfg = SortConfig::default_config();
        assert_eq!(
            cfg.page_payload_max(),
            cfg.page_size - cfg.page_header_size() - cfg.slot_size()
        );
    }
}
