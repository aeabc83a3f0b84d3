//! Run results: per-file outcomes and the summary printed at the end.

use serde::{Deserialize, Serialize};

/// What happened to one scanned file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileOutcome {
    /// Re-encoded and written in this run.
    Converted,
    /// A `.webp` counterpart already existed; its mapping was reused.
    AlreadyConverted,
    /// Dry run: would have been converted.
    WouldConvert,
    /// `--skip-files` and no `.webp` counterpart exists yet.
    Missing,
    /// Another source in this run already claimed the same `.webp` path.
    Conflict,
}

impl FileOutcome {
    /// Whether this outcome registers an entry in the URL mapping.
    pub fn is_mapped(self) -> bool {
        matches!(
            self,
            FileOutcome::Converted | FileOutcome::AlreadyConverted | FileOutcome::WouldConvert
        )
    }
}

/// Counts reported at the end of a run.
///
/// In dry-run mode `converted` and `rows_updated` are "would" counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStats {
    pub dry_run: bool,
    /// Raster images found under the upload root.
    pub scanned: usize,
    pub converted: usize,
    /// Files whose `.webp` counterpart already existed.
    pub skipped: usize,
    pub failed: usize,
    /// Sources with no `.webp` counterpart in `--skip-files` mode.
    pub missing: usize,
    pub conflicts: usize,
    /// Entries in the old → new URL mapping.
    pub mappings: usize,
    pub rows_updated: usize,
    pub inline_converted: usize,
    pub inline_failed: usize,
    pub originals_deleted: usize,
    pub duration_ms: u64,
}

impl MigrationStats {
    /// Record one file outcome.
    pub fn record(&mut self, outcome: FileOutcome) {
        match outcome {
            FileOutcome::Converted | FileOutcome::WouldConvert => self.converted += 1,
            FileOutcome::AlreadyConverted => self.skipped += 1,
            FileOutcome::Missing => self.missing += 1,
            FileOutcome::Conflict => self.conflicts += 1,
        }
    }
}
