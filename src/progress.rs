//! Progress-callback trait for migration events.
//!
//! Inject an [`Arc<dyn MigrationProgressCallback>`] via
//! [`crate::config::MigrationConfigBuilder::progress_callback`] to receive
//! events as the run scans, converts and rewrites.
//!
//! # Example
//!
//! ```rust
//! use webp_migrate::{FileOutcome, MigrationConfig, MigrationProgressCallback};
//! use std::path::Path;
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     converted: AtomicUsize,
//! }
//!
//! impl MigrationProgressCallback for CountingCallback {
//!     fn on_file_done(&self, _index: usize, _total: usize, _path: &Path, outcome: FileOutcome) {
//!         if outcome == FileOutcome::Converted {
//!             self.converted.fetch_add(1, Ordering::SeqCst);
//!         }
//!     }
//! }
//!
//! let config = MigrationConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { converted: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::{FileOutcome, MigrationStats};
use std::path::Path;
use std::sync::Arc;

/// Called by the migration as it processes files and tables.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. `index` values are 1-based.
pub trait MigrationProgressCallback: Send + Sync {
    /// Called once after the upload root has been scanned.
    fn on_scan_complete(&self, total_files: usize) {
        let _ = total_files;
    }

    /// Called before a file is examined.
    fn on_file_start(&self, index: usize, total: usize, path: &Path) {
        let _ = (index, total, path);
    }

    /// Called when a file was converted, skipped or mapped.
    fn on_file_done(&self, index: usize, total: usize, path: &Path, outcome: FileOutcome) {
        let _ = (index, total, path, outcome);
    }

    /// Called when a file failed to convert. The original is left untouched.
    fn on_file_error(&self, index: usize, total: usize, path: &Path, error: &str) {
        let _ = (index, total, path, error);
    }

    /// Called after a target's rows were fetched.
    fn on_target_start(&self, table: &str, rows: usize) {
        let _ = (table, rows);
    }

    /// Called for every row that was (or in dry-run, would be) written back.
    fn on_row_updated(&self, table: &str, id: &str) {
        let _ = (table, id);
    }

    /// Called once at the end of a successful run.
    fn on_migration_complete(&self, stats: &MigrationStats) {
        let _ = stats;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl MigrationProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::MigrationConfig`].
pub type ProgressCallback = Arc<dyn MigrationProgressCallback>;
