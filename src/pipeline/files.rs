//! File phase: turn scanned records into `.webp` files and a URL mapping.
//!
//! Records are handled one at a time in scan order. Decoding and encoding
//! are CPU-bound and run on `spawn_blocking`; the next file is not started
//! until the current one is written.

use crate::config::MigrationConfig;
use crate::error::ConversionError;
use crate::output::{FileOutcome, MigrationStats};
use crate::pipeline::encode::encode_webp;
use crate::pipeline::rewrite::UrlMapping;
use crate::pipeline::scan::FileRecord;
use crate::progress::ProgressCallback;
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Result of the file phase.
#[derive(Debug, Default)]
pub struct FilePhase {
    /// Old → new URL for every source whose `.webp` exists (or would exist).
    pub mapping: UrlMapping,
    /// Originals converted in this run; the only candidates for deletion.
    pub converted_sources: Vec<PathBuf>,
    /// File counters; database and cleanup counters are left at zero.
    pub stats: MigrationStats,
}

/// Process every record and build the mapping.
pub async fn convert_files(
    records: &[FileRecord],
    config: &MigrationConfig,
    progress: Option<&ProgressCallback>,
) -> FilePhase {
    let total = records.len();
    let mut phase = FilePhase::default();
    phase.stats.scanned = total;
    let mut claimed: HashSet<&Path> = HashSet::with_capacity(total);

    for (i, record) in records.iter().enumerate() {
        let index = i + 1;
        if let Some(cb) = progress {
            cb.on_file_start(index, total, &record.source);
        }

        let outcome = if !claimed.insert(record.target.as_path()) {
            warn!(
                "Skipping {}: {} is already claimed by another source",
                record.source.display(),
                record.target.display()
            );
            Ok(FileOutcome::Conflict)
        } else {
            process_record(record, config).await
        };

        match outcome {
            Ok(outcome) => {
                phase.stats.record(outcome);
                if outcome.is_mapped() {
                    phase.mapping.insert(&record.old_url, &record.new_url);
                }
                if outcome == FileOutcome::Converted {
                    phase.converted_sources.push(record.source.clone());
                }
                if let Some(cb) = progress {
                    cb.on_file_done(index, total, &record.source, outcome);
                }
            }
            Err(e) => {
                warn!("Failed to convert {}: {}", record.source.display(), e);
                phase.stats.failed += 1;
                if let Some(cb) = progress {
                    cb.on_file_error(index, total, &record.source, &e.to_string());
                }
            }
        }
    }

    phase.stats.mappings = phase.mapping.len();
    info!(
        "Files: {} {}, {} already converted, {} failed, {} mapping(s)",
        phase.stats.converted,
        if config.dry_run { "to convert" } else { "converted" },
        phase.stats.skipped,
        phase.stats.failed,
        phase.stats.mappings
    );
    phase
}

async fn process_record(
    record: &FileRecord,
    config: &MigrationConfig,
) -> Result<FileOutcome, ConversionError> {
    let target_exists = tokio::fs::try_exists(&record.target)
        .await
        .map_err(|e| ConversionError::Io(e.to_string()))?;

    if target_exists {
        debug!("{} already has {}", record.old_url, record.new_url);
        return Ok(FileOutcome::AlreadyConverted);
    }
    if config.skip_files {
        debug!("No .webp for {}", record.old_url);
        return Ok(FileOutcome::Missing);
    }
    if config.dry_run {
        debug!("[dry-run] would convert {}", record.source.display());
        return Ok(FileOutcome::WouldConvert);
    }

    convert_file(&record.source, &record.target, config.file_quality).await?;
    debug!("Converted {} -> {}", record.old_url, record.new_url);
    Ok(FileOutcome::Converted)
}

/// Read `source`, encode it and write `target` atomically.
pub async fn convert_file(source: &Path, target: &Path, quality: f32) -> Result<(), ConversionError> {
    let bytes = tokio::fs::read(source)
        .await
        .map_err(|e| ConversionError::Io(e.to_string()))?;

    let target = target.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let webp = encode_webp(&bytes, quality)?;
        write_atomic(&target, &webp)
    })
    .await
    .map_err(|e| ConversionError::Io(format!("conversion task panicked: {e}")))?
}

/// Write to a temp file in the target's directory, then rename over the target.
fn write_atomic(target: &Path, data: &[u8]) -> Result<(), ConversionError> {
    let parent = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let io = |e: std::io::Error| ConversionError::Io(format!("{}: {}", target.display(), e));

    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(io)?;
    tmp.write_all(data).map_err(io)?;
    tmp.as_file().sync_all().map_err(io)?;
    tmp.persist(target).map_err(|e| io(e.error))?;
    Ok(())
}
