//! Run entry points.
//!
//! [`run`] drives one full migration against PostgreSQL; [`run_with_store`]
//! does the same against any [`RowStore`], which is how tests and previews
//! use an in-memory database.

use crate::config::MigrationConfig;
use crate::error::MigrateError;
use crate::lock::RunLock;
use crate::output::MigrationStats;
use crate::pipeline::files::{self, FilePhase};
use crate::pipeline::rewrite::UrlRewriter;
use crate::pipeline::{cleanup, persist, scan};
use crate::store::{PgStore, RowStore};
use std::time::Instant;
use tracing::{debug, info};

/// Counters from the database phase.
#[derive(Debug, Default, Clone, Copy)]
struct DbPhase {
    rows_updated: usize,
    inline_converted: usize,
    inline_failed: usize,
}

/// Migrate the upload root and rewrite references in PostgreSQL.
///
/// # Errors
/// Returns `Err(MigrateError)` only for fatal errors:
/// - the upload root does not exist
/// - another run holds the lock
/// - at least one URL was mapped but no database URL is configured
/// - the database cannot be reached or a row write fails
///
/// Individual files that fail to convert are counted in
/// [`MigrationStats::failed`] and do not abort the run.
pub async fn run(config: &MigrationConfig) -> Result<MigrationStats, MigrateError> {
    let start = Instant::now();
    let _lock = prepare(config)?;
    let phase = file_phase(config).await?;

    // ── Database ─────────────────────────────────────────────────────────
    let mut db = DbPhase::default();
    if config.skip_db {
        info!("Skipping database phase (--skip-db)");
    } else {
        match config.database_url.as_deref().filter(|u| !u.trim().is_empty()) {
            Some(url) => {
                let mut store = PgStore::connect(url).await?;
                let result = database_phase(&mut store, config, &phase).await;
                store.close().await;
                db = result?;
            }
            None if !phase.mapping.is_empty() => {
                return Err(MigrateError::DatabaseUrlMissing {
                    mappings: phase.mapping.len(),
                });
            }
            None => info!("No URL mappings and no database configured; nothing to rewrite"),
        }
    }

    Ok(finish(config, phase, db, start).await)
}

/// Same as [`run`], rewriting rows in `store` instead of PostgreSQL.
///
/// No database URL is needed; `skip_db` still skips the store entirely.
pub async fn run_with_store<S: RowStore>(
    config: &MigrationConfig,
    store: &mut S,
) -> Result<MigrationStats, MigrateError> {
    let start = Instant::now();
    let _lock = prepare(config)?;
    let phase = file_phase(config).await?;

    let db = if config.skip_db {
        DbPhase::default()
    } else {
        database_phase(store, config, &phase).await?
    };

    Ok(finish(config, phase, db, start).await)
}

/// Check the root and take the lock unless this is a dry run.
fn prepare(config: &MigrationConfig) -> Result<Option<RunLock>, MigrateError> {
    if !config.upload_root.is_dir() {
        return Err(MigrateError::UploadRootNotFound {
            path: config.upload_root.clone(),
        });
    }
    info!(
        "Starting migration of {}{}",
        config.upload_root.display(),
        if config.dry_run { " (dry run)" } else { "" }
    );
    if config.skip_db && config.skip_files {
        info!("--skip-db and --skip-files both set: scanning only, nothing will be written");
    }

    if config.use_lock && !config.dry_run {
        RunLock::acquire(&config.upload_root).map(Some)
    } else {
        Ok(None)
    }
}

async fn file_phase(config: &MigrationConfig) -> Result<FilePhase, MigrateError> {
    // ── Scan ─────────────────────────────────────────────────────────────
    let root = config.upload_root.clone();
    let records = tokio::task::spawn_blocking(move || scan::scan_uploads(&root))
        .await
        .map_err(|e| MigrateError::Internal(format!("Scan task panicked: {}", e)))??;
    info!("Found {} raster image(s)", records.len());

    let progress = config.progress_callback.as_ref();
    if let Some(cb) = progress {
        cb.on_scan_complete(records.len());
    }

    // ── Convert ──────────────────────────────────────────────────────────
    Ok(files::convert_files(&records, config, progress).await)
}

async fn database_phase<S: RowStore>(
    store: &mut S,
    config: &MigrationConfig,
    phase: &FilePhase,
) -> Result<DbPhase, MigrateError> {
    let rewriter = UrlRewriter::new(&phase.mapping, config.inline_quality);
    let rows_updated = persist::update_targets(
        store,
        &config.targets,
        &rewriter,
        config.dry_run,
        config.progress_callback.as_ref(),
    )
    .await?;

    Ok(DbPhase {
        rows_updated,
        inline_converted: rewriter.inline_converted(),
        inline_failed: rewriter.inline_failed(),
    })
}

async fn finish(
    config: &MigrationConfig,
    phase: FilePhase,
    db: DbPhase,
    start: Instant,
) -> MigrationStats {
    // ── Cleanup ──────────────────────────────────────────────────────────
    let originals_deleted = if config.deletes_originals() {
        cleanup::delete_originals(&phase.converted_sources).await
    } else {
        if config.delete_original {
            debug!("Keeping originals: deletion needs a real database phase");
        }
        0
    };

    let stats = MigrationStats {
        dry_run: config.dry_run,
        rows_updated: db.rows_updated,
        inline_converted: db.inline_converted,
        inline_failed: db.inline_failed,
        originals_deleted,
        duration_ms: start.elapsed().as_millis() as u64,
        ..phase.stats
    };

    info!(
        "Migration complete: {} converted, {} row(s) updated, {}ms",
        stats.converted, stats.rows_updated, stats.duration_ms
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_migration_complete(&stats);
    }
    stats
}
