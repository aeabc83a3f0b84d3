//! Persistence: rewrite stored references target by target, row by row.
//!
//! For every [`TargetSpec`] all rows are fetched, each value column is run
//! through the [`UrlRewriter`] independently, and only the columns that
//! actually changed are written back, one statement per row. Rows with no
//! change are never written.

use crate::error::MigrateError;
use crate::pipeline::rewrite::{replace_extension, UrlRewriter};
use crate::progress::ProgressCallback;
use crate::store::{ColumnValue, Row, RowStore, RowUpdate};
use crate::targets::TargetSpec;
use serde_json::Value;
use tracing::{debug, info};

/// Compute the update for one row, or `None` if nothing changed.
///
/// When the target has a filename column and the primary column was
/// rewritten through the URL mapping, the stored filename's raster extension
/// is swapped for `.webp` as well. A primary column that changed only
/// because an inline `data:` image was re-encoded keeps its filename. A
/// missing filename, or one without a raster extension, is left alone.
pub fn plan_row_update(
    target: &TargetSpec,
    row: &Row,
    rewriter: &UrlRewriter<'_>,
) -> Option<RowUpdate> {
    let primary = target.primary_column();
    let mut primary_changed = false;
    let mut changes = Vec::new();

    for (column, value) in &row.columns {
        if let Some(new_value) = rewriter.rewrite_column(value) {
            primary_changed |=
                Some(column.as_str()) == primary && references_mapping(rewriter, value);
            changes.push((column.clone(), new_value));
        }
    }

    if primary_changed {
        if let (Some(column), Some(name)) = (&target.filename_column, &row.filename) {
            if let Some(renamed) = replace_extension(name) {
                changes.push((column.clone(), ColumnValue::Text(Some(renamed))));
            }
        }
    }

    if changes.is_empty() {
        None
    } else {
        Some(RowUpdate {
            id: row.id.clone(),
            changes,
        })
    }
}

fn references_mapping(rewriter: &UrlRewriter<'_>, value: &ColumnValue) -> bool {
    match value {
        ColumnValue::Text(Some(s)) => rewriter.has_mapped_reference(s),
        ColumnValue::Json(Some(v)) => json_references_mapping(rewriter, v),
        ColumnValue::Text(None) | ColumnValue::Json(None) => false,
    }
}

fn json_references_mapping(rewriter: &UrlRewriter<'_>, value: &Value) -> bool {
    match value {
        Value::String(s) => rewriter.has_mapped_reference(s),
        Value::Array(items) => items.iter().any(|v| json_references_mapping(rewriter, v)),
        Value::Object(map) => map.values().any(|v| json_references_mapping(rewriter, v)),
        Value::Null | Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Rewrite every target and return how many rows were updated.
///
/// In dry-run mode the same reads and diffs happen and the returned count is
/// the number of rows that *would* be updated; nothing is written.
pub async fn update_targets<S: RowStore>(
    store: &mut S,
    targets: &[TargetSpec],
    rewriter: &UrlRewriter<'_>,
    dry_run: bool,
    progress: Option<&ProgressCallback>,
) -> Result<usize, MigrateError> {
    let mut updated = 0;

    for target in targets {
        let rows = store.fetch_rows(target).await?;
        debug!("{}: fetched {} row(s)", target.table, rows.len());
        if let Some(cb) = progress {
            cb.on_target_start(&target.table, rows.len());
        }

        let mut target_updates = 0;
        for row in &rows {
            let Some(update) = plan_row_update(target, row, rewriter) else {
                continue;
            };

            if dry_run {
                debug!(
                    "[dry-run] would update {} id={} ({} column(s))",
                    target.table,
                    update.id,
                    update.changes.len()
                );
            } else {
                store.apply_update(target, &update).await?;
            }

            target_updates += 1;
            if let Some(cb) = progress {
                cb.on_row_updated(&target.table, &update.id);
            }
        }

        if target_updates > 0 {
            info!(
                "{} {} row(s) in {} ({})",
                if dry_run { "Would update" } else { "Updated" },
                target_updates,
                target.table,
                target.columns.join(", ")
            );
        }
        updated += target_updates;
    }

    Ok(updated)
}
