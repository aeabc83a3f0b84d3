//! In-memory row store.
//!
//! Behaves like the PostgreSQL store for the purposes of the migration:
//! missing columns read as NULL, unknown tables read as empty, and an update
//! for an id that does not exist touches nothing.

use super::{ColumnValue, Row, RowStore, RowUpdate};
use crate::error::MigrateError;
use crate::targets::{ColumnKind, TargetSpec};
use std::collections::BTreeMap;

/// One stored row.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryRow {
    pub id: String,
    pub values: BTreeMap<String, ColumnValue>,
}

/// Tables of rows kept in memory, with a count of writes applied.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: BTreeMap<String, Vec<MemoryRow>>,
    writes: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a row to `table`.
    pub fn insert_row<'a>(
        &mut self,
        table: &str,
        id: impl Into<String>,
        values: impl IntoIterator<Item = (&'a str, ColumnValue)>,
    ) {
        let row = MemoryRow {
            id: id.into(),
            values: values
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        };
        self.tables.entry(table.to_string()).or_default().push(row);
    }

    /// Current value of one cell.
    pub fn value(&self, table: &str, id: &str, column: &str) -> Option<&ColumnValue> {
        self.tables
            .get(table)?
            .iter()
            .find(|row| row.id == id)?
            .values
            .get(column)
    }

    /// Number of UPDATE statements applied so far.
    pub fn writes(&self) -> usize {
        self.writes
    }
}

impl RowStore for MemoryStore {
    async fn fetch_rows(&mut self, target: &TargetSpec) -> Result<Vec<Row>, MigrateError> {
        let Some(rows) = self.tables.get(&target.table) else {
            return Ok(Vec::new());
        };

        let null = match target.kind {
            ColumnKind::Text => ColumnValue::Text(None),
            ColumnKind::Json => ColumnValue::Json(None),
        };

        Ok(rows
            .iter()
            .map(|row| Row {
                id: row.id.clone(),
                columns: target
                    .columns
                    .iter()
                    .map(|c| (c.clone(), row.values.get(c).cloned().unwrap_or_else(|| null.clone())))
                    .collect(),
                filename: target
                    .filename_column
                    .as_ref()
                    .and_then(|c| match row.values.get(c) {
                        Some(ColumnValue::Text(Some(name))) => Some(name.clone()),
                        _ => None,
                    }),
            })
            .collect())
    }

    async fn apply_update(
        &mut self,
        target: &TargetSpec,
        update: &RowUpdate,
    ) -> Result<(), MigrateError> {
        self.writes += 1;
        let row = self
            .tables
            .get_mut(&target.table)
            .and_then(|rows| rows.iter_mut().find(|r| r.id == update.id));
        if let Some(row) = row {
            for (column, value) in &update.changes {
                row.values.insert(column.clone(), value.clone());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn fetch_fills_missing_columns_with_null() {
        let mut store = MemoryStore::new();
        store.insert_row(
            "customer_documents",
            "1",
            [
                ("file_url", ColumnValue::Text(Some("/uploads/a.png".into()))),
                ("file_name", ColumnValue::Text(Some("a.png".into()))),
            ],
        );
        store.insert_row("customer_documents", "2", []);

        let target = TargetSpec::text("customer_documents", &["file_url"]).with_filename_column("file_name");
        let rows = store.fetch_rows(&target).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].filename.as_deref(), Some("a.png"));
        assert_eq!(rows[1].columns[0].1, ColumnValue::Text(None));
        assert_eq!(rows[1].filename, None);
    }

    #[tokio::test]
    async fn unknown_table_is_empty() {
        let mut store = MemoryStore::new();
        let rows = store.fetch_rows(&TargetSpec::json("nowhere", &["doc"])).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn apply_update_changes_only_listed_columns() {
        let mut store = MemoryStore::new();
        store.insert_row(
            "rental_orders",
            "9",
            [
                ("signature", ColumnValue::Json(Some(json!({"img": "x"})))),
                ("site_photos", ColumnValue::Json(Some(json!(["/uploads/a.png"])))),
            ],
        );
        let target = TargetSpec::json("rental_orders", &["signature", "site_photos"]);
        let update = RowUpdate {
            id: "9".into(),
            changes: vec![(
                "site_photos".into(),
                ColumnValue::Json(Some(json!(["/uploads/a.webp"]))),
            )],
        };
        store.apply_update(&target, &update).await.unwrap();

        assert_eq!(store.writes(), 1);
        assert_eq!(
            store.value("rental_orders", "9", "site_photos"),
            Some(&ColumnValue::Json(Some(json!(["/uploads/a.webp"]))))
        );
        assert_eq!(
            store.value("rental_orders", "9", "signature"),
            Some(&ColumnValue::Json(Some(json!({"img": "x"}))))
        );
    }
}
