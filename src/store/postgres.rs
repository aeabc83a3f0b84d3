//! PostgreSQL row store over a single tokio-postgres session.
//!
//! The session is opened once for the persistence phase and closed with
//! [`PgStore::close`] whether the phase succeeded or not. Table and column
//! names come only from validated [`TargetSpec`]s and are always quoted;
//! values are always bound as `$n` parameters.
//!
//! Ids travel as text. Updates cast the bound id back to the id column's
//! declared type, looked up once per table, so the key index is used.

use super::{ColumnValue, Row, RowStore, RowUpdate};
use crate::error::MigrateError;
use crate::targets::{ColumnKind, TargetSpec};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use tokio::task::JoinHandle;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error, warn};

/// A connected PostgreSQL session.
pub struct PgStore {
    client: Client,
    connection: JoinHandle<()>,
    /// Declared id column type per table; `None` when it could not be used.
    id_types: HashMap<String, Option<String>>,
}

/// What `format_type` may return for a usable key type.
static RE_TYPE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^[A-Za-z_][A-Za-z0-9_ ,()."]*$"#).unwrap());

const ID_TYPE_SQL: &str = "SELECT format_type(a.atttypid, a.atttypmod) \
     FROM pg_attribute a \
     WHERE a.attrelid = to_regclass($1::text) AND a.attname::text = $2 \
     AND a.attnum > 0 AND NOT a.attisdropped";

impl PgStore {
    /// Connect and spawn the connection driver task.
    pub async fn connect(url: &str) -> Result<Self, MigrateError> {
        let (client, connection) = tokio_postgres::connect(url, NoTls)
            .await
            .map_err(MigrateError::Connect)?;

        let connection = tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("PostgreSQL connection error: {}", e);
            }
        });

        debug!("Database session opened");
        Ok(Self {
            client,
            connection,
            id_types: HashMap::new(),
        })
    }

    /// Declared type of the target's id column, cached per table.
    async fn id_type(&mut self, target: &TargetSpec) -> Result<Option<String>, MigrateError> {
        if let Some(cached) = self.id_types.get(&target.table) {
            return Ok(cached.clone());
        }

        let db_err = |source: tokio_postgres::Error| MigrateError::Database {
            table: target.table.clone(),
            source,
        };
        let table = quote_ident(&target.table);
        let row = self
            .client
            .query_opt(ID_TYPE_SQL, &[&table, &target.id_column])
            .await
            .map_err(db_err)?;
        let declared: Option<String> = match row {
            Some(r) => r.try_get(0).map_err(db_err)?,
            None => None,
        };

        let id_type = match declared {
            Some(t) if usable_type_name(&t) => {
                debug!("{}.{} is {}", target.table, target.id_column, t);
                Some(t)
            }
            other => {
                warn!(
                    "Could not resolve type of {}.{} ({:?}); matching ids as text",
                    target.table, target.id_column, other
                );
                None
            }
        };
        self.id_types.insert(target.table.clone(), id_type.clone());
        Ok(id_type)
    }

    /// Drop the client and wait for the driver task to finish.
    pub async fn close(self) {
        let PgStore { client, connection, .. } = self;
        drop(client);
        if let Err(e) = connection.await {
            warn!("Database connection task ended abnormally: {}", e);
        }
        debug!("Database session closed");
    }
}

impl RowStore for PgStore {
    async fn fetch_rows(&mut self, target: &TargetSpec) -> Result<Vec<Row>, MigrateError> {
        let sql = select_sql(target);
        let db_err = |source: tokio_postgres::Error| MigrateError::Database {
            table: target.table.clone(),
            source,
        };

        let rows = self.client.query(sql.as_str(), &[]).await.map_err(db_err)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get(0).map_err(db_err)?;

            let mut columns = Vec::with_capacity(target.columns.len());
            for (i, name) in target.columns.iter().enumerate() {
                let value = match target.kind {
                    ColumnKind::Text => ColumnValue::Text(row.try_get(i + 1).map_err(db_err)?),
                    ColumnKind::Json => ColumnValue::Json(row.try_get(i + 1).map_err(db_err)?),
                };
                columns.push((name.clone(), value));
            }

            let filename = match target.filename_column {
                Some(_) => row.try_get(target.columns.len() + 1).map_err(db_err)?,
                None => None,
            };

            out.push(Row {
                id,
                columns,
                filename,
            });
        }
        Ok(out)
    }

    async fn apply_update(
        &mut self,
        target: &TargetSpec,
        update: &RowUpdate,
    ) -> Result<(), MigrateError> {
        let id_type = self.id_type(target).await?;
        let sql = update_sql(target, update, id_type.as_deref());

        let mut params: Vec<Box<dyn ToSql + Sync + Send>> =
            Vec::with_capacity(update.changes.len() + 1);
        for (_, value) in &update.changes {
            match value {
                ColumnValue::Text(v) => params.push(Box::new(v.clone())),
                ColumnValue::Json(v) => params.push(Box::new(v.clone())),
            }
        }
        params.push(Box::new(update.id.clone()));

        let refs: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| &**p as &(dyn ToSql + Sync))
            .collect();

        let affected = self
            .client
            .execute(sql.as_str(), &refs)
            .await
            .map_err(|source| MigrateError::Database {
                table: target.table.clone(),
                source,
            })?;

        debug!(
            "UPDATE {} id={} ({} column(s), {} row(s) affected)",
            target.table,
            update.id,
            update.changes.len(),
            affected
        );
        Ok(())
    }
}

/// Double-quote an identifier, one part at a time for `schema.table`.
pub fn quote_ident(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}

/// `SELECT id::text, <columns>[, filename] FROM table ORDER BY id`.
pub fn select_sql(target: &TargetSpec) -> String {
    let cast = match target.kind {
        ColumnKind::Text => "text",
        ColumnKind::Json => "jsonb",
    };

    let mut fields = vec![format!("{}::text", quote_ident(&target.id_column))];
    fields.extend(
        target
            .columns
            .iter()
            .map(|c| format!("{}::{}", quote_ident(c), cast)),
    );
    if let Some(ref filename) = target.filename_column {
        fields.push(format!("{}::text", quote_ident(filename)));
    }

    format!(
        "SELECT {} FROM {} ORDER BY {}",
        fields.join(", "),
        quote_ident(&target.table),
        quote_ident(&target.id_column)
    )
}

fn usable_type_name(name: &str) -> bool {
    RE_TYPE_NAME.is_match(name)
}

/// `UPDATE table SET c1 = $1, c2 = $2::jsonb WHERE id = $n::text::<type>`.
///
/// Without a known id type the comparison falls back to `id::text = $n`.
pub fn update_sql(target: &TargetSpec, update: &RowUpdate, id_type: Option<&str>) -> String {
    let sets: Vec<String> = update
        .changes
        .iter()
        .enumerate()
        .map(|(i, (column, value))| {
            let cast = match value {
                ColumnValue::Text(_) => "",
                ColumnValue::Json(_) => "::jsonb",
            };
            format!("{} = ${}{}", quote_ident(column), i + 1, cast)
        })
        .collect();

    let id = quote_ident(&target.id_column);
    let n = update.changes.len() + 1;
    let predicate = match id_type.filter(|t| usable_type_name(t)) {
        Some(t) => format!("{id} = ${n}::text::{t}"),
        None => format!("{id}::text = ${n}"),
    };

    format!(
        "UPDATE {} SET {} WHERE {}",
        quote_ident(&target.table),
        sets.join(", "),
        predicate
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn quote_ident_handles_schema_and_quotes() {
        assert_eq!(quote_ident("equipment"), "\"equipment\"");
        assert_eq!(quote_ident("public.equipment"), "\"public\".\"equipment\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn select_for_text_target_with_filename() {
        let t = TargetSpec::text("customer_documents", &["file_url"]).with_filename_column("file_name");
        assert_eq!(
            select_sql(&t),
            "SELECT \"id\"::text, \"file_url\"::text, \"file_name\"::text \
             FROM \"customer_documents\" ORDER BY \"id\""
        );
    }

    #[test]
    fn select_for_json_target() {
        let t = TargetSpec::json("rental_orders", &["signature", "site_photos"]);
        assert_eq!(
            select_sql(&t),
            "SELECT \"id\"::text, \"signature\"::jsonb, \"site_photos\"::jsonb \
             FROM \"rental_orders\" ORDER BY \"id\""
        );
    }

    #[test]
    fn update_uses_placeholders_and_jsonb_cast() {
        let t = TargetSpec::json("rental_orders", &["signature", "site_photos"]);
        let update = RowUpdate {
            id: "42'; DROP TABLE rental_orders; --".into(),
            changes: vec![("site_photos".into(), ColumnValue::Json(Some(json!(["/uploads/a.webp"]))))],
        };
        let sql = update_sql(&t, &update, Some("bigint"));
        assert_eq!(
            sql,
            "UPDATE \"rental_orders\" SET \"site_photos\" = $1::jsonb \
             WHERE \"id\" = $2::text::bigint"
        );
        assert!(!sql.contains("DROP"));
    }

    #[test]
    fn update_text_and_filename_columns() {
        let t = TargetSpec::text("customer_documents", &["file_url"]).with_filename_column("file_name");
        let update = RowUpdate {
            id: "7".into(),
            changes: vec![
                ("file_url".into(), ColumnValue::Text(Some("/uploads/d.webp".into()))),
                ("file_name".into(), ColumnValue::Text(Some("d.webp".into()))),
            ],
        };
        assert_eq!(
            update_sql(&t, &update, Some("uuid")),
            "UPDATE \"customer_documents\" SET \"file_url\" = $1, \"file_name\" = $2 \
             WHERE \"id\" = $3::text::uuid"
        );
    }

    #[test]
    fn unknown_or_odd_id_type_falls_back_to_text_match() {
        let t = TargetSpec::text("equipment", &["photo_url"]);
        let update = RowUpdate {
            id: "3".into(),
            changes: vec![("photo_url".into(), ColumnValue::Text(Some("/uploads/a.webp".into())))],
        };
        let fallback = "UPDATE \"equipment\" SET \"photo_url\" = $1 WHERE \"id\"::text = $2";
        assert_eq!(update_sql(&t, &update, None), fallback);
        assert_eq!(update_sql(&t, &update, Some("int4; DROP TABLE equipment")), fallback);
        assert_eq!(update_sql(&t, &update, Some("int'")), fallback);
    }

    #[test]
    fn declared_type_names_are_accepted() {
        let names = [
            "integer",
            "bigint",
            "uuid",
            "character varying(64)",
            "numeric(10,0)",
            "public.\"Key\"",
        ];
        for name in names {
            assert!(usable_type_name(name), "{name}");
        }
        assert!(!usable_type_name(""));
        assert!(!usable_type_name("text[]; --"));
    }
}
