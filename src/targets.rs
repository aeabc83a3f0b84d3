//! Declarative description of the database columns that hold upload URLs.
//!
//! Every table/column pair subject to rewriting is listed here once, as data.
//! The traversal and update logic in [`crate::pipeline::persist`] is generic
//! over this list, so adding a column never touches the migration code.
//!
//! Two built-in sets exist: columns holding a single URL as plain text, and
//! columns holding structured JSON documents (URL arrays, nested documents,
//! signature data). A JSON file with the same shape can replace both sets at
//! startup via [`load_targets_file`].

use crate::error::MigrateError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How the value columns of a target are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    /// `text` / `varchar` holding a URL or free text.
    #[default]
    Text,
    /// `json` / `jsonb` document.
    Json,
}

/// One table and the group of columns in it that may reference uploads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    /// Table name, optionally schema-qualified (`public.equipment`).
    pub table: String,
    /// Primary key column used to address rows on write-back.
    #[serde(default = "default_id_column")]
    pub id_column: String,
    /// Columns rewritten independently. The first one is the primary column.
    pub columns: Vec<String>,
    #[serde(default)]
    pub kind: ColumnKind,
    /// Stored original filename that must follow the primary column's extension.
    #[serde(default)]
    pub filename_column: Option<String>,
}

fn default_id_column() -> String {
    "id".to_string()
}

impl TargetSpec {
    /// A plain-text target.
    pub fn text(table: &str, columns: &[&str]) -> Self {
        Self {
            table: table.to_string(),
            id_column: default_id_column(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            kind: ColumnKind::Text,
            filename_column: None,
        }
    }

    /// A JSON-document target.
    pub fn json(table: &str, columns: &[&str]) -> Self {
        Self {
            kind: ColumnKind::Json,
            ..Self::text(table, columns)
        }
    }

    pub fn with_filename_column(mut self, column: &str) -> Self {
        self.filename_column = Some(column.to_string());
        self
    }

    /// The column whose change drives the filename rewrite.
    pub fn primary_column(&self) -> Option<&str> {
        self.columns.first().map(String::as_str)
    }

    /// Check every identifier before it is ever spliced into SQL.
    pub fn validate(&self) -> Result<(), MigrateError> {
        let invalid = |reason: String| MigrateError::InvalidTarget {
            table: self.table.clone(),
            reason,
        };

        if self.table.split('.').any(|part| !is_identifier(part)) {
            return Err(invalid(format!("'{}' is not a valid table name", self.table)));
        }
        if self.columns.is_empty() {
            return Err(invalid("no value columns declared".into()));
        }

        let named = std::iter::once(&self.id_column)
            .chain(self.columns.iter())
            .chain(self.filename_column.iter());
        for column in named {
            if !is_identifier(column) {
                return Err(invalid(format!("'{column}' is not a valid column name")));
            }
        }

        if let Some(ref filename) = self.filename_column {
            if self.kind == ColumnKind::Json {
                return Err(invalid(format!(
                    "filename column '{filename}' is only supported on text targets"
                )));
            }
            if self.columns.contains(filename) {
                return Err(invalid(format!(
                    "filename column '{filename}' is also listed as a value column"
                )));
            }
        }
        Ok(())
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`, the subset of SQL identifiers we accept.
fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Columns holding a single URL as plain text.
pub fn text_targets() -> Vec<TargetSpec> {
    vec![
        TargetSpec::text("equipment_types", &["image_url"]),
        TargetSpec::text("equipment", &["photo_url"]),
        TargetSpec::text("purchase_orders", &["receipt_url"]),
        TargetSpec::text("sales_people", &["image_url"]),
        TargetSpec::text("company_settings", &["logo_url"]),
        TargetSpec::text("rental_order_attachments", &["file_url"]).with_filename_column("file_name"),
        TargetSpec::text("customer_documents", &["file_url"]).with_filename_column("file_name"),
        TargetSpec::text("storefront_customers", &["avatar_url"]),
    ]
}

/// Columns holding JSON documents that embed URLs or inline images.
pub fn json_targets() -> Vec<TargetSpec> {
    vec![
        TargetSpec::json("equipment_types", &["image_urls"]),
        TargetSpec::json("equipment", &["image_urls"]),
        TargetSpec::json("purchase_orders", &["attachments"]),
        TargetSpec::json("rental_orders", &["signature", "site_photos"]),
        TargetSpec::json("customer_accounts", &["documents"]),
        TargetSpec::json("customer_change_requests", &["payload"]),
        TargetSpec::json("storefront_customers", &["documents"]),
        TargetSpec::json("company_settings", &["branding"]),
    ]
}

/// Text targets followed by JSON targets.
pub fn default_targets() -> Vec<TargetSpec> {
    let mut targets = text_targets();
    targets.extend(json_targets());
    targets
}

/// Read a JSON array of [`TargetSpec`] and validate every entry.
pub fn load_targets_file(path: &Path) -> Result<Vec<TargetSpec>, MigrateError> {
    let fail = |reason: String| MigrateError::TargetsFile {
        path: path.to_path_buf(),
        reason,
    };
    let raw = std::fs::read_to_string(path).map_err(|e| fail(e.to_string()))?;
    let targets = parse_targets(&raw).map_err(|e| match e {
        MigrateError::InvalidConfig(reason) => fail(reason),
        other => other,
    })?;
    Ok(targets)
}

/// Parse and validate a JSON target list.
pub fn parse_targets(json: &str) -> Result<Vec<TargetSpec>, MigrateError> {
    let targets: Vec<TargetSpec> =
        serde_json::from_str(json).map_err(|e| MigrateError::InvalidConfig(e.to_string()))?;
    if targets.is_empty() {
        return Err(MigrateError::InvalidConfig("target list is empty".into()));
    }
    for target in &targets {
        target.validate()?;
    }
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_targets_are_valid() {
        for target in default_targets() {
            target.validate().unwrap_or_else(|e| panic!("{e}"));
        }
        assert_eq!(
            default_targets().len(),
            text_targets().len() + json_targets().len()
        );
    }

    #[test]
    fn text_targets_come_first() {
        let all = default_targets();
        let first_json = all.iter().position(|t| t.kind == ColumnKind::Json).unwrap();
        assert!(all[..first_json].iter().all(|t| t.kind == ColumnKind::Text));
        assert!(all[first_json..].iter().all(|t| t.kind == ColumnKind::Json));
    }

    #[test]
    fn rejects_injection_in_identifiers() {
        let t = TargetSpec::text("equipment; DROP TABLE x", &["photo_url"]);
        assert!(matches!(t.validate(), Err(MigrateError::InvalidTarget { .. })));

        let t = TargetSpec::text("equipment", &["photo_url\""]);
        assert!(t.validate().is_err());

        let t = TargetSpec::text("public.equipment", &["photo_url"]);
        assert!(t.validate().is_ok());
    }

    #[test]
    fn rejects_empty_columns_and_json_filename() {
        assert!(TargetSpec::text("equipment", &[]).validate().is_err());
        let t = TargetSpec::json("equipment", &["image_urls"]).with_filename_column("file_name");
        assert!(t.validate().is_err());
    }

    #[test]
    fn parse_targets_applies_defaults() {
        let json = r#"[
            {"table": "equipment", "columns": ["photo_url"]},
            {"table": "rental_orders", "columns": ["signature"], "kind": "json", "id_column": "order_id"}
        ]"#;
        let targets = parse_targets(json).unwrap();
        assert_eq!(targets[0].id_column, "id");
        assert_eq!(targets[0].kind, ColumnKind::Text);
        assert_eq!(targets[0].filename_column, None);
        assert_eq!(targets[1].kind, ColumnKind::Json);
        assert_eq!(targets[1].id_column, "order_id");
    }

    #[test]
    fn parse_targets_rejects_empty_list() {
        assert!(matches!(parse_targets("[]"), Err(MigrateError::InvalidConfig(_))));
    }
}
