//! Row storage behind the persistence phase.
//!
//! [`RowStore`] is the seam between the diff logic in
//! [`crate::pipeline::persist`] and an actual database:
//!
//! * [`postgres::PgStore`]: one tokio-postgres session per run.
//! * [`memory::MemoryStore`]: in-process rows, for tests and previews.

pub mod memory;
pub mod postgres;

use crate::error::MigrateError;
use crate::targets::TargetSpec;
use serde_json::Value;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// A stored column value, typed by the target's [`crate::targets::ColumnKind`].
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Text(Option<String>),
    Json(Option<Value>),
}

/// One fetched row: its id, the declared value columns in declaration order,
/// and the companion filename if the target has one.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub id: String,
    pub columns: Vec<(String, ColumnValue)>,
    pub filename: Option<String>,
}

/// The columns of one row that changed, in write order.
#[derive(Debug, Clone, PartialEq)]
pub struct RowUpdate {
    pub id: String,
    pub changes: Vec<(String, ColumnValue)>,
}

/// Read and write access to the rows named by a [`TargetSpec`].
#[allow(async_fn_in_trait)]
pub trait RowStore {
    /// Every row of the target table: id + declared columns (+ filename).
    async fn fetch_rows(&mut self, target: &TargetSpec) -> Result<Vec<Row>, MigrateError>;

    /// Write the changed columns of one row in a single statement.
    async fn apply_update(
        &mut self,
        target: &TargetSpec,
        update: &RowUpdate,
    ) -> Result<(), MigrateError>;
}
