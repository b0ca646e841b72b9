//! Column auto-creation policy.
//!
//! Tables are normally created by [`super::SchemaRegistry::migrate`]. A
//! [`ColumnEnsurer`] decides what happens when a write mentions a table or
//! column the database does not have yet.

use rusqlite::Connection;
use tracing::info;

use super::schema::{add_column, create_table, create_unique_index, ColumnType, TableSchema};
use super::{Result, StoreError};

/// Policy for writes that reference unknown tables or columns.
pub trait ColumnEnsurer: Send + Sync {
    /// Called when `table` does not exist.
    fn ensure_table(&self, conn: &Connection, table: &str) -> Result<()>;

    /// Called with the columns a record needs that `table` lacks.
    fn ensure_columns(
        &self,
        conn: &Connection,
        table: &str,
        missing: &[(String, ColumnType)],
    ) -> Result<()>;

    /// Called before the first upsert on `keys`.
    fn ensure_unique(&self, conn: &Connection, table: &str, keys: &[&str]) -> Result<()>;
}

/// Rejects anything the migrations did not create.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrictColumns;

impl ColumnEnsurer for StrictColumns {
    fn ensure_table(&self, _conn: &Connection, table: &str) -> Result<()> {
        Err(StoreError::UnknownTable(table.to_string()))
    }

    fn ensure_columns(
        &self,
        _conn: &Connection,
        table: &str,
        missing: &[(String, ColumnType)],
    ) -> Result<()> {
        match missing.first() {
            Some((column, _)) => Err(StoreError::UnknownColumn {
                table: table.to_string(),
                column: column.clone(),
            }),
            None => Ok(()),
        }
    }

    fn ensure_unique(&self, _conn: &Connection, _table: &str, _keys: &[&str]) -> Result<()> {
        Ok(())
    }
}

/// Adds tables, columns and unique indexes on demand.
///
/// Safe for one writer per table. Two processes adding the same column
/// race on `ALTER TABLE`; the loser's "duplicate column" error is ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoCreateColumns;

impl ColumnEnsurer for AutoCreateColumns {
    fn ensure_table(&self, conn: &Connection, table: &str) -> Result<()> {
        info!("Creating table {} on first write", table);
        create_table(conn, &TableSchema::new(table))
    }

    fn ensure_columns(
        &self,
        conn: &Connection,
        table: &str,
        missing: &[(String, ColumnType)],
    ) -> Result<()> {
        for (column, ty) in missing {
            match add_column(conn, table, column, *ty) {
                Ok(()) => info!("Added column {}.{} ({})", table, column, ty.sql()),
                Err(StoreError::Sql { source, .. })
                    if source.to_string().contains("duplicate column name") => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn ensure_unique(&self, conn: &Connection, table: &str, keys: &[&str]) -> Result<()> {
        create_unique_index(conn, table, keys)
    }
}
