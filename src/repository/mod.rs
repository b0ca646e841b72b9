//! Repository layer for SQLite persistence.
//!
//! Raw pages, parsed records and unified documents all live in one SQLite
//! database. Each source owns a table namespace (`ms_raw`, `ms_parsed`, ...)
//! and writes through [`SchemaEvolvingStore`], which upserts on natural keys
//! and can evolve table columns when a [`ColumnEnsurer`] allows it.

pub mod columns;
pub mod namespace;
pub mod pool;
pub mod schema;
pub mod store;
pub mod util;
pub mod value;

use std::path::PathBuf;

use thiserror::Error;

pub use columns::{AutoCreateColumns, ColumnEnsurer, StrictColumns};
pub use namespace::SourceStore;
pub use pool::SqlitePool;
pub use schema::{ColumnType, MigrationReport, SchemaRegistry, TableSchema};
pub use store::SchemaEvolvingStore;
pub use value::{Record, SqlValue};

/// Errors from the persistence layer.
///
/// SQL failures always carry the table and operation so a failed write can
/// be traced back to the record being stored.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{operation} on table {table} failed: {source}")]
    Sql {
        table: String,
        operation: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("table {0} does not exist and column auto-creation is disabled")]
    UnknownTable(String),

    #[error("column {column} does not exist on {table} and column auto-creation is disabled")]
    UnknownColumn { table: String, column: String },

    #[error("invalid SQL identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("failed to open database {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("store task failed: {0}")]
    Interact(String),
}

impl StoreError {
    /// Whether the failure concerns only the statement or record at hand,
    /// leaving the database usable for the next write. Open, I/O, lock and
    /// schema failures are not.
    pub fn is_record_scoped(&self) -> bool {
        match self {
            Self::Sql { source, .. } | Self::Database(source) => is_statement_failure(source),
            Self::UnknownColumn { .. } | Self::InvalidIdentifier(_) => true,
            Self::UnknownTable(_) | Self::Open { .. } | Self::Interact(_) => false,
        }
    }
}

fn is_statement_failure(err: &rusqlite::Error) -> bool {
    use rusqlite::{Error, ErrorCode};

    match err {
        Error::SqliteFailure(failure, _) => matches!(
            failure.code,
            ErrorCode::ConstraintViolation
                | ErrorCode::TypeMismatch
                | ErrorCode::TooBig
                | ErrorCode::ParameterOutOfRange
        ),
        Error::ToSqlConversionFailure(_)
        | Error::FromSqlConversionFailure(..)
        | Error::InvalidColumnType(..)
        | Error::IntegralValueOutOfRange(..) => true,
        _ => false,
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Attach table/operation context to a rusqlite result.
pub(crate) trait SqlContext<T> {
    fn context(self, table: &str, operation: &'static str) -> Result<T>;
}

impl<T> SqlContext<T> for rusqlite::Result<T> {
    fn context(self, table: &str, operation: &'static str) -> Result<T> {
        self.map_err(|source| StoreError::Sql {
            table: table.to_string(),
            operation,
            source,
        })
    }
}
