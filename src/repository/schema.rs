//! Schema registry and startup migrations.
//!
//! Every table the crawlers, extractors and unifier write to is declared here
//! up front: columns with their types plus unique keys. [`SchemaRegistry::migrate`]
//! brings an existing database up to date (new tables, new columns, unique
//! indexes) and records the registry version in `schema_versions`.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::{debug, info};

use super::pool::SqlitePool;
use super::util::{quote_ident, quote_list};
use super::value::SqlValue;
use super::{Result, SqlContext};

/// Storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
}

impl ColumnType {
    /// Text for string values, integer for everything else.
    pub fn infer(value: &SqlValue) -> Self {
        match value {
            SqlValue::Text(_) => Self::Text,
            _ => Self::Integer,
        }
    }

    pub fn sql(&self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Integer => "INTEGER",
        }
    }

    /// Map a declared SQLite type back to a column type.
    pub fn from_declared(declared: &str) -> Option<Self> {
        let upper = declared.to_ascii_uppercase();
        if upper.contains("INT") {
            Some(Self::Integer)
        } else if upper.contains("TEXT") || upper.contains("CHAR") || upper.contains("CLOB") {
            Some(Self::Text)
        } else {
            None
        }
    }
}

/// Declared shape of one table. Every table also gets `id INTEGER PRIMARY KEY`.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    name: String,
    columns: Vec<(String, ColumnType)>,
    unique_keys: Vec<Vec<String>>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            unique_keys: Vec::new(),
        }
    }

    pub fn text(self, column: &str) -> Self {
        self.column(column, ColumnType::Text)
    }

    pub fn texts(self, columns: &[&str]) -> Self {
        columns.iter().fold(self, |table, column| table.text(column))
    }

    pub fn integer(self, column: &str) -> Self {
        self.column(column, ColumnType::Integer)
    }

    pub fn integers(self, columns: &[&str]) -> Self {
        columns.iter().fold(self, |table, column| table.integer(column))
    }

    pub fn column(mut self, column: &str, ty: ColumnType) -> Self {
        if column != "id" && self.column_type(column).is_none() {
            self.columns.push((column.to_string(), ty));
        }
        self
    }

    /// Declare a unique key over one or more columns.
    pub fn unique(mut self, columns: &[&str]) -> Self {
        let key: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        if !self.unique_keys.contains(&key) {
            self.unique_keys.push(key);
        }
        self
    }

    /// Same declaration under another table name.
    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[(String, ColumnType)] {
        &self.columns
    }

    pub fn unique_keys(&self) -> &[Vec<String>] {
        &self.unique_keys
    }

    pub fn column_type(&self, column: &str) -> Option<ColumnType> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, ty)| *ty)
    }

    /// Merge another declaration of the same table into this one.
    fn merge(&mut self, other: TableSchema) {
        for (column, ty) in other.columns {
            if self.column_type(&column).is_none() {
                self.columns.push((column, ty));
            }
        }
        for key in other.unique_keys {
            if !self.unique_keys.contains(&key) {
                self.unique_keys.push(key);
            }
        }
    }
}

/// What a migration run changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub version: u32,
    pub tables_created: usize,
    pub columns_added: usize,
    pub unique_indexes: usize,
}

/// Versioned `{table: {column: type}}` mapping maintained in code.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    version: u32,
    tables: BTreeMap<String, TableSchema>,
}

impl SchemaRegistry {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            tables: BTreeMap::new(),
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Register a table; declarations of the same table are merged.
    pub fn register(&mut self, table: TableSchema) {
        match self.tables.get_mut(table.name()) {
            Some(existing) => existing.merge(table),
            None => {
                self.tables.insert(table.name().to_string(), table);
            }
        }
    }

    pub fn with_table(mut self, table: TableSchema) -> Self {
        self.register(table);
        self
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }

    /// Apply the registry to the database in one transaction.
    pub fn migrate(&self, pool: &SqlitePool) -> Result<MigrationReport> {
        pool.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .context("schema_versions", "begin migration")?;
            let report = self.apply(&tx)?;
            tx.commit().context("schema_versions", "commit migration")?;
            Ok(report)
        })
    }

    fn apply(&self, conn: &Connection) -> Result<MigrationReport> {
        let mut report = MigrationReport {
            version: self.version,
            ..Default::default()
        };

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_versions (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
        "#,
        )
        .context("schema_versions", "create")?;

        for table in self.tables.values() {
            let existing = table_columns(conn, table.name())?;
            if existing.is_empty() {
                create_table(conn, table)?;
                report.tables_created += 1;
                debug!("Created table {}", table.name());
            } else {
                for (column, ty) in table.columns() {
                    if !existing.contains_key(column) {
                        add_column(conn, table.name(), column, *ty)?;
                        report.columns_added += 1;
                        debug!("Added column {}.{}", table.name(), column);
                    }
                }
            }

            for key in table.unique_keys() {
                let columns: Vec<&str> = key.iter().map(String::as_str).collect();
                create_unique_index(conn, table.name(), &columns)?;
                report.unique_indexes += 1;
            }
        }

        conn.execute(
            "INSERT OR IGNORE INTO schema_versions (version, applied_at) VALUES (?1, ?2)",
            params![self.version, Utc::now().to_rfc3339()],
        )
        .context("schema_versions", "record version")?;

        info!(
            "Schema v{}: {} tables created, {} columns added",
            self.version, report.tables_created, report.columns_added
        );
        Ok(report)
    }
}

/// Current columns of a table (empty when the table does not exist).
pub fn table_columns(conn: &Connection, table: &str) -> Result<HashMap<String, Option<ColumnType>>> {
    let mut stmt = conn
        .prepare("SELECT name, type FROM pragma_table_info(?1)")
        .context(table, "inspect columns")?;
    let columns = stmt
        .query_map(params![table], |row| {
            let name: String = row.get(0)?;
            let declared: String = row.get(1)?;
            Ok((name, ColumnType::from_declared(&declared)))
        })
        .context(table, "inspect columns")?
        .collect::<rusqlite::Result<HashMap<_, _>>>()
        .context(table, "inspect columns")?;
    Ok(columns)
}

/// Create a table with an integer id primary key and the given columns.
pub fn create_table(conn: &Connection, table: &TableSchema) -> Result<()> {
    let mut definitions = vec!["\"id\" INTEGER PRIMARY KEY".to_string()];
    for (column, ty) in table.columns() {
        definitions.push(format!("{} {}", quote_ident(column)?, ty.sql()));
    }
    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(table.name())?,
        definitions.join(", ")
    );
    conn.execute_batch(&sql).context(table.name(), "create table")
}

pub fn add_column(conn: &Connection, table: &str, column: &str, ty: ColumnType) -> Result<()> {
    let sql = format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        quote_ident(table)?,
        quote_ident(column)?,
        ty.sql()
    );
    conn.execute_batch(&sql).context(table, "add column")
}

pub fn create_unique_index(conn: &Connection, table: &str, columns: &[&str]) -> Result<()> {
    let index = format!("ux_{}_{}", table, columns.join("_"));
    let sql = format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({})",
        quote_ident(&index)?,
        quote_ident(table)?,
        quote_list(columns.iter().copied())?
    );
    conn.execute_batch(&sql).context(table, "create unique index")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new(1).with_table(
            TableSchema::new("ms_raw")
                .texts(&["title", "details_html"])
                .integer("status_code")
                .unique(&["title"]),
        )
    }

    #[test]
    fn test_infer_column_type() {
        assert_eq!(ColumnType::infer(&SqlValue::from("x")), ColumnType::Text);
        assert_eq!(ColumnType::infer(&SqlValue::from(5i64)), ColumnType::Integer);
        assert_eq!(ColumnType::infer(&SqlValue::Null), ColumnType::Integer);
    }

    #[test]
    fn test_migrate_creates_tables_and_is_repeatable() {
        let pool = SqlitePool::in_memory().unwrap();
        let first = registry().migrate(&pool).unwrap();
        assert_eq!(first.tables_created, 1);

        let second = registry().migrate(&pool).unwrap();
        assert_eq!(second.tables_created, 0);
        assert_eq!(second.columns_added, 0);

        let columns = pool.with_conn(|conn| table_columns(conn, "ms_raw")).unwrap();
        assert_eq!(columns.len(), 4);
        assert_eq!(columns["status_code"], Some(ColumnType::Integer));
    }

    #[test]
    fn test_migrate_adds_new_columns_to_existing_table() {
        let pool = SqlitePool::in_memory().unwrap();
        registry().migrate(&pool).unwrap();

        let evolved = SchemaRegistry::new(2)
            .with_table(TableSchema::new("ms_raw").text("regulations_html"));
        let report = evolved.migrate(&pool).unwrap();
        assert_eq!(report.columns_added, 1);

        let versions: i64 = pool
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM schema_versions", [], |row| row.get(0))
            })
            .unwrap();
        assert_eq!(versions, 2);
    }

    #[test]
    fn test_register_merges_declarations() {
        let mut registry = SchemaRegistry::new(1);
        registry.register(TableSchema::new("t").text("a"));
        registry.register(TableSchema::new("t").text("a").integer("b").unique(&["a"]));

        let table = registry.table("t").unwrap();
        assert_eq!(table.columns().len(), 2);
        assert_eq!(table.unique_keys().len(), 1);
    }
}
