//! Schema-evolving record store.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use rusqlite::{params_from_iter, Connection};
use tracing::debug;

use super::columns::{ColumnEnsurer, StrictColumns};
use super::pool::SqlitePool;
use super::schema::{table_columns, ColumnType, MigrationReport, SchemaRegistry};
use super::util::{quote_ident, quote_list};
use super::value::{Record, SqlValue};
use super::{Result, SqlContext};

#[derive(Default)]
struct SchemaCache {
    columns: HashMap<String, HashSet<String>>,
    unique: HashSet<(String, Vec<String>)>,
}

/// Record store over dynamically shaped tables.
///
/// Writes go through [`insert`](Self::insert) (sequential id or upsert on a
/// natural key) and [`update`](Self::update). Before a write, columns the
/// table lacks are handed to the configured [`ColumnEnsurer`].
///
/// Schema changes are serialized inside one process by the schema cache
/// lock. Across processes the store assumes a single writer per table; the
/// per-source table namespaces keep concurrent crawlers on disjoint tables.
pub struct SchemaEvolvingStore {
    pool: SqlitePool,
    ensurer: Arc<dyn ColumnEnsurer>,
    cache: Mutex<SchemaCache>,
}

impl SchemaEvolvingStore {
    /// Store that only writes to migrated tables and columns.
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_ensurer(pool, Arc::new(StrictColumns))
    }

    pub fn with_ensurer(pool: SqlitePool, ensurer: Arc<dyn ColumnEnsurer>) -> Self {
        Self {
            pool,
            ensurer,
            cache: Mutex::new(SchemaCache::default()),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Apply a schema registry and forget cached table shapes.
    pub fn migrate(&self, registry: &SchemaRegistry) -> Result<MigrationReport> {
        let report = registry.migrate(&self.pool)?;
        *self.cache.lock().unwrap_or_else(PoisonError::into_inner) = SchemaCache::default();
        Ok(report)
    }

    /// Insert a record.
    ///
    /// With a `unique_key` that is present (and non-null) in `record` this is
    /// an upsert: every non-key column of an existing row is overwritten.
    /// Otherwise the row gets `max(id) + 1`. Returns the row id.
    pub fn insert(&self, table: &str, record: &Record, unique_key: Option<&str>) -> Result<i64> {
        match unique_key {
            Some(key) if record.get(key).is_some_and(|v| !v.is_null()) => {
                self.upsert(table, record, &[key])
            }
            _ => self.insert_sequential(table, record),
        }
    }

    /// Upsert on a (possibly composite) unique key.
    pub fn upsert(&self, table: &str, record: &Record, keys: &[&str]) -> Result<i64> {
        self.pool.with_conn(|conn| {
            self.prepare(conn, table, record, keys)?;

            let next_id = next_id(conn, table)?;
            let columns: Vec<&str> = record.columns().filter(|c| *c != "id").collect();
            let updates: Vec<String> = columns
                .iter()
                .filter(|c| !keys.contains(c))
                .map(|c| quote_ident(c).map(|q| format!("{q} = excluded.{q}")))
                .collect::<Result<_>>()?;

            let conflict = if updates.is_empty() {
                "DO NOTHING".to_string()
            } else {
                format!("DO UPDATE SET {}", updates.join(", "))
            };
            let sql = format!(
                "INSERT INTO {} (\"id\", {}) VALUES ({}) ON CONFLICT ({}) {}",
                quote_ident(table)?,
                quote_list(columns.iter().copied())?,
                placeholders(columns.len() + 1),
                quote_list(keys.iter().copied())?,
                conflict
            );

            let values = std::iter::once(SqlValue::Integer(next_id))
                .chain(columns.iter().filter_map(|c| record.get(c).cloned()));
            conn.execute(&sql, params_from_iter(values))
                .context(table, "upsert")?;

            let key_values: Vec<SqlValue> = keys
                .iter()
                .map(|k| record.get(k).cloned().unwrap_or(SqlValue::Null))
                .collect();
            let sql = format!(
                "SELECT \"id\" FROM {} WHERE {}",
                quote_ident(table)?,
                where_clause(keys)?
            );
            conn.query_row(&sql, params_from_iter(key_values), |row| row.get(0))
                .context(table, "upsert")
        })
    }

    fn insert_sequential(&self, table: &str, record: &Record) -> Result<i64> {
        self.pool.with_conn(|conn| {
            self.prepare(conn, table, record, &[])?;

            let id = match record.i64("id") {
                Some(id) => id,
                None => next_id(conn, table)?,
            };
            let columns: Vec<&str> = record.columns().filter(|c| *c != "id").collect();
            let sql = format!(
                "INSERT INTO {} (\"id\"{}{}) VALUES ({})",
                quote_ident(table)?,
                if columns.is_empty() { "" } else { ", " },
                quote_list(columns.iter().copied())?,
                placeholders(columns.len() + 1)
            );
            let values = std::iter::once(SqlValue::Integer(id))
                .chain(columns.iter().filter_map(|c| record.get(c).cloned()));
            conn.execute(&sql, params_from_iter(values))
                .context(table, "insert")?;
            Ok(id)
        })
    }

    /// Update the row where `key_column = key_value`; the key column itself
    /// is never written. Returns the number of rows changed.
    pub fn update(
        &self,
        table: &str,
        record: &Record,
        key_column: &str,
        key_value: &SqlValue,
    ) -> Result<usize> {
        self.pool.with_conn(|conn| {
            self.prepare(conn, table, record, &[])?;

            let columns: Vec<&str> = record
                .columns()
                .filter(|c| *c != key_column && *c != "id")
                .collect();
            if columns.is_empty() {
                return Ok(0);
            }
            let assignments = columns
                .iter()
                .map(|c| quote_ident(c).map(|q| format!("{q} = ?")))
                .collect::<Result<Vec<_>>>()?;
            let sql = format!(
                "UPDATE {} SET {} WHERE {} = ?",
                quote_ident(table)?,
                assignments.join(", "),
                quote_ident(key_column)?
            );
            let values = columns
                .iter()
                .filter_map(|c| record.get(c).cloned())
                .chain(std::iter::once(key_value.clone()));
            conn.execute(&sql, params_from_iter(values))
                .context(table, "update")
        })
    }

    /// Arbitrary read. Missing tables surface as errors.
    pub fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Record>> {
        self.pool.with_conn(|conn| query_records(conn, sql, params))
    }

    pub fn table_exists(&self, table: &str) -> Result<bool> {
        self.pool
            .with_conn(|conn| table_columns(conn, table).map(|columns| !columns.is_empty()))
    }

    /// Whether any row has `column = value`. A missing table has no rows.
    pub fn exists(&self, table: &str, column: &str, value: &SqlValue) -> Result<bool> {
        if !self.table_exists(table)? {
            return Ok(false);
        }
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE {} = ?1)",
            quote_ident(table)?,
            quote_ident(column)?
        );
        self.pool.with_conn(|conn| {
            conn.query_row(&sql, params_from_iter([value]), |row| row.get::<_, bool>(0))
                .context(table, "exists")
        })
    }

    /// Largest integer value of a column, `None` for an empty or missing table.
    pub fn max_integer(&self, table: &str, column: &str) -> Result<Option<i64>> {
        if !self.table_exists(table)? {
            return Ok(None);
        }
        let sql = format!(
            "SELECT MAX({}) FROM {}",
            quote_ident(column)?,
            quote_ident(table)?
        );
        self.pool.with_conn(|conn| {
            conn.query_row(&sql, [], |row| row.get::<_, Option<i64>>(0))
                .context(table, "max")
        })
    }

    pub fn count(&self, table: &str) -> Result<i64> {
        if !self.table_exists(table)? {
            return Ok(0);
        }
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table)?);
        self.pool.with_conn(|conn| {
            conn.query_row(&sql, [], |row| row.get(0))
                .context(table, "count")
        })
    }

    pub fn delete_where(&self, table: &str, column: &str, value: &SqlValue) -> Result<usize> {
        if !self.table_exists(table)? {
            return Ok(0);
        }
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?1",
            quote_ident(table)?,
            quote_ident(column)?
        );
        self.pool
            .with_conn(|conn| {
                conn.execute(&sql, params_from_iter([value]))
                    .context(table, "delete")
            })
    }

    /// Id of the row whose `key_column` matches the record's value, inserting
    /// the record when there is none.
    pub fn get_or_create(&self, table: &str, key_column: &str, record: &Record) -> Result<i64> {
        let key = record.get(key_column).cloned().unwrap_or(SqlValue::Null);
        if self.table_exists(table)? {
            let sql = format!(
                "SELECT \"id\" FROM {} WHERE {} = ?1 LIMIT 1",
                quote_ident(table)?,
                quote_ident(key_column)?
            );
            let existing = self.pool.with_conn(|conn| {
                query_records(conn, &sql, std::slice::from_ref(&key))
            })?;
            if let Some(id) = existing.first().and_then(|row| row.i64("id")) {
                return Ok(id);
            }
        }
        self.insert_sequential(table, record)
    }

    /// Make sure the table, its columns and the unique key exist.
    fn prepare(
        &self,
        conn: &Connection,
        table: &str,
        record: &Record,
        keys: &[&str],
    ) -> Result<()> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);

        let unique_key: (String, Vec<String>) =
            (table.to_string(), keys.iter().map(|k| k.to_string()).collect());
        let columns_known = cache.columns.get(table).is_some_and(|known| {
            record.columns().all(|c| c == "id" || known.contains(c))
        });
        if columns_known && (keys.is_empty() || cache.unique.contains(&unique_key)) {
            return Ok(());
        }

        let mut known: HashSet<String> = table_columns(conn, table)?.into_keys().collect();
        if known.is_empty() {
            self.ensurer.ensure_table(conn, table)?;
            known = table_columns(conn, table)?.into_keys().collect();
        }

        let missing: Vec<(String, ColumnType)> = record
            .iter()
            .filter(|(column, _)| *column != "id" && !known.contains(*column))
            .map(|(column, value)| (column.to_string(), ColumnType::infer(value)))
            .collect();
        if !missing.is_empty() {
            debug!("{} is missing {} column(s)", table, missing.len());
            self.ensurer.ensure_columns(conn, table, &missing)?;
            known.extend(missing.into_iter().map(|(column, _)| column));
        }

        if !keys.is_empty() {
            self.ensurer.ensure_unique(conn, table, keys)?;
            cache.unique.insert(unique_key);
        }
        cache.columns.insert(table.to_string(), known);
        Ok(())
    }
}

fn next_id(conn: &Connection, table: &str) -> Result<i64> {
    let sql = format!("SELECT COALESCE(MAX(\"id\"), 0) + 1 FROM {}", quote_ident(table)?);
    conn.query_row(&sql, [], |row| row.get(0))
        .context(table, "next id")
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn where_clause(keys: &[&str]) -> Result<String> {
    keys.iter()
        .map(|k| quote_ident(k).map(|q| format!("{q} = ?")))
        .collect::<Result<Vec<_>>>()
        .map(|parts| parts.join(" AND "))
}

fn query_records(conn: &Connection, sql: &str, params: &[SqlValue]) -> Result<Vec<Record>> {
    let mut stmt = conn.prepare(sql).context("<query>", "prepare query")?;
    let names: Vec<String> = stmt.column_names().iter().map(|n| n.to_string()).collect();
    let rows = stmt
        .query_map(params_from_iter(params.iter()), |row| {
            let mut record = Record::new();
            for (idx, name) in names.iter().enumerate() {
                record.set(name, SqlValue::from(row.get_ref(idx)?));
            }
            Ok(record)
        })
        .context("<query>", "query")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("<query>", "query")?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{AutoCreateColumns, StoreError, TableSchema};

    fn auto_store() -> SchemaEvolvingStore {
        SchemaEvolvingStore::with_ensurer(
            SqlitePool::in_memory().unwrap(),
            Arc::new(AutoCreateColumns),
        )
    }

    #[test]
    fn test_sequential_ids() {
        let store = auto_store();
        let a = store.insert("t", &Record::new().with("name", "a"), None).unwrap();
        let b = store.insert("t", &Record::new().with("name", "b"), None).unwrap();
        assert_eq!((a, b), (1, 2));
        assert_eq!(store.count("t").unwrap(), 2);
    }

    #[test]
    fn test_upsert_overwrites_non_key_columns() {
        let store = auto_store();
        let first = Record::new().with("link", "/a").with("title", "old");
        let id = store.insert("t", &first, Some("link")).unwrap();

        let second = Record::new().with("link", "/a").with("title", "new");
        let again = store.insert("t", &second, Some("link")).unwrap();

        assert_eq!(id, again);
        let rows = store.query("SELECT * FROM t", &[]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].str("title"), Some("new"));
    }

    #[test]
    fn test_missing_key_value_falls_back_to_sequential_insert() {
        let store = auto_store();
        store.insert("t", &Record::new().with("link", "/a"), Some("link")).unwrap();
        let id = store
            .insert("t", &Record::new().with("title", "no link"), Some("link"))
            .unwrap();
        assert_eq!(id, 2);
    }

    #[test]
    fn test_update_skips_key_column() {
        let store = auto_store();
        store
            .insert("t", &Record::new().with("link", "/a").with("status_code", 500i64), Some("link"))
            .unwrap();
        let changed = store
            .update(
                "t",
                &Record::new().with("link", "/ignored").with("status_code", 200i64),
                "link",
                &SqlValue::from("/a"),
            )
            .unwrap();
        assert_eq!(changed, 1);
        assert!(store.exists("t", "link", &SqlValue::from("/a")).unwrap());
        assert!(!store.exists("t", "link", &SqlValue::from("/ignored")).unwrap());
    }

    #[test]
    fn test_get_or_create_reuses_dimension_rows() {
        let store = auto_store();
        let record = Record::new().with("name", "Jan Kowalski");
        let a = store.get_or_create("judges", "name", &record).unwrap();
        let b = store.get_or_create("judges", "name", &record).unwrap();
        assert_eq!(a, b);
        assert_eq!(store.count("judges").unwrap(), 1);
    }

    #[test]
    fn test_missing_table_reads_are_empty() {
        let store = auto_store();
        assert!(!store.exists("nope", "x", &SqlValue::from("y")).unwrap());
        assert_eq!(store.max_integer("nope", "x").unwrap(), None);
        assert_eq!(store.count("nope").unwrap(), 0);
    }

    #[test]
    fn test_strict_store_rejects_unknown_columns() {
        let pool = SqlitePool::in_memory().unwrap();
        let store = SchemaEvolvingStore::new(pool);
        store
            .migrate(&SchemaRegistry::new(1).with_table(TableSchema::new("t").text("name")))
            .unwrap();

        store.insert("t", &Record::new().with("name", "ok"), None).unwrap();
        let err = store
            .insert("t", &Record::new().with("surprise", "x"), None)
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownColumn { ref column, .. } if column == "surprise"));

        let err = store.insert("other", &Record::new(), None).unwrap_err();
        assert!(matches!(err, StoreError::UnknownTable(_)));
    }

    #[test]
    fn test_sql_errors_carry_table_context() {
        let store = auto_store();
        store.insert("t", &Record::new().with("link", "/a"), None).unwrap();
        store.insert("t", &Record::new().with("link", "/a"), None).unwrap();

        // Duplicate values prevent the unique index from being created.
        let err = store
            .insert("t", &Record::new().with("link", "/a"), Some("link"))
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("table t"), "{}", message);
    }
}
