//! Per-source table namespaces.

use std::sync::Arc;

use super::store::SchemaEvolvingStore;
use super::util::quote_ident;
use super::value::{Record, SqlValue};
use super::{Result, StoreError};
use crate::models::Source;

/// Raw page table suffix.
pub const RAW: &str = "raw";
/// Parsed record table suffix.
pub const PARSED: &str = "parsed";

/// A [`SchemaEvolvingStore`] view whose table names are prefixed with the
/// source tag, so `raw` means `nsa_raw` for the administrative courts.
#[derive(Clone)]
pub struct SourceStore {
    store: Arc<SchemaEvolvingStore>,
    source: Source,
}

impl SourceStore {
    pub fn new(store: Arc<SchemaEvolvingStore>, source: Source) -> Self {
        Self { store, source }
    }

    pub fn source(&self) -> Source {
        self.source
    }

    /// The shared, un-prefixed store.
    pub fn inner(&self) -> &Arc<SchemaEvolvingStore> {
        &self.store
    }

    /// Full table name for a short name.
    pub fn table(&self, name: &str) -> String {
        table_name(self.source, name)
    }

    /// Quoted full table name, for hand-written queries.
    pub fn quoted(&self, name: &str) -> Result<String> {
        quote_ident(&self.table(name))
    }

    /// Run store work on the blocking thread pool.
    ///
    /// SQLite calls block for as long as the database is busy; crawler
    /// tasks go through here so one source waiting on the write lock does
    /// not stall the runtime thread other sources are scheduled on.
    pub async fn interact<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&SourceStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| StoreError::Interact(e.to_string()))?
    }

    pub fn insert(&self, table: &str, record: &Record, unique_key: Option<&str>) -> Result<i64> {
        self.store.insert(&self.table(table), record, unique_key)
    }

    pub fn upsert(&self, table: &str, record: &Record, keys: &[&str]) -> Result<i64> {
        self.store.upsert(&self.table(table), record, keys)
    }

    pub fn update(
        &self,
        table: &str,
        record: &Record,
        key_column: &str,
        key_value: &SqlValue,
    ) -> Result<usize> {
        self.store
            .update(&self.table(table), record, key_column, key_value)
    }

    pub fn exists(&self, table: &str, column: &str, value: &SqlValue) -> Result<bool> {
        self.store.exists(&self.table(table), column, value)
    }

    pub fn max_integer(&self, table: &str, column: &str) -> Result<Option<i64>> {
        self.store.max_integer(&self.table(table), column)
    }

    pub fn count(&self, table: &str) -> Result<i64> {
        self.store.count(&self.table(table))
    }

    pub fn delete_where(&self, table: &str, column: &str, value: &SqlValue) -> Result<usize> {
        self.store.delete_where(&self.table(table), column, value)
    }

    pub fn get_or_create(&self, table: &str, key_column: &str, record: &Record) -> Result<i64> {
        self.store
            .get_or_create(&self.table(table), key_column, record)
    }

    pub fn table_exists(&self, table: &str) -> Result<bool> {
        self.store.table_exists(&self.table(table))
    }

    pub fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Record>> {
        self.store.query(sql, params)
    }
}

/// `{source}_{name}`.
pub fn table_name(source: Source, name: &str) -> String {
    format!("{}_{}", source.as_str(), name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{AutoCreateColumns, SqlitePool};

    #[test]
    fn test_sources_write_disjoint_tables() {
        let store = Arc::new(SchemaEvolvingStore::with_ensurer(
            SqlitePool::in_memory().unwrap(),
            Arc::new(AutoCreateColumns),
        ));
        let ms = SourceStore::new(store.clone(), Source::Ms);
        let nsa = SourceStore::new(store.clone(), Source::Nsa);

        ms.insert(RAW, &Record::new().with("title", "a"), Some("title"))
            .unwrap();
        nsa.insert(RAW, &Record::new().with("link", "/b"), Some("link"))
            .unwrap();

        assert_eq!(store.count("ms_raw").unwrap(), 1);
        assert_eq!(store.count("nsa_raw").unwrap(), 1);
        assert_eq!(ms.quoted(PARSED).unwrap(), "\"ms_parsed\"");
    }

    #[tokio::test]
    async fn test_interact_runs_off_the_runtime() {
        let store = Arc::new(SchemaEvolvingStore::with_ensurer(
            SqlitePool::in_memory().unwrap(),
            Arc::new(AutoCreateColumns),
        ));
        let uzp = SourceStore::new(store, Source::Uzp);

        let id = uzp
            .interact(|s| s.insert(RAW, &Record::new().with("site_index", 3i64), Some("site_index")))
            .await
            .unwrap();
        assert!(id > 0);
        let largest = uzp
            .interact(|s| s.max_integer(RAW, "site_index"))
            .await
            .unwrap();
        assert_eq!(largest, Some(3));
    }
}
