//! Schema registry migrations and column auto-creation on a database file.

use std::sync::Arc;

use orzeczenia::models::Source;
use orzeczenia::repository::namespace::RAW;
use orzeczenia::repository::{
    AutoCreateColumns, Record, SchemaEvolvingStore, SourceStore, SqlitePool, StoreError,
    StrictColumns,
};
use orzeczenia::sources::SourceRegistry;

fn column_types(pool: &SqlitePool, table: &str) -> Vec<(String, String)> {
    pool.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{}\")", table))?;
        let rows = stmt.query_map([], |row| Ok((row.get(1)?, row.get(2)?)))?;
        rows.collect::<rusqlite::Result<Vec<(String, String)>>>()
    })
    .unwrap()
}

#[test]
fn test_migrate_is_repeatable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("records.db");
    let registry = SourceRegistry::default().schema();

    let store = SchemaEvolvingStore::new(SqlitePool::open(&path).unwrap());
    let first = store.migrate(&registry).unwrap();
    assert!(first.tables_created > 0);

    // A new process against the same file finds nothing to do.
    let store = SchemaEvolvingStore::new(SqlitePool::open(&path).unwrap());
    let second = store.migrate(&registry).unwrap();
    assert_eq!(second.tables_created, 0);
    assert_eq!(second.columns_added, 0);
    assert!(store.table_exists("unified_docs").unwrap());
    assert!(store.table_exists("kidp_parsed").unwrap());
}

#[test]
fn test_unseen_fields_add_one_typed_column_each() {
    let dir = tempfile::tempdir().unwrap();
    let pool = SqlitePool::open(&dir.path().join("records.db")).unwrap();
    let store = SchemaEvolvingStore::with_ensurer(pool.clone(), Arc::new(AutoCreateColumns));
    store.migrate(&SourceRegistry::default().schema()).unwrap();
    let uzp = SourceStore::new(Arc::new(store), Source::Uzp);

    let before = column_types(&pool, "uzp_raw").len();
    uzp.insert(
        RAW,
        &Record::new()
            .with("site_index", 7i64)
            .with("status_code", 200i64)
            .with("signature_note", "KIO 1/24"),
        Some("site_index"),
    )
    .unwrap();
    let after = column_types(&pool, "uzp_raw");
    assert_eq!(after.len(), before + 1);
    assert!(after.contains(&("signature_note".to_string(), "TEXT".to_string())));

    uzp.insert(
        RAW,
        &Record::new().with("site_index", 8i64).with("page_count", 3i64),
        Some("site_index"),
    )
    .unwrap();
    let last = column_types(&pool, "uzp_raw");
    assert_eq!(last.len(), before + 2);
    assert!(last.contains(&("page_count".to_string(), "INTEGER".to_string())));
}

#[test]
fn test_strict_store_rejects_unseen_fields() {
    let pool = SqlitePool::in_memory().unwrap();
    let store = SchemaEvolvingStore::with_ensurer(pool, Arc::new(StrictColumns));
    store.migrate(&SourceRegistry::default().schema()).unwrap();
    let kidp = SourceStore::new(Arc::new(store), Source::Kidp);

    let err = kidp
        .insert(
            RAW,
            &Record::new().with("advisor_url", "/a/1").with("favourite_colour", "blue"),
            Some("advisor_url"),
        )
        .unwrap_err();
    assert!(matches!(err, StoreError::UnknownColumn { ref column, .. } if column == "favourite_colour"));
    assert_eq!(kidp.count(RAW).unwrap(), 0);
}
