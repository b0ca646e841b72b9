//! SQLite connection pool.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use rusqlite::Connection;

use super::{Result, StoreError};

const PRAGMAS: &str = r#"
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    PRAGMA foreign_keys = ON;
    PRAGMA busy_timeout = 30000;
"#;

/// Idle file connections kept for reuse.
const MAX_IDLE: usize = 8;

/// SQLite pool.
///
/// File databases hand out a connection per operation, reusing idle ones,
/// so concurrent crawler tasks never share a handle; in-memory databases
/// keep a single shared connection, otherwise every call would see an empty
/// database.
#[derive(Clone)]
pub enum SqlitePool {
    File {
        path: PathBuf,
        idle: Arc<Mutex<Vec<Connection>>>,
    },
    Memory(Arc<Mutex<Connection>>),
}

impl SqlitePool {
    /// Open (and create if needed) a database file.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = connect(path).map_err(|source| StoreError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::File {
            path: path.to_path_buf(),
            idle: Arc::new(Mutex::new(vec![conn])),
        })
    }

    /// A private in-memory database.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self::Memory(Arc::new(Mutex::new(conn))))
    }

    /// Run `f` with a connection.
    ///
    /// This blocks the calling thread for as long as SQLite does (up to the
    /// busy timeout when another writer holds the lock); async callers go
    /// through [`SourceStore::interact`](super::SourceStore::interact).
    pub fn with_conn<T, E>(
        &self,
        f: impl FnOnce(&Connection) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<rusqlite::Error>,
    {
        match self {
            Self::File { path, idle } => {
                let reused = idle.lock().unwrap_or_else(PoisonError::into_inner).pop();
                let conn = match reused {
                    Some(conn) => conn,
                    None => connect(path)?,
                };
                let result = f(&conn);
                let mut idle = idle.lock().unwrap_or_else(PoisonError::into_inner);
                if idle.len() < MAX_IDLE {
                    idle.push(conn);
                }
                result
            }
            Self::Memory(conn) => {
                let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
                f(&conn)
            }
        }
    }

    /// Number of idle file connections.
    pub fn idle(&self) -> usize {
        match self {
            Self::File { idle, .. } => idle.lock().unwrap_or_else(PoisonError::into_inner).len(),
            Self::Memory(_) => 0,
        }
    }

    /// Database location for display.
    pub fn describe(&self) -> String {
        match self {
            Self::File { path, .. } => path.display().to_string(),
            Self::Memory(_) => ":memory:".to_string(),
        }
    }
}

fn connect(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch(PRAGMAS)?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_pool_shares_connection() {
        let pool = SqlitePool::in_memory().unwrap();
        pool.with_conn(|conn| conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY)"))
            .unwrap();
        let count: i64 = pool
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE name = 't'",
                    [],
                    |row| row.get(0),
                )
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_file_pool_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("data.db");
        let pool = SqlitePool::open(&path).unwrap();
        assert!(path.exists());
        assert!(pool.describe().ends_with("data.db"));
    }

    #[test]
    fn test_file_connections_are_reused() {
        let dir = tempfile::tempdir().unwrap();
        let pool = SqlitePool::open(&dir.path().join("data.db")).unwrap();
        assert_eq!(pool.idle(), 1);

        for _ in 0..3 {
            pool.with_conn(|conn| conn.execute_batch("CREATE TABLE IF NOT EXISTS t (id INTEGER)"))
                .unwrap();
        }
        assert_eq!(pool.idle(), 1);

        // A nested call needs a second connection; both go back afterwards.
        pool.with_conn(|_| pool.with_conn(|conn| conn.execute_batch("SELECT 1")))
            .unwrap();
        assert_eq!(pool.idle(), 2);
    }
}
