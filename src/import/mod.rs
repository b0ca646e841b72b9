//! CSV import of administrative-court listing rows.
//!
//! Rows exported from the search results (`link,title,date`) are stored in
//! `nsa_raw` without a detail page; the repair pass fetches the details later.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::BatchSummary;
use crate::repository::namespace::RAW;
use crate::repository::{Record, SourceStore, StoreError};

const COLUMNS: [&str; 3] = ["link", "title", "date"];

static ISO_DATE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV header has no '{0}' column")]
    MissingColumn(&'static str),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Split CSV text into rows of fields. Quoted fields may contain the
/// separator, newlines and doubled quotes; CRLF line ends are accepted.
pub fn parse_rows(text: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                chars.next();
                field.push('"');
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => row.push(std::mem::take(&mut field)),
            '\r' | '\n' if !in_quotes => {
                if c == '\r' && chars.peek() == Some(&'\n') {
                    chars.next();
                }
                row.push(std::mem::take(&mut field));
                if !(row.len() == 1 && row[0].is_empty()) {
                    rows.push(std::mem::take(&mut row));
                } else {
                    row.clear();
                }
            }
            _ => field.push(c),
        }
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    rows
}

/// Why a listing row cannot be imported, if it cannot.
fn rejection(link: &str, title: &str, date: &str) -> Option<&'static str> {
    if link.is_empty() || title.is_empty() || date.is_empty() {
        Some("missing link, title or date")
    } else if !link.starts_with('/') {
        Some("link is not a site path")
    } else if !ISO_DATE.is_match(date) {
        Some("date is not YYYY-MM-DD")
    } else {
        None
    }
}

/// Import listing rows from CSV text into the raw table.
pub fn import_rows(store: &SourceStore, text: &str) -> Result<BatchSummary, ImportError> {
    let mut rows = parse_rows(text).into_iter();
    let header = rows.next().unwrap_or_default();
    let mut positions = [0usize; 3];
    for (slot, column) in positions.iter_mut().zip(COLUMNS) {
        *slot = header
            .iter()
            .position(|h| h.trim().trim_start_matches('\u{feff}').eq_ignore_ascii_case(column))
            .ok_or(ImportError::MissingColumn(column))?;
    }

    let mut summary = BatchSummary::default();
    for (index, row) in rows.enumerate() {
        summary.processed += 1;
        let line = index + 2;
        let cell = |i: usize| row.get(positions[i]).map(|v| v.trim()).unwrap_or_default();
        let (link, title, date) = (cell(0), cell(1), cell(2));

        if let Some(reason) = rejection(link, title, date) {
            warn!("import: line {} skipped: {}", line, reason);
            summary.skipped += 1;
            continue;
        }
        if store.exists(RAW, "link", &link.into())? {
            debug!("import: line {} skipped: {} already stored", line, link);
            summary.skipped += 1;
            continue;
        }

        let record = Record::new()
            .with("link", link)
            .with("title", title)
            .with("date", date);
        store.insert(RAW, &record, Some("link"))?;
        summary.imported += 1;
    }

    info!("import finished ({})", summary);
    Ok(summary)
}

/// Import a CSV file.
pub fn import_file(store: &SourceStore, path: &Path) -> Result<BatchSummary, ImportError> {
    let text = std::fs::read_to_string(path).map_err(|source| ImportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    info!("import: reading {}", path.display());
    import_rows(store, &text)
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Arc;

    use super::*;
    use crate::models::Source;
    use crate::repository::{SchemaEvolvingStore, SqlitePool};
    use crate::sources::SourceRegistry;

    fn store() -> SourceStore {
        let store = Arc::new(SchemaEvolvingStore::new(SqlitePool::in_memory().unwrap()));
        store.migrate(&SourceRegistry::default().schema()).unwrap();
        SourceStore::new(store, Source::Nsa)
    }

    #[test]
    fn test_parse_quoted_fields() {
        let rows = parse_rows("link,title\r\n/doc/1,\"Wyrok, \"\"NSA\"\"\nz dnia\"\n\n/doc/2,x");
        assert_eq!(
            rows,
            vec![
                vec!["link".to_string(), "title".to_string()],
                vec!["/doc/1".to_string(), "Wyrok, \"NSA\"\nz dnia".to_string()],
                vec!["/doc/2".to_string(), "x".to_string()],
            ]
        );
    }

    #[test]
    fn test_import_validates_and_deduplicates() {
        let store = store();
        let csv = "title,link,date\n\
                   Wyrok A,/doc/A,2024-01-02\n\
                   Wyrok B,http://x/doc/B,2024-01-02\n\
                   Wyrok C,/doc/C,\n\
                   Wyrok A again,/doc/A,2024-01-03\n\
                   Wyrok D,/doc/D,02.01.2024\n";
        let summary = import_rows(&store, csv).unwrap();
        assert_eq!(summary.processed, 5);
        assert_eq!(summary.imported, 1);
        assert_eq!(summary.skipped, 4);
        assert_eq!(store.count(RAW).unwrap(), 1);
    }

    #[test]
    fn test_import_file_requires_columns() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "link,name").unwrap();
        let err = import_file(&store(), file.path()).unwrap_err();
        assert!(matches!(err, ImportError::MissingColumn("title")));
    }
}
