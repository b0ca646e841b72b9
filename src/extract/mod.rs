//! Offline extraction of parsed records from raw pages.
//!
//! Every source has a [`RecordExtractor`] that turns one raw row into flat
//! fields plus child collections. [`run_extraction`] drives it over the raw
//! rows that have no parsed counterpart yet.

pub mod html;
pub mod kidp;
pub mod ms;
pub mod nsa;
pub mod sections;
pub mod sn;
pub mod uzp;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::{BatchSummary, Source};
use crate::repository::namespace::{PARSED, RAW};
use crate::repository::{ColumnType, Record, SourceStore, SqlValue, StoreError, TableSchema};

pub use kidp::KidpExtractor;
pub use ms::MsExtractor;
pub use nsa::NsaExtractor;
pub use sn::SnExtractor;
pub use uzp::UzpExtractor;

/// Column linking parsed-record children back to their parent.
pub const PARENT_COLUMN: &str = "parsed_id";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("raw row has no {0} payload")]
    MissingPayload(&'static str),

    #[error("unexpected page layout: {0}")]
    Layout(String),
}

/// A child value deduplicated through a dimension table.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkedValue {
    /// Row for the dimension table; must carry the dimension key column.
    pub value: Record,
    /// Extra columns stored on the link row (e.g. a judge's role in this case).
    pub link: Record,
}

impl LinkedValue {
    pub fn new(value: Record) -> Self {
        Self {
            value,
            link: Record::new(),
        }
    }

    pub fn with_link(mut self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.link.set(column, value);
        self
    }
}

/// Child collections of a parsed record.
#[derive(Debug, Clone, PartialEq)]
pub enum ChildRows {
    /// Values shared between records (statutes, judges, topics): stored once
    /// in `dimension`, keyed by `key_column`, and linked through
    /// `link_table(parsed_id, link_column)`.
    Linked {
        dimension: &'static str,
        key_column: &'static str,
        link_table: &'static str,
        link_column: &'static str,
        values: Vec<LinkedValue>,
    },
    /// Rows owned by one record, replaced wholesale on reprocessing.
    Owned {
        table: &'static str,
        rows: Vec<Record>,
    },
}

impl ChildRows {
    pub fn len(&self) -> usize {
        match self {
            Self::Linked { values, .. } => values.len(),
            Self::Owned { rows, .. } => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fields and children extracted from one raw row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extracted {
    pub fields: Record,
    pub children: Vec<ChildRows>,
}

/// Turns raw rows of one source into parsed rows.
///
/// Extraction is pure and tolerant: elements missing from the page become
/// null fields. An `Err` means the row cannot be parsed at all.
pub trait RecordExtractor: Send + Sync {
    fn source(&self) -> Source;

    /// Natural key column shared by the raw and parsed tables.
    fn natural_key(&self) -> &'static str;

    /// Parsed table plus child tables, with short (unprefixed) names.
    fn tables(&self) -> Vec<TableSchema>;

    fn extract(&self, raw: &Record) -> Result<Extracted, ExtractError>;
}

/// Which raw rows an extraction pass visits.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractOptions {
    pub limit: Option<usize>,
    /// Reprocess rows that already have a parsed record.
    pub force: bool,
}

/// Extract every fetched (status 200) raw row without a parsed record.
///
/// Rows whose extractor fails are logged and counted as skipped. Store
/// errors abort the pass.
pub fn run_extraction(
    extractor: &dyn RecordExtractor,
    store: &SourceStore,
    options: ExtractOptions,
) -> Result<BatchSummary, StoreError> {
    let mut summary = BatchSummary::default();
    let source = extractor.source();
    if !store.table_exists(RAW)? {
        info!("{}: no raw table, nothing to parse", source);
        return Ok(summary);
    }

    let rows = pending_rows(extractor, store, options)?;
    info!("{}: {} raw rows to parse", source, rows.len());

    for raw in rows {
        summary.processed += 1;
        let key = extractor.natural_key();
        let Some(key_value) = raw.get(key).filter(|v| !v.is_null()).cloned() else {
            warn!("{}: raw row {:?} has no {}, skipping", source, raw.i64("id"), key);
            summary.skipped += 1;
            continue;
        };

        let extracted = match extractor.extract(&raw) {
            Ok(extracted) => extracted,
            Err(e) => {
                warn!("{}: cannot parse {} {:?}: {}", source, key, key_value, e);
                summary.skipped += 1;
                continue;
            }
        };

        save(store, extractor, &raw, key_value.clone(), extracted)?;
        debug!("{}: parsed {} {:?}", source, key, key_value);
        summary.imported += 1;
    }

    info!("{}: parse finished ({})", source, summary);
    Ok(summary)
}

fn pending_rows(
    extractor: &dyn RecordExtractor,
    store: &SourceStore,
    options: ExtractOptions,
) -> Result<Vec<Record>, StoreError> {
    let key = crate::repository::util::quote_ident(extractor.natural_key())?;
    let pending = if options.force || !store.table_exists(PARSED)? {
        String::new()
    } else {
        format!(
            "AND NOT EXISTS (SELECT 1 FROM {parsed} p WHERE p.{key} = r.{key})",
            parsed = store.quoted(PARSED)?,
            key = key
        )
    };
    let limit = options
        .limit
        .map(|n| format!(" LIMIT {}", n))
        .unwrap_or_default();
    let sql = format!(
        "SELECT r.* FROM {raw} r WHERE r.\"status_code\" = 200 {pending} ORDER BY r.\"id\"{limit}",
        raw = store.quoted(RAW)?,
    );
    store.query(&sql, &[])
}

fn save(
    store: &SourceStore,
    extractor: &dyn RecordExtractor,
    raw: &Record,
    key_value: SqlValue,
    extracted: Extracted,
) -> Result<(), StoreError> {
    let key = extractor.natural_key();
    let mut fields = extracted.fields;
    fields.set(key, key_value);
    if let Some(raw_id) = raw.i64("id") {
        fields.set("raw_id", raw_id);
    }
    let parsed_id = store.upsert(PARSED, &fields, &[key])?;
    let parent = SqlValue::Integer(parsed_id);

    for children in extracted.children {
        match children {
            ChildRows::Linked {
                dimension,
                key_column,
                link_table,
                link_column,
                values,
            } => {
                store.delete_where(link_table, PARENT_COLUMN, &parent)?;
                for value in values {
                    let dimension_id = store.get_or_create(dimension, key_column, &value.value)?;
                    let mut link = Record::new()
                        .with(PARENT_COLUMN, parsed_id)
                        .with(link_column, dimension_id);
                    link.extend(value.link);
                    store.upsert(link_table, &link, &[PARENT_COLUMN, link_column])?;
                }
            }
            ChildRows::Owned { table, rows } => {
                store.delete_where(table, PARENT_COLUMN, &parent)?;
                for row in rows {
                    let mut owned = Record::new().with(PARENT_COLUMN, parsed_id);
                    owned.extend(row);
                    store.insert(table, &owned, None)?;
                }
            }
        }
    }
    Ok(())
}

/// Parsed table skeleton: the natural key (unique) and the raw row id.
pub fn parsed_table(key_column: &str, key_type: ColumnType) -> TableSchema {
    TableSchema::new(PARSED)
        .column(key_column, key_type)
        .integer("raw_id")
        .unique(&[key_column])
}

/// Schema of a dimension table keyed by a unique text column.
pub fn dimension_table(name: &str, key_column: &str, extra: &[&str]) -> TableSchema {
    TableSchema::new(name)
        .text(key_column)
        .texts(extra)
        .unique(&[key_column])
}

/// Schema of a link table between parsed records and a dimension.
pub fn link_table(name: &str, link_column: &str, extra: &[&str]) -> TableSchema {
    TableSchema::new(name)
        .integers(&[PARENT_COLUMN, link_column])
        .texts(extra)
        .unique(&[PARENT_COLUMN, link_column])
}

/// Schema of a table of rows owned by one parsed record.
pub fn owned_table(name: &str, columns: &[&str]) -> TableSchema {
    TableSchema::new(name)
        .integer(PARENT_COLUMN)
        .texts(columns)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::repository::{SchemaEvolvingStore, SchemaRegistry, SqlitePool};

    /// Parses `body` as comma-separated tags.
    struct TagExtractor;

    impl RecordExtractor for TagExtractor {
        fn source(&self) -> Source {
            Source::Ms
        }

        fn natural_key(&self) -> &'static str {
            "title"
        }

        fn tables(&self) -> Vec<TableSchema> {
            vec![
                TableSchema::new(PARSED)
                    .text("title")
                    .integer("raw_id")
                    .text("tag_count")
                    .unique(&["title"]),
                dimension_table("tags", "name", &[]),
                link_table("case_tags", "tag_id", &["position"]),
            ]
        }

        fn extract(&self, raw: &Record) -> Result<Extracted, ExtractError> {
            let body = raw.str("body").ok_or(ExtractError::MissingPayload("body"))?;
            let tags: Vec<&str> = body.split(',').map(str::trim).collect();
            Ok(Extracted {
                fields: Record::new().with("tag_count", tags.len().to_string()),
                children: vec![ChildRows::Linked {
                    dimension: "tags",
                    key_column: "name",
                    link_table: "case_tags",
                    link_column: "tag_id",
                    values: tags
                        .iter()
                        .enumerate()
                        .map(|(i, t)| {
                            LinkedValue::new(Record::new().with("name", *t))
                                .with_link("position", i.to_string())
                        })
                        .collect(),
                }],
            })
        }
    }

    fn store() -> SourceStore {
        let store = Arc::new(SchemaEvolvingStore::new(SqlitePool::in_memory().unwrap()));
        let mut registry = SchemaRegistry::new(1).with_table(
            TableSchema::new("ms_raw")
                .texts(&["title", "body"])
                .integer("status_code")
                .unique(&["title"]),
        );
        for table in TagExtractor.tables() {
            let name = format!("ms_{}", table.name());
            registry.register(table.renamed(name));
        }
        store.migrate(&registry).unwrap();
        SourceStore::new(store, Source::Ms)
    }

    fn seed(store: &SourceStore, title: &str, body: Option<&str>, status: i64) {
        let mut record = Record::new().with("title", title).with("status_code", status);
        if let Some(body) = body {
            record.set("body", body);
        }
        store.insert(RAW, &record, Some("title")).unwrap();
    }

    #[test]
    fn test_extraction_skips_parsed_and_failed_rows() {
        let store = store();
        seed(&store, "a", Some("x, y"), 200);
        seed(&store, "b", None, 200);
        seed(&store, "c", Some("z"), 404);

        let summary = run_extraction(&TagExtractor, &store, ExtractOptions::default()).unwrap();
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.imported, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(store.count("tags").unwrap(), 2);
        assert_eq!(store.count("case_tags").unwrap(), 2);

        // Parsed rows are not visited again; "b" still fails.
        let summary = run_extraction(&TagExtractor, &store, ExtractOptions::default()).unwrap();
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.imported, 0);
    }

    #[test]
    fn test_forced_reprocessing_replaces_links() {
        let store = store();
        seed(&store, "a", Some("x, y"), 200);
        run_extraction(&TagExtractor, &store, ExtractOptions::default()).unwrap();

        store
            .update(RAW, &Record::new().with("body", "y, w"), "title", &"a".into())
            .unwrap();
        let options = ExtractOptions {
            force: true,
            ..Default::default()
        };
        run_extraction(&TagExtractor, &store, options).unwrap();

        assert_eq!(store.count(PARSED).unwrap(), 1);
        // "x" stays in the dimension but is no longer linked.
        assert_eq!(store.count("tags").unwrap(), 3);
        let linked = store
            .query(
                "SELECT t.name FROM ms_case_tags l JOIN ms_tags t ON t.id = l.tag_id ORDER BY t.name",
                &[],
            )
            .unwrap();
        let names: Vec<_> = linked.iter().filter_map(|r| r.text("name")).collect();
        assert_eq!(names, vec!["w", "y"]);
    }
}
