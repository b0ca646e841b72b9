//! Projection of parsed records into the cross-source `unified_docs` table.
//!
//! Each unified source has a [`UnifiedMapper`] that reads its parsed table
//! (plus child tables) and builds [`UnifiedDocument`]s. The mapping is a pure
//! function of the parsed data, so [`rebuild`] can run any number of times:
//! every run overwrites all mapped columns with the same values.

mod ms;
mod nsa;
mod sn;
mod uzp;

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::models::{BatchSummary, Source, UnifiedDocument};
use crate::repository::namespace::PARSED;
use crate::repository::util::quote_ident;
use crate::repository::{Record, SourceStore, SqlValue, StoreError, TableSchema};

pub use ms::MsMapper;
pub use nsa::NsaMapper;
pub use sn::SnMapper;
pub use uzp::UzpMapper;

pub const UNIFIED_TABLE: &str = "unified_docs";

/// Columns of `unified_docs`, unique on `(source, source_pk)`.
pub fn unified_table() -> TableSchema {
    TableSchema::new(UNIFIED_TABLE)
        .texts(&[
            "source",
            "source_pk",
            "title",
            "date_text",
            "link",
            "content_text",
            "meta",
        ])
        .unique(&["source", "source_pk"])
}

/// Builds unified documents from one source's parsed tables.
pub trait UnifiedMapper: Send + Sync {
    fn source(&self) -> Source;

    /// Every document of the source, in parsed-row order.
    fn documents(&self, store: &SourceStore) -> Result<Vec<UnifiedDocument>, StoreError>;
}

/// Upsert every document of a source into `unified_docs`.
pub fn rebuild(mapper: &dyn UnifiedMapper, store: &SourceStore) -> Result<BatchSummary, StoreError> {
    let source = mapper.source();
    let documents = mapper.documents(store)?;
    info!("{}: {} documents to unify", source, documents.len());

    let mut summary = BatchSummary::default();
    for document in documents {
        summary.processed += 1;
        store
            .inner()
            .upsert(UNIFIED_TABLE, &document.to_record(), &["source", "source_pk"])?;
        debug!("{}: unified {}", source, document.source_pk);
        summary.imported += 1;
    }

    info!("{}: unify finished ({})", source, summary);
    Ok(summary)
}

/// First column holding non-blank text, with the column it came from.
pub fn first_non_empty(row: &Record, columns: &[&'static str]) -> Option<(&'static str, String)> {
    columns.iter().find_map(|column| {
        row.text(column)
            .filter(|value| !value.trim().is_empty())
            .map(|value| (*column, value))
    })
}

/// Human-readable document body: labelled sections separated by blank lines.
/// Sections without a value are left out.
#[derive(Debug, Default)]
pub struct ContentBuilder {
    sections: Vec<String>,
}

impl ContentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Label: value`
    pub fn line(mut self, label: &str, value: Option<String>) -> Self {
        if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
            self.sections.push(format!("{}: {}", label, value.trim()));
        }
        self
    }

    /// `Label:` followed by the value on its own lines.
    pub fn block(mut self, label: &str, value: Option<String>) -> Self {
        if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
            self.sections.push(format!("{}:\n{}", label, value.trim()));
        }
        self
    }

    pub fn build(self) -> String {
        self.sections.join("\n\n")
    }
}

/// JSON value of a column.
pub fn json_value(value: Option<&SqlValue>) -> Value {
    match value {
        None | Some(SqlValue::Null) => Value::Null,
        Some(SqlValue::Integer(i)) => Value::from(*i),
        Some(SqlValue::Real(r)) => Value::from(*r),
        Some(SqlValue::Text(s)) => Value::from(s.as_str()),
    }
}

/// Object of the given columns of a row.
pub fn json_object(row: &Record, columns: &[&str]) -> Map<String, Value> {
    columns
        .iter()
        .map(|column| (column.to_string(), json_value(row.get(column))))
        .collect()
}

/// Every row as an object of all its columns.
pub fn json_rows(rows: &[Record]) -> Value {
    Value::Array(
        rows.iter()
            .map(|row| {
                Value::Object(
                    row.iter()
                        .map(|(column, value)| (column.to_string(), json_value(Some(value))))
                        .collect(),
                )
            })
            .collect(),
    )
}

/// Parsed rows of a source ordered by id; empty before the first parse.
pub fn parsed_rows(store: &SourceStore) -> Result<Vec<Record>, StoreError> {
    if !store.table_exists(PARSED)? {
        return Ok(Vec::new());
    }
    let sql = format!("SELECT * FROM {} ORDER BY \"id\"", store.quoted(PARSED)?);
    store.query(&sql, &[])
}

/// Dimension rows linked to one parsed record: the `columns` of the dimension
/// plus the `link_extra` columns of the link row, ordered by the first
/// dimension column.
pub fn linked_rows(
    store: &SourceStore,
    link_table: &str,
    link_column: &str,
    dimension: &str,
    columns: &[&str],
    link_extra: &[&str],
    parsed_id: i64,
) -> Result<Vec<Record>, StoreError> {
    if !store.table_exists(link_table)? || !store.table_exists(dimension)? {
        return Ok(Vec::new());
    }
    let mut selected = Vec::with_capacity(columns.len() + link_extra.len());
    for column in columns {
        selected.push(format!("d.{}", quote_ident(column)?));
    }
    for column in link_extra {
        selected.push(format!("l.{}", quote_ident(column)?));
    }
    let order = match columns.first() {
        Some(column) => format!("d.{}, d.\"id\"", quote_ident(column)?),
        None => "d.\"id\"".to_string(),
    };
    let sql = format!(
        "SELECT {selected} FROM {link} l JOIN {dimension} d ON d.\"id\" = l.{link_column} \
         WHERE l.\"parsed_id\" = ?1 ORDER BY {order}",
        selected = selected.join(", "),
        link = store.quoted(link_table)?,
        dimension = store.quoted(dimension)?,
        link_column = quote_ident(link_column)?,
    );
    store.query(&sql, &[SqlValue::Integer(parsed_id)])
}

/// Rows owned by one parsed record, ordered by the first column.
pub fn owned_rows(
    store: &SourceStore,
    table: &str,
    columns: &[&str],
    parsed_id: i64,
) -> Result<Vec<Record>, StoreError> {
    if !store.table_exists(table)? {
        return Ok(Vec::new());
    }
    let selected = columns
        .iter()
        .map(|column| quote_ident(column))
        .collect::<Result<Vec<_>, _>>()?;
    let order = selected.first().cloned().unwrap_or_else(|| "\"id\"".to_string());
    let sql = format!(
        "SELECT {} FROM {} WHERE \"parsed_id\" = ?1 ORDER BY {}, \"id\"",
        selected.join(", "),
        store.quoted(table)?,
        order
    );
    store.query(&sql, &[SqlValue::Integer(parsed_id)])
}

/// Natural key of a parsed row as text.
pub(crate) fn source_pk(row: &Record, key: &str) -> Option<String> {
    row.get(key).and_then(SqlValue::to_text)
}

/// Meta object with `date_text_source` set.
pub(crate) fn with_date_source(mut meta: Map<String, Value>, date: &Option<(&str, String)>) -> Value {
    meta.insert(
        "date_text_source".to_string(),
        date.as_ref()
            .map_or(Value::Null, |(column, _)| Value::from(*column)),
    );
    Value::Object(meta)
}
