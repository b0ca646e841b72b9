//! Cross-source document shape.

use serde::Serialize;

use super::Source;
use crate::repository::Record;

/// One row of the `unified_docs` table.
///
/// Derived from parsed rows; `(source, source_pk)` is unique and the whole
/// table can be rebuilt at any time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnifiedDocument {
    pub source: Source,
    pub source_pk: String,
    pub title: String,
    pub date_text: Option<String>,
    pub link: Option<String>,
    pub content_text: String,
    pub meta: serde_json::Value,
}

impl UnifiedDocument {
    /// Column values in table order. The meta blob is serialized with sorted keys.
    pub fn to_record(&self) -> Record {
        Record::new()
            .with("source", self.source.as_str())
            .with("source_pk", self.source_pk.as_str())
            .with("title", self.title.as_str())
            .with("date_text", self.date_text.clone())
            .with("link", self.link.clone())
            .with("content_text", self.content_text.as_str())
            .with("meta", self.meta.to_string())
    }
}
