use super::{
    first_non_empty, json_object, json_rows, linked_rows, parsed_rows, source_pk,
    with_date_source, ContentBuilder, UnifiedMapper,
};
use crate::models::{Source, UnifiedDocument};
use crate::repository::{Record, SourceStore, StoreError};

const TITLES: &[&str] = &["document_title", "title"];
const DATES: &[&str] = &["judgment_date", "publication_date"];
const DEFAULT_TITLE: &str = "MS sprawa";

/// Common-court document from a parsed row and its cited provisions.
pub fn document(row: &Record, provisions: &[Record]) -> Option<UnifiedDocument> {
    let date = first_non_empty(row, DATES);
    let content = ContentBuilder::new()
        .line("Sygnatura", row.text("case_number"))
        .line("Sąd", row.text("court"))
        .line("Wydział", row.text("department"))
        .line("Hasła tematyczne", row.text("topics"))
        .block("Podstawa prawna", row.text("legal_basis"))
        .block("Wyrok", row.text("verdict"))
        .block("Uzasadnienie", row.text("rationale"))
        .block("Zarządzenie", row.text("directive"))
        .block("Postanowienie", row.text("decision"))
        .block("Uchwała", row.text("resolution"))
        .build();

    let mut meta = json_object(
        row,
        &[
            "case_number",
            "court",
            "department",
            "topics",
            "judges",
            "judgment_date",
            "publication_date",
            "finality_date",
            "is_final",
        ],
    );
    meta.insert("provisions".to_string(), json_rows(provisions));

    Some(UnifiedDocument {
        source: Source::Ms,
        source_pk: source_pk(row, "title")?,
        title: first_non_empty(row, TITLES)
            .map(|(_, title)| title)
            .unwrap_or_else(|| DEFAULT_TITLE.to_string()),
        date_text: date.as_ref().map(|(_, value)| value.clone()),
        link: row.text("details_link"),
        content_text: content,
        meta: with_date_source(meta, &date),
    })
}

#[derive(Debug, Default)]
pub struct MsMapper;

impl UnifiedMapper for MsMapper {
    fn source(&self) -> Source {
        Source::Ms
    }

    fn documents(&self, store: &SourceStore) -> Result<Vec<UnifiedDocument>, StoreError> {
        let mut documents = Vec::new();
        for row in parsed_rows(store)? {
            let Some(id) = row.i64("id") else {
                continue;
            };
            let provisions = linked_rows(
                store,
                "case_provisions",
                "provision_id",
                "provisions",
                &["title", "link"],
                &[],
                id,
            )?;
            documents.extend(document(&row, &provisions));
        }
        Ok(documents)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;

    #[test]
    fn test_title_and_date_priority() {
        let row = Record::new()
            .with("title", "I C 1/24")
            .with("document_title", "")
            .with("publication_date", "2024-02-01");
        let doc = document(&row, &[]).unwrap();
        assert_eq!(doc.title, "I C 1/24");
        assert_eq!(doc.date_text.as_deref(), Some("2024-02-01"));
        assert_eq!(doc.meta["date_text_source"], Value::from("publication_date"));
        assert_eq!(doc.meta["provisions"], Value::Array(Vec::new()));

        let row = Record::new().with("title", "I C 1/24").with("document_title", "WYROK");
        assert_eq!(document(&row, &[]).unwrap().title, "WYROK");
    }

    #[test]
    fn test_row_without_key_is_dropped() {
        assert!(document(&Record::new().with("court", "SR"), &[]).is_none());
    }
}
