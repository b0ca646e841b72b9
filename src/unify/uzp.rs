use super::{
    first_non_empty, json_object, json_rows, linked_rows, parsed_rows, source_pk,
    with_date_source, ContentBuilder, UnifiedMapper,
};
use crate::models::{Source, UnifiedDocument};
use crate::repository::{Record, SourceStore, StoreError};

const TITLES: &[&str] = &["document_type", "case_number"];
const DATES: &[&str] = &["issue_date", "judgment_date"];
const DEFAULT_TITLE: &str = "UZP dokument";

/// Procurement-appeal document from a parsed row, its topics and provisions.
pub fn document(row: &Record, topics: &[Record], provisions: &[Record]) -> Option<UnifiedDocument> {
    let date = first_non_empty(row, DATES);
    let content = ContentBuilder::new()
        .line("Sygnatura", row.text("case_number"))
        .line("Organ wydający", row.text("issuing_authority"))
        .line("Rodzaj dokumentu", row.text("document_type"))
        .line("Zamawiający", row.text("purchaser"))
        .line("Miejscowość", row.text("city"))
        .line("Tryb postępowania", row.text("procedure"))
        .line("Rodzaj zamówienia", row.text("contract_type"))
        .block("Wyrok", row.text("judgment"))
        .block("Uzasadnienie", row.text("rationale"))
        .build();

    let mut meta = json_object(
        row,
        &[
            "case_number",
            "resolution",
            "issuing_authority",
            "document_type",
            "chairman",
            "purchaser",
            "city",
            "procedure",
            "contract_type",
            "judgment_year",
        ],
    );
    meta.insert("topics".to_string(), json_rows(topics));
    meta.insert("key_provisions".to_string(), json_rows(provisions));

    Some(UnifiedDocument {
        source: Source::Uzp,
        source_pk: source_pk(row, "site_index")?,
        title: first_non_empty(row, TITLES)
            .map(|(_, title)| title)
            .unwrap_or_else(|| DEFAULT_TITLE.to_string()),
        date_text: date.as_ref().map(|(_, value)| value.clone()),
        link: row.text("page_link"),
        content_text: content,
        meta: with_date_source(meta, &date),
    })
}

#[derive(Debug, Default)]
pub struct UzpMapper;

impl UnifiedMapper for UzpMapper {
    fn source(&self) -> Source {
        Source::Uzp
    }

    fn documents(&self, store: &SourceStore) -> Result<Vec<UnifiedDocument>, StoreError> {
        let mut documents = Vec::new();
        for row in parsed_rows(store)? {
            let Some(id) = row.i64("id") else {
                continue;
            };
            let topics = linked_rows(store, "case_topics", "topic_id", "topics", &["name", "id"], &[], id)?;
            let provisions = linked_rows(
                store,
                "case_provisions",
                "provision_id",
                "provisions",
                &["reference", "id"],
                &[],
                id,
            )?;
            documents.extend(document(&row, &topics, &provisions));
        }
        Ok(documents)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;

    #[test]
    fn test_integer_key_and_date_fallback() {
        let row = Record::new()
            .with("site_index", 42i64)
            .with("judgment_date", "5 stycznia 2024");
        let doc = document(&row, &[], &[]).unwrap();
        assert_eq!(doc.source_pk, "42");
        assert_eq!(doc.title, "UZP dokument");
        assert_eq!(doc.date_text.as_deref(), Some("5 stycznia 2024"));
        assert_eq!(doc.meta["date_text_source"], Value::from("judgment_date"));
    }

    #[test]
    fn test_content_sections_in_order() {
        let row = Record::new()
            .with("site_index", 7i64)
            .with("case_number", "KIO 7/24")
            .with("purchaser", "Gmina Gdynia")
            .with("judgment", "oddala odwołanie")
            .with("rationale", "Izba zważyła");
        let doc = document(&row, &[], &[]).unwrap();
        assert_eq!(
            doc.content_text,
            "Sygnatura: KIO 7/24\n\nZamawiający: Gmina Gdynia\n\nWyrok:\noddala odwołanie\n\nUzasadnienie:\nIzba zważyła"
        );
    }
}
