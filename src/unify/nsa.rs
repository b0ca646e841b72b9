use super::{
    first_non_empty, json_object, json_rows, linked_rows, owned_rows, parsed_rows, source_pk,
    with_date_source, ContentBuilder, UnifiedMapper,
};
use crate::models::{Source, UnifiedDocument};
use crate::repository::{Record, SourceStore, StoreError};

const TITLES: &[&str] = &["title", "case_number"];
const DATES: &[&str] = &["receipt_date"];
const DEFAULT_TITLE: &str = "Sprawa NSA";

/// Administrative-court document from a parsed row, its judges and symbols.
pub fn document(row: &Record, judges: &[Record], symbols: &[Record]) -> Option<UnifiedDocument> {
    let date = first_non_empty(row, DATES);
    let content = ContentBuilder::new()
        .line("Sygnatura", row.text("case_number"))
        .line("Sąd", row.text("court"))
        .line("Skarżony organ", row.text("challenged_authority"))
        .line("Treść wyniku", row.text("outcome"))
        .block("Sentencja", row.text("sentence"))
        .block("Uzasadnienie", row.text("rationale"))
        .build();

    let mut meta = json_object(
        row,
        &[
            "case_number",
            "court",
            "judgment_date",
            "receipt_date",
            "challenged_authority",
            "outcome",
            "topics",
            "cited_provisions",
            "is_final",
            "has_rationale",
        ],
    );
    meta.insert("judges".to_string(), json_rows(judges));
    meta.insert("symbols".to_string(), json_rows(symbols));

    Some(UnifiedDocument {
        source: Source::Nsa,
        source_pk: source_pk(row, "link")?,
        title: first_non_empty(row, TITLES)
            .map(|(_, title)| title)
            .unwrap_or_else(|| DEFAULT_TITLE.to_string()),
        date_text: date.as_ref().map(|(_, value)| value.clone()),
        link: row.text("detail_url").or_else(|| row.text("link")),
        content_text: content,
        meta: with_date_source(meta, &date),
    })
}

#[derive(Debug, Default)]
pub struct NsaMapper;

impl UnifiedMapper for NsaMapper {
    fn source(&self) -> Source {
        Source::Nsa
    }

    fn documents(&self, store: &SourceStore) -> Result<Vec<UnifiedDocument>, StoreError> {
        let mut documents = Vec::new();
        for row in parsed_rows(store)? {
            let Some(id) = row.i64("id") else {
                continue;
            };
            let judges = linked_rows(
                store,
                "case_judges",
                "judge_id",
                "judges",
                &["name"],
                &["role"],
                id,
            )?;
            let symbols = owned_rows(
                store,
                "case_symbols",
                &["symbol", "description", "full_value"],
                id,
            )?;
            documents.extend(document(&row, &judges, &symbols));
        }
        Ok(documents)
    }
}
