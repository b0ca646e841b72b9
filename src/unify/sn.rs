use serde_json::{json, Value};

use super::{
    first_non_empty, json_object, json_rows, linked_rows, parsed_rows, source_pk,
    with_date_source, ContentBuilder, UnifiedMapper,
};
use crate::models::{Source, UnifiedDocument};
use crate::repository::{Record, SourceStore, StoreError};

const TITLES: &[&str] = &["case_number"];
const DATES: &[&str] = &["issue_date"];
const DEFAULT_TITLE: &str = "Sprawa SN";

/// Supreme-court document from a parsed row and its bench.
pub fn document(row: &Record, judges: &[Record]) -> Option<UnifiedDocument> {
    let date = first_non_empty(row, DATES);
    let content = ContentBuilder::new()
        .line("Sygnatura", row.text("case_number"))
        .line("Forma orzeczenia", row.text("form"))
        .line("Data wydania", row.text("issue_date"))
        .line("Izba", row.text("chamber"))
        .line("Typ składu sędziów", row.text("bench_type"))
        .line("Przewodniczący składu", row.text("presiding_judge"))
        .line("Sprawozdawca", row.text("rapporteur"))
        .line("Autor uzasadnienia", row.text("rationale_author"))
        .line("Jednostka obsługująca", row.text("service_unit"))
        .block("Wyrok", row.text("verdict"))
        .block("Uzasadnienie", row.text("rationale"))
        .block("Postanowienie", row.text("decision"))
        .block("Uchwała", row.text("resolution"))
        .block("Zarządzenie", row.text("directive"))
        .block("Treść orzeczenia", row.text("judgment_text"))
        .build();

    let mut meta = json_object(
        row,
        &[
            "case_number",
            "form",
            "issue_date",
            "chamber",
            "bench_type",
            "presiding_judge",
            "rapporteur",
            "rationale_author",
            "service_unit",
        ],
    );
    let value = |column: &str| row.text(column).map_or(Value::Null, Value::from);
    meta.insert(
        "links".to_string(),
        json!({
            "page_link": value("page_link"),
            "link_html": value("link_html"),
            "link_pdf": value("link_pdf"),
        }),
    );
    meta.insert("judges".to_string(), json_rows(judges));

    Some(UnifiedDocument {
        source: Source::Sn,
        source_pk: source_pk(row, "item_sid")?,
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
pub struct SnMapper;

impl UnifiedMapper for SnMapper {
    fn source(&self) -> Source {
        Source::Sn
    }

    fn documents(&self, store: &SourceStore) -> Result<Vec<UnifiedDocument>, StoreError> {
        let mut documents = Vec::new();
        for row in parsed_rows(store)? {
            let Some(id) = row.i64("id") else {
                continue;
            };
            let judges = linked_rows(store, "case_judges", "judge_id", "judges", &["name", "id"], &[], id)?;
            documents.extend(document(&row, &judges));
        }
        Ok(documents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_title_and_links() {
        let row = Record::new()
            .with("item_sid", "sid-1")
            .with("case_number", "")
            .with("page_link", "https://www.sn.pl/x?ItemSID=sid-1");
        let doc = document(&row, &[]).unwrap();
        assert_eq!(doc.title, "Sprawa SN");
        assert_eq!(doc.date_text, None);
        assert_eq!(doc.link.as_deref(), Some("https://www.sn.pl/x?ItemSID=sid-1"));
        assert_eq!(doc.meta["links"]["link_pdf"], Value::Null);
        assert_eq!(doc.meta["date_text_source"], Value::Null);
        assert_eq!(doc.content_text, "");
    }
}
