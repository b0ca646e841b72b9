//! Common courts: details table, judgment text and cited regulations.

use scraper::Html;

use super::html::{css, element_text, field_for_label, non_empty, text_with_breaks};
use super::sections::{JudgmentSections, SECTION_COLUMNS};
use super::{
    dimension_table, link_table, parsed_table, ChildRows, ExtractError, Extracted, LinkedValue,
    RecordExtractor,
};
use crate::models::Source;
use crate::repository::{ColumnType, Record, TableSchema};

const LABELS: &[(&str, &str)] = &[
    ("Sygnatura", "case_number"),
    ("Data orzeczenia", "judgment_date"),
    ("Data publikacji", "publication_date"),
    ("Data uprawomocnienia", "finality_date"),
    ("Sąd", "court"),
    ("Wydział", "department"),
    ("Przewodniczący", "chairman"),
    ("Sędziowie", "judges"),
    ("Protokolant", "clerk"),
    ("Hasła tematyczne", "topics"),
    ("Podstawa prawna", "legal_basis"),
];

const COPIED: &[&str] = &["details_link", "case_types"];

/// Label/value pairs of the details table.
fn detail_fields(html: &str) -> Record {
    let document = Html::parse_document(html);
    let mut fields = Record::new();
    for row in document.select(css!("tr")) {
        let cells: Vec<_> = row.select(css!("th, td")).collect();
        let (Some(label), Some(value)) = (cells.first(), cells.last()) else {
            continue;
        };
        if cells.len() < 2 {
            continue;
        }
        let Some(column) = field_for_label(&element_text(*label), LABELS) else {
            continue;
        };
        if !fields.contains(column) {
            fields.set(column, non_empty(text_with_breaks(*value)));
        }
    }
    fields
}

/// Statutes linked from the regulations tab, in page order without repeats.
fn provisions(html: &str) -> Vec<LinkedValue> {
    let document = Html::parse_document(html);
    let mut seen = Vec::new();
    document
        .select(css!("table a[href]"))
        .filter_map(|anchor| {
            let title = non_empty(element_text(anchor))?;
            if seen.contains(&title) {
                return None;
            }
            seen.push(title.clone());
            let link = anchor.value().attr("href").unwrap_or_default();
            Some(LinkedValue::new(
                Record::new()
                    .with("title", title)
                    .with("link", non_empty(link)),
            ))
        })
        .collect()
}

#[derive(Debug, Default)]
pub struct MsExtractor;

impl RecordExtractor for MsExtractor {
    fn source(&self) -> Source {
        Source::Ms
    }

    fn natural_key(&self) -> &'static str {
        "title"
    }

    fn tables(&self) -> Vec<TableSchema> {
        let columns: Vec<&str> = LABELS
            .iter()
            .map(|(_, column)| *column)
            .chain(COPIED.iter().copied())
            .chain(SECTION_COLUMNS.iter().copied())
            .collect();
        vec![
            parsed_table("title", ColumnType::Text)
                .texts(&columns)
                .integer("is_final"),
            dimension_table("provisions", "title", &["link"]),
            link_table("case_provisions", "provision_id", &[]),
        ]
    }

    fn extract(&self, raw: &Record) -> Result<Extracted, ExtractError> {
        let details = raw
            .str("details_html")
            .ok_or(ExtractError::MissingPayload("details_html"))?;

        let mut fields = detail_fields(details);
        for column in COPIED {
            fields.set(column, raw.text(column));
        }
        fields.set("is_final", raw.i64("is_final"));
        if let Some(judgment) = raw.str("judgment_html") {
            JudgmentSections::from_html(judgment).write_to(&mut fields);
        }

        let provisions = raw.str("regulations_html").map(provisions).unwrap_or_default();
        Ok(Extracted {
            fields,
            children: vec![ChildRows::Linked {
                dimension: "provisions",
                key_column: "title",
                link_table: "case_provisions",
                link_column: "provision_id",
                values: provisions,
            }],
        })
    }
}
