//! Supreme court: decision metadata form and the judgment document.

use scraper::Html;
use url::Url;

use super::html::{css, element_text, field_for_label, first_attr, join_values, non_empty};
use super::sections::{JudgmentSections, SECTION_COLUMNS};
use super::{
    dimension_table, link_table, parsed_table, ChildRows, ExtractError, Extracted, LinkedValue,
    RecordExtractor,
};
use crate::models::Source;
use crate::repository::{ColumnType, Record, TableSchema};

const LABELS: &[(&str, &str)] = &[
    ("Sygnatura sprawy", "case_number"),
    ("Forma orzeczenia", "form"),
    ("Data wydania", "issue_date"),
    ("Izby", "chamber"),
    ("Typ składu sędziów", "bench_type"),
    ("Przewodniczący składu", "presiding_judge"),
    ("Sprawozdawca", "rapporteur"),
    ("Autor uzasadnienia", "rationale_author"),
    ("Jednostka obsługująca", "service_unit"),
    ("Skład sędziów", "bench"),
];

const CHAMBER_LINK_TEXT: &str = "przejdź do danych teleadresowych dla ";

/// Resolve `href` against the page it was found on.
fn absolute(page_link: Option<&str>, href: String) -> String {
    page_link
        .and_then(|base| Url::parse(base).ok())
        .and_then(|base| base.join(&href).ok())
        .map(String::from)
        .unwrap_or(href)
}

fn form_fields(document: &Html) -> Record {
    let mut fields = Record::new();
    for cell in document.select(css!(".page-form--cell")) {
        let Some(column) = field_for_label(&element_text(cell), LABELS) else {
            continue;
        };
        if fields.contains(column) {
            continue;
        }
        let value = cell
            .select(css!(".page-form--field"))
            .next()
            .map(element_text)
            .unwrap_or_default();
        let value = if column == "chamber" {
            value.replace(CHAMBER_LINK_TEXT, "")
        } else {
            value
        };
        fields.set(column, non_empty(value));
    }
    fields
}

#[derive(Debug, Default)]
pub struct SnExtractor;

impl RecordExtractor for SnExtractor {
    fn source(&self) -> Source {
        Source::Sn
    }

    fn natural_key(&self) -> &'static str {
        "item_sid"
    }

    fn tables(&self) -> Vec<TableSchema> {
        let columns: Vec<&str> = LABELS
            .iter()
            .map(|(_, column)| *column)
            .chain(["judges", "link_pdf", "link_html", "page_link"])
            .chain(SECTION_COLUMNS.iter().copied())
            .collect();
        vec![
            parsed_table("item_sid", ColumnType::Text).texts(&columns),
            dimension_table("judges", "name", &[]),
            link_table("case_judges", "judge_id", &[]),
        ]
    }

    fn extract(&self, raw: &Record) -> Result<Extracted, ExtractError> {
        let html = raw
            .str("page_html")
            .ok_or(ExtractError::MissingPayload("page_html"))?;
        let document = Html::parse_document(html);
        let page_link = raw.str("page_link");

        let mut fields = form_fields(&document);
        let judges: Vec<String> = fields
            .str("bench")
            .map(|bench| bench.split(';').filter_map(non_empty).collect())
            .unwrap_or_default();
        fields.set("judges", join_values(&judges));

        let root = document.root_element();
        let pdf = first_attr(root, css!(r#".page-form--field a[href$=".pdf"]"#), "href")
            .map(|href| absolute(page_link, href));
        let html_link = raw.text("judgment_link").or_else(|| {
            first_attr(root, css!(r#".page-form--field a[href$=".html"]"#), "href")
                .map(|href| absolute(page_link, href))
        });
        fields.set("link_pdf", pdf);
        fields.set("link_html", html_link);
        fields.set("page_link", page_link);

        if let Some(judgment) = raw.str("judgment_html") {
            JudgmentSections::from_html(judgment).write_to(&mut fields);
        }

        Ok(Extracted {
            fields,
            children: vec![ChildRows::Linked {
                dimension: "judges",
                key_column: "name",
                link_table: "case_judges",
                link_column: "judge_id",
                values: judges
                    .into_iter()
                    .map(|name| LinkedValue::new(Record::new().with("name", name)))
                    .collect(),
            }],
        })
    }
}
