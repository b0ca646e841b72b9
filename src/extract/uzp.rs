//! Procurement appeals: decision metrics, cited provisions and topics.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html};

use super::html::{all_texts, css, element_text, field_for_label, non_empty, text_excluding};
use super::{
    dimension_table, link_table, parsed_table, ChildRows, ExtractError, Extracted, LinkedValue,
    RecordExtractor,
};
use crate::models::Source;
use crate::repository::{ColumnType, Record, TableSchema};

/// Metric labels, by `for`/`aria-label` attribute or visible text.
const LABELS: &[(&str, &str)] = &[
    ("Metrics_DecisionType", "document_type"),
    ("Metrics_IssueDate", "issue_date"),
    ("Chairman", "chairman"),
    ("Purchaser", "purchaser"),
    ("City", "city"),
    ("Procedure", "procedure"),
    ("ContractType", "contract_type"),
    ("Organ wydający", "issuing_authority"),
];

const KEY_PROVISIONS: &str = "Kluczowe przepisy ustawy Pzp";
const TOPICS: &str = "Zagadnienia merytoryczne";

static DAY_MONTH_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{2})-(\d{2})-(\d{4})$").unwrap());
static JUDGMENT_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"z dnia\s+(\d{1,2}\s+\w+\s+(\d{4}))").unwrap());

/// `DD-MM-YYYY` → `YYYY-MM-DD`; anything else is kept as is.
pub fn normalize_date(date: &str) -> String {
    let date = date.trim();
    match DAY_MONTH_YEAR.captures(date) {
        Some(caps) => format!("{}-{}-{}", &caps[3], &caps[2], &caps[1]),
        None => date.to_string(),
    }
}

/// `"KIO 123/24 / Oddalono"` → case number and resolution.
pub fn split_signature(value: &str) -> (Option<String>, Option<String>) {
    let separator = if value.contains('/') {
        " / "
    } else if value.contains('-') {
        " - "
    } else {
        return (non_empty(value), None);
    };
    match value.split_once(separator) {
        Some((number, resolution)) => (non_empty(number), non_empty(resolution)),
        None => (non_empty(value), None),
    }
}

/// The "z dnia 5 stycznia 2024" date of a decision and its year.
pub fn judgment_date(text: &str) -> Option<(String, String)> {
    let caps = JUDGMENT_DATE.captures(text)?;
    Some((caps[1].to_string(), caps[2].to_string()))
}

fn label_of(column: ElementRef<'_>) -> Option<String> {
    let label = column.select(css!("label")).next()?;
    label
        .value()
        .attr("for")
        .or_else(|| label.value().attr("aria-label"))
        .and_then(non_empty)
        .or_else(|| non_empty(element_text(label)))
}

/// Anchor texts of the paragraph following the bold heading.
fn listed_after(document: &Html, heading: &str) -> Vec<String> {
    for bold in document.select(css!("div > b")) {
        if !element_text(bold).contains(heading) {
            continue;
        }
        let paragraph = bold
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .next()
            .filter(|el| el.value().name() == "p");
        return paragraph
            .map(|p| all_texts(p, css!("a")))
            .unwrap_or_default();
    }
    Vec::new()
}

fn metrics(document: &Html) -> Record {
    let mut fields = Record::new();
    for column in document.select(css!(".row .col-md-6")) {
        let Some(label) = label_of(column) else {
            continue;
        };
        if label.contains("Sygnatura") {
            let value = column
                .select(css!("ul li"))
                .map(element_text)
                .collect::<Vec<_>>()
                .join(" ");
            let (case_number, resolution) = split_signature(&value);
            fields.set("case_number", case_number);
            fields.set("resolution", resolution);
            continue;
        }
        let Some(name) = field_for_label(&label, LABELS) else {
            continue;
        };
        let value = column
            .select(css!("p"))
            .next()
            .and_then(|p| non_empty(text_excluding(p, "label")));
        let value = match name {
            "issue_date" => value.map(|date| normalize_date(&date)),
            _ => value,
        };
        fields.set(name, value);
    }
    fields
}

fn linked(values: Vec<String>, key: &str) -> Vec<LinkedValue> {
    values
        .into_iter()
        .map(|value| LinkedValue::new(Record::new().with(key, value)))
        .collect()
}

#[derive(Debug, Default)]
pub struct UzpExtractor;

impl RecordExtractor for UzpExtractor {
    fn source(&self) -> Source {
        Source::Uzp
    }

    fn natural_key(&self) -> &'static str {
        "site_index"
    }

    fn tables(&self) -> Vec<TableSchema> {
        let columns: Vec<&str> = LABELS
            .iter()
            .map(|(_, column)| *column)
            .chain([
                "case_number",
                "resolution",
                "judgment",
                "rationale",
                "judgment_date",
                "judgment_year",
                "page_link",
            ])
            .collect();
        vec![
            parsed_table("site_index", ColumnType::Integer).texts(&columns),
            dimension_table("provisions", "reference", &[]),
            link_table("case_provisions", "provision_id", &[]),
            dimension_table("topics", "name", &[]),
            link_table("case_topics", "topic_id", &[]),
        ]
    }

    fn extract(&self, raw: &Record) -> Result<Extracted, ExtractError> {
        let html = raw
            .str("details_metrics")
            .ok_or(ExtractError::MissingPayload("details_metrics"))?;
        let document = Html::parse_fragment(html);

        let mut fields = metrics(&document);
        let judgment = raw.text("judgment_text");
        let (date, year) = judgment
            .as_deref()
            .and_then(judgment_date)
            .map_or((None, None), |(date, year)| (Some(date), Some(year)));
        fields.set("judgment_date", date);
        fields.set("judgment_year", year);
        fields.set("judgment", judgment);
        fields.set("rationale", raw.text("rationale_text"));
        fields.set("page_link", raw.text("url"));

        Ok(Extracted {
            fields,
            children: vec![
                ChildRows::Linked {
                    dimension: "provisions",
                    key_column: "reference",
                    link_table: "case_provisions",
                    link_column: "provision_id",
                    values: linked(listed_after(&document, KEY_PROVISIONS), "reference"),
                },
                ChildRows::Linked {
                    dimension: "topics",
                    key_column: "name",
                    link_table: "case_topics",
                    link_column: "topic_id",
                    values: linked(listed_after(&document, TOPICS), "name"),
                },
            ],
        })
    }
}
