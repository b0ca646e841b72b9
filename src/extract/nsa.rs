//! Administrative courts: the info list of a detail page.

use std::sync::LazyLock;

use regex::Regex;
use scraper::Html;

use super::html::{
    collapse_whitespace, css, element_text, field_for_label, join_values, non_empty, text_with_breaks,
};
use super::{
    dimension_table, link_table, owned_table, parsed_table, ChildRows, ExtractError, Extracted,
    LinkedValue, RecordExtractor,
};
use crate::models::Source;
use crate::repository::{ColumnType, Record, TableSchema};

const LABELS: &[(&str, &str)] = &[
    ("Sygnatura", "case_number"),
    ("Data orzeczenia", "judgment_date"),
    ("Data publikacji", "publication_date"),
    ("Data wpływu", "receipt_date"),
    ("Sąd", "court"),
    ("Wydział", "department"),
    ("Sędziowie", "judges_raw"),
    ("Hasła tematyczne", "topics"),
    ("Skarżony organ", "challenged_authority"),
    ("Treść wyniku", "outcome"),
    ("Symbol z opisem", "symbols_raw"),
    ("Powołane przepisy", "cited_provisions"),
];

static JUDGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*?)(?:\s*/\s*([^/]+?)\s*/\s*)?$").unwrap());
static SYMBOL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*(\d{3,4})\s*(.*)$").unwrap());
static SENTENCE_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bSENTENCJA\b|\bSentencja\b").unwrap());
static RATIONALE_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bUZASADNIENIE\b|\bUzasadnienie\b").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Judge {
    pub name: String,
    pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub code: Option<String>,
    pub description: Option<String>,
}

impl Symbol {
    fn full_value(&self) -> String {
        match (&self.code, &self.description) {
            (Some(code), Some(description)) => format!("{} {}", code, description),
            (Some(code), None) => code.clone(),
            (None, description) => description.clone().unwrap_or_default(),
        }
    }
}

/// Split a list-valued field on newlines, semicolons and commas followed by
/// whitespace. A comma right after a digit does not split (`"art. 1, 2"`).
pub fn split_list(value: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut chars = value.chars().peekable();
    let mut previous: Option<char> = None;

    while let Some(c) = chars.next() {
        let split = match c {
            '\n' | ';' => true,
            ',' => {
                chars.peek().is_some_and(|n| n.is_whitespace())
                    && !previous.is_some_and(|p| p.is_ascii_digit())
            }
            _ => false,
        };
        if split {
            items.push(std::mem::take(&mut current));
            if c == ',' {
                while chars.peek().is_some_and(|n| n.is_whitespace()) {
                    chars.next();
                }
            }
        } else {
            current.push(c);
        }
        previous = Some(c);
    }
    items.push(current);

    items.into_iter().filter_map(non_empty).collect()
}

/// `"Jan Kowalski /przewodniczący sprawozdawca/"` → name and role.
pub fn parse_judges(raw: &str) -> Vec<Judge> {
    split_list(raw)
        .into_iter()
        .map(|item| match JUDGE.captures(&item) {
            Some(caps) => Judge {
                name: collapse_whitespace(caps.get(1).map_or(item.as_str(), |m| m.as_str())),
                role: caps.get(2).and_then(|m| non_empty(m.as_str())),
            },
            None => Judge {
                name: collapse_whitespace(&item),
                role: None,
            },
        })
        .filter(|judge| !judge.name.is_empty())
        .collect()
}

/// Leading 3-4 digit code and its description.
pub fn parse_symbols(raw: &str) -> Vec<Symbol> {
    split_list(raw)
        .into_iter()
        .map(|item| match SYMBOL.captures(&item) {
            Some(caps) => Symbol {
                code: Some(caps[1].to_string()),
                description: non_empty(&caps[2]),
            },
            None => Symbol {
                code: None,
                description: Some(item),
            },
        })
        .collect()
}

/// Sentence and rationale sections located by their headings in the body text.
pub fn sections(body: &str) -> (Option<String>, Option<String>) {
    let sentence = SENTENCE_HEADING.find(body).map(|m| m.start());
    let rationale = RATIONALE_HEADING.find(body).map(|m| m.start());
    match (sentence, rationale) {
        (Some(s), Some(r)) if s < r => (non_empty(&body[s..r]), non_empty(&body[r..])),
        (Some(s), Some(r)) => (non_empty(&body[s..]), non_empty(&body[r..s])),
        (Some(s), None) => (non_empty(&body[s..]), None),
        (None, Some(r)) => (None, non_empty(&body[r..])),
        (None, None) => (None, None),
    }
}

/// Info-list label/value pairs; repeated labels are joined with newlines.
fn info_list(document: &Html) -> Record {
    let mut fields = Record::new();
    for row in document.select(css!(".info-list tr")) {
        let Some(label) = row
            .select(css!(".info-list-label, td:first-child, th:first-child"))
            .next()
        else {
            continue;
        };
        let Some(column) = field_for_label(&element_text(label), LABELS) else {
            continue;
        };
        let Some(value) = row
            .select(css!(".info-list-value, td:last-child"))
            .next()
            .and_then(|cell| non_empty(text_with_breaks(cell)))
        else {
            continue;
        };
        let joined = match fields.text(column) {
            Some(previous) => format!("{}\n{}", previous, value),
            None => value,
        };
        fields.set(column, joined);
    }
    fields
}

#[derive(Debug, Default)]
pub struct NsaExtractor;

impl RecordExtractor for NsaExtractor {
    fn source(&self) -> Source {
        Source::Nsa
    }

    fn natural_key(&self) -> &'static str {
        "link"
    }

    fn tables(&self) -> Vec<TableSchema> {
        let columns: Vec<&str> = LABELS.iter().map(|(_, column)| *column).collect();
        vec![
            parsed_table("link", ColumnType::Text)
                .texts(&columns)
                .texts(&["judges", "symbols", "sentence", "rationale", "title", "detail_url"])
                .integers(&["is_final", "has_rationale"]),
            dimension_table("judges", "name", &[]),
            link_table("case_judges", "judge_id", &["role"]),
            owned_table("case_symbols", &["symbol", "description", "full_value"]),
        ]
    }

    fn extract(&self, raw: &Record) -> Result<Extracted, ExtractError> {
        let html = raw
            .str("detail_html")
            .ok_or(ExtractError::MissingPayload("detail_html"))?;
        let document = Html::parse_document(html);

        let mut fields = info_list(&document);
        let judges = fields.str("judges_raw").map(parse_judges).unwrap_or_default();
        let symbols = fields.str("symbols_raw").map(parse_symbols).unwrap_or_default();

        fields.set(
            "judges",
            join_values(judges.iter().map(|judge| match &judge.role {
                Some(role) => format!("{} ({})", judge.name, role),
                None => judge.name.clone(),
            })),
        );
        fields.set("symbols", join_values(symbols.iter().map(Symbol::full_value)));

        let body = match document.select(css!("body")).next() {
            Some(body) => text_with_breaks(body),
            None => text_with_breaks(document.root_element()),
        };
        let (sentence, rationale) = sections(&body);
        fields.set("sentence", sentence);
        fields.set("rationale", rationale);

        for column in ["title", "detail_url"] {
            fields.set(column, raw.text(column));
        }
        for column in ["is_final", "has_rationale"] {
            fields.set(column, raw.i64(column));
        }

        Ok(Extracted {
            fields,
            children: vec![
                ChildRows::Linked {
                    dimension: "judges",
                    key_column: "name",
                    link_table: "case_judges",
                    link_column: "judge_id",
                    values: judges
                        .into_iter()
                        .map(|judge| {
                            LinkedValue::new(Record::new().with("name", judge.name))
                                .with_link("role", judge.role)
                        })
                        .collect(),
                },
                ChildRows::Owned {
                    table: "case_symbols",
                    rows: symbols
                        .iter()
                        .map(|symbol| {
                            Record::new()
                                .with("symbol", symbol.code.clone())
                                .with("description", symbol.description.clone())
                                .with("full_value", symbol.full_value())
                        })
                        .collect(),
                },
            ],
        })
    }
}
