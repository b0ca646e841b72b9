//! HTML text helpers shared by crawlers and extractors.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};

/// A process-wide CSS selector parsed on first use.
macro_rules! css {
    ($selector:literal) => {{
        static SELECTOR: std::sync::LazyLock<scraper::Selector> =
            std::sync::LazyLock::new(|| scraper::Selector::parse($selector).unwrap());
        &*SELECTOR
    }};
}
pub(crate) use css;

/// The rationale header, tolerating letter spacing (`U Z A S A D N I E N I E`).
pub static RATIONALE_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)U\s*Z\s*A\s*S\s*A\s*D\s*N\s*I\s*E\s*N\s*I\s*E").unwrap()
});

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\s\u{a0}]+").unwrap());

/// Elements that start a new line when flattening to text.
const BLOCK_ELEMENTS: &[&str] = &[
    "br", "p", "div", "tr", "li", "h1", "h2", "h3", "h4", "h5", "h6", "table", "ul", "ol",
];

/// Collapse whitespace runs to single spaces and trim.
pub fn collapse_whitespace(text: &str) -> String {
    WHITESPACE.replace_all(text, " ").trim().to_string()
}

/// `None` for blank strings.
pub fn non_empty(text: impl AsRef<str>) -> Option<String> {
    let text = text.as_ref().trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// Single-line text of an element.
pub fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<String>())
}

/// Text of an element keeping line structure: `<br>` and block elements
/// break lines, blank lines are dropped, each line is whitespace-collapsed.
pub fn text_with_breaks(element: ElementRef<'_>) -> String {
    let mut raw = String::new();
    for node in element.descendants() {
        match node.value() {
            Node::Text(text) => raw.push_str(text),
            Node::Element(el) if BLOCK_ELEMENTS.contains(&el.name()) => raw.push('\n'),
            _ => {}
        }
    }
    normalize_lines(&raw)
}

/// Text of an element without the text of descendant `<tag>` elements.
pub fn text_excluding(element: ElementRef<'_>, tag: &str) -> String {
    let text: String = element
        .descendants()
        .filter_map(|node| match node.value() {
            Node::Text(text) => {
                let inside = node
                    .ancestors()
                    .take_while(|a| a.id() != element.id())
                    .any(|a| a.value().as_element().is_some_and(|el| el.name() == tag));
                (!inside).then(|| text.to_string())
            }
            _ => None,
        })
        .collect();
    collapse_whitespace(&text)
}

pub fn normalize_lines(text: &str) -> String {
    text.replace('\r', "")
        .lines()
        .map(collapse_whitespace)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Line-structured text of a whole document's `<body>`.
pub fn document_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let text = match document.select(css!("body")).next() {
        Some(body) => text_with_breaks(body),
        None => text_with_breaks(document.root_element()),
    };
    text
}

/// Trimmed text of the first match with non-empty text.
pub fn first_text(scope: ElementRef<'_>, selector: &Selector) -> Option<String> {
    scope
        .select(selector)
        .map(element_text)
        .find(|text| !text.is_empty())
}

/// Attribute of the first match carrying it.
pub fn first_attr(scope: ElementRef<'_>, selector: &Selector, attr: &str) -> Option<String> {
    scope
        .select(selector)
        .find_map(|el| el.value().attr(attr))
        .and_then(non_empty)
}

/// Texts of every match, blanks dropped.
pub fn all_texts(scope: ElementRef<'_>, selector: &Selector) -> Vec<String> {
    scope
        .select(selector)
        .map(element_text)
        .filter(|text| !text.is_empty())
        .collect()
}

/// Largest integer among the texts of the matched elements (pager links).
pub fn max_number(scope: ElementRef<'_>, selector: &Selector) -> Option<u32> {
    scope
        .select(selector)
        .filter_map(|el| element_text(el).parse::<u32>().ok())
        .max()
}

/// Integer from text with grouping spaces (`"1 234"`).
pub fn parse_count(text: &str) -> Option<i64> {
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Split text at the first match of `marker`: the part before it and the
/// part starting with it, both trimmed.
pub fn split_at_marker(text: &str, marker: &Regex) -> Option<(String, String)> {
    let found = marker.find(text)?;
    Some((
        text[..found.start()].trim().to_string(),
        text[found.start()..].trim().to_string(),
    ))
}

/// Column for a page label: the first `(label, column)` entry the label
/// starts with, ignoring case and a trailing colon.
pub fn field_for_label(label: &str, fields: &[(&str, &'static str)]) -> Option<&'static str> {
    let label = collapse_whitespace(label.trim().trim_end_matches(':')).to_lowercase();
    fields
        .iter()
        .find(|(prefix, _)| label.starts_with(&prefix.to_lowercase()))
        .map(|(_, column)| *column)
}

/// Join non-empty values with `" | "`.
pub fn join_values<I, S>(values: I) -> Option<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let joined = values
        .into_iter()
        .filter_map(|v| non_empty(v.as_ref()))
        .collect::<Vec<_>>()
        .join(" | ");
    non_empty(joined)
}
