//! Judgment documents: kind and verdict/rationale split.

use std::sync::LazyLock;

use regex::Regex;
use scraper::Html;

use super::html::{css, first_text, non_empty, text_with_breaks};
use crate::repository::Record;

/// A line holding only the rationale heading, letter-spaced or not.
static RATIONALE_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*U\s*Z\s*A\s*S\s*A\s*D\s*N\s*I\s*E\s*N\s*I\s*E\s*:?\s*$").unwrap()
});

/// What a judgment document is, by its title line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    /// WYROK
    Verdict,
    /// POSTANOWIENIE
    Decision,
    /// UCHWAŁA
    Resolution,
    /// ZARZĄDZENIE
    Directive,
}

impl DocumentKind {
    pub fn from_title(title: &str) -> Option<Self> {
        let title = title.trim().to_uppercase();
        if title.starts_with("WYROK") {
            Some(Self::Verdict)
        } else if title.starts_with("POSTANOWIENIE") {
            Some(Self::Decision)
        } else if title.starts_with("UCHWAŁA") {
            Some(Self::Resolution)
        } else if title.starts_with("ZARZĄDZENIE") {
            Some(Self::Directive)
        } else {
            None
        }
    }

    /// Parsed column receiving the operative text.
    pub fn column(&self) -> &'static str {
        match self {
            Self::Verdict => "verdict",
            Self::Decision => "decision",
            Self::Resolution => "resolution",
            Self::Directive => "directive",
        }
    }
}

/// Text sections of a judgment document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JudgmentSections {
    pub title: Option<String>,
    pub kind: Option<DocumentKind>,
    /// Whole document text.
    pub full_text: Option<String>,
    /// Text before the rationale heading.
    pub operative: Option<String>,
    /// Rationale, starting at its heading.
    pub rationale: Option<String>,
}

impl JudgmentSections {
    pub fn from_html(html: &str) -> Self {
        let document = Html::parse_document(html);
        let root = document.root_element();
        let title = first_text(root, css!(".pt-Dokumenttytulorzeczenia18"));
        let body = document.select(css!("body")).next().unwrap_or(root);
        let mut sections = Self::from_text(&text_with_breaks(body));
        sections.kind = title.as_deref().and_then(DocumentKind::from_title);
        sections.title = title;
        sections
    }

    /// Split plain text at the first line that is only the rationale heading.
    pub fn from_text(text: &str) -> Self {
        let full_text = non_empty(text);
        let (operative, rationale) = match RATIONALE_HEADING.find(text) {
            Some(heading) => (
                non_empty(&text[..heading.start()]),
                non_empty(&text[heading.start()..]),
            ),
            None => (full_text.clone(), None),
        };
        Self {
            title: None,
            kind: None,
            full_text,
            operative,
            rationale,
        }
    }

    /// Write `document_title`, `judgment_text`, `rationale` and the kind's
    /// column into parsed fields.
    pub fn write_to(&self, fields: &mut Record) {
        fields.set("document_title", self.title.clone());
        fields.set("judgment_text", self.full_text.clone());
        fields.set("rationale", self.rationale.clone());
        if let Some(kind) = self.kind {
            fields.set(kind.column(), self.operative.clone());
        }
    }
}

/// Columns [`JudgmentSections::write_to`] may fill.
pub const SECTION_COLUMNS: &[&str] = &[
    "document_title",
    "judgment_text",
    "rationale",
    "verdict",
    "decision",
    "resolution",
    "directive",
];
