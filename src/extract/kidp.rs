//! Tax advisors: profile heading with entry data and contacts.

use scraper::Html;

use super::html::{css, element_text, first_text, join_values, non_empty, text_with_breaks};
use super::{parsed_table, ExtractError, Extracted, RecordExtractor};
use crate::models::Source;
use crate::repository::{ColumnType, Record, TableSchema};

const ENTRY_DATE: &str = "Data wpisu";
const ENTRY_NUMBER: &str = "Numer wpisu";

const CONTACTS: &[(&str, &str)] = &[("Telefon", "phone"), ("WWW", "www"), ("E-mail", "email")];

#[derive(Debug, Default)]
pub struct KidpExtractor;

impl RecordExtractor for KidpExtractor {
    fn source(&self) -> Source {
        Source::Kidp
    }

    fn natural_key(&self) -> &'static str {
        "advisor_url"
    }

    fn tables(&self) -> Vec<TableSchema> {
        vec![parsed_table("advisor_url", ColumnType::Text).texts(&[
            "name",
            "addresses",
            "entry_date",
            "entry_number",
            "phone",
            "www",
            "email",
            "page_link",
        ])]
    }

    fn extract(&self, raw: &Record) -> Result<Extracted, ExtractError> {
        let html = raw
            .str("page_html")
            .ok_or(ExtractError::MissingPayload("page_html"))?;
        let document = Html::parse_document(html);
        let root = document.root_element();

        let mut fields = Record::new()
            .with("name", first_text(root, css!(".concept-heading__adviser-title")))
            .with("page_link", raw.text("page_link"));

        let mut addresses: Vec<String> = Vec::new();
        for paragraph in document.select(css!(".concept-heading__adviser-data p")) {
            let text = element_text(paragraph);
            if let Some(date) = text.strip_prefix(ENTRY_DATE) {
                fields.set("entry_date", non_empty(date));
            } else if let Some(number) = text.strip_prefix(ENTRY_NUMBER) {
                fields.set("entry_number", non_empty(number));
            } else {
                let address = text_with_breaks(paragraph).replace('\n', ", ");
                if !address.is_empty() && !addresses.contains(&address) {
                    addresses.push(address);
                }
            }
        }
        fields.set("addresses", join_values(&addresses));

        for item in document.select(css!(".concept-heading__adviser-contact-item")) {
            let text = element_text(item);
            let Some((_, column)) = CONTACTS.iter().find(|(label, _)| text.contains(label)) else {
                continue;
            };
            if let Some(value) = first_text(item, css!("a")) {
                fields.set(column, value);
            }
        }

        Ok(Extracted {
            fields,
            children: Vec::new(),
        })
    }
}
