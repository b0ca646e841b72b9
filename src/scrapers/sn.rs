//! Supreme court: one search per day.
//!
//! The day's result page either carries a `div.ErrorMSG` (nothing was
//! published that day) or links to decisions identified by `ItemSID`. Each
//! new decision's page is stored together with the HTML judgment it links to.

use std::collections::HashSet;
use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::NaiveDate;
use regex::Regex;
use scraper::Html;
use tracing::{debug, info};

use super::dates::{days, format_date};
use super::{CrawlContext, CrawlError, Saved, SourceCrawler};
use crate::extract::html::{css, element_text, first_attr};
use crate::http_client::FetchRequest;
use crate::models::{BatchSummary, Source};
use crate::repository::namespace::RAW;
use crate::repository::{Record, TableSchema};

const SEARCH_PATH: &str = "/wyszukiwanie/SitePages/orzeczenia.aspx";

static ITEM_SID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ItemSID=([^&#]+)").unwrap());

/// Decision linked from a day's result page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayResult {
    pub item_sid: String,
    pub href: String,
}

/// What a day's search returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DayListing {
    /// The site reported no decisions; carries its message.
    NoResults(String),
    Results(Vec<DayResult>),
}

pub fn search_path(day: NaiveDate) -> String {
    let date = format_date(day);
    format!("{}?DataOd={}&DataDo={}", SEARCH_PATH, date, date)
}

pub fn parse_day(html: &str) -> DayListing {
    let document = Html::parse_document(html);
    if let Some(message) = document.select(css!("div.ErrorMSG")).next() {
        return DayListing::NoResults(element_text(message));
    }

    let mut seen = HashSet::new();
    let results = document
        .select(css!(r#"a[href*="ItemSID"]"#))
        .filter_map(|anchor| {
            let href = anchor.value().attr("href")?;
            let item_sid = ITEM_SID.captures(href)?.get(1)?.as_str().to_string();
            seen.insert(item_sid.clone()).then(|| DayResult {
                item_sid,
                href: href.to_string(),
            })
        })
        .collect();
    DayListing::Results(results)
}

/// Link to the HTML rendition of the judgment on a decision page.
pub fn judgment_link(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    first_attr(
        document.root_element(),
        css!(r#".page-form--field a[href$=".html"]"#),
        "href",
    )
}

#[derive(Debug, Default)]
pub struct SnCrawler;

impl SnCrawler {
    async fn store_decision(
        &self,
        ctx: &CrawlContext,
        day: NaiveDate,
        result: &DayResult,
    ) -> Result<Saved, CrawlError> {
        if ctx.known(RAW, "item_sid", result.item_sid.as_str()).await? {
            return Ok(Saved::Known);
        }
        let unit = format!("item {}", result.item_sid);
        ctx.throttle().await;
        let page_link = ctx.url(&result.href);
        let page = ctx.fetch(&unit, FetchRequest::get(&page_link)).await?;
        let status = page.status();
        let Some(page_html) = page.into_body() else {
            debug!("sn {}: decision page not found", unit);
            return Ok(Saved::Gone);
        };

        let mut record = Record::new()
            .with("item_sid", result.item_sid.as_str())
            .with("date", format_date(day))
            .with("page_link", page_link.as_str())
            .with("status_code", status);

        if let Some(link) = judgment_link(&page_html) {
            let link = ctx.url(&link);
            ctx.throttle().await;
            let judgment = ctx.fetch(&unit, FetchRequest::get(&link)).await?;
            record.set("judgment_link", link.as_str());
            record.set("judgment_html", judgment.into_body());
        }
        record.set("page_html", page_html);

        ctx.save(RAW, record, "item_sid").await?;
        Ok(Saved::Imported)
    }

    async fn crawl_day(
        &self,
        ctx: &CrawlContext,
        day: NaiveDate,
        summary: &mut BatchSummary,
    ) -> Result<(), CrawlError> {
        let unit = format_date(day);
        let outcome = ctx
            .fetch(&unit, FetchRequest::get(ctx.url(&search_path(day))))
            .await?;
        let Some(html) = outcome.into_body() else {
            debug!("sn {}: search page not found", unit);
            summary.skipped += 1;
            return Ok(());
        };

        let results = match parse_day(&html) {
            DayListing::NoResults(message) => {
                debug!("sn {}: no decisions ({})", unit, message);
                summary.skipped += 1;
                return Ok(());
            }
            DayListing::Results(results) => results,
        };
        debug!("sn {}: {} decisions", unit, results.len());

        for result in &results {
            summary.processed += 1;
            match self.store_decision(ctx, day, result).await {
                Ok(saved) => saved.tally(summary),
                Err(e) => ctx.unit_failed(&format!("item {}", result.item_sid), e, summary)?,
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SourceCrawler for SnCrawler {
    fn source(&self) -> Source {
        Source::Sn
    }

    fn tables(&self) -> Vec<TableSchema> {
        vec![TableSchema::new(RAW)
            .texts(&[
                "item_sid",
                "date",
                "page_link",
                "page_html",
                "judgment_link",
                "judgment_html",
            ])
            .integer("status_code")
            .unique(&["item_sid"])]
    }

    async fn crawl(&self, ctx: &CrawlContext) -> Result<BatchSummary, CrawlError> {
        let mut summary = BatchSummary::default();
        info!(
            "sn: searching day by day from {} to {}",
            ctx.settings.since, ctx.settings.to
        );

        for day in days(ctx.settings.since, ctx.settings.to) {
            if let Err(e) = self.crawl_day(ctx, day, &mut summary).await {
                ctx.unit_failed(&format_date(day), e, &mut summary)?;
            }
            ctx.throttle().await;
        }

        info!("sn: crawl finished ({})", summary);
        Ok(summary)
    }
}
