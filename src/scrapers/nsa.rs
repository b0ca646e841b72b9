//! Administrative courts: weekly search windows over a session-bound
//! result list.
//!
//! Each window is submitted as a POST search; the site keeps the query in
//! the session and serves its result pages at `cbo/find?p={n}`. Windows are
//! processed newest first. Every new entry's detail page is fetched inline
//! so finality and rationale flags are known at crawl time; rows that came
//! back incomplete are revisited by [`NsaCrawler::repair`].

use async_trait::async_trait;
use scraper::Html;
use tracing::{debug, info, warn};

use super::dates::{format_date, weekly_windows, DateWindow};
use super::{CrawlContext, CrawlError, Saved, SourceCrawler};
use crate::extract::html::{css, element_text, max_number};
use crate::http_client::{FetchOutcome, FetchRequest};
use crate::models::{BatchSummary, Source};
use crate::repository::namespace::RAW;
use crate::repository::{Record, SqlValue, TableSchema};

const SEARCH_PATH: &str = "/cbo/search";
const NOT_FINAL_MARKER: &str = "nieprawomocne";
const RATIONALE_MARKER: &str = "info-list-label-uzasadnienie";
/// Every detail page carries the label/value tables.
const DETAIL_MARKER: &str = "info-list";

/// A result list entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub link: String,
    pub title: String,
    /// Last word of the title.
    pub date: String,
}

/// Search form for one window, in the field order the site submits.
pub fn search_form(window: &DateWindow) -> Vec<(&'static str, String)> {
    let from = format_date(window.from);
    let to = format_date(window.to);
    vec![
        ("wszystkieSlowa", String::new()),
        ("wystepowanie", "gdziekolwiek".into()),
        ("odmiana", "on".into()),
        ("sygnatura", String::new()),
        ("sad", "dowolny".into()),
        ("rodzaj", "dowolny".into()),
        ("symbole", String::new()),
        ("odDaty", from),
        ("doDaty", to),
        ("sedziowie", String::new()),
        ("funkcja", "dowolna".into()),
        ("rodzaj_organu", String::new()),
        ("hasla", String::new()),
        ("akty", String::new()),
        ("przepisy", String::new()),
        ("publikacje", String::new()),
        ("glosy", String::new()),
        ("submit", "Szukaj".into()),
    ]
}

/// Highest page number in the pagination list, 1 without one.
pub fn max_page(html: &str) -> u32 {
    let document = Html::parse_document(html);
    let root = document.root_element();
    let linked = max_number(root, css!(".pagination li a"));
    let current = max_number(root, css!(".pagination li.currentpage"));
    linked.max(current).unwrap_or(1).max(1)
}

pub fn parse_entries(html: &str) -> Vec<ListEntry> {
    let document = Html::parse_document(html);
    document
        .select(css!("#res-div table.info-list"))
        .filter_map(|table| {
            let anchor = table.select(css!("tbody a")).next()?;
            let link = anchor.value().attr("href")?.trim().to_string();
            if link.is_empty() {
                return None;
            }
            let title = element_text(anchor);
            let date = title.rsplit(' ').next().unwrap_or_default().to_string();
            Some(ListEntry { link, title, date })
        })
        .collect()
}

/// Detail-derived columns of a raw row.
pub fn detail_record(detail_url: &str, outcome: FetchOutcome) -> Record {
    let status = outcome.status();
    let mut record = Record::new()
        .with("detail_url", detail_url)
        .with("status_code", status);
    if let Some(html) = outcome.into_body() {
        record.set("is_final", !html.contains(NOT_FINAL_MARKER));
        record.set("has_rationale", html.contains(RATIONALE_MARKER));
        record.set("detail_html", html);
    }
    record
}

#[derive(Debug, Default)]
pub struct NsaCrawler;

impl NsaCrawler {
    async fn fetch_detail(&self, ctx: &CrawlContext, link: &str) -> Result<Record, CrawlError> {
        let url = ctx.url(link);
        let outcome = ctx
            .fetch(
                &format!("detail {}", link),
                FetchRequest::get(&url).expect(DETAIL_MARKER),
            )
            .await?;
        Ok(detail_record(&url, outcome))
    }

    /// Store a result list entry with its detail page.
    ///
    /// A failed detail fetch still stores the listing columns (without a
    /// status, so repair picks the row up) and then reports the failure.
    async fn store_entry(
        &self,
        ctx: &CrawlContext,
        window: &DateWindow,
        page: u32,
        entry: &ListEntry,
    ) -> Result<Saved, CrawlError> {
        if ctx.known(RAW, "link", entry.link.as_str()).await? {
            return Ok(Saved::Known);
        }
        let mut record = Record::new()
            .with("link", entry.link.as_str())
            .with("title", entry.title.as_str())
            .with("date", entry.date.as_str())
            .with("window_from", format_date(window.from))
            .with("window_to", format_date(window.to))
            .with("page", page);

        ctx.throttle().await;
        let failure = match self.fetch_detail(ctx, &entry.link).await {
            Ok(detail) => {
                record.extend(detail);
                None
            }
            Err(e) => Some(e),
        };
        ctx.save(RAW, record, "link").await?;
        match failure {
            None => Ok(Saved::Imported),
            Some(e) => Err(e),
        }
    }

    async fn repair_row(&self, ctx: &CrawlContext, link: String) -> Result<(), CrawlError> {
        let detail = self.fetch_detail(ctx, &link).await?;
        ctx.store
            .interact(move |store| store.update(RAW, &detail, "link", &SqlValue::from(link)))
            .await?;
        Ok(())
    }

    async fn crawl_window(
        &self,
        ctx: &CrawlContext,
        window: &DateWindow,
        summary: &mut BatchSummary,
    ) -> Result<(), CrawlError> {
        let label = window.label();
        let search = ctx
            .fetch(
                &label,
                FetchRequest::post_form(ctx.url(SEARCH_PATH), search_form(window)),
            )
            .await?;
        let Some(search_html) = search.into_body() else {
            warn!("nsa {}: search form not found", label);
            summary.skipped += 1;
            return Ok(());
        };
        let pages = max_page(&search_html);
        debug!("nsa {}: {} result page(s)", label, pages);
        ctx.throttle().await;

        for page in (1..=pages).rev() {
            let unit = format!("{} page {}", label, page);
            let url = ctx.url(&format!("/cbo/find?p={}", page));
            let listing = match ctx.fetch(&unit, FetchRequest::get(&url)).await {
                Ok(outcome) => outcome.into_body(),
                Err(e) => {
                    ctx.unit_failed(&unit, e, summary)?;
                    continue;
                }
            };
            let entries = listing.as_deref().map(parse_entries).unwrap_or_default();
            if entries.is_empty() {
                debug!("nsa {}: no entries", unit);
            }

            for entry in entries {
                summary.processed += 1;
                match self.store_entry(ctx, window, page, &entry).await {
                    Ok(saved) => saved.tally(summary),
                    Err(e) => ctx.unit_failed(&format!("detail {}", entry.link), e, summary)?,
                }
            }
            ctx.throttle().await;
        }
        Ok(())
    }
}

#[async_trait]
impl SourceCrawler for NsaCrawler {
    fn source(&self) -> Source {
        Source::Nsa
    }

    fn tables(&self) -> Vec<TableSchema> {
        vec![TableSchema::new(RAW)
            .texts(&[
                "link",
                "title",
                "date",
                "window_from",
                "window_to",
                "detail_url",
                "detail_html",
            ])
            .integers(&["page", "status_code", "is_final", "has_rationale"])
            .unique(&["link"])]
    }

    async fn crawl(&self, ctx: &CrawlContext) -> Result<BatchSummary, CrawlError> {
        let mut summary = BatchSummary::default();
        let windows = weekly_windows(ctx.settings.since, ctx.settings.to);
        info!("nsa: {} search windows", windows.len());

        for window in windows.iter().rev() {
            if let Err(e) = self.crawl_window(ctx, window, &mut summary).await {
                ctx.unit_failed(&window.label(), e, &mut summary)?;
            }
            ctx.throttle().await;
        }

        info!("nsa: crawl finished ({})", summary);
        Ok(summary)
    }

    async fn repair(&self, ctx: &CrawlContext) -> Result<BatchSummary, CrawlError> {
        let mut summary = BatchSummary::default();
        let sql = format!(
            "SELECT \"link\" FROM {} \
             WHERE (\"status_code\" IS NULL OR \"status_code\" != 200) \
                OR (\"is_final\" IS NULL OR \"is_final\" != 1) \
                OR (\"has_rationale\" IS NULL OR \"has_rationale\" != 1) \
             ORDER BY \"id\"",
            ctx.store.quoted(RAW)?
        );
        let rows = ctx
            .store
            .interact(move |store| store.query(&sql, &[]))
            .await?;
        info!("nsa: {} rows need repair", rows.len());

        for row in rows {
            let Some(link) = row.text("link") else {
                continue;
            };
            summary.processed += 1;
            let unit = format!("detail {}", link);
            match self.repair_row(ctx, link).await {
                Ok(()) => summary.imported += 1,
                Err(e) => ctx.unit_failed(&unit, e, &mut summary)?,
            }
            ctx.throttle().await;
        }

        info!("nsa: repair finished ({})", summary);
        Ok(summary)
    }

    fn supports_repair(&self) -> bool {
        true
    }
}
