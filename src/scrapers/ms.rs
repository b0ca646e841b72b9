//! Common courts portal: paginated result grid.
//!
//! The advanced search for `since..=to` is walked page by page. The first
//! page tells how many pages and results there are; every case on a page
//! whose title is not stored yet gets its details, judgment text and cited
//! regulations fetched (concurrently) and stored as one raw row.

use async_trait::async_trait;
use scraper::Html;
use tracing::{debug, info, warn};

use super::dates::format_date;
use super::{CrawlContext, CrawlError, Saved, SourceCrawler};
use crate::extract::html::{css, element_text, first_attr, max_number, parse_count};
use crate::http_client::{FetchOutcome, FetchRequest};
use crate::models::{BatchSummary, Source};
use crate::repository::namespace::RAW;
use crate::repository::{Record, TableSchema};

/// Results per grid page.
const PAGE_SIZE: i64 = 10;
const NOT_FINAL_MARKER: &str = "Orzeczenie nieprawomocne";

/// One row of the result grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseSummary {
    pub title: String,
    pub link: String,
    pub case_types: Vec<String>,
    pub is_final: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingPage {
    pub max_page: u32,
    /// Result count announced by the page, when shown.
    pub total: Option<i64>,
    pub cases: Vec<CaseSummary>,
}

/// Parse a result grid page.
pub fn parse_listing(html: &str) -> ListingPage {
    let document = Html::parse_document(html);
    let root = document.root_element();

    let max_page = if root.select(css!(".pagination")).next().is_none() {
        1
    } else {
        max_number(root, css!(".t-data-grid-pager a")).unwrap_or(1).max(1)
    };
    let total = root
        .select(css!("span.big_number"))
        .next()
        .and_then(|el| parse_count(&element_text(el)));

    let cases = root
        .select(css!("tr"))
        .filter_map(|row| {
            let anchor = row.select(css!("h4 a")).next()?;
            let title = element_text(anchor);
            if title.is_empty() {
                return None;
            }
            let paragraphs: Vec<String> = row.select(css!(".title p")).map(element_text).collect();
            let case_types = paragraphs
                .first()
                .map(|p| {
                    p.split(',')
                        .map(|t| t.trim().to_string())
                        .filter(|t| !t.is_empty())
                        .collect()
                })
                .unwrap_or_default();
            let is_final = paragraphs.last().map(String::as_str) != Some(NOT_FINAL_MARKER);
            Some(CaseSummary {
                title,
                link: anchor.value().attr("href").unwrap_or_default().to_string(),
                case_types,
                is_final,
            })
        })
        .collect();

    ListingPage {
        max_page,
        total,
        cases,
    }
}

/// Title of the judgment document (e.g. "Wyrok Sądu Rejonowego ...").
pub fn document_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    crate::extract::html::first_text(
        document.root_element(),
        css!(".pt-Dokumenttytulorzeczenia18"),
    )
    .or_else(|| first_attr(document.root_element(), css!("meta[name=title]"), "content"))
}

#[derive(Debug, Default)]
pub struct MsCrawler;

impl MsCrawler {
    fn listing_url(ctx: &CrawlContext, page: u32) -> String {
        let since = format_date(ctx.settings.since);
        let to = format_date(ctx.settings.to);
        ctx.url(&format!(
            "/search.gridpager/{page}?t:ac=advanced/$N/$N/$N/$N/$N/$N/$N/{since}/{to}/$N/$N/$N/$N/$N/$N/score/descending/{page}",
        ))
    }

    /// Fetch the three pages of a case not stored yet and store them.
    async fn store_case(
        &self,
        ctx: &CrawlContext,
        case: &CaseSummary,
        page: u32,
        page_link: &str,
    ) -> Result<Saved, CrawlError> {
        if ctx.known(RAW, "title", case.title.as_str()).await? {
            debug!("ms: skipping known case {:?}", case.title);
            return Ok(Saved::Known);
        }
        let details_link = ctx.url(&case.link);
        let judgment_link = details_link.replace("/details", "/content");
        let regulations_link = details_link.replace("/details", "/regulations");
        let unit = format!("case {:?}", case.title);

        let (details, judgment, regulations) = futures::try_join!(
            ctx.fetch(&unit, FetchRequest::get(&details_link).no_redirects()),
            ctx.fetch(&unit, FetchRequest::get(&judgment_link).no_redirects()),
            ctx.fetch(&unit, FetchRequest::get(&regulations_link).no_redirects()),
        )?;

        let status = details.status();
        let Some(details_html) = details.into_body() else {
            warn!("ms {}: details page gone ({})", unit, details_link);
            return Ok(Saved::Gone);
        };

        let record = Record::new()
            .with("title", case.title.as_str())
            .with("case_types", case.case_types.join(", "))
            .with("is_final", case.is_final)
            .with("details_link", details_link.as_str())
            .with("judgment_link", judgment_link.as_str())
            .with("regulations_link", regulations_link.as_str())
            .with("details_html", details_html)
            .with("judgment_html", judgment.into_body())
            .with("regulations_html", regulations.into_body())
            .with("status_code", status)
            .with("page", page)
            .with("page_link", page_link);
        ctx.save(RAW, record, "title").await?;
        Ok(Saved::Imported)
    }
}

#[async_trait]
impl SourceCrawler for MsCrawler {
    fn source(&self) -> Source {
        Source::Ms
    }

    fn tables(&self) -> Vec<TableSchema> {
        vec![TableSchema::new(RAW)
            .texts(&[
                "title",
                "case_types",
                "details_link",
                "judgment_link",
                "regulations_link",
                "details_html",
                "judgment_html",
                "regulations_html",
                "page_link",
            ])
            .integers(&["is_final", "status_code", "page"])
            .unique(&["title"])]
    }

    async fn crawl(&self, ctx: &CrawlContext) -> Result<BatchSummary, CrawlError> {
        let mut summary = BatchSummary::default();
        let mut page = ctx.settings.start_page;
        let mut max_page: Option<u32> = None;
        let mut remaining: i64 = 0;

        info!(
            "ms: crawling {} to {} from page {}",
            ctx.settings.since, ctx.settings.to, page
        );

        loop {
            if max_page.is_some_and(|max| page > max) {
                break;
            }
            let unit = format!("page {}", page);
            let url = Self::listing_url(ctx, page);

            let body = match ctx.fetch(&unit, FetchRequest::get(&url)).await {
                Ok(FetchOutcome::Success(response)) => response.body,
                Ok(FetchOutcome::NotFound(_)) => {
                    warn!("ms {}: listing does not exist, stopping", unit);
                    break;
                }
                // Without the first page there is no page count to walk.
                Err(e) if max_page.is_none() => return Err(e),
                Err(e) => {
                    ctx.unit_failed(&unit, e, &mut summary)?;
                    remaining -= PAGE_SIZE;
                    page += 1;
                    ctx.throttle().await;
                    continue;
                }
            };

            let listing = parse_listing(&body);
            if max_page.is_none() {
                max_page = Some(listing.max_page);
                remaining = listing.total.unwrap_or(0);
                info!(
                    "ms: {} pages, {} results announced",
                    listing.max_page, remaining
                );
            }
            debug!(
                "ms {}: {} cases, {} results left",
                unit,
                listing.cases.len(),
                remaining
            );

            if remaining > 0 && listing.cases.is_empty() {
                warn!(
                    "ms {}: no results although {} are expected, stopping",
                    unit, remaining
                );
                break;
            }

            for case in &listing.cases {
                summary.processed += 1;
                match self.store_case(ctx, case, page, &url).await {
                    Ok(Saved::Known) => {
                        Saved::Known.tally(&mut summary);
                        continue;
                    }
                    Ok(saved) => saved.tally(&mut summary),
                    Err(e) => ctx.unit_failed(&format!("case {:?}", case.title), e, &mut summary)?,
                }
                ctx.throttle().await;
            }

            remaining -= PAGE_SIZE;
            page += 1;
            ctx.throttle().await;
        }

        info!("ms: crawl finished ({})", summary);
        Ok(summary)
    }
}
