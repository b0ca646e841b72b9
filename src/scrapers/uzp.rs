//! Procurement appeals office: walk decision ids upwards.
//!
//! Decisions live at `Home/Details/{n}` with consecutive ids. A run starts
//! one past the largest stored id and visits `scan_length` ids. Missing ids
//! are stored as 404 placeholders so the walk never revisits them; existing
//! ones are stored with the metrics block and the decision text loaded from
//! the embedded iframe.

use async_trait::async_trait;
use scraper::Html;
use tracing::{info, warn};

use super::{CrawlContext, CrawlError, Saved, SourceCrawler};
use crate::extract::html::{css, document_text, split_at_marker, RATIONALE_MARKER};
use crate::http_client::{FetchOutcome, FetchRequest};
use crate::models::{BatchSummary, Source};
use crate::repository::namespace::RAW;
use crate::repository::{Record, TableSchema};

/// The parts of a decision page the crawler keeps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionPage {
    pub details_metrics: String,
    pub iframe_src: String,
    pub title: Option<String>,
}

/// Locate the metrics block and the decision iframe. Both are required.
pub fn parse_decision_page(html: &str) -> Result<DecisionPage, String> {
    let document = Html::parse_document(html);
    let metrics = document
        .select(css!("div.details-metrics"))
        .next()
        .ok_or("div.details-metrics not found")?;
    let iframe = document
        .select(css!("#iframeContent"))
        .next()
        .ok_or("#iframeContent not found")?;
    let iframe_src = iframe
        .value()
        .attr("src")
        .ok_or("#iframeContent has no src")?;
    Ok(DecisionPage {
        details_metrics: metrics.inner_html(),
        iframe_src: iframe_src.to_string(),
        title: iframe.value().attr("title").map(str::to_string),
    })
}

/// Decision text split at the rationale header. Without a header the whole
/// text is the judgment.
pub fn split_decision(iframe_html: &str) -> (String, Option<String>) {
    let text = document_text(iframe_html);
    match split_at_marker(&text, &RATIONALE_MARKER) {
        Some((judgment, rationale)) => (judgment, Some(rationale)),
        None => (text, None),
    }
}

#[derive(Debug, Default)]
pub struct UzpCrawler;

impl UzpCrawler {
    async fn visit(&self, ctx: &CrawlContext, index: i64) -> Result<Record, CrawlError> {
        let unit = format!("id {}", index);
        let url = ctx.url(&format!("/Home/Details/{}", index));
        let outcome = ctx
            .fetch(&unit, FetchRequest::get(&url).no_redirects())
            .await?;

        let record = Record::new()
            .with("site_index", index)
            .with("url", url.as_str())
            .with("status_code", outcome.status());
        let page_html = match outcome {
            FetchOutcome::NotFound(_) => {
                warn!("uzp {}: page does not exist", unit);
                return Ok(record);
            }
            FetchOutcome::Success(response) => response.body,
        };

        let page = parse_decision_page(&page_html).map_err(|m| ctx.layout_error(&unit, m))?;
        let iframe_url = ctx.url(&page.iframe_src);
        ctx.throttle().await;
        let iframe_html = ctx
            .fetch(&unit, FetchRequest::get(&iframe_url).no_redirects())
            .await?
            .into_body()
            .ok_or_else(|| ctx.layout_error(&unit, "decision iframe not found"))?;

        let (judgment, rationale) = split_decision(&iframe_html);
        if rationale.is_none() {
            warn!("uzp {}: no rationale header in decision text", unit);
        }
        Ok(record
            .with("title", page.title)
            .with("details_metrics", page.details_metrics)
            .with("iframe_url", iframe_url.as_str())
            .with("page_html", page_html)
            .with("iframe_html", iframe_html)
            .with("judgment_text", judgment)
            .with("rationale_text", rationale))
    }

    /// Visit an id and store what it returned, placeholder or decision.
    async fn store_index(&self, ctx: &CrawlContext, index: i64) -> Result<Saved, CrawlError> {
        let record = self.visit(ctx, index).await?;
        let found = record.i64("status_code") == Some(200);
        ctx.save(RAW, record, "site_index").await?;
        Ok(if found { Saved::Imported } else { Saved::Gone })
    }
}

#[async_trait]
impl SourceCrawler for UzpCrawler {
    fn source(&self) -> Source {
        Source::Uzp
    }

    fn tables(&self) -> Vec<TableSchema> {
        vec![TableSchema::new(RAW)
            .integers(&["site_index", "status_code"])
            .texts(&[
                "url",
                "title",
                "details_metrics",
                "iframe_url",
                "page_html",
                "iframe_html",
                "judgment_text",
                "rationale_text",
            ])
            .unique(&["site_index"])]
    }

    async fn crawl(&self, ctx: &CrawlContext) -> Result<BatchSummary, CrawlError> {
        let mut summary = BatchSummary::default();
        let largest = ctx
            .store
            .interact(|store| store.max_integer(RAW, "site_index"))
            .await?
            .unwrap_or(0);
        let first = largest + 1;
        let last = largest + i64::from(ctx.settings.scan_length);
        info!(
            "uzp: largest stored id {}, visiting {} to {}",
            largest, first, last
        );

        for index in first..=last {
            summary.processed += 1;
            match self.store_index(ctx, index).await {
                Ok(saved) => saved.tally(&mut summary),
                Err(e) => ctx.unit_failed(&format!("id {}", index), e, &mut summary)?,
            }
            ctx.throttle().await;
        }

        info!("uzp: crawl finished ({})", summary);
        Ok(summary)
    }
}
