//! Source crawlers.
//!
//! One [`SourceCrawler`] per portal walks that portal's search space
//! (pager, date windows, id walks or region pages) one unit at a time,
//! skips records whose natural key is already stored and persists raw pages
//! through the source's table namespace. Progress is re-derived from the
//! store on the next run, so there is no checkpoint file.

pub mod dates;
pub mod kidp;
pub mod ms;
pub mod nsa;
pub mod orchestrator;
pub mod sn;
pub mod uzp;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, warn};

use crate::config::SourceSettings;
use crate::http_client::{FetchError, FetchOutcome, FetchRequest, RetryableFetcher};
use crate::models::{BatchSummary, Source};
use crate::repository::{Record, SourceStore, SqlValue, StoreError, TableSchema};

pub use kidp::KidpCrawler;
pub use ms::MsCrawler;
pub use nsa::NsaCrawler;
pub use orchestrator::{CrawlMode, CrawlReport, Orchestrator};
pub use sn::SnCrawler;
pub use uzp::UzpCrawler;

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("{tag} {unit}: {source}")]
    Fetch {
        tag: Source,
        unit: String,
        source: FetchError,
    },

    #[error("{tag} {unit}: unexpected page layout: {message}")]
    Layout {
        tag: Source,
        unit: String,
        message: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{tag}: crawler task failed: {message}")]
    Task { tag: Source, message: String },
}

impl CrawlError {
    /// Errors that end the crawler regardless of `abort_on_failure`: a
    /// store that can no longer be written to, or a crashed task. A write
    /// rejected for one record only fails that unit.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Store(e) => !e.is_record_scoped(),
            Self::Task { .. } => true,
            Self::Fetch { .. } | Self::Layout { .. } => false,
        }
    }
}

/// How one record ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Saved {
    /// Written as a new row.
    Imported,
    /// Its natural key is stored already; nothing was fetched.
    Known,
    /// The site does not have it (404); at most a placeholder was written.
    Gone,
}

impl Saved {
    pub fn tally(self, summary: &mut BatchSummary) {
        match self {
            Self::Imported => summary.imported += 1,
            Self::Known | Self::Gone => summary.skipped += 1,
        }
    }
}

/// What a crawler works with: a fetcher configured for its source, the
/// source's table namespace and its settings.
#[derive(Clone)]
pub struct CrawlContext {
    pub fetcher: Arc<RetryableFetcher>,
    pub store: SourceStore,
    pub settings: SourceSettings,
}

impl CrawlContext {
    pub fn new(fetcher: Arc<RetryableFetcher>, store: SourceStore, settings: SourceSettings) -> Self {
        Self {
            fetcher,
            store,
            settings,
        }
    }

    pub fn source(&self) -> Source {
        self.settings.source
    }

    pub fn url(&self, path: &str) -> String {
        self.settings.url(path)
    }

    /// Fetch with the source's retry policy, attaching the unit to errors.
    pub async fn fetch(&self, unit: &str, request: FetchRequest) -> Result<FetchOutcome, CrawlError> {
        self.fetcher
            .fetch(&request)
            .await
            .map_err(|source| CrawlError::Fetch {
                tag: self.source(),
                unit: unit.to_string(),
                source,
            })
    }

    pub fn layout_error(&self, unit: &str, message: impl Into<String>) -> CrawlError {
        CrawlError::Layout {
            tag: self.source(),
            unit: unit.to_string(),
            message: message.into(),
        }
    }

    /// Whether `table` already holds a row whose `column` equals `value`.
    pub async fn known(
        &self,
        table: &'static str,
        column: &'static str,
        value: impl Into<SqlValue>,
    ) -> Result<bool, CrawlError> {
        let value = value.into();
        Ok(self
            .store
            .interact(move |store| store.exists(table, column, &value))
            .await?)
    }

    /// Upsert a record on its natural key.
    pub async fn save(
        &self,
        table: &'static str,
        record: Record,
        key: &'static str,
    ) -> Result<i64, CrawlError> {
        Ok(self
            .store
            .interact(move |store| store.insert(table, &record, Some(key)))
            .await?)
    }

    /// Politeness delay between requests.
    pub async fn throttle(&self) {
        pause(self.settings.request_delay).await;
    }

    /// Decide what a failed unit means for the crawl.
    ///
    /// With `abort_on_failure`, or for a fatal error, the error is returned
    /// and ends the crawler; otherwise it is logged, counted and the crawl
    /// moves on to the next unit.
    pub fn unit_failed(
        &self,
        unit: &str,
        err: CrawlError,
        summary: &mut BatchSummary,
    ) -> Result<(), CrawlError> {
        if err.is_fatal() || self.settings.abort_on_failure {
            error!("{} {}: {}, stopping crawler", self.source(), unit, err);
            return Err(err);
        }
        warn!("{} {}: {}, skipping", self.source(), unit, err);
        summary.failed += 1;
        Ok(())
    }
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

/// A resumable crawler for one source.
#[async_trait]
pub trait SourceCrawler: Send + Sync {
    fn source(&self) -> Source;

    /// Raw tables this crawler writes, with short (unprefixed) names.
    fn tables(&self) -> Vec<TableSchema>;

    /// Walk the source and persist raw records not seen before.
    async fn crawl(&self, ctx: &CrawlContext) -> Result<BatchSummary, CrawlError>;

    /// Re-fetch stored records that are missing required data.
    async fn repair(&self, _ctx: &CrawlContext) -> Result<BatchSummary, CrawlError> {
        Ok(BatchSummary::default())
    }

    fn supports_repair(&self) -> bool {
        false
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;
    use std::time::Duration;

    use super::CrawlContext;
    use crate::config::SourceSettings;
    use crate::http_client::scripted::ScriptedTransport;
    use crate::http_client::{FetchPolicy, RetryableFetcher};
    use crate::models::Source;
    use crate::proxy::ProxyManager;
    use crate::repository::{SchemaEvolvingStore, SourceStore, SqlitePool};
    use crate::sources::SourceRegistry;

    pub const BASE: &str = "http://portal.test";

    /// A migrated in-memory store and a scripted transport with no delays.
    pub fn context(source: Source) -> (CrawlContext, Arc<ScriptedTransport>) {
        let store = Arc::new(SchemaEvolvingStore::new(SqlitePool::in_memory().unwrap()));
        store.migrate(&SourceRegistry::default().schema()).unwrap();

        let mut settings = SourceSettings::for_source(source, BASE);
        settings.request_delay = Duration::ZERO;
        settings.fetch = FetchPolicy {
            max_retries: 1,
            retry_delay: Duration::ZERO,
            anti_bot_cooldown: Duration::ZERO,
            ..FetchPolicy::default()
        };

        let transport = Arc::new(ScriptedTransport::new());
        let fetcher = Arc::new(RetryableFetcher::new(
            transport.clone(),
            Arc::new(ProxyManager::empty()),
            settings.fetch.clone(),
        ));
        (
            CrawlContext::new(fetcher, SourceStore::new(store, source), settings),
            transport,
        )
    }
}
