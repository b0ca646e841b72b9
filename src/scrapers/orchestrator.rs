//! Runs the enabled crawlers side by side.
//!
//! Each source gets its own task and its own [`RetryableFetcher`] (so its
//! retry policy applies), while the transport, the proxy pool and the
//! database are shared. A crawler that fails does not stop the others; its
//! error is reported in the [`CrawlReport`].

use std::sync::Arc;

use tracing::{error, info, warn};

use super::{CrawlContext, CrawlError};
use crate::config::SourceSettings;
use crate::http_client::{RetryableFetcher, Transport};
use crate::models::{BatchSummary, Source};
use crate::proxy::ProxyManager;
use crate::repository::{SchemaEvolvingStore, SourceStore};
use crate::sources::SourceRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlMode {
    /// Walk the source for new records.
    Crawl,
    /// Re-fetch stored records that are incomplete.
    Repair,
}

/// Per-source outcome of one orchestrated run, in source order.
#[derive(Debug, Default)]
pub struct CrawlReport {
    pub results: Vec<(Source, Result<BatchSummary, CrawlError>)>,
}

impl CrawlReport {
    /// Summed counters of the crawlers that finished.
    pub fn totals(&self) -> BatchSummary {
        let mut totals = BatchSummary::default();
        for summary in self.results.iter().filter_map(|(_, r)| r.as_ref().ok()) {
            totals += *summary;
        }
        totals
    }

    pub fn failures(&self) -> impl Iterator<Item = (Source, &CrawlError)> {
        self.results
            .iter()
            .filter_map(|(source, result)| result.as_ref().err().map(|e| (*source, e)))
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }
}

pub struct Orchestrator {
    registry: Arc<SourceRegistry>,
    store: Arc<SchemaEvolvingStore>,
    transport: Arc<dyn Transport>,
    proxies: Arc<ProxyManager>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<SourceRegistry>,
        store: Arc<SchemaEvolvingStore>,
        transport: Arc<dyn Transport>,
        proxies: Arc<ProxyManager>,
    ) -> Self {
        Self {
            registry,
            store,
            transport,
            proxies,
        }
    }

    fn context(&self, settings: &SourceSettings) -> CrawlContext {
        let fetcher = RetryableFetcher::new(
            self.transport.clone(),
            self.proxies.clone(),
            settings.fetch.clone(),
        );
        CrawlContext::new(
            Arc::new(fetcher),
            SourceStore::new(self.store.clone(), settings.source),
            settings.clone(),
        )
    }

    /// Run every given source concurrently and wait for all of them.
    pub async fn run(&self, sources: &[SourceSettings], mode: CrawlMode) -> CrawlReport {
        let mut handles = Vec::with_capacity(sources.len());

        for settings in sources {
            let source = settings.source;
            let Some(crawler) = self.registry.crawler(source) else {
                warn!("{}: no crawler registered, skipping", source);
                continue;
            };
            if mode == CrawlMode::Repair && !crawler.supports_repair() {
                info!("{}: nothing to repair", source);
                continue;
            }

            let ctx = self.context(settings);
            info!("{}: starting {:?}", source, mode);
            let handle = tokio::spawn(async move {
                match mode {
                    CrawlMode::Crawl => crawler.crawl(&ctx).await,
                    CrawlMode::Repair => crawler.repair(&ctx).await,
                }
            });
            handles.push((source, handle));
        }

        let mut report = CrawlReport::default();
        for (source, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(CrawlError::Task {
                    tag: source,
                    message: e.to_string(),
                }),
            };
            match &result {
                Ok(summary) => info!("{}: finished ({})", source, summary),
                Err(e) => error!("{}: stopped: {}", source, e),
            }
            report.results.push((source, result));
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::NaiveDate;

    use super::*;
    use crate::http_client::scripted::ScriptedTransport;
    use crate::http_client::FetchPolicy;
    use crate::repository::namespace::RAW;
    use crate::repository::SqlitePool;
    use crate::scrapers::testing::BASE;

    fn settings(source: Source) -> SourceSettings {
        let mut settings = SourceSettings::for_source(source, BASE);
        settings.request_delay = Duration::ZERO;
        settings.since = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        settings.to = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        settings.scan_length = 1;
        settings.fetch = FetchPolicy {
            max_retries: 0,
            retry_delay: Duration::ZERO,
            anti_bot_cooldown: Duration::ZERO,
            ..FetchPolicy::default()
        };
        settings
    }

    #[tokio::test]
    async fn test_failures_are_isolated_per_source() {
        let registry = Arc::new(SourceRegistry::default());
        let store = Arc::new(SchemaEvolvingStore::new(SqlitePool::in_memory().unwrap()));
        store.migrate(&registry.schema()).unwrap();
        let transport = Arc::new(ScriptedTransport::new());

        // uzp: one id answered with a placeholder; ms: first page fails
        transport.on_get(&format!("{}/Home/Details/1", BASE), 404, "");
        let orchestrator = Orchestrator::new(
            registry,
            store.clone(),
            transport.clone(),
            Arc::new(ProxyManager::empty()),
        );
        let ms = settings(Source::Ms);
        transport.on_get(
            &format!(
                "{}/search.gridpager/1?t:ac=advanced/$N/$N/$N/$N/$N/$N/$N/2024-01-01/2024-01-01/$N/$N/$N/$N/$N/$N/score/descending/1",
                BASE
            ),
            500,
            "",
        );

        let report = orchestrator
            .run(&[ms, settings(Source::Uzp)], CrawlMode::Crawl)
            .await;
        assert_eq!(report.results.len(), 2);
        assert!(!report.is_success());
        assert_eq!(report.failures().map(|(s, _)| s).collect::<Vec<_>>(), vec![Source::Ms]);
        assert_eq!(report.totals().processed, 1);

        let uzp = SourceStore::new(store, Source::Uzp);
        assert_eq!(uzp.count(RAW).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_repair_only_runs_repairable_sources() {
        let registry = Arc::new(SourceRegistry::default());
        let store = Arc::new(SchemaEvolvingStore::new(SqlitePool::in_memory().unwrap()));
        store.migrate(&registry.schema()).unwrap();
        let orchestrator = Orchestrator::new(
            registry,
            store,
            Arc::new(ScriptedTransport::new()),
            Arc::new(ProxyManager::empty()),
        );

        let report = orchestrator
            .run(
                &[settings(Source::Ms), settings(Source::Nsa)],
                CrawlMode::Repair,
            )
            .await;
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].0, Source::Nsa);
        assert!(report.is_success());
    }
}
