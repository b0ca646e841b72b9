//! Registry of the supported sources.
//!
//! Ties each [`Source`] tag to its crawler, extractor and unified mapper, and
//! assembles the schema registry every command migrates at startup.

use std::collections::HashMap;
use std::sync::Arc;

use crate::extract::{
    KidpExtractor, MsExtractor, NsaExtractor, RecordExtractor, SnExtractor, UzpExtractor,
};
use crate::models::Source;
use crate::repository::namespace::table_name;
use crate::repository::SchemaRegistry;
use crate::scrapers::{KidpCrawler, MsCrawler, NsaCrawler, SnCrawler, SourceCrawler, UzpCrawler};
use crate::unify::{self, MsMapper, NsaMapper, SnMapper, UnifiedMapper, UzpMapper};

/// Version recorded in `schema_versions`; bump when a declaration changes.
pub const SCHEMA_VERSION: u32 = 1;

/// Registry of crawlers, extractors and mappers per source.
pub struct SourceRegistry {
    crawlers: HashMap<Source, Arc<dyn SourceCrawler>>,
    extractors: HashMap<Source, Arc<dyn RecordExtractor>>,
    mappers: HashMap<Source, Arc<dyn UnifiedMapper>>,
}

impl SourceRegistry {
    /// Create a registry with every built-in source.
    pub fn new() -> Self {
        let mut crawlers: HashMap<Source, Arc<dyn SourceCrawler>> = HashMap::new();
        crawlers.insert(Source::Ms, Arc::new(MsCrawler));
        crawlers.insert(Source::Nsa, Arc::new(NsaCrawler));
        crawlers.insert(Source::Sn, Arc::new(SnCrawler));
        crawlers.insert(Source::Uzp, Arc::new(UzpCrawler));
        crawlers.insert(Source::Kidp, Arc::new(KidpCrawler));

        let mut extractors: HashMap<Source, Arc<dyn RecordExtractor>> = HashMap::new();
        extractors.insert(Source::Ms, Arc::new(MsExtractor));
        extractors.insert(Source::Nsa, Arc::new(NsaExtractor));
        extractors.insert(Source::Sn, Arc::new(SnExtractor));
        extractors.insert(Source::Uzp, Arc::new(UzpExtractor));
        extractors.insert(Source::Kidp, Arc::new(KidpExtractor));

        // The tax registry is parsed but not unified.
        let mut mappers: HashMap<Source, Arc<dyn UnifiedMapper>> = HashMap::new();
        mappers.insert(Source::Ms, Arc::new(MsMapper));
        mappers.insert(Source::Nsa, Arc::new(NsaMapper));
        mappers.insert(Source::Sn, Arc::new(SnMapper));
        mappers.insert(Source::Uzp, Arc::new(UzpMapper));

        Self {
            crawlers,
            extractors,
            mappers,
        }
    }

    pub fn crawler(&self, source: Source) -> Option<Arc<dyn SourceCrawler>> {
        self.crawlers.get(&source).cloned()
    }

    pub fn extractor(&self, source: Source) -> Option<Arc<dyn RecordExtractor>> {
        self.extractors.get(&source).cloned()
    }

    pub fn mapper(&self, source: Source) -> Option<Arc<dyn UnifiedMapper>> {
        self.mappers.get(&source).cloned()
    }

    /// Sources with a unified mapper, in tag order.
    pub fn unified_sources(&self) -> Vec<Source> {
        Source::ALL
            .into_iter()
            .filter(|s| self.mappers.contains_key(s))
            .collect()
    }

    /// Every table of every source under its prefixed name, plus the shared
    /// unified table.
    pub fn schema(&self) -> SchemaRegistry {
        let mut registry = SchemaRegistry::new(SCHEMA_VERSION);
        for source in Source::ALL {
            let crawler_tables = self.crawlers.get(&source).map(|c| c.tables());
            let extractor_tables = self.extractors.get(&source).map(|e| e.tables());
            for table in crawler_tables
                .into_iter()
                .chain(extractor_tables)
                .flatten()
            {
                let name = table_name(source, table.name());
                registry.register(table.renamed(name));
            }
        }
        registry.register(unify::unified_table());
        registry
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
