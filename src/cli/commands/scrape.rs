//! Crawl and repair commands.

use std::sync::Arc;

use anyhow::Context;
use console::style;
use tracing::info;

use crate::config::{Settings, SourceSettings};
use crate::http_client::{ReqwestTransport, Transport};
use crate::proxy::ProxyManager;
use crate::scrapers::{CrawlMode, Orchestrator};
use crate::sources::SourceRegistry;

use super::super::helpers::{open_store, resolve_sources};

/// Crawl (or repair) the given sources side by side.
pub async fn cmd_crawl(
    settings: &Settings,
    tags: &[String],
    mode: CrawlMode,
) -> anyhow::Result<()> {
    let sources = resolve_sources(tags, settings.enabled_sources())?;
    let selected: Vec<SourceSettings> = sources
        .iter()
        .filter_map(|s| settings.source(*s).cloned())
        .map(|mut s| {
            // Naming a source on the command line enables it for this run.
            s.enabled = true;
            s
        })
        .collect();
    if selected.is_empty() {
        println!("{} No sources enabled", style("!").yellow());
        return Ok(());
    }

    let registry = Arc::new(SourceRegistry::default());
    let (store, _) = open_store(settings, &registry)?;

    let proxies = match &settings.proxy_file {
        Some(path) => ProxyManager::load(path),
        None => ProxyManager::empty(),
    };
    info!("{} proxies loaded, rotation {}", proxies.len(), settings.rotation);

    let mut builder = ReqwestTransport::builder().browser_headers(true);
    if let Some(ua) = &settings.user_agent {
        builder = builder.user_agent(ua);
    }
    let transport: Arc<dyn Transport> = Arc::new(builder.build());

    let verb = match mode {
        CrawlMode::Crawl => "Crawling",
        CrawlMode::Repair => "Repairing",
    };
    let names: Vec<&str> = selected.iter().map(|s| s.source.as_str()).collect();
    println!("{} {} {}", style("→").cyan(), verb, names.join(", "));

    let orchestrator = Orchestrator::new(registry, store, transport, Arc::new(proxies));
    let report = orchestrator.run(&selected, mode).await;

    for (source, result) in &report.results {
        match result {
            Ok(summary) => println!("  {} {:<6} {}", style("✓").green(), source, summary),
            Err(e) => println!("  {} {:<6} {}", style("✗").red(), source, e),
        }
    }
    println!("\n{:<10} {}", "Total:", report.totals());

    if report.is_success() {
        Ok(())
    } else {
        let failed: Vec<String> = report.failures().map(|(s, _)| s.to_string()).collect();
        Err(anyhow::anyhow!("{} failed", failed.join(", "))).context(format!("{} run", verb))
    }
}
