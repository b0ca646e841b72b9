//! Extraction and unification commands.

use anyhow::Context;
use console::style;

use crate::config::Settings;
use crate::extract::{run_extraction, ExtractOptions};
use crate::models::{BatchSummary, Source};
use crate::repository::SourceStore;
use crate::sources::SourceRegistry;
use crate::unify;

use super::super::helpers::{open_store, resolve_sources, spinner};

/// Parse fetched raw rows into each source's parsed table.
pub async fn cmd_parse(
    settings: &Settings,
    tags: &[String],
    limit: usize,
    force: bool,
) -> anyhow::Result<()> {
    let sources = resolve_sources(tags, Source::ALL.to_vec())?;
    let registry = SourceRegistry::default();
    let (store, _) = open_store(settings, &registry)?;
    let options = ExtractOptions {
        limit: (limit > 0).then_some(limit),
        force,
    };

    let mut total = BatchSummary::default();
    for source in sources {
        let Some(extractor) = registry.extractor(source) else {
            continue;
        };
        let source_store = SourceStore::new(store.clone(), source);
        let pb = spinner(format!("Parsing {}...", source));

        let summary = tokio::task::spawn_blocking(move || {
            run_extraction(extractor.as_ref(), &source_store, options)
        })
        .await
        .context("extraction task panicked")?
        .with_context(|| format!("parsing {}", source))?;

        pb.finish_and_clear();
        println!("  {} {:<6} {}", style("✓").green(), source, summary);
        total += summary;
    }

    println!("\n{:<10} {}", "Total:", total);
    Ok(())
}

/// Rebuild unified documents for the given sources.
pub async fn cmd_unify(settings: &Settings, tags: &[String]) -> anyhow::Result<()> {
    let registry = SourceRegistry::default();
    let sources = resolve_sources(tags, registry.unified_sources())?;
    let (store, _) = open_store(settings, &registry)?;

    let mut total = BatchSummary::default();
    for source in sources {
        let Some(mapper) = registry.mapper(source) else {
            println!(
                "  {} {:<6} not part of the unified table",
                style("!").yellow(),
                source
            );
            continue;
        };
        let source_store = SourceStore::new(store.clone(), source);
        let pb = spinner(format!("Unifying {}...", source));

        let summary =
            tokio::task::spawn_blocking(move || unify::rebuild(mapper.as_ref(), &source_store))
                .await
                .context("unify task panicked")?
                .with_context(|| format!("unifying {}", source))?;

        pb.finish_and_clear();
        println!("  {} {:<6} {}", style("✓").green(), source, summary);
        total += summary;
    }

    println!("\n{:<10} {}", "Total:", total);
    Ok(())
}
