//! Shared helper functions for CLI commands.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::Settings;
use crate::models::Source;
use crate::repository::{
    AutoCreateColumns, MigrationReport, SchemaEvolvingStore, SqlitePool, StrictColumns,
};
use crate::sources::SourceRegistry;

/// Parse source tags given on the command line, or fall back to `default`.
pub fn resolve_sources(tags: &[String], default: Vec<Source>) -> anyhow::Result<Vec<Source>> {
    if tags.is_empty() {
        return Ok(default);
    }
    let mut sources = Vec::with_capacity(tags.len());
    for tag in tags {
        let source: Source = tag.parse().map_err(anyhow::Error::msg)?;
        if !sources.contains(&source) {
            sources.push(source);
        }
    }
    Ok(sources)
}

/// Open the configured database and apply the source schema.
pub fn open_store(
    settings: &Settings,
    registry: &SourceRegistry,
) -> anyhow::Result<(Arc<SchemaEvolvingStore>, MigrationReport)> {
    let pool = SqlitePool::open(&settings.database_path)
        .with_context(|| format!("opening {}", settings.database_path.display()))?;
    let store = if settings.auto_create_columns {
        SchemaEvolvingStore::with_ensurer(pool, Arc::new(AutoCreateColumns))
    } else {
        SchemaEvolvingStore::with_ensurer(pool, Arc::new(StrictColumns))
    };
    let report = store
        .migrate(&registry.schema())
        .context("applying schema migrations")?;
    Ok((Arc::new(store), report))
}

/// A ticking spinner for a blocking batch step.
pub fn spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_sources() {
        let all = Source::ALL.to_vec();
        assert_eq!(resolve_sources(&[], all.clone()).unwrap(), all);

        let tags = vec!["NSA".to_string(), "ms".to_string(), "nsa".to_string()];
        assert_eq!(
            resolve_sources(&tags, all.clone()).unwrap(),
            vec![Source::Nsa, Source::Ms]
        );

        assert!(resolve_sources(&["foo".to_string()], all).is_err());
    }
}
