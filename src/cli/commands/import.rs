//! CSV listing import command.

use std::path::Path;

use anyhow::Context;
use console::style;

use crate::config::Settings;
use crate::import::import_file;
use crate::models::Source;
use crate::repository::SourceStore;
use crate::sources::SourceRegistry;

use super::super::helpers::open_store;

/// Import administrative-court listing rows; the repair pass fetches their details.
pub async fn cmd_import_csv(settings: &Settings, file: &Path) -> anyhow::Result<()> {
    println!(
        "{} Importing {} into {}_raw",
        style("→").cyan(),
        file.display(),
        Source::Nsa
    );

    let registry = SourceRegistry::default();
    let (store, _) = open_store(settings, &registry)?;
    let store = SourceStore::new(store, Source::Nsa);

    let summary = import_file(&store, file).with_context(|| format!("importing {}", file.display()))?;

    println!("  {:<10} {}", "Processed:", summary.processed);
    println!("  {:<10} {}", "Imported:", summary.imported);
    println!("  {:<10} {}", "Skipped:", summary.skipped);
    if summary.imported > 0 {
        println!(
            "\n{} Run 'orzeczenia repair nsa' to fetch the detail pages",
            style("→").cyan()
        );
    }
    Ok(())
}
