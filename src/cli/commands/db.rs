//! Database management commands.

use console::style;

use crate::config::Settings;
use crate::sources::SourceRegistry;

use super::super::helpers::open_store;

/// Run database migrations.
pub async fn cmd_migrate(settings: &Settings) -> anyhow::Result<()> {
    println!("{} Database migration", style("→").cyan());
    println!("  Database: {}", settings.database_path.display());

    let registry = SourceRegistry::default();
    let (store, report) = open_store(settings, &registry)?;

    println!("  Schema version: {}", report.version);
    println!("  {:<18} {}", "Tables created:", report.tables_created);
    println!("  {:<18} {}", "Columns added:", report.columns_added);
    println!("  {:<18} {}", "Unique indexes:", report.unique_indexes);

    if report.tables_created == 0 && report.columns_added == 0 {
        println!(
            "\n{} Schema is up to date ({})",
            style("✓").green(),
            store.pool().describe()
        );
    } else {
        println!("\n{} Migration complete", style("✓").green());
    }
    Ok(())
}
