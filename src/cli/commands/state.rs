//! Store status command.

use console::style;

use crate::config::Settings;
use crate::models::Source;
use crate::repository::namespace::{PARSED, RAW};
use crate::repository::{SourceStore, SqlValue};
use crate::sources::SourceRegistry;
use crate::unify::UNIFIED_TABLE;

use super::super::helpers::open_store;

/// Show raw, parsed and unified counts per source.
pub async fn cmd_status(settings: &Settings) -> anyhow::Result<()> {
    let registry = SourceRegistry::default();
    let (store, _) = open_store(settings, &registry)?;

    println!("\n{}", style("Store Status").bold());
    println!("{}", "-".repeat(48));
    println!("{:<20} {}", "Database:", store.pool().describe());
    println!();
    println!(
        "{:<8} {:>10} {:>10} {:>10} {:>10}  {}",
        "Source", "Raw", "Parsed", "Pending", "Unified", "Portal"
    );

    for source in Source::ALL {
        let source_store = SourceStore::new(store.clone(), source);
        let raw = source_store.count(RAW)?;
        let parsed = source_store.count(PARSED)?;
        let unified = if source.is_unified() {
            store
                .query(
                    &format!("SELECT COUNT(*) AS n FROM {} WHERE source = ?1", UNIFIED_TABLE),
                    &[SqlValue::from(source.as_str())],
                )?
                .first()
                .and_then(|row| row.i64("n"))
                .unwrap_or(0)
                .to_string()
        } else {
            "-".to_string()
        };
        let pending = (raw - parsed).max(0);

        let pending = if pending > 0 {
            style(pending.to_string()).yellow().to_string()
        } else {
            style(pending.to_string()).dim().to_string()
        };
        println!(
            "{:<8} {:>10} {:>10} {:>10} {:>10}  {}",
            source.as_str(),
            raw,
            parsed,
            pending,
            unified,
            style(source.display_name()).dim()
        );
    }
    Ok(())
}
