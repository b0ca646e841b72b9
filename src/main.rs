//! Orzeczenia - Polish legal-records acquisition.
//!
//! Crawls court, procurement-appeal and tax-registry portals, extracts
//! structured case data and maintains a unified cross-source document table.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use orzeczenia::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    let default_filter = if cli::is_verbose() {
        "orzeczenia=info"
    } else {
        "orzeczenia=warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    cli::run().await
}
