//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod db;
mod import;
mod parse;
mod proxies;
mod scrape;
mod state;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::load_settings;
use crate::scrapers::CrawlMode;

#[derive(Parser)]
#[command(name = "orzeczenia")]
#[command(about = "Polish court, procurement and tax-registry records acquisition")]
#[command(version)]
pub struct Cli {
    /// Config file path (TOML)
    #[arg(short, long, global = true, env = "ORZECZENIA_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database file (overrides config and DATABASE_PATH)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Create missing tables, columns and unique indexes
    Migrate,

    /// Crawl sources for new records
    Crawl {
        /// Source tags to crawl (ms, nsa, sn, uzp, kidp); defaults to the enabled sources
        sources: Vec<String>,
    },

    /// Re-fetch stored records whose details are incomplete
    Repair {
        /// Source tags to repair; defaults to the enabled sources
        sources: Vec<String>,
    },

    /// Extract structured fields from fetched raw pages
    Parse {
        /// Source tags to parse; defaults to every source
        sources: Vec<String>,
        /// Maximum number of raw rows per source (0 = unlimited)
        #[arg(short, long, default_value = "0")]
        limit: usize,
        /// Reprocess rows that already have a parsed record
        #[arg(short, long)]
        force: bool,
    },

    /// Rebuild the unified document table from parsed rows
    Unify {
        /// Source tags to unify; defaults to every unified source
        sources: Vec<String>,
    },

    /// Import administrative-court listing rows from a CSV export
    ImportCsv {
        /// CSV file with a link,title,date header
        file: PathBuf,
    },

    /// Show per-source record counts
    Status,

    /// Load the proxy file and list the pool
    Proxies {
        /// Proxy list file (overrides config and PROXY_FILE)
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = load_settings(cli.config.as_deref())?;
    if let Some(database) = cli.database {
        settings.database_path = database;
    }

    match cli.command {
        Commands::Migrate => db::cmd_migrate(&settings).await,
        Commands::Crawl { sources } => {
            scrape::cmd_crawl(&settings, &sources, CrawlMode::Crawl).await
        }
        Commands::Repair { sources } => {
            scrape::cmd_crawl(&settings, &sources, CrawlMode::Repair).await
        }
        Commands::Parse {
            sources,
            limit,
            force,
        } => parse::cmd_parse(&settings, &sources, limit, force).await,
        Commands::Unify { sources } => parse::cmd_unify(&settings, &sources).await,
        Commands::ImportCsv { file } => import::cmd_import_csv(&settings, &file).await,
        Commands::Status => state::cmd_status(&settings).await,
        Commands::Proxies { file } => proxies::cmd_proxies(&settings, file).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "orzeczenia",
            "parse",
            "ms",
            "nsa",
            "--limit",
            "10",
            "--database",
            "/tmp/x.db",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.database, Some(PathBuf::from("/tmp/x.db")));
        match cli.command {
            Commands::Parse {
                sources,
                limit,
                force,
            } => {
                assert_eq!(sources, vec!["ms", "nsa"]);
                assert_eq!(limit, 10);
                assert!(!force);
            }
            _ => panic!("expected parse"),
        }
    }

    #[test]
    fn test_import_csv_requires_file() {
        assert!(Cli::try_parse_from(["orzeczenia", "import-csv"]).is_err());
    }
}
