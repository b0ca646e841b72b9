//! Multi-source crawling, extraction and unification of Polish legal records.
//!
//! The pipeline runs in three passes that share one SQLite database:
//!
//! 1. [`scrapers`] walk each source (pagination, date windows, id walks)
//!    through a [`http_client::RetryableFetcher`] and persist raw pages.
//! 2. [`extract`] turns unparsed raw rows into normalized parsed rows.
//! 3. [`unify`] projects parsed rows into the cross-source `unified_docs` table.

pub mod cli;
pub mod config;
pub mod extract;
pub mod http_client;
pub mod import;
pub mod models;
pub mod proxy;
pub mod repository;
pub mod scrapers;
pub mod sources;
pub mod unify;
