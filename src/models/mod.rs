//! Data models shared across the crawl, extraction and unification passes.

mod source;
mod summary;
mod unified;

pub use source::Source;
pub use summary::BatchSummary;
pub use unified::UnifiedDocument;
