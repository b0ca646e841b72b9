//! Batch counters reported at the end of every pass.

use std::fmt;
use std::ops::AddAssign;

/// Processed / imported / skipped counts for one batch operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Units examined (pages, dates, ids, rows).
    pub processed: u64,
    /// Records written.
    pub imported: u64,
    /// Units intentionally passed over (duplicates, not found, no results).
    pub skipped: u64,
    /// Units that failed after retries and were left for a later run.
    pub failed: u64,
}

impl BatchSummary {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl AddAssign for BatchSummary {
    fn add_assign(&mut self, other: Self) {
        self.processed += other.processed;
        self.imported += other.imported;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed={} imported={} skipped={} failed={}",
            self.processed, self.imported, self.skipped, self.failed
        )
    }
}
