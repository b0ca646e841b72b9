//! Date slicing for date-driven searches.

use chrono::{Days, NaiveDate};

/// Width of a search window, in days after its first day.
pub const WINDOW_DAYS: u64 = 7;

/// Inclusive date span submitted as one search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateWindow {
    pub fn label(&self) -> String {
        format!("{} to {}", format_date(self.from), format_date(self.to))
    }
}

/// Windows covering `since..=to` in ascending order: each spans
/// `start..=min(start + 7 days, to)` and the next starts the day after.
pub fn weekly_windows(since: NaiveDate, to: NaiveDate) -> Vec<DateWindow> {
    let mut windows = Vec::new();
    let mut start = since;
    while start <= to {
        let end = start
            .checked_add_days(Days::new(WINDOW_DAYS))
            .map_or(to, |end| end.min(to));
        windows.push(DateWindow {
            from: start,
            to: end,
        });
        match end.succ_opt() {
            Some(next) => start = next,
            None => break,
        }
    }
    windows
}

/// Every day in `since..=to`, ascending.
pub fn days(since: NaiveDate, to: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    since.iter_days().take_while(move |day| *day <= to)
}

/// `YYYY-MM-DD`, as every portal expects in its search forms.
pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_weekly_windows_cover_range() {
        let windows = weekly_windows(d("2024-01-01"), d("2024-01-20"));
        let labels: Vec<_> = windows.iter().map(DateWindow::label).collect();
        assert_eq!(
            labels,
            vec![
                "2024-01-01 to 2024-01-08",
                "2024-01-09 to 2024-01-16",
                "2024-01-17 to 2024-01-20",
            ]
        );
    }

    #[test]
    fn test_weekly_windows_edges() {
        assert!(weekly_windows(d("2024-02-02"), d("2024-02-01")).is_empty());
        assert_eq!(
            weekly_windows(d("2024-02-01"), d("2024-02-01")),
            vec![DateWindow {
                from: d("2024-02-01"),
                to: d("2024-02-01")
            }]
        );
    }

    #[test]
    fn test_days() {
        let all: Vec<_> = days(d("2024-02-28"), d("2024-03-01")).map(format_date).collect();
        assert_eq!(all, vec!["2024-02-28", "2024-02-29", "2024-03-01"]);
        assert_eq!(days(d("2024-03-02"), d("2024-03-01")).count(), 0);
    }
}
