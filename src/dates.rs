use chrono::{Duration, NaiveDate};

/// Canonical wire format for calendar dates.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DateError {
    #[error("invalid date `{0}`, expected YYYY-MM-DD")]
    Invalid(String),
}

/// Parse a `YYYY-MM-DD` string. Anything else, including a date that does
/// not exist on the calendar, is rejected.
pub fn parse_date(s: &str) -> Result<NaiveDate, DateError> {
    // chrono accepts unpadded fields; the wire format is fixed-width
    if s.len() != 10 {
        return Err(DateError::Invalid(s.to_string()));
    }
    NaiveDate::parse_from_str(s, DATE_FORMAT).map_err(|_| DateError::Invalid(s.to_string()))
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// `date` shifted by `days`, saturating at the ends of the supported calendar.
pub fn add_days(date: NaiveDate, days: i64) -> NaiveDate {
    Duration::try_days(days)
        .and_then(|delta| date.checked_add_signed(delta))
        .unwrap_or(if days < 0 { NaiveDate::MIN } else { NaiveDate::MAX })
}

/// Whole days from `a` to `b` (`b - a`).
pub fn diff_days(a: NaiveDate, b: NaiveDate) -> i64 {
    (b - a).num_days()
}

/// Calendar dates between two bounds, both inclusive.
///
/// Empty when `from > to`. Cloning yields an independent iterator, so a range
/// can be walked more than once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateRange {
    next: NaiveDate,
    last: NaiveDate,
    done: bool,
}

impl DateRange {
    pub fn inclusive(from: NaiveDate, to: NaiveDate) -> Self {
        Self {
            next: from,
            last: to,
            done: from > to,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        !self.done && self.next <= date && date <= self.last
    }
}

impl Iterator for DateRange {
    type Item = NaiveDate;

    fn next(&mut self) -> Option<NaiveDate> {
        if self.done {
            return None;
        }
        let current = self.next;
        if current == self.last {
            self.done = true;
        } else {
            self.next = current.succ_opt()?;
        }
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.done {
            return (0, Some(0));
        }
        let n = diff_days(self.next, self.last) as usize + 1;
        (n, Some(n))
    }
}

impl DoubleEndedIterator for DateRange {
    fn next_back(&mut self) -> Option<NaiveDate> {
        if self.done {
            return None;
        }
        let current = self.last;
        if current == self.next {
            self.done = true;
        } else {
            self.last = current.pred_opt()?;
        }
        Some(current)
    }
}

impl ExactSizeIterator for DateRange {}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    #[test]
    fn parses_iso_dates() {
        assert_eq!(d("2024-02-29"), NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        assert_eq!(format_date(d("2024-01-05")), "2024-01-05");
    }

    #[test]
    fn rejects_malformed_dates() {
        for bad in ["", "2024-1-05", "2024-02-30", "05.01.2024", "2024-01-05x", "abcd-ef-gh"] {
            assert_eq!(parse_date(bad), Err(DateError::Invalid(bad.to_string())), "{bad}");
        }
    }

    #[test]
    fn day_arithmetic_crosses_month_and_year() {
        assert_eq!(add_days(d("2024-01-29"), 3), d("2024-02-01"));
        assert_eq!(add_days(d("2024-01-01"), -1), d("2023-12-31"));
        assert_eq!(diff_days(d("2024-01-01"), d("2024-01-29")), 28);
        assert_eq!(diff_days(d("2024-01-29"), d("2024-01-01")), -28);
    }

    #[test]
    fn huge_offsets_saturate() {
        assert_eq!(add_days(d("2024-01-01"), 1_000_000_000), NaiveDate::MAX);
        assert_eq!(add_days(d("2024-01-01"), i64::MAX), NaiveDate::MAX);
        assert_eq!(add_days(d("2024-01-01"), i64::MIN), NaiveDate::MIN);
    }

    #[test]
    fn range_is_inclusive_and_restartable() {
        let range = DateRange::inclusive(d("2024-02-27"), d("2024-03-01"));
        let days: Vec<String> = range.clone().map(format_date).collect();
        assert_eq!(days, ["2024-02-27", "2024-02-28", "2024-02-29", "2024-03-01"]);
        assert_eq!(range.len(), 4);
        assert_eq!(range.clone().count(), 4);
        assert_eq!(range.rev().next(), Some(d("2024-03-01")));
    }

    #[test]
    fn inverted_range_is_empty() {
        let range = DateRange::inclusive(d("2024-03-02"), d("2024-03-01"));
        assert_eq!(range.len(), 0);
        assert!(!range.contains(d("2024-03-01")));
        assert_eq!(range.count(), 0);
    }

    #[test]
    fn single_day_range() {
        let mut range = DateRange::inclusive(d("2024-03-01"), d("2024-03-01"));
        assert!(range.contains(d("2024-03-01")));
        assert_eq!(range.next(), Some(d("2024-03-01")));
        assert_eq!(range.next(), None);
    }
}
