//! Date and time parsing plus inclusive range predicates.
//!
//! Dates are `YYYY-MM-DD`, times are `HH:MM:SS`. Both are zero-padded, so their
//! string forms sort the same way as the values.

use chrono::{NaiveDate, NaiveTime, Timelike};

use crate::error::{StatsError, StatsResult};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";

fn has_shape(s: &str, len: usize, separator: u8, positions: &[usize]) -> bool {
    let bytes = s.as_bytes();
    bytes.len() == len
        && bytes.iter().enumerate().all(|(i, b)| {
            if positions.contains(&i) {
                *b == separator
            } else {
                b.is_ascii_digit()
            }
        })
}

pub fn parse_date(s: &str) -> StatsResult<NaiveDate> {
    let s = s.trim();
    if !has_shape(s, 10, b'-', &[4, 7]) {
        return Err(StatsError::validation(
            "date",
            format!("'{}' is not in YYYY-MM-DD format", s),
        ));
    }
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .map_err(|e| StatsError::validation("date", format!("'{}': {}", s, e)))
}

pub fn parse_time(s: &str) -> StatsResult<NaiveTime> {
    let s = s.trim();
    if !has_shape(s, 8, b':', &[2, 5]) {
        return Err(StatsError::validation(
            "time",
            format!("'{}' is not in HH:MM:SS format", s),
        ));
    }
    let time = NaiveTime::parse_from_str(s, TIME_FORMAT)
        .map_err(|e| StatsError::validation("time", format!("'{}': {}", s, e)))?;
    // chrono accepts ":60" as a leap second
    if time.nanosecond() >= 1_000_000_000 {
        return Err(StatsError::validation("time", format!("'{}': out of range", s)));
    }
    Ok(time)
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn format_time(time: NaiveTime) -> String {
    time.format(TIME_FORMAT).to_string()
}

/// Start of the hour containing `time`, e.g. 09:47:21 -> 09:00:00
pub fn truncate_to_hour(time: NaiveTime) -> NaiveTime {
    time.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(time)
}

/// `from <= value <= to`; a missing bound leaves that side open.
pub fn in_range<T: PartialOrd>(value: &T, from: Option<&T>, to: Option<&T>) -> bool {
    from.map_or(true, |f| f <= value) && to.map_or(true, |t| value <= t)
}

fn check_order<T: PartialOrd>(field: &'static str, from: Option<&T>, to: Option<&T>) -> StatsResult<()> {
    if let (Some(f), Some(t)) = (from, to) {
        if f > t {
            return Err(StatsError::validation(field, "range start is after range end"));
        }
    }
    Ok(())
}

/// Inclusive time-of-day window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub from: Option<NaiveTime>,
    pub to: Option<NaiveTime>,
}

impl TimeRange {
    pub fn new(from: Option<NaiveTime>, to: Option<NaiveTime>) -> StatsResult<Self> {
        check_order("time range", from.as_ref(), to.as_ref())?;
        Ok(Self { from, to })
    }

    pub fn parse(from: Option<&str>, to: Option<&str>) -> StatsResult<Self> {
        let from = from.map(parse_time).transpose()?;
        let to = to.map(parse_time).transpose()?;
        Self::new(from, to)
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        in_range(&time, self.from.as_ref(), self.to.as_ref())
    }

    pub fn is_unbounded(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    /// Bounds as strings, defaulting to the whole day.
    pub fn display_bounds(&self) -> (String, String) {
        (
            self.from.map(format_time).unwrap_or_else(|| "00:00:00".to_string()),
            self.to.map(format_time).unwrap_or_else(|| "23:59:59".to_string()),
        )
    }
}

/// Inclusive calendar window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(from: Option<NaiveDate>, to: Option<NaiveDate>) -> StatsResult<Self> {
        check_order("date range", from.as_ref(), to.as_ref())?;
        Ok(Self { from, to })
    }

    pub fn single(date: NaiveDate) -> Self {
        Self {
            from: Some(date),
            to: Some(date),
        }
    }

    pub fn parse(from: Option<&str>, to: Option<&str>) -> StatsResult<Self> {
        let from = from.map(parse_date).transpose()?;
        let to = to.map(parse_date).transpose()?;
        Self::new(from, to)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        in_range(&date, self.from.as_ref(), self.to.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn test_parse_time() {
        assert_eq!(parse_time("08:05:09").unwrap(), t(8, 5, 9));
        assert!(parse_time("8:05:09").is_err());
        assert!(parse_time("08:05").is_err());
        assert!(parse_time("25:00:00").is_err());
        assert!(parse_time("23:59:60").is_err());
        assert!(matches!(
            parse_time("noon"),
            Err(StatsError::Validation { field: "time", .. })
        ));
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(
            parse_date("2025-06-16").unwrap(),
            NaiveDate::from_ymd_opt(2025, 6, 16).unwrap()
        );
        assert!(parse_date("2025-6-16").is_err());
        assert!(parse_date("20250616").is_err());
        assert!(parse_date("2025-02-30").is_err());
    }

    #[test]
    fn test_range_inclusive() {
        let range = TimeRange::parse(Some("08:00:00"), Some("09:00:00")).unwrap();
        assert!(range.contains(t(8, 0, 0)));
        assert!(range.contains(t(9, 0, 0)));
        assert!(!range.contains(t(7, 59, 59)));
        assert!(!range.contains(t(9, 0, 1)));
    }

    #[test]
    fn test_open_bounds() {
        assert!(in_range(&5, None, None));
        assert!(in_range(&5, Some(&5), None));
        assert!(!in_range(&4, Some(&5), None));
        assert!(in_range(&5, None, Some(&5)));
        assert!(!in_range(&6, None, Some(&5)));
    }

    #[test]
    fn test_inverted_range_rejected() {
        assert!(TimeRange::parse(Some("10:00:00"), Some("09:00:00")).is_err());
        assert!(DateRange::parse(Some("2025-06-17"), Some("2025-06-16")).is_err());
    }

    #[test]
    fn test_truncate_to_hour() {
        assert_eq!(truncate_to_hour(t(9, 47, 21)), t(9, 0, 0));
        assert_eq!(truncate_to_hour(t(0, 0, 0)), t(0, 0, 0));
    }

    #[test]
    fn test_display_bounds_default_full_day() {
        let (from, to) = TimeRange::default().display_bounds();
        assert_eq!(from, "00:00:00");
        assert_eq!(to, "23:59:59");
    }
}
