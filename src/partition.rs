//! Date-addressed partitions of detection rows and the store capability that
//! reads and appends them.
//!
//! A partition is the set of detections for one calendar day. Whether it is a
//! physical table (`detections_20250616`) or a slice of a flat table is up to
//! the `DetectionStore` implementation; callers only see `Partition` values.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::fmt;

use crate::error::StatsResult;
use crate::models::DetectionRecord;

pub const PARTITION_PREFIX: &str = "detections_";

/// One day of detections. Orders by date.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Partition {
    pub date: NaiveDate,
    pub name: String,
}

impl Partition {
    pub fn for_date(date: NaiveDate) -> Self {
        Self {
            date,
            name: identifier_for_date(date),
        }
    }

    /// Parse a physical identifier, `None` if it does not follow the naming convention.
    pub fn from_identifier(name: &str) -> Option<Self> {
        date_for_identifier(name).map(|date| Self {
            date,
            name: name.to_string(),
        })
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// `2025-06-16` -> `detections_20250616`
pub fn identifier_for_date(date: NaiveDate) -> String {
    format!("{}{}", PARTITION_PREFIX, date.format("%Y%m%d"))
}

/// `detections_20250616` -> `2025-06-16`
pub fn date_for_identifier(identifier: &str) -> Option<NaiveDate> {
    let raw = identifier.strip_prefix(PARTITION_PREFIX)?;
    if raw.len() != 8 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(raw, "%Y%m%d").ok()
}

/// Partitions whose date lies in `[from, to]`, sorted by date. Missing bounds
/// are open.
pub fn select_partitions(
    partitions: impl IntoIterator<Item = Partition>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Vec<Partition> {
    let mut selected: Vec<Partition> = partitions
        .into_iter()
        .filter(|p| from.map_or(true, |f| p.date >= f) && to.map_or(true, |t| p.date <= t))
        .collect();
    selected.sort();
    selected.dedup();
    selected
}

/// Rows read from one partition
#[derive(Debug, Default)]
pub struct PartitionScan {
    pub records: Vec<DetectionRecord>,
    /// Rows present in the partition that could not be decoded
    pub skipped: usize,
}

/// Where detections live and how to read one day of them.
///
/// Implementations are chosen once at startup; the aggregation engine only
/// talks to this trait.
#[async_trait]
pub trait DetectionStore: Send + Sync {
    /// Every partition currently present, sorted by date.
    async fn list_partitions(&self) -> StatsResult<Vec<Partition>>;

    async fn scan(&self, partition: &Partition) -> StatsResult<PartitionScan>;

    /// Append one record to the partition for its date.
    async fn append(&self, record: &DetectionRecord) -> StatsResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_identifier_roundtrip() {
        assert_eq!(identifier_for_date(d(2025, 6, 16)), "detections_20250616");
        assert_eq!(date_for_identifier("detections_20250616"), Some(d(2025, 6, 16)));
    }

    #[test]
    fn test_malformed_identifier() {
        assert_eq!(date_for_identifier("detections_2025061"), None);
        assert_eq!(date_for_identifier("detections_20251341"), None);
        assert_eq!(date_for_identifier("detections_backup"), None);
        assert_eq!(date_for_identifier("schedule"), None);
        assert!(Partition::from_identifier("detections_x").is_none());
    }

    #[test]
    fn test_select_partitions() {
        let all: Vec<Partition> = [17, 15, 16, 18]
            .into_iter()
            .map(|day| Partition::for_date(d(2025, 6, day)))
            .collect();

        let both = select_partitions(all.clone(), Some(d(2025, 6, 16)), Some(d(2025, 6, 17)));
        let dates: Vec<u32> = both.iter().map(|p| chrono::Datelike::day(&p.date)).collect();
        assert_eq!(dates, vec![16, 17]);

        let open_end = select_partitions(all.clone(), Some(d(2025, 6, 17)), None);
        assert_eq!(open_end.len(), 2);

        let open_start = select_partitions(all.clone(), None, Some(d(2025, 6, 15)));
        assert_eq!(open_start, vec![Partition::for_date(d(2025, 6, 15))]);

        let everything = select_partitions(all, None, None);
        assert_eq!(everything.len(), 4);
        assert!(everything.windows(2).all(|w| w[0].date < w[1].date));
    }
}
