//! Aggregation engine
//!
//! Every read operation is one call to [`Engine::aggregate`] with a set of
//! [`Filters`] and a [`GroupBy`] granularity:
//!
//! 1. list partitions and keep the ones inside the date filter
//! 2. scan them concurrently; each scan folds into its own [`Buckets`]
//! 3. merge the partial buckets with the `VehicleCounts` monoid
//! 4. emit details sorted by group key plus the overall total
//!
//! Because merging is a monoid sum, the result does not depend on which
//! partition finishes first.

use chrono::{NaiveDate, NaiveTime};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cameras::LocationIndex;
use crate::error::StatsResult;
use crate::models::{DetectionRecord, GeoPoint, VehicleCounts};
use crate::partition::{select_partitions, DetectionStore};
use crate::timefilter::{truncate_to_hour, DateRange, TimeRange};

// ============================================================================
// Grouping
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupBy {
    Date,
    DateTime,
    Camera,
    DateCamera,
    /// Time truncated to the start of its hour, then camera
    HourCamera,
}

/// Grouping key. Derived ordering compares the date or hour first, then the
/// time or camera.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GroupKey {
    Date(NaiveDate),
    DateTime(NaiveDate, NaiveTime),
    Camera(String),
    DateCamera(NaiveDate, String),
    HourCamera(NaiveTime, String),
}

impl GroupBy {
    pub fn key(&self, record: &DetectionRecord) -> GroupKey {
        match self {
            GroupBy::Date => GroupKey::Date(record.date),
            GroupBy::DateTime => GroupKey::DateTime(record.date, record.time),
            GroupBy::Camera => GroupKey::Camera(record.camera_id.clone()),
            GroupBy::DateCamera => GroupKey::DateCamera(record.date, record.camera_id.clone()),
            GroupBy::HourCamera => {
                GroupKey::HourCamera(truncate_to_hour(record.time), record.camera_id.clone())
            }
        }
    }
}

impl GroupKey {
    pub fn date(&self) -> Option<NaiveDate> {
        match self {
            GroupKey::Date(d) | GroupKey::DateTime(d, _) | GroupKey::DateCamera(d, _) => Some(*d),
            _ => None,
        }
    }

    pub fn time(&self) -> Option<NaiveTime> {
        match self {
            GroupKey::DateTime(_, t) | GroupKey::HourCamera(t, _) => Some(*t),
            _ => None,
        }
    }

    pub fn camera(&self) -> Option<&str> {
        match self {
            GroupKey::Camera(c) | GroupKey::DateCamera(_, c) | GroupKey::HourCamera(_, c) => Some(c),
            _ => None,
        }
    }
}

// ============================================================================
// Filters
// ============================================================================

/// Conjunction of row predicates. The camera set matches ANY of its members.
#[derive(Debug, Clone, Default)]
pub struct Filters {
    pub dates: DateRange,
    pub times: TimeRange,
    pub cameras: Option<BTreeSet<String>>,
}

impl Filters {
    pub fn on_date(date: NaiveDate) -> Self {
        Self {
            dates: DateRange::single(date),
            ..Self::default()
        }
    }

    pub fn between(dates: DateRange) -> Self {
        Self {
            dates,
            ..Self::default()
        }
    }

    pub fn within(mut self, times: TimeRange) -> Self {
        self.times = times;
        self
    }

    pub fn cameras(mut self, ids: BTreeSet<String>) -> Self {
        self.cameras = Some(ids);
        self
    }

    pub fn camera(self, id: &str) -> Self {
        self.cameras(BTreeSet::from([id.to_string()]))
    }

    pub fn matches(&self, record: &DetectionRecord) -> bool {
        self.dates.contains(record.date)
            && self.times.contains(record.time)
            && self
                .cameras
                .as_ref()
                .map_or(true, |ids| ids.contains(&record.camera_id))
    }
}

// ============================================================================
// Results
// ============================================================================

/// Non-fatal problems met while scanning. The affected rows are absent from
/// both details and total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanWarning {
    PartitionUnreadable { partition: String, reason: String },
    RowsSkipped { partition: String, rows: usize },
}

impl fmt::Display for ScanWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanWarning::PartitionUnreadable { partition, reason } => {
                write!(f, "partition {} unreadable: {}", partition, reason)
            }
            ScanWarning::RowsSkipped { partition, rows } => {
                write!(f, "partition {}: {} undecodable rows skipped", partition, rows)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detail {
    pub key: GroupKey,
    pub counts: VehicleCounts,
    /// Set when the aggregation joined camera locations
    pub location: Option<GeoPoint>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub total: VehicleCounts,
    /// Sorted ascending by key
    pub details: Vec<Detail>,
    pub matched_rows: usize,
    pub warnings: Vec<ScanWarning>,
}

/// One hour of an `HourCamera` aggregation
#[derive(Debug, Clone, PartialEq)]
pub struct HourlyGroup {
    pub hour: NaiveTime,
    pub total: VehicleCounts,
    pub details: Vec<Detail>,
}

impl Aggregation {
    /// Present result with nothing in it
    pub fn empty() -> Self {
        Self {
            total: VehicleCounts::ZERO,
            details: Vec::new(),
            matched_rows: 0,
            warnings: Vec::new(),
        }
    }

    /// Nest details by their hour. Details without a time component are
    /// ignored.
    pub fn by_hour(&self) -> Vec<HourlyGroup> {
        let mut groups: Vec<HourlyGroup> = Vec::new();
        for detail in &self.details {
            let Some(hour) = detail.key.time() else { continue };
            match groups.last_mut() {
                Some(group) if group.hour == hour => {
                    group.total += detail.counts;
                    group.details.push(detail.clone());
                }
                _ => groups.push(HourlyGroup {
                    hour,
                    total: detail.counts,
                    details: vec![detail.clone()],
                }),
            }
        }
        groups
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.details.iter().filter_map(|d| d.key.date()).collect()
    }
}

/// Partial aggregation over some subset of rows
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct Buckets {
    groups: BTreeMap<GroupKey, VehicleCounts>,
    rows: usize,
}

impl Buckets {
    pub(crate) fn fold(
        records: impl IntoIterator<Item = DetectionRecord>,
        filters: &Filters,
        group_by: GroupBy,
        locations: Option<&LocationIndex>,
    ) -> Self {
        let mut buckets = Buckets::default();
        for record in records {
            if !filters.matches(&record) {
                continue;
            }
            if let Some(index) = locations {
                if index.resolve(&record.camera_id).is_none() {
                    continue;
                }
            }
            *buckets.groups.entry(group_by.key(&record)).or_default() += record.counts;
            buckets.rows += 1;
        }
        buckets
    }

    pub(crate) fn merge(&mut self, other: Buckets) {
        for (key, counts) in other.groups {
            *self.groups.entry(key).or_default() += counts;
        }
        self.rows += other.rows;
    }

    fn finish(self, locations: Option<&LocationIndex>, warnings: Vec<ScanWarning>) -> Option<Aggregation> {
        if self.rows == 0 {
            return None;
        }
        let details: Vec<Detail> = self
            .groups
            .into_iter()
            .map(|(key, counts)| {
                let location = locations
                    .zip(key.camera())
                    .and_then(|(index, camera)| index.resolve(camera).cloned());
                Detail { key, counts, location }
            })
            .collect();
        let total = details.iter().map(|d| d.counts).sum();

        Some(Aggregation {
            total,
            details,
            matched_rows: self.rows,
            warnings,
        })
    }
}

// ============================================================================
// Engine
// ============================================================================

pub struct Engine {
    store: Arc<dyn DetectionStore>,
    scan_concurrency: usize,
}

impl Engine {
    pub fn new(store: Arc<dyn DetectionStore>, scan_concurrency: usize) -> Self {
        Self {
            store,
            scan_concurrency: scan_concurrency.max(1),
        }
    }

    pub fn store(&self) -> &Arc<dyn DetectionStore> {
        &self.store
    }

    /// Aggregate every row matching `filters`, grouped by `group_by`.
    ///
    /// With `locations`, rows from cameras without a known location are
    /// dropped before grouping. Returns `None` when no row matches.
    pub async fn aggregate(
        &self,
        filters: &Filters,
        group_by: GroupBy,
        locations: Option<&LocationIndex>,
    ) -> StatsResult<Option<Aggregation>> {
        let partitions = select_partitions(
            self.store.list_partitions().await?,
            filters.dates.from,
            filters.dates.to,
        );
        debug!(partitions = partitions.len(), ?group_by, "scanning partitions");

        let mut scans = stream::iter(partitions)
            .map(|partition| {
                let store = Arc::clone(&self.store);
                async move {
                    let result = store.scan(&partition).await;
                    (partition, result)
                }
            })
            .buffer_unordered(self.scan_concurrency);

        let mut buckets = Buckets::default();
        let mut warnings = Vec::new();
        while let Some((partition, result)) = scans.next().await {
            match result {
                Ok(scan) => {
                    if scan.skipped > 0 {
                        warn!(partition = %partition, rows = scan.skipped, "skipped undecodable rows");
                        warnings.push(ScanWarning::RowsSkipped {
                            partition: partition.name.clone(),
                            rows: scan.skipped,
                        });
                    }
                    buckets.merge(Buckets::fold(scan.records, filters, group_by, locations));
                }
                Err(e) => {
                    warn!(partition = %partition, error = %e, "skipping unreadable partition");
                    warnings.push(ScanWarning::PartitionUnreadable {
                        partition: partition.name,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if buckets.rows == 0 && !warnings.is_empty() {
            debug!(warnings = warnings.len(), "no rows matched; scan had warnings");
        }
        Ok(buckets.finish(locations, warnings))
    }

    /// Every distinct (date, time) with at least one detection, ascending.
    pub async fn timestamps(&self) -> StatsResult<Vec<(NaiveDate, NaiveTime)>> {
        let aggregation = self
            .aggregate(&Filters::default(), GroupBy::DateTime, None)
            .await?;
        Ok(aggregation
            .map(|a| {
                a.details
                    .iter()
                    .filter_map(|d| d.key.date().zip(d.key.time()))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Every distinct date with at least one detection, ascending.
    pub async fn dates(&self) -> StatsResult<Vec<NaiveDate>> {
        let aggregation = self
            .aggregate(&Filters::default(), GroupBy::Date, None)
            .await?;
        Ok(aggregation.map(|a| a.dates()).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cameras::LocationIndex;
    use crate::models::CameraLocation;
    use crate::testing::{cars, d, record, t, MemoryStore};

    fn engine(store: MemoryStore) -> Engine {
        Engine::new(Arc::new(store), 4)
    }

    fn locations(ids: &[&str]) -> LocationIndex {
        LocationIndex::from(
            ids.iter()
                .map(|id| CameraLocation {
                    camera_id: id.to_string(),
                    loc: GeoPoint {
                        kind: "Point".into(),
                        coordinates: [106.7, 10.8],
                    },
                })
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn test_same_key_rows_merge() {
        let store = MemoryStore::with_records(vec![
            record("C1", "2025-06-16", "08:00:00", cars(5)),
            record("C1", "2025-06-16", "08:00:00", cars(3)),
        ]);

        let result = engine(store)
            .aggregate(&Filters::on_date(d("2025-06-16")), GroupBy::DateTime, None)
            .await
            .unwrap()
            .expect("rows present");

        assert_eq!(result.details.len(), 1);
        assert_eq!(
            result.details[0].key,
            GroupKey::DateTime(d("2025-06-16"), t("08:00:00"))
        );
        assert_eq!(result.details[0].counts.car, 8);
        assert_eq!(result.total.car, 8);
        assert_eq!(result.matched_rows, 2);
    }

    #[tokio::test]
    async fn test_huge_counts_saturate_across_partitions() {
        let store = MemoryStore::with_records(vec![
            record("C1", "2025-06-15", "08:00:00", cars(u64::MAX)),
            record("C1", "2025-06-16", "08:00:00", cars(u64::MAX)),
            record("C1", "2025-06-16", "09:00:00", cars(u64::MAX)),
        ]);

        let result = engine(store)
            .aggregate(&Filters::default(), GroupBy::Camera, None)
            .await
            .unwrap()
            .expect("rows present");

        assert_eq!(result.total.car, u64::MAX);
        assert_eq!(result.details[0].counts.car, u64::MAX);
        assert_eq!(result.matched_rows, 3);
    }

    #[tokio::test]
    async fn test_absence_vs_zero() {
        let store = MemoryStore::with_records(vec![record(
            "C1",
            "2025-06-16",
            "08:00:00",
            VehicleCounts::ZERO,
        )]);
        let engine = engine(store);

        let missing = engine
            .aggregate(&Filters::on_date(d("2025-06-17")), GroupBy::DateTime, None)
            .await
            .unwrap();
        assert!(missing.is_none());

        let zero = engine
            .aggregate(&Filters::on_date(d("2025-06-16")), GroupBy::DateTime, None)
            .await
            .unwrap()
            .expect("zero-valued rows are still rows");
        assert_eq!(zero.total, VehicleCounts::ZERO);
        assert_eq!(zero.details.len(), 1);
    }

    #[tokio::test]
    async fn test_time_range_boundaries() {
        let store = MemoryStore::with_records(vec![
            record("C1", "2025-06-16", "07:59:59", cars(1)),
            record("C1", "2025-06-16", "08:00:00", cars(10)),
            record("C1", "2025-06-16", "09:00:00", cars(100)),
            record("C1", "2025-06-16", "09:00:01", cars(1000)),
        ]);
        let range = TimeRange::parse(Some("08:00:00"), Some("09:00:00")).unwrap();

        let result = engine(store)
            .aggregate(
                &Filters::on_date(d("2025-06-16")).within(range),
                GroupBy::DateTime,
                None,
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result.total.car, 110);
        assert_eq!(result.details.len(), 2);
    }

    #[tokio::test]
    async fn test_heatmap_excludes_unlocated_cameras() {
        let store = MemoryStore::with_records(vec![
            record("C1", "2025-06-16", "08:00:00", cars(7)),
            record("C2", "2025-06-16", "08:00:00", cars(2)),
        ]);
        let engine = engine(store);
        let index = locations(&["C2"]);
        let filters = Filters::on_date(d("2025-06-16"));

        let heatmap = engine
            .aggregate(&filters, GroupBy::Camera, Some(&index))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(heatmap.details.len(), 1);
        assert_eq!(heatmap.details[0].key, GroupKey::Camera("C2".into()));
        assert!(heatmap.details[0].location.is_some());
        assert_eq!(heatmap.total.car, 2);

        // Same partition without a location join still counts C1
        let by_date = engine
            .aggregate(&filters, GroupBy::Date, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_date.total.car, 9);
    }

    #[tokio::test]
    async fn test_all_cameras_unlocated_is_absence() {
        let store = MemoryStore::with_records(vec![record("C1", "2025-06-16", "08:00:00", cars(7))]);
        let index = locations(&["C9"]);
        let result = engine(store)
            .aggregate(&Filters::on_date(d("2025-06-16")), GroupBy::Camera, Some(&index))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_hour_buckets() {
        let store = MemoryStore::with_records(vec![
            record("C2", "2025-06-16", "09:47:21", cars(1)),
            record("C1", "2025-06-16", "09:05:00", cars(2)),
            record("C1", "2025-06-16", "09:59:59", cars(3)),
            record("C1", "2025-06-16", "08:00:00", cars(4)),
        ]);
        let index = locations(&["C1", "C2"]);

        let result = engine(store)
            .aggregate(&Filters::on_date(d("2025-06-16")), GroupBy::HourCamera, Some(&index))
            .await
            .unwrap()
            .unwrap();

        let hours = result.by_hour();
        assert_eq!(hours.len(), 2);
        assert_eq!(hours[0].hour, t("08:00:00"));
        assert_eq!(hours[0].total.car, 4);
        assert_eq!(hours[1].hour, t("09:00:00"));
        assert_eq!(hours[1].total.car, 6);
        let cams: Vec<_> = hours[1].details.iter().filter_map(|d| d.key.camera()).collect();
        assert_eq!(cams, vec!["C1", "C2"]);
        assert_eq!(hours[1].details[0].counts.car, 5);
    }

    #[tokio::test]
    async fn test_camera_set_filter_and_date_range() {
        let store = MemoryStore::with_records(vec![
            record("C1", "2025-06-15", "08:00:00", cars(1)),
            record("C2", "2025-06-16", "08:00:00", cars(2)),
            record("C3", "2025-06-16", "08:00:00", cars(4)),
            record("C1", "2025-06-17", "08:00:00", cars(8)),
            record("C1", "2025-06-18", "08:00:00", cars(16)),
        ]);
        let dates = DateRange::parse(Some("2025-06-16"), Some("2025-06-17")).unwrap();
        let filters = Filters::between(dates).cameras(BTreeSet::from(["C1".into(), "C2".into()]));

        let result = engine(store)
            .aggregate(&filters, GroupBy::Date, None)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result.dates(), vec![d("2025-06-16"), d("2025-06-17")]);
        assert_eq!(result.total.car, 10);
    }

    #[tokio::test]
    async fn test_unreadable_partition_is_skipped() {
        let store = MemoryStore::with_records(vec![
            record("C1", "2025-06-15", "08:00:00", cars(1)),
            record("C1", "2025-06-16", "08:00:00", cars(2)),
        ])
        .failing_on(d("2025-06-15"));

        let result = engine(store)
            .aggregate(&Filters::default(), GroupBy::Date, None)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result.total.car, 2);
        assert_eq!(result.details.len(), 1);
        assert!(matches!(
            result.warnings.as_slice(),
            [ScanWarning::PartitionUnreadable { partition, .. }] if partition == "detections_20250615"
        ));
    }

    #[tokio::test]
    async fn test_timestamps_and_dates_sorted_distinct() {
        let store = MemoryStore::with_records(vec![
            record("C1", "2025-06-17", "10:00:00", cars(1)),
            record("C2", "2025-06-16", "09:00:00", cars(1)),
            record("C1", "2025-06-16", "09:00:00", cars(1)),
            record("C1", "2025-06-16", "08:00:00", cars(1)),
        ]);
        let engine = engine(store);

        let stamps = engine.timestamps().await.unwrap();
        assert_eq!(
            stamps,
            vec![
                (d("2025-06-16"), t("08:00:00")),
                (d("2025-06-16"), t("09:00:00")),
                (d("2025-06-17"), t("10:00:00")),
            ]
        );
        assert_eq!(engine.dates().await.unwrap(), vec![d("2025-06-16"), d("2025-06-17")]);
    }

    #[test]
    fn test_partial_merge_matches_single_fold() {
        let rows = vec![
            record("C2", "2025-06-16", "08:00:00", cars(1)),
            record("C1", "2025-06-16", "08:00:00", cars(2)),
            record("C1", "2025-06-17", "08:00:00", cars(4)),
            record("C2", "2025-06-16", "09:00:00", cars(8)),
        ];
        let filters = Filters::default();
        let whole = Buckets::fold(rows.clone(), &filters, GroupBy::DateCamera, None);

        let mut forward = Buckets::fold(rows[..2].to_vec(), &filters, GroupBy::DateCamera, None);
        forward.merge(Buckets::fold(rows[2..].to_vec(), &filters, GroupBy::DateCamera, None));

        let mut backward = Buckets::fold(rows[2..].to_vec(), &filters, GroupBy::DateCamera, None);
        backward.merge(Buckets::fold(rows[..2].to_vec(), &filters, GroupBy::DateCamera, None));

        assert_eq!(whole, forward);
        assert_eq!(whole, backward);
        assert_eq!(
            whole.groups.get(&GroupKey::DateCamera(d("2025-06-16"), "C2".into())).map(|c| c.car),
            Some(9)
        );
    }
}
