use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

use crate::error::StatsError;
use crate::timefilter::{format_date, format_time, parse_date, parse_time};

/// Largest count a single stored detection may carry for one vehicle class.
/// Larger values are treated as corrupt rows.
pub const MAX_DETECTION_COUNT: u64 = u32::MAX as u64;

/// Per-class vehicle counts.
///
/// Field-wise addition with `ZERO` as identity forms a commutative monoid, so
/// partial sums can be combined in any order. Addition saturates at
/// `u64::MAX` instead of wrapping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleCounts {
    pub bicycle: u64,
    pub motorcycle: u64,
    pub car: u64,
    pub van: u64,
    pub truck: u64,
    pub bus: u64,
    pub fire_truck: u64,
    pub container: u64,
}

impl VehicleCounts {
    pub const ZERO: VehicleCounts = VehicleCounts {
        bicycle: 0,
        motorcycle: 0,
        car: 0,
        van: 0,
        truck: 0,
        bus: 0,
        fire_truck: 0,
        container: 0,
    };

    /// Sum across all vehicle classes
    pub fn vehicles(&self) -> u64 {
        self.as_row().iter().fold(0, |acc, n| acc.saturating_add(*n))
    }

    /// Column order used by report tables.
    pub fn as_row(&self) -> [u64; 8] {
        [
            self.bicycle,
            self.motorcycle,
            self.car,
            self.van,
            self.truck,
            self.bus,
            self.fire_truck,
            self.container,
        ]
    }
}

impl Add for VehicleCounts {
    type Output = VehicleCounts;

    fn add(self, rhs: VehicleCounts) -> VehicleCounts {
        VehicleCounts {
            bicycle: self.bicycle.saturating_add(rhs.bicycle),
            motorcycle: self.motorcycle.saturating_add(rhs.motorcycle),
            car: self.car.saturating_add(rhs.car),
            van: self.van.saturating_add(rhs.van),
            truck: self.truck.saturating_add(rhs.truck),
            bus: self.bus.saturating_add(rhs.bus),
            fire_truck: self.fire_truck.saturating_add(rhs.fire_truck),
            container: self.container.saturating_add(rhs.container),
        }
    }
}

impl AddAssign for VehicleCounts {
    fn add_assign(&mut self, rhs: VehicleCounts) {
        *self = *self + rhs;
    }
}

impl Sum for VehicleCounts {
    fn sum<I: Iterator<Item = VehicleCounts>>(iter: I) -> Self {
        iter.fold(VehicleCounts::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a VehicleCounts> for VehicleCounts {
    fn sum<I: Iterator<Item = &'a VehicleCounts>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

/// One detection run for one camera. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionRecord {
    pub detection_id: String,
    pub camera_id: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub counts: VehicleCounts,
}

/// Detection row as persisted in SurrealDB
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDetection {
    pub detection_id: String,
    pub camera_id: String,
    pub date: String,
    pub time: String,
    pub counts: StoredCounts,
}

/// Counts as persisted. Signed so that corrupt rows decode and get rejected
/// by `TryFrom` instead of failing the whole batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoredCounts {
    #[serde(default)]
    pub bicycle: i64,
    #[serde(default)]
    pub motorcycle: i64,
    #[serde(default)]
    pub car: i64,
    #[serde(default)]
    pub van: i64,
    #[serde(default)]
    pub truck: i64,
    #[serde(default)]
    pub bus: i64,
    #[serde(default)]
    pub fire_truck: i64,
    #[serde(default)]
    pub container: i64,
}

impl From<&DetectionRecord> for StoredDetection {
    fn from(record: &DetectionRecord) -> Self {
        let c = record.counts;
        let stored = |n: u64| i64::try_from(n).unwrap_or(i64::MAX);
        Self {
            detection_id: record.detection_id.clone(),
            camera_id: record.camera_id.clone(),
            date: format_date(record.date),
            time: format_time(record.time),
            counts: StoredCounts {
                bicycle: stored(c.bicycle),
                motorcycle: stored(c.motorcycle),
                car: stored(c.car),
                van: stored(c.van),
                truck: stored(c.truck),
                bus: stored(c.bus),
                fire_truck: stored(c.fire_truck),
                container: stored(c.container),
            },
        }
    }
}

impl TryFrom<StoredDetection> for DetectionRecord {
    type Error = StatsError;

    fn try_from(row: StoredDetection) -> Result<Self, Self::Error> {
        let count = |field: &'static str, value: i64| match u64::try_from(value) {
            Ok(n) if n <= MAX_DETECTION_COUNT => Ok(n),
            Ok(_) => Err(StatsError::Validation {
                field,
                message: format!("count {} out of range in detection {}", value, row.detection_id),
            }),
            Err(_) => Err(StatsError::Validation {
                field,
                message: format!("negative count {} in detection {}", value, row.detection_id),
            }),
        };
        let c = &row.counts;
        let counts = VehicleCounts {
            bicycle: count("bicycle", c.bicycle)?,
            motorcycle: count("motorcycle", c.motorcycle)?,
            car: count("car", c.car)?,
            van: count("van", c.van)?,
            truck: count("truck", c.truck)?,
            bus: count("bus", c.bus)?,
            fire_truck: count("fire_truck", c.fire_truck)?,
            container: count("container", c.container)?,
        };

        Ok(DetectionRecord {
            date: parse_date(&row.date)?,
            time: parse_time(&row.time)?,
            detection_id: row.detection_id,
            camera_id: row.camera_id,
            counts,
        })
    }
}

/// GeoJSON point as served by the camera registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    #[serde(rename = "type")]
    pub kind: String,
    /// `[longitude, latitude]`
    pub coordinates: [f64; 2],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraLocation {
    #[serde(rename = "_id")]
    pub camera_id: String,
    pub loc: GeoPoint,
}

/// Schedule lifecycle: `Pending` moves to `Sent` or `Cancelled`, both terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
    Pending,
    Sent,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleEvent {
    Delivered,
    Cancel,
}

impl ScheduleEvent {
    pub fn verb(&self) -> &'static str {
        match self {
            ScheduleEvent::Delivered => "send",
            ScheduleEvent::Cancel => "cancel",
        }
    }
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Pending => "pending",
            ScheduleStatus::Sent => "sent",
            ScheduleStatus::Cancelled => "cancelled",
        }
    }

    /// Next status for `event`, or `None` when the transition is not allowed.
    pub fn next(self, event: ScheduleEvent) -> Option<ScheduleStatus> {
        match (self, event) {
            (ScheduleStatus::Pending, ScheduleEvent::Delivered) => Some(ScheduleStatus::Sent),
            (ScheduleStatus::Pending, ScheduleEvent::Cancel) => Some(ScheduleStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted request to mail a date-range report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub schedule_id: String,
    pub email: String,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub status: ScheduleStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(car: u64, bus: u64) -> VehicleCounts {
        VehicleCounts { car, bus, ..VehicleCounts::ZERO }
    }

    #[test]
    fn test_counts_monoid() {
        let a = counts(5, 1);
        let b = counts(3, 0);
        let c = VehicleCounts { bicycle: 2, ..VehicleCounts::ZERO };

        assert_eq!(a + VehicleCounts::ZERO, a);
        assert_eq!(a + b, b + a);
        assert_eq!((a + b) + c, a + (b + c));
        assert_eq!([a, b, c].iter().sum::<VehicleCounts>().vehicles(), 11);
    }

    #[test]
    fn test_stored_roundtrip_rejects_negative() {
        let record = DetectionRecord {
            detection_id: "d1".into(),
            camera_id: "C1".into(),
            date: NaiveDate::from_ymd_opt(2025, 6, 16).unwrap(),
            time: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            counts: counts(5, 0),
        };
        let mut stored = StoredDetection::from(&record);
        assert_eq!(stored.date, "2025-06-16");
        assert_eq!(stored.time, "08:00:00");
        assert_eq!(DetectionRecord::try_from(stored.clone()).unwrap(), record);

        stored.counts.van = -1;
        assert!(DetectionRecord::try_from(stored).is_err());
    }

    #[test]
    fn test_stored_rejects_oversized_counts() {
        let record = DetectionRecord {
            detection_id: "d1".into(),
            camera_id: "C1".into(),
            date: NaiveDate::from_ymd_opt(2025, 6, 16).unwrap(),
            time: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            counts: counts(MAX_DETECTION_COUNT, 0),
        };
        let mut stored = StoredDetection::from(&record);
        assert_eq!(DetectionRecord::try_from(stored.clone()).unwrap(), record);

        stored.counts.car = i64::MAX;
        assert!(matches!(
            DetectionRecord::try_from(stored),
            Err(StatsError::Validation { field: "car", .. })
        ));
    }

    #[test]
    fn test_counts_saturate() {
        let big = counts(u64::MAX, u64::MAX);
        let sum: VehicleCounts = [big, big, counts(1, 1)].iter().sum();
        assert_eq!(sum, big);
        assert_eq!(sum.vehicles(), u64::MAX);
    }

    #[test]
    fn test_schedule_transitions() {
        use ScheduleEvent::*;
        use ScheduleStatus::*;

        assert_eq!(Pending.next(Delivered), Some(Sent));
        assert_eq!(Pending.next(Cancel), Some(Cancelled));
        assert_eq!(Sent.next(Cancel), None);
        assert_eq!(Sent.next(Delivered), None);
        assert_eq!(Cancelled.next(Delivered), None);
    }

    #[test]
    fn test_camera_location_wire_format() {
        let json = r#"{"_id":"C1","loc":{"type":"Point","coordinates":[106.7,10.8]}}"#;
        let cam: CameraLocation = serde_json::from_str(json).unwrap();
        assert_eq!(cam.camera_id, "C1");
        assert_eq!(cam.loc.coordinates, [106.7, 10.8]);
    }
}
