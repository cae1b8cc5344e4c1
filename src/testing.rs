//! In-memory doubles for unit tests.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use std::collections::HashSet;
use std::sync::Mutex;

use crate::error::{StatsError, StatsResult};
use crate::mailer::{EmailMessage, Mailer};
use crate::models::{DetectionRecord, Schedule, ScheduleStatus, VehicleCounts};
use crate::partition::{DetectionStore, Partition, PartitionScan};
use crate::report::ScheduleStore;
use crate::timefilter::{parse_date, parse_time};

pub fn d(s: &str) -> NaiveDate {
    parse_date(s).unwrap()
}

pub fn t(s: &str) -> NaiveTime {
    parse_time(s).unwrap()
}

pub fn cars(n: u64) -> VehicleCounts {
    VehicleCounts {
        car: n,
        ..VehicleCounts::ZERO
    }
}

pub fn record(camera: &str, date: &str, time: &str, counts: VehicleCounts) -> DetectionRecord {
    DetectionRecord {
        detection_id: format!("{}-{}-{}", camera, date, time),
        camera_id: camera.to_string(),
        date: d(date),
        time: t(time),
        counts,
    }
}

#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<DetectionRecord>>,
    failing: HashSet<NaiveDate>,
}

impl MemoryStore {
    pub fn with_records(records: Vec<DetectionRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            failing: HashSet::new(),
        }
    }

    /// Scans of this date's partition fail
    pub fn failing_on(mut self, date: NaiveDate) -> Self {
        self.failing.insert(date);
        self
    }

    pub fn records(&self) -> Vec<DetectionRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl DetectionStore for MemoryStore {
    async fn list_partitions(&self) -> StatsResult<Vec<Partition>> {
        let mut partitions: Vec<Partition> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .map(|r| Partition::for_date(r.date))
            .collect();
        partitions.sort();
        partitions.dedup();
        Ok(partitions)
    }

    async fn scan(&self, partition: &Partition) -> StatsResult<PartitionScan> {
        if self.failing.contains(&partition.date) {
            return Err(StatsError::NotFound(format!("table {} is gone", partition.name)));
        }
        let records = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.date == partition.date)
            .cloned()
            .collect();
        Ok(PartitionScan { records, skipped: 0 })
    }

    async fn append(&self, record: &DetectionRecord) -> StatsResult<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySchedules {
    schedules: Mutex<Vec<Schedule>>,
}

#[async_trait]
impl ScheduleStore for MemorySchedules {
    async fn insert(&self, schedule: &Schedule) -> StatsResult<()> {
        self.schedules.lock().unwrap().push(schedule.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> StatsResult<Schedule> {
        self.schedules
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.schedule_id == id)
            .cloned()
            .ok_or_else(|| StatsError::NotFound(format!("Schedule not found: {}", id)))
    }

    async fn list(&self, email: Option<&str>) -> StatsResult<Vec<Schedule>> {
        let mut found: Vec<Schedule> = self
            .schedules
            .lock()
            .unwrap()
            .iter()
            .filter(|s| email.map_or(true, |e| s.email == e))
            .cloned()
            .collect();
        found.sort_by(|a, b| (a.date_from, &a.schedule_id).cmp(&(b.date_from, &b.schedule_id)));
        Ok(found)
    }

    async fn transition(&self, id: &str, from: ScheduleStatus, to: ScheduleStatus) -> StatsResult<bool> {
        let mut schedules = self.schedules.lock().unwrap();
        match schedules.iter_mut().find(|s| s.schedule_id == id && s.status == from) {
            Some(schedule) => {
                schedule.status = to;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn pending_due(&self, before: NaiveDate) -> StatsResult<Vec<Schedule>> {
        Ok(self
            .schedules
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.status == ScheduleStatus::Pending && s.date_to < before)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<EmailMessage>>,
    fail: bool,
}

impl RecordingMailer {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn deliver(&self, message: &EmailMessage) -> StatsResult<()> {
        if self.fail {
            return Err(StatsError::Delivery("relay refused connection".into()));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}
