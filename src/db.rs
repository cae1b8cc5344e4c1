//! SurrealDB connection, schema, and the storage implementations behind
//! `DetectionStore` and `ScheduleStore`.

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use clap::ValueEnum;
use std::sync::Arc;
use surrealdb::engine::local::{Db, Mem, RocksDb};
use surrealdb::Surreal;
use tracing::{debug, info, warn};

use crate::error::{StatsError, StatsResult};
use crate::models::{DetectionRecord, Schedule, ScheduleStatus, StoredDetection};
use crate::partition::{DetectionStore, Partition, PartitionScan, PARTITION_PREFIX};
use crate::report::ScheduleStore;
use crate::timefilter::{format_date, parse_date};

pub type DbConn = Surreal<Db>;

const NAMESPACE: &str = "traffic";
const DATABASE: &str = "detections";
const FLAT_TABLE: &str = "detections";
const DETECTION_FIELDS: &str = "detection_id, camera_id, date, time, counts";
const SCHEDULE_FIELDS: &str = "schedule_id, email, date_from, date_to, status";

/// Initialize database connection with RocksDB backend
pub async fn connect(path: &str) -> Result<DbConn> {
    let db = Surreal::new::<RocksDb>(path).await?;
    db.use_ns(NAMESPACE).use_db(DATABASE).await?;
    Ok(db)
}

/// In-memory database, used by tests and dry runs
pub async fn connect_memory() -> Result<DbConn> {
    let db = Surreal::new::<Mem>(()).await?;
    db.use_ns(NAMESPACE).use_db(DATABASE).await?;
    Ok(db)
}

/// How detection rows are laid out on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PartitionMode {
    /// One `detections_YYYYMMDD` table per day
    Daily,
    /// A single `detections` table with a `date` column
    Flat,
}

/// Initialize database schema
pub async fn init_schema(db: &DbConn, mode: PartitionMode) -> Result<()> {
    db.query(
        r#"
        DEFINE TABLE IF NOT EXISTS schedule SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_schedule_id ON schedule FIELDS schedule_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_schedule_email ON schedule FIELDS email;
        "#,
    )
    .await?
    .check()?;

    if mode == PartitionMode::Flat {
        db.query(
            r#"
            DEFINE TABLE IF NOT EXISTS detections SCHEMALESS;
            DEFINE INDEX IF NOT EXISTS idx_detection_date ON detections FIELDS date;
            "#,
        )
        .await?
        .check()?;
    }

    info!(?mode, "schema ready");
    Ok(())
}

pub fn open_store(mode: PartitionMode, db: DbConn) -> Arc<dyn DetectionStore> {
    match mode {
        PartitionMode::Daily => Arc::new(DailyTables::new(db)),
        PartitionMode::Flat => Arc::new(FlatTable::new(db)),
    }
}

/// Decode raw rows, counting the ones that do not form a valid record.
fn decode_rows(partition: &Partition, rows: Vec<serde_json::Value>) -> PartitionScan {
    let mut scan = PartitionScan::default();
    for row in rows {
        let decoded = serde_json::from_value::<StoredDetection>(row)
            .map_err(|e| e.to_string())
            .and_then(|stored| DetectionRecord::try_from(stored).map_err(|e| e.to_string()));
        match decoded {
            Ok(record) => scan.records.push(record),
            Err(reason) => {
                debug!(partition = %partition, %reason, "undecodable detection row");
                scan.skipped += 1;
            }
        }
    }
    scan
}

// ============================================================================
// Daily tables
// ============================================================================

/// One table per day, discovered from the database catalogue.
pub struct DailyTables {
    db: DbConn,
}

impl DailyTables {
    pub fn new(db: DbConn) -> Self {
        Self { db }
    }
}

#[async_trait]
impl DetectionStore for DailyTables {
    async fn list_partitions(&self) -> StatsResult<Vec<Partition>> {
        let info: Option<serde_json::Value> = self.db.query("INFO FOR DB").await?.take(0)?;

        let mut partitions: Vec<Partition> = info
            .as_ref()
            .and_then(|i| i.get("tables"))
            .and_then(|t| t.as_object())
            .into_iter()
            .flat_map(|tables| tables.keys())
            .filter(|name| name.starts_with(PARTITION_PREFIX))
            .filter_map(|name| {
                let partition = Partition::from_identifier(name);
                if partition.is_none() {
                    warn!(table = %name, "ignoring table with malformed partition name");
                }
                partition
            })
            .collect();
        partitions.sort();
        Ok(partitions)
    }

    async fn scan(&self, partition: &Partition) -> StatsResult<PartitionScan> {
        let rows: Vec<serde_json::Value> = self
            .db
            .query(format!("SELECT {} FROM type::table($table)", DETECTION_FIELDS))
            .bind(("table", partition.name.clone()))
            .await?
            .take(0)?;
        Ok(decode_rows(partition, rows))
    }

    async fn append(&self, record: &DetectionRecord) -> StatsResult<()> {
        let partition = Partition::for_date(record.date);
        self.db
            .query("CREATE type::table($table) CONTENT $record RETURN NONE")
            .bind(("table", partition.name))
            .bind(("record", StoredDetection::from(record)))
            .await?
            .check()?;
        Ok(())
    }
}

// ============================================================================
// Flat table
// ============================================================================

/// A single `detections` table; each distinct `date` value is a partition.
pub struct FlatTable {
    db: DbConn,
}

impl FlatTable {
    pub fn new(db: DbConn) -> Self {
        Self { db }
    }
}

#[async_trait]
impl DetectionStore for FlatTable {
    async fn list_partitions(&self) -> StatsResult<Vec<Partition>> {
        let rows: Vec<serde_json::Value> = self
            .db
            .query("SELECT date FROM type::table($table) GROUP BY date")
            .bind(("table", FLAT_TABLE))
            .await?
            .take(0)?;

        let mut partitions: Vec<Partition> = rows
            .iter()
            .filter_map(|row| row.get("date").and_then(|d| d.as_str()))
            .filter_map(|raw| match parse_date(raw) {
                Ok(date) => Some(Partition::for_date(date)),
                Err(e) => {
                    warn!(date = raw, error = %e, "ignoring malformed date value");
                    None
                }
            })
            .collect();
        partitions.sort();
        partitions.dedup();
        Ok(partitions)
    }

    async fn scan(&self, partition: &Partition) -> StatsResult<PartitionScan> {
        let rows: Vec<serde_json::Value> = self
            .db
            .query(format!(
                "SELECT {} FROM type::table($table) WHERE date = $date",
                DETECTION_FIELDS
            ))
            .bind(("table", FLAT_TABLE))
            .bind(("date", format_date(partition.date)))
            .await?
            .take(0)?;
        Ok(decode_rows(partition, rows))
    }

    async fn append(&self, record: &DetectionRecord) -> StatsResult<()> {
        self.db
            .query("CREATE type::table($table) CONTENT $record RETURN NONE")
            .bind(("table", FLAT_TABLE))
            .bind(("record", StoredDetection::from(record)))
            .await?
            .check()?;
        Ok(())
    }
}

// ============================================================================
// Schedules
// ============================================================================

pub struct SurrealSchedules {
    db: DbConn,
}

impl SurrealSchedules {
    pub fn new(db: DbConn) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ScheduleStore for SurrealSchedules {
    async fn insert(&self, schedule: &Schedule) -> StatsResult<()> {
        self.db
            .query("CREATE schedule CONTENT $schedule RETURN NONE")
            .bind(("schedule", schedule.clone()))
            .await?
            .check()?;
        Ok(())
    }

    async fn get(&self, id: &str) -> StatsResult<Schedule> {
        let mut found: Vec<Schedule> = self
            .db
            .query(format!(
                "SELECT {} FROM schedule WHERE schedule_id = $id LIMIT 1",
                SCHEDULE_FIELDS
            ))
            .bind(("id", id.to_string()))
            .await?
            .take(0)?;
        found
            .pop()
            .ok_or_else(|| StatsError::NotFound(format!("Schedule not found: {}", id)))
    }

    async fn list(&self, email: Option<&str>) -> StatsResult<Vec<Schedule>> {
        let schedules: Vec<Schedule> = match email {
            Some(email) => self
                .db
                .query(format!(
                    "SELECT {} FROM schedule WHERE email = $email ORDER BY date_from, schedule_id",
                    SCHEDULE_FIELDS
                ))
                .bind(("email", email.to_string()))
                .await?
                .take(0)?,
            None => self
                .db
                .query(format!(
                    "SELECT {} FROM schedule ORDER BY date_from, schedule_id",
                    SCHEDULE_FIELDS
                ))
                .await?
                .take(0)?,
        };
        Ok(schedules)
    }

    async fn transition(&self, id: &str, from: ScheduleStatus, to: ScheduleStatus) -> StatsResult<bool> {
        let updated: Vec<serde_json::Value> = self
            .db
            .query(
                "UPDATE schedule SET status = $next \
                 WHERE schedule_id = $id AND status = $expected RETURN schedule_id",
            )
            .bind(("next", to))
            .bind(("id", id.to_string()))
            .bind(("expected", from))
            .await?
            .take(0)?;
        Ok(!updated.is_empty())
    }

    async fn pending_due(&self, before: NaiveDate) -> StatsResult<Vec<Schedule>> {
        let due: Vec<Schedule> = self
            .db
            .query(format!(
                "SELECT {} FROM schedule WHERE status = $status AND date_to < $before \
                 ORDER BY date_from, schedule_id",
                SCHEDULE_FIELDS
            ))
            .bind(("status", ScheduleStatus::Pending))
            .bind(("before", format_date(before)))
            .await?
            .take(0)?;
        Ok(due)
    }
}
