//! Synthetic detection ingestion
//!
//! Stands in for the vision pipeline: every run writes one detection per
//! camera with counts drawn from a rush-hour or off-peak profile. Writes go
//! through `DetectionStore::append`, so readers see the same partition layout.

use anyhow::{bail, Result};
use chrono::{Duration as ChronoDuration, NaiveDateTime, NaiveTime, Timelike};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::future::Future;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::StatsResult;
use crate::models::{DetectionRecord, VehicleCounts};
use crate::partition::DetectionStore;

const RUSH_WINDOWS: [((u32, u32), (u32, u32)); 2] = [((6, 30), (8, 30)), ((16, 30), (18, 30))];

/// 06:30–08:30 and 16:30–18:30, both ends inclusive
pub fn is_rush_hour(time: NaiveTime) -> bool {
    let time = time.with_nanosecond(0).unwrap_or(time);
    RUSH_WINDOWS.iter().any(|&((sh, sm), (eh, em))| {
        match (NaiveTime::from_hms_opt(sh, sm, 0), NaiveTime::from_hms_opt(eh, em, 0)) {
            (Some(start), Some(end)) => start <= time && time <= end,
            _ => false,
        }
    })
}

/// Inclusive count ranges per vehicle class, in `VehicleCounts::as_row` order
#[derive(Debug, Clone)]
pub struct CountProfile([RangeInclusive<u64>; 8]);

impl CountProfile {
    pub fn rush_hour() -> Self {
        Self([5..=20, 30..=100, 20..=40, 1..=4, 1..=4, 1..=4, 0..=2, 0..=2])
    }

    pub fn off_peak() -> Self {
        Self([0..=10, 10..=50, 10..=20, 0..=2, 0..=2, 0..=2, 0..=2, 0..=2])
    }

    pub fn contains(&self, counts: &VehicleCounts) -> bool {
        self.0.iter().zip(counts.as_row()).all(|(range, v)| range.contains(&v))
    }

    fn sample(&self, rng: &mut impl Rng) -> VehicleCounts {
        let [bicycle, motorcycle, car, van, truck, bus, fire_truck, container] =
            self.0.clone().map(|range| rng.gen_range(range));
        VehicleCounts {
            bicycle,
            motorcycle,
            car,
            van,
            truck,
            bus,
            fire_truck,
            container,
        }
    }
}

pub struct SyntheticGenerator {
    rng: StdRng,
}

impl SyntheticGenerator {
    /// Seeded generators produce the same counts on every run.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }

    pub fn generate(&mut self, camera_id: &str, at: NaiveDateTime) -> DetectionRecord {
        let at = at.with_nanosecond(0).unwrap_or(at);
        let profile = if is_rush_hour(at.time()) {
            CountProfile::rush_hour()
        } else {
            CountProfile::off_peak()
        };
        DetectionRecord {
            detection_id: Uuid::new_v4().to_string(),
            camera_id: camera_id.to_string(),
            date: at.date(),
            time: at.time(),
            counts: profile.sample(&mut self.rng),
        }
    }
}

pub struct IngestionTask {
    store: Arc<dyn DetectionStore>,
    cameras: Vec<String>,
    generator: SyntheticGenerator,
}

impl IngestionTask {
    pub fn new(store: Arc<dyn DetectionStore>, cameras: Vec<String>, generator: SyntheticGenerator) -> Self {
        Self {
            store,
            cameras,
            generator,
        }
    }

    pub fn cameras(&self) -> &[String] {
        &self.cameras
    }

    /// Write one detection per camera stamped `at`. Returns the number written.
    pub async fn run_once(&mut self, at: NaiveDateTime) -> StatsResult<usize> {
        for camera in &self.cameras {
            let record = self.generator.generate(camera, at);
            self.store.append(&record).await?;
        }
        debug!(%at, cameras = self.cameras.len(), "wrote detections");
        Ok(self.cameras.len())
    }

    /// Replay `run_once` at every `step` from `from` through `to` inclusive.
    pub async fn backfill(
        &mut self,
        from: NaiveDateTime,
        to: NaiveDateTime,
        step: ChronoDuration,
    ) -> Result<usize> {
        if step <= ChronoDuration::zero() {
            bail!("backfill step must be positive");
        }
        if from > to {
            bail!("backfill start {} is after end {}", from, to);
        }

        let mut written = 0;
        let mut at = from;
        while at <= to {
            written += self.run_once(at).await?;
            at += step;
        }
        info!(%from, %to, written, "backfill complete");
        Ok(written)
    }

    /// Run every `period` until `shutdown` resolves. A run always finishes
    /// before the next one starts; ticks missed meanwhile are dropped.
    pub async fn run(&mut self, period: Duration, shutdown: impl Future<Output = ()>) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(cameras = self.cameras.len(), period_secs = period.as_secs(), "ingestion loop started");
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    let now = chrono::Local::now().naive_local();
                    if let Err(e) = self.run_once(now).await {
                        error!(error = %e, "ingestion run failed");
                    }
                }
            }
        }
        info!("ingestion loop stopped");
    }
}
