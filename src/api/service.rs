//! Read operations and report workflow behind the REST API
//!
//! Each read operation is one engine call; the methods here only decide the
//! filters, the grouping, and whether camera locations are joined.

use chrono::{NaiveDate, NaiveTime};
use std::sync::Arc;
use tracing::debug;

use crate::cameras::CameraDirectory;
use crate::engine::{Aggregation, Engine, Filters, GroupBy};
use crate::error::StatsResult;
use crate::models::Schedule;
use crate::report::{ReportService, SendOutcome};
use crate::timefilter::{DateRange, TimeRange};

pub struct StatsService {
    engine: Arc<Engine>,
    cameras: Arc<dyn CameraDirectory>,
    reports: ReportService,
}

impl StatsService {
    pub fn new(engine: Arc<Engine>, cameras: Arc<dyn CameraDirectory>, reports: ReportService) -> Self {
        Self {
            engine,
            cameras,
            reports,
        }
    }

    pub fn reports(&self) -> &ReportService {
        &self.reports
    }

    fn today() -> NaiveDate {
        chrono::Local::now().date_naive()
    }

    // ========================================================================
    // Inventory
    // ========================================================================

    pub async fn timestamps(&self) -> StatsResult<Vec<(NaiveDate, NaiveTime)>> {
        self.engine.timestamps().await
    }

    pub async fn dates(&self) -> StatsResult<Vec<NaiveDate>> {
        self.engine.dates().await
    }

    // ========================================================================
    // Results
    // ========================================================================

    /// One day, detailed per timestamp
    pub async fn results_by_date(&self, date: NaiveDate) -> StatsResult<Option<Aggregation>> {
        self.engine
            .aggregate(&Filters::on_date(date), GroupBy::DateTime, None)
            .await
    }

    /// One day within a time window, detailed per timestamp
    pub async fn results_in_range(&self, date: NaiveDate, times: TimeRange) -> StatsResult<Option<Aggregation>> {
        self.engine
            .aggregate(&Filters::on_date(date).within(times), GroupBy::DateTime, None)
            .await
    }

    /// Cameras of one district, one day, within a time window.
    ///
    /// An unknown district is `NotFound`; a known district without matching
    /// rows is an empty result.
    pub async fn results_by_district(
        &self,
        district: &str,
        date: NaiveDate,
        times: TimeRange,
    ) -> StatsResult<Aggregation> {
        let cameras = self.cameras.cameras_in_district(district).await?;
        debug!(district, cameras = cameras.len(), "district resolved");
        let filters = Filters::on_date(date).within(times).cameras(cameras);
        Ok(self
            .engine
            .aggregate(&filters, GroupBy::DateTime, None)
            .await?
            .unwrap_or_else(Aggregation::empty))
    }

    /// Every day one camera reported, detailed per date
    pub async fn results_by_camera(&self, camera: &str) -> StatsResult<Option<Aggregation>> {
        self.engine
            .aggregate(&Filters::default().camera(camera), GroupBy::Date, None)
            .await
    }

    /// One camera on one day, detailed per timestamp
    pub async fn camera_day(
        &self,
        camera: &str,
        date: NaiveDate,
        times: TimeRange,
    ) -> StatsResult<Option<Aggregation>> {
        let filters = Filters::on_date(date).within(times).camera(camera);
        self.engine.aggregate(&filters, GroupBy::DateTime, None).await
    }

    pub async fn daily(&self, dates: DateRange) -> StatsResult<Option<Aggregation>> {
        self.engine
            .aggregate(&Filters::between(dates), GroupBy::Date, None)
            .await
    }

    pub async fn camera_daily(&self, dates: DateRange) -> StatsResult<Option<Aggregation>> {
        self.engine
            .aggregate(&Filters::between(dates), GroupBy::DateCamera, None)
            .await
    }

    // ========================================================================
    // Heatmaps
    // ========================================================================

    /// Per camera totals for one day, located cameras only
    pub async fn heatmap(&self, date: NaiveDate, times: TimeRange) -> StatsResult<Option<Aggregation>> {
        let locations = self.cameras.locations().await?;
        self.engine
            .aggregate(&Filters::on_date(date).within(times), GroupBy::Camera, Some(&locations))
            .await
    }

    /// Per hour, per camera totals for one day, located cameras only
    pub async fn heatmap_hourly(&self, date: NaiveDate, times: TimeRange) -> StatsResult<Option<Aggregation>> {
        let locations = self.cameras.locations().await?;
        self.engine
            .aggregate(
                &Filters::on_date(date).within(times),
                GroupBy::HourCamera,
                Some(&locations),
            )
            .await
    }

    // ========================================================================
    // Reports
    // ========================================================================

    pub async fn schedules(&self, email: Option<&str>) -> StatsResult<Vec<Schedule>> {
        self.reports.schedules(email).await
    }

    pub async fn create_schedule(&self, email: &str, from: NaiveDate, to: NaiveDate) -> StatsResult<Schedule> {
        self.reports.create_schedule(email, from, to).await
    }

    pub async fn send_schedule(&self, id: &str) -> StatsResult<SendOutcome> {
        self.reports.send(id, Self::today()).await
    }

    pub async fn cancel_schedule(&self, id: &str) -> StatsResult<Schedule> {
        self.reports.cancel(id).await
    }

    pub async fn request_report(
        &self,
        email: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> StatsResult<(Schedule, SendOutcome)> {
        self.reports.request_report(email, from, to, Self::today()).await
    }
}
