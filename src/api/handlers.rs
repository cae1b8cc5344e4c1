//! REST API handlers
//!
//! Query parameters and JSON bodies use the camelCase names existing clients
//! send (`timeFrom`, `dateTo`, `numberOfCar`, ...). Snake case time bounds are
//! accepted as aliases.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::engine::{Aggregation, Detail};
use crate::error::{StatsError, StatsResult};
use crate::models::{GeoPoint, Schedule, ScheduleStatus, VehicleCounts};
use crate::report::SendOutcome;
use crate::timefilter::{format_date, format_time, parse_date, DateRange, TimeRange};

// ============================================================================
// Response Types (JSON-serializable versions)
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CountsBody {
    pub number_of_bicycle: u64,
    pub number_of_motorcycle: u64,
    pub number_of_car: u64,
    pub number_of_van: u64,
    pub number_of_truck: u64,
    pub number_of_bus: u64,
    pub number_of_fire_truck: u64,
    pub number_of_container: u64,
}

impl From<VehicleCounts> for CountsBody {
    fn from(c: VehicleCounts) -> Self {
        Self {
            number_of_bicycle: c.bicycle,
            number_of_motorcycle: c.motorcycle,
            number_of_car: c.car,
            number_of_van: c.van,
            number_of_truck: c.truck,
            number_of_bus: c.bus,
            number_of_fire_truck: c.fire_truck,
            number_of_container: c.container,
        }
    }
}

fn key_date(detail: &Detail) -> String {
    detail.key.date().map(format_date).unwrap_or_default()
}

fn key_time(detail: &Detail) -> String {
    detail.key.time().map(format_time).unwrap_or_default()
}

#[derive(Serialize)]
pub struct TimestampResponse {
    pub date: String,
    pub time: String,
}

#[derive(Serialize)]
pub struct DateResponse {
    pub date: String,
}

/// Detail keyed by date and time
#[derive(Serialize)]
pub struct TimeDetail {
    pub date: String,
    pub time: String,
    #[serde(flatten)]
    pub counts: CountsBody,
}

impl From<&Detail> for TimeDetail {
    fn from(d: &Detail) -> Self {
        Self {
            date: key_date(d),
            time: key_time(d),
            counts: d.counts.into(),
        }
    }
}

/// Detail keyed by date
#[derive(Serialize)]
pub struct DayDetail {
    pub date: String,
    #[serde(flatten)]
    pub counts: CountsBody,
}

impl From<&Detail> for DayDetail {
    fn from(d: &Detail) -> Self {
        Self {
            date: key_date(d),
            counts: d.counts.into(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraDayDetail {
    pub date: String,
    pub camera_id: String,
    #[serde(flatten)]
    pub counts: CountsBody,
}

#[derive(Serialize)]
pub struct HeatmapDetail {
    pub camera: String,
    pub loc: GeoPoint,
    #[serde(flatten)]
    pub counts: CountsBody,
}

impl HeatmapDetail {
    fn from_detail(d: &Detail) -> Option<Self> {
        Some(Self {
            camera: d.key.camera()?.to_string(),
            loc: d.location.clone()?,
            counts: d.counts.into(),
        })
    }
}

#[derive(Serialize)]
pub struct HeatInTime {
    pub time: String,
    pub data: Vec<HeatmapDetail>,
}

#[derive(Serialize)]
pub struct ResultsByDateResponse {
    pub date: String,
    #[serde(flatten)]
    pub totals: CountsBody,
    pub details: Vec<TimeDetail>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowedResponse<D: Serialize> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub district: Option<String>,
    pub date: String,
    pub time_from: String,
    pub time_to: String,
    #[serde(flatten)]
    pub totals: CountsBody,
    pub details: Vec<D>,
}

#[derive(Serialize)]
pub struct CameraResponse {
    pub camera: String,
    #[serde(flatten)]
    pub totals: CountsBody,
    pub details: Vec<DayDetail>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraDayResponse {
    pub date: String,
    pub camera_id: String,
    #[serde(flatten)]
    pub totals: CountsBody,
    pub details: Vec<TimeDetail>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleResponse {
    pub schedule_id: String,
    pub email: String,
    pub date_from: String,
    pub date_to: String,
    pub status: ScheduleStatus,
}

impl From<Schedule> for ScheduleResponse {
    fn from(s: Schedule) -> Self {
        Self {
            schedule_id: s.schedule_id,
            email: s.email,
            date_from: format_date(s.date_from),
            date_to: format_date(s.date_to),
            status: s.status,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResponse {
    pub schedule_id: String,
    pub status: ScheduleStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_reported: Option<usize>,
}

impl SendResponse {
    fn new(schedule_id: String, outcome: SendOutcome) -> (StatusCode, Json<Self>) {
        match outcome {
            SendOutcome::Delivered { days } => (
                StatusCode::OK,
                Json(Self {
                    schedule_id,
                    status: ScheduleStatus::Sent,
                    message: "Report sent".into(),
                    days_reported: Some(days),
                }),
            ),
            SendOutcome::Deferred => (
                StatusCode::ACCEPTED,
                Json(Self {
                    schedule_id,
                    status: ScheduleStatus::Pending,
                    message: "Notification email sent for future date".into(),
                    days_reported: None,
                }),
            ),
        }
    }
}

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsQuery {
    pub date: Option<String>,
    #[serde(alias = "time_from")]
    pub time_from: Option<String>,
    #[serde(alias = "time_to")]
    pub time_to: Option<String>,
    pub district: Option<String>,
    pub camera: Option<String>,
}

impl ResultsQuery {
    fn date(&self) -> StatsResult<NaiveDate> {
        parse_date(required("date", &self.date)?)
    }

    /// Optional window; a missing bound is open
    fn times(&self) -> StatsResult<TimeRange> {
        TimeRange::parse(self.time_from.as_deref(), self.time_to.as_deref())
    }

    /// Window where both bounds must be given
    fn bounded_times(&self) -> StatsResult<TimeRange> {
        let from = required("timeFrom", &self.time_from)?;
        let to = required("timeTo", &self.time_to)?;
        TimeRange::parse(Some(from), Some(to))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRangeQuery {
    #[serde(alias = "date_from")]
    pub date_from: Option<String>,
    #[serde(alias = "date_to")]
    pub date_to: Option<String>,
}

impl DateRangeQuery {
    fn range(&self) -> StatsResult<DateRange> {
        DateRange::parse(self.date_from.as_deref(), self.date_to.as_deref())
    }
}

#[derive(Debug, Deserialize)]
pub struct ScheduleQuery {
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRequest {
    pub email: String,
    pub date_from: String,
    pub date_to: String,
}

impl ScheduleRequest {
    fn dates(&self) -> StatsResult<(NaiveDate, NaiveDate)> {
        Ok((parse_date(&self.date_from)?, parse_date(&self.date_to)?))
    }
}

fn required<'a>(field: &'static str, value: &'a Option<String>) -> StatsResult<&'a str> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| StatsError::validation(field, "parameter is required"))
}

fn not_found(what: &str) -> StatsError {
    StatsError::NotFound(format!("{} not found", what))
}

fn windowed<D: Serialize>(
    district: Option<String>,
    date: NaiveDate,
    times: &TimeRange,
    aggregation: &Aggregation,
    details: Vec<D>,
) -> WindowedResponse<D> {
    let (time_from, time_to) = times.display_bounds();
    WindowedResponse {
        district,
        date: format_date(date),
        time_from,
        time_to,
        totals: aggregation.total.into(),
        details,
    }
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "traffic-stats-api",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

pub async fn get_timestamps(State(service): State<AppState>) -> StatsResult<Json<Vec<TimestampResponse>>> {
    let stamps = service.timestamps().await?;
    if stamps.is_empty() {
        return Err(not_found("Timestamp"));
    }
    Ok(Json(
        stamps
            .into_iter()
            .map(|(date, time): (NaiveDate, NaiveTime)| TimestampResponse {
                date: format_date(date),
                time: format_time(time),
            })
            .collect(),
    ))
}

pub async fn get_dates(State(service): State<AppState>) -> StatsResult<Json<Vec<DateResponse>>> {
    let dates = service.dates().await?;
    if dates.is_empty() {
        return Err(not_found("Date"));
    }
    Ok(Json(
        dates
            .into_iter()
            .map(|date| DateResponse { date: format_date(date) })
            .collect(),
    ))
}

pub async fn get_results_by_date(
    State(service): State<AppState>,
    Query(params): Query<ResultsQuery>,
) -> StatsResult<Json<ResultsByDateResponse>> {
    let date = params.date()?;
    let aggregation = service
        .results_by_date(date)
        .await?
        .ok_or_else(|| not_found("Detection results for the given date"))?;

    Ok(Json(ResultsByDateResponse {
        date: format_date(date),
        totals: aggregation.total.into(),
        details: aggregation.details.iter().map(TimeDetail::from).collect(),
    }))
}

pub async fn get_results_in_range(
    State(service): State<AppState>,
    Query(params): Query<ResultsQuery>,
) -> StatsResult<Json<WindowedResponse<TimeDetail>>> {
    let date = params.date()?;
    let times = params.bounded_times()?;
    let aggregation = service
        .results_in_range(date, times)
        .await?
        .ok_or_else(|| not_found("Custom detection results"))?;

    let details = aggregation.details.iter().map(TimeDetail::from).collect();
    Ok(Json(windowed(None, date, &times, &aggregation, details)))
}

pub async fn get_results_by_district(
    State(service): State<AppState>,
    Query(params): Query<ResultsQuery>,
) -> StatsResult<Json<WindowedResponse<TimeDetail>>> {
    let district = required("district", &params.district)?.to_string();
    let date = params.date()?;
    let times = params.bounded_times()?;
    let aggregation = service.results_by_district(&district, date, times).await?;

    let details = aggregation.details.iter().map(TimeDetail::from).collect();
    Ok(Json(windowed(Some(district), date, &times, &aggregation, details)))
}

pub async fn get_results_by_camera(
    State(service): State<AppState>,
    Query(params): Query<ResultsQuery>,
) -> StatsResult<Json<CameraResponse>> {
    let camera = required("camera", &params.camera)?;
    let aggregation = service
        .results_by_camera(camera)
        .await?
        .ok_or_else(|| not_found("Detection results for the given camera"))?;

    Ok(Json(CameraResponse {
        camera: camera.to_string(),
        totals: aggregation.total.into(),
        details: aggregation.details.iter().map(DayDetail::from).collect(),
    }))
}

pub async fn get_camera_day(
    State(service): State<AppState>,
    Query(params): Query<ResultsQuery>,
) -> StatsResult<Json<CameraDayResponse>> {
    let camera = required("camera", &params.camera)?;
    let date = params.date()?;
    let times = params.times()?;
    let aggregation = service
        .camera_day(camera, date, times)
        .await?
        .ok_or_else(|| not_found("Detection results for the given camera and date"))?;

    Ok(Json(CameraDayResponse {
        date: format_date(date),
        camera_id: camera.to_string(),
        totals: aggregation.total.into(),
        details: aggregation.details.iter().map(TimeDetail::from).collect(),
    }))
}

pub async fn get_daily(
    State(service): State<AppState>,
    Query(params): Query<DateRangeQuery>,
) -> StatsResult<Json<Vec<DayDetail>>> {
    let aggregation = service
        .daily(params.range()?)
        .await?
        .ok_or_else(|| not_found("Detection results for the given date range"))?;
    Ok(Json(aggregation.details.iter().map(DayDetail::from).collect()))
}

pub async fn get_camera_daily(
    State(service): State<AppState>,
    Query(params): Query<DateRangeQuery>,
) -> StatsResult<Json<Vec<CameraDayDetail>>> {
    let aggregation = service
        .camera_daily(params.range()?)
        .await?
        .ok_or_else(|| not_found("Detection results for the given date range"))?;

    Ok(Json(
        aggregation
            .details
            .iter()
            .map(|d| CameraDayDetail {
                date: key_date(d),
                camera_id: d.key.camera().unwrap_or_default().to_string(),
                counts: d.counts.into(),
            })
            .collect(),
    ))
}

pub async fn get_heatmap(
    State(service): State<AppState>,
    Query(params): Query<ResultsQuery>,
) -> StatsResult<Json<WindowedResponse<HeatmapDetail>>> {
    let date = params.date()?;
    let times = params.times()?;
    let aggregation = service
        .heatmap(date, times)
        .await?
        .ok_or_else(|| not_found("Heatmap data for the given date and time range"))?;

    let details = aggregation
        .details
        .iter()
        .filter_map(HeatmapDetail::from_detail)
        .collect();
    Ok(Json(windowed(None, date, &times, &aggregation, details)))
}

pub async fn get_heatmap_hourly(
    State(service): State<AppState>,
    Query(params): Query<ResultsQuery>,
) -> StatsResult<Json<WindowedResponse<HeatInTime>>> {
    let date = params.date()?;
    let times = params.times()?;
    let aggregation = service
        .heatmap_hourly(date, times)
        .await?
        .ok_or_else(|| not_found("Heatmap data for the given date and time range"))?;

    let details = aggregation
        .by_hour()
        .into_iter()
        .map(|group| HeatInTime {
            time: format_time(group.hour),
            data: group
                .details
                .iter()
                .filter_map(HeatmapDetail::from_detail)
                .collect(),
        })
        .collect();
    Ok(Json(windowed(None, date, &times, &aggregation, details)))
}

pub async fn get_schedules(
    State(service): State<AppState>,
    Query(params): Query<ScheduleQuery>,
) -> StatsResult<Json<Vec<ScheduleResponse>>> {
    let schedules = service.schedules(params.email.as_deref()).await?;
    Ok(Json(schedules.into_iter().map(ScheduleResponse::from).collect()))
}

pub async fn create_schedule(
    State(service): State<AppState>,
    body: Result<Json<ScheduleRequest>, JsonRejection>,
) -> StatsResult<(StatusCode, Json<ScheduleResponse>)> {
    let Json(body) = body?;
    let (from, to) = body.dates()?;
    let schedule = service.create_schedule(&body.email, from, to).await?;
    Ok((StatusCode::CREATED, Json(schedule.into())))
}

pub async fn send_schedule(
    State(service): State<AppState>,
    Path(id): Path<String>,
) -> StatsResult<(StatusCode, Json<SendResponse>)> {
    let outcome = service.send_schedule(&id).await?;
    Ok(SendResponse::new(id, outcome))
}

pub async fn cancel_schedule(
    State(service): State<AppState>,
    Path(id): Path<String>,
) -> StatsResult<Json<ScheduleResponse>> {
    let schedule = service.cancel_schedule(&id).await?;
    Ok(Json(schedule.into()))
}

pub async fn request_report(
    State(service): State<AppState>,
    body: Result<Json<ScheduleRequest>, JsonRejection>,
) -> StatsResult<(StatusCode, Json<SendResponse>)> {
    let Json(body) = body?;
    let (from, to) = body.dates()?;
    let (schedule, outcome) = service.request_report(&body.email, from, to).await?;
    Ok(SendResponse::new(schedule.schedule_id, outcome))
}
