//! Scheduled email reports
//!
//! A schedule asks for the daily totals of a date range to be mailed to an
//! address. Lifecycle (see `ScheduleStatus::next`):
//!
//! - `pending --delivered--> sent`
//! - `pending --cancel-->    cancelled`
//!
//! Sending a schedule whose range has not finished yet mails a notification
//! and leaves it pending; `dispatch_due` picks it up once the range is over.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::fmt::Write as _;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::engine::{Detail, Engine, Filters, GroupBy};
use crate::error::{StatsError, StatsResult};
use crate::mailer::{Attachment, EmailMessage, Mailer};
use crate::models::{Schedule, ScheduleEvent, ScheduleStatus};
use crate::timefilter::{format_date, DateRange};

/// Persistence for schedules
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn insert(&self, schedule: &Schedule) -> StatsResult<()>;

    /// `NotFound` when no schedule has this id
    async fn get(&self, id: &str) -> StatsResult<Schedule>;

    /// All schedules, or only those for `email`, ordered by start date
    async fn list(&self, email: Option<&str>) -> StatsResult<Vec<Schedule>>;

    /// Move `id` from `from` to `to`. Returns false when the schedule was not
    /// in `from` (nothing is written in that case).
    async fn transition(&self, id: &str, from: ScheduleStatus, to: ScheduleStatus) -> StatsResult<bool>;

    /// Pending schedules whose range ended before `before`
    async fn pending_due(&self, before: NaiveDate) -> StatsResult<Vec<Schedule>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Report mailed, schedule is now sent
    Delivered { days: usize },
    /// Range not finished; notification mailed, schedule still pending
    Deferred,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub sent: usize,
    pub deferred: usize,
    /// Range has no detections yet; retried on the next run
    pub no_data: usize,
    pub failed: usize,
}

pub struct ReportService {
    engine: Arc<Engine>,
    schedules: Arc<dyn ScheduleStore>,
    mailer: Arc<dyn Mailer>,
}

impl ReportService {
    pub fn new(engine: Arc<Engine>, schedules: Arc<dyn ScheduleStore>, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            engine,
            schedules,
            mailer,
        }
    }

    pub async fn create_schedule(
        &self,
        email: &str,
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> StatsResult<Schedule> {
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(StatsError::validation("email", "a recipient address is required"));
        }
        DateRange::new(Some(date_from), Some(date_to))?;

        let schedule = Schedule {
            schedule_id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            date_from,
            date_to,
            status: ScheduleStatus::Pending,
        };
        self.schedules.insert(&schedule).await?;
        info!(schedule_id = %schedule.schedule_id, email, %date_from, %date_to, "schedule created");
        Ok(schedule)
    }

    pub async fn schedules(&self, email: Option<&str>) -> StatsResult<Vec<Schedule>> {
        self.schedules.list(email).await
    }

    pub async fn send(&self, id: &str, today: NaiveDate) -> StatsResult<SendOutcome> {
        let schedule = self.schedules.get(id).await?;
        if schedule.status.next(ScheduleEvent::Delivered).is_none() {
            return Err(rejected(&schedule, ScheduleEvent::Delivered));
        }
        self.deliver(&schedule, today).await
    }

    pub async fn cancel(&self, id: &str) -> StatsResult<Schedule> {
        let schedule = self.schedules.get(id).await?;
        let next = schedule
            .status
            .next(ScheduleEvent::Cancel)
            .ok_or_else(|| rejected(&schedule, ScheduleEvent::Cancel))?;

        if !self.schedules.transition(id, schedule.status, next).await? {
            let current = self.schedules.get(id).await?;
            return Err(rejected(&current, ScheduleEvent::Cancel));
        }
        info!(schedule_id = id, "schedule cancelled");
        Ok(Schedule { status: next, ..schedule })
    }

    /// Create a schedule and send it straight away.
    pub async fn request_report(
        &self,
        email: &str,
        date_from: NaiveDate,
        date_to: NaiveDate,
        today: NaiveDate,
    ) -> StatsResult<(Schedule, SendOutcome)> {
        let schedule = self.create_schedule(email, date_from, date_to).await?;
        let outcome = self.deliver(&schedule, today).await?;
        let schedule = match outcome {
            SendOutcome::Delivered { .. } => Schedule {
                status: ScheduleStatus::Sent,
                ..schedule
            },
            SendOutcome::Deferred => schedule,
        };
        Ok((schedule, outcome))
    }

    /// Send every pending schedule whose range ended before `today`. Ranges
    /// without data and failed deliveries stay pending for the next run.
    pub async fn dispatch_due(&self, today: NaiveDate) -> StatsResult<DispatchSummary> {
        let due = self.schedules.pending_due(today).await?;
        let mut summary = DispatchSummary::default();

        for schedule in &due {
            match self.deliver(schedule, today).await {
                Ok(SendOutcome::Delivered { .. }) => summary.sent += 1,
                Ok(SendOutcome::Deferred) => summary.deferred += 1,
                Err(StatsError::NotFound(_)) => {
                    debug!(schedule_id = %schedule.schedule_id, "no detections in range yet");
                    summary.no_data += 1;
                }
                Err(e) => {
                    warn!(schedule_id = %schedule.schedule_id, error = %e, "scheduled report not sent");
                    summary.failed += 1;
                }
            }
        }

        if !due.is_empty() {
            info!(
                due = due.len(),
                sent = summary.sent,
                no_data = summary.no_data,
                failed = summary.failed,
                "dispatched scheduled reports"
            );
        }
        Ok(summary)
    }

    /// Run `dispatch_due` every `period` until `shutdown` resolves. A run in
    /// progress finishes before the loop exits.
    pub async fn run_dispatcher(&self, period: Duration, shutdown: impl Future<Output = ()>) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(period_secs = period.as_secs(), "report dispatcher started");
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    let today = chrono::Local::now().date_naive();
                    if let Err(e) = self.dispatch_due(today).await {
                        error!(error = %e, "report dispatch failed");
                    }
                }
            }
        }
        info!("report dispatcher stopped");
    }

    async fn deliver(&self, schedule: &Schedule, today: NaiveDate) -> StatsResult<SendOutcome> {
        if schedule.date_to >= today {
            self.mailer.deliver(&deferred_notice(schedule)).await?;
            info!(schedule_id = %schedule.schedule_id, date_to = %schedule.date_to, "range not finished, notification sent");
            return Ok(SendOutcome::Deferred);
        }

        let filters = Filters::between(DateRange::new(Some(schedule.date_from), Some(schedule.date_to))?);
        let aggregation = self
            .engine
            .aggregate(&filters, GroupBy::Date, None)
            .await?
            .ok_or_else(|| StatsError::NotFound("No statistics found for the given date range".into()))?;

        let message = report_message(schedule, &aggregation.details)?;
        self.mailer.deliver(&message).await?;

        if !self
            .schedules
            .transition(&schedule.schedule_id, ScheduleStatus::Pending, ScheduleStatus::Sent)
            .await?
        {
            let current = self.schedules.get(&schedule.schedule_id).await?;
            warn!(schedule_id = %schedule.schedule_id, status = %current.status, "report mailed but schedule changed meanwhile");
            return Err(rejected(&current, ScheduleEvent::Delivered));
        }

        let days = aggregation.details.len();
        info!(schedule_id = %schedule.schedule_id, days, "report sent");
        Ok(SendOutcome::Delivered { days })
    }
}

fn rejected(schedule: &Schedule, event: ScheduleEvent) -> StatsError {
    StatsError::InvalidTransition {
        id: schedule.schedule_id.clone(),
        status: schedule.status,
        action: event.verb(),
    }
}

// ============================================================================
// Rendering
// ============================================================================

const COLUMNS: [&str; 8] = [
    "Bicycles",
    "Motorcycles",
    "Cars",
    "Vans",
    "Trucks",
    "Buses",
    "Fire Trucks",
    "Containers",
];

const CSV_HEADER: [&str; 9] = [
    "date",
    "bicycle",
    "motorcycle",
    "car",
    "van",
    "truck",
    "bus",
    "fire_truck",
    "container",
];

fn deferred_notice(schedule: &Schedule) -> EmailMessage {
    EmailMessage {
        to: schedule.email.clone(),
        subject: "Notification: Scheduled Statistics Report".into(),
        text: format!(
            "This is a notification that a statistics report is scheduled for the future date: {}.",
            format_date(schedule.date_to)
        ),
        html: None,
        attachments: vec![],
    }
}

fn report_message(schedule: &Schedule, rows: &[Detail]) -> StatsResult<EmailMessage> {
    let from = format_date(schedule.date_from);
    let to = format_date(schedule.date_to);
    Ok(EmailMessage {
        to: schedule.email.clone(),
        subject: format!("Detection Statistics from {} to {}", from, to),
        text: format!("Traffic detection statistics from {} to {} are attached.", from, to),
        html: Some(render_html(rows, schedule.date_from, schedule.date_to)),
        attachments: vec![Attachment {
            filename: format!("detections_{}_{}.csv", from, to),
            content_type: "text/csv".into(),
            content: render_csv(rows)?,
        }],
    })
}

fn row_date(detail: &Detail) -> String {
    detail.key.date().map(format_date).unwrap_or_default()
}

/// HTML table with one row per day
pub fn render_html(rows: &[Detail], date_from: NaiveDate, date_to: NaiveDate) -> String {
    let mut body = String::new();
    for row in rows {
        let _ = write!(body, "<tr><td>{}</td>", row_date(row));
        for value in row.counts.as_row() {
            let _ = write!(body, "<td>{}</td>", value);
        }
        body.push_str("</tr>\n");
    }

    let header: String = COLUMNS.iter().map(|c| format!("<th>{}</th>", c)).collect();

    format!(
        r#"<html>
<head>
<style>
body {{ font-family: Arial, sans-serif; padding: 20px; color: #333; }}
table {{ width: 100%; border-collapse: collapse; margin-top: 20px; }}
th, td {{ border: 1px solid #ddd; padding: 8px; text-align: center; }}
th {{ background-color: #f2f2f2; }}
</style>
</head>
<body>
<h2>Traffic Detection Statistics</h2>
<p><strong>Date range:</strong> {} to {}</p>
<table>
<thead><tr><th>Date</th>{}</tr></thead>
<tbody>
{}</tbody>
</table>
</body>
</html>
"#,
        format_date(date_from),
        format_date(date_to),
        header,
        body
    )
}

/// Same rows as `render_html`, as CSV
pub fn render_csv(rows: &[Detail]) -> StatsResult<String> {
    let attachment_err = |e: &dyn std::fmt::Display| StatsError::Delivery(format!("rendering attachment: {}", e));

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CSV_HEADER).map_err(|e| attachment_err(&e))?;
    for row in rows {
        let mut record = vec![row_date(row)];
        record.extend(row.counts.as_row().iter().map(|v| v.to_string()));
        writer.write_record(&record).map_err(|e| attachment_err(&e))?;
    }
    let bytes = writer.into_inner().map_err(|e| attachment_err(&e))?;
    String::from_utf8(bytes).map_err(|e| attachment_err(&e))
}
