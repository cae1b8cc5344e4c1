//! REST API for traffic statistics
//!
//! All routes live under `/api/v1` and share one `StatsService`.

pub mod handlers;
pub mod service;

pub use service::StatsService;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub type AppState = Arc<StatsService>;

pub fn create_rest_router(service: AppState, request_timeout: Duration) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/api/v1/health", get(handlers::health))
        // Inventory
        .route("/api/v1/timestamps", get(handlers::get_timestamps))
        .route("/api/v1/dates", get(handlers::get_dates))
        // Results
        .route("/api/v1/results/date", get(handlers::get_results_by_date))
        .route("/api/v1/results/range", get(handlers::get_results_in_range))
        .route("/api/v1/results/district", get(handlers::get_results_by_district))
        .route("/api/v1/results/camera", get(handlers::get_results_by_camera))
        .route("/api/v1/results/camera/day", get(handlers::get_camera_day))
        .route("/api/v1/results/daily", get(handlers::get_daily))
        .route("/api/v1/results/camera/daily", get(handlers::get_camera_daily))
        // Heatmaps
        .route("/api/v1/heatmap", get(handlers::get_heatmap))
        .route("/api/v1/heatmap/hourly", get(handlers::get_heatmap_hourly))
        // Reports
        .route(
            "/api/v1/schedules",
            get(handlers::get_schedules).post(handlers::create_schedule),
        )
        .route("/api/v1/schedules/:id/send", post(handlers::send_schedule))
        .route("/api/v1/schedules/:id/cancel", post(handlers::cancel_schedule))
        .route("/api/v1/reports", post(handlers::request_report))
        // State and middleware
        .with_state(service)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
