//! REST API server for traffic statistics
//!
//! With a mail relay configured it also runs the scheduled-report dispatcher:
//! every `--dispatch-interval-secs` it mails the pending schedules whose date
//! range has finished.
//!
//! Usage:
//!   ./target/release/api_server [options]
//!
//! REST endpoints:
//!   GET  /api/v1/health                 - Health check
//!   GET  /api/v1/timestamps             - Distinct detection timestamps
//!   GET  /api/v1/dates                  - Distinct detection dates
//!   GET  /api/v1/results/date           - One day, per timestamp
//!   GET  /api/v1/results/range          - One day within a time window
//!   GET  /api/v1/results/district       - District cameras, one day
//!   GET  /api/v1/results/camera         - One camera, per day
//!   GET  /api/v1/results/camera/day     - One camera, one day
//!   GET  /api/v1/results/daily          - Per day over a date range
//!   GET  /api/v1/results/camera/daily   - Per day and camera
//!   GET  /api/v1/heatmap                - Located cameras, one day
//!   GET  /api/v1/heatmap/hourly         - Located cameras per hour
//!   GET  /api/v1/schedules              - Report schedules (?email=)
//!   POST /api/v1/schedules              - Create a schedule
//!   POST /api/v1/schedules/:id/send     - Send a schedule now
//!   POST /api/v1/schedules/:id/cancel   - Cancel a schedule
//!   POST /api/v1/reports                - Create and send a report

use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use traffic_stats::api::{create_rest_router, AppState, StatsService};
use traffic_stats::config::{CameraArgs, MailArgs, StoreArgs};
use traffic_stats::db::SurrealSchedules;
use traffic_stats::logging;
use traffic_stats::report::ReportService;

#[derive(Parser, Debug)]
#[command(name = "api_server")]
#[command(about = "Serve traffic statistics over REST and dispatch scheduled reports")]
struct Cli {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value = "8080")]
    port: u16,

    /// Per-request timeout, in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "30")]
    request_timeout_secs: u64,

    /// Seconds between scheduled-report dispatch runs (0 disables)
    #[arg(long, env = "DISPATCH_INTERVAL_SECS", default_value = "3600")]
    dispatch_interval_secs: u64,

    #[command(flatten)]
    store: StoreArgs,

    #[command(flatten)]
    cameras: CameraArgs,

    #[command(flatten)]
    mail: MailArgs,
}

fn print_banner(port: u16) {
    println!("============================================================");
    println!("              TRAFFIC STATISTICS API SERVER");
    println!("============================================================");
    println!();
    println!("  Port:     {}", port);
    println!("  REST:     http://localhost:{}/api/v1/", port);
    println!();
    println!("============================================================");
}

fn spawn_dispatcher(service: AppState, period: Duration, mut stop: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        service
            .reports()
            .run_dispatcher(period, async move {
                let _ = stop.wait_for(|stopped| *stopped).await;
            })
            .await;
    })
}

async fn shutdown_signal(stop: watch::Sender<bool>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutting down");
    let _ = stop.send(true);
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();

    let (conn, store) = cli.store.open().await?;
    let engine = Arc::new(cli.store.engine(store));
    let reports = ReportService::new(
        engine.clone(),
        Arc::new(SurrealSchedules::new(conn)),
        cli.mail.mailer()?,
    );
    let service: AppState = Arc::new(StatsService::new(engine, cli.cameras.directory()?, reports));

    let (stop_tx, stop_rx) = watch::channel(false);
    let dispatcher = if cli.dispatch_interval_secs == 0 {
        None
    } else if !cli.mail.relay_configured() {
        tracing::warn!("report dispatcher disabled until a mail relay is configured");
        None
    } else {
        Some(spawn_dispatcher(
            service.clone(),
            Duration::from_secs(cli.dispatch_interval_secs),
            stop_rx,
        ))
    };

    print_banner(cli.port);

    let app = create_rest_router(service, Duration::from_secs(cli.request_timeout_secs));
    let addr: SocketAddr = format!("0.0.0.0:{}", cli.port).parse()?;
    tracing::info!("Starting REST server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(stop_tx))
        .await?;

    if let Some(dispatcher) = dispatcher {
        dispatcher.await?;
    }

    Ok(())
}
