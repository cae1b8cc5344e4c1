//! Write synthetic detections into the store
//!
//! Without `--backfill-days` the task runs forever, one detection per camera
//! every `--interval-secs`. With it, the past N days are filled in at
//! `--step-minutes` spacing and the program exits.
//!
//! Usage:
//!   cargo run --release --bin ingest_synthetic -- [OPTIONS]

use anyhow::{bail, Result};
use chrono::{Duration as ChronoDuration, Local};
use clap::Parser;
use std::time::Duration;
use tracing::info;
use traffic_stats::config::{CameraArgs, StoreArgs};
use traffic_stats::ingest::{IngestionTask, SyntheticGenerator};
use traffic_stats::logging;

/// Generate synthetic vehicle detections
#[derive(Parser, Debug)]
#[command(name = "ingest_synthetic")]
#[command(about = "Generate synthetic vehicle detections for every camera")]
struct Args {
    /// Camera ids to generate for (defaults to every camera in the registry)
    #[arg(long, value_delimiter = ',')]
    camera_ids: Vec<String>,

    /// Fill the last N days up to today's midnight, then exit
    #[arg(long)]
    backfill_days: Option<i64>,

    /// Spacing of backfilled detections, in minutes
    #[arg(long, default_value = "60")]
    step_minutes: i64,

    /// Seconds between runs when looping
    #[arg(long, default_value = "300")]
    interval_secs: u64,

    /// RNG seed for repeatable data
    #[arg(long)]
    seed: Option<u64>,

    #[command(flatten)]
    store: StoreArgs,

    #[command(flatten)]
    cameras: CameraArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let args = Args::parse();

    let cameras = if args.camera_ids.is_empty() {
        let directory = args.cameras.directory()?;
        directory
            .cameras()
            .await?
            .into_iter()
            .map(|c| c.camera_id)
            .collect()
    } else {
        args.camera_ids.clone()
    };
    if cameras.is_empty() {
        bail!("no cameras to generate detections for");
    }
    info!(cameras = cameras.len(), "cameras loaded");

    let (_conn, store) = args.store.open().await?;
    let mut task = IngestionTask::new(store, cameras, SyntheticGenerator::new(args.seed));

    match args.backfill_days {
        Some(days) => {
            let end = Local::now().date_naive().and_time(chrono::NaiveTime::MIN);
            let start = end - ChronoDuration::days(days);
            let written = task
                .backfill(start, end, ChronoDuration::minutes(args.step_minutes))
                .await?;
            println!("Wrote {} detections from {} to {}", written, start, end);
        }
        None => {
            task.run(Duration::from_secs(args.interval_secs), async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await;
        }
    }

    Ok(())
}
