use anyhow::Result;
use clap::Parser;
use tracing::info;
use traffic_stats::config::StoreArgs;
use traffic_stats::engine::{Filters, GroupBy};
use traffic_stats::logging;
use traffic_stats::timefilter::{format_date, DateRange};

/// Print the partition inventory and per-day totals
#[derive(Parser, Debug)]
#[command(name = "traffic_stats")]
struct Cli {
    /// First day to include
    #[arg(long)]
    date_from: Option<String>,

    /// Last day to include
    #[arg(long)]
    date_to: Option<String>,

    #[command(flatten)]
    store: StoreArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();
    let dates = DateRange::parse(cli.date_from.as_deref(), cli.date_to.as_deref())?;

    let (_conn, store) = cli.store.open().await?;
    let partitions = store.list_partitions().await?;
    info!("Connected to SurrealDB");

    println!("=== Partitions ({}) ===", partitions.len());
    for partition in &partitions {
        println!("  {}  {}", format_date(partition.date), partition.name);
    }

    let engine = cli.store.engine(store);
    let Some(daily) = engine
        .aggregate(&Filters::between(dates), GroupBy::Date, None)
        .await?
    else {
        println!("No detections in range");
        return Ok(());
    };

    println!();
    println!("=== Daily totals ===");
    println!(
        "{:<12} {:>8} {:>10} {:>8} {:>6} {:>6} {:>6} {:>6} {:>9}",
        "date", "bicycle", "motorcycle", "car", "van", "truck", "bus", "fire", "container"
    );
    for detail in &daily.details {
        let [bicycle, motorcycle, car, van, truck, bus, fire, container] = detail.counts.as_row();
        println!(
            "{:<12} {:>8} {:>10} {:>8} {:>6} {:>6} {:>6} {:>6} {:>9}",
            detail.key.date().map(format_date).unwrap_or_default(),
            bicycle,
            motorcycle,
            car,
            van,
            truck,
            bus,
            fire,
            container
        );
    }
    println!();
    println!("Total vehicles: {} over {} rows", daily.total.vehicles(), daily.matched_rows);
    for warning in &daily.warnings {
        println!("warning: {}", warning);
    }

    Ok(())
}
