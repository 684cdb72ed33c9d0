//! CLI entry point for the GTFS schedule packer.
//!
//! Provides subcommands for printing the compressed schedules, generating
//! the SQL statement file, writing the binary snapshot, and overlaying
//! realtime delays on stored arrivals.

use anyhow::Result;
use chrono::{Local, Timelike};
use clap::{Parser, Subcommand};
use gtfs_schedule_packer::time::time_to_string;
use gtfs_schedule_packer::{canonical, delays, gtfs, pipeline, snapshot, sql};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "gtfs_schedule_packer")]
#[command(about = "Compresses GTFS schedules into a compact queryable store", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the canonical compressed schedules in human-readable form
    Print {
        /// Path of directory containing GTFS data
        #[arg(value_name = "GTFS_DIR")]
        path: PathBuf,
    },
    /// Generate a SQL statement file for the compressed store
    MakeSql {
        /// Path of directory containing GTFS data
        #[arg(value_name = "GTFS_DIR")]
        path: PathBuf,

        /// File to write SQL output to; must not already exist
        output: PathBuf,
    },
    /// Write the compressed store as a binary snapshot
    Build {
        /// Path of directory containing GTFS data
        #[arg(value_name = "GTFS_DIR")]
        path: PathBuf,

        /// Snapshot file to write
        output: PathBuf,
    },
    /// Print upcoming arrivals for a stop, adjusted by a realtime feed
    NextArrivals {
        /// Snapshot file written by `build`
        snapshot: PathBuf,

        /// Path of directory containing GTFS data (for the trips table)
        #[arg(value_name = "GTFS_DIR")]
        gtfs_dir: PathBuf,

        /// Stop id to get results for
        stop_id: String,

        /// GTFS-RT trip updates feed, a file path or URL; without it
        /// arrivals print with zero delay
        #[arg(short, long)]
        feed: Option<String>,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/gtfs_schedule_packer.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("gtfs_schedule_packer.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse().unwrap()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse().unwrap()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Print { path } => {
            let store = pipeline::build_store(&path)?;
            let entries = canonical::select(&store);
            print_entries(&entries);
        }
        Commands::MakeSql { path, output } => {
            let store = pipeline::build_store(&path)?;
            let entries = canonical::select(&store);
            sql::write_file(&output, &entries)?;
        }
        Commands::Build { path, output } => {
            let store = pipeline::build_store(&path)?;
            debug!("{}", serde_json::to_string_pretty(&store.summary())?);
            let entries = canonical::select(&store);
            snapshot::write_file(&output, &entries)?;
        }
        Commands::NextArrivals {
            snapshot,
            gtfs_dir,
            stop_id,
            feed,
        } => {
            let entries = snapshot::read_file(&snapshot)?;
            let tables = gtfs::load_tables(&gtfs_dir)?;

            let feed = match feed {
                Some(source) => Some(delays::load_feed(&source)?),
                None => None,
            };

            let now_seconds = Local::now().num_seconds_from_midnight();
            let arrivals = delays::upcoming_arrivals(
                &entries,
                &tables.trips,
                feed.as_ref(),
                &stop_id,
                now_seconds,
            );

            if arrivals.is_empty() {
                println!("No arrivals for {stop_id}");
            } else {
                for arrival in &arrivals {
                    println!(
                        "Next arrival for {stop_id} on route {} toward {} is at {} with delay {}s",
                        arrival.route_id,
                        arrival.direction,
                        time_to_string(arrival.adjusted),
                        arrival.delay_seconds,
                    );
                }
            }
        }
    }

    Ok(())
}

/// Dumps the canonical selection grouped by route and direction, matching
/// the store's insertion order.
fn print_entries(entries: &[canonical::CanonicalEntry]) {
    info!(entries = entries.len(), "canonical selection complete");

    let mut last_route = None;
    let mut last_direction = None;
    for entry in entries {
        if last_route != Some(&entry.route_id) {
            println!("Route: {}", entry.route_id);
            last_route = Some(&entry.route_id);
            last_direction = None;
        }
        if last_direction != Some(&entry.direction) {
            println!("    Direction: {}", entry.direction);
            last_direction = Some(&entry.direction);
        }
        println!("    Service: {}", entry.label);
        print!("{}", entry.schedule);
    }
}
