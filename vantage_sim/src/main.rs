//! VANTAGE scenario runner CLI.
//!
//! Runs the full fusion stack (controller + simulated edge nodes) in one
//! process for a fixed duration and reports the resulting counters.

use clap::Parser;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;
use vantage_sim::{run_scenario, ScenarioConfig};

/// Self-contained fusion scenario runner
#[derive(Parser, Debug)]
#[command(name = "vantage-sim")]
#[command(about = "Run the VANTAGE fusion pipeline against simulated edge nodes", long_about = None)]
struct Args {
    /// Number of sensor nodes (radar/lidar alternating)
    #[arg(short, long, default_value = "3")]
    nodes: usize,

    /// Scenario duration in seconds
    #[arg(short, long, default_value = "10")]
    duration: f64,

    /// Seed for the simulated sensors
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Controller tick interval in milliseconds
    #[arg(long, default_value = "100")]
    tick_interval: u64,

    /// Worker threads in the controller
    #[arg(short, long, default_value = "2")]
    workers: usize,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    if args.duration <= 0.0 {
        error!("duration must be positive");
        std::process::exit(1);
    }

    let config = ScenarioConfig {
        nodes: args.nodes,
        duration: Duration::from_secs_f64(args.duration),
        seed: args.seed,
        tick_interval: Duration::from_millis(args.tick_interval),
        workers: args.workers,
        ..ScenarioConfig::default()
    };

    let report = run_scenario(&config);

    if args.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(err) => {
                error!(%err, "failed to serialize report");
                std::process::exit(1);
            }
        }
    } else {
        info!("scenario complete");
        info!("  processed: {} messages", report.messages_processed);
        info!("  sent:      {} messages", report.messages_sent);
        info!("  dropped:   {} messages", report.messages_dropped);
        info!("  nodes:     {} active", report.active_nodes);
        info!("  state:     {}", report.final_state);
        info!("  pointing:  {} commands mirrored", report.gimbal_stream_len);
    }
}
