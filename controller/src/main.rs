//! VANTAGE L2 fusion controller daemon.
//!
//! Boots the fusion manager with the selected algorithm, optionally spawns
//! in-process edge nodes for a self-contained deployment, and serves a small
//! interactive command set on stdin until `quit`.

use clap::Parser;
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use vantage_bus::messages::NodeType;
use vantage_bus::InProcBus;
use vantage_core::{AlgorithmRegistry, FusionConfig, FusionManager, TargetTracker};
use vantage_sim::{spawn_edge_node, EdgeNodeConfig, EdgeNodeHandle};

const DEFAULT_BUS_URL: &str = "tcp://127.0.0.1:6379";

/// Level-2 sensor fusion controller
#[derive(Parser, Debug)]
#[command(name = "vantage-controller")]
#[command(about = "Central fusion controller for a distributed sensing network", long_about = None)]
struct Args {
    /// Message broker URL (deployment-specific transports attach here)
    #[arg(long, default_value = DEFAULT_BUS_URL)]
    bus_url: String,

    /// Fusion algorithm to run
    #[arg(long, default_value = "TargetTrackingAlgorithm")]
    algorithm: String,

    /// Algorithm update interval in milliseconds
    #[arg(long, default_value = "100")]
    update_interval: u64,

    /// Edge node timeout in seconds
    #[arg(long, default_value = "30")]
    node_timeout: u64,

    /// Number of worker threads
    #[arg(long, default_value = "2")]
    workers: usize,

    /// Ingress queue capacity
    #[arg(long, default_value = "1000")]
    queue_size: usize,

    /// Spawn this many in-process simulated sensor nodes
    #[arg(long, default_value = "0")]
    sim_nodes: usize,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn main() {
    let args = Args::parse();

    let level = if args.debug { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("failed to install logging subscriber");
        std::process::exit(1);
    }

    if args.update_interval == 0 || args.node_timeout == 0 {
        eprintln!("update interval and node timeout must be positive");
        std::process::exit(1);
    }

    // This build ships the in-process transport; broker-backed transports
    // plug in behind the same BusClient trait at deployment time.
    if args.bus_url != DEFAULT_BUS_URL {
        warn!(bus_url = %args.bus_url, "external broker transports are deployment glue; using the in-process bus");
    }
    let bus = InProcBus::shared();

    let registry = AlgorithmRegistry::new();
    registry.register(|| Box::new(TargetTracker::new()));

    let Some(algorithm) = registry.create(&args.algorithm) else {
        eprintln!("unknown algorithm: {}", args.algorithm);
        eprintln!("available algorithms:");
        for name in registry.available() {
            eprintln!("  - {name}");
        }
        std::process::exit(1);
    };

    let config = FusionConfig {
        tick_interval: Duration::from_millis(args.update_interval),
        node_timeout: Duration::from_secs(args.node_timeout),
        worker_threads: args.workers,
        message_queue_size: args.queue_size,
        ..FusionConfig::default()
    };

    let mut manager = FusionManager::new(bus.clone(), config);
    if let Err(err) = manager.set_algorithm(algorithm) {
        eprintln!("failed to install algorithm: {err}");
        std::process::exit(1);
    }
    if let Err(err) = manager.start() {
        eprintln!("failed to start controller: {err}");
        std::process::exit(1);
    }

    let sims_running = Arc::new(AtomicBool::new(true));
    let mut sim_handles: Vec<EdgeNodeHandle> = Vec::new();
    for idx in 0..args.sim_nodes {
        let node_type = if idx % 2 == 0 { NodeType::Radar } else { NodeType::Lidar };
        let prefix = if node_type == NodeType::Radar { "radar" } else { "lidar" };
        let mut node = EdgeNodeConfig::new(format!("{prefix}_{idx:03}"), node_type, idx as u64);
        node.detection_probability = 0.5;
        sim_handles.push(spawn_edge_node(bus.clone(), node, sims_running.clone()));
    }
    if args.sim_nodes > 0 {
        info!(count = args.sim_nodes, "spawned in-process edge nodes");
    }

    info!("controller running; commands: stats, nodes, reset, trigger <event>, quit");

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let input = line.trim();

        if input == "quit" || input == "exit" {
            break;
        } else if input == "stats" {
            let stats = manager.stats();
            println!(
                "processed={} sent={} dropped={} active_nodes={} state={} uptime={:.1}s",
                stats.messages_processed,
                stats.messages_sent,
                stats.messages_dropped,
                stats.active_nodes,
                stats.current_state,
                stats.uptime.as_secs_f64(),
            );
            if let Some(err) = stats.last_bus_error {
                println!("last bus error: {err}");
            }
        } else if input == "nodes" {
            let nodes = manager.node_registry();
            let active = nodes.get_active(manager.config().node_timeout);
            println!("active nodes ({}):", active.len());
            for node_id in active {
                if let Some(node) = nodes.get_node(&node_id) {
                    println!("  {node_id} ({}) at {}", node.node_type, node.location);
                }
            }
        } else if input == "reset" {
            manager.trigger_event("reset", None);
            println!("algorithm reset triggered");
        } else if let Some(event) = input.strip_prefix("trigger ") {
            let event = event.trim();
            if event.is_empty() {
                println!("usage: trigger <event>");
            } else {
                manager.trigger_event(event, None);
                println!("triggered event: {event}");
            }
        } else if !input.is_empty() {
            println!("unknown command; type 'quit' to exit");
        }
    }

    info!("shutting down");
    manager.stop();
    sims_running.store(false, Ordering::SeqCst);
    for handle in sim_handles {
        handle.join();
    }
}
