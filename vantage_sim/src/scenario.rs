//! Self-contained fusion scenarios.
//!
//! Wires an in-process bus, a fusion controller running the target tracker,
//! and a handful of simulated edge nodes, runs the whole stack for a fixed
//! duration, and reports the controller's counters.

use crate::node::{spawn_edge_node, EdgeNodeConfig, EdgeNodeHandle};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use vantage_bus::messages::NodeType;
use vantage_bus::{BusClient, InProcBus};
use vantage_core::{FusionConfig, FusionManager, TargetTracker};

/// Knobs for one scenario run.
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    /// Number of sensor nodes (radar/lidar alternating)
    pub nodes: usize,
    pub duration: Duration,
    pub seed: u64,
    pub tick_interval: Duration,
    pub workers: usize,
    /// Publisher cadence of the simulated nodes
    pub node_publish_interval: Duration,
    pub detection_probability: f32,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            nodes: 3,
            duration: Duration::from_secs(10),
            seed: 42,
            tick_interval: Duration::from_millis(100),
            workers: 2,
            node_publish_interval: Duration::from_millis(200),
            detection_probability: 0.6,
        }
    }
}

/// Outcome of a scenario run.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub seed: u64,
    pub duration_secs: f64,
    pub messages_processed: u64,
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub active_nodes: usize,
    pub final_state: String,
    /// POINT_GIMBAL commands mirrored for offline inspection
    pub gimbal_stream_len: usize,
}

/// Runs one scenario to completion and returns its report.
pub fn run_scenario(config: &ScenarioConfig) -> ScenarioReport {
    let bus = InProcBus::shared();
    let fusion_config = FusionConfig {
        tick_interval: config.tick_interval,
        worker_threads: config.workers,
        mirror_gimbal: true,
        ..FusionConfig::default()
    };

    let mut manager = FusionManager::new(bus.clone(), fusion_config);
    manager
        .set_algorithm(Box::new(TargetTracker::new()))
        .expect("fresh controller accepts an algorithm");
    manager.start().expect("scenario controller starts");

    let nodes_running = Arc::new(AtomicBool::new(true));
    let mut handles: Vec<EdgeNodeHandle> = Vec::new();

    for idx in 0..config.nodes {
        let node_type = if idx % 2 == 0 { NodeType::Radar } else { NodeType::Lidar };
        let prefix = if node_type == NodeType::Radar { "radar" } else { "lidar" };
        let mut node = EdgeNodeConfig::new(
            format!("{prefix}_{idx:03}"),
            node_type,
            config.seed.wrapping_add(idx as u64),
        );
        node.publish_interval = config.node_publish_interval;
        node.detection_probability = config.detection_probability;
        handles.push(spawn_edge_node(bus.clone(), node, nodes_running.clone()));
    }

    // The beam director only listens for pointing commands.
    let mut coherent = EdgeNodeConfig::new("coherent_001", NodeType::Coherent, config.seed);
    coherent.publish_interval = config.node_publish_interval;
    coherent.detection_probability = 0.0;
    handles.push(spawn_edge_node(bus.clone(), coherent, nodes_running.clone()));

    info!(nodes = config.nodes + 1, duration = ?config.duration, "scenario running");
    std::thread::sleep(config.duration);

    let stats = manager.stats();
    manager.stop();
    nodes_running.store(false, Ordering::SeqCst);
    for handle in handles {
        handle.join();
    }

    let gimbal_stream_len = bus
        .stream_read("gimbal_stream", "0", usize::MAX)
        .map(|entries| entries.len())
        .unwrap_or(0);

    ScenarioReport {
        seed: config.seed,
        duration_secs: config.duration.as_secs_f64(),
        messages_processed: stats.messages_processed,
        messages_sent: stats.messages_sent,
        messages_dropped: stats.messages_dropped,
        active_nodes: stats.active_nodes,
        final_state: stats.current_state,
        gimbal_stream_len,
    }
}
