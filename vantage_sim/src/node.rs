//! Simulated L1 edge nodes.
//!
//! Each node runs two owned threads against the shared bus: a publisher
//! emitting capability advertisements, heartbeats, status reports, and
//! randomized sensor data, and a subscriber logging the commands the
//! controller sends back. All sensor nodes observe the same small scene, so
//! several of them corroborate the same objects and the controller can reach
//! sensor consensus.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use vantage_bus::messages::{
    decode_frame, encode_frame, CapabilityAdvertisement, L1Payload, L1ToL2, L2Payload, L2ToL1, LidarData,
    NodeIdentity, NodeStatus, NodeType, OperationalState, RadarData, RadarDetection, SensorPayload,
};
use vantage_bus::BusClient;

/// Ground-truth objects every sensor node observes, in controller-local
/// Cartesian meters.
pub const SCENE_OBJECTS: [[f32; 3]; 2] = [[120.0, 40.0, 10.0], [80.0, -60.0, 5.0]];

/// Configuration for one simulated edge node.
#[derive(Debug, Clone)]
pub struct EdgeNodeConfig {
    pub node_id: String,
    pub node_type: NodeType,
    pub location: String,
    pub l1_topic: String,
    pub l2_topic: String,
    /// Cadence of the publisher loop
    pub publish_interval: Duration,
    /// Chance of emitting sensor data on a given cycle
    pub detection_probability: f32,
    pub seed: u64,
}

impl EdgeNodeConfig {
    pub fn new(node_id: impl Into<String>, node_type: NodeType, seed: u64) -> Self {
        Self {
            node_id: node_id.into(),
            node_type,
            location: "sim".into(),
            l1_topic: "l1_to_l2".into(),
            l2_topic: "l2_to_l1".into(),
            publish_interval: Duration::from_millis(1000),
            detection_probability: 0.3,
            seed,
        }
    }
}

/// Join handles for a spawned node's threads.
pub struct EdgeNodeHandle {
    publisher: JoinHandle<()>,
    subscriber: JoinHandle<()>,
}

impl EdgeNodeHandle {
    pub fn join(self) {
        let _ = self.publisher.join();
        let _ = self.subscriber.join();
    }
}

/// Spawns a node's publisher and subscriber threads. Both exit once
/// `running` clears.
pub fn spawn_edge_node(bus: Arc<dyn BusClient>, config: EdgeNodeConfig, running: Arc<AtomicBool>) -> EdgeNodeHandle {
    let publisher = {
        let bus = bus.clone();
        let config = config.clone();
        let running = running.clone();
        std::thread::Builder::new()
            .name(format!("edge-pub-{}", config.node_id))
            .spawn(move || publisher_loop(bus, config, running))
            .expect("spawn edge node publisher")
    };

    let subscriber = {
        let node_id = config.node_id.clone();
        let topic = config.l2_topic.clone();
        std::thread::Builder::new()
            .name(format!("edge-sub-{}", node_id))
            .spawn(move || {
                let handler_node = node_id.clone();
                let result = bus.subscribe(
                    &topic,
                    Box::new(move |frame| match decode_frame::<L2ToL1>(&frame) {
                        Ok(msg) => handle_command(&handler_node, &msg),
                        Err(err) => warn!(%err, "undecodable controller frame"),
                    }),
                    running,
                );
                if let Err(err) = result {
                    warn!(%node_id, %err, "edge node subscription ended");
                }
            })
            .expect("spawn edge node subscriber")
    };

    EdgeNodeHandle { publisher, subscriber }
}

fn handle_command(node_id: &str, msg: &L2ToL1) {
    if !msg.is_broadcast() && msg.target_node_id != node_id {
        return;
    }
    match &msg.payload {
        L2Payload::Control(cmd) => info!(
            %node_id,
            command = ?cmd.command_type,
            theta = cmd.target_position.theta,
            phi = cmd.target_position.phi,
            "control command received"
        ),
        L2Payload::System(cmd) => debug!(%node_id, command = ?cmd.command_type, "system command received"),
        _ => {}
    }
}

struct Sequencer {
    node_id: String,
    next: u64,
}

impl Sequencer {
    /// Mints the next `<node_id>_<n>` message id.
    fn next_id(&mut self) -> (String, u64) {
        let seq = self.next;
        self.next += 1;
        (format!("{}_{seq}", self.node_id), seq)
    }
}

fn publisher_loop(bus: Arc<dyn BusClient>, config: EdgeNodeConfig, running: Arc<AtomicBool>) {
    let identity = NodeIdentity::new(&config.node_id, config.node_type, &config.location);
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut seq = Sequencer {
        node_id: config.node_id.clone(),
        next: 0,
    };

    publish(
        &*bus,
        &config.l1_topic,
        build_message(&mut seq, &identity, L1Payload::Capability(advertisement(config.node_type))),
    );

    let mut cycle: u64 = 0;
    while running.load(Ordering::SeqCst) {
        if cycle % 10 == 0 {
            publish(&*bus, &config.l1_topic, build_message(&mut seq, &identity, L1Payload::Heartbeat));
        }
        if cycle % 20 == 0 {
            let status = NodeStatus {
                node_id: config.node_id.clone(),
                operational: OperationalState::Online,
                cpu_usage: rng.gen_range(0.05..0.85),
                memory_usage: rng.gen_range(0.1..0.7),
            };
            publish(&*bus, &config.l1_topic, build_message(&mut seq, &identity, L1Payload::Status(status)));
        }
        if rng.gen::<f32>() < config.detection_probability {
            if let Some(sensor) = sensor_payload(config.node_type, &mut rng) {
                publish(
                    &*bus,
                    &config.l1_topic,
                    build_message(&mut seq, &identity, L1Payload::Sensor(sensor)),
                );
            }
        }
        cycle += 1;
        idle_wait(&running, config.publish_interval);
    }
    debug!(node_id = %config.node_id, "edge node publisher exiting");
}

fn build_message(seq: &mut Sequencer, identity: &NodeIdentity, payload: L1Payload) -> L1ToL2 {
    let (message_id, sequence_number) = seq.next_id();
    L1ToL2::new(message_id, sequence_number, identity.clone(), payload)
}

fn publish(bus: &dyn BusClient, topic: &str, msg: L1ToL2) {
    match encode_frame(&msg) {
        Ok(frame) => {
            if let Err(err) = bus.publish(topic, frame) {
                warn!(%err, "edge node publish failed");
            }
        }
        Err(err) => warn!(%err, "edge node encode failed"),
    }
}

fn advertisement(node_type: NodeType) -> CapabilityAdvertisement {
    let capabilities: Vec<String> = match node_type {
        NodeType::Radar => vec!["radar".into()],
        NodeType::Lidar => vec!["lidar".into()],
        NodeType::Camera => vec!["camera".into()],
        NodeType::Imu => vec!["imu".into()],
        NodeType::Gps => vec!["gps".into()],
        NodeType::Coherent => vec!["coherent".into(), "gimbal_control".into()],
        NodeType::Unknown => Vec::new(),
    };
    CapabilityAdvertisement { capabilities }
}

/// Sensor observation of a random scene object, with measurement noise.
fn sensor_payload(node_type: NodeType, rng: &mut StdRng) -> Option<SensorPayload> {
    let object = SCENE_OBJECTS[rng.gen_range(0..SCENE_OBJECTS.len())];
    match node_type {
        NodeType::Radar => {
            let [x, y, z] = object;
            let range = (x * x + y * y + z * z).sqrt();
            let detections = vec![RadarDetection {
                range: range + rng.gen_range(-0.5..0.5),
                azimuth: y.atan2(x) + rng.gen_range(-0.004..0.004),
                elevation: (z / range).asin() + rng.gen_range(-0.004..0.004),
                rcs: rng.gen_range(0.3..4.0),
                velocity: rng.gen_range(-25.0..25.0),
            }];
            Some(SensorPayload::Radar(RadarData { detections }))
        }
        NodeType::Lidar => {
            let points = (0..16)
                .map(|_| {
                    [
                        object[0] + rng.gen_range(-0.3..0.3),
                        object[1] + rng.gen_range(-0.3..0.3),
                        object[2] + rng.gen_range(-0.3..0.3),
                    ]
                })
                .collect();
            Some(SensorPayload::Lidar(LidarData { points }))
        }
        // Effectors and the remaining modalities publish no detections here.
        _ => None,
    }
}

/// Sleeps in short slices so a cleared run flag interrupts promptly.
fn idle_wait(running: &AtomicBool, total: Duration) {
    let deadline = Instant::now() + total;
    while running.load(Ordering::SeqCst) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return;
        }
        std::thread::sleep(remaining.min(Duration::from_millis(50)));
    }
}
