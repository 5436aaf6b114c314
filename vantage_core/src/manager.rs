//! The fusion controller runtime: threads, queues, and bus wiring.
//!
//! One manager owns the bus client, the installed algorithm and its context,
//! the node registry, and every thread:
//!
//! - N workers draining the bounded ingress queue
//! - a tick thread driving `algorithm.update`
//! - a heartbeat thread publishing keepalives
//! - a node monitor expiring silent nodes and raising `node_timeout`
//! - a subscription thread pumping inbound bus frames
//!
//! The algorithm and its context share one exclusive host lock; exclusive
//! access is what `&mut` dispatch demands anyway, and it serializes state
//! transitions exactly as a reader/writer split over the algorithm slot
//! would. Pending outputs are drained under the host lock but published
//! after it is released, so bus latency never extends the critical section.

use crate::algorithm::FusionAlgorithm;
use crate::context::AlgorithmContext;
use crate::registry::NodeRegistry;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use vantage_bus::messages::{
    decode_frame, encode_frame, ControlCommandType, L1Payload, L1ToL2, L2Payload, L2ToL1, SystemCommand,
    SystemCommandType,
};
use vantage_bus::BusClient;

/// Granularity of interruptible sleeps; bounds how long `stop` waits on a
/// sleeping thread.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Worker queue wait per iteration.
const POP_TIMEOUT: Duration = Duration::from_millis(100);

/// Configuration for the fusion controller.
#[derive(Debug, Clone)]
pub struct FusionConfig {
    /// Inbound topic carrying edge-node traffic
    pub l1_topic: String,
    /// Outbound topic carrying controller commands
    pub l2_topic: String,
    /// Controller liveness topic
    pub heartbeat_topic: String,
    /// Silence span after which an edge node is expired
    pub node_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// Cadence of `algorithm.update`
    pub tick_interval: Duration,
    pub worker_threads: usize,
    /// Ingress queue capacity; the oldest message is dropped on overflow
    pub message_queue_size: usize,
    /// Mirror POINT_GIMBAL commands onto `gimbal_stream`/`gimbal_queue`
    /// for offline inspection
    pub mirror_gimbal: bool,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            l1_topic: "l1_to_l2".into(),
            l2_topic: "l2_to_l1".into(),
            heartbeat_topic: "l2_heartbeat".into(),
            node_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(5),
            tick_interval: Duration::from_millis(100),
            worker_threads: 2,
            message_queue_size: 1000,
            mirror_gimbal: false,
        }
    }
}

/// Lifecycle and configuration failures.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("no algorithm installed; call set_algorithm before start")]
    NoAlgorithm,
    #[error("cannot replace the algorithm while the controller is running")]
    Running,
}

/// Counters and state snapshot for diagnostics.
#[derive(Debug, Clone)]
pub struct ManagerStats {
    pub messages_processed: u64,
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub active_nodes: usize,
    pub uptime: Duration,
    pub current_state: String,
    pub last_bus_error: Option<String>,
}

// ============================================================================
// INGRESS QUEUE
// ============================================================================

/// Bounded FIFO with drop-oldest backpressure and a condition variable for
/// worker wakeups.
struct MessageQueue {
    inner: Mutex<VecDeque<L1ToL2>>,
    available: Condvar,
    capacity: usize,
    dropped: AtomicU64,
}

impl MessageQueue {
    fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueues a message. At capacity the oldest queued message gives way
    /// to the incoming one; a subscriber thread must never block on a slow
    /// consumer.
    fn push(&self, msg: L1ToL2) {
        let mut queue = self.inner.lock();
        if queue.len() >= self.capacity {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(capacity = self.capacity, "ingress queue full, dropping oldest message");
        }
        queue.push_back(msg);
        drop(queue);
        self.available.notify_one();
    }

    /// Dequeues the next message, waiting up to `timeout`. The timed wait
    /// keeps shutdown prompt even with no traffic.
    fn pop_timed(&self, timeout: Duration) -> Option<L1ToL2> {
        let mut queue = self.inner.lock();
        if queue.is_empty() {
            let _ = self.available.wait_for(&mut queue, timeout);
        }
        queue.pop_front()
    }

    fn wake_all(&self) {
        self.available.notify_all();
    }

    fn len(&self) -> usize {
        self.inner.lock().len()
    }

    fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

// ============================================================================
// HOST & OUTBOUND
// ============================================================================

/// The installed algorithm and its context, guarded together.
struct AlgorithmHost {
    algorithm: Option<Box<dyn FusionAlgorithm>>,
    context: AlgorithmContext,
}

/// Outbound publishing shared by every thread. Stamps instance-local
/// `L2_<n>` message ids at publish time.
struct Outbound {
    bus: Arc<dyn BusClient>,
    topic: String,
    message_seq: AtomicU64,
    sent: AtomicU64,
    last_bus_error: Mutex<Option<String>>,
    mirror_gimbal: bool,
}

impl Outbound {
    fn publish(&self, mut msg: L2ToL1) {
        if msg.message_id.is_empty() {
            msg.message_id = format!("L2_{}", self.message_seq.fetch_add(1, Ordering::Relaxed));
        }
        let frame = match encode_frame(&msg) {
            Ok(frame) => frame,
            Err(err) => {
                error!(%err, "failed to encode outbound message");
                return;
            }
        };

        if self.mirror_gimbal && is_gimbal_command(&msg) {
            if let Err(err) = self.bus.stream_append("gimbal_stream", frame.clone()) {
                debug!(%err, "gimbal stream mirror failed");
            }
            if let Err(err) = self.bus.queue_push("gimbal_queue", frame.clone()) {
                debug!(%err, "gimbal queue mirror failed");
            }
        }

        match self.bus.publish(&self.topic, frame) {
            Ok(()) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                error!(%err, topic = %self.topic, "bus publish failed");
                *self.last_bus_error.lock() = Some(err.to_string());
            }
        }
    }

    fn publish_all(&self, messages: Vec<L2ToL1>) {
        for msg in messages {
            self.publish(msg);
        }
    }
}

fn is_gimbal_command(msg: &L2ToL1) -> bool {
    matches!(
        &msg.payload,
        L2Payload::Control(cmd) if cmd.command_type == ControlCommandType::PointGimbal
    )
}

/// Sleeps in short slices so a cleared run flag interrupts promptly.
fn sleep_while_running(running: &AtomicBool, total: Duration) {
    let deadline = Instant::now() + total;
    while running.load(Ordering::SeqCst) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return;
        }
        std::thread::sleep(remaining.min(SLEEP_SLICE));
    }
}

// ============================================================================
// FUSION MANAGER
// ============================================================================

/// Owns the fusion pipeline: bus, algorithm, registry, queue, and threads.
pub struct FusionManager {
    config: FusionConfig,
    bus: Arc<dyn BusClient>,
    host: Arc<Mutex<AlgorithmHost>>,
    registry: Arc<NodeRegistry>,
    queue: Arc<MessageQueue>,
    outbound: Arc<Outbound>,
    running: Arc<AtomicBool>,
    subscription_running: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
    processed: Arc<AtomicU64>,
    started_at: Instant,
}

impl FusionManager {
    pub fn new(bus: Arc<dyn BusClient>, config: FusionConfig) -> Self {
        let outbound = Arc::new(Outbound {
            bus: bus.clone(),
            topic: config.l2_topic.clone(),
            message_seq: AtomicU64::new(0),
            sent: AtomicU64::new(0),
            last_bus_error: Mutex::new(None),
            mirror_gimbal: config.mirror_gimbal,
        });
        Self {
            queue: Arc::new(MessageQueue::new(config.message_queue_size)),
            config,
            bus,
            host: Arc::new(Mutex::new(AlgorithmHost {
                algorithm: None,
                context: AlgorithmContext::new(),
            })),
            registry: Arc::new(NodeRegistry::new()),
            outbound,
            running: Arc::new(AtomicBool::new(false)),
            subscription_running: Arc::new(AtomicBool::new(false)),
            threads: Vec::new(),
            processed: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    pub fn node_registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Installs the fusion algorithm. Rejected while running.
    pub fn set_algorithm(&self, algorithm: Box<dyn FusionAlgorithm>) -> Result<(), ManagerError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(ManagerError::Running);
        }
        self.host.lock().algorithm = Some(algorithm);
        Ok(())
    }

    /// Starts every thread. No-op if already running.
    pub fn start(&mut self) -> Result<(), ManagerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        {
            let mut host = self.host.lock();
            let AlgorithmHost { algorithm, context } = &mut *host;
            let Some(algorithm) = algorithm.as_mut() else {
                self.running.store(false, Ordering::SeqCst);
                return Err(ManagerError::NoAlgorithm);
            };
            context.tick_interval = self.config.tick_interval;
            algorithm.initialize(context);
            info!(algorithm = algorithm.name(), "fusion controller starting");
            let outputs = context.drain_outputs();
            drop(host);
            self.outbound.publish_all(outputs);
        }

        self.subscription_running.store(true, Ordering::SeqCst);
        self.started_at = Instant::now();

        for worker_id in 0..self.config.worker_threads {
            self.threads.push(self.spawn_worker(worker_id));
        }
        self.threads.push(self.spawn_tick());
        self.threads.push(self.spawn_heartbeat());
        self.threads.push(self.spawn_monitor());
        self.threads.push(self.spawn_subscription());
        Ok(())
    }

    /// Stops and joins every thread, then runs the algorithm's shutdown.
    /// Idempotent.
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.subscription_running.store(false, Ordering::SeqCst);
        self.queue.wake_all();

        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                error!("controller thread panicked");
            }
        }

        let outputs = {
            let mut host = self.host.lock();
            let AlgorithmHost { algorithm, context } = &mut *host;
            if let Some(algorithm) = algorithm.as_mut() {
                algorithm.shutdown(context);
            }
            context.drain_outputs()
        };
        self.outbound.publish_all(outputs);
        info!("fusion controller stopped");
    }

    /// Publishes a message to the outbound topic.
    pub fn send_to_l1(&self, msg: L2ToL1) {
        self.outbound.publish(msg);
    }

    /// Routes an external trigger into the algorithm.
    pub fn trigger_event(&self, trigger: &str, data: Option<&str>) {
        let outputs = {
            let mut host = self.host.lock();
            let AlgorithmHost { algorithm, context } = &mut *host;
            match algorithm.as_mut() {
                Some(algorithm) => {
                    algorithm.handle_trigger(context, trigger, data);
                    context.drain_outputs()
                }
                None => {
                    warn!(trigger, "trigger with no algorithm installed");
                    return;
                }
            }
        };
        self.outbound.publish_all(outputs);
    }

    /// Point-in-time counters and state.
    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            messages_processed: self.processed.load(Ordering::Relaxed),
            messages_sent: self.outbound.sent.load(Ordering::Relaxed),
            messages_dropped: self.queue.dropped(),
            active_nodes: self.registry.get_active(self.config.node_timeout).len(),
            uptime: self.started_at.elapsed(),
            current_state: self.host.lock().context.current_state.clone(),
            last_bus_error: self.outbound.last_bus_error.lock().clone(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Depth of the ingress queue (diagnostics).
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    // ------------------------------------------------------------------
    // Threads
    // ------------------------------------------------------------------

    fn spawn_worker(&self, worker_id: usize) -> JoinHandle<()> {
        let running = self.running.clone();
        let queue = self.queue.clone();
        let host = self.host.clone();
        let outbound = self.outbound.clone();
        let processed = self.processed.clone();

        std::thread::Builder::new()
            .name(format!("fusion-worker-{worker_id}"))
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    let Some(msg) = queue.pop_timed(POP_TIMEOUT) else {
                        continue;
                    };
                    let outputs = {
                        let mut host = host.lock();
                        let AlgorithmHost { algorithm, context } = &mut *host;
                        match algorithm.as_mut() {
                            Some(algorithm) => {
                                // Each message is an isolation boundary: a
                                // failing callback costs that message only.
                                let call = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                                    algorithm.process_message(context, &msg)
                                }));
                                match call {
                                    Ok(()) => {
                                        processed.fetch_add(1, Ordering::Relaxed);
                                    }
                                    Err(_) => error!(message_id = %msg.message_id, "algorithm panicked in process_message"),
                                }
                                context.drain_outputs()
                            }
                            None => Vec::new(),
                        }
                    };
                    outbound.publish_all(outputs);
                }
                debug!(worker_id, "worker exiting");
            })
            .expect("spawn worker thread")
    }

    fn spawn_tick(&self) -> JoinHandle<()> {
        let running = self.running.clone();
        let host = self.host.clone();
        let outbound = self.outbound.clone();
        let interval = self.config.tick_interval;

        std::thread::Builder::new()
            .name("fusion-tick".into())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    let outputs = {
                        let mut host = host.lock();
                        let AlgorithmHost { algorithm, context } = &mut *host;
                        match algorithm.as_mut() {
                            Some(algorithm) => {
                                let call = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                                    algorithm.update(context)
                                }));
                                if call.is_err() {
                                    error!("algorithm panicked in update");
                                }
                                context.drain_outputs()
                            }
                            None => Vec::new(),
                        }
                    };
                    outbound.publish_all(outputs);
                    sleep_while_running(&running, interval);
                }
            })
            .expect("spawn tick thread")
    }

    fn spawn_heartbeat(&self) -> JoinHandle<()> {
        let running = self.running.clone();
        let bus = self.bus.clone();
        let outbound = self.outbound.clone();
        let topic = self.config.heartbeat_topic.clone();
        let interval = self.config.heartbeat_interval;

        std::thread::Builder::new()
            .name("fusion-heartbeat".into())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    let mut beat = L2ToL1::broadcast(L2Payload::System(SystemCommand {
                        command_type: SystemCommandType::SyncTime,
                    }));
                    beat.message_id = format!("L2_{}", outbound.message_seq.fetch_add(1, Ordering::Relaxed));
                    match encode_frame(&beat) {
                        Ok(frame) => {
                            if let Err(err) = bus.publish(&topic, frame) {
                                error!(%err, "heartbeat publish failed");
                                *outbound.last_bus_error.lock() = Some(err.to_string());
                            }
                        }
                        Err(err) => error!(%err, "heartbeat encode failed"),
                    }
                    sleep_while_running(&running, interval);
                }
            })
            .expect("spawn heartbeat thread")
    }

    fn spawn_monitor(&self) -> JoinHandle<()> {
        let running = self.running.clone();
        let registry = self.registry.clone();
        let host = self.host.clone();
        let outbound = self.outbound.clone();
        let node_timeout = self.config.node_timeout;
        let interval = node_timeout / 4;

        std::thread::Builder::new()
            .name("fusion-node-monitor".into())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    // The atomic sweep guarantees each expiry is observed by
                    // exactly one monitor pass.
                    let expired = registry.check_and_remove_expired(node_timeout);
                    for node_id in expired {
                        warn!(%node_id, "edge node expired");
                        let outputs = {
                            let mut host = host.lock();
                            let AlgorithmHost { algorithm, context } = &mut *host;
                            match algorithm.as_mut() {
                                Some(algorithm) => {
                                    let call = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                                        algorithm.handle_trigger(context, "node_timeout", Some(&node_id))
                                    }));
                                    if call.is_err() {
                                        error!(%node_id, "algorithm panicked in handle_trigger");
                                    }
                                    context.drain_outputs()
                                }
                                None => Vec::new(),
                            }
                        };
                        outbound.publish_all(outputs);
                    }
                    sleep_while_running(&running, interval);
                }
            })
            .expect("spawn node monitor thread")
    }

    fn spawn_subscription(&self) -> JoinHandle<()> {
        let subscription_running = self.subscription_running.clone();
        let bus = self.bus.clone();
        let topic = self.config.l1_topic.clone();
        let registry = self.registry.clone();
        let queue = self.queue.clone();
        let outbound = self.outbound.clone();

        std::thread::Builder::new()
            .name("fusion-subscription".into())
            .spawn(move || {
                while subscription_running.load(Ordering::SeqCst) {
                    let handler = {
                        let registry = registry.clone();
                        let queue = queue.clone();
                        Box::new(move |frame: Vec<u8>| match decode_frame::<L1ToL2>(&frame) {
                            Ok(msg) => handle_inbound(&registry, &queue, msg),
                            // A malformed record costs itself, nothing more.
                            Err(err) => warn!(%err, "dropping undecodable inbound frame"),
                        })
                    };
                    match bus.subscribe(&topic, handler, subscription_running.clone()) {
                        Ok(()) => {}
                        Err(err) => {
                            error!(%err, "bus subscription failed, retrying");
                            *outbound.last_bus_error.lock() = Some(err.to_string());
                            sleep_while_running(&subscription_running, Duration::from_secs(1));
                        }
                    }
                }
            })
            .expect("spawn subscription thread")
    }
}

/// Classifies one inbound message: registry upkeep for status and
/// heartbeats, the worker queue for everything else.
fn handle_inbound(registry: &NodeRegistry, queue: &MessageQueue, msg: L1ToL2) {
    if let Some(sender) = &msg.sender {
        registry.register(sender.clone());
    }
    match &msg.payload {
        L1Payload::Status(status) => registry.update_status(status.clone()),
        L1Payload::Heartbeat => {
            if let Some(node_id) = msg.sender_id() {
                registry.touch(node_id);
            }
        }
        _ => queue.push(msg),
    }
}

impl Drop for FusionManager {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vantage_bus::messages::{NodeIdentity, NodeStatus, NodeType, OperationalState};

    fn message(node_id: &str, seq: u64, payload: L1Payload) -> L1ToL2 {
        L1ToL2::new(
            format!("{node_id}_{seq}"),
            seq,
            NodeIdentity::new(node_id, NodeType::Radar, ""),
            payload,
        )
    }

    #[test]
    fn test_queue_drops_oldest_on_overflow() {
        let queue = MessageQueue::new(4);
        for seq in 0..10 {
            queue.push(message("radar_001", seq, L1Payload::Heartbeat));
        }
        assert_eq!(queue.len(), 4);
        assert_eq!(queue.dropped(), 6);

        // The survivors are the newest four, in arrival order.
        let first = queue.pop_timed(Duration::from_millis(1)).unwrap();
        assert_eq!(first.sequence_number, 6, "head of queue is the oldest survivor");
    }

    #[test]
    fn test_queue_pop_times_out_empty() {
        let queue = MessageQueue::new(4);
        let start = Instant::now();
        assert!(queue.pop_timed(Duration::from_millis(20)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn test_handle_inbound_routes_by_payload() {
        let registry = NodeRegistry::new();
        let queue = MessageQueue::new(4);

        handle_inbound(&registry, &queue, message("radar_001", 0, L1Payload::Heartbeat));
        assert_eq!(queue.len(), 0, "heartbeats touch the registry, not the queue");
        assert!(registry.get_node("radar_001").is_some());

        handle_inbound(
            &registry,
            &queue,
            message(
                "radar_001",
                1,
                L1Payload::Status(NodeStatus {
                    node_id: "radar_001".into(),
                    operational: OperationalState::Degraded,
                    cpu_usage: 0.9,
                    memory_usage: 0.4,
                }),
            ),
        );
        assert_eq!(queue.len(), 0);
        assert_eq!(
            registry.get_status("radar_001").unwrap().operational,
            OperationalState::Degraded
        );

        handle_inbound(
            &registry,
            &queue,
            message(
                "radar_001",
                2,
                L1Payload::Sensor(vantage_bus::messages::SensorPayload::Radar(
                    vantage_bus::messages::RadarData { detections: vec![] },
                )),
            ),
        );
        assert_eq!(queue.len(), 1, "sensor data goes to the workers");
    }

    #[test]
    fn test_outbound_stamps_instance_local_ids() {
        let bus = vantage_bus::InProcBus::shared();
        let outbound = Outbound {
            bus: bus.clone(),
            topic: "l2_to_l1".into(),
            message_seq: AtomicU64::new(0),
            sent: AtomicU64::new(0),
            last_bus_error: Mutex::new(None),
            mirror_gimbal: false,
        };

        let collected = Arc::new(Mutex::new(Vec::new()));
        let running = Arc::new(AtomicBool::new(true));
        let sub = {
            let bus = bus.clone();
            let collected = collected.clone();
            let running = running.clone();
            std::thread::spawn(move || {
                bus.subscribe(
                    "l2_to_l1",
                    Box::new(move |frame| {
                        collected.lock().push(decode_frame::<L2ToL1>(&frame).unwrap());
                    }),
                    running,
                )
                .unwrap();
            })
        };
        while bus.subscriber_count("l2_to_l1") == 0 {
            std::thread::sleep(Duration::from_millis(1));
        }

        for _ in 0..3 {
            outbound.publish(L2ToL1::broadcast(L2Payload::System(SystemCommand {
                command_type: SystemCommandType::SyncTime,
            })));
        }
        std::thread::sleep(Duration::from_millis(50));
        running.store(false, Ordering::SeqCst);
        sub.join().unwrap();

        let got = collected.lock();
        let ids: Vec<&str> = got.iter().map(|m| m.message_id.as_str()).collect();
        assert_eq!(ids, vec!["L2_0", "L2_1", "L2_2"]);
        assert_eq!(outbound.sent.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_sleep_while_running_interrupts() {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let waker = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            flag.store(false, Ordering::SeqCst);
        });

        let start = Instant::now();
        sleep_while_running(&running, Duration::from_secs(10));
        assert!(start.elapsed() < Duration::from_secs(1), "cleared flag cuts the sleep short");
        waker.join().unwrap();
    }
}
