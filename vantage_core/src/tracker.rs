//! Reference fusion algorithm: multi-sensor target tracking.
//!
//! Maintains a map of tracked targets in the algorithm context, fed by radar
//! and lidar detections, and drives a four-state machine:
//!
//! - IDLE: no targets, waiting for sensor input
//! - ACQUIRING: candidate targets exist, gathering sensor consensus
//! - TRACKING: confirmed targets, pointing the beam director at the best one
//! - LOST: targets faded, waiting for reacquisition or giving up
//!
//! Tracking itself is intentionally simple smoothing: position EMA, a
//! finite-difference velocity estimate, and additive confidence boosts with
//! multiplicative decay.

use crate::algorithm::FusionAlgorithm;
use crate::context::AlgorithmContext;
use crate::state_machine::{State, StateMachine, Transition};
use crate::strategy::{ConfidenceBasedPrioritizer, SingleDeviceAssignment, StrategyHolder};
use crate::target::Target;
use crate::task_manager::{TaskManager, TaskPriority, TaskType};
use nalgebra::Vector3;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use vantage_bus::messages::{
    ControlCommand, ControlCommandType, FusionResult, GimbalAngles, L1Payload, L1ToL2, L2Payload, L2ToL1, LidarData,
    RadarData, SensorPayload, SystemCommand, SystemCommandType,
};

/// Store key for the tracked-target map.
const TARGETS_KEY: &str = "targets";

/// Bound on trigger-request cascades per pump.
const MAX_TRIGGER_ROUNDS: usize = 8;

/// Tunable knobs for the tracker.
#[derive(Debug, Clone)]
pub struct TrackerParams {
    /// Confidence a candidate must exceed to count as confirmed
    pub min_confidence_threshold: f32,
    /// Confidence a candidate must exceed before consensus growth applies
    pub acquisition_threshold: f32,
    /// Below this confidence a target no longer holds TRACKING
    pub lost_threshold: f32,
    /// Distinct sensors required before a candidate's confidence grows
    pub min_sensor_consensus: usize,
    /// Silence span after which a target's confidence decays
    pub target_timeout: Duration,
    /// Position EMA gain
    pub position_noise: f32,
    /// Velocity EMA retention factor
    pub velocity_alpha: f32,
    /// Detections within this distance of a target associate with it
    pub association_radius: f32,
    /// Radar returns below this cross-section are ignored
    pub min_rcs: f32,
    /// Lidar single-link clustering radius
    pub cluster_radius: f32,
    /// Minimum lidar cluster size that counts as an object
    pub min_cluster_points: usize,
    /// Dwell in LOST before giving up and returning to IDLE
    pub lost_linger: Duration,
    /// Cadence of FusionResult status messages
    pub status_interval: Duration,
    /// Node id gimbal pointing commands are addressed to
    pub coherent_device_id: String,
    /// Device new tracking tasks fall back to
    pub default_device_id: String,
}

impl Default for TrackerParams {
    fn default() -> Self {
        Self {
            min_confidence_threshold: 0.7,
            acquisition_threshold: 0.5,
            lost_threshold: 0.3,
            min_sensor_consensus: 2,
            target_timeout: Duration::from_secs(10),
            position_noise: 0.1,
            velocity_alpha: 0.8,
            association_radius: 5.0,
            min_rcs: 0.1,
            cluster_radius: 1.0,
            min_cluster_points: 10,
            lost_linger: Duration::from_secs(30),
            status_interval: Duration::from_secs(5),
            coherent_device_id: "coherent_001".into(),
            default_device_id: "default_device".into(),
        }
    }
}

/// Multi-sensor target tracker.
pub struct TargetTracker {
    sm: StateMachine,
    task_manager: Arc<TaskManager>,
    strategies: Arc<StrategyHolder>,
    params: TrackerParams,
    /// Monotone counter backing `target_<k>` ids
    target_seq: u64,
    /// Instance-local status cadence marker
    last_status: Option<Instant>,
}

impl TargetTracker {
    pub fn new() -> Self {
        Self::with_params(TrackerParams::default())
    }

    pub fn with_params(params: TrackerParams) -> Self {
        let task_manager = Arc::new(TaskManager::new());
        let strategies = Arc::new(StrategyHolder::with_strategies(
            Arc::new(ConfidenceBasedPrioritizer),
            Arc::new(SingleDeviceAssignment::new(&params.default_device_id)),
        ));
        let sm = build_state_machine(&params, strategies.clone());
        Self {
            sm,
            task_manager,
            strategies,
            params,
            target_seq: 0,
            last_status: None,
        }
    }

    pub fn task_manager(&self) -> &Arc<TaskManager> {
        &self.task_manager
    }

    pub fn strategies(&self) -> &Arc<StrategyHolder> {
        &self.strategies
    }

    pub fn params(&self) -> &TrackerParams {
        &self.params
    }

    /// Fires a state machine trigger, mirrors the resulting state into the
    /// context, then services any trigger requests hooks queued up.
    fn fire(&mut self, ctx: &mut AlgorithmContext, trigger: &str) -> bool {
        let fired = self.sm.try_trigger(ctx, trigger, None);
        ctx.current_state = self.sm.current().to_string();
        self.pump_triggers(ctx);
        fired
    }

    fn pump_triggers(&mut self, ctx: &mut AlgorithmContext) {
        for _ in 0..MAX_TRIGGER_ROUNDS {
            let requested = ctx.drain_triggers();
            if requested.is_empty() {
                return;
            }
            for trigger in requested {
                self.sm.try_trigger(ctx, &trigger, None);
                ctx.current_state = self.sm.current().to_string();
            }
        }
        warn!("trigger cascade exceeded bound, dropping remainder");
        ctx.drain_triggers();
    }

    // ------------------------------------------------------------------
    // Detection ingest
    // ------------------------------------------------------------------

    fn ingest_radar(&mut self, ctx: &mut AlgorithmContext, node_id: &str, radar: &RadarData) {
        let mut fed = false;
        for detection in &radar.detections {
            if detection.rcs <= self.params.min_rcs {
                continue;
            }
            let position = Vector3::new(
                detection.range * detection.azimuth.cos() * detection.elevation.cos(),
                detection.range * detection.azimuth.sin() * detection.elevation.cos(),
                detection.range * detection.elevation.sin(),
            );
            let target_id = self.associate_or_create(ctx, position);
            self.feed_target(ctx, &target_id, position, 0.8, node_id);
            fed = true;
        }

        let populated = ctx
            .get_ref::<HashMap<String, Target>>(TARGETS_KEY)
            .map_or(false, |t| !t.is_empty());
        if fed && populated {
            self.handle_trigger(ctx, "target_detected", None);
        }
    }

    fn ingest_lidar(&mut self, ctx: &mut AlgorithmContext, node_id: &str, lidar: &LidarData) {
        let clusters = cluster_points(&lidar.points, self.params.cluster_radius);
        for cluster in clusters {
            if cluster.len() < self.params.min_cluster_points {
                continue;
            }
            let mut centroid = Vector3::zeros();
            for &idx in &cluster {
                centroid += Vector3::from(lidar.points[idx]);
            }
            centroid /= cluster.len() as f32;

            let target_id = self.associate_or_create(ctx, centroid);
            self.feed_target(ctx, &target_id, centroid, 0.6, node_id);
        }
    }

    /// Finds the nearest target within the association radius, or creates a
    /// new one seeded at the detection position together with its tracking
    /// task.
    fn associate_or_create(&mut self, ctx: &mut AlgorithmContext, position: Vector3<f32>) -> String {
        let nearest = ctx.get_ref::<HashMap<String, Target>>(TARGETS_KEY).and_then(|targets| {
            let mut best: Option<(&String, f32)> = None;
            for (id, target) in targets {
                let distance = (target.position - position).norm();
                if distance < self.params.association_radius {
                    match best {
                        Some((_, top)) if distance >= top => {}
                        _ => best = Some((id, distance)),
                    }
                }
            }
            best.map(|(id, _)| id.clone())
        });
        if let Some(id) = nearest {
            return id;
        }

        let target_id = format!("target_{}", self.target_seq);
        self.target_seq += 1;

        // Seed at the detection position so later returns from the same
        // object fall inside the association radius.
        let mut target = Target::new(&target_id);
        target.position = position;

        let device = self
            .strategies
            .with_assignment(|a| a.select_for_task(&target, TaskType::TrackTarget, &self.task_manager, ctx))
            .map_err(|err| warn!(%err, "device selection unavailable"))
            .ok()
            .flatten()
            .or_else(|| ctx.get::<String>("default_device_id"));

        if let Some(targets) = ctx.get_mut::<HashMap<String, Target>>(TARGETS_KEY) {
            targets.insert(target_id.clone(), target);
        }

        let task_id = self.task_manager.create(&target_id, TaskType::TrackTarget, TaskPriority::High);
        match device {
            Some(device_id) => {
                self.task_manager.assign(&task_id, &device_id);
                info!(%target_id, %task_id, %device_id, "created tracking task for new target");
            }
            None => warn!(%target_id, %task_id, "no device available for tracking task"),
        }
        target_id
    }

    /// Smooths a target toward a new detection and refreshes its bookkeeping.
    fn feed_target(
        &self,
        ctx: &mut AlgorithmContext,
        target_id: &str,
        position: Vector3<f32>,
        confidence_boost: f32,
        sensor_id: &str,
    ) {
        let alpha = self.params.position_noise;
        let velocity_alpha = self.params.velocity_alpha;
        let Some(target) = ctx
            .get_mut::<HashMap<String, Target>>(TARGETS_KEY)
            .and_then(|targets| targets.get_mut(target_id))
        else {
            return;
        };

        let now = Instant::now();
        target.position = target.position * (1.0 - alpha) + position * alpha;

        if let Some(last) = target.last_update {
            let dt = now.duration_since(last).as_secs_f32();
            if dt > 0.0 {
                let estimate = (position - target.position) / dt;
                target.velocity = target.velocity * velocity_alpha + estimate * (1.0 - velocity_alpha);
            }
        }

        target.confidence = (target.confidence + confidence_boost).min(1.0);
        target.last_update = Some(now);
        *target.sensor_detections.entry(sensor_id.to_string()).or_insert(0) += 1;
    }

    // ------------------------------------------------------------------
    // Periodic housekeeping
    // ------------------------------------------------------------------

    fn evict_stale_targets(&self, ctx: &mut AlgorithmContext) {
        let cutoff = self.params.target_timeout * 2;
        let now = Instant::now();
        if let Some(targets) = ctx.get_mut::<HashMap<String, Target>>(TARGETS_KEY) {
            targets.retain(|id, target| {
                let keep = !target.is_stale(now, cutoff);
                if !keep {
                    info!(target_id = %id, "dropping silent target");
                }
                keep
            });
        }
    }

    fn refresh_detection_count(&self, ctx: &mut AlgorithmContext) {
        let threshold = self.params.lost_threshold;
        let count = ctx
            .get_ref::<HashMap<String, Target>>(TARGETS_KEY)
            .map_or(0, |targets| targets.values().filter(|t| t.confidence > threshold).count());
        ctx.set("detection_count", count);
    }

    fn maybe_send_status(&mut self, ctx: &mut AlgorithmContext) {
        let due = self.last_status.map_or(true, |at| at.elapsed() >= self.params.status_interval);
        if !due {
            return;
        }
        self.last_status = Some(Instant::now());

        let (count, mean_confidence) = ctx
            .get_ref::<HashMap<String, Target>>(TARGETS_KEY)
            .map_or((0, 0.0), |targets| {
                if targets.is_empty() {
                    (0, 0.0)
                } else {
                    let sum: f32 = targets.values().map(|t| t.confidence).sum();
                    (targets.len(), sum / targets.len() as f32)
                }
            });

        let result = FusionResult {
            algorithm_name: self.name().to_string(),
            result_type: "target_tracks".into(),
            confidence: mean_confidence,
            result_data: format!("targets={count} state={}", ctx.current_state),
        };
        ctx.emit(L2ToL1::broadcast(L2Payload::Fusion(result)));
    }

    fn apply_node_timeout(&self, ctx: &mut AlgorithmContext, node_id: &str) {
        if let Some(targets) = ctx.get_mut::<HashMap<String, Target>>(TARGETS_KEY) {
            for target in targets.values_mut() {
                if target.sensor_detections.remove(node_id).is_some() {
                    target.confidence *= 0.9;
                }
            }
        }
    }
}

impl Default for TargetTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl FusionAlgorithm for TargetTracker {
    fn name(&self) -> &str {
        "TargetTrackingAlgorithm"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn description(&self) -> &str {
        "Multi-sensor target tracking with state machine"
    }

    fn initialize(&mut self, ctx: &mut AlgorithmContext) {
        self.sm = build_state_machine(&self.params, self.strategies.clone());

        ctx.set(TARGETS_KEY, HashMap::<String, Target>::new());
        ctx.set("detection_count", 0usize);
        ctx.set("parameters", self.params.clone());

        // Single-device bring-up: one effector carrying the whole suite.
        let default_device = self.params.default_device_id.clone();
        self.task_manager.register_capabilities(
            &default_device,
            ["radar", "lidar", "camera", "gimbal_control"].map(String::from).to_vec(),
        );
        ctx.set("default_device_id", default_device);

        ctx.current_state = self.sm.initial().to_string();
        self.sm.enter_initial(ctx, None);
        info!(state = %ctx.current_state, "target tracker initialized");
    }

    fn process_message(&mut self, ctx: &mut AlgorithmContext, msg: &L1ToL2) {
        let Some(node_id) = msg.sender_id().map(str::to_string) else {
            debug!(message_id = %msg.message_id, "dropping anonymous message");
            return;
        };
        ctx.remember(&node_id, msg.clone());

        match &msg.payload {
            L1Payload::Sensor(SensorPayload::Radar(radar)) => self.ingest_radar(ctx, &node_id, radar),
            L1Payload::Sensor(SensorPayload::Lidar(lidar)) => self.ingest_lidar(ctx, &node_id, lidar),
            L1Payload::Sensor(_) => {
                // Camera/IMU/GPS are recorded in history only.
                debug!(%node_id, "sensor modality outside the tracker, history only");
            }
            L1Payload::Capability(advert) => {
                info!(%node_id, count = advert.capabilities.len(), "capability advertisement");
                self.task_manager.register_capabilities(&node_id, advert.capabilities.clone());
            }
            // Status and heartbeats are routed to the node registry upstream.
            L1Payload::Status(_) | L1Payload::Heartbeat => {}
        }
    }

    fn update(&mut self, ctx: &mut AlgorithmContext) {
        self.sm.run_update(ctx, None);
        ctx.current_state = self.sm.current().to_string();
        self.pump_triggers(ctx);

        self.task_manager.update_all(ctx);
        self.evict_stale_targets(ctx);
        self.refresh_detection_count(ctx);
        self.maybe_send_status(ctx);
        ctx.last_tick = Instant::now();
    }

    fn handle_trigger(&mut self, ctx: &mut AlgorithmContext, trigger: &str, data: Option<&str>) {
        match trigger {
            "reset" => {
                info!("resetting tracker state");
                ctx.set(TARGETS_KEY, HashMap::<String, Target>::new());
                ctx.set("detection_count", 0usize);
                self.fire(ctx, "reset");
            }
            "node_timeout" => match data {
                Some(node_id) => {
                    warn!(%node_id, "sensor node timed out");
                    self.apply_node_timeout(ctx, node_id);
                }
                None => error!("node_timeout trigger without a node id"),
            },
            "target_detected" => {
                self.fire(ctx, "detection");
            }
            "target_lost" => {
                self.fire(ctx, "lost");
            }
            other => {
                self.fire(ctx, other);
            }
        }
    }

    fn shutdown(&mut self, ctx: &mut AlgorithmContext) {
        ctx.emit(L2ToL1::broadcast(L2Payload::System(SystemCommand {
            command_type: SystemCommandType::Shutdown,
        })));
        info!("target tracker shut down");
    }
}

// ============================================================================
// STATE MACHINE
// ============================================================================

fn build_state_machine(params: &TrackerParams, strategies: Arc<StrategyHolder>) -> StateMachine {
    let mut sm = StateMachine::new();

    sm.add_state(
        State::new("IDLE")
            .on_enter(|ctx, _| {
                info!("entered IDLE state");
                ctx.set("scanning", true);
            })
            .on_update(|ctx, _| {
                if ctx.get::<usize>("detection_count").unwrap_or(0) > 0 {
                    ctx.request_trigger("detection");
                }
            }),
    );

    {
        let acquisition_threshold = params.acquisition_threshold;
        let min_sensor_consensus = params.min_sensor_consensus;
        let min_confidence_threshold = params.min_confidence_threshold;
        sm.add_state(
            State::new("ACQUIRING")
                .on_enter(|ctx, _| {
                    info!("entered ACQUIRING state");
                    ctx.set("acquisition_start", Instant::now());
                })
                .on_update(move |ctx, _| {
                    let mut confirmed = false;
                    if let Some(targets) = ctx.get_mut::<HashMap<String, Target>>(TARGETS_KEY) {
                        for target in targets.values_mut() {
                            if target.confidence > acquisition_threshold
                                && target.sensor_detections.len() >= min_sensor_consensus
                            {
                                target.confidence = (target.confidence + 0.1).min(1.0);
                                if target.confidence > min_confidence_threshold {
                                    confirmed = true;
                                }
                            }
                        }
                    }
                    if confirmed {
                        ctx.request_trigger("confirmed");
                    }
                }),
        );
    }

    {
        let enter_strategies = strategies.clone();
        let enter_coherent = params.coherent_device_id.clone();
        let update_strategies = strategies.clone();
        let update_coherent = params.coherent_device_id.clone();
        let target_timeout = params.target_timeout;
        let lost_threshold = params.lost_threshold;
        sm.add_state(
            State::new("TRACKING")
                .on_enter(move |ctx, _| {
                    info!("entered TRACKING state");
                    if let Some((target_id, position)) = best_target_brief(ctx, &enter_strategies, None) {
                        emit_gimbal_command(ctx, &enter_coherent, &target_id, position);
                    }
                })
                .on_update(move |ctx, _| {
                    let now = Instant::now();
                    let mut any_valid = false;
                    if let Some(targets) = ctx.get_mut::<HashMap<String, Target>>(TARGETS_KEY) {
                        for target in targets.values_mut() {
                            if target.is_stale(now, target_timeout) {
                                target.confidence *= 0.9;
                            }
                            if target.confidence > lost_threshold {
                                any_valid = true;
                            }
                        }
                    }
                    if any_valid {
                        if let Some((target_id, position)) =
                            best_target_brief(ctx, &update_strategies, Some(lost_threshold))
                        {
                            emit_gimbal_command(ctx, &update_coherent, &target_id, position);
                        }
                    } else {
                        ctx.request_trigger("lost");
                    }
                }),
        );
    }

    {
        let lost_linger = params.lost_linger;
        sm.add_state(
            State::new("LOST")
                .on_enter(|ctx, _| {
                    info!("entered LOST state");
                    ctx.set("lost_start", Instant::now());
                })
                .on_update(move |ctx, _| {
                    let expired = ctx
                        .get::<Instant>("lost_start")
                        .map_or(false, |start| start.elapsed() > lost_linger);
                    if expired {
                        ctx.request_trigger("timeout");
                    }
                }),
        );
    }

    sm.set_initial("IDLE");

    sm.add_transition(Transition::new("IDLE", "ACQUIRING", "detection"));
    sm.add_transition(Transition::new("ACQUIRING", "TRACKING", "confirmed"));
    sm.add_transition(Transition::new("ACQUIRING", "IDLE", "false_positive"));
    sm.add_transition(Transition::new("TRACKING", "LOST", "lost"));
    sm.add_transition(Transition::new("LOST", "TRACKING", "reacquired"));
    sm.add_transition(Transition::new("LOST", "IDLE", "timeout"));
    sm.add_transition(Transition::new("IDLE", "IDLE", "reset"));
    sm.add_transition(Transition::new("ACQUIRING", "IDLE", "reset"));
    sm.add_transition(Transition::new("TRACKING", "IDLE", "reset"));
    sm.add_transition(Transition::new("LOST", "IDLE", "reset"));

    sm
}

// ============================================================================
// HELPERS
// ============================================================================

/// Id and position of the prioritizer's best target, optionally restricted
/// to targets above a confidence floor.
fn best_target_brief(
    ctx: &AlgorithmContext,
    strategies: &StrategyHolder,
    min_confidence: Option<f32>,
) -> Option<(String, Vector3<f32>)> {
    let targets = ctx.get_ref::<HashMap<String, Target>>(TARGETS_KEY)?;
    let refs: Vec<&Target> = targets
        .values()
        .filter(|t| min_confidence.map_or(true, |floor| t.confidence > floor))
        .collect();
    if refs.is_empty() {
        return None;
    }
    match strategies.with_prioritizer(|p| p.best(&refs, ctx).map(|t| (t.target_id.clone(), t.position))) {
        Ok(best) => best,
        Err(err) => {
            warn!(%err, "cannot choose a pointing target");
            None
        }
    }
}

/// Emits a POINT_GIMBAL command aimed at `position`, addressed to the
/// coherent device. Skipped for targets at the origin, where the pointing
/// angles are undefined.
fn emit_gimbal_command(ctx: &mut AlgorithmContext, coherent_id: &str, target_id: &str, position: Vector3<f32>) {
    let range = position.norm();
    if range <= f32::EPSILON {
        debug!(%target_id, "target at origin, no pointing solution");
        return;
    }
    let theta = position.y.atan2(position.x);
    let phi = (position.z / range).asin();

    ctx.emit(L2ToL1::to_node(
        coherent_id,
        L2Payload::Control(ControlCommand {
            command_type: ControlCommandType::PointGimbal,
            target_position: GimbalAngles { theta, phi },
            target_rate_hz: 0.0,
        }),
    ));
    info!(%target_id, theta, phi, "tasking coherent device");
}

/// Single-link clustering: indices grouped so that every point sits within
/// `radius` of some other point in its cluster.
fn cluster_points(points: &[[f32; 3]], radius: f32) -> Vec<Vec<usize>> {
    let mut visited = vec![false; points.len()];
    let mut clusters = Vec::new();

    for seed in 0..points.len() {
        if visited[seed] {
            continue;
        }
        visited[seed] = true;
        let mut cluster = vec![seed];
        let mut frontier = VecDeque::from([seed]);

        while let Some(current) = frontier.pop_front() {
            let base = Vector3::from(points[current]);
            for (idx, point) in points.iter().enumerate() {
                if visited[idx] {
                    continue;
                }
                if (Vector3::from(*point) - base).norm() < radius {
                    visited[idx] = true;
                    cluster.push(idx);
                    frontier.push_back(idx);
                }
            }
        }
        clusters.push(cluster);
    }
    clusters
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task_manager::TaskStatus;
    use vantage_bus::messages::{NodeIdentity, NodeType, RadarDetection};

    fn radar_message(node_id: &str, seq: u64, range: f32, azimuth: f32, elevation: f32, rcs: f32) -> L1ToL2 {
        L1ToL2::new(
            format!("{node_id}_{seq}"),
            seq,
            NodeIdentity::new(node_id, NodeType::Radar, "pad-A"),
            L1Payload::Sensor(SensorPayload::Radar(RadarData {
                detections: vec![RadarDetection {
                    range,
                    azimuth,
                    elevation,
                    rcs,
                    velocity: 0.0,
                }],
            })),
        )
    }

    fn tracker() -> (TargetTracker, AlgorithmContext) {
        let mut tracker = TargetTracker::new();
        let mut ctx = AlgorithmContext::new();
        tracker.initialize(&mut ctx);
        (tracker, ctx)
    }

    fn tracker_with(params: TrackerParams) -> (TargetTracker, AlgorithmContext) {
        let mut tracker = TargetTracker::with_params(params);
        let mut ctx = AlgorithmContext::new();
        tracker.initialize(&mut ctx);
        (tracker, ctx)
    }

    fn targets(ctx: &AlgorithmContext) -> &HashMap<String, Target> {
        ctx.get_ref::<HashMap<String, Target>>(TARGETS_KEY).unwrap()
    }

    fn gimbal_commands(outputs: &[L2ToL1]) -> Vec<&L2ToL1> {
        outputs
            .iter()
            .filter(|m| {
                matches!(
                    &m.payload,
                    L2Payload::Control(cmd) if cmd.command_type == ControlCommandType::PointGimbal
                )
            })
            .collect()
    }

    #[test]
    fn test_initialize_enters_idle() {
        let (tracker, ctx) = tracker();
        assert_eq!(ctx.current_state, "IDLE");
        assert!(targets(&ctx).is_empty());
        assert_eq!(ctx.get::<usize>("detection_count"), Some(0));
        assert_eq!(
            tracker.task_manager().capabilities("default_device"),
            vec!["radar", "lidar", "camera", "gimbal_control"]
        );
    }

    #[test]
    fn test_radar_detection_creates_target_and_task() {
        let (mut tracker, mut ctx) = tracker();
        tracker.process_message(&mut ctx, &radar_message("radar_001", 0, 100.0, 0.0, 0.0, 1.0));

        let map = targets(&ctx);
        assert_eq!(map.len(), 1);
        let target = map.get("target_0").unwrap();
        assert!((target.position.x - 100.0).abs() < 1e-3);
        assert!((target.confidence - 0.8).abs() < 1e-6);
        assert_eq!(target.sensor_detections.get("radar_001"), Some(&1));

        let tasks = tracker.task_manager().tasks_for_target("target_0");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].task_type, TaskType::TrackTarget);
        assert_eq!(tasks[0].priority, TaskPriority::High);
        assert_eq!(tasks[0].status, TaskStatus::Assigned);
        assert_eq!(tasks[0].device_id, "default_device");
        assert_eq!(
            tracker.task_manager().primary_device("target_0").as_deref(),
            Some("default_device")
        );

        assert_eq!(ctx.current_state, "ACQUIRING", "detection moves IDLE to ACQUIRING");
    }

    #[test]
    fn test_small_rcs_returns_are_ignored() {
        let (mut tracker, mut ctx) = tracker();
        tracker.process_message(&mut ctx, &radar_message("radar_001", 0, 100.0, 0.0, 0.0, 0.05));
        assert!(targets(&ctx).is_empty());
        assert_eq!(ctx.current_state, "IDLE");
    }

    #[test]
    fn test_nearby_detections_associate() {
        let (mut tracker, mut ctx) = tracker();
        tracker.process_message(&mut ctx, &radar_message("radar_001", 0, 100.0, 0.0, 0.0, 1.0));
        tracker.process_message(&mut ctx, &radar_message("radar_002", 0, 101.0, 0.0, 0.0, 1.0));

        let map = targets(&ctx);
        assert_eq!(map.len(), 1, "detections within the association radius merge");
        let target = map.get("target_0").unwrap();
        assert_eq!(target.sensor_detections.len(), 2);
        assert_eq!(target.confidence, 1.0, "confidence boost saturates at 1");
    }

    #[test]
    fn test_distant_detection_spawns_second_target() {
        let (mut tracker, mut ctx) = tracker();
        tracker.process_message(&mut ctx, &radar_message("radar_001", 0, 100.0, 0.0, 0.0, 1.0));
        tracker.process_message(&mut ctx, &radar_message("radar_001", 1, 400.0, 0.0, 0.0, 1.0));

        let map = targets(&ctx);
        assert_eq!(map.len(), 2);
        assert!(map.contains_key("target_0"));
        assert!(map.contains_key("target_1"), "target ids come from a monotone counter");
    }

    #[test]
    fn test_consensus_confirms_and_points_gimbal() {
        let (mut tracker, mut ctx) = tracker();
        tracker.process_message(&mut ctx, &radar_message("radar_001", 0, 100.0, 0.0, 0.0, 1.0));
        tracker.process_message(&mut ctx, &radar_message("radar_002", 0, 100.5, 0.0, 0.0, 1.0));
        assert_eq!(ctx.current_state, "ACQUIRING");

        tracker.update(&mut ctx);
        assert_eq!(ctx.current_state, "TRACKING", "two-sensor consensus confirms the track");

        let outputs = ctx.drain_outputs();
        let commands = gimbal_commands(&outputs);
        assert!(!commands.is_empty(), "entering TRACKING points the gimbal");
        let command = commands[0];
        assert_eq!(command.target_node_id, "coherent_001");
        if let L2Payload::Control(cmd) = &command.payload {
            assert!(cmd.target_position.theta.abs() < 1e-6);
            assert!(cmd.target_position.phi.abs() < 1e-6);
        } else {
            unreachable!();
        }
    }

    #[test]
    fn test_single_sensor_does_not_confirm() {
        let (mut tracker, mut ctx) = tracker();
        tracker.process_message(&mut ctx, &radar_message("radar_001", 0, 100.0, 0.0, 0.0, 1.0));
        tracker.update(&mut ctx);
        assert_eq!(
            ctx.current_state, "ACQUIRING",
            "one sensor cannot meet the consensus requirement"
        );
    }

    #[test]
    fn test_lidar_cluster_becomes_target() {
        let (mut tracker, mut ctx) = tracker();

        let mut points: Vec<[f32; 3]> = (0..12)
            .map(|i| [50.0 + (i as f32) * 0.05, 10.0, 5.0])
            .collect();
        // Sparse stragglers below the cluster threshold.
        points.push([500.0, 0.0, 0.0]);
        points.push([600.0, 0.0, 0.0]);

        let msg = L1ToL2::new(
            "lidar_001_0",
            0,
            NodeIdentity::new("lidar_001", NodeType::Lidar, "pad-B"),
            L1Payload::Sensor(SensorPayload::Lidar(LidarData { points })),
        );
        tracker.process_message(&mut ctx, &msg);

        let map = targets(&ctx);
        assert_eq!(map.len(), 1, "only the dense cluster becomes a target");
        let target = map.values().next().unwrap();
        assert!((target.confidence - 0.6).abs() < 1e-6);
        assert!((target.position.y - 10.0).abs() < 0.5);
    }

    #[test]
    fn test_capability_advert_registers_device() {
        let (mut tracker, mut ctx) = tracker();
        let msg = L1ToL2::new(
            "coherent_001_0",
            0,
            NodeIdentity::new("coherent_001", NodeType::Coherent, "mast"),
            L1Payload::Capability(vantage_bus::messages::CapabilityAdvertisement {
                capabilities: vec!["coherent".into(), "gimbal_control".into()],
            }),
        );
        tracker.process_message(&mut ctx, &msg);
        assert_eq!(
            tracker.task_manager().capabilities("coherent_001"),
            vec!["coherent", "gimbal_control"]
        );
    }

    #[test]
    fn test_capability_assignment_strategy_routes_new_tasks() {
        let (mut tracker, mut ctx) = tracker();
        tracker
            .strategies()
            .set_assignment(Arc::new(crate::strategy::CapabilityBasedAssignment));

        // A beam director without sensors scores below the full default rig.
        tracker
            .task_manager()
            .register_capabilities("beam_009", vec!["coherent".into()]);

        tracker.process_message(&mut ctx, &radar_message("radar_001", 0, 100.0, 0.0, 0.0, 1.0));
        let tasks = tracker.task_manager().tasks_for_target("target_0");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].device_id, "default_device");
    }

    #[test]
    fn test_node_timeout_decays_confidence() {
        let (mut tracker, mut ctx) = tracker();
        tracker.process_message(&mut ctx, &radar_message("radar_001", 0, 100.0, 0.0, 0.0, 1.0));

        tracker.handle_trigger(&mut ctx, "node_timeout", Some("radar_001"));
        let target = targets(&ctx).get("target_0").unwrap();
        assert!((target.confidence - 0.72).abs() < 1e-6, "0.8 decays to 0.72");
        assert!(target.sensor_detections.is_empty());

        // A second timeout for the same node changes nothing.
        tracker.handle_trigger(&mut ctx, "node_timeout", Some("radar_001"));
        let target = targets(&ctx).get("target_0").unwrap();
        assert!((target.confidence - 0.72).abs() < 1e-6);
    }

    #[test]
    fn test_reset_returns_to_idle() {
        let (mut tracker, mut ctx) = tracker();
        tracker.process_message(&mut ctx, &radar_message("radar_001", 0, 100.0, 0.0, 0.0, 1.0));
        assert_eq!(ctx.current_state, "ACQUIRING");

        tracker.handle_trigger(&mut ctx, "reset", None);
        assert_eq!(ctx.current_state, "IDLE");
        assert!(targets(&ctx).is_empty());
        assert_eq!(ctx.get::<usize>("detection_count"), Some(0));
    }

    #[test]
    fn test_stale_targets_are_evicted() {
        let params = TrackerParams {
            target_timeout: Duration::from_millis(10),
            ..TrackerParams::default()
        };
        let (mut tracker, mut ctx) = tracker_with(params);
        tracker.process_message(&mut ctx, &radar_message("radar_001", 0, 100.0, 0.0, 0.0, 1.0));
        assert_eq!(targets(&ctx).len(), 1);

        std::thread::sleep(Duration::from_millis(30));
        tracker.update(&mut ctx);
        assert!(targets(&ctx).is_empty(), "silent targets vanish after twice the timeout");
    }

    #[test]
    fn test_decay_reaches_lost_then_idle() {
        let params = TrackerParams {
            target_timeout: Duration::from_millis(5),
            lost_linger: Duration::from_millis(10),
            ..TrackerParams::default()
        };
        let (mut tracker, mut ctx) = tracker_with(params);

        tracker.process_message(&mut ctx, &radar_message("radar_001", 0, 100.0, 0.0, 0.0, 1.0));
        tracker.process_message(&mut ctx, &radar_message("radar_002", 0, 100.5, 0.0, 0.0, 1.0));
        tracker.update(&mut ctx);
        assert_eq!(ctx.current_state, "TRACKING");

        // Starve the target; per-tick decay walks confidence below the lost
        // threshold well before eviction (eviction needs 2x timeout of
        // silence, but each update decays by 0.9 while stale).
        std::thread::sleep(Duration::from_millis(8));
        for _ in 0..15 {
            tracker.update(&mut ctx);
            if ctx.current_state == "LOST" {
                break;
            }
        }
        assert_eq!(ctx.current_state, "LOST");

        std::thread::sleep(Duration::from_millis(15));
        tracker.update(&mut ctx);
        assert_eq!(ctx.current_state, "IDLE", "lingering in LOST times out to IDLE");
    }

    #[test]
    fn test_status_results_are_periodic() {
        let params = TrackerParams {
            status_interval: Duration::ZERO,
            ..TrackerParams::default()
        };
        let (mut tracker, mut ctx) = tracker_with(params);
        tracker.process_message(&mut ctx, &radar_message("radar_001", 0, 100.0, 0.0, 0.0, 1.0));
        ctx.drain_outputs();

        tracker.update(&mut ctx);
        let outputs = ctx.drain_outputs();
        let status: Vec<_> = outputs
            .iter()
            .filter_map(|m| match &m.payload {
                L2Payload::Fusion(result) => Some(result),
                _ => None,
            })
            .collect();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].algorithm_name, "TargetTrackingAlgorithm");
        assert_eq!(status[0].result_type, "target_tracks");
        assert!((status[0].confidence - 0.8).abs() < 1e-6);
        assert!(status[0].result_data.contains("targets=1"));
    }

    #[test]
    fn test_shutdown_broadcasts_system_command() {
        let (mut tracker, mut ctx) = tracker();
        tracker.shutdown(&mut ctx);
        let outputs = ctx.drain_outputs();
        assert!(matches!(
            &outputs[0].payload,
            L2Payload::System(cmd) if cmd.command_type == SystemCommandType::Shutdown
        ));
        assert!(outputs[0].is_broadcast());
    }

    #[test]
    fn test_origin_target_emits_no_pointing_solution() {
        let mut ctx = AlgorithmContext::new();
        emit_gimbal_command(&mut ctx, "coherent_001", "target_0", Vector3::zeros());
        assert_eq!(ctx.pending_output_count(), 0);
    }

    #[test]
    fn test_cluster_points_groups_by_radius() {
        let points = vec![
            [0.0, 0.0, 0.0],
            [0.5, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [10.0, 0.0, 0.0],
        ];
        let clusters = cluster_points(&points, 0.9);
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0], vec![0, 1, 2], "chained links merge into one cluster");
        assert_eq!(clusters[1], vec![3]);
    }
}
