//! Pluggable target-prioritization and device-assignment strategies.
//!
//! Strategies are trait objects swappable at runtime. The holder hands them
//! out through scoped closures only: the reader clones a shared-ownership
//! handle under the lock, releases the lock, then invokes the closure. A
//! concurrent swap can install a replacement at any time, but the handle
//! keeps the observed strategy alive for the full closure, so no reader ever
//! sees a dangling or torn strategy.

use crate::context::AlgorithmContext;
use crate::target::Target;
use crate::task_manager::{TaskManager, TaskType};
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Strategy access failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StrategyError {
    #[error("no prioritizer installed")]
    PrioritizerMissing,
    #[error("no device assignment strategy installed")]
    AssignmentMissing,
}

// ============================================================================
// TRAITS
// ============================================================================

/// Selects which target deserves attention next.
pub trait Prioritizer: Send + Sync {
    /// Priority score for one target, in [0, 1].
    fn priority(&self, target: &Target, ctx: &AlgorithmContext) -> f32;

    /// Stable sort, highest priority first. Equal-priority targets keep
    /// their incoming order.
    fn sort<'a>(&self, targets: &mut Vec<&'a Target>, ctx: &AlgorithmContext) {
        targets.sort_by(|a, b| {
            self.priority(b, ctx)
                .partial_cmp(&self.priority(a, ctx))
                .unwrap_or(Ordering::Equal)
        });
    }

    /// Highest-priority target; the first of equals wins. `None` when empty.
    fn best<'a>(&self, targets: &[&'a Target], ctx: &AlgorithmContext) -> Option<&'a Target> {
        let mut best: Option<(&'a Target, f32)> = None;
        for target in targets {
            let score = self.priority(target, ctx);
            match best {
                Some((_, top)) if score <= top => {}
                _ => best = Some((target, score)),
            }
        }
        best.map(|(t, _)| t)
    }

    fn name(&self) -> &str;
}

/// Selects which device should perform a task.
pub trait DeviceAssignment: Send + Sync {
    /// Best device for tracking work on a target; `None` when nothing fits.
    fn select_for_target(&self, target: &Target, tasks: &TaskManager, ctx: &AlgorithmContext) -> Option<String>;

    /// Best device for a specific task type.
    fn select_for_task(
        &self,
        target: &Target,
        task_type: TaskType,
        tasks: &TaskManager,
        ctx: &AlgorithmContext,
    ) -> Option<String>;

    /// Fitness of a device for a target, in [0, 1].
    fn suitability(&self, device_id: &str, target: &Target, tasks: &TaskManager, ctx: &AlgorithmContext) -> f32;

    fn name(&self) -> &str;
}

// ============================================================================
// HOLDER
// ============================================================================

/// Thread-safe slot pair for the installed strategies.
#[derive(Default)]
pub struct StrategyHolder {
    prioritizer: RwLock<Option<Arc<dyn Prioritizer>>>,
    assignment: RwLock<Option<Arc<dyn DeviceAssignment>>>,
}

impl StrategyHolder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Holder preloaded with the given strategies.
    pub fn with_strategies(prioritizer: Arc<dyn Prioritizer>, assignment: Arc<dyn DeviceAssignment>) -> Self {
        let holder = Self::new();
        holder.set_prioritizer(prioritizer);
        holder.set_assignment(assignment);
        holder
    }

    pub fn set_prioritizer(&self, prioritizer: Arc<dyn Prioritizer>) {
        debug!(name = prioritizer.name(), "installing prioritizer");
        *self.prioritizer.write() = Some(prioritizer);
    }

    pub fn set_assignment(&self, assignment: Arc<dyn DeviceAssignment>) {
        debug!(name = assignment.name(), "installing device assignment strategy");
        *self.assignment.write() = Some(assignment);
    }

    /// Runs `f` against the installed prioritizer. The reader claim (a
    /// cloned handle) outlives the lock, not the other way around, so a swap
    /// during `f` cannot invalidate the observed strategy.
    pub fn with_prioritizer<R>(&self, f: impl FnOnce(&dyn Prioritizer) -> R) -> Result<R, StrategyError> {
        let handle = self.prioritizer.read().as_ref().cloned();
        let prioritizer = handle.ok_or(StrategyError::PrioritizerMissing)?;
        Ok(f(prioritizer.as_ref()))
    }

    /// Runs `f` against the installed device assignment strategy.
    pub fn with_assignment<R>(&self, f: impl FnOnce(&dyn DeviceAssignment) -> R) -> Result<R, StrategyError> {
        let handle = self.assignment.read().as_ref().cloned();
        let assignment = handle.ok_or(StrategyError::AssignmentMissing)?;
        Ok(f(assignment.as_ref()))
    }

    pub fn prioritizer_name(&self) -> Option<String> {
        self.prioritizer.read().as_ref().map(|p| p.name().to_string())
    }

    pub fn assignment_name(&self) -> Option<String> {
        self.assignment.read().as_ref().map(|a| a.name().to_string())
    }
}

// ============================================================================
// CONFIDENCE-BASED PRIORITIZER
// ============================================================================

/// Priority equals the target's confidence. The simplest useful policy.
pub struct ConfidenceBasedPrioritizer;

impl Prioritizer for ConfidenceBasedPrioritizer {
    fn priority(&self, target: &Target, _ctx: &AlgorithmContext) -> f32 {
        target.confidence
    }

    fn name(&self) -> &str {
        "ConfidenceBasedPrioritizer"
    }
}

// ============================================================================
// THREAT-BASED PRIORITIZER
// ============================================================================

/// Weights for the threat composite. Defaults are a reasonable starting
/// point; treat them as tunable.
#[derive(Debug, Clone, Copy)]
pub struct ThreatWeights {
    pub w_range: f32,
    pub w_velocity: f32,
    pub w_confidence: f32,
    pub w_heading: f32,
}

impl Default for ThreatWeights {
    fn default() -> Self {
        Self {
            w_range: 0.3,
            w_velocity: 0.2,
            w_confidence: 0.3,
            w_heading: 0.2,
        }
    }
}

/// Composite threat score: proximity, speed, detection confidence, and
/// closing geometry.
pub struct ThreatBasedPrioritizer {
    weights: ThreatWeights,
}

impl ThreatBasedPrioritizer {
    pub fn new(weights: ThreatWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> ThreatWeights {
        self.weights
    }
}

impl Default for ThreatBasedPrioritizer {
    fn default() -> Self {
        Self::new(ThreatWeights::default())
    }
}

impl Prioritizer for ThreatBasedPrioritizer {
    fn priority(&self, target: &Target, _ctx: &AlgorithmContext) -> f32 {
        let range = target.range();
        let speed = target.speed();

        // Closer targets score higher; at the origin the score saturates.
        let range_score = if range > 0.0 { (-range / 100.0).exp() } else { 1.0 };

        // Normalized against a 50 m/s reference speed.
        let velocity_score = (speed / 50.0).min(1.0);

        let confidence_score = target.confidence;

        // Fraction of the velocity pointing back at the origin. Undefined
        // when either vector is zero; scores 0 in that case.
        let heading_score = if range > 0.0 && speed > 0.0 {
            let closing = -target.velocity.dot(&target.position) / (range * speed);
            closing.max(0.0)
        } else {
            0.0
        };

        let priority = self.weights.w_range * range_score
            + self.weights.w_velocity * velocity_score
            + self.weights.w_confidence * confidence_score
            + self.weights.w_heading * heading_score;
        priority.clamp(0.0, 1.0)
    }

    fn name(&self) -> &str {
        "ThreatBasedPrioritizer"
    }
}

// ============================================================================
// SINGLE-DEVICE ASSIGNMENT
// ============================================================================

/// Routes every task to one fixed device. Single-effector deployments.
pub struct SingleDeviceAssignment {
    device_id: String,
}

impl SingleDeviceAssignment {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
        }
    }
}

impl DeviceAssignment for SingleDeviceAssignment {
    fn select_for_target(&self, _target: &Target, _tasks: &TaskManager, _ctx: &AlgorithmContext) -> Option<String> {
        Some(self.device_id.clone())
    }

    fn select_for_task(
        &self,
        _target: &Target,
        _task_type: TaskType,
        _tasks: &TaskManager,
        _ctx: &AlgorithmContext,
    ) -> Option<String> {
        Some(self.device_id.clone())
    }

    fn suitability(&self, device_id: &str, _target: &Target, _tasks: &TaskManager, _ctx: &AlgorithmContext) -> f32 {
        if device_id == self.device_id {
            1.0
        } else {
            0.0
        }
    }

    fn name(&self) -> &str {
        "SingleDeviceAssignment"
    }
}

// ============================================================================
// CAPABILITY-BASED ASSIGNMENT
// ============================================================================

/// Matches tasks to devices by advertised capability tags.
pub struct CapabilityBasedAssignment;

impl CapabilityBasedAssignment {
    /// Capability tags that qualify a device for a task type. A device needs
    /// at least one; an empty set means any device qualifies.
    fn required_for(task_type: TaskType) -> &'static [&'static str] {
        match task_type {
            TaskType::TrackTarget => &["radar", "lidar", "camera", "gimbal_control"],
            TaskType::ScanArea => &["radar", "lidar", "camera"],
            TaskType::PointGimbal => &["gimbal_control", "coherent"],
            TaskType::CalibrateSensor => &["calibration"],
            TaskType::MonitorStatus => &[],
        }
    }

    fn qualifies(capabilities: &[String], required: &[&str]) -> bool {
        required.is_empty() || capabilities.iter().any(|c| required.contains(&c.as_str()))
    }
}

impl DeviceAssignment for CapabilityBasedAssignment {
    fn select_for_target(&self, target: &Target, tasks: &TaskManager, ctx: &AlgorithmContext) -> Option<String> {
        self.select_for_task(target, TaskType::TrackTarget, tasks, ctx)
    }

    fn select_for_task(
        &self,
        target: &Target,
        task_type: TaskType,
        tasks: &TaskManager,
        ctx: &AlgorithmContext,
    ) -> Option<String> {
        let required = Self::required_for(task_type);
        let mut best: Option<(String, f32)> = None;
        // known_devices() is sorted, so strict improvement keeps the
        // lexicographically first device among score ties.
        for device_id in tasks.known_devices() {
            if !Self::qualifies(&tasks.capabilities(&device_id), required) {
                continue;
            }
            let score = self.suitability(&device_id, target, tasks, ctx);
            match &best {
                Some((_, top)) if score <= *top => {}
                _ => best = Some((device_id, score)),
            }
        }
        best.map(|(id, _)| id)
    }

    fn suitability(&self, device_id: &str, target: &Target, tasks: &TaskManager, _ctx: &AlgorithmContext) -> f32 {
        let capabilities = tasks.capabilities(device_id);
        if capabilities.is_empty() {
            return 0.0;
        }

        let has = |tag: &str| capabilities.iter().any(|c| c == tag);
        let has_sensor = has("radar") || has("lidar") || has("camera");
        let has_gimbal = has("gimbal_control") || has("coherent");

        let mut score: f32 = 0.0;
        if has_sensor {
            score += 0.5;
        }
        if has_gimbal {
            score += 0.5;
        }
        // Beam directors get a bonus on high-confidence tracks.
        if has("coherent") && target.confidence > 0.8 {
            score += 0.2;
        }
        score.min(1.0)
    }

    fn name(&self) -> &str {
        "CapabilityBasedAssignment"
    }
}
