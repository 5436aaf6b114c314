//! VANTAGE Core - Level-2 Sensor Fusion Controller Runtime
//!
//! The in-process runtime of a distributed sensing network's fusion tier:
//! 1. **Concurrency substrate**: worker pool over a bounded ingress queue,
//!    periodic algorithm tick, heartbeat emitter, and node-liveness monitor
//! 2. **Node registry**: atomic liveness tracking with check-and-remove expiry
//! 3. **Algorithm framework**: typed context, declarative state machines, a
//!    task manager owning per-task sub-machines, and runtime-swappable
//!    prioritization/assignment strategies
//! 4. **Target tracker**: the reference algorithm instantiation, from
//!    detection ingest through track lifecycle to gimbal command emission

pub mod algorithm;
pub mod context;
pub mod manager;
pub mod registry;
pub mod state_machine;
pub mod strategy;
pub mod target;
pub mod task_manager;
pub mod tracker;

// Re-export key types for convenience
pub use algorithm::{AlgorithmRegistry, FusionAlgorithm};
pub use context::AlgorithmContext;
pub use manager::{FusionConfig, FusionManager, ManagerError, ManagerStats};
pub use registry::NodeRegistry;
pub use state_machine::{State, StateMachine, Transition};
pub use strategy::{
    CapabilityBasedAssignment, ConfidenceBasedPrioritizer, DeviceAssignment, Prioritizer, SingleDeviceAssignment,
    StrategyError, StrategyHolder, ThreatBasedPrioritizer, ThreatWeights,
};
pub use target::Target;
pub use task_manager::{Task, TaskManager, TaskPriority, TaskSnapshot, TaskStats, TaskStatus, TaskType};
pub use tracker::{TargetTracker, TrackerParams};
