//! VANTAGE Simulation Harness
//!
//! Simulated L1 edge nodes plus a scenario runner that exercises the full
//! fusion pipeline in a single process: edge nodes publish detections of a
//! shared scene over the in-process bus, the controller fuses them into
//! tracks, and pointing commands flow back out.

pub mod node;
pub mod scenario;

pub use node::{spawn_edge_node, EdgeNodeConfig, EdgeNodeHandle, SCENE_OBJECTS};
pub use scenario::{run_scenario, ScenarioConfig, ScenarioReport};
