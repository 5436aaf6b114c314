//! Tracked target representation.

use nalgebra::Vector3;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// A maintained estimate of a real-world object under track.
///
/// Targets live in the algorithm context's typed store; the tracker smooths
/// position and velocity as detections arrive and decays confidence when
/// sensors go quiet.
#[derive(Debug, Clone)]
pub struct Target {
    pub target_id: String,
    /// Smoothed position in meters (controller-local Cartesian frame)
    pub position: Vector3<f32>,
    /// Smoothed velocity in m/s
    pub velocity: Vector3<f32>,
    /// Confidence score in [0, 1]
    pub confidence: f32,
    /// Monotonic time of the last detection feed; `None` until first fed
    pub last_update: Option<Instant>,
    /// Detection count per contributing sensor node
    pub sensor_detections: HashMap<String, u32>,
}

impl Target {
    pub fn new(target_id: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            position: Vector3::zeros(),
            velocity: Vector3::zeros(),
            confidence: 0.0,
            last_update: None,
            sensor_detections: HashMap::new(),
        }
    }

    /// Distance from the controller origin in meters.
    pub fn range(&self) -> f32 {
        self.position.norm()
    }

    /// Ground-frame speed in m/s.
    pub fn speed(&self) -> f32 {
        self.velocity.norm()
    }

    /// True when the target has not been fed within `timeout`.
    pub fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        match self.last_update {
            Some(t) => now.duration_since(t) > timeout,
            None => false,
        }
    }
}
