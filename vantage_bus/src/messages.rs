//! Wire schema for the L1 (edge node) / L2 (fusion controller) link.
//!
//! Every record is a plain serde struct; on the wire a record travels as a
//! length-prefixed frame (u32 little-endian byte count followed by a bincode
//! body). The codec lives at the bottom of this module.

use crate::error::BusError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

// ============================================================================
// NODE IDENTITY & STATUS
// ============================================================================

/// Kind of edge node publishing into the fusion network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    Radar,
    Lidar,
    Camera,
    Imu,
    Gps,
    /// Beam-director effector accepting gimbal pointing commands
    Coherent,
    /// Placeholder for nodes whose advertisement has not arrived yet
    Unknown,
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Radar => "radar",
            Self::Lidar => "lidar",
            Self::Camera => "camera",
            Self::Imu => "imu",
            Self::Gps => "gps",
            Self::Coherent => "coherent",
            Self::Unknown => "unknown",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "radar" => Ok(Self::Radar),
            "lidar" => Ok(Self::Lidar),
            "camera" => Ok(Self::Camera),
            "imu" => Ok(Self::Imu),
            "gps" => Ok(Self::Gps),
            "coherent" => Ok(Self::Coherent),
            other => Err(format!("unknown node type: {other}")),
        }
    }
}

/// Identity of an edge node. Immutable after first observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub node_id: String,
    pub node_type: NodeType,
    pub location: String,
    pub metadata: HashMap<String, String>,
}

impl NodeIdentity {
    pub fn new(node_id: impl Into<String>, node_type: NodeType, location: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            node_type,
            location: location.into(),
            metadata: HashMap::new(),
        }
    }

    /// Minimal identity for a node known only by id (heartbeat raced the
    /// capability advertisement).
    pub fn unknown(node_id: impl Into<String>) -> Self {
        Self::new(node_id, NodeType::Unknown, "")
    }
}

/// Operational health of an edge node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationalState {
    Online,
    Offline,
    Degraded,
}

/// Self-reported status record from an edge node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub node_id: String,
    pub operational: OperationalState,
    pub cpu_usage: f32,
    pub memory_usage: f32,
}

// ============================================================================
// SENSOR PAYLOADS
// ============================================================================

/// A single radar return.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RadarDetection {
    /// Slant range in meters
    pub range: f32,
    /// Azimuth in radians
    pub azimuth: f32,
    /// Elevation in radians
    pub elevation: f32,
    /// Radar cross-section estimate
    pub rcs: f32,
    /// Radial velocity in m/s
    pub velocity: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadarData {
    pub detections: Vec<RadarDetection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LidarData {
    /// Point cloud in sensor-local Cartesian coordinates
    pub points: Vec<[f32; 3]>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub encoding: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImuData {
    pub accel: [f32; 3],
    pub gyro: [f32; 3],
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsData {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

/// One sensor reading, tagged by modality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SensorPayload {
    Radar(RadarData),
    Lidar(LidarData),
    Image(ImageData),
    Imu(ImuData),
    Gps(GpsData),
}

/// Capabilities an edge node offers to the task manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityAdvertisement {
    pub capabilities: Vec<String>,
}

// ============================================================================
// L1 -> L2
// ============================================================================

/// Payload cases for edge-to-controller traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum L1Payload {
    Sensor(SensorPayload),
    Status(NodeStatus),
    Heartbeat,
    Capability(CapabilityAdvertisement),
}

/// Message from an edge node to the fusion controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct L1ToL2 {
    pub message_id: String,
    pub sequence_number: u64,
    pub sender: Option<NodeIdentity>,
    pub timestamp_ms: u64,
    pub payload: L1Payload,
}

impl L1ToL2 {
    pub fn new(message_id: impl Into<String>, sequence_number: u64, sender: NodeIdentity, payload: L1Payload) -> Self {
        Self {
            message_id: message_id.into(),
            sequence_number,
            sender: Some(sender),
            timestamp_ms: now_ms(),
            payload,
        }
    }

    /// Node id of the sender, if any.
    pub fn sender_id(&self) -> Option<&str> {
        self.sender.as_ref().map(|s| s.node_id.as_str())
    }
}

// ============================================================================
// L2 -> L1
// ============================================================================

/// Commanded gimbal pointing angles in radians.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GimbalAngles {
    /// Azimuth
    pub theta: f32,
    /// Elevation
    pub phi: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlCommandType {
    StartSensor,
    StopSensor,
    ChangeRate,
    PointGimbal,
    Calibrate,
    Reset,
}

/// Device control command from the fusion controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlCommand {
    pub command_type: ControlCommandType,
    pub target_position: GimbalAngles,
    pub target_rate_hz: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationUpdate {
    pub parameters: HashMap<String, String>,
}

/// Periodic summary of the fusion algorithm's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionResult {
    pub algorithm_name: String,
    pub result_type: String,
    pub confidence: f32,
    pub result_data: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemCommandType {
    Shutdown,
    Restart,
    SyncTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemCommand {
    pub command_type: SystemCommandType,
}

/// Payload cases for controller-to-edge traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum L2Payload {
    Control(ControlCommand),
    Configuration(ConfigurationUpdate),
    Fusion(FusionResult),
    System(SystemCommand),
}

/// Message from the fusion controller to one edge node (or broadcast when
/// `target_node_id` is empty).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct L2ToL1 {
    pub message_id: String,
    pub timestamp_ms: u64,
    pub target_node_id: String,
    pub payload: L2Payload,
}

impl L2ToL1 {
    /// Message addressed to a single node. The message id is stamped by the
    /// publishing side's instance-local counter.
    pub fn to_node(target_node_id: impl Into<String>, payload: L2Payload) -> Self {
        Self {
            message_id: String::new(),
            timestamp_ms: now_ms(),
            target_node_id: target_node_id.into(),
            payload,
        }
    }

    /// Broadcast message (empty target node id).
    pub fn broadcast(payload: L2Payload) -> Self {
        Self::to_node("", payload)
    }

    pub fn is_broadcast(&self) -> bool {
        self.target_node_id.is_empty()
    }
}

// ============================================================================
// FRAME CODEC
// ============================================================================

/// Wall-clock milliseconds since the Unix epoch, for packet timestamps.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Encodes a record as a length-prefixed frame.
pub fn encode_frame<T: Serialize>(record: &T) -> Result<Vec<u8>, BusError> {
    let body = bincode::serialize(record).map_err(BusError::codec)?;
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decodes a length-prefixed frame back into a record.
pub fn decode_frame<T: DeserializeOwned>(frame: &[u8]) -> Result<T, BusError> {
    if frame.len() < 4 {
        return Err(BusError::Codec("frame shorter than length prefix".into()));
    }
    let len = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
    let body = &frame[4..];
    if body.len() < len {
        return Err(BusError::Codec(format!(
            "truncated frame: prefix says {len} bytes, got {}",
            body.len()
        )));
    }
    bincode::deserialize(&body[..len]).map_err(BusError::codec)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn radar_message() -> L1ToL2 {
        L1ToL2::new(
            "radar_001_0",
            0,
            NodeIdentity::new("radar_001", NodeType::Radar, "pad-A"),
            L1Payload::Sensor(SensorPayload::Radar(RadarData {
                detections: vec![RadarDetection {
                    range: 100.0,
                    azimuth: 0.0,
                    elevation: 0.0,
                    rcs: 1.0,
                    velocity: 0.0,
                }],
            })),
        )
    }

    #[test]
    fn test_frame_round_trip() {
        let msg = radar_message();
        let frame = encode_frame(&msg).unwrap();
        let back: L1ToL2 = decode_frame(&frame).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_decode_rejects_short_frame() {
        assert!(decode_frame::<L1ToL2>(&[1, 2]).is_err());
    }

    #[test]
    fn test_decode_rejects_truncated_body() {
        let msg = radar_message();
        let mut frame = encode_frame(&msg).unwrap();
        frame.truncate(frame.len() - 3);
        assert!(decode_frame::<L1ToL2>(&frame).is_err());
    }

    #[test]
    fn test_broadcast_has_empty_target() {
        let msg = L2ToL1::broadcast(L2Payload::System(SystemCommand {
            command_type: SystemCommandType::SyncTime,
        }));
        assert!(msg.is_broadcast());

        let addressed = L2ToL1::to_node("coherent_001", L2Payload::System(SystemCommand {
            command_type: SystemCommandType::Shutdown,
        }));
        assert!(!addressed.is_broadcast());
    }

    #[test]
    fn test_node_type_parse() {
        assert_eq!("radar".parse::<NodeType>().unwrap(), NodeType::Radar);
        assert_eq!("coherent".parse::<NodeType>().unwrap(), NodeType::Coherent);
        assert!("plasma".parse::<NodeType>().is_err());
    }
}
