// models.rs

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::history::HistorySink;
use crate::hub::Hub;
use crate::robots::RobotSubsystem;

/// The physical subsystems this hub relays for. Exactly one live
/// authoritative device connection is permitted per class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Shutters,
    Irrigation,
    Robots,
}

impl std::fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Shutters => f.write_str("shutters"),
            Self::Irrigation => f.write_str("irrigation"),
            Self::Robots => f.write_str("robots"),
        }
    }
}

/// Opaque identity handed out at connection creation, compared by value.
/// Independent of any transport handle, so a late close event from an
/// already-evicted connection can be told apart from the current owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// One shutter channel: position in percent and movement direction
/// (0 stopped, 1 opening, 2 closing).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ShutterChannel {
    pub pos: u8,
    pub dir: u8,
}

/// Raw shutters payload as pushed by the device. Whatever the device sends
/// becomes the new state verbatim; missing channels default to zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutterChannels {
    pub s1: ShutterChannel,
    pub s2: ShutterChannel,
    pub s3: ShutterChannel,
    pub s4: ShutterChannel,
}

/// Authoritative shutters snapshot held by the registry and broadcast to
/// controllers. `connected` is the liveness flag of the shutters device
/// connection, `last_update` is stamped on every wholesale replacement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShuttersState {
    pub s1: ShutterChannel,
    pub s2: ShutterChannel,
    pub s3: ShutterChannel,
    pub s4: ShutterChannel,
    pub connected: bool,
    #[schema(value_type = String)]
    pub last_update: DateTime<Utc>,
}

impl Default for ShuttersState {
    fn default() -> Self {
        Self {
            s1: ShutterChannel::default(),
            s2: ShutterChannel::default(),
            s3: ShutterChannel::default(),
            s4: ShutterChannel::default(),
            connected: false,
            last_update: Utc::now(),
        }
    }
}

/// Raw irrigation telemetry as pushed by the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IrrigationTelemetry {
    pub active: bool,
    pub duration: u64,
    pub elapsed: u64,
    pub progress: f32,
}

/// Authoritative irrigation snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IrrigationState {
    pub active: bool,
    pub duration: u64,
    pub elapsed: u64,
    pub progress: f32,
    pub connected: bool,
    #[schema(value_type = String)]
    pub last_update: DateTime<Utc>,
}

impl Default for IrrigationState {
    fn default() -> Self {
        Self {
            active: false,
            duration: 0,
            elapsed: 0,
            progress: 0.0,
            connected: false,
            last_update: Utc::now(),
        }
    }
}

/// Raw per-robot telemetry, from the bridge device channel or the vendor
/// poll cycle. Both paths converge on the same [`RobotStatus`] mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RobotTelemetry {
    pub battery: u8,
    pub phase: Option<String>,
    pub cycle: Option<String>,
    pub error: Option<String>,
    pub position: Option<serde_json::Value>,
    pub bin_full: Option<bool>,
}

/// Last known status of one robot unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RobotStatus {
    pub battery: u8,
    pub phase: String,
    pub connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub position: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bin_full: Option<bool>,
    #[schema(value_type = String)]
    pub last_update: DateTime<Utc>,
}

impl RobotStatus {
    /// Placeholder for a unit we know about but have never heard from.
    pub fn disconnected() -> Self {
        Self {
            battery: 0,
            phase: "disconnected".to_string(),
            connected: false,
            cycle: None,
            error: None,
            position: None,
            bin_full: None,
            last_update: Utc::now(),
        }
    }

    pub fn from_telemetry(telemetry: RobotTelemetry, connected: bool) -> Self {
        Self {
            battery: telemetry.battery,
            phase: telemetry.phase.unwrap_or_else(|| "unknown".to_string()),
            connected,
            cycle: telemetry.cycle,
            error: telemetry.error,
            position: telemetry.position,
            bin_full: telemetry.bin_full,
            last_update: Utc::now(),
        }
    }
}

/// Snapshot of the whole robots class: the per-unit map plus the liveness
/// flag of the robot bridge device connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RobotsState {
    pub robots: HashMap<String, RobotStatus>,
    pub connected: bool,
}

/// Shared state handed to every HTTP and WebSocket handler.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub robots: Arc<RobotSubsystem>,
    pub history: Arc<dyn HistorySink>,
}
