// registry.rs
//
// Authoritative in-memory state per device class plus the identity of the
// single connection currently allowed to mutate it. The registry is a plain
// struct; the hub guards it (together with the live connection set) behind
// one mutex so register/unregister/replace/broadcast form an atomic unit.

use std::collections::HashMap;

use chrono::Utc;

use crate::models::{
    ConnectionId, DeviceClass, IrrigationState, IrrigationTelemetry, RobotStatus, RobotTelemetry,
    RobotsState, ShutterChannels, ShuttersState,
};

#[derive(Default)]
pub struct DeviceRegistry {
    owners: HashMap<DeviceClass, ConnectionId>,
    shutters: ShuttersState,
    irrigation: IrrigationState,
    robots: HashMap<String, RobotStatus>,
    robots_bridge_connected: bool,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hard replace of the class ownership. Returns the identity of the
    /// previously registered connection when it differs, so the hub can
    /// force-close it before the new owner starts writing.
    pub fn register(&mut self, class: DeviceClass, id: ConnectionId) -> Option<ConnectionId> {
        let evicted = match self.owners.insert(class, id) {
            Some(prev) if prev != id => Some(prev),
            _ => None,
        };
        self.set_connected(class, true);
        evicted
    }

    /// Compare-and-clear: only takes effect when `id` matches the current
    /// owner. A late close event from an already-evicted connection must
    /// not wipe the newer registration's liveness flag.
    pub fn unregister(&mut self, class: DeviceClass, id: ConnectionId) -> bool {
        if self.owners.get(&class) != Some(&id) {
            return false;
        }
        let _ = self.owners.remove(&class);
        self.set_connected(class, false);
        true
    }

    pub fn is_owner(&self, class: DeviceClass, id: ConnectionId) -> bool {
        self.owners.get(&class) == Some(&id)
    }

    pub fn owner(&self, class: DeviceClass) -> Option<ConnectionId> {
        self.owners.get(&class).copied()
    }

    pub fn connected(&self, class: DeviceClass) -> bool {
        match class {
            DeviceClass::Shutters => self.shutters.connected,
            DeviceClass::Irrigation => self.irrigation.connected,
            DeviceClass::Robots => self.robots_bridge_connected,
        }
    }

    fn set_connected(&mut self, class: DeviceClass, connected: bool) {
        let now = Utc::now();
        match class {
            DeviceClass::Shutters => {
                self.shutters.connected = connected;
                self.shutters.last_update = now;
            }
            DeviceClass::Irrigation => {
                self.irrigation.connected = connected;
                self.irrigation.last_update = now;
            }
            DeviceClass::Robots => {
                self.robots_bridge_connected = connected;
                // Stale telemetry must not be displayed as live once the
                // bridge is gone.
                if !connected {
                    for status in self.robots.values_mut() {
                        status.connected = false;
                        status.last_update = now;
                    }
                }
            }
        }
    }

    /// Wholesale overwrite of the shutters channels, stamping a fresh
    /// timestamp. No partial-field merge, no validation: whatever was sent
    /// becomes the new state. Returns the committed snapshot.
    pub fn replace_shutters(&mut self, channels: ShutterChannels) -> ShuttersState {
        self.shutters = ShuttersState {
            s1: channels.s1,
            s2: channels.s2,
            s3: channels.s3,
            s4: channels.s4,
            connected: self.shutters.connected,
            last_update: Utc::now(),
        };
        self.shutters
    }

    pub fn replace_irrigation(&mut self, telemetry: IrrigationTelemetry) -> IrrigationState {
        self.irrigation = IrrigationState {
            active: telemetry.active,
            duration: telemetry.duration,
            elapsed: telemetry.elapsed,
            progress: telemetry.progress,
            connected: self.irrigation.connected,
            last_update: Utc::now(),
        };
        self.irrigation
    }

    /// Wholesale replacement of the robot map from a bridge-device push.
    pub fn replace_robots(
        &mut self,
        telemetry: HashMap<String, RobotTelemetry>,
    ) -> HashMap<String, RobotStatus> {
        self.robots = telemetry
            .into_iter()
            .map(|(id, t)| (id, RobotStatus::from_telemetry(t, true)))
            .collect();
        self.robots.clone()
    }

    /// Single-unit update from the robot subsystem's poll/push cycle.
    /// Converges on the same mapping as the bridge-device path.
    pub fn upsert_robot(&mut self, id: &str, status: RobotStatus) -> HashMap<String, RobotStatus> {
        let _ = self.robots.insert(id.to_string(), status);
        self.robots.clone()
    }

    pub fn set_robot_connected(
        &mut self,
        id: &str,
        connected: bool,
    ) -> HashMap<String, RobotStatus> {
        let entry = self
            .robots
            .entry(id.to_string())
            .or_insert_with(RobotStatus::disconnected);
        entry.connected = connected;
        if !connected {
            entry.phase = "disconnected".to_string();
        }
        entry.last_update = Utc::now();
        self.robots.clone()
    }

    pub fn snapshot_shutters(&self) -> ShuttersState {
        self.shutters
    }

    pub fn snapshot_irrigation(&self) -> IrrigationState {
        self.irrigation
    }

    pub fn snapshot_robots(&self) -> RobotsState {
        RobotsState {
            robots: self.robots.clone(),
            connected: self.robots_bridge_connected,
        }
    }

    pub fn robot_status(&self, id: &str) -> Option<RobotStatus> {
        self.robots.get(id).cloned()
    }
}
