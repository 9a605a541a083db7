// hub/mod.rs
//
// The connection hub: classifies persistent connections as device or
// controller, enforces single-owner device registration per class, routes
// messages and fans state changes out to controllers.
//
// All registry and connection-set mutations, including the broadcast
// dispatch that follows a write, happen inside one mutex so that a
// register-then-broadcast sequence can never interleave with a concurrent
// unregister of the same class. Critical sections never await; broadcast
// delivery only enqueues into per-connection unbounded channels.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::auth::AuthGate;
use crate::error::HubError;
use crate::history::{HistoryRecord, HistoryScope, HistorySink};
use crate::messages::{ControllerMessage, DeviceMessage, HubToController, HubToDevice};
use crate::models::{
    ConnectionId, DeviceClass, IrrigationState, IrrigationTelemetry, RobotTelemetry, RobotsState,
    ShutterChannels, ShuttersState,
};
use crate::registry::DeviceRegistry;
use crate::robots::{RobotEvent, RobotSubsystem};

/// What the hub pushes into a device connection's outbound queue.
#[derive(Debug, Clone, PartialEq)]
pub enum DevicePush {
    Message(HubToDevice),
    /// Eviction by a newer registration; the socket task must close.
    Close,
}

/// Per-class liveness summary for the health endpoint.
pub struct HubHealth {
    pub shutters_connected: bool,
    pub irrigation_connected: bool,
    pub robots_connected: bool,
    pub last_update: DateTime<Utc>,
}

struct HubInner {
    registry: DeviceRegistry,
    controllers: HashMap<ConnectionId, mpsc::UnboundedSender<HubToController>>,
    devices: HashMap<ConnectionId, mpsc::UnboundedSender<DevicePush>>,
}

pub struct Hub {
    auth: AuthGate,
    history: Arc<dyn HistorySink>,
    subsystem: OnceLock<Arc<RobotSubsystem>>,
    inner: Mutex<HubInner>,
}

impl Hub {
    pub fn new(auth: AuthGate, history: Arc<dyn HistorySink>) -> Self {
        Self {
            auth,
            history,
            subsystem: OnceLock::new(),
            inner: Mutex::new(HubInner {
                registry: DeviceRegistry::new(),
                controllers: HashMap::new(),
                devices: HashMap::new(),
            }),
        }
    }

    /// Wire in the robot subsystem after construction. Robot commands fall
    /// back to the bridge device channel until this is called.
    pub fn set_robot_subsystem(&self, subsystem: Arc<RobotSubsystem>) {
        let _ = self.subsystem.set(subsystem);
    }

    fn lock(&self) -> MutexGuard<'_, HubInner> {
        // Availability over fail-fast: a panic while holding the lock must
        // not take the whole relay down with it.
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    // ---- controller lifecycle ----

    /// Registers a controller connection and eagerly pushes the current
    /// snapshots so the client needs no initial poll.
    pub fn add_controller(&self) -> (ConnectionId, mpsc::UnboundedReceiver<HubToController>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        let _ = tx.send(HubToController::StateUpdate {
            data: inner.registry.snapshot_shutters(),
        });
        let _ = tx.send(HubToController::IrrigationUpdate {
            data: inner.registry.snapshot_irrigation(),
        });
        let _ = tx.send(HubToController::RobotsUpdate {
            data: inner.registry.snapshot_robots().robots,
        });
        let _ = inner.controllers.insert(id, tx);
        crate::metrics::connection_opened("controller");
        info!(%id, controllers = inner.controllers.len(), "controller connected");
        (id, rx)
    }

    pub fn remove_controller(&self, id: ConnectionId) {
        let mut inner = self.lock();
        let _ = inner.controllers.remove(&id);
        info!(%id, controllers = inner.controllers.len(), "controller disconnected");
    }

    // ---- device lifecycle ----

    /// Authenticates and registers a device connection for `class`,
    /// force-closing any previously registered connection of that class.
    /// The returned queue already contains AUTH_OK and REQUEST_STATE.
    pub fn connect_device(
        &self,
        class: DeviceClass,
        secret: &str,
    ) -> Result<(ConnectionId, mpsc::UnboundedReceiver<DevicePush>), HubError> {
        if !self.auth.validate_device_auth(class, secret) {
            crate::metrics::auth_failure();
            warn!(%class, "device auth rejected");
            return Err(HubError::AuthRejected);
        }

        let id = ConnectionId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        if let Some(evicted) = inner.registry.register(class, id) {
            info!(%class, old = %evicted, new = %id, "replacing registered device");
            if let Some(old_tx) = inner.devices.remove(&evicted) {
                let _ = old_tx.send(DevicePush::Close);
            }
        }
        let _ = tx.send(DevicePush::Message(HubToDevice::AuthOk));
        let _ = tx.send(DevicePush::Message(HubToDevice::RequestState));
        let _ = inner.devices.insert(id, tx);
        broadcast_class_snapshot(&mut inner, class);
        crate::metrics::connection_opened("device");
        info!(%class, %id, "device registered");
        Ok((id, rx))
    }

    /// Transport close or protocol violation on a device connection.
    /// Compare-and-clear: a close event from an already-evicted connection
    /// leaves the current registration untouched.
    pub fn device_closed(&self, class: DeviceClass, id: ConnectionId) {
        let mut inner = self.lock();
        let _ = inner.devices.remove(&id);
        if inner.registry.unregister(class, id) {
            info!(%class, %id, "device disconnected, class offline");
            broadcast_class_snapshot(&mut inner, class);
        } else {
            debug!(%class, %id, "close from non-registered connection ignored");
        }
    }

    // ---- message dispatch ----

    pub fn handle_device_message(&self, class: DeviceClass, id: ConnectionId, msg: DeviceMessage) {
        match msg {
            DeviceMessage::Auth { .. } => {
                debug!(%class, %id, "duplicate auth message ignored");
            }
            DeviceMessage::State { data } => self.replace_state(class, id, data),
            DeviceMessage::Ack { command } => {
                debug!(%class, %id, command = command.as_deref().unwrap_or("-"), "device ack");
            }
            DeviceMessage::IrrigationDone { result } => {
                let mut inner = self.lock();
                broadcast(&mut inner, HubToController::IrrigationDone { result });
            }
            DeviceMessage::CommandResult { result } => {
                let mut inner = self.lock();
                broadcast(&mut inner, HubToController::CommandResult { result });
            }
        }
    }

    /// Wholesale state replacement followed by an unconditional broadcast,
    /// both under the hub lock. Writes from a connection that is no longer
    /// the registered owner are dropped.
    fn replace_state(&self, class: DeviceClass, id: ConnectionId, data: serde_json::Value) {
        let mut transition = None;
        {
            let mut inner = self.lock();
            if !inner.registry.is_owner(class, id) {
                warn!(%class, %id, "state push from stale connection dropped");
                crate::metrics::message_dropped();
                return;
            }
            match class {
                DeviceClass::Shutters => match serde_json::from_value::<ShutterChannels>(data) {
                    Ok(channels) => {
                        let committed = inner.registry.replace_shutters(channels);
                        broadcast(&mut inner, HubToController::StateUpdate { data: committed });
                    }
                    Err(err) => drop_malformed(class, &err),
                },
                DeviceClass::Irrigation => {
                    match serde_json::from_value::<IrrigationTelemetry>(data) {
                        Ok(telemetry) => {
                            // Transition detection must compare against the
                            // value held before the replacement.
                            let was_active = inner.registry.snapshot_irrigation().active;
                            let committed = inner.registry.replace_irrigation(telemetry);
                            broadcast(
                                &mut inner,
                                HubToController::IrrigationUpdate { data: committed },
                            );
                            transition = irrigation_transition(was_active, committed);
                        }
                        Err(err) => drop_malformed(class, &err),
                    }
                }
                DeviceClass::Robots => {
                    match serde_json::from_value::<HashMap<String, RobotTelemetry>>(data) {
                        Ok(telemetry) => {
                            let map = inner.registry.replace_robots(telemetry);
                            broadcast(&mut inner, HubToController::RobotsUpdate { data: map });
                        }
                        Err(err) => drop_malformed(class, &err),
                    }
                }
            }
        }
        if let Some(record) = transition {
            self.append_history(record);
        }
    }

    pub fn handle_controller_message(&self, id: ConnectionId, msg: ControllerMessage) {
        let token = match &msg {
            ControllerMessage::Command { token, .. }
            | ControllerMessage::IrrigationCommand { token, .. }
            | ControllerMessage::RobotCommand { token, .. } => token,
        };
        if !self.auth.validate_controller_token(token) {
            // Unauthenticated controller commands are ignored, the
            // connection stays open.
            crate::metrics::auth_failure();
            debug!(%id, "controller command with bad token ignored");
            return;
        }

        match msg {
            ControllerMessage::Command {
                action,
                channel,
                value,
                ..
            } => {
                let inner = self.lock();
                match device_tx(&inner, DeviceClass::Shutters) {
                    Some(tx) => {
                        let _ = tx.send(DevicePush::Message(HubToDevice::Command {
                            action,
                            channel,
                            value,
                        }));
                    }
                    // Deliberately silent: the legacy shutters command path
                    // produces no outbound message when no device is live.
                    None => debug!("shutters command with no live device dropped"),
                }
            }
            ControllerMessage::IrrigationCommand {
                action, duration, ..
            } => {
                let inner = self.lock();
                match device_tx(&inner, DeviceClass::Irrigation) {
                    Some(tx) => {
                        let _ = tx.send(DevicePush::Message(HubToDevice::IrrigationCommand {
                            action,
                            duration,
                        }));
                    }
                    None => reply_error(&inner, id, HubError::NotConnected(DeviceClass::Irrigation)),
                }
            }
            ControllerMessage::RobotCommand {
                robot_id, command, ..
            } => {
                if let Err(err) = self.issue_robot_command(&robot_id, &command) {
                    let inner = self.lock();
                    reply_error(&inner, id, err);
                }
            }
        }
    }

    /// Routes a robot command: through the robot subsystem when it owns the
    /// unit, otherwise to the robot bridge device connection.
    pub fn issue_robot_command(&self, robot_id: &str, command: &str) -> Result<(), HubError> {
        if let Some(subsystem) = self.subsystem.get() {
            if subsystem.has_unit(robot_id) {
                let connected = subsystem
                    .cached_status(robot_id)
                    .map(|status| status.connected)
                    .unwrap_or(false);
                if !connected {
                    return Err(HubError::NotConnected(DeviceClass::Robots));
                }
                return subsystem.issue_command(robot_id, command);
            }
        }

        let inner = self.lock();
        if inner.registry.robot_status(robot_id).is_none() {
            return Err(HubError::RobotNotFound(robot_id.to_string()));
        }
        match device_tx(&inner, DeviceClass::Robots) {
            Some(tx) => tx
                .send(DevicePush::Message(HubToDevice::Command {
                    action: command.to_string(),
                    channel: None,
                    value: None,
                }))
                .map_err(|_| HubError::SendFailed),
            None => Err(HubError::NotConnected(DeviceClass::Robots)),
        }
    }

    /// Updates from the robot subsystem's poll/push cycle; merged into the
    /// same robot mapping and broadcast path as bridge-device telemetry.
    pub fn apply_robot_event(&self, event: RobotEvent) {
        match event {
            RobotEvent::Status { id, status } => {
                let mut inner = self.lock();
                let map = inner.registry.upsert_robot(&id, status);
                broadcast(&mut inner, HubToController::RobotsUpdate { data: map });
            }
            RobotEvent::Connectivity { id, connected } => {
                info!(robot = %id, connected, "robot connectivity changed");
                let mut inner = self.lock();
                let map = inner.registry.set_robot_connected(&id, connected);
                broadcast(&mut inner, HubToController::RobotsUpdate { data: map });
            }
            RobotEvent::CommandFinished {
                id,
                command,
                success,
            } => {
                {
                    let mut inner = self.lock();
                    broadcast(
                        &mut inner,
                        HubToController::CommandResult {
                            result: serde_json::json!({
                                "robotId": id,
                                "command": command,
                                "success": success,
                            }),
                        },
                    );
                }
                self.append_history(
                    HistoryRecord::new(HistoryScope::Robots, command.to_uppercase())
                        .with_detail(serde_json::json!({"robotId": id, "success": success})),
                );
            }
        }
    }

    // ---- HTTP-facing reads and commands ----

    /// Token check for HTTP commands; same credential as the per-message
    /// token on the controller socket.
    pub fn validate_controller_token(&self, token: &str) -> bool {
        self.auth.validate_controller_token(token)
    }

    pub fn snapshot_shutters(&self) -> ShuttersState {
        self.lock().registry.snapshot_shutters()
    }

    pub fn snapshot_irrigation(&self) -> IrrigationState {
        self.lock().registry.snapshot_irrigation()
    }

    pub fn snapshot_robots(&self) -> RobotsState {
        self.lock().registry.snapshot_robots()
    }

    pub fn robot_status(&self, id: &str) -> Option<crate::models::RobotStatus> {
        self.lock().registry.robot_status(id)
    }

    pub fn health(&self) -> HubHealth {
        let inner = self.lock();
        let shutters = inner.registry.snapshot_shutters();
        let irrigation = inner.registry.snapshot_irrigation();
        HubHealth {
            shutters_connected: shutters.connected,
            irrigation_connected: irrigation.connected,
            robots_connected: inner.registry.connected(DeviceClass::Robots),
            last_update: shutters.last_update.max(irrigation.last_update),
        }
    }

    pub fn send_shutters_command(
        &self,
        action: String,
        channel: Option<u8>,
        value: Option<u8>,
    ) -> Result<(), HubError> {
        let inner = self.lock();
        let tx = device_tx(&inner, DeviceClass::Shutters)
            .ok_or(HubError::NotConnected(DeviceClass::Shutters))?;
        tx.send(DevicePush::Message(HubToDevice::Command {
            action,
            channel,
            value,
        }))
        .map_err(|_| HubError::SendFailed)
    }

    /// Asks the shutters device for its schedule table. Fire-and-forget:
    /// no request/response correlation exists, any answer surfaces later
    /// as a COMMAND_RESULT broadcast.
    pub fn request_schedules(&self) -> Result<(), HubError> {
        let inner = self.lock();
        let tx = device_tx(&inner, DeviceClass::Shutters)
            .ok_or(HubError::NotConnected(DeviceClass::Shutters))?;
        tx.send(DevicePush::Message(HubToDevice::GetSchedules))
            .map_err(|_| HubError::SendFailed)
    }

    fn append_history(&self, record: HistoryRecord) {
        let history = Arc::clone(&self.history);
        let _ = tokio::spawn(async move {
            if let Err(err) = history.append(record).await {
                warn!(error = %err, "history append failed");
            }
        });
    }
}

fn device_tx<'a>(
    inner: &'a HubInner,
    class: DeviceClass,
) -> Option<&'a mpsc::UnboundedSender<DevicePush>> {
    inner
        .registry
        .owner(class)
        .and_then(|id| inner.devices.get(&id))
}

/// Fan-out to every live controller connection; device connections are not
/// in this set by construction. Delivery is enqueue-only and per-connection
/// failures are isolated.
fn broadcast(inner: &mut HubInner, msg: HubToController) {
    for (id, tx) in &inner.controllers {
        if tx.send(msg.clone()).is_err() {
            debug!(%id, "controller queue closed, skipping");
        }
    }
    crate::metrics::broadcast_sent();
}

fn broadcast_class_snapshot(inner: &mut HubInner, class: DeviceClass) {
    let msg = match class {
        DeviceClass::Shutters => HubToController::StateUpdate {
            data: inner.registry.snapshot_shutters(),
        },
        DeviceClass::Irrigation => HubToController::IrrigationUpdate {
            data: inner.registry.snapshot_irrigation(),
        },
        DeviceClass::Robots => HubToController::RobotsUpdate {
            data: inner.registry.snapshot_robots().robots,
        },
    };
    broadcast(inner, msg);
}

fn reply_error(inner: &HubInner, id: ConnectionId, err: HubError) {
    let code = match err {
        HubError::AuthRejected => 401,
        HubError::RobotNotFound(_) => 404,
        HubError::NotConnected(_) => 503,
        _ => 500,
    };
    if let Some(tx) = inner.controllers.get(&id) {
        let _ = tx.send(HubToController::Error {
            message: err.to_string(),
            code,
        });
    }
}

fn irrigation_transition(was_active: bool, committed: IrrigationState) -> Option<HistoryRecord> {
    match (was_active, committed.active) {
        (false, true) => Some(
            HistoryRecord::new(HistoryScope::Irrigation, "START")
                .with_detail(serde_json::json!({"duration": committed.duration})),
        ),
        (true, false) => Some(HistoryRecord::new(HistoryScope::Irrigation, "STOP")),
        _ => None,
    }
}

fn drop_malformed(class: DeviceClass, err: &serde_json::Error) {
    warn!(%class, error = %err, "malformed state payload dropped");
    crate::metrics::message_dropped();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthSettings;
    use crate::history::MemoryHistory;
    use tokio::sync::mpsc::error::TryRecvError;

    const SHUTTERS_SECRET: &str = "shutters-secret";
    const IRRIGATION_SECRET: &str = "irrigation-secret";
    const TOKEN: &str = "controller-token";

    fn test_hub() -> (Hub, Arc<MemoryHistory>) {
        let history = Arc::new(MemoryHistory::new());
        let auth = AuthGate::new(&AuthSettings {
            shutters_secret: SHUTTERS_SECRET.to_string(),
            irrigation_secret: IRRIGATION_SECRET.to_string(),
            robots_secret: "robots-secret".to_string(),
            controller_token: TOKEN.to_string(),
        });
        (Hub::new(auth, history.clone()), history)
    }

    fn drain_eager(
        rx: &mut mpsc::UnboundedReceiver<HubToController>,
    ) -> Vec<HubToController> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn device_auth_flow_acks_then_requests_state() {
        let (hub, _) = test_hub();
        let (_, mut rx) = hub
            .connect_device(DeviceClass::Shutters, SHUTTERS_SECRET)
            .unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            DevicePush::Message(HubToDevice::AuthOk)
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            DevicePush::Message(HubToDevice::RequestState)
        );
    }

    #[tokio::test]
    async fn bad_secret_is_rejected() {
        let (hub, _) = test_hub();
        let res = hub.connect_device(DeviceClass::Shutters, IRRIGATION_SECRET);
        assert!(matches!(res, Err(HubError::AuthRejected)));
    }

    #[tokio::test]
    async fn controller_gets_eager_snapshots_on_connect() {
        let (hub, _) = test_hub();
        let (_, mut rx) = hub.add_controller();
        let eager = drain_eager(&mut rx);
        assert_eq!(eager.len(), 3);
        assert!(matches!(eager[0], HubToController::StateUpdate { .. }));
        assert!(matches!(eager[1], HubToController::IrrigationUpdate { .. }));
        assert!(matches!(eager[2], HubToController::RobotsUpdate { .. }));
    }

    #[tokio::test]
    async fn state_replace_broadcasts_committed_state() {
        let (hub, _) = test_hub();
        let (device_id, _device_rx) = hub
            .connect_device(DeviceClass::Shutters, SHUTTERS_SECRET)
            .unwrap();
        let (_, mut rx) = hub.add_controller();
        let _ = drain_eager(&mut rx);

        hub.handle_device_message(
            DeviceClass::Shutters,
            device_id,
            DeviceMessage::State {
                data: serde_json::json!({"s1": {"pos": 50, "dir": 0}}),
            },
        );

        match rx.try_recv().unwrap() {
            HubToController::StateUpdate { data } => {
                assert_eq!(data.s1.pos, 50);
                assert!(data.connected);
                assert_eq!(data, hub.snapshot_shutters());
            }
            other => panic!("unexpected broadcast: {other:?}"),
        }
    }

    #[tokio::test]
    async fn newer_registration_evicts_and_stale_close_is_ignored() {
        let (hub, _) = test_hub();
        let (a, mut a_rx) = hub
            .connect_device(DeviceClass::Shutters, SHUTTERS_SECRET)
            .unwrap();
        let (b, _b_rx) = hub
            .connect_device(DeviceClass::Shutters, SHUTTERS_SECRET)
            .unwrap();

        // A received its auth handshake, then the eviction signal.
        let _ = a_rx.try_recv().unwrap();
        let _ = a_rx.try_recv().unwrap();
        assert_eq!(a_rx.try_recv().unwrap(), DevicePush::Close);

        let (_, mut rx) = hub.add_controller();
        let _ = drain_eager(&mut rx);

        // A's delayed close event must not wipe B's registration.
        hub.device_closed(DeviceClass::Shutters, a);
        assert!(hub.snapshot_shutters().connected);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

        // B's close is the real one: exactly one broadcast with the flag
        // change.
        hub.device_closed(DeviceClass::Shutters, b);
        match rx.try_recv().unwrap() {
            HubToController::StateUpdate { data } => assert!(!data.connected),
            other => panic!("unexpected broadcast: {other:?}"),
        }
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn stale_device_state_push_is_dropped() {
        let (hub, _) = test_hub();
        let (a, _a_rx) = hub
            .connect_device(DeviceClass::Shutters, SHUTTERS_SECRET)
            .unwrap();
        let (_b, _b_rx) = hub
            .connect_device(DeviceClass::Shutters, SHUTTERS_SECRET)
            .unwrap();
        let (_, mut rx) = hub.add_controller();
        let _ = drain_eager(&mut rx);

        // In-flight STATE from the evicted connection.
        hub.handle_device_message(
            DeviceClass::Shutters,
            a,
            DeviceMessage::State {
                data: serde_json::json!({"s1": {"pos": 99, "dir": 1}}),
            },
        );
        assert_eq!(hub.snapshot_shutters().s1.pos, 0);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn shutters_command_without_device_is_silent() {
        let (hub, _) = test_hub();
        let (id, mut rx) = hub.add_controller();
        let _ = drain_eager(&mut rx);

        hub.handle_controller_message(
            id,
            ControllerMessage::Command {
                token: TOKEN.to_string(),
                action: "open".to_string(),
                channel: Some(1),
                value: None,
            },
        );
        // No outbound message at all, neither to the controller nor to any
        // device.
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn irrigation_command_without_device_reports_error() {
        let (hub, _) = test_hub();
        let (id, mut rx) = hub.add_controller();
        let _ = drain_eager(&mut rx);

        hub.handle_controller_message(
            id,
            ControllerMessage::IrrigationCommand {
                token: TOKEN.to_string(),
                action: "start".to_string(),
                duration: Some(600),
            },
        );
        match rx.try_recv().unwrap() {
            HubToController::Error { code, .. } => assert_eq!(code, 503),
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn bad_token_is_ignored_entirely() {
        let (hub, _) = test_hub();
        let (id, mut rx) = hub.add_controller();
        let _ = drain_eager(&mut rx);

        hub.handle_controller_message(
            id,
            ControllerMessage::IrrigationCommand {
                token: "wrong".to_string(),
                action: "start".to_string(),
                duration: None,
            },
        );
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn commands_are_forwarded_to_the_registered_device() {
        let (hub, _) = test_hub();
        let (_, mut device_rx) = hub
            .connect_device(DeviceClass::Shutters, SHUTTERS_SECRET)
            .unwrap();
        let _ = device_rx.try_recv().unwrap();
        let _ = device_rx.try_recv().unwrap();

        let (id, _rx) = hub.add_controller();
        hub.handle_controller_message(
            id,
            ControllerMessage::Command {
                token: TOKEN.to_string(),
                action: "position".to_string(),
                channel: Some(2),
                value: Some(75),
            },
        );
        assert_eq!(
            device_rx.try_recv().unwrap(),
            DevicePush::Message(HubToDevice::Command {
                action: "position".to_string(),
                channel: Some(2),
                value: Some(75),
            })
        );
    }

    #[tokio::test]
    async fn irrigation_transition_is_logged_once_per_edge() {
        let (hub, history) = test_hub();
        let (id, _rx) = hub
            .connect_device(DeviceClass::Irrigation, IRRIGATION_SECRET)
            .unwrap();

        // Ten consecutive telemetry messages with active:true log a single
        // START for the initial transition.
        for elapsed in 0..10u64 {
            hub.handle_device_message(
                DeviceClass::Irrigation,
                id,
                DeviceMessage::State {
                    data: serde_json::json!({
                        "active": true, "duration": 600, "elapsed": elapsed
                    }),
                },
            );
        }
        hub.handle_device_message(
            DeviceClass::Irrigation,
            id,
            DeviceMessage::State {
                data: serde_json::json!({"active": false}),
            },
        );
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let records = history.recent(HistoryScope::Irrigation, 10).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].event, "STOP");
        assert_eq!(records[1].event, "START");
        assert_eq!(
            records[1].detail,
            Some(serde_json::json!({"duration": 600}))
        );
    }

    #[tokio::test]
    async fn completion_messages_are_forwarded_verbatim() {
        let (hub, _) = test_hub();
        let (id, _rx) = hub
            .connect_device(DeviceClass::Irrigation, IRRIGATION_SECRET)
            .unwrap();
        let (_, mut controller_rx) = hub.add_controller();
        let _ = drain_eager(&mut controller_rx);

        hub.handle_device_message(
            DeviceClass::Irrigation,
            id,
            DeviceMessage::IrrigationDone {
                result: serde_json::json!({"runtime": 600}),
            },
        );
        assert_eq!(
            controller_rx.try_recv().unwrap(),
            HubToController::IrrigationDone {
                result: serde_json::json!({"runtime": 600}),
            }
        );
        // Forwarded only, not merged into state.
        assert!(!hub.snapshot_irrigation().active);
    }

    #[tokio::test]
    async fn malformed_state_is_dropped_and_connection_logic_unaffected() {
        let (hub, _) = test_hub();
        let (id, _rx) = hub
            .connect_device(DeviceClass::Irrigation, IRRIGATION_SECRET)
            .unwrap();
        let (_, mut controller_rx) = hub.add_controller();
        let _ = drain_eager(&mut controller_rx);

        hub.handle_device_message(
            DeviceClass::Irrigation,
            id,
            DeviceMessage::State {
                data: serde_json::json!("not an object"),
            },
        );
        assert!(matches!(controller_rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn robot_event_updates_map_and_broadcasts() {
        let (hub, _) = test_hub();
        let (_, mut rx) = hub.add_controller();
        let _ = drain_eager(&mut rx);

        hub.apply_robot_event(RobotEvent::Status {
            id: "vac1".to_string(),
            status: crate::models::RobotStatus::from_telemetry(
                RobotTelemetry {
                    battery: 70,
                    phase: Some("running".to_string()),
                    ..RobotTelemetry::default()
                },
                true,
            ),
        });
        match rx.try_recv().unwrap() {
            HubToController::RobotsUpdate { data } => {
                assert_eq!(data["vac1"].battery, 70);
                assert!(data["vac1"].connected);
            }
            other => panic!("unexpected broadcast: {other:?}"),
        }

        hub.apply_robot_event(RobotEvent::Connectivity {
            id: "vac1".to_string(),
            connected: false,
        });
        match rx.try_recv().unwrap() {
            HubToController::RobotsUpdate { data } => {
                assert!(!data["vac1"].connected);
                assert_eq!(data["vac1"].phase, "disconnected");
            }
            other => panic!("unexpected broadcast: {other:?}"),
        }
    }

    #[tokio::test]
    async fn robot_command_for_unknown_unit_is_not_found() {
        let (hub, _) = test_hub();
        let res = hub.issue_robot_command("nope", "start");
        assert!(matches!(res, Err(HubError::RobotNotFound(_))));
    }

    #[tokio::test]
    async fn http_command_requires_live_device() {
        let (hub, _) = test_hub();
        let res = hub.send_shutters_command("open".to_string(), Some(1), None);
        assert!(matches!(
            res,
            Err(HubError::NotConnected(DeviceClass::Shutters))
        ));
    }
}
