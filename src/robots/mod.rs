// robots/mod.rs
//
// Robot subsystem: owns vendor access to each configured unit, keeps a
// status cache the hub can read without ever touching the network, and
// reports status/connectivity transitions upward through an event stream.
// Commands run on a dedicated worker task per unit so a hanging unit can
// never stall status reporting for the others.

mod driver;

pub use driver::{HttpRobotDriver, RobotDriver};

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::RobotsSettings;
use crate::error::HubError;
use crate::models::RobotStatus;

const FETCH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);
const COMMAND_QUEUE: usize = 16;

/// Transitions the hub subscribes to. Status events refresh telemetry,
/// connectivity events mark a unit unreachable, command-finished events are
/// surfaced to controllers and the history sink.
#[derive(Debug, Clone, PartialEq)]
pub enum RobotEvent {
    Status { id: String, status: RobotStatus },
    Connectivity { id: String, connected: bool },
    CommandFinished {
        id: String,
        command: String,
        success: bool,
    },
}

#[derive(Debug, Clone)]
pub struct RobotUnitInfo {
    pub id: String,
    pub name: String,
}

struct Unit {
    name: String,
    driver: Arc<dyn RobotDriver>,
    cmd_tx: mpsc::Sender<String>,
}

pub struct RobotSubsystem {
    units: HashMap<String, Unit>,
    cache: std::sync::Mutex<HashMap<String, RobotStatus>>,
    events: mpsc::UnboundedSender<RobotEvent>,
    poll_interval: std::time::Duration,
    poll_in_flight: AtomicBool,
}

impl RobotSubsystem {
    /// Builds units from configuration. A unit without address or
    /// credentials is disabled with a warning, never a startup failure.
    pub fn new(settings: &RobotsSettings, events: mpsc::UnboundedSender<RobotEvent>) -> Self {
        let mut units = Vec::new();
        for unit in &settings.units {
            let (Some(address), Some(identity), Some(password)) =
                (&unit.address, &unit.identity, &unit.password)
            else {
                warn!(id = %unit.id, "robot unit has no credentials, disabled");
                continue;
            };
            match HttpRobotDriver::new(address, identity, password) {
                Ok(driver) => {
                    let name = unit.name.clone().unwrap_or_else(|| unit.id.clone());
                    units.push((unit.id.clone(), name, Arc::new(driver) as Arc<dyn RobotDriver>));
                }
                Err(err) => warn!(id = %unit.id, error = %err, "robot driver setup failed, disabled"),
            }
        }
        Self::with_drivers(
            units,
            events,
            std::time::Duration::from_secs(settings.poll_interval_secs),
        )
    }

    /// Direct construction from drivers; the entry point for tests.
    pub fn with_drivers(
        units: Vec<(String, String, Arc<dyn RobotDriver>)>,
        events: mpsc::UnboundedSender<RobotEvent>,
        poll_interval: std::time::Duration,
    ) -> Self {
        let mut map = HashMap::new();
        let mut cache = HashMap::new();
        for (id, name, driver) in units {
            let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE);
            let _ = tokio::spawn(command_worker(
                id.clone(),
                Arc::clone(&driver),
                cmd_rx,
                events.clone(),
            ));
            let _ = cache.insert(id.clone(), RobotStatus::disconnected());
            let _ = map.insert(
                id,
                Unit {
                    name,
                    driver,
                    cmd_tx,
                },
            );
        }
        info!(units = map.len(), "robot subsystem ready");
        Self {
            units: map,
            cache: std::sync::Mutex::new(cache),
            events,
            poll_interval,
            poll_in_flight: AtomicBool::new(false),
        }
    }

    pub fn units(&self) -> Vec<RobotUnitInfo> {
        self.units
            .iter()
            .map(|(id, unit)| RobotUnitInfo {
                id: id.clone(),
                name: unit.name.clone(),
            })
            .collect()
    }

    pub fn has_unit(&self, id: &str) -> bool {
        self.units.contains_key(id)
    }

    /// Last known status, or an explicit disconnected record. Never blocks
    /// on a network round-trip.
    pub fn cached_status(&self, id: &str) -> Option<RobotStatus> {
        if !self.units.contains_key(id) {
            return None;
        }
        Some(
            self.lock_cache()
                .get(id)
                .cloned()
                .unwrap_or_else(RobotStatus::disconnected),
        )
    }

    /// Queues a command for the unit's worker. Enqueue-only, so a hang on
    /// one unit cannot stall the caller; a full queue is a send failure.
    pub fn issue_command(&self, id: &str, command: &str) -> Result<(), HubError> {
        let unit = self
            .units
            .get(id)
            .ok_or_else(|| HubError::RobotNotFound(id.to_string()))?;
        unit.cmd_tx
            .try_send(command.to_string())
            .map_err(|_| HubError::SendFailed)
    }

    /// Fixed-interval poll loop. A tick that overlaps a still-running poll
    /// is dropped, never queued.
    pub async fn run_poll_loop(self: Arc<Self>) {
        if self.units.is_empty() {
            info!("no robot units configured, poll loop not started");
            return;
        }
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            let _ = interval.tick().await;
            let _ = self.poll_tick();
        }
    }

    /// Starts one poll round on a background task. Returns false when the
    /// previous round is still in flight and the tick was skipped.
    pub fn poll_tick(self: &Arc<Self>) -> bool {
        if self.poll_in_flight.swap(true, Ordering::SeqCst) {
            debug!("previous robot poll still running, tick skipped");
            return false;
        }
        let subsystem = Arc::clone(self);
        let _ = tokio::spawn(async move {
            subsystem.poll_once().await;
            subsystem.poll_in_flight.store(false, Ordering::SeqCst);
        });
        true
    }

    async fn poll_once(&self) {
        let fetches = self.units.iter().map(|(id, unit)| {
            let driver = Arc::clone(&unit.driver);
            async move {
                let result = tokio::time::timeout(FETCH_TIMEOUT, driver.fetch_status()).await;
                (id.clone(), result)
            }
        });
        for (id, result) in futures_util::future::join_all(fetches).await {
            match result {
                Ok(Ok(telemetry)) => {
                    let status = RobotStatus::from_telemetry(telemetry, true);
                    let _ = self.lock_cache().insert(id.clone(), status.clone());
                    let _ = self.events.send(RobotEvent::Status { id, status });
                }
                Ok(Err(err)) => self.mark_unreachable(&id, &err.to_string()),
                Err(_) => self.mark_unreachable(&id, "status fetch timed out"),
            }
        }
    }

    fn mark_unreachable(&self, id: &str, reason: &str) {
        let was_connected = {
            let mut cache = self.lock_cache();
            let entry = cache
                .entry(id.to_string())
                .or_insert_with(RobotStatus::disconnected);
            let was = entry.connected;
            *entry = RobotStatus::disconnected();
            was
        };
        // Only the transition is an event; repeated failures stay quiet.
        if was_connected {
            warn!(robot = %id, reason, "robot unreachable");
            let _ = self.events.send(RobotEvent::Connectivity {
                id: id.to_string(),
                connected: false,
            });
        } else {
            debug!(robot = %id, reason, "robot still unreachable");
        }
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, HashMap<String, RobotStatus>> {
        self.cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

async fn command_worker(
    id: String,
    driver: Arc<dyn RobotDriver>,
    mut cmd_rx: mpsc::Receiver<String>,
    events: mpsc::UnboundedSender<RobotEvent>,
) {
    while let Some(command) = cmd_rx.recv().await {
        info!(robot = %id, %command, "issuing robot command");
        let success = match driver.send_command(&command).await {
            Ok(()) => true,
            Err(err) => {
                warn!(robot = %id, %command, error = %err, "robot command failed");
                false
            }
        };
        let _ = events.send(RobotEvent::CommandFinished {
            id: id.clone(),
            command,
            success,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RobotTelemetry;
    use async_trait::async_trait;
    use tokio::sync::Notify;

    struct StaticDriver {
        telemetry: std::sync::Mutex<anyhow::Result<RobotTelemetry>>,
    }

    impl StaticDriver {
        fn ok(battery: u8, phase: &str) -> Arc<Self> {
            Arc::new(Self {
                telemetry: std::sync::Mutex::new(Ok(RobotTelemetry {
                    battery,
                    phase: Some(phase.to_string()),
                    ..RobotTelemetry::default()
                })),
            })
        }

        fn fail(self: &Arc<Self>) {
            *self.telemetry.lock().unwrap() = Err(anyhow::anyhow!("unreachable"));
        }
    }

    #[async_trait]
    impl RobotDriver for StaticDriver {
        async fn fetch_status(&self) -> anyhow::Result<RobotTelemetry> {
            match &*self.telemetry.lock().unwrap() {
                Ok(telemetry) => Ok(telemetry.clone()),
                Err(err) => Err(anyhow::anyhow!("{err}")),
            }
        }

        async fn send_command(&self, _command: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    /// Driver whose status fetch blocks until released.
    struct GatedDriver {
        gate: Notify,
    }

    #[async_trait]
    impl RobotDriver for GatedDriver {
        async fn fetch_status(&self) -> anyhow::Result<RobotTelemetry> {
            self.gate.notified().await;
            Ok(RobotTelemetry::default())
        }

        async fn send_command(&self, _command: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn subsystem_with(
        driver: Arc<dyn RobotDriver>,
    ) -> (Arc<RobotSubsystem>, mpsc::UnboundedReceiver<RobotEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subsystem = Arc::new(RobotSubsystem::with_drivers(
            vec![("vac1".to_string(), "Vacuum".to_string(), driver)],
            tx,
            std::time::Duration::from_secs(30),
        ));
        (subsystem, rx)
    }

    #[tokio::test]
    async fn poll_refreshes_cache_and_emits_status() {
        let (subsystem, mut rx) = subsystem_with(StaticDriver::ok(80, "running"));
        assert!(!subsystem.cached_status("vac1").unwrap().connected);

        subsystem.poll_once().await;

        let cached = subsystem.cached_status("vac1").unwrap();
        assert!(cached.connected);
        assert_eq!(cached.battery, 80);
        assert_eq!(cached.phase, "running");
        match rx.try_recv().unwrap() {
            RobotEvent::Status { id, status } => {
                assert_eq!(id, "vac1");
                assert_eq!(status, cached);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_unit_emits_one_connectivity_transition() {
        let driver = StaticDriver::ok(80, "running");
        let (subsystem, mut rx) = subsystem_with(driver.clone());

        subsystem.poll_once().await;
        let _ = rx.try_recv().unwrap();

        driver.fail();
        subsystem.poll_once().await;
        assert_eq!(
            rx.try_recv().unwrap(),
            RobotEvent::Connectivity {
                id: "vac1".to_string(),
                connected: false,
            }
        );

        // Repeated failure is not a transition.
        subsystem.poll_once().await;
        assert!(rx.try_recv().is_err());
        assert!(!subsystem.cached_status("vac1").unwrap().connected);
    }

    #[tokio::test]
    async fn overlapping_poll_tick_is_skipped_not_queued() {
        let gated = Arc::new(GatedDriver {
            gate: Notify::new(),
        });
        let (subsystem, _rx) = subsystem_with(gated.clone());

        assert!(subsystem.poll_tick());
        // The first round is stuck in the driver; the next tick is dropped.
        assert!(!subsystem.poll_tick());

        gated.gate.notify_one();
        let mut released = false;
        for _ in 0..100 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            if !subsystem.poll_in_flight.load(Ordering::SeqCst) {
                released = true;
                break;
            }
        }
        assert!(released, "poll never finished after release");
        assert!(subsystem.poll_tick());
    }

    #[tokio::test]
    async fn issued_command_reports_completion_event() {
        let (subsystem, mut rx) = subsystem_with(StaticDriver::ok(80, "charging"));
        subsystem.issue_command("vac1", "start").unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            RobotEvent::CommandFinished {
                id: "vac1".to_string(),
                command: "start".to_string(),
                success: true,
            }
        );
    }

    #[tokio::test]
    async fn unknown_unit_command_is_not_found() {
        let (subsystem, _rx) = subsystem_with(StaticDriver::ok(80, "charging"));
        assert!(matches!(
            subsystem.issue_command("nope", "start"),
            Err(HubError::RobotNotFound(_))
        ));
        assert_eq!(subsystem.cached_status("nope"), None);
    }

    #[tokio::test]
    async fn unit_without_credentials_is_disabled() {
        use crate::config::{RobotUnitSettings, RobotsSettings};
        let (tx, _rx) = mpsc::unbounded_channel();
        let settings = RobotsSettings {
            poll_interval_secs: 30,
            units: vec![RobotUnitSettings {
                id: "vac1".to_string(),
                name: None,
                address: Some("10.0.0.5".to_string()),
                identity: None,
                password: None,
            }],
        };
        let subsystem = RobotSubsystem::new(&settings, tx);
        assert!(subsystem.units().is_empty());
        assert!(!subsystem.has_unit("vac1"));
    }
}
