// robots/driver.rs
//
// Vendor access for one robot unit, behind a trait so the subsystem never
// depends on a concrete protocol. The shipping driver speaks plain
// HTTP/JSON against the unit's local API.

use async_trait::async_trait;

use crate::models::RobotTelemetry;

#[async_trait]
pub trait RobotDriver: Send + Sync {
    /// Live status round-trip. May be slow or fail; the subsystem isolates
    /// and caches it, callers never see this directly.
    async fn fetch_status(&self) -> anyhow::Result<RobotTelemetry>;

    /// Issue a named command (start/pause/stop/dock). May hang; always
    /// called from a dedicated per-unit worker.
    async fn send_command(&self, command: &str) -> anyhow::Result<()>;
}

pub struct HttpRobotDriver {
    base_url: String,
    identity: String,
    password: String,
    client: reqwest::Client,
}

impl HttpRobotDriver {
    pub fn new(address: &str, identity: &str, password: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()?;
        Ok(Self {
            base_url: format!("http://{}", address.trim_end_matches('/')),
            identity: identity.to_string(),
            password: password.to_string(),
            client,
        })
    }
}

#[async_trait]
impl RobotDriver for HttpRobotDriver {
    async fn fetch_status(&self) -> anyhow::Result<RobotTelemetry> {
        let telemetry = self
            .client
            .get(format!("{}/api/status", self.base_url))
            .basic_auth(&self.identity, Some(&self.password))
            .send()
            .await?
            .error_for_status()?
            .json::<RobotTelemetry>()
            .await?;
        Ok(telemetry)
    }

    async fn send_command(&self, command: &str) -> anyhow::Result<()> {
        let _ = self
            .client
            .post(format!("{}/api/command", self.base_url))
            .basic_auth(&self.identity, Some(&self.password))
            .json(&serde_json::json!({ "command": command }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
