// config/mod.rs
use config::Config;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub auth: AuthSettings,
    pub metrics: MetricsSettings,
    pub history: HistorySettings,
    pub robots: RobotsSettings,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub address: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Shared secrets. Empty secrets reject every attempt, so an unconfigured
/// class simply never authenticates.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub shutters_secret: String,
    pub irrigation_secret: String,
    pub robots_secret: String,
    pub controller_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9090,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct HistorySettings {
    /// JSONL file for irrigation/robot events. In-memory only when unset.
    pub path: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RobotsSettings {
    pub poll_interval_secs: u64,
    pub units: Vec<RobotUnitSettings>,
}

impl Default for RobotsSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            units: Vec::new(),
        }
    }
}

/// One robot unit. Missing address or credentials disable the unit.
#[derive(Debug, Deserialize)]
pub struct RobotUnitSettings {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub identity: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Settings {
    pub fn new() -> Result<Self, config::ConfigError> {
        let settings = Config::builder()
            .add_source(config::File::with_name("config/config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        settings.try_deserialize()
    }
}
