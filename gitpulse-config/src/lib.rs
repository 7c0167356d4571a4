//! Configuration loading for the GitPulse services.
//!
//! Each binary has one flat config struct, populated from an optional
//! TOML file and environment variables carrying the service prefix
//! (e.g. `MANAGER_SERVICE_DATABASE_URL`). A `.env` file in the working
//! directory is honored when present.

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration error: {0}")]
    Load(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

fn load<'de, T: Deserialize<'de>>(file_stem: &str, env_prefix: &str) -> Result<T> {
    // Missing .env is fine; a malformed one is not worth failing startup over
    // either, the real sources below will complain about anything missing.
    let _ = dotenvy::dotenv();

    let cfg = config::Config::builder()
        .add_source(config::File::with_name(file_stem).required(false))
        .add_source(config::Environment::with_prefix(env_prefix))
        .build()?;
    Ok(cfg.try_deserialize()?)
}

fn default_server_port() -> u16 {
    8080
}

fn default_broadcast_interval_secs() -> u64 {
    300
}

/// Manager: HTTP surface, intent broadcast, commit ingestion.
#[derive(Debug, Clone, Deserialize)]
pub struct ManagerConfig {
    pub database_url: String,
    pub rabbitmq_url: String,
    /// Outbound queue the broadcast loop publishes intent commands to.
    pub intents_queue_name: String,
    /// Inbound queue the ingestion loop consumes commit commands from.
    pub commits_queue_name: String,
    #[serde(default = "default_server_port")]
    pub server_port: u16,
}

impl ManagerConfig {
    pub fn load() -> Result<Self> {
        load("gitpulse-manager", "MANAGER_SERVICE")
    }
}

/// Monitor: intent consumption, harvesting, commit publishing.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    pub rabbitmq_url: String,
    pub rabbitmq_consume_queue: String,
    pub rabbitmq_publish_queue: String,
    pub github_token: String,
    pub redis_url: String,
}

impl MonitorConfig {
    pub fn load() -> Result<Self> {
        load("gitpulse-monitor", "MONITOR_SERVICE")
    }
}

/// Scout: intent mirror and periodic re-broadcast.
#[derive(Debug, Clone, Deserialize)]
pub struct ScoutConfig {
    pub rabbitmq_url: String,
    pub redis_url: String,
    pub rabbitmq_consume_queue: String,
    pub rabbitmq_publish_queue: String,
    #[serde(default = "default_broadcast_interval_secs")]
    pub broadcast_interval_secs: u64,
}

impl ScoutConfig {
    pub fn load() -> Result<Self> {
        load("gitpulse-scout", "SCOUT_SERVICE")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manager_config_defaults_port() {
        let cfg: ManagerConfig = serde_json::from_value(serde_json::json!({
            "database_url": "postgres://localhost/gitpulse",
            "rabbitmq_url": "amqp://localhost:5672",
            "intents_queue_name": "intents",
            "commits_queue_name": "commits",
        }))
        .unwrap();
        assert_eq!(cfg.server_port, 8080);
    }

    #[test]
    fn scout_config_defaults_interval() {
        let cfg: ScoutConfig = serde_json::from_value(serde_json::json!({
            "rabbitmq_url": "amqp://localhost:5672",
            "redis_url": "redis://localhost:6379",
            "rabbitmq_consume_queue": "intents",
            "rabbitmq_publish_queue": "intents",
        }))
        .unwrap();
        assert_eq!(cfg.broadcast_interval_secs, 300);
    }
}
