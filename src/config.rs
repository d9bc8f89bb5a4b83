use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::supervisor::SupervisorSettings;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Controller configuration loaded from a TOML file at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub broker: BrokerSettings,
    #[serde(default)]
    pub supervisor: SupervisorSettings,
}

/// Broker connection parameters and the fixed queue set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerSettings {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Queues to declare and consume from; fixed at construction time
    pub queues: Vec<String>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_client_id")]
    pub client_id: String,
}

fn default_port() -> u16 {
    1883
}

fn default_keep_alive() -> u64 {
    5
}

fn default_client_id() -> String {
    "devicectl".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker: BrokerSettings {
                host: "localhost".to_string(),
                port: default_port(),
                user: None,
                password: None,
                queues: vec!["device_commands".to_string()],
                keep_alive_secs: default_keep_alive(),
                client_id: default_client_id(),
            },
            supervisor: SupervisorSettings::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.host.is_empty() {
            return Err(ConfigError::Invalid(
                "Broker host must not be empty".to_string(),
            ));
        }
        if self.broker.queues.is_empty() {
            return Err(ConfigError::Invalid(
                "At least one broker queue must be configured".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config_with_defaults() {
        let raw = r#"
            [broker]
            host = "broker.local"
            queues = ["cmd", "events"]
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        config.validate().unwrap();
        assert_eq!(config.broker.host, "broker.local");
        assert_eq!(config.broker.port, 1883);
        assert_eq!(config.broker.keep_alive_secs, 5);
        assert_eq!(config.broker.client_id, "devicectl");
        assert_eq!(config.broker.queues, vec!["cmd", "events"]);
    }

    #[test]
    fn rejects_empty_queue_list() {
        let raw = r#"
            [broker]
            host = "broker.local"
            queues = []
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn parses_credentials_and_supervisor_section() {
        let raw = r#"
            [broker]
            host = "broker.local"
            user = "controller"
            password = "secret"
            queues = ["cmd"]

            [supervisor]
            command_buffer = 8
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.broker.user.as_deref(), Some("controller"));
        assert_eq!(config.supervisor.command_buffer, 8);
    }

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
    }
}
