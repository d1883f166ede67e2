// src/config.rs
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dotenv::dotenv;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::rabbitmq::errors::{PublisherError, Result};

// Configuration structures
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublisherConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub topology: TopologyConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_uri")]
    pub uri: String,
    #[serde(default = "default_client_name")]
    pub client_name: String,
    #[serde(default = "default_heartbeat")]
    pub heartbeat_seconds: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyConfig {
    #[serde(default = "default_exchange")]
    pub exchange: String,
    #[serde(default = "default_routing_key")]
    pub routing_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Recreate the channel even when the broker closed it with reply code 200.
    #[serde(default)]
    pub recreate_on_graceful_shutdown: bool,
    /// Publish again once the broker acks the previous message.
    #[serde(default)]
    pub republish_on_confirm: bool,
    /// Consecutive recreation failures tolerated before giving up (0 means unlimited)
    #[serde(default)]
    pub max_recreate_attempts: u32,
    #[serde(default = "default_backoff_initial")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,
}

// Default values
fn default_uri() -> String { "amqp://localhost:5672/%2f".to_string() }
fn default_client_name() -> String { "TestClient".to_string() }
fn default_heartbeat() -> u16 { 10 }
fn default_exchange() -> String { "TestExchange".to_string() }
fn default_routing_key() -> String { "TestRoute".to_string() }
fn default_backoff_initial() -> u64 { 500 }
fn default_backoff_max() -> u64 { 30000 }

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            client_name: default_client_name(),
            heartbeat_seconds: default_heartbeat(),
        }
    }
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            exchange: default_exchange(),
            routing_key: default_routing_key(),
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            recreate_on_graceful_shutdown: false,
            republish_on_confirm: false,
            max_recreate_attempts: 0,
            backoff_initial_ms: default_backoff_initial(),
            backoff_max_ms: default_backoff_max(),
        }
    }
}

impl ConnectionConfig {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(u64::from(self.heartbeat_seconds))
    }
}

impl PublisherConfig {
    /// Defaults, then the first config file found, then environment overrides.
    pub fn load() -> Result<Self> {
        dotenv().ok();
        let mut config = match find_config_file() {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PublisherError::ConfigError(format!("Failed to read config file at {}: {}", path.display(), e))
        })?;
        let config: PublisherConfig = serde_json::from_str(&content)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Overlay values from a variable lookup (the process environment in production).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("AMQP_ADDR") {
            self.connection.uri = val;
        }
        if let Some(val) = lookup("AMQP_CLIENT_NAME") {
            self.connection.client_name = val;
        }
        if let Some(val) = lookup("AMQP_HEARTBEAT_SECONDS") {
            self.connection.heartbeat_seconds = val.parse()?;
        }
        if let Some(val) = lookup("PUBLISHER_EXCHANGE") {
            self.topology.exchange = val;
        }
        if let Some(val) = lookup("PUBLISHER_ROUTING_KEY") {
            self.topology.routing_key = val;
        }
        if let Some(val) = lookup("RECREATE_ON_GRACEFUL_SHUTDOWN") {
            self.recovery.recreate_on_graceful_shutdown = parse_flag("RECREATE_ON_GRACEFUL_SHUTDOWN", &val)?;
        }
        if let Some(val) = lookup("REPUBLISH_ON_CONFIRM") {
            self.recovery.republish_on_confirm = parse_flag("REPUBLISH_ON_CONFIRM", &val)?;
        }
        if let Some(val) = lookup("RECREATE_MAX_ATTEMPTS") {
            self.recovery.max_recreate_attempts = val.parse()?;
        }
        if let Some(val) = lookup("RECREATE_BACKOFF_INITIAL_MS") {
            self.recovery.backoff_initial_ms = val.parse()?;
        }
        if let Some(val) = lookup("RECREATE_BACKOFF_MAX_MS") {
            self.recovery.backoff_max_ms = val.parse()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.connection.uri.is_empty() {
            return Err(PublisherError::ConfigError("connection.uri cannot be empty".to_string()));
        }
        if self.topology.exchange.is_empty() {
            return Err(PublisherError::ConfigError("topology.exchange cannot be empty".to_string()));
        }
        if self.recovery.backoff_initial_ms > self.recovery.backoff_max_ms {
            return Err(PublisherError::ConfigError(
                "recovery.backoff_initial_ms exceeds recovery.backoff_max_ms".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_flag(key: &str, val: &str) -> Result<bool> {
    match val.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(PublisherError::ConfigError(format!("{} must be a boolean, got '{}'", key, other))),
    }
}

pub fn find_config_file() -> Option<PathBuf> {
    // Check various locations
    let locations = [
        ("Current directory", PathBuf::from("publisher.json")),
        ("Current directory (alternative)", PathBuf::from("config/publisher.json")),
    ];

    for (location_name, path) in locations.iter() {
        if path.exists() {
            debug!("Found config file in {}: {}", location_name, path.display());
            return Some(path.clone());
        }
    }

    // Try the user's home directory
    let home_config = home::home_dir()?.join(".publisher.json");
    if home_config.exists() {
        debug!("Found config file in home directory: {}", home_config.display());
        return Some(home_config);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_config_defaults() {
        let config = PublisherConfig::default();
        assert_eq!(config.connection.uri, "amqp://localhost:5672/%2f");
        assert_eq!(config.connection.client_name, "TestClient");
        assert_eq!(config.connection.heartbeat(), Duration::from_secs(10));
        assert_eq!(config.topology.exchange, "TestExchange");
        assert_eq!(config.topology.routing_key, "TestRoute");
        assert!(!config.recovery.recreate_on_graceful_shutdown);
        assert!(!config.recovery.republish_on_confirm);
        assert_eq!(config.recovery.max_recreate_attempts, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = PublisherConfig::default();
        config
            .apply_env(lookup_from(&[
                ("AMQP_ADDR", "amqp://rabbit:5672/%2fvhost"),
                ("AMQP_HEARTBEAT_SECONDS", "30"),
                ("RECREATE_ON_GRACEFUL_SHUTDOWN", "yes"),
                ("RECREATE_MAX_ATTEMPTS", "5"),
            ]))
            .unwrap();

        assert_eq!(config.connection.uri, "amqp://rabbit:5672/%2fvhost");
        assert_eq!(config.connection.heartbeat_seconds, 30);
        assert!(config.recovery.recreate_on_graceful_shutdown);
        assert_eq!(config.recovery.max_recreate_attempts, 5);
        assert_eq!(config.connection.client_name, "TestClient");
    }

    #[test]
    fn test_invalid_env_values_are_config_errors() {
        let mut config = PublisherConfig::default();
        let err = config
            .apply_env(lookup_from(&[("AMQP_HEARTBEAT_SECONDS", "ten")]))
            .unwrap_err();
        assert!(matches!(err, PublisherError::ConfigError(_)));

        let err = config
            .apply_env(lookup_from(&[("REPUBLISH_ON_CONFIRM", "maybe")]))
            .unwrap_err();
        assert!(matches!(err, PublisherError::ConfigError(_)));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: PublisherConfig =
            serde_json::from_str(r#"{ "connection": { "uri": "amqp://other:5672/%2f" } }"#).unwrap();
        assert_eq!(config.connection.uri, "amqp://other:5672/%2f");
        assert_eq!(config.connection.heartbeat_seconds, 10);
        assert_eq!(config.topology.exchange, "TestExchange");
        assert_eq!(config.recovery.backoff_max_ms, 30000);
    }

    #[test]
    fn test_validate_rejects_inverted_backoff() {
        let mut config = PublisherConfig::default();
        config.recovery.backoff_initial_ms = 60000;
        assert!(config.validate().is_err());
    }
}
