use crate::bridge::translator::BridgedCluster;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("Unknown cluster name in configuration: {0}")]
    UnknownCluster(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bridge: BridgeConfig,
    pub endpoints: EndpointConfig,
    pub discovery: DiscoveryConfig,
    pub clusters: ClusterConfig,
}

/// Timing and sizing of the device bridge itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Zigbee endpoint the bridge sends from and binds to.
    pub local_endpoint: u8,
    pub max_devices: usize,
    pub write_timeout_ms: u64,
    pub command_timeout_ms: u64,
    pub read_timeout_ms: u64,
    /// Delay after an acknowledged command before the caller is released.
    pub settle_ms: u64,
    pub handoff_timeout_ms: u64,
}

/// Layout of the Matter dynamic endpoint table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub dynamic_endpoint_count: usize,
    pub first_dynamic_endpoint_id: u16,
    pub last_endpoint_id: u16,
    /// Aggregator endpoint the bridged endpoints hang off.
    pub parent_endpoint_id: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub request_timeout_ms: u64,
    pub max_retries: u8,
    /// Hold devices in AuthorizationDiscovery until the trust center reports them.
    pub require_authorization: bool,
    pub reporting_min_interval_s: u16,
    pub reporting_max_interval_base_s: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Cluster names to expose; empty exposes every supported cluster.
    pub enabled: Vec<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            local_endpoint: 1,
            max_devices: 255,
            write_timeout_ms: 3000,
            command_timeout_ms: 3000,
            read_timeout_ms: 2000,
            settle_ms: 300,
            handoff_timeout_ms: 30_000,
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            dynamic_endpoint_count: 16,
            first_dynamic_endpoint_id: 2,
            last_endpoint_id: 0xFFFE,
            parent_endpoint_id: 1,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 5000,
            max_retries: 3,
            require_authorization: false,
            reporting_min_interval_s: 30,
            reporting_max_interval_base_s: 90,
        }
    }
}

impl BridgeConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn handoff_timeout(&self) -> Duration {
        Duration::from_millis(self.handoff_timeout_ms)
    }
}

impl DiscoveryConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl ClusterConfig {
    /// Resolve the configured names into clusters.
    pub fn resolve(&self) -> Result<Vec<BridgedCluster>, ConfigError> {
        if self.enabled.is_empty() {
            return Ok(BridgedCluster::all());
        }
        self.enabled
            .iter()
            .map(|name| {
                name.trim()
                    .parse::<BridgedCluster>()
                    .map_err(|_| ConfigError::UnknownCluster(name.clone()))
            })
            .collect()
    }
}

impl Config {
    /// Load a JSON configuration file. Missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Apply `BRIDGE_*` environment overrides on top of `self`.
    pub fn with_env(mut self) -> Self {
        if let Ok(v) = std::env::var("BRIDGE_MAX_DEVICES")
            && let Ok(n) = v.parse()
        {
            self.bridge.max_devices = n;
        }
        if let Ok(v) = std::env::var("BRIDGE_WRITE_TIMEOUT_MS")
            && let Ok(ms) = v.parse()
        {
            self.bridge.write_timeout_ms = ms;
        }
        if let Ok(v) = std::env::var("BRIDGE_COMMAND_TIMEOUT_MS")
            && let Ok(ms) = v.parse()
        {
            self.bridge.command_timeout_ms = ms;
        }
        if let Ok(v) = std::env::var("BRIDGE_READ_TIMEOUT_MS")
            && let Ok(ms) = v.parse()
        {
            self.bridge.read_timeout_ms = ms;
        }
        if let Ok(v) = std::env::var("BRIDGE_SETTLE_MS")
            && let Ok(ms) = v.parse()
        {
            self.bridge.settle_ms = ms;
        }
        if let Ok(v) = std::env::var("BRIDGE_DYNAMIC_ENDPOINTS")
            && let Ok(n) = v.parse()
        {
            self.endpoints.dynamic_endpoint_count = n;
        }
        if let Ok(v) = std::env::var("BRIDGE_FIRST_DYNAMIC_ENDPOINT")
            && let Ok(id) = v.parse()
        {
            self.endpoints.first_dynamic_endpoint_id = id;
        }
        if let Ok(v) = std::env::var("BRIDGE_DISCOVERY_RETRIES")
            && let Ok(n) = v.parse()
        {
            self.discovery.max_retries = n;
        }
        if let Ok(v) = std::env::var("BRIDGE_ENABLED_CLUSTERS") {
            self.clusters.enabled = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        self
    }

    pub fn from_env() -> Self {
        Self::default().with_env()
    }
}
