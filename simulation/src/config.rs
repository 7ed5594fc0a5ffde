//! Simulation configuration
//!
//! Every field has a default, so a JSON file only needs to name what it
//! changes. Durations are whole milliseconds on the wire.

use std::path::{Path, PathBuf};
use std::time::Duration;

use motesim_routing::{NeighborConfig, RouterConfig};
use motesim_transport::TransportConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Configuration for a simulation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Seed for the run's random generator
    pub seed: u64,
    /// Keep every trace record (counters are kept regardless)
    pub trace: bool,
    pub beacon_interval_ms: u64,
    /// Neighbor silence timeout as a multiple of the beacon interval
    pub expire_multiplier: u32,
    pub ema_alpha: f64,
    pub advert_interval_ms: u64,
    /// Route stale window as a multiple of the advert interval
    pub stale_multiplier: u32,
    /// Hop count treated as unreachable; also the routed-packet TTL
    pub max_hops: u8,
    pub flood_ttl: u8,
    pub transport: TransportSettings,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            trace: true,
            beacon_interval_ms: 1_000,
            expire_multiplier: 3,
            ema_alpha: 0.25,
            advert_interval_ms: 1_000,
            stale_multiplier: 3,
            max_hops: 16,
            flood_ttl: 16,
            transport: TransportSettings::default(),
        }
    }
}

impl SimConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn neighbor(&self) -> NeighborConfig {
        NeighborConfig {
            beacon_interval: Duration::from_millis(self.beacon_interval_ms),
            expire_multiplier: self.expire_multiplier,
            ema_alpha: self.ema_alpha,
        }
    }

    pub fn router(&self) -> RouterConfig {
        RouterConfig {
            advert_interval: Duration::from_millis(self.advert_interval_ms),
            stale_multiplier: self.stale_multiplier,
            max_hops: self.max_hops,
        }
    }
}

/// Transport knobs as they appear in a config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    pub initial_rto_ms: u64,
    pub max_rto_ms: u64,
    pub max_retries: u32,
    pub send_window: u32,
    pub recv_window: u32,
}

impl Default for TransportSettings {
    fn default() -> Self {
        let defaults = TransportConfig::default();
        Self {
            initial_rto_ms: defaults.initial_rto.as_millis() as u64,
            max_rto_ms: defaults.max_rto.as_millis() as u64,
            max_retries: defaults.max_retries,
            send_window: defaults.send_window,
            recv_window: defaults.recv_window,
        }
    }
}

impl From<&TransportSettings> for TransportConfig {
    fn from(settings: &TransportSettings) -> Self {
        TransportConfig {
            initial_rto: Duration::from_millis(settings.initial_rto_ms),
            max_rto: Duration::from_millis(settings.max_rto_ms),
            max_retries: settings.max_retries,
            send_window: settings.send_window,
            recv_window: settings.recv_window,
        }
    }
}
