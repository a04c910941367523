// Copyright (c) 2026 RoutePulse Project
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/routepulse/routepulse-rs

//! Configuration module

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::streaming::PublisherConfig;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level
    pub log_level: String,

    /// Run against the built-in fleet simulator
    pub demo_mode: bool,

    /// Window aggregation configuration
    pub windows: WindowConfig,

    /// Pipeline engine configuration
    pub engine: EngineConfig,

    /// Alert threshold configuration
    pub alerts: AlertConfig,

    /// Route deviation configuration
    pub routes: RouteConfig,

    /// Summary feed publisher configuration
    pub publisher: PublisherConfig,

    /// Fleet simulator configuration
    pub simulator: SimulatorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            demo_mode: true,
            windows: WindowConfig::default(),
            engine: EngineConfig::default(),
            alerts: AlertConfig::default(),
            routes: RouteConfig::default(),
            publisher: PublisherConfig::default(),
            simulator: SimulatorConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Load or create default configuration
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            let config = Self::default();

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            config.save(path)?;
            Ok(config)
        }
    }

    /// Get configuration directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("routepulse"))
            .unwrap_or_else(|| PathBuf::from("./config"))
    }

    /// Get default configuration path
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Rejects settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.windows.tumbling_secs == 0 {
            return Err(anyhow!("windows.tumbling_secs must be positive"));
        }
        if self.windows.sliding_secs < self.windows.tumbling_secs {
            return Err(anyhow!(
                "windows.sliding_secs must cover at least one tumbling window"
            ));
        }
        if self.alerts.emission_spike_multiplier <= 1.0 {
            return Err(anyhow!("alerts.emission_spike_multiplier must exceed 1.0"));
        }
        if self.routes.deviation_threshold_km <= 0.0 {
            return Err(anyhow!("routes.deviation_threshold_km must be positive"));
        }
        Ok(())
    }
}

/// Window aggregation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Tumbling window length in seconds
    pub tumbling_secs: u64,

    /// Sliding baseline span in seconds
    pub sliding_secs: u64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            tumbling_secs: 300,
            sliding_secs: 1800,
        }
    }
}

/// Pipeline engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seconds without events before a vehicle worker is evicted
    pub idle_evict_secs: u64,

    /// Bounded per-vehicle queue depth
    pub worker_queue_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            idle_evict_secs: 5400,
            worker_queue_depth: 256,
        }
    }
}

/// Alert threshold configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Emission spike fires above this multiple of the trailing baseline
    pub emission_spike_multiplier: f64,

    /// Cold-chain SLA temperature in Celsius
    pub cold_chain_sla_c: f64,

    /// Tolerance above the SLA before the alert fires
    pub cold_chain_tolerance_c: f64,

    /// In-memory alert history depth
    pub alert_log_capacity: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            emission_spike_multiplier: 2.0,
            cold_chain_sla_c: -18.0,
            cold_chain_tolerance_c: 2.0,
            alert_log_capacity: 512,
        }
    }
}

/// Route deviation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Perpendicular offset in km before a deviation alert fires
    pub deviation_threshold_km: f64,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            deviation_threshold_km: 2.0,
        }
    }
}

/// Fleet simulator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Milliseconds between roster rounds
    pub interval_ms: u64,

    /// Per-event chance of a truck entering an anomaly phase
    pub anomaly_probability: f64,

    /// Fixed RNG seed for reproducible streams
    pub seed: Option<u64>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2000,
            anomaly_probability: 0.02,
            seed: None,
        }
    }
}
