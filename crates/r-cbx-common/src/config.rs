//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the core runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;
use crate::usecase::UseCase;

fn default_device_port() -> u16 {
    4711
}

fn default_cert_directory() -> PathBuf {
    PathBuf::from(".")
}

fn default_vendor() -> String {
    "Demo".to_owned()
}

fn default_model() -> String {
    "ControlBox".to_owned()
}

fn default_serial_number() -> String {
    "123456789".to_owned()
}

fn default_heartbeat_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_true() -> bool {
    true
}

fn default_ui_listen() -> SocketAddr {
    "0.0.0.0:7080".parse().expect("valid default ui address")
}

fn default_metrics_listen() -> SocketAddr {
    "0.0.0.0:9899"
        .parse()
        .expect("valid default metrics address")
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_level() -> String {
    "debug".to_owned()
}

fn default_tick_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_simulation_seed() -> u64 {
    0xCB0Cu64
}

fn default_device_type() -> String {
    "EnergyManagementSystem".to_owned()
}

fn default_simulated_use_cases() -> Vec<UseCase> {
    vec![UseCase::Lpc, UseCase::Lpp, UseCase::Mgcp]
}

fn default_entity_count() -> u8 {
    1
}

/// Primary configuration object for the control box hub.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub ui: UiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    /// `None` when no file was found and built-in defaults are in effect.
    pub source: Option<PathBuf>,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "R_CBX_CONFIG";

    /// Load configuration, respecting the `R_CBX_CONFIG` override and falling
    /// back to defaults when none of the candidates exist.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration together with the effective source path.
    ///
    /// An explicit `R_CBX_CONFIG` path must exist; candidate paths are probed in
    /// order and skipped when missing.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            let path = candidate.as_ref();
            if path.exists() {
                let config = Self::from_path(path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path.to_path_buf()),
                });
            }
        }

        debug!(
            inspected = %candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            "no configuration file found; using defaults"
        );
        let config = AppConfig::default();
        config.validate()?;
        Ok(LoadedAppConfig {
            config,
            source: None,
        })
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<AppConfig>()
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.hub.device_port == 0 {
            return Err(anyhow!("hub.device_port must be non-zero"));
        }
        if self.metrics.enabled && self.metrics.listen == self.ui.listen {
            return Err(anyhow!(
                "metrics listener {} collides with the ui listener",
                self.metrics.listen
            ));
        }
        self.simulation.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// What the hub does when the currently selected remote denies trust.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TrustDenialPolicy {
    /// Tear the device service down and exit the process.
    #[default]
    Terminate,
    /// Mark the session rejected and keep running.
    Reject,
}

/// Identity of the local control box and behaviour towards remote devices.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default = "default_device_port")]
    pub device_port: u16,
    #[serde(default = "default_cert_directory")]
    pub cert_directory: PathBuf,
    #[serde(default = "default_vendor")]
    pub vendor_code: String,
    #[serde(default = "default_vendor")]
    pub device_brand: String,
    #[serde(default = "default_model")]
    pub device_model: String,
    #[serde(default = "default_serial_number")]
    pub serial_number: String,
    #[serde(default)]
    pub alternate_identifier: Option<String>,
    #[serde(default = "default_heartbeat_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub heartbeat_timeout: Duration,
    /// Trust every visible remote service and allow waiting for trust.
    #[serde(default = "default_true")]
    pub auto_trust: bool,
    #[serde(default)]
    pub trust_denial: TrustDenialPolicy,
}

impl HubConfig {
    /// Identifier advertised next to the serial number.
    pub fn alternate_identifier(&self) -> String {
        self.alternate_identifier.clone().unwrap_or_else(|| {
            format!("{} Simulator SN-{}", self.device_model, self.serial_number)
        })
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            device_port: default_device_port(),
            cert_directory: default_cert_directory(),
            vendor_code: default_vendor(),
            device_brand: default_vendor(),
            device_model: default_model(),
            serial_number: default_serial_number(),
            alternate_identifier: None,
            heartbeat_timeout: default_heartbeat_timeout(),
            auto_trust: true,
            trust_denial: TrustDenialPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiConfig {
    #[serde(default = "default_ui_listen")]
    pub listen: SocketAddr,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            listen: default_ui_listen(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: default_metrics_listen(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_true")]
    pub file_output: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: LogFormat::default(),
            file_prefix: None,
            level: default_log_level(),
            file_output: true,
        }
    }
}

/// In-memory device stack used when no hardware protocol stack is linked.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_tick_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub tick_interval: Duration,
    #[serde(default = "default_simulation_seed")]
    pub random_seed: u64,
    /// Simulated remote devices keyed by SKI.
    #[serde(default)]
    pub devices: IndexMap<String, SimulatedDeviceConfig>,
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.enabled && self.tick_interval.is_zero() {
            return Err(anyhow!("simulation.tick_interval must be non-zero"));
        }
        for (ski, device) in &self.devices {
            if ski.trim().is_empty() {
                return Err(anyhow!("simulated device SKI must not be empty"));
            }
            if device.use_cases.is_empty() {
                return Err(anyhow!(
                    "simulated device '{}' must expose at least one use case",
                    ski
                ));
            }
            if device.entities == 0 {
                return Err(anyhow!(
                    "simulated device '{}' must expose at least one entity",
                    ski
                ));
            }
        }
        Ok(())
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        let mut devices = IndexMap::new();
        devices.insert(
            "sim-ski-0001".to_owned(),
            SimulatedDeviceConfig {
                name: "Simulated Heat Pump".to_owned(),
                ..SimulatedDeviceConfig::default()
            },
        );
        Self {
            enabled: true,
            tick_interval: default_tick_interval(),
            random_seed: default_simulation_seed(),
            devices,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedDeviceConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_vendor")]
    pub brand: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_device_type")]
    pub device_type: String,
    #[serde(default = "default_simulated_use_cases")]
    pub use_cases: Vec<UseCase>,
    #[serde(default = "default_entity_count")]
    pub entities: u8,
    /// Simulate the remote rejecting our trust request after pairing.
    #[serde(default)]
    pub deny_trust: bool,
}

impl Default for SimulatedDeviceConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            brand: default_vendor(),
            model: default_model(),
            device_type: default_device_type(),
            use_cases: default_simulated_use_cases(),
            entities: default_entity_count(),
            deny_trust: false,
        }
    }
}
