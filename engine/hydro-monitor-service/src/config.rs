//! Service configuration management
//!
//! Layering, lowest priority first: built-in defaults, the TOML file, `HYDRO__`
//! environment variables (`HYDRO__CLOCK__SPEED=4`), then command-line
//! overrides.

use std::path::{Path, PathBuf};

use aggregator::{AggregatorConfig, AggregatorError};
use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use dataset_table::{LoadOptions, MatchKey, ValueKind};
use publisher::{PublisherConfig, PublisherError};
use serde::{Deserialize, Serialize};
use simulation_clock::{ClockConfig, ClockError};
use source_adapter::{AdapterConfig, SourceKind};
use thiserror::Error;

/// Config file read when none is given on the command line
pub const DEFAULT_CONFIG_FILE: &str = "hydro-monitor.toml";

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "HYDRO";

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: &[&str] = &["pretty", "compact", "json"];

#[derive(Error, Debug)]
pub enum ServiceConfigError {
    #[error("clock: {0}")]
    Clock(#[from] ClockError),

    #[error("aggregator: {0}")]
    Aggregator(#[from] AggregatorError),

    #[error("publisher: {0}")]
    Publisher(#[from] PublisherError),

    #[error("{section}: {reason}")]
    Invalid { section: String, reason: String },
}

fn invalid(section: &str, reason: impl Into<String>) -> ServiceConfigError {
    ServiceConfigError::Invalid { section: section.to_string(), reason: reason.into() }
}

/// Main service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub clock: ClockConfig,
    pub aggregator: AggregatorConfig,
    pub publisher: PublisherConfig,
    pub sources: SourcesConfig,
    pub dashboard: DashboardConfig,
    pub service: ServiceSettings,
    pub logging: LoggingConfig,
}

/// One replayed dataset and the adapter that follows it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub path: PathBuf,

    #[serde(default)]
    pub load: LoadOptions,

    #[serde(default)]
    pub adapter: AdapterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub rainfall: SourceConfig,
    pub discharge: SourceConfig,

    /// Station status labels; the feed is not started when absent
    pub station_status: Option<SourceConfig>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            // Rain gauge export: seven preamble lines, one day of 5-minute rows,
            // replayed by time of day and rounded up to 0.1 mm/h
            rainfall: SourceConfig {
                path: PathBuf::from("data/rainfall.csv"),
                load: LoadOptions {
                    skip_rows: 7,
                    max_rows: Some(289),
                    value_kind: ValueKind::Numeric { round_up_decimals: Some(1) },
                    match_key: MatchKey::TimeOfDay,
                    ..LoadOptions::default()
                },
                adapter: AdapterConfig::default(),
            },
            discharge: SourceConfig {
                path: PathBuf::from("data/discharge.csv"),
                load: LoadOptions::default(),
                adapter: AdapterConfig::default(),
            },
            station_status: None,
        }
    }
}

impl SourcesConfig {
    /// Configured sources, rainfall and discharge first
    pub fn enabled(&self) -> Vec<(SourceKind, &SourceConfig)> {
        let mut sources =
            vec![(SourceKind::Rainfall, &self.rainfall), (SourceKind::Discharge, &self.discharge)];
        if let Some(status) = &self.station_status {
            sources.push((SourceKind::StationStatus, status));
        }
        sources
    }
}

/// Console observer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub enabled: bool,

    /// Notification interval in milliseconds
    pub interval_ms: u64,

    /// Samples kept in the realtime window
    pub window: usize,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self { enabled: true, interval_ms: 2000, window: 10 }
    }
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Graceful shutdown timeout in seconds, per task
    pub shutdown_timeout_secs: u64,

    /// Namespace of the simulated clock object
    pub clock_namespace_uri: String,

    /// Namespace of the rain gauge and gauging station objects
    pub sensor_namespace_uri: String,

    /// Capacity of the adapter → aggregator and aggregator → publisher channels
    pub channel_capacity: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            shutdown_timeout_secs: 10,
            clock_namespace_uri: "urn:hydro-monitor:clock".to_string(),
            sensor_namespace_uri: "urn:hydro-monitor:sensors".to_string(),
            channel_capacity: 64,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` takes precedence
    pub level: String,

    /// Log format (pretty, compact, json)
    pub format: String,

    /// Log file path (if None, logs to stdout)
    pub file: Option<PathBuf>,

    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "compact".to_string(), file: None, ansi: true }
    }
}

/// Values given on the command line; they win over every other layer
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub start: Option<String>,
    pub speed: Option<u32>,
    pub rainfall_csv: Option<PathBuf>,
    pub discharge_csv: Option<PathBuf>,
    pub log_level: Option<String>,
}

impl ConfigOverrides {
    pub fn apply(&self, config: &mut ServiceConfig) {
        if let Some(start) = &self.start {
            config.clock.start = start.clone();
        }
        if let Some(speed) = self.speed {
            config.clock.speed = speed;
        }
        if let Some(path) = &self.rainfall_csv {
            config.sources.rainfall.path = path.clone();
        }
        if let Some(path) = &self.discharge_csv {
            config.sources.discharge.path = path.clone();
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
    }
}

impl ServiceConfig {
    /// Check every section. Nothing is started when this fails.
    pub fn validate(&self) -> Result<(), ServiceConfigError> {
        self.clock.validate()?;
        self.aggregator.validate()?;
        self.publisher.validate()?;

        for (kind, source) in self.sources.enabled() {
            let section = format!("sources.{kind}");
            if source.path.as_os_str().is_empty() {
                return Err(invalid(&section, "path must not be empty"));
            }
            let numeric = matches!(source.load.value_kind, ValueKind::Numeric { .. });
            let wants_numeric = kind != SourceKind::StationStatus;
            if numeric != wants_numeric {
                let expected = if wants_numeric { "numeric" } else { "label" };
                return Err(invalid(&section, format!("value_kind must be {expected}")));
            }
            if !source.load.delimiter.is_ascii() {
                return Err(invalid(&section, "load.delimiter must be an ASCII character"));
            }
            if source.adapter.retry.max_attempts == 0 {
                return Err(invalid(&section, "adapter.retry.max_attempts must be greater than 0"));
            }
        }

        if self.dashboard.interval_ms == 0 {
            return Err(invalid("dashboard", "interval_ms must be greater than 0"));
        }
        if self.dashboard.window == 0 {
            return Err(invalid("dashboard", "window must be greater than 0"));
        }

        if self.service.shutdown_timeout_secs == 0 {
            return Err(invalid("service", "shutdown_timeout_secs must be greater than 0"));
        }
        if self.service.channel_capacity == 0 {
            return Err(invalid("service", "channel_capacity must be greater than 0"));
        }

        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(invalid("logging", format!("invalid log level {:?}", self.logging.level)));
        }
        if !LOG_FORMATS.contains(&self.logging.format.as_str()) {
            return Err(invalid("logging", format!("invalid log format {:?}", self.logging.format)));
        }

        Ok(())
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX).separator("__").try_parsing(true)
}

/// Load configuration from defaults, `path`, the environment and `overrides`.
/// A missing file is only an error when `required` is set.
pub fn load_config(path: &Path, required: bool, overrides: &ConfigOverrides) -> Result<ServiceConfig> {
    load_layers(path, required, environment(), overrides)
}

pub(crate) fn load_layers(
    path: &Path,
    required: bool,
    env: Environment,
    overrides: &ConfigOverrides,
) -> Result<ServiceConfig> {
    let defaults =
        Config::try_from(&ServiceConfig::default()).context("Failed to encode default configuration")?;

    if path.exists() {
        tracing::debug!("Loading configuration from file: {:?}", path);
    }

    let layered = Config::builder()
        .add_source(defaults)
        .add_source(File::from(path).format(FileFormat::Toml).required(required))
        .add_source(env)
        .build()
        .with_context(|| format!("Failed to read configuration from {path:?}"))?;

    let mut config: ServiceConfig =
        layered.try_deserialize().context("Failed to parse configuration")?;
    overrides.apply(&mut config);
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Write `config` as TOML, e.g. to seed a new deployment
pub fn save_config(config: &ServiceConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config).context("Failed to encode configuration")?;
    std::fs::write(path, content).with_context(|| format!("Failed to write configuration to {path:?}"))?;
    Ok(())
}

/// Effective configuration as pretty JSON
pub fn render_json(config: &ServiceConfig) -> Result<String> {
    serde_json::to_string_pretty(config).context("Failed to encode configuration")
}
