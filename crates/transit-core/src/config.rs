//! Configuration loading and typed config structures for Transit Live.
//!
//! The canonical configuration lives in `transit-config.yaml` at the project
//! root. This module defines strongly-typed structs that mirror the YAML
//! structure, and provides a loader that reads and validates the file.
//! Every field has a default, so an empty or missing file yields a runnable
//! configuration backed by the in-memory store.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value parsed but is out of range.
    #[error("invalid config: {field}: {reason}")]
    Invalid {
        /// Dotted path of the offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level service configuration.
///
/// Mirrors the structure of `transit-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TransitConfig {
    /// Tick loop and motion model.
    #[serde(default)]
    pub simulation: SimulationSettings,

    /// External delay predictor.
    #[serde(default)]
    pub predictor: PredictorConfig,

    /// Realtime connection hub.
    #[serde(default)]
    pub hub: HubConfig,

    /// Infrastructure connection strings.
    #[serde(default)]
    pub infrastructure: InfrastructureConfig,

    /// Notification housekeeping.
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TransitConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values:
    /// - `DATABASE_URL` overrides `infrastructure.database_url`
    /// - `PREDICTOR_URL` overrides `predictor.url`
    /// - `TRANSIT_PORT` overrides `hub.port`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Load from `path` if it exists, otherwise start from defaults.
    ///
    /// Environment overrides apply either way.
    ///
    /// # Errors
    ///
    /// Same as [`TransitConfig::from_file`].
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            return Self::from_file(path);
        }
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes to unit, not an empty mapping.
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Override infrastructure settings with environment variables when set.
    ///
    /// This allows Docker Compose (or any deployment) to set connection
    /// strings via env vars without modifying the YAML config file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("DATABASE_URL") {
            self.infrastructure.database_url = Some(val);
        }
        if let Ok(val) = std::env::var("PREDICTOR_URL") {
            self.predictor.url = Some(val);
        }
        if let Some(port) = std::env::var("TRANSIT_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
        {
            self.hub.port = port;
        }
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sim = &self.simulation;
        if sim.tick_interval_ms < 100 {
            return Err(invalid("simulation.tick_interval_ms", "must be at least 100"));
        }
        if !sim.base_speed_kmh.is_finite() || sim.base_speed_kmh <= 0.0 {
            return Err(invalid("simulation.base_speed_kmh", "must be positive"));
        }
        if !sim.delay_threshold_minutes.is_finite() || sim.delay_threshold_minutes < 0.0 {
            return Err(invalid(
                "simulation.delay_threshold_minutes",
                "must be zero or positive",
            ));
        }
        if !(0.0..=1.0).contains(&self.predictor.min_confidence) {
            return Err(invalid("predictor.min_confidence", "must be within [0, 1]"));
        }
        if self.hub.outbound_buffer == 0 {
            return Err(invalid("hub.outbound_buffer", "must be at least 1"));
        }
        if self.hub.heartbeat_interval_secs == 0 {
            return Err(invalid("hub.heartbeat_interval_secs", "must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_owned(),
    }
}

/// Tick loop and motion model configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SimulationSettings {
    /// Real-time milliseconds between ticks. Also the simulated time step.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Cruising speed in km/h.
    #[serde(default = "default_base_speed_kmh")]
    pub base_speed_kmh: f64,

    /// Delay in minutes at or above which riders are notified.
    #[serde(default = "default_delay_threshold_minutes")]
    pub delay_threshold_minutes: f64,

    /// Delay in minutes above which notifications are high priority.
    #[serde(default = "default_high_priority_delay_minutes")]
    pub high_priority_delay_minutes: f64,

    /// Seed for the delay model RNG.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Upper bound on any single store or predictor call.
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,

    /// Pause after a failed tick before trying again.
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,

    /// How long shutdown waits for an in-flight tick.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// ETA reported for a stationary vehicle, in minutes.
    #[serde(default = "default_eta_minutes")]
    pub default_eta_minutes: f64,
}

impl SimulationSettings {
    /// Tick interval as a [`Duration`].
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// I/O timeout as a [`Duration`].
    pub const fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    /// Error backoff as a [`Duration`].
    pub const fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    /// Shutdown grace period as a [`Duration`].
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            base_speed_kmh: default_base_speed_kmh(),
            delay_threshold_minutes: default_delay_threshold_minutes(),
            high_priority_delay_minutes: default_high_priority_delay_minutes(),
            seed: default_seed(),
            io_timeout_ms: default_io_timeout_ms(),
            error_backoff_ms: default_error_backoff_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            default_eta_minutes: default_eta_minutes(),
        }
    }
}

/// External delay predictor configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PredictorConfig {
    /// Base URL of the predictor. Absent means no predictor is consulted.
    #[serde(default)]
    pub url: Option<String>,

    /// Per-request timeout.
    #[serde(default = "default_predictor_timeout_ms")]
    pub timeout_ms: u64,

    /// Predictions below this confidence are ignored.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: default_predictor_timeout_ms(),
            min_confidence: default_min_confidence(),
        }
    }
}

/// Realtime hub configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HubConfig {
    /// Interface to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Per-connection outbound queue capacity.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,

    /// Seconds between heartbeat sweeps.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Connections older than this are closed by the heartbeat.
    #[serde(default = "default_max_connection_age_secs")]
    pub max_connection_age_secs: u64,

    /// Development tokens accepted at handshake, mapped to user ids.
    #[serde(default)]
    pub static_tokens: BTreeMap<String, String>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            outbound_buffer: default_outbound_buffer(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            max_connection_age_secs: default_max_connection_age_secs(),
            static_tokens: BTreeMap::new(),
        }
    }
}

/// Infrastructure connection strings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InfrastructureConfig {
    /// `PostgreSQL` connection string. Absent means the in-memory store.
    #[serde(default)]
    pub database_url: Option<String>,

    /// Pool size for the `PostgreSQL` store.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for InfrastructureConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: default_max_connections(),
        }
    }
}

/// Notification housekeeping.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NotificationConfig {
    /// Notifications older than this many days are purged.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Seconds between purge runs.
    #[serde(default = "default_retention_interval_secs")]
    pub retention_interval_secs: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            retention_interval_secs: default_retention_interval_secs(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable text.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

const fn default_tick_interval_ms() -> u64 {
    1000
}

const fn default_base_speed_kmh() -> f64 {
    30.0
}

const fn default_delay_threshold_minutes() -> f64 {
    5.0
}

const fn default_high_priority_delay_minutes() -> f64 {
    15.0
}

const fn default_seed() -> u64 {
    42
}

const fn default_io_timeout_ms() -> u64 {
    2000
}

const fn default_error_backoff_ms() -> u64 {
    5000
}

const fn default_shutdown_grace_ms() -> u64 {
    5000
}

const fn default_eta_minutes() -> f64 {
    30.0
}

const fn default_predictor_timeout_ms() -> u64 {
    1500
}

const fn default_min_confidence() -> f64 {
    0.7
}

fn default_host() -> String {
    String::from("0.0.0.0")
}

const fn default_port() -> u16 {
    8080
}

const fn default_outbound_buffer() -> usize {
    64
}

const fn default_heartbeat_interval_secs() -> u64 {
    60
}

const fn default_max_connection_age_secs() -> u64 {
    3600
}

const fn default_max_connections() -> u32 {
    10
}

const fn default_retention_days() -> u32 {
    30
}

const fn default_retention_interval_secs() -> u64 {
    86_400
}

fn default_log_level() -> String {
    String::from("info")
}
