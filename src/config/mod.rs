//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod messaging;
mod worker;

pub use messaging::{MessagingConfig, DEFAULT_ROLE};
pub use worker::{ConsumerConfig, RetryConfig, SimulatorConfig};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "PAYMENT_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "PAYMENT";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "PAYMENT_LOG";
/// Legacy environment variable for the broker host.
pub const RABBIT_ADDRESS_ENV_VAR: &str = "RABBIT_MQ_ADDRESS";
/// Legacy environment variable for the broker port.
pub const RABBIT_PORT_ENV_VAR: &str = "RABBIT_MQ_PORT";

use ::config::{builder::DefaultState, ConfigBuilder, ConfigError};
use serde::Deserialize;

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Broker connection and topology.
    pub messaging: MessagingConfig,
    /// Broker connection retry.
    pub retry: RetryConfig,
    /// Payment simulator.
    pub simulator: SimulatorConfig,
    /// Consumer loop.
    pub consumer: ConsumerConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    /// 5. `RABBIT_MQ_ADDRESS` / `RABBIT_MQ_PORT`
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let builder = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("messaging.host", std::env::var(RABBIT_ADDRESS_ENV_VAR).ok())?
            .set_override_option("messaging.port", std::env::var(RABBIT_PORT_ENV_VAR).ok())?;

        Self::build(builder)
    }

    fn build(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        builder.build()?.try_deserialize()
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self {
            simulator: SimulatorConfig {
                max_char_delay_ms: 0,
            },
            ..Default::default()
        }
    }
}
