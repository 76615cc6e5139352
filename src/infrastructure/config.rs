//! Configuration infrastructure
//!
//! Settings are layered, later layers winning:
//! 1. Built-in defaults (the `defaults` module)
//! 2. A TOML or JSON config file (format chosen by extension)
//! 3. `WEBHARVEST__`-prefixed environment variables, `__` separating
//!    sections, e.g. `WEBHARVEST__PIPELINE__CONCURRENCY=16`
//!
//! Rule sets are not part of this configuration; they are loaded from their
//! own JSON files by the extraction layer.

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::parsing::ParserOptions;
use crate::pipeline::PipelineConfig;

/// Complete application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub pipeline: PipelineConfig,
    pub parser: ParserOptions,
    pub http: HttpConfig,
    pub logging: LoggingConfig,
}

/// HTTP fetcher settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub user_agent: String,

    /// Whole-request timeout in seconds
    pub timeout_seconds: u64,

    /// Requests per second across all workers
    pub max_requests_per_second: u32,

    pub follow_redirects: bool,

    pub max_redirects: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::USER_AGENT.to_string(),
            timeout_seconds: defaults::REQUEST_TIMEOUT_SECONDS,
            max_requests_per_second: defaults::MAX_REQUESTS_PER_SECOND,
            follow_redirects: true,
            max_redirects: defaults::MAX_REDIRECTS,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Enable JSON formatted file logs
    pub json_format: bool,

    /// Log to stderr
    pub console_output: bool,

    /// Log to a file in `log_dir`
    pub file_output: bool,

    /// Directory for the log file; defaults to the platform data directory
    pub log_dir: Option<PathBuf>,

    pub file_name: String,

    /// Extra per-target levels, e.g. `"webharvest_lib::pipeline" = "debug"`
    pub module_filters: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: false,
            console_output: true,
            file_output: false,
            log_dir: None,
            file_name: defaults::LOG_FILE_NAME.to_string(),
            module_filters: HashMap::new(),
        }
    }
}

pub mod defaults {
    pub const USER_AGENT: &str = concat!("webharvest/", env!("CARGO_PKG_VERSION"));

    /// Default request timeout in seconds
    pub const REQUEST_TIMEOUT_SECONDS: u64 = 30;

    pub const MAX_REQUESTS_PER_SECOND: u32 = 10;

    pub const MAX_REDIRECTS: usize = 10;

    pub const LOG_LEVEL: &str = "info";

    pub const LOG_FILE_NAME: &str = "webharvest.log";

    /// Environment variable prefix, used as `WEBHARVEST__SECTION__KEY`
    pub const ENV_PREFIX: &str = "WEBHARVEST";

    pub const ENV_SEPARATOR: &str = "__";
}

impl AppConfig {
    /// Reject settings that would make the pipeline unusable
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.pipeline.concurrency > 0,
            "pipeline.concurrency must be at least 1"
        );
        anyhow::ensure!(
            self.http.max_requests_per_second > 0,
            "http.max_requests_per_second must be at least 1"
        );
        anyhow::ensure!(
            self.logging.console_output || self.logging.file_output,
            "logging needs console_output or file_output"
        );
        if let Some(max) = self.pipeline.max_documents {
            anyhow::ensure!(max > 0, "pipeline.max_documents must be at least 1");
        }
        Ok(())
    }
}

/// Loads `AppConfig` from defaults, a file and the environment
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_path: Option<PathBuf>,
    file_required: bool,
    /// Replaces the process environment; used by tests
    env_override: Option<HashMap<String, String>>,
}

impl ConfigManager {
    /// Get the application configuration directory
    pub fn get_config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("webharvest"))
    }

    /// Directory for log files and other local data
    pub fn get_data_dir() -> Option<PathBuf> {
        dirs::data_local_dir().map(|dir| dir.join("webharvest"))
    }

    /// Use the per-user config file if it exists
    pub fn new() -> Self {
        Self {
            config_path: Self::get_config_dir().map(|dir| dir.join("config.toml")),
            file_required: false,
            env_override: None,
        }
    }

    /// Use an explicit config file, which must exist
    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: Some(path.into()),
            file_required: true,
            env_override: None,
        }
    }

    /// Skip the config file entirely
    pub fn without_file() -> Self {
        Self {
            config_path: None,
            file_required: false,
            env_override: None,
        }
    }

    /// Read variables from `vars` instead of the process environment
    #[must_use]
    pub fn with_env(mut self, vars: HashMap<String, String>) -> Self {
        self.env_override = Some(vars);
        self
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    pub fn load_config(&self) -> Result<AppConfig> {
        let defaults = Config::try_from(&AppConfig::default())
            .context("Failed to serialize default configuration")?;
        let mut builder = Config::builder().add_source(defaults);

        if let Some(path) = &self.config_path {
            builder = builder.add_source(File::from(path.as_path()).required(self.file_required));
        }

        builder = builder.add_source(
            Environment::with_prefix(defaults::ENV_PREFIX)
                .prefix_separator(defaults::ENV_SEPARATOR)
                .separator(defaults::ENV_SEPARATOR)
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("pipeline.scope")
                .source(self.env_override.clone()),
        );

        let config: AppConfig = builder
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Configuration has invalid values")?;
        config.validate()?;

        match &self.config_path {
            Some(path) if path.exists() => info!("Loaded configuration from: {:?}", path),
            _ => info!("Using built-in configuration defaults"),
        }
        Ok(config)
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}
