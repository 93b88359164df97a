//! Runtime configuration and log setup
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkflowConfig {
    pub storage: StorageConfig,
    pub codes: CodeConfig,
    pub concurrency: ConcurrencyConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    pub path: PathBuf,
}

/// Request codes look like `<prefix>-<DEPT>-<n>`, with `n` drawn from the
/// sequence `<scope>-<DEPT>`.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CodeConfig {
    pub prefix: String,
    pub scope: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub max_commit_retries: u32,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("configuration validation failed: {0}")]
    Validation(String),
    #[error("could not install log subscriber: {0}")]
    Logging(String),
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("purchase-requests.db"),
        }
    }
}

impl Default for CodeConfig {
    fn default() -> Self {
        Self {
            prefix: "PR".to_string(),
            scope: "PurchaseRequest".to_string(),
        }
    }
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_commit_retries: 3,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

impl WorkflowConfig {
    /// Defaults, overlaid with `path` when given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                let raw = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml_str(&raw).map_err(|source| ConfigError::ParseFile {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.codes.prefix.trim().is_empty() {
            return Err(ConfigError::Validation("codes.prefix must not be empty".into()));
        }
        if self.codes.scope.trim().is_empty() {
            return Err(ConfigError::Validation("codes.scope must not be empty".into()));
        }
        if self.concurrency.max_commit_retries == 0 {
            return Err(ConfigError::Validation(
                "concurrency.max_commit_retries must be at least 1".into(),
            ));
        }
        self.logging.max_level()?;
        Ok(())
    }
}

impl LoggingConfig {
    pub fn max_level(&self) -> Result<tracing::Level, ConfigError> {
        tracing::Level::from_str(self.level.trim()).map_err(|_| {
            ConfigError::Validation(format!(
                "unsupported log level `{}` (expected trace|debug|info|warn|error)",
                self.level
            ))
        })
    }

    /// `RUST_LOG` when it is set and parses, the configured level otherwise.
    pub fn env_filter(&self) -> Result<EnvFilter, ConfigError> {
        let from_env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
        self.filter_from(from_env.as_deref())
    }

    fn filter_from(&self, directives: Option<&str>) -> Result<EnvFilter, ConfigError> {
        let level = self.max_level()?;
        Ok(directives
            .and_then(|d| EnvFilter::try_new(d).ok())
            .unwrap_or_else(|| EnvFilter::new(level.to_string().to_lowercase())))
    }
}

/// Installs a global fmt subscriber. A second call leaves the first one in
/// place and reports it as an error.
pub fn init_logging(config: &LoggingConfig) -> Result<(), ConfigError> {
    let filter = config.env_filter()?;
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter);
    let installed = match config.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| ConfigError::Logging(e.to_string()))
}
