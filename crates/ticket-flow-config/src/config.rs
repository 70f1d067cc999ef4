// crates/ticket-flow-config/src/config.rs
// ============================================================================
// Module: Ticket Flow Configuration
// Description: Configuration loading and validation for ticket-flow.
// Purpose: Provide strict config parsing with hard size and path limits.
// Dependencies: ticket-flow-engine-http, ticket-flow-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with size and path limits. Every
//! section is optional and falls back to its defaults; explicit values are
//! range-checked by [`TicketFlowConfig::validate`].
//!
//! Resolution order for the file: explicit path, then the
//! `TICKET_FLOW_CONFIG` environment variable, then `ticket-flow.toml` in the
//! working directory.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use ticket_flow_engine_http::HttpEngineConfig;
use ticket_flow_store_sqlite::SqliteStoreConfig;
use ticket_flow_store_sqlite::SqliteStoreMode;
use ticket_flow_store_sqlite::SqliteSyncMode;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "ticket-flow.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "TICKET_FLOW_CONFIG";
/// Maximum configuration file size in bytes.
pub const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Largest accepted worker pool.
pub const MAX_WORKER_POOL_SIZE: usize = 256;
/// Shortest accepted reconcile interval in milliseconds.
pub const MIN_RECONCILE_INTERVAL_MS: u64 = 100;
/// Default worker pool size.
const DEFAULT_WORKER_POOL_SIZE: usize = 8;
/// Default reconcile interval in milliseconds.
const DEFAULT_RECONCILE_INTERVAL_MS: u64 = 30_000;
/// Default cap on tickets visited per reconcile sweep.
const DEFAULT_MAX_TICKETS_PER_SWEEP: usize = 500;
/// Default `SQLite` busy timeout in milliseconds.
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Maximum length of a log filter directive.
const MAX_LOG_FILTER_LENGTH: usize = 1024;
/// Maximum engine request timeout in milliseconds.
const MAX_ENGINE_TIMEOUT_MS: u64 = 300_000;
/// Maximum engine response size in bytes.
const MAX_ENGINE_RESPONSE_BYTES: usize = 64 * 1024 * 1024;

// ============================================================================
// SECTION: Configuration Types
// ============================================================================

/// Ticket Flow runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TicketFlowConfig {
    /// Worker pool and reconciler settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Ticket store backend.
    #[serde(default)]
    pub store: StoreConfig,
    /// DAG engine client settings.
    #[serde(default)]
    pub engine: HttpEngineConfig,
    /// Logging output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TicketFlowConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path("config path", &resolved)?;
        let bytes = fs::read(&resolved)
            .map_err(|err| ConfigError::Io(format!("{}: {err}", resolved.display())))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        Self::from_toml(content)
    }

    /// Parses and validates configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when parsing or validation fails.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scheduler.validate()?;
        self.store.validate()?;
        validate_engine(&self.engine)?;
        self.logging.validate()
    }
}

/// Worker pool and reconciler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum tickets advanced concurrently.
    pub worker_pool_size: usize,
    /// Period of the reconciliation sweep in milliseconds.
    pub reconcile_interval_ms: u64,
    /// Maximum open tickets visited per sweep.
    pub max_tickets_per_sweep: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            reconcile_interval_ms: DEFAULT_RECONCILE_INTERVAL_MS,
            max_tickets_per_sweep: DEFAULT_MAX_TICKETS_PER_SWEEP,
        }
    }
}

impl SchedulerConfig {
    /// Returns the reconcile interval as a duration.
    #[must_use]
    pub const fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }

    /// Validates scheduler limits.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_pool_size == 0 || self.worker_pool_size > MAX_WORKER_POOL_SIZE {
            return Err(ConfigError::Invalid(format!(
                "scheduler.worker_pool_size must be between 1 and {MAX_WORKER_POOL_SIZE}"
            )));
        }
        if self.reconcile_interval_ms < MIN_RECONCILE_INTERVAL_MS {
            return Err(ConfigError::Invalid(format!(
                "scheduler.reconcile_interval_ms must be at least {MIN_RECONCILE_INTERVAL_MS}"
            )));
        }
        if self.max_tickets_per_sweep == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.max_tickets_per_sweep must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Ticket store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store backend type.
    #[serde(rename = "type", default)]
    pub store_type: StoreType,
    /// `SQLite` database path when using the sqlite backend.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` synchronous mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_type: StoreType::default(),
            path: None,
            busy_timeout_ms: default_busy_timeout_ms(),
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
        }
    }
}

impl StoreConfig {
    /// Returns the `SQLite` store config, or `None` for the memory backend.
    #[must_use]
    pub fn sqlite(&self) -> Option<SqliteStoreConfig> {
        match (self.store_type, &self.path) {
            (StoreType::Sqlite, Some(path)) => Some(SqliteStoreConfig {
                path: path.clone(),
                busy_timeout_ms: self.busy_timeout_ms,
                journal_mode: self.journal_mode,
                sync_mode: self.sync_mode,
            }),
            _ => None,
        }
    }

    /// Validates store configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        match self.store_type {
            StoreType::Memory => {
                if self.path.is_some() {
                    return Err(ConfigError::Invalid(
                        "memory store must not set path".to_string(),
                    ));
                }
                Ok(())
            }
            StoreType::Sqlite => {
                let path = self.path.as_ref().ok_or_else(|| {
                    ConfigError::Invalid("sqlite store requires path".to_string())
                })?;
                if path.as_os_str().is_empty() {
                    return Err(ConfigError::Invalid("store.path must be non-empty".to_string()));
                }
                validate_path("store.path", path)
            }
        }
    }
}

/// Ticket store backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreType {
    /// In-memory store; state is lost on exit.
    #[default]
    Memory,
    /// `SQLite`-backed durable store.
    Sqlite,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// Filter directive used when `RUST_LOG` is unset, e.g. `ticket_flow_core=debug`.
    pub filter: Option<String>,
}

impl LoggingConfig {
    /// Validates the filter directive shape.
    fn validate(&self) -> Result<(), ConfigError> {
        let Some(filter) = &self.filter else {
            return Ok(());
        };
        if filter.trim().is_empty() {
            return Err(ConfigError::Invalid("logging.filter must be non-empty when set".to_string()));
        }
        if filter.len() > MAX_LOG_FILTER_LENGTH {
            return Err(ConfigError::Invalid("logging.filter exceeds max length".to_string()));
        }
        Ok(())
    }
}

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// Resolves the config path from the argument or environment defaults.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates a path against length limits.
fn validate_path(field: &str, path: &Path) -> Result<(), ConfigError> {
    if path.to_string_lossy().len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    for component in path.components() {
        if component.as_os_str().to_string_lossy().len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid(format!("{field} component too long")));
        }
    }
    Ok(())
}

/// Validates the engine section.
fn validate_engine(engine: &HttpEngineConfig) -> Result<(), ConfigError> {
    engine.parsed_base_url().map_err(|err| ConfigError::Invalid(format!("engine: {err}")))?;
    if engine.timeout_ms > MAX_ENGINE_TIMEOUT_MS {
        return Err(ConfigError::Invalid(format!(
            "engine.timeout_ms must be at most {MAX_ENGINE_TIMEOUT_MS}"
        )));
    }
    if engine.max_response_bytes > MAX_ENGINE_RESPONSE_BYTES {
        return Err(ConfigError::Invalid(format!(
            "engine.max_response_bytes must be at most {MAX_ENGINE_RESPONSE_BYTES}"
        )));
    }
    if engine.user_agent.trim().is_empty() {
        return Err(ConfigError::Invalid("engine.user_agent must be non-empty".to_string()));
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = TicketFlowConfig::from_toml("").map_err(|err| err.to_string());
        assert_eq!(config, Ok(TicketFlowConfig::default()));
    }

    #[test]
    fn sqlite_config_is_only_built_for_sqlite_backend() {
        let memory = StoreConfig::default();
        assert!(memory.sqlite().is_none());
        let sqlite = StoreConfig {
            store_type: StoreType::Sqlite,
            path: Some(PathBuf::from("data/tickets.db")),
            ..StoreConfig::default()
        };
        let built = sqlite.sqlite().map(|config| config.path);
        assert_eq!(built, Some(PathBuf::from("data/tickets.db")));
    }
}
