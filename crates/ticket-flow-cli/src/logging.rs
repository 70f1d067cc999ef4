// crates/ticket-flow-cli/src/logging.rs
// ============================================================================
// Module: Logging Setup
// Description: One-time tracing subscriber installation.
// Purpose: Route library events to stderr in the configured format.
// Dependencies: ticket-flow-config, tracing-subscriber
// ============================================================================

//! ## Overview
//! Filter precedence is `RUST_LOG`, then `logging.filter` from the config,
//! then `info`. Events go to stderr so that command output on stdout stays
//! machine-readable.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io;
use std::sync::Once;

use thiserror::Error;
use ticket_flow_config::LogFormat;
use ticket_flow_config::LoggingConfig;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Environment variable consulted before the config filter.
pub const LOG_ENV_VAR: &str = "RUST_LOG";
/// Filter used when neither the environment nor the config sets one.
const DEFAULT_FILTER: &str = "info";

/// Guards subscriber installation.
static INIT: Once = Once::new();

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Logging setup failures.
#[derive(Debug, Error)]
#[error("invalid log filter `{directive}`: {message}")]
pub struct LoggingError {
    /// Directive that failed to parse.
    pub directive: String,
    /// Parser message.
    pub message: String,
}

// ============================================================================
// SECTION: Setup
// ============================================================================

/// Picks the filter directive by precedence.
#[must_use]
pub fn select_directive<'a>(config: &'a LoggingConfig, env_value: Option<&'a str>) -> &'a str {
    env_value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .or(config.filter.as_deref())
        .unwrap_or(DEFAULT_FILTER)
}

/// Builds the filter for the given config and environment value.
///
/// # Errors
///
/// Returns [`LoggingError`] when the selected directive does not parse.
pub fn env_filter(config: &LoggingConfig, env_value: Option<&str>) -> Result<EnvFilter, LoggingError> {
    let directive = select_directive(config, env_value);
    EnvFilter::try_new(directive).map_err(|err| LoggingError {
        directive: directive.to_string(),
        message: err.to_string(),
    })
}

/// Installs the global subscriber once; later calls are no-ops.
///
/// # Errors
///
/// Returns [`LoggingError`] when the filter does not parse.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    let env_value = std::env::var(LOG_ENV_VAR).ok();
    let filter = env_filter(config, env_value.as_deref())?;
    let format = config.format;
    INIT.call_once(move || {
        // Another subscriber may already be installed by an embedding host.
        let _ = match format {
            LogFormat::Json => tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(io::stderr))
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().pretty().with_writer(io::stderr))
                .try_init(),
        };
    });
    Ok(())
}
