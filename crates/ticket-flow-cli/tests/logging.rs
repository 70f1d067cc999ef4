// crates/ticket-flow-cli/tests/logging.rs
// ============================================================================
// Module: Logging Setup Tests
// Description: Filter precedence and directive validation.
// Purpose: Ensure RUST_LOG wins over config and bad directives are reported.
// Dependencies: ticket-flow-cli logging module
// ============================================================================

//! ## Overview
//! Passes the environment value explicitly so tests never mutate process
//! environment.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use ticket_flow_cli::logging::env_filter;
use ticket_flow_cli::logging::init_logging;
use ticket_flow_cli::logging::select_directive;
use ticket_flow_config::LogFormat;
use ticket_flow_config::LoggingConfig;

fn with_filter(filter: &str) -> LoggingConfig {
    LoggingConfig {
        format: LogFormat::Json,
        filter: Some(filter.to_string()),
    }
}

#[test]
fn environment_wins_over_config() {
    let config = with_filter("ticket_flow_core=debug");
    assert_eq!(select_directive(&config, Some("warn")), "warn");
}

#[test]
fn blank_environment_falls_back_to_config() {
    let config = with_filter("ticket_flow_core=debug");
    assert_eq!(select_directive(&config, Some("  ")), "ticket_flow_core=debug");
    assert_eq!(select_directive(&config, None), "ticket_flow_core=debug");
}

#[test]
fn default_is_info() {
    assert_eq!(select_directive(&LoggingConfig::default(), None), "info");
}

#[test]
fn invalid_directive_is_reported() {
    let config = with_filter("ticket_flow_core=loud");
    let err = env_filter(&config, None).unwrap_err();
    assert_eq!(err.directive, "ticket_flow_core=loud");
}

#[test]
fn repeated_init_is_a_no_op() {
    let config = LoggingConfig::default();
    init_logging(&config).unwrap();
    init_logging(&config).unwrap();
}
