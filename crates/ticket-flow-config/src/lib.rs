// crates/ticket-flow-config/src/lib.rs
// ============================================================================
// Module: Ticket Flow Config Library
// Description: Configuration model and validation for ticket-flow.toml.
// Purpose: Single source of truth for runtime configuration semantics.
// Dependencies: serde, toml
// ============================================================================

//! ## Overview
//! `ticket-flow-config` loads `ticket-flow.toml`, applies defaults for every
//! missing section and validates the result. Invalid configuration fails
//! closed.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
