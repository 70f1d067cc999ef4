// crates/ticket-flow-cli/src/lib.rs
// ============================================================================
// Module: Ticket Flow CLI Library
// Description: Shared helpers for the ticket-flow binary.
// Purpose: Keep process-wide setup testable outside the entry point.
// Dependencies: ticket-flow-config, tracing-subscriber
// ============================================================================

//! ## Overview
//! Hosts that embed the orchestration core in their own binaries can reuse
//! [`logging::init_logging`] to get the same log format and filter rules as
//! the operator CLI.

pub mod logging;
