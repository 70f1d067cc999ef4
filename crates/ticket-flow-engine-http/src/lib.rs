// crates/ticket-flow-engine-http/src/lib.rs
// ============================================================================
// Module: Ticket Flow HTTP Engine Library
// Description: HTTP client for the external DAG engine.
// Purpose: Expose the REST-backed DagEngine implementation.
// Dependencies: ticket-flow-core, reqwest, url
// ============================================================================

//! ## Overview
//! [`HttpDagEngine`] implements [`ticket_flow_core::DagEngine`] against a JSON
//! REST surface. It is blocking; async hosts call it from a blocking pool.

pub mod client;

pub use client::HttpDagEngine;
pub use client::HttpEngineConfig;
pub use client::HttpEngineError;
