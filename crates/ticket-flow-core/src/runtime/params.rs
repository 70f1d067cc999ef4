// crates/ticket-flow-core/src/runtime/params.rs
// ============================================================================
// Module: Flow Param Builders And Hooks
// Description: Ticket-to-flow payload transformation plus pre/post hooks.
// Purpose: Produce each flow's payload and propagate values between flows.
// Dependencies: crate::core, serde_json, thiserror
// ============================================================================

//! ## Overview
//! A [`FlowParamBuilder`] turns a ticket request into one flow's payload when
//! the ticket is created. Hooks adjust payloads later:
//! - a [`PreCallback`] runs right before the flow is submitted and may
//!   rewrite that flow's payload;
//! - a [`PostCallback`] runs once when the flow succeeds and may rewrite the
//!   next flow's payload, as long as the next flow has not started.
//!
//! Hooks must be safe to re-run against the flow they read from. The runtime
//! makes sure a post hook fires once per success transition.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

use crate::core::FlowRecord;
use crate::core::NewTicket;
use crate::core::Ticket;
use crate::core::TreeState;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Param builder failure. Rejects ticket creation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("flow params invalid: {0}")]
pub struct ParamError(pub String);

/// Hook failure. Recorded on the flow as an execution error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("callback failed: {0}")]
pub struct CallbackError(pub String);

// ============================================================================
// SECTION: Param Builders
// ============================================================================

/// Builds one flow's payload from the ticket request.
pub trait FlowParamBuilder: Send + Sync {
    /// Returns the flow payload.
    ///
    /// # Errors
    ///
    /// Returns [`ParamError`] when the request cannot produce a payload.
    fn build(&self, request: &NewTicket) -> Result<Value, ParamError>;
}

/// Copies the ticket payload and overlays fixed additions.
///
/// # Invariants
/// - The ticket payload must be a JSON object when `additions` is non-empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotParams {
    /// Keys written over the ticket payload.
    additions: Map<String, Value>,
}

impl SnapshotParams {
    /// Creates a builder that copies the payload unchanged.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a fixed key to every payload this builder produces.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.additions.insert(key.into(), value);
        self
    }
}

impl FlowParamBuilder for SnapshotParams {
    fn build(&self, request: &NewTicket) -> Result<Value, ParamError> {
        if self.additions.is_empty() {
            return Ok(request.payload.clone());
        }
        let mut payload = match &request.payload {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            _ => {
                return Err(ParamError("ticket payload must be an object".to_string()));
            }
        };
        for (key, value) in &self.additions {
            payload.insert(key.clone(), value.clone());
        }
        Ok(Value::Object(payload))
    }
}

// ============================================================================
// SECTION: Hooks
// ============================================================================

/// Hook run right before a flow is submitted.
pub trait PreCallback: Send + Sync {
    /// Adjusts the payload of the flow about to run.
    ///
    /// # Errors
    ///
    /// Returns [`CallbackError`] when the payload cannot be prepared.
    fn call(&self, ticket: &Ticket, payload: &mut Value) -> Result<(), CallbackError>;
}

/// Input handed to a post hook.
#[derive(Debug)]
pub struct PostCallbackInput<'a> {
    /// Owning ticket.
    pub ticket: &'a Ticket,
    /// Flow that just succeeded.
    pub current: &'a FlowRecord,
    /// Engine tree state of the flow, when engine-backed.
    pub tree: Option<&'a TreeState>,
    /// Payload of the next flow; `None` when there is no next flow or it already started.
    pub next_payload: Option<&'a mut Value>,
}

/// Hook run once on a flow's success transition.
pub trait PostCallback: Send + Sync {
    /// Reads the finished flow and may rewrite the next flow's payload.
    ///
    /// # Errors
    ///
    /// Returns [`CallbackError`] when the result cannot be propagated.
    fn call(&self, input: PostCallbackInput<'_>) -> Result<(), CallbackError>;
}
