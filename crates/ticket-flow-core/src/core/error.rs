// crates/ticket-flow-core/src/core/error.rs
// ============================================================================
// Module: Flow Error Taxonomy
// Description: Error codes and messages captured on failed flows.
// Purpose: Let schedulers tell lock contention apart from real failures.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Flow failures are data, not Rust errors. A flow's `run` captures every
//! failure into a [`FlowError`] on the flow record, and callers only read it
//! back through the flow status. The [`FlowErrorCode`] decides how the
//! reconciler treats the failure.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::core::flow::RetryPolicy;

// ============================================================================
// SECTION: Error Codes
// ============================================================================

/// Category of a flow failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowErrorCode {
    /// Payload rejected before any external call. Never retried automatically.
    Validation,
    /// Another ticket holds a needed resource. Retried on every sweep.
    ExclusionConflict,
    /// The submitted action failed, or a hook failed.
    Execution,
    /// The engine could not be reached. Handled like `Execution`.
    EngineUnreachable,
}

impl FlowErrorCode {
    /// Returns the stable wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::ExclusionConflict => "exclusion_conflict",
            Self::Execution => "execution",
            Self::EngineUnreachable => "engine_unreachable",
        }
    }

    /// Parses a wire label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "validation" => Some(Self::Validation),
            "exclusion_conflict" => Some(Self::ExclusionConflict),
            "execution" => Some(Self::Execution),
            "engine_unreachable" => Some(Self::EngineUnreachable),
            _ => None,
        }
    }

    /// Returns true when the reconciler may retry a flow failed with this code.
    #[must_use]
    pub const fn is_auto_retryable(self, policy: RetryPolicy, attempts: u32) -> bool {
        match self {
            Self::Validation => false,
            Self::ExclusionConflict => true,
            Self::Execution | Self::EngineUnreachable => match policy {
                RetryPolicy::Manual => false,
                RetryPolicy::Automatic {
                    max_attempts,
                } => attempts < max_attempts,
            },
        }
    }

    /// Returns true when a human should be alerted about this failure.
    #[must_use]
    pub const fn needs_operator(self) -> bool {
        !matches!(self, Self::ExclusionConflict)
    }
}

impl fmt::Display for FlowErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Flow Error
// ============================================================================

/// Error captured on a failed flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowError {
    /// Failure category.
    pub code: FlowErrorCode,
    /// Human-readable message surfaced in the ticket summary.
    pub message: String,
}

impl FlowError {
    /// Creates a flow error.
    #[must_use]
    pub fn new(code: FlowErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(FlowErrorCode::Validation, message)
    }

    /// Creates an execution error.
    #[must_use]
    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(FlowErrorCode::Execution, message)
    }
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}
