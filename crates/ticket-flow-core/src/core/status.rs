// crates/ticket-flow-core/src/core/status.rs
// ============================================================================
// Module: Ticket Flow Status Vocabulary
// Description: Flow, ticket and engine status enums plus their mappings.
// Purpose: Fix the status vocabulary every other component derives into.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Three state machines meet here. The DAG engine reports its own vocabulary
//! ([`EngineState`]); flows collapse it into the fixed [`FlowStatus`] set; the
//! ticket status is a pure function of its flows (see
//! [`crate::core::ticket::derive_ticket_status`]).

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Flow Status
// ============================================================================

/// Status of a single flow.
///
/// # Invariants
/// - `Succeeded` and `Skipped` never revert.
/// - `Revoked` and `Terminated` are final.
/// - `Failed` may be reset to `Running` by a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    /// Not started yet.
    Pending,
    /// Submitted, or awaiting an approval decision.
    Running,
    /// Completed successfully.
    Succeeded,
    /// Completed with an error recorded on the flow.
    Failed,
    /// Overridden by an operator; treated as passed.
    Skipped,
    /// Cancelled before or during execution.
    Revoked,
    /// Forced closed after cancellation could not be confirmed.
    Terminated,
}

impl FlowStatus {
    /// Returns true when the ticket may advance past this flow.
    #[must_use]
    pub const fn is_passed(self) -> bool {
        matches!(self, Self::Succeeded | Self::Skipped)
    }

    /// Returns true when the status can never change again.
    #[must_use]
    pub const fn is_final(self) -> bool {
        matches!(self, Self::Succeeded | Self::Skipped | Self::Revoked | Self::Terminated)
    }

    /// Returns true when the flow no longer acts on its resources.
    ///
    /// Pending and running flows are the only ones that hold exclusivity.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    /// Returns the stable wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Revoked => "revoked",
            Self::Terminated => "terminated",
        }
    }

    /// Parses a wire label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            "revoked" => Some(Self::Revoked),
            "terminated" => Some(Self::Terminated),
            _ => None,
        }
    }
}

impl fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Ticket Status
// ============================================================================

/// Ticket status derived from its flows. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    /// No flow has started.
    Pending,
    /// Some flow is in progress, awaiting approval, or waiting for a lock.
    Running,
    /// Every flow passed.
    Succeeded,
    /// The current flow failed and needs operator or scheduler action.
    Failed,
    /// The ticket was revoked.
    Revoked,
    /// The ticket was force-closed.
    Terminated,
}

impl TicketStatus {
    /// Returns true when no further progression is possible.
    #[must_use]
    pub const fn is_closed(self) -> bool {
        matches!(self, Self::Succeeded | Self::Revoked | Self::Terminated)
    }

    /// Returns the stable wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Revoked => "revoked",
            Self::Terminated => "terminated",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Engine State
// ============================================================================

/// Raw state vocabulary reported by the external DAG engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// Accepted but not scheduled. Every node is here right after submission.
    Created,
    /// Scheduled, waiting for a worker.
    Ready,
    /// Executing.
    Running,
    /// Waiting for an external callback.
    Suspended,
    /// Waiting on an operator decision after an error.
    Blocked,
    /// Completed successfully (including skipped nodes).
    Finished,
    /// Completed with an error.
    Failed,
    /// Cancelled.
    Revoked,
}

impl EngineState {
    /// Returns the stable wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Blocked => "blocked",
            Self::Finished => "finished",
            Self::Failed => "failed",
            Self::Revoked => "revoked",
        }
    }

    /// Returns true for states the engine will never leave on its own.
    #[must_use]
    pub const fn is_settled(self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Revoked)
    }

    /// Returns true when nothing has executed yet.
    #[must_use]
    pub const fn is_not_started(self) -> bool {
        matches!(self, Self::Created | Self::Ready)
    }

    /// Maps an engine root state onto the flow status set.
    ///
    /// A submitted root that has not started yet is already a running flow.
    #[must_use]
    pub const fn to_flow_status(self) -> FlowStatus {
        match self {
            Self::Created | Self::Ready | Self::Running | Self::Suspended => FlowStatus::Running,
            Self::Blocked | Self::Failed => FlowStatus::Failed,
            Self::Finished => FlowStatus::Succeeded,
            Self::Revoked => FlowStatus::Revoked,
        }
    }
}
