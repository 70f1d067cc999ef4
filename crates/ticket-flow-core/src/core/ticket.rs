// crates/ticket-flow-core/src/core/ticket.rs
// ============================================================================
// Module: Ticket Aggregate
// Description: Ticket metadata plus the pure status derivation over its flows.
// Purpose: Keep ticket status a function of flow statuses, never stored.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! A ticket owns an ordered list of flows. Exactly one flow is current: the
//! first one that has not passed (succeeded or skipped). Everything before it
//! has passed and everything after it is still pending. The ticket status is
//! derived from the current flow alone.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::error::FlowErrorCode;
use crate::core::flow::FlowDraft;
use crate::core::flow::FlowRecord;
use crate::core::identifiers::FlowId;
use crate::core::identifiers::TicketId;
use crate::core::identifiers::TicketType;
use crate::core::status::FlowStatus;
use crate::core::status::TicketStatus;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Ticket Types
// ============================================================================

/// Ticket creation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTicket {
    /// Ticket type tag.
    pub ticket_type: TicketType,
    /// Submitting user.
    pub requester: String,
    /// Target business identifier.
    pub business_id: u64,
    /// Ticket payload.
    pub payload: Value,
}

/// Ticket plus flows ready to be persisted in one store call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketDraft {
    /// Creation request.
    pub request: NewTicket,
    /// Ordered flow drafts.
    pub flows: Vec<FlowDraft>,
    /// Creation time.
    pub created_at: Timestamp,
}

/// Persisted ticket.
///
/// # Invariants
/// - `flow_ids` is non-empty and in execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    /// Ticket identifier.
    pub id: TicketId,
    /// Ticket type tag.
    pub ticket_type: TicketType,
    /// Submitting user.
    pub requester: String,
    /// Target business identifier.
    pub business_id: u64,
    /// Ordered flow identifiers.
    pub flow_ids: Vec<FlowId>,
    /// Ticket payload.
    pub payload: Value,
    /// Creation time.
    pub created_at: Timestamp,
}

// ============================================================================
// SECTION: Status Derivation
// ============================================================================

/// Returns the index of the current flow, or `None` when every flow passed.
#[must_use]
pub fn current_flow_index(flows: &[FlowRecord]) -> Option<usize> {
    flows.iter().position(|flow| !flow.status.is_passed())
}

/// Derives the ticket status from its ordered flows.
///
/// Exclusion conflicts surface as `Running`: the ticket is only waiting for
/// a lock and is retried automatically.
#[must_use]
pub fn derive_ticket_status(flows: &[FlowRecord]) -> TicketStatus {
    let Some(index) = current_flow_index(flows) else {
        return TicketStatus::Succeeded;
    };
    let current = &flows[index];
    match current.status {
        FlowStatus::Pending if index == 0 => TicketStatus::Pending,
        FlowStatus::Pending | FlowStatus::Running => TicketStatus::Running,
        FlowStatus::Failed => {
            let waiting_on_lock = current
                .error
                .as_ref()
                .is_some_and(|error| error.code == FlowErrorCode::ExclusionConflict);
            if waiting_on_lock { TicketStatus::Running } else { TicketStatus::Failed }
        }
        FlowStatus::Revoked => TicketStatus::Revoked,
        FlowStatus::Terminated => TicketStatus::Terminated,
        FlowStatus::Succeeded | FlowStatus::Skipped => TicketStatus::Succeeded,
    }
}

/// Builds the human-readable ticket summary from its flows.
#[must_use]
pub fn ticket_summary(flows: &[FlowRecord]) -> Option<String> {
    if let Some(index) = current_flow_index(flows) {
        let current = &flows[index];
        if let Some(error) = &current.error {
            return Some(format!("flow '{}' failed: {}", current.name, error.message));
        }
        if let Some(approval) = &current.approval {
            return Some(format!("flow '{}' decided by {}", current.name, approval.actor));
        }
    }
    let notes: Vec<String> = flows
        .iter()
        .filter_map(|flow| flow.summary.as_ref().map(|note| format!("{}: {note}", flow.name)))
        .collect();
    if notes.is_empty() { None } else { Some(notes.join("; ")) }
}
