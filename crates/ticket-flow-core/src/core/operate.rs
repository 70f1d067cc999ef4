// crates/ticket-flow-core/src/core/operate.rs
// ============================================================================
// Module: Operate Records
// Description: Resource-to-flow association records and acquisition outcomes.
// Purpose: Back the cross-ticket exclusion check with a shared index.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! An operate record says "this flow of this ticket acted on this resource".
//! Records are append-only: a flow that starts again refreshes its own
//! record instead of adding a new one. A record holds exclusivity only while
//! its flow is pending or running; the flow's status is read from the same
//! store in the same transaction as the check.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::FlowId;
use crate::core::identifiers::ResourceId;
use crate::core::identifiers::TicketId;
use crate::core::status::FlowStatus;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Records
// ============================================================================

/// Association between a resource and the flow acting on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperateRecord {
    /// Resource acted on.
    pub resource_id: ResourceId,
    /// Owning ticket.
    pub ticket_id: TicketId,
    /// Owning flow.
    pub flow_id: FlowId,
    /// Time the flow last started acting on the resource.
    pub created_at: Timestamp,
}

/// Operate record joined with its flow's current status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperateRecordView {
    /// Stored record.
    pub record: OperateRecord,
    /// Current status of the owning flow.
    pub flow_status: FlowStatus,
}

impl OperateRecordView {
    /// Returns true when the record currently holds exclusivity.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !self.flow_status.is_terminal()
    }
}

// ============================================================================
// SECTION: Acquisition
// ============================================================================

/// Request to acquire exclusivity on a set of resources for one flow start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperateClaim {
    /// Claiming ticket.
    pub ticket_id: TicketId,
    /// Claiming flow.
    pub flow_id: FlowId,
    /// Resources the flow will touch. Deduplicated by the store.
    pub resources: Vec<ResourceId>,
    /// Claim time.
    pub claimed_at: Timestamp,
}

/// Holder that blocked an acquisition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionHolder {
    /// Contended resource.
    pub resource_id: ResourceId,
    /// Ticket holding the resource.
    pub ticket_id: TicketId,
    /// Flow holding the resource.
    pub flow_id: FlowId,
}

/// Result of an acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AcquireOutcome {
    /// Records were written for every resource.
    Acquired,
    /// Nothing was written; another ticket holds a resource.
    Conflict {
        /// First holder found.
        holder: ExclusionHolder,
    },
}
