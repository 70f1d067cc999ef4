// crates/ticket-flow-core/src/interfaces/mod.rs
// ============================================================================
// Module: Ticket Flow Interfaces
// Description: Backend-agnostic interfaces for the DAG engine, stores and time.
// Purpose: Define the contract surfaces the orchestration runtime depends on.
// Dependencies: crate::core, serde_json, thiserror
// ============================================================================

//! ## Overview
//! The orchestration runtime talks to three collaborators: the external DAG
//! engine, the ticket store and the operate-record store. All of them are
//! synchronous traits; async hosts run the runtime on a blocking pool.
//!
//! The operate-record store must live in the same backend as the ticket
//! store: acquisition reads the status of the flows that own existing
//! records and writes new records in one transaction.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::core::AcquireOutcome;
use crate::core::FlowRecord;
use crate::core::NodeId;
use crate::core::OperateClaim;
use crate::core::OperateRecordView;
use crate::core::PipelineSpec;
use crate::core::ResourceId;
use crate::core::RootHandle;
use crate::core::Ticket;
use crate::core::TicketDraft;
use crate::core::TicketId;
use crate::core::Timestamp;
use crate::core::TreeState;

// ============================================================================
// SECTION: DAG Engine
// ============================================================================

/// Errors reported by a DAG engine client.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The engine could not be reached.
    #[error("dag engine unreachable: {0}")]
    Unreachable(String),
    /// The engine refused the request.
    #[error("dag engine rejected request: {0}")]
    Rejected(String),
    /// The root or node does not exist.
    #[error("dag engine object not found: {0}")]
    NotFound(String),
    /// The engine answered with something unreadable.
    #[error("dag engine protocol error: {0}")]
    Protocol(String),
}

impl EngineError {
    /// Returns true for transport-level failures.
    #[must_use]
    pub const fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Protocol(_))
    }
}

/// External DAG engine contract.
///
/// The engine is a remote state machine. Submission must not execute
/// anything: right after `submit`, every node reports a not-started state.
pub trait DagEngine: Send + Sync {
    /// Submits a pipeline and returns its root handle.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the pipeline is not accepted.
    fn submit(&self, pipeline: &PipelineSpec) -> Result<RootHandle, EngineError>;

    /// Returns the root and per-node states.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the state cannot be read.
    fn tree_state(&self, root: &RootHandle) -> Result<TreeState, EngineError>;

    /// Asks the engine to cancel a root. Returns false when cancellation was not confirmed.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the request fails.
    fn revoke(&self, root: &RootHandle) -> Result<bool, EngineError>;

    /// Re-runs a failed node.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the node cannot be retried.
    fn retry_node(&self, root: &RootHandle, node: &NodeId) -> Result<(), EngineError>;

    /// Marks a failed node finished without running it again.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the node cannot be skipped.
    fn skip_node(&self, root: &RootHandle, node: &NodeId) -> Result<(), EngineError>;

    /// Marks a running or suspended node failed.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the node cannot be failed.
    fn force_fail_node(&self, root: &RootHandle, node: &NodeId) -> Result<(), EngineError>;

    /// Resumes a suspended node with operator-supplied data.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the node is not waiting for a callback.
    fn callback_node(
        &self,
        root: &RootHandle,
        node: &NodeId,
        payload: &Value,
    ) -> Result<(), EngineError>;

    /// Returns log lines recorded for a node.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when logs cannot be fetched.
    fn node_logs(&self, root: &RootHandle, node: &NodeId) -> Result<Vec<String>, EngineError>;
}

impl<T: DagEngine + ?Sized> DagEngine for Arc<T> {
    fn submit(&self, pipeline: &PipelineSpec) -> Result<RootHandle, EngineError> {
        (**self).submit(pipeline)
    }

    fn tree_state(&self, root: &RootHandle) -> Result<TreeState, EngineError> {
        (**self).tree_state(root)
    }

    fn revoke(&self, root: &RootHandle) -> Result<bool, EngineError> {
        (**self).revoke(root)
    }

    fn retry_node(&self, root: &RootHandle, node: &NodeId) -> Result<(), EngineError> {
        (**self).retry_node(root, node)
    }

    fn skip_node(&self, root: &RootHandle, node: &NodeId) -> Result<(), EngineError> {
        (**self).skip_node(root, node)
    }

    fn force_fail_node(&self, root: &RootHandle, node: &NodeId) -> Result<(), EngineError> {
        (**self).force_fail_node(root, node)
    }

    fn callback_node(
        &self,
        root: &RootHandle,
        node: &NodeId,
        payload: &Value,
    ) -> Result<(), EngineError> {
        (**self).callback_node(root, node, payload)
    }

    fn node_logs(&self, root: &RootHandle, node: &NodeId) -> Result<Vec<String>, EngineError> {
        (**self).node_logs(root, node)
    }
}

// ============================================================================
// SECTION: Stores
// ============================================================================

/// Store errors shared by ticket and operate-record stores.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Store I/O error.
    #[error("ticket store io error: {0}")]
    Io(String),
    /// Stored data failed integrity checks.
    #[error("ticket store corruption: {0}")]
    Corrupt(String),
    /// Schema version mismatch.
    #[error("ticket store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid data supplied or stored.
    #[error("ticket store invalid data: {0}")]
    Invalid(String),
    /// Referenced ticket or flow does not exist.
    #[error("ticket store object not found: {0}")]
    NotFound(String),
    /// Backend reported an error.
    #[error("ticket store error: {0}")]
    Store(String),
}

/// Ticket filter for listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketFilter {
    /// Every ticket.
    All,
    /// Tickets with at least one pending, running or failed flow.
    Open,
}

/// Persistence for tickets and their flows.
pub trait TicketStore: Send + Sync {
    /// Persists a ticket and its flows in one transaction, assigning identifiers.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when persisting fails.
    fn create_ticket(&self, draft: &TicketDraft) -> Result<(Ticket, Vec<FlowRecord>), StoreError>;

    /// Loads a ticket.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn load_ticket(&self, ticket_id: TicketId) -> Result<Option<Ticket>, StoreError>;

    /// Loads a ticket's flows ordered by position.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn load_flows(&self, ticket_id: TicketId) -> Result<Vec<FlowRecord>, StoreError>;

    /// Saves existing flows in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when a flow does not exist, or another
    /// [`StoreError`] when saving fails. Nothing is written on error.
    fn save_flows(&self, flows: &[FlowRecord]) -> Result<(), StoreError>;

    /// Lists ticket identifiers in ascending order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when listing fails.
    fn list_tickets(&self, filter: TicketFilter) -> Result<Vec<TicketId>, StoreError>;

    /// Reports store readiness for liveness and readiness checks.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store is unavailable.
    fn readiness(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Shared resource index backing the exclusion check.
pub trait OperateRecordStore: Send + Sync {
    /// Atomically checks and records exclusivity for one flow start.
    ///
    /// A resource is blocked when a record for it belongs to another ticket
    /// and that record's flow is pending or running. Records of the claiming
    /// ticket never block. On success one record per resource is inserted,
    /// or refreshed when the flow already has one. On conflict nothing is
    /// written.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the transaction fails.
    fn acquire(&self, claim: &OperateClaim) -> Result<AcquireOutcome, StoreError>;

    /// Lists records for a resource with their flows' current status.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when listing fails.
    fn records_for(&self, resource_id: &ResourceId) -> Result<Vec<OperateRecordView>, StoreError>;
}

// ============================================================================
// SECTION: Clock
// ============================================================================

/// Time source for orchestration records.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> Timestamp;
}
