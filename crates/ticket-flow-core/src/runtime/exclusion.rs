// crates/ticket-flow-core/src/runtime/exclusion.rs
// ============================================================================
// Module: Exclusion Check
// Description: Cross-ticket resource exclusion on top of the operate-record store.
// Purpose: Keep two tickets from acting on the same resource at the same time.
// Dependencies: crate::core, crate::interfaces, tracing
// ============================================================================

//! ## Overview
//! Before a flow acts on its resources it claims them through the
//! operate-record store. The store performs the check and the write in one
//! transaction, so two flows can never both believe they hold a resource.
//! Records of the same ticket never block, which lets a ticket retry a flow
//! (or run a later flow) on resources it already holds.

// ============================================================================
// SECTION: Imports
// ============================================================================

use tracing::info;

use crate::core::AcquireOutcome;
use crate::core::ExclusionHolder;
use crate::core::FlowError;
use crate::core::FlowErrorCode;
use crate::core::FlowRecord;
use crate::core::OperateClaim;
use crate::core::OperateRecordView;
use crate::core::ResourceId;
use crate::core::Timestamp;
use crate::interfaces::OperateRecordStore;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: Exclusion Check
// ============================================================================

/// Exclusion check bound to an operate-record store.
#[derive(Clone, Copy)]
pub struct ExclusionCheck<'a> {
    /// Shared resource index.
    store: &'a dyn OperateRecordStore,
}

impl<'a> ExclusionCheck<'a> {
    /// Creates a check over `store`.
    #[must_use]
    pub const fn new(store: &'a dyn OperateRecordStore) -> Self {
        Self {
            store,
        }
    }

    /// Claims `resources` for `flow`.
    ///
    /// A flow without resources acquires trivially and writes nothing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store transaction fails.
    pub fn acquire(
        &self,
        flow: &FlowRecord,
        mut resources: Vec<ResourceId>,
        now: Timestamp,
    ) -> Result<AcquireOutcome, StoreError> {
        resources.sort();
        resources.dedup();
        if resources.is_empty() {
            return Ok(AcquireOutcome::Acquired);
        }
        let claim = OperateClaim {
            ticket_id: flow.ticket_id,
            flow_id: flow.id,
            resources,
            claimed_at: now,
        };
        let outcome = self.store.acquire(&claim)?;
        if let AcquireOutcome::Conflict {
            holder,
        } = &outcome
        {
            info!(
                ticket_id = %flow.ticket_id,
                flow_id = %flow.id,
                resource_id = %holder.resource_id,
                holder_ticket_id = %holder.ticket_id,
                "resource held by another ticket"
            );
        }
        Ok(outcome)
    }

    /// Returns the records currently holding a resource.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store cannot be read.
    pub fn holders(&self, resource_id: &ResourceId) -> Result<Vec<OperateRecordView>, StoreError> {
        Ok(self.store.records_for(resource_id)?.into_iter().filter(OperateRecordView::is_active).collect())
    }
}

/// Builds the flow error recorded for a lost acquisition.
#[must_use]
pub fn conflict_error(holder: &ExclusionHolder) -> FlowError {
    FlowError::new(
        FlowErrorCode::ExclusionConflict,
        format!(
            "resource {} is held by ticket {} (flow {})",
            holder.resource_id, holder.ticket_id, holder.flow_id
        ),
    )
}
