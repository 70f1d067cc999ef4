// crates/ticket-flow-core/src/runtime/store.rs
// ============================================================================
// Module: In-Memory Ticket Store
// Description: Mutex-guarded ticket, flow and operate-record store.
// Purpose: Provide a deterministic backend for tests and embedded hosts.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! [`InMemoryTicketStore`] keeps every record behind one mutex, which makes
//! operate-record acquisition trivially atomic with respect to flow saves.
//! It is not durable.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;

use crate::core::AcquireOutcome;
use crate::core::ExclusionHolder;
use crate::core::FlowId;
use crate::core::FlowRecord;
use crate::core::FlowStatus;
use crate::core::OperateClaim;
use crate::core::OperateRecord;
use crate::core::OperateRecordView;
use crate::core::ResourceId;
use crate::core::Ticket;
use crate::core::TicketDraft;
use crate::core::TicketId;
use crate::interfaces::OperateRecordStore;
use crate::interfaces::StoreError;
use crate::interfaces::TicketFilter;
use crate::interfaces::TicketStore;

// ============================================================================
// SECTION: Store
// ============================================================================

/// Store contents guarded by one mutex.
#[derive(Debug, Default)]
struct MemoryState {
    /// Last assigned ticket identifier.
    last_ticket_id: u64,
    /// Last assigned flow identifier.
    last_flow_id: u64,
    /// Tickets by identifier.
    tickets: BTreeMap<TicketId, Ticket>,
    /// Flows by identifier.
    flows: BTreeMap<FlowId, FlowRecord>,
    /// Operate records in insertion order.
    records: Vec<OperateRecord>,
}

impl MemoryState {
    /// Returns the status of a flow referenced by a record.
    fn flow_status(&self, flow_id: FlowId) -> Result<FlowStatus, StoreError> {
        self.flows
            .get(&flow_id)
            .map(|flow| flow.status)
            .ok_or_else(|| StoreError::Corrupt(format!("operate record references missing flow {flow_id}")))
    }
}

/// In-memory ticket and operate-record store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTicketStore {
    /// Shared state.
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryTicketStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the state, mapping poisoning to a store error.
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Store("ticket store mutex poisoned".to_string()))
    }
}

impl TicketStore for InMemoryTicketStore {
    fn create_ticket(&self, draft: &TicketDraft) -> Result<(Ticket, Vec<FlowRecord>), StoreError> {
        if draft.flows.is_empty() {
            return Err(StoreError::Invalid("ticket requires at least one flow".to_string()));
        }
        let mut guard = self.lock()?;
        let ticket_id = TicketId::from_raw(guard.last_ticket_id + 1)
            .ok_or_else(|| StoreError::Store("ticket id overflow".to_string()))?;
        let mut flows = Vec::with_capacity(draft.flows.len());
        let mut next_flow = guard.last_flow_id;
        for (position, flow) in draft.flows.iter().enumerate() {
            next_flow += 1;
            let flow_id = FlowId::from_raw(next_flow)
                .ok_or_else(|| StoreError::Store("flow id overflow".to_string()))?;
            let position = u32::try_from(position)
                .map_err(|_| StoreError::Invalid("too many flows".to_string()))?;
            flows.push(FlowRecord::from_draft(flow_id, ticket_id, position, flow.clone(), draft.created_at));
        }
        let ticket = Ticket {
            id: ticket_id,
            ticket_type: draft.request.ticket_type.clone(),
            requester: draft.request.requester.clone(),
            business_id: draft.request.business_id,
            flow_ids: flows.iter().map(|flow| flow.id).collect(),
            payload: draft.request.payload.clone(),
            created_at: draft.created_at,
        };
        guard.last_ticket_id = ticket_id.get();
        guard.last_flow_id = next_flow;
        guard.tickets.insert(ticket_id, ticket.clone());
        for flow in &flows {
            guard.flows.insert(flow.id, flow.clone());
        }
        drop(guard);
        Ok((ticket, flows))
    }

    fn load_ticket(&self, ticket_id: TicketId) -> Result<Option<Ticket>, StoreError> {
        Ok(self.lock()?.tickets.get(&ticket_id).cloned())
    }

    fn load_flows(&self, ticket_id: TicketId) -> Result<Vec<FlowRecord>, StoreError> {
        let guard = self.lock()?;
        let Some(ticket) = guard.tickets.get(&ticket_id) else {
            return Ok(Vec::new());
        };
        ticket
            .flow_ids
            .iter()
            .map(|flow_id| {
                guard
                    .flows
                    .get(flow_id)
                    .cloned()
                    .ok_or_else(|| StoreError::Corrupt(format!("ticket {ticket_id} missing flow {flow_id}")))
            })
            .collect()
    }

    fn save_flows(&self, flows: &[FlowRecord]) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        for flow in flows {
            match guard.flows.get(&flow.id) {
                Some(existing) if existing.ticket_id == flow.ticket_id => {}
                Some(_) => {
                    return Err(StoreError::Invalid(format!("flow {} changed owner", flow.id)));
                }
                None => return Err(StoreError::NotFound(format!("flow {}", flow.id))),
            }
        }
        for flow in flows {
            guard.flows.insert(flow.id, flow.clone());
        }
        drop(guard);
        Ok(())
    }

    fn list_tickets(&self, filter: TicketFilter) -> Result<Vec<TicketId>, StoreError> {
        let guard = self.lock()?;
        let ids = match filter {
            TicketFilter::All => guard.tickets.keys().copied().collect(),
            TicketFilter::Open => {
                let open: BTreeSet<TicketId> = guard
                    .flows
                    .values()
                    .filter(|flow| {
                        matches!(flow.status, FlowStatus::Pending | FlowStatus::Running | FlowStatus::Failed)
                    })
                    .map(|flow| flow.ticket_id)
                    .collect();
                open.into_iter().collect()
            }
        };
        drop(guard);
        Ok(ids)
    }
}

impl OperateRecordStore for InMemoryTicketStore {
    fn acquire(&self, claim: &OperateClaim) -> Result<AcquireOutcome, StoreError> {
        let mut guard = self.lock()?;
        let resources: BTreeSet<&ResourceId> = claim.resources.iter().collect();
        for record in &guard.records {
            if record.ticket_id == claim.ticket_id || !resources.contains(&record.resource_id) {
                continue;
            }
            if !guard.flow_status(record.flow_id)?.is_terminal() {
                return Ok(AcquireOutcome::Conflict {
                    holder: ExclusionHolder {
                        resource_id: record.resource_id.clone(),
                        ticket_id: record.ticket_id,
                        flow_id: record.flow_id,
                    },
                });
            }
        }
        for resource_id in resources {
            let existing = guard
                .records
                .iter_mut()
                .find(|record| record.flow_id == claim.flow_id && &record.resource_id == resource_id);
            if let Some(record) = existing {
                record.created_at = claim.claimed_at;
            } else {
                guard.records.push(OperateRecord {
                    resource_id: resource_id.clone(),
                    ticket_id: claim.ticket_id,
                    flow_id: claim.flow_id,
                    created_at: claim.claimed_at,
                });
            }
        }
        drop(guard);
        Ok(AcquireOutcome::Acquired)
    }

    fn records_for(&self, resource_id: &ResourceId) -> Result<Vec<OperateRecordView>, StoreError> {
        let guard = self.lock()?;
        guard
            .records
            .iter()
            .filter(|record| &record.resource_id == resource_id)
            .map(|record| {
                Ok(OperateRecordView {
                    record: record.clone(),
                    flow_status: guard.flow_status(record.flow_id)?,
                })
            })
            .collect()
    }
}
