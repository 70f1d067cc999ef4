// crates/ticket-flow-core/src/runtime/manager.rs
// ============================================================================
// Module: Ticket Flow Manager
// Description: Ticket creation, advancement, status and operator controls.
// Purpose: Drive each ticket's ordered flows to completion one at a time.
// Dependencies: crate::{core, interfaces, runtime}, serde, thiserror, tracing
// ============================================================================

//! ## Overview
//! [`TicketFlowManager`] is the single entry point every surface (scheduler,
//! CLI, engine callbacks) uses to act on tickets. Mutating operations are
//! serialized per ticket through an in-process lock, so concurrent calls for
//! the same ticket observe each other's writes. Different tickets proceed in
//! parallel.
//!
//! Ticket status is never stored; it is derived from the flows on every read.
//! Flow failures are data on the flow records; [`ManagerError`] only covers
//! caller mistakes and infrastructure failures.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::info;
use tracing::info_span;
use tracing::warn;

use crate::core::Approval;
use crate::core::ApprovalDecision;
use crate::core::FlowDraft;
use crate::core::FlowErrorCode;
use crate::core::FlowId;
use crate::core::FlowKind;
use crate::core::FlowRecord;
use crate::core::FlowStatus;
use crate::core::NewTicket;
use crate::core::NodeId;
use crate::core::OperateRecordView;
use crate::core::ResourceId;
use crate::core::RootHandle;
use crate::core::Ticket;
use crate::core::TicketDraft;
use crate::core::TicketId;
use crate::core::TicketStatus;
use crate::core::TreeState;
use crate::core::current_flow_index;
use crate::core::derive_ticket_status;
use crate::core::ticket_summary;
use crate::interfaces::Clock;
use crate::interfaces::DagEngine;
use crate::interfaces::EngineError;
use crate::interfaces::OperateRecordStore;
use crate::interfaces::StoreError;
use crate::interfaces::TicketFilter;
use crate::interfaces::TicketStore;
use crate::runtime::exclusion::ExclusionCheck;
use crate::runtime::flow::FlowRuntime;
use crate::runtime::flow::RetryOutcome;
use crate::runtime::params::ParamError;
use crate::runtime::registry::Registry;
use crate::runtime::registry::RegistryError;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Manager errors. Flow failures are recorded on flows, not returned here.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// Ticket does not exist.
    #[error("unknown ticket: {0}")]
    UnknownTicket(TicketId),
    /// Flow does not belong to the ticket.
    #[error("unknown flow {flow_id} for ticket {ticket_id}")]
    UnknownFlow {
        /// Ticket identifier.
        ticket_id: TicketId,
        /// Flow identifier.
        flow_id: FlowId,
    },
    /// Operation is not valid in the ticket's current state.
    #[error("operation not allowed: {0}")]
    NotAllowed(String),
    /// Registry lookup failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// Param builder rejected the request.
    #[error(transparent)]
    Params(#[from] ParamError),
    /// Store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Engine failure during a node operation.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

// ============================================================================
// SECTION: Views
// ============================================================================

/// Ticket snapshot with its derived status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TicketView {
    /// Ticket record.
    pub ticket: Ticket,
    /// Derived ticket status.
    pub status: TicketStatus,
    /// Human-readable summary.
    pub summary: Option<String>,
    /// Flows in ticket order.
    pub flows: Vec<FlowRecord>,
}

impl TicketView {
    /// Derives status and summary from the flows.
    fn new(ticket: Ticket, flows: Vec<FlowRecord>) -> Self {
        Self {
            status: derive_ticket_status(&flows),
            summary: ticket_summary(&flows),
            ticket,
            flows,
        }
    }

    /// Returns the current flow, if any.
    #[must_use]
    pub fn current_flow(&self) -> Option<&FlowRecord> {
        current_flow_index(&self.flows).map(|index| &self.flows[index])
    }
}

/// Flow entry of a ticket tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowTree {
    /// Flow record.
    pub flow: FlowRecord,
    /// Engine tree state for engine-backed flows, when reachable.
    pub tree: Option<TreeState>,
}

/// Operator view of a ticket: flows plus engine trees.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TicketTree {
    /// Ticket record.
    pub ticket: Ticket,
    /// Derived ticket status.
    pub status: TicketStatus,
    /// Human-readable summary.
    pub summary: Option<String>,
    /// Flows with their engine trees.
    pub flows: Vec<FlowTree>,
}

// ============================================================================
// SECTION: Manager
// ============================================================================

/// Drives tickets through their flows.
pub struct TicketFlowManager<S, E, C> {
    /// Tag registry.
    registry: Registry,
    /// Ticket, flow and operate-record store.
    store: S,
    /// DAG engine client.
    engine: E,
    /// Time source.
    clock: C,
    /// Per-ticket serialization locks.
    locks: Mutex<HashMap<TicketId, Arc<Mutex<()>>>>,
}

impl<S, E, C> TicketFlowManager<S, E, C>
where
    S: TicketStore + OperateRecordStore,
    E: DagEngine,
    C: Clock,
{
    /// Creates a manager.
    #[must_use]
    pub fn new(registry: Registry, store: S, engine: E, clock: C) -> Self {
        Self {
            registry,
            store,
            engine,
            clock,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the registry.
    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Returns the store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Returns the engine client.
    #[must_use]
    pub const fn engine(&self) -> &E {
        &self.engine
    }

    /// Returns the number of tickets with a live serialization lock.
    ///
    /// Entries exist only while a call for the ticket is in flight.
    #[must_use]
    pub fn locked_tickets(&self) -> usize {
        self.locks.lock().map_or(0, |locks| locks.len())
    }

    // ------------------------------------------------------------------------
    // Creation and advancement
    // ------------------------------------------------------------------------

    /// Creates a ticket from the registered template and starts its first flow.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Registry`] for unknown ticket types,
    /// [`ManagerError::Params`] when a param builder rejects the request, or
    /// [`ManagerError::Store`] when persisting fails.
    pub fn create(&self, request: NewTicket) -> Result<TicketView, ManagerError> {
        let span = info_span!("ticket.create", ticket_type = %request.ticket_type);
        let _entered = span.enter();
        let templates = self.registry.templates(&request.ticket_type)?;
        let mut flows = Vec::with_capacity(templates.len());
        for template in templates {
            let params = self.registry.param_builder(&template.params)?;
            flows.push(FlowDraft {
                name: template.name.clone(),
                kind: template.kind,
                procedure: template.procedure.clone(),
                retry_policy: template.retry_policy,
                payload: params.build(&request)?,
                callbacks: template.callbacks.clone(),
            });
        }
        let draft = TicketDraft {
            request,
            flows,
            created_at: self.clock.now(),
        };
        let (ticket, _) = self.store.create_ticket(&draft)?;
        info!(ticket_id = %ticket.id, flows = ticket.flow_ids.len(), "ticket created");
        self.run_next_flow(ticket.id)
    }

    /// Refreshes the current flow and starts the following ones while they pass.
    ///
    /// Safe to call repeatedly and concurrently: a running flow is only
    /// refreshed, never started twice.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError`] when the ticket is unknown or the store fails.
    pub fn run_next_flow(&self, ticket_id: TicketId) -> Result<TicketView, ManagerError> {
        let span = info_span!("ticket.advance", ticket_id = %ticket_id);
        let _entered = span.enter();
        let lock = self.ticket_lock(ticket_id)?;
        let _guard = lock.hold()?;
        let (ticket, mut flows) = self.load(ticket_id)?;
        self.drive(&ticket, &mut flows)?;
        Ok(TicketView::new(ticket, flows))
    }

    /// Returns the ticket with its status derived from the stored flows.
    ///
    /// Reads only; the engine is not queried.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError`] when the ticket is unknown or the store fails.
    pub fn update_ticket_status(&self, ticket_id: TicketId) -> Result<TicketView, ManagerError> {
        let (ticket, flows) = self.load(ticket_id)?;
        Ok(TicketView::new(ticket, flows))
    }

    /// Derives and persists one flow's status without advancing the ticket.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError`] when the ticket or flow is unknown or the store fails.
    pub fn refresh_flow(&self, ticket_id: TicketId, flow_id: FlowId) -> Result<FlowRecord, ManagerError> {
        let lock = self.ticket_lock(ticket_id)?;
        let _guard = lock.hold()?;
        let (ticket, mut flows) = self.load(ticket_id)?;
        let index = flow_index(&flows, ticket_id, flow_id)?;
        let (head, tail) = flows.split_at_mut(index + 1);
        if self.runtime().refresh(&ticket, &mut head[index], tail.first_mut()) {
            self.save_window(&flows, index)?;
        }
        Ok(flows.swap_remove(index))
    }

    /// Sweeps one ticket: advances it and auto-retries a retryable failure.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError`] when the ticket is unknown or the store fails.
    pub fn reconcile_ticket(&self, ticket_id: TicketId) -> Result<TicketView, ManagerError> {
        let span = info_span!("ticket.reconcile", ticket_id = %ticket_id);
        let _entered = span.enter();
        let lock = self.ticket_lock(ticket_id)?;
        let _guard = lock.hold()?;
        let (ticket, mut flows) = self.load(ticket_id)?;
        self.drive(&ticket, &mut flows)?;
        if let Some(index) = current_flow_index(&flows)
            && flows[index].is_auto_retryable()
        {
            if flows[index].error.as_ref().is_some_and(|error| error.code == FlowErrorCode::ExclusionConflict) {
                info!(flow_id = %flows[index].id, "retrying flow after exclusion conflict");
            } else {
                info!(flow_id = %flows[index].id, attempt = flows[index].attempts, "retrying failed flow");
            }
            let (head, tail) = flows.split_at_mut(index + 1);
            if let RetryOutcome::Rerun(_) = self.runtime().retry(&ticket, &mut head[index], tail.first_mut()) {
                self.save_window(&flows, index)?;
                self.drive(&ticket, &mut flows)?;
            }
        }
        Ok(TicketView::new(ticket, flows))
    }

    // ------------------------------------------------------------------------
    // Operator controls
    // ------------------------------------------------------------------------

    /// Cancels the current flow and revokes every later flow.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::NotAllowed`] when the ticket already succeeded.
    pub fn revoke(&self, ticket_id: TicketId) -> Result<TicketView, ManagerError> {
        self.cancel(ticket_id, false)
    }

    /// Like [`Self::revoke`], but the current flow always ends terminated.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::NotAllowed`] when the ticket already succeeded.
    pub fn terminate(&self, ticket_id: TicketId) -> Result<TicketView, ManagerError> {
        self.cancel(ticket_id, true)
    }

    /// Retries the current failed flow, then advances.
    ///
    /// A ticket whose current flow is not failed is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::NotAllowed`] when the current flow was revoked
    /// or terminated, or its engine root was revoked.
    pub fn retry(&self, ticket_id: TicketId) -> Result<TicketView, ManagerError> {
        let lock = self.ticket_lock(ticket_id)?;
        let _guard = lock.hold()?;
        let (ticket, mut flows) = self.load(ticket_id)?;
        let Some(index) = current_flow_index(&flows) else {
            return Ok(TicketView::new(ticket, flows));
        };
        if matches!(flows[index].status, FlowStatus::Revoked | FlowStatus::Terminated) {
            return Err(ManagerError::NotAllowed(format!(
                "flow {} is {}",
                flows[index].id, flows[index].status
            )));
        }
        let (head, tail) = flows.split_at_mut(index + 1);
        match self.runtime().retry(&ticket, &mut head[index], tail.first_mut()) {
            RetryOutcome::NoOp => return Ok(TicketView::new(ticket, flows)),
            RetryOutcome::Refused(reason) => return Err(ManagerError::NotAllowed(reason)),
            RetryOutcome::Rerun(status) => {
                info!(ticket_id = %ticket_id, flow_id = %flows[index].id, status = %status, "flow retried");
            }
        }
        self.save_window(&flows, index)?;
        self.drive(&ticket, &mut flows)?;
        Ok(TicketView::new(ticket, flows))
    }

    /// Approves a waiting pause flow and advances the ticket.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::NotAllowed`] unless `flow_id` is the current,
    /// running pause flow.
    pub fn approve(&self, ticket_id: TicketId, flow_id: FlowId, actor: &str) -> Result<TicketView, ManagerError> {
        self.decide(ticket_id, flow_id, actor, ApprovalDecision::Approved)
    }

    /// Rejects a waiting pause flow, revoking it and every later flow.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::NotAllowed`] unless `flow_id` is the current,
    /// running pause flow.
    pub fn reject(&self, ticket_id: TicketId, flow_id: FlowId, actor: &str) -> Result<TicketView, ManagerError> {
        self.decide(ticket_id, flow_id, actor, ApprovalDecision::Rejected)
    }

    /// Marks the current failed flow skipped and advances. The post-callback does not run.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::NotAllowed`] unless `flow_id` is the current, failed flow.
    pub fn skip_flow(&self, ticket_id: TicketId, flow_id: FlowId) -> Result<TicketView, ManagerError> {
        let lock = self.ticket_lock(ticket_id)?;
        let _guard = lock.hold()?;
        let (ticket, mut flows) = self.load(ticket_id)?;
        let index = current_of(&flows, ticket_id, flow_id)?;
        let flow = &mut flows[index];
        if flow.status != FlowStatus::Failed {
            return Err(ManagerError::NotAllowed(format!("flow {flow_id} is {}, not failed", flow.status)));
        }
        if let Some(error) = &flow.error {
            flow.summary = Some(format!("skipped after failure: {}", error.message));
        }
        flow.transition(FlowStatus::Skipped, self.clock.now());
        warn!(ticket_id = %ticket_id, flow_id = %flow_id, "failed flow skipped by operator");
        self.save_window(&flows, index)?;
        self.drive(&ticket, &mut flows)?;
        Ok(TicketView::new(ticket, flows))
    }

    // ------------------------------------------------------------------------
    // Node operations
    // ------------------------------------------------------------------------

    /// Re-runs a failed node of the current flow's engine root.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Engine`] when the engine refuses, or
    /// [`ManagerError::NotAllowed`] when the current flow has no engine root.
    pub fn retry_node(&self, ticket_id: TicketId, node: &NodeId) -> Result<TicketView, ManagerError> {
        self.node_op(ticket_id, |engine, root| engine.retry_node(root, node))
    }

    /// Skips a failed node of the current flow's engine root.
    ///
    /// # Errors
    ///
    /// See [`Self::retry_node`].
    pub fn skip_node(&self, ticket_id: TicketId, node: &NodeId) -> Result<TicketView, ManagerError> {
        self.node_op(ticket_id, |engine, root| engine.skip_node(root, node))
    }

    /// Fails a running or suspended node of the current flow's engine root.
    ///
    /// # Errors
    ///
    /// See [`Self::retry_node`].
    pub fn force_fail_node(&self, ticket_id: TicketId, node: &NodeId) -> Result<TicketView, ManagerError> {
        self.node_op(ticket_id, |engine, root| engine.force_fail_node(root, node))
    }

    /// Resumes a suspended node of the current flow's engine root with operator data.
    ///
    /// # Errors
    ///
    /// See [`Self::retry_node`].
    pub fn callback_node(
        &self,
        ticket_id: TicketId,
        node: &NodeId,
        payload: &Value,
    ) -> Result<TicketView, ManagerError> {
        self.node_op(ticket_id, |engine, root| engine.callback_node(root, node, payload))
    }

    /// Returns log lines of a node in any engine-backed flow of the ticket.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::NotAllowed`] when the flow has no engine root.
    pub fn node_logs(&self, ticket_id: TicketId, flow_id: FlowId, node: &NodeId) -> Result<Vec<String>, ManagerError> {
        let (_, flows) = self.load(ticket_id)?;
        let index = flow_index(&flows, ticket_id, flow_id)?;
        let root = engine_root(&flows[index])?;
        Ok(self.engine.node_logs(root, node)?)
    }

    // ------------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------------

    /// Returns the ticket with every flow's engine tree, when reachable.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError`] when the ticket is unknown or the store fails.
    pub fn tree_state(&self, ticket_id: TicketId) -> Result<TicketTree, ManagerError> {
        let (ticket, flows) = self.load(ticket_id)?;
        let status = derive_ticket_status(&flows);
        let summary = ticket_summary(&flows);
        let flows = flows
            .into_iter()
            .map(|flow| {
                let tree = match (&flow.handle, flow.kind.uses_engine()) {
                    (Some(root), true) => match self.engine.tree_state(root) {
                        Ok(tree) => Some(tree),
                        Err(err) => {
                            warn!(flow_id = %flow.id, root = %root, "engine tree unavailable: {err}");
                            None
                        }
                    },
                    _ => None,
                };
                FlowTree {
                    flow,
                    tree,
                }
            })
            .collect();
        Ok(TicketTree {
            ticket,
            status,
            summary,
            flows,
        })
    }

    /// Lists ticket identifiers.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Store`] when listing fails.
    pub fn list_tickets(&self, filter: TicketFilter) -> Result<Vec<TicketId>, ManagerError> {
        Ok(self.store.list_tickets(filter)?)
    }

    /// Lists operate records currently holding a resource.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Store`] when the store cannot be read.
    pub fn holders(&self, resource_id: &ResourceId) -> Result<Vec<OperateRecordView>, ManagerError> {
        Ok(ExclusionCheck::new(&self.store).holders(resource_id)?)
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    /// Binds the flow runtime to this manager's collaborators.
    fn runtime(&self) -> FlowRuntime<'_> {
        FlowRuntime::new(&self.registry, &self.engine, &self.store, &self.clock)
    }

    /// Returns the lock serializing work on one ticket.
    fn ticket_lock(&self, ticket_id: TicketId) -> Result<TicketLock<'_>, ManagerError> {
        let mut locks =
            self.locks.lock().map_err(|_| StoreError::Store("ticket lock table poisoned".to_string()))?;
        let lock = Arc::clone(locks.entry(ticket_id).or_default());
        drop(locks);
        Ok(TicketLock {
            table: &self.locks,
            ticket_id,
            lock,
        })
    }

    /// Loads a ticket and its ordered flows.
    fn load(&self, ticket_id: TicketId) -> Result<(Ticket, Vec<FlowRecord>), ManagerError> {
        let ticket = self.store.load_ticket(ticket_id)?.ok_or(ManagerError::UnknownTicket(ticket_id))?;
        let flows = self.store.load_flows(ticket_id)?;
        Ok((ticket, flows))
    }

    /// Saves the flow at `index` together with its successor.
    fn save_window(&self, flows: &[FlowRecord], index: usize) -> Result<(), ManagerError> {
        let end = (index + 2).min(flows.len());
        self.store.save_flows(&flows[index..end])?;
        Ok(())
    }

    /// Refreshes or starts the current flow, moving on while flows pass.
    fn drive(&self, ticket: &Ticket, flows: &mut [FlowRecord]) -> Result<(), ManagerError> {
        let runtime = self.runtime();
        while let Some(index) = current_flow_index(flows) {
            let (head, tail) = flows.split_at_mut(index + 1);
            let flow = &mut head[index];
            let next = tail.first_mut();
            let changed = match flow.status {
                FlowStatus::Pending => {
                    runtime.run(ticket, flow, next);
                    true
                }
                FlowStatus::Running | FlowStatus::Failed => runtime.refresh(ticket, flow, next),
                FlowStatus::Succeeded
                | FlowStatus::Skipped
                | FlowStatus::Revoked
                | FlowStatus::Terminated => false,
            };
            if changed {
                self.save_window(flows, index)?;
            }
            if !changed || !flows[index].status.is_passed() {
                break;
            }
        }
        Ok(())
    }

    /// Revokes the current flow and every later flow.
    fn cancel(&self, ticket_id: TicketId, force_terminate: bool) -> Result<TicketView, ManagerError> {
        let span = info_span!("ticket.revoke", ticket_id = %ticket_id, terminate = force_terminate);
        let _entered = span.enter();
        let lock = self.ticket_lock(ticket_id)?;
        let _guard = lock.hold()?;
        let (ticket, mut flows) = self.load(ticket_id)?;
        let Some(index) = current_flow_index(&flows) else {
            return Err(ManagerError::NotAllowed(format!("ticket {ticket_id} already succeeded")));
        };
        let runtime = self.runtime();
        let now = self.clock.now();
        let current = runtime.revoke(&mut flows[index], force_terminate);
        for flow in &mut flows[index + 1..] {
            if !flow.status.is_final() {
                flow.transition(FlowStatus::Revoked, now);
            }
        }
        self.store.save_flows(&flows[index..])?;
        info!(flow_id = %flows[index].id, status = %current, "ticket cancelled");
        Ok(TicketView::new(ticket, flows))
    }

    /// Records an approval decision on the current pause flow.
    fn decide(
        &self,
        ticket_id: TicketId,
        flow_id: FlowId,
        actor: &str,
        decision: ApprovalDecision,
    ) -> Result<TicketView, ManagerError> {
        let lock = self.ticket_lock(ticket_id)?;
        let _guard = lock.hold()?;
        let (ticket, mut flows) = self.load(ticket_id)?;
        let index = current_of(&flows, ticket_id, flow_id)?;
        let flow = &flows[index];
        if flow.kind != FlowKind::Pause || flow.status != FlowStatus::Running {
            return Err(ManagerError::NotAllowed(format!(
                "flow {flow_id} is a {} flow in status {}",
                flow.kind, flow.status
            )));
        }
        let now = self.clock.now();
        flows[index].approval = Some(Approval {
            actor: actor.to_string(),
            decision,
            decided_at: now,
        });
        info!(ticket_id = %ticket_id, flow_id = %flow_id, actor, ?decision, "approval recorded");
        match decision {
            ApprovalDecision::Approved => {
                let (head, tail) = flows.split_at_mut(index + 1);
                self.runtime().complete(&ticket, &mut head[index], tail.first_mut(), None, None);
                self.save_window(&flows, index)?;
                self.drive(&ticket, &mut flows)?;
            }
            ApprovalDecision::Rejected => {
                for flow in &mut flows[index..] {
                    if !flow.status.is_final() {
                        flow.transition(FlowStatus::Revoked, now);
                    }
                }
                self.store.save_flows(&flows[index..])?;
            }
        }
        Ok(TicketView::new(ticket, flows))
    }

    /// Applies an engine node operation to the current flow, then refreshes.
    fn node_op(
        &self,
        ticket_id: TicketId,
        op: impl FnOnce(&E, &RootHandle) -> Result<(), EngineError>,
    ) -> Result<TicketView, ManagerError> {
        let lock = self.ticket_lock(ticket_id)?;
        let _guard = lock.hold()?;
        let (ticket, mut flows) = self.load(ticket_id)?;
        let index = current_flow_index(&flows)
            .ok_or_else(|| ManagerError::NotAllowed(format!("ticket {ticket_id} already succeeded")))?;
        let root = engine_root(&flows[index])?;
        if flows[index].status == FlowStatus::Failed
            && let Err(error) = self.runtime().reclaim(&flows[index])
        {
            return Err(ManagerError::NotAllowed(format!(
                "flow {} cannot resume: {}",
                flows[index].id, error.message
            )));
        }
        op(&self.engine, root)?;
        // The operator acted on the engine; status is re-derived from the tree.
        if flows[index].status == FlowStatus::Failed {
            flows[index].transition(FlowStatus::Running, self.clock.now());
            self.save_window(&flows, index)?;
        }
        self.drive(&ticket, &mut flows)?;
        Ok(TicketView::new(ticket, flows))
    }
}

// ============================================================================
// SECTION: Ticket Locks
// ============================================================================

/// Shared handle on one ticket's serialization lock.
///
/// Dropping the last handle outside the table removes the table entry, so the
/// table only holds tickets with a call in flight.
struct TicketLock<'a> {
    /// Table the lock was taken from.
    table: &'a Mutex<HashMap<TicketId, Arc<Mutex<()>>>>,
    /// Ticket the lock serializes.
    ticket_id: TicketId,
    /// The lock itself.
    lock: Arc<Mutex<()>>,
}

impl TicketLock<'_> {
    /// Locks the ticket, mapping poisoning to a store error.
    fn hold(&self) -> Result<MutexGuard<'_, ()>, ManagerError> {
        self.lock.lock().map_err(|_| ManagerError::Store(StoreError::Store("ticket lock poisoned".to_string())))
    }
}

impl Drop for TicketLock<'_> {
    fn drop(&mut self) {
        let lock = std::mem::take(&mut self.lock);
        // Clones are made and released only under the table lock, so the last
        // handle sees exactly the table's reference besides its own.
        if let Ok(mut locks) = self.table.lock() {
            if Arc::strong_count(&lock) == 2 {
                locks.remove(&self.ticket_id);
            }
            drop(lock);
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Finds a flow's index within its ticket.
fn flow_index(flows: &[FlowRecord], ticket_id: TicketId, flow_id: FlowId) -> Result<usize, ManagerError> {
    flows.iter().position(|flow| flow.id == flow_id).ok_or(ManagerError::UnknownFlow {
        ticket_id,
        flow_id,
    })
}

/// Finds a flow's index and checks it is the current flow.
fn current_of(flows: &[FlowRecord], ticket_id: TicketId, flow_id: FlowId) -> Result<usize, ManagerError> {
    let index = flow_index(flows, ticket_id, flow_id)?;
    if current_flow_index(flows) == Some(index) {
        Ok(index)
    } else {
        Err(ManagerError::NotAllowed(format!("flow {flow_id} is not the current flow")))
    }
}

/// Returns the engine root of an engine-backed flow.
fn engine_root(flow: &FlowRecord) -> Result<&RootHandle, ManagerError> {
    match (&flow.handle, flow.kind.uses_engine()) {
        (Some(root), true) => Ok(root),
        _ => Err(ManagerError::NotAllowed(format!("flow {} has no engine root", flow.id))),
    }
}
