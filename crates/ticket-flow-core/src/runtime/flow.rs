// crates/ticket-flow-core/src/runtime/flow.rs
// ============================================================================
// Module: Flow Runtime
// Description: Run, status derivation, retry and revoke for every flow kind.
// Purpose: Drive one flow against the engine and capture every failure as data.
// Dependencies: crate::{core, interfaces, runtime}, tracing
// ============================================================================

//! ## Overview
//! [`FlowRuntime`] implements the flow contract over the closed [`FlowKind`]
//! set. Every operation returns normally: failures during pre-checks or
//! submission are written into the flow's error fields and surface as a
//! `failed` status.
//!
//! `run` follows a fixed order for kinds that act on resources:
//! validate the payload and resolve resources, claim the resources, run the
//! pre-callback, then either succeed inline (reservation) or build and submit
//! the pipeline. A failed flow releases its claim; it must claim again before
//! it runs on its old root, and a retry revokes that root before submitting.
//!
//! `refresh` derives the status from the engine and applies it. The success
//! transition runs the post-callback and flips `post_callback_fired` in the
//! same record update, so persisting both flows together makes the hook fire
//! once per success transition.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::core::AcquireOutcome;
use crate::core::ApprovalDecision;
use crate::core::EngineState;
use crate::core::FlowError;
use crate::core::FlowErrorCode;
use crate::core::FlowKind;
use crate::core::FlowRecord;
use crate::core::FlowStatus;
use crate::core::Ticket;
use crate::core::TreeState;
use crate::interfaces::Clock;
use crate::interfaces::DagEngine;
use crate::interfaces::EngineError;
use crate::interfaces::OperateRecordStore;
use crate::runtime::builder::BuildError;
use crate::runtime::builder::PipelineBuilder;
use crate::runtime::exclusion::ExclusionCheck;
use crate::runtime::exclusion::conflict_error;
use crate::runtime::params::PostCallbackInput;
use crate::runtime::registry::Procedure;
use crate::runtime::registry::ProcedureError;
use crate::runtime::registry::Registry;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Status derived for a flow without modifying it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedStatus {
    /// Derived status.
    pub status: FlowStatus,
    /// Failure to record when `status` is `Failed`.
    pub error: Option<FlowError>,
    /// Note to record, e.g. an ignored best-effort failure.
    pub summary: Option<String>,
    /// Engine tree state, when the engine was queried.
    pub tree: Option<TreeState>,
    /// Engine error hit while querying; the stored status was kept.
    pub engine_error: Option<EngineError>,
}

impl DerivedStatus {
    /// Status that keeps the stored status.
    fn stored(flow: &FlowRecord) -> Self {
        Self {
            status: flow.status,
            error: flow.error.clone(),
            summary: flow.summary.clone(),
            tree: None,
            engine_error: None,
        }
    }
}

/// Result of a flow retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    /// The flow was not failed; nothing changed.
    NoOp,
    /// The flow cannot be retried.
    Refused(String),
    /// The flow ran again and now has this status.
    Rerun(FlowStatus),
}

// ============================================================================
// SECTION: Flow Runtime
// ============================================================================

/// Flow operations bound to the registry, engine, operate-record store and clock.
#[derive(Clone, Copy)]
pub struct FlowRuntime<'a> {
    /// Tag registry.
    registry: &'a Registry,
    /// DAG engine.
    engine: &'a dyn DagEngine,
    /// Shared resource index.
    operate: &'a dyn OperateRecordStore,
    /// Time source.
    clock: &'a dyn Clock,
}

impl<'a> FlowRuntime<'a> {
    /// Binds a runtime to its collaborators.
    #[must_use]
    pub const fn new(
        registry: &'a Registry,
        engine: &'a dyn DagEngine,
        operate: &'a dyn OperateRecordStore,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            registry,
            engine,
            operate,
            clock,
        }
    }

    /// Starts a flow. Returns the resulting status; failures are recorded on the flow.
    ///
    /// Kinds that finish inline (reservation, fire-and-forget) go through the
    /// success transition here, so `next` may be rewritten by the post-callback.
    pub fn run(&self, ticket: &Ticket, flow: &mut FlowRecord, next: Option<&mut FlowRecord>) -> FlowStatus {
        flow.error = None;
        flow.summary = None;
        if flow.kind.uses_engine() {
            flow.handle = None;
        }
        let now = self.clock.now();
        match self.start(ticket, flow) {
            Ok(FlowStatus::Succeeded) => {
                self.complete(ticket, flow, next, None, None);
            }
            Ok(status) => {
                flow.transition(status, now);
                info!(
                    ticket_id = %flow.ticket_id,
                    flow_id = %flow.id,
                    flow_kind = %flow.kind,
                    status = %status,
                    attempt = flow.attempts,
                    "flow started"
                );
            }
            Err(error) => {
                if error.code.needs_operator() {
                    warn!(
                        ticket_id = %flow.ticket_id,
                        flow_id = %flow.id,
                        flow_kind = %flow.kind,
                        code = %error.code,
                        "flow failed to start: {}",
                        error.message
                    );
                }
                flow.fail(error, now);
            }
        }
        flow.status
    }

    /// Performs the kind-specific start work.
    fn start(&self, ticket: &Ticket, flow: &mut FlowRecord) -> Result<FlowStatus, FlowError> {
        if flow.kind == FlowKind::Pause {
            flow.attempts = flow.attempts.saturating_add(1);
            return Ok(FlowStatus::Running);
        }
        let procedure = self.claim(flow)?;
        // Runs lost to an exclusion conflict do not count against the retry budget.
        flow.attempts = flow.attempts.saturating_add(1);
        if let Some(pre) = flow.callbacks.pre.clone() {
            let callback = self.registry.pre_callback(&pre).map_err(|err| FlowError::execution(err.to_string()))?;
            callback
                .call(ticket, &mut flow.payload)
                .map_err(|err| FlowError::execution(format!("pre callback {pre}: {err}")))?;
        }
        match flow.kind {
            FlowKind::Reservation => Ok(FlowStatus::Succeeded),
            FlowKind::Dag | FlowKind::BestEffort | FlowKind::FireAndForget => {
                let mut builder = PipelineBuilder::new(
                    format!("flow-{}-attempt-{}", flow.id, flow.attempts),
                    flow.name.clone(),
                );
                procedure.plan(&flow.payload, &mut builder).map_err(procedure_error)?;
                let submitted = builder.run(self.engine).map_err(submit_error)?;
                debug!(
                    flow_id = %flow.id,
                    root = %submitted.handle,
                    nodes = submitted.spec.node_ids().len(),
                    "pipeline submitted"
                );
                flow.handle = Some(submitted.handle);
                if flow.kind == FlowKind::FireAndForget {
                    Ok(FlowStatus::Succeeded)
                } else {
                    Ok(FlowStatus::Running)
                }
            }
            FlowKind::Pause => Ok(FlowStatus::Running),
        }
    }

    /// Resolves the flow's resources and claims them for it.
    fn claim(&self, flow: &FlowRecord) -> Result<Arc<dyn Procedure>, FlowError> {
        let procedure_id = flow
            .procedure
            .clone()
            .ok_or_else(|| FlowError::validation(format!("flow kind {} requires a procedure", flow.kind)))?;
        let procedure =
            self.registry.procedure(&procedure_id).map_err(|err| FlowError::validation(err.to_string()))?;
        let resources = procedure.resources(&flow.payload).map_err(procedure_error)?;
        let exclusion = ExclusionCheck::new(self.operate);
        match exclusion.acquire(flow, resources, self.clock.now()) {
            Ok(AcquireOutcome::Acquired) => Ok(procedure),
            Ok(AcquireOutcome::Conflict {
                holder,
            }) => Err(conflict_error(&holder)),
            Err(err) => Err(FlowError::execution(format!("operate records unavailable: {err}"))),
        }
    }

    /// Claims the resources of a flow again before it resumes on its old root.
    ///
    /// A failed flow stops blocking other tickets, so whatever moves it back
    /// to running must win the claim first.
    ///
    /// # Errors
    ///
    /// Returns the conflict (or the lookup failure) as a [`FlowError`].
    pub fn reclaim(&self, flow: &FlowRecord) -> Result<(), FlowError> {
        if flow.kind == FlowKind::Pause {
            return Ok(());
        }
        self.claim(flow).map(|_| ())
    }

    /// Derives the current status without modifying the flow.
    #[must_use]
    pub fn derive(&self, flow: &FlowRecord) -> DerivedStatus {
        match flow.kind {
            FlowKind::Pause | FlowKind::Reservation | FlowKind::FireAndForget => DerivedStatus::stored(flow),
            FlowKind::Dag | FlowKind::BestEffort => self.derive_from_engine(flow),
        }
    }

    /// Derives the status of a flow that waits for the engine.
    fn derive_from_engine(&self, flow: &FlowRecord) -> DerivedStatus {
        if flow.status.is_final() {
            return DerivedStatus::stored(flow);
        }
        let Some(handle) = &flow.handle else {
            return DerivedStatus::stored(flow);
        };
        let tree = match self.engine.tree_state(handle) {
            Ok(tree) => tree,
            Err(err) => {
                warn!(flow_id = %flow.id, root = %handle, "engine state unavailable: {err}");
                let mut derived = DerivedStatus::stored(flow);
                derived.engine_error = Some(err);
                return derived;
            }
        };
        // A finished root on a failed flow means the success transition failed; only retry re-attempts it.
        if flow.status == FlowStatus::Failed && tree.state == EngineState::Finished {
            let mut derived = DerivedStatus::stored(flow);
            derived.tree = Some(tree);
            return derived;
        }
        let mut status = tree.state.to_flow_status();
        let mut error = None;
        let mut summary = None;
        if status == FlowStatus::Failed {
            let message = failure_message(&tree);
            if flow.kind == FlowKind::BestEffort {
                warn!(flow_id = %flow.id, root = %handle, "best-effort flow failure ignored: {message}");
                status = FlowStatus::Succeeded;
                summary = Some(format!("ignored failure: {message}"));
            } else {
                error = Some(FlowError::execution(message));
            }
        }
        DerivedStatus {
            status,
            error,
            summary,
            tree: Some(tree),
            engine_error: None,
        }
    }

    /// Applies the derived status. Returns true when the flow changed.
    ///
    /// `next` is the following flow of the same ticket; the post-callback may
    /// rewrite its payload while it is pending.
    pub fn refresh(&self, ticket: &Ticket, flow: &mut FlowRecord, next: Option<&mut FlowRecord>) -> bool {
        let derived = self.derive(flow);
        if derived.status == flow.status && derived.error == flow.error && derived.summary == flow.summary {
            return false;
        }
        if flow.status == FlowStatus::Failed
            && !derived.status.is_terminal()
            && let Err(error) = self.reclaim(flow)
        {
            if flow.error.as_ref() == Some(&error) {
                return false;
            }
            warn!(
                ticket_id = %flow.ticket_id,
                flow_id = %flow.id,
                "engine resumed a failed flow that no longer holds its resources: {}",
                error.message
            );
            flow.fail(error, self.clock.now());
            return true;
        }
        match derived.status {
            FlowStatus::Succeeded => {
                self.complete(ticket, flow, next, derived.tree.as_ref(), derived.summary);
            }
            FlowStatus::Failed => {
                let error = derived.error.unwrap_or_else(|| FlowError::execution("engine reported failure"));
                flow.fail(error, self.clock.now());
            }
            status => flow.transition(status, self.clock.now()),
        }
        true
    }

    /// Runs the success transition: post-callback, flag, status.
    ///
    /// A failing post-callback leaves the flow failed and the next payload untouched.
    pub fn complete(
        &self,
        ticket: &Ticket,
        flow: &mut FlowRecord,
        next: Option<&mut FlowRecord>,
        tree: Option<&TreeState>,
        summary: Option<String>,
    ) {
        let now = self.clock.now();
        if !flow.post_callback_fired
            && let Some(post) = flow.callbacks.post.clone()
        {
            let mut next = next.filter(|next| next.status == FlowStatus::Pending);
            let mut scratch = next.as_ref().map(|next| next.payload.clone());
            let result = self.registry.post_callback(&post).map_err(|err| err.to_string()).and_then(|callback| {
                callback
                    .call(PostCallbackInput {
                        ticket,
                        current: flow,
                        tree,
                        next_payload: scratch.as_mut(),
                    })
                    .map_err(|err| err.to_string())
            });
            if let Err(message) = result {
                warn!(ticket_id = %flow.ticket_id, flow_id = %flow.id, "post callback {post} failed: {message}");
                flow.fail(FlowError::execution(format!("post callback {post}: {message}")), now);
                return;
            }
            if let (Some(next), Some(payload)) = (next.as_deref_mut(), scratch) {
                next.payload = payload;
                next.updated_at = now;
            }
        }
        flow.post_callback_fired = true;
        flow.summary = summary;
        flow.transition(FlowStatus::Succeeded, now);
        info!(ticket_id = %flow.ticket_id, flow_id = %flow.id, flow_kind = %flow.kind, "flow succeeded");
    }

    /// Retries a failed flow.
    ///
    /// Flows that are not failed are left alone. A flow whose engine root was
    /// revoked is refused. A flow whose root already finished only re-attempts
    /// the success transition. Otherwise the old root is revoked before the
    /// flow runs again; the retry is refused when the engine does not confirm.
    pub fn retry(&self, ticket: &Ticket, flow: &mut FlowRecord, next: Option<&mut FlowRecord>) -> RetryOutcome {
        if flow.status != FlowStatus::Failed {
            return RetryOutcome::NoOp;
        }
        if let Some(handle) = &flow.handle {
            match self.engine.tree_state(handle) {
                Ok(tree) if tree.state == EngineState::Revoked => {
                    return RetryOutcome::Refused(format!("engine root {handle} was revoked"));
                }
                Ok(tree) if tree.state == EngineState::Finished && flow.kind.uses_engine() => {
                    self.complete(ticket, flow, next, Some(&tree), None);
                    return RetryOutcome::Rerun(flow.status);
                }
                Ok(_) => {}
                Err(err) => {
                    debug!(flow_id = %flow.id, "engine state unavailable before retry: {err}");
                }
            }
        }
        let approved = flow.approval.as_ref().is_some_and(|approval| approval.decision == ApprovalDecision::Approved);
        if flow.kind == FlowKind::Pause && approved {
            self.complete(ticket, flow, next, None, None);
            return RetryOutcome::Rerun(flow.status);
        }
        if let Some(handle) = flow.handle.clone()
            && flow.kind.uses_engine()
        {
            // The old root may still be resumed by a node operation; it must be gone first.
            match self.engine.revoke(&handle) {
                Ok(true) | Err(EngineError::NotFound(_)) => {
                    debug!(flow_id = %flow.id, root = %handle, "previous engine root revoked before retry");
                }
                Ok(false) => {
                    return RetryOutcome::Refused(format!("engine root {handle} could not be revoked before retry"));
                }
                Err(err) => {
                    return RetryOutcome::Refused(format!(
                        "engine root {handle} could not be revoked before retry: {err}"
                    ));
                }
            }
        }
        RetryOutcome::Rerun(self.run(ticket, flow, next))
    }

    /// Cancels a flow. Returns the final status.
    ///
    /// Engine-backed flows end `Revoked` when the engine confirms cancellation
    /// and `Terminated` otherwise; `force_terminate` always ends `Terminated`.
    pub fn revoke(&self, flow: &mut FlowRecord, force_terminate: bool) -> FlowStatus {
        if flow.status.is_final() {
            return flow.status;
        }
        let confirmed = match (&flow.handle, flow.kind) {
            (Some(handle), FlowKind::Dag | FlowKind::BestEffort | FlowKind::FireAndForget) => {
                match self.engine.revoke(handle) {
                    Ok(confirmed) => confirmed,
                    Err(err) => {
                        warn!(flow_id = %flow.id, root = %handle, "engine revoke failed: {err}");
                        false
                    }
                }
            }
            _ => true,
        };
        let status =
            if confirmed && !force_terminate { FlowStatus::Revoked } else { FlowStatus::Terminated };
        flow.transition(status, self.clock.now());
        status
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Maps a procedure error onto the flow taxonomy.
fn procedure_error(error: ProcedureError) -> FlowError {
    match error {
        ProcedureError::Validation(message) => FlowError::validation(message),
        ProcedureError::Build(error) => FlowError::execution(error.to_string()),
    }
}

/// Maps a submission error onto the flow taxonomy.
fn submit_error(error: BuildError) -> FlowError {
    match error {
        BuildError::Submit(error) if error.is_unreachable() => {
            FlowError::new(FlowErrorCode::EngineUnreachable, error.to_string())
        }
        other => FlowError::execution(other.to_string()),
    }
}

/// Describes the first failed node of a tree.
fn failure_message(tree: &TreeState) -> String {
    match tree.first_failure() {
        Some((node, Some(error))) => format!("node {node} failed: {error}"),
        Some((node, None)) => format!("node {node} failed"),
        None => format!("engine root {} reported {}", tree.root, tree.state.as_str()),
    }
}
