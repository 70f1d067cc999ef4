// crates/ticket-flow-core/src/lib.rs
// ============================================================================
// Module: Ticket Flow Core Library
// Description: Public API surface for the ticket-flow orchestration core.
// Purpose: Expose the data model, interfaces and runtime.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! Ticket Flow turns a change request ("ticket") into an ordered sequence of
//! flows, drives each flow through an external DAG engine, derives ticket
//! status from flow status, and keeps two tickets from acting on the same
//! resource at once. The core is synchronous and backend-agnostic: storage,
//! the engine and time are reached through the traits in [`interfaces`].

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use core::*;

pub use interfaces::Clock;
pub use interfaces::DagEngine;
pub use interfaces::EngineError;
pub use interfaces::OperateRecordStore;
pub use interfaces::StoreError;
pub use interfaces::TicketFilter;
pub use interfaces::TicketStore;
pub use runtime::BuildError;
pub use runtime::CallbackError;
pub use runtime::FlowParamBuilder;
pub use runtime::FlowTemplate;
pub use runtime::FlowTree;
pub use runtime::InMemoryDagEngine;
pub use runtime::InMemoryTicketStore;
pub use runtime::LogicalClock;
pub use runtime::ManagerError;
pub use runtime::ParamError;
pub use runtime::PipelineBuilder;
pub use runtime::PostCallback;
pub use runtime::PostCallbackInput;
pub use runtime::PreCallback;
pub use runtime::Procedure;
pub use runtime::ProcedureError;
pub use runtime::Registry;
pub use runtime::RegistryBuilder;
pub use runtime::RegistryError;
pub use runtime::SnapshotParams;
pub use runtime::SubBuilder;
pub use runtime::SubPipeline;
pub use runtime::SystemClock;
pub use runtime::TicketFlowManager;
pub use runtime::TicketTree;
pub use runtime::TicketView;
