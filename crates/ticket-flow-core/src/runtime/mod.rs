// crates/ticket-flow-core/src/runtime/mod.rs
// ============================================================================
// Module: Ticket Flow Runtime
// Description: Builders, registry, flow runtime, manager and in-memory backends.
// Purpose: Execute tickets against a DAG engine through explicit interfaces.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! Runtime modules turn ticket requests into flows, flows into pipelines, and
//! engine state back into flow and ticket status. Every surface (scheduler,
//! CLI, engine callbacks) goes through [`TicketFlowManager`] so status is
//! derived the same way everywhere.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod builder;
pub mod clock;
pub mod engine;
pub mod exclusion;
pub mod flow;
pub mod manager;
pub mod params;
pub mod registry;
pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use builder::BuildError;
pub use builder::PipelineBuilder;
pub use builder::SubBuilder;
pub use builder::SubPipeline;
pub use builder::SubmittedPipeline;
pub use clock::LogicalClock;
pub use clock::SystemClock;
pub use engine::Component;
pub use engine::ComponentOutcome;
pub use engine::FailComponent;
pub use engine::InMemoryDagEngine;
pub use engine::SucceedComponent;
pub use engine::SuspendComponent;
pub use exclusion::ExclusionCheck;
pub use exclusion::conflict_error;
pub use flow::FlowRuntime;
pub use flow::RetryOutcome;
pub use flow::DerivedStatus;
pub use manager::FlowTree;
pub use manager::ManagerError;
pub use manager::TicketFlowManager;
pub use manager::TicketTree;
pub use manager::TicketView;
pub use params::CallbackError;
pub use params::FlowParamBuilder;
pub use params::ParamError;
pub use params::PostCallback;
pub use params::PostCallbackInput;
pub use params::PreCallback;
pub use params::SnapshotParams;
pub use registry::FlowTemplate;
pub use registry::Procedure;
pub use registry::ProcedureError;
pub use registry::Registry;
pub use registry::RegistryBuilder;
pub use registry::RegistryError;
pub use store::InMemoryTicketStore;
