// crates/ticket-flow-core/src/core/mod.rs
// ============================================================================
// Module: Ticket Flow Core Types
// Description: Canonical ticket, flow, pipeline and operate-record structures.
// Purpose: Provide stable, serializable types shared by stores, engines and tools.
// Dependencies: serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Core types are plain data. Behaviour that needs an engine, a store or the
//! registry lives in [`crate::runtime`].

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod error;
pub mod flow;
pub mod identifiers;
pub mod operate;
pub mod pipeline;
pub mod status;
pub mod ticket;
pub mod time;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use error::FlowError;
pub use error::FlowErrorCode;
pub use flow::Approval;
pub use flow::ApprovalDecision;
pub use flow::CallbackRefs;
pub use flow::FlowDraft;
pub use flow::FlowKind;
pub use flow::FlowRecord;
pub use flow::RetryPolicy;
pub use identifiers::CallbackId;
pub use identifiers::ComponentId;
pub use identifiers::FlowId;
pub use identifiers::NodeId;
pub use identifiers::ParamBuilderId;
pub use identifiers::ProcedureId;
pub use identifiers::ResourceId;
pub use identifiers::RootHandle;
pub use identifiers::TicketId;
pub use identifiers::TicketType;
pub use operate::AcquireOutcome;
pub use operate::ExclusionHolder;
pub use operate::OperateClaim;
pub use operate::OperateRecord;
pub use operate::OperateRecordView;
pub use pipeline::ActSpec;
pub use pipeline::BuildContext;
pub use pipeline::ContextError;
pub use pipeline::NodeState;
pub use pipeline::PipelineNode;
pub use pipeline::PipelineSpec;
pub use pipeline::TreeState;
pub use status::EngineState;
pub use status::FlowStatus;
pub use status::TicketStatus;
pub use ticket::NewTicket;
pub use ticket::Ticket;
pub use ticket::TicketDraft;
pub use ticket::current_flow_index;
pub use ticket::derive_ticket_status;
pub use ticket::ticket_summary;
pub use time::Timestamp;
