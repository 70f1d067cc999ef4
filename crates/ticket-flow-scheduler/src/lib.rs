// crates/ticket-flow-scheduler/src/lib.rs
// ============================================================================
// Module: Ticket Flow Scheduler Library
// Description: Async dispatch and reconciliation around the ticket manager.
// Purpose: Run short advancement tasks on a bounded pool and sweep open tickets.
// Dependencies: ticket-flow-core, ticket-flow-config, tokio
// ============================================================================

//! ## Overview
//! The manager is synchronous. [`TicketScheduler`] moves every manager call
//! onto the blocking pool, bounded by a semaphore, so that many tickets
//! advance in parallel while each ticket stays serialized by the manager's
//! own per-ticket lock.

pub mod scheduler;

pub use scheduler::SchedulerError;
pub use scheduler::SweepReport;
pub use scheduler::TicketScheduler;
