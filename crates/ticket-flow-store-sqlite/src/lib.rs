// crates/ticket-flow-store-sqlite/src/lib.rs
// ============================================================================
// Module: Ticket Flow SQLite Store
// Description: Durable ticket, flow and operate-record storage on SQLite.
// Purpose: Expose the SQLite-backed store implementations.
// Dependencies: ticket-flow-core, rusqlite
// ============================================================================

//! ## Overview
//! [`SqliteTicketStore`] implements both [`ticket_flow_core::TicketStore`] and
//! [`ticket_flow_core::OperateRecordStore`] on one database so that exclusion
//! acquisition can read flow status and write operate records in a single
//! transaction.

pub mod store;

pub use store::MAX_RECORD_BYTES;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteStoreMode;
pub use store::SqliteSyncMode;
pub use store::SqliteTicketStore;
