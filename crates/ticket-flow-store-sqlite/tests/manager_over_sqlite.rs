// crates/ticket-flow-store-sqlite/tests/manager_over_sqlite.rs
// ============================================================================
// Module: Manager Over SQLite Tests
// Description: Ticket lifecycles with the SQLite store behind the manager.
// Purpose: Validate that orchestration state survives a store reopen.
// Dependencies: ticket-flow-core, ticket-flow-store-sqlite, tempfile
// ============================================================================

//! ## Overview
//! Runs a two-flow ticket type (reserve, then a DAG step) against the
//! in-memory engine with a durable store, reopening the database between
//! steps the way a restarted process would.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use serde_json::json;
use tempfile::TempDir;
use ticket_flow_core::ActSpec;
use ticket_flow_core::FlowErrorCode;
use ticket_flow_core::FlowKind;
use ticket_flow_core::FlowStatus;
use ticket_flow_core::FlowTemplate;
use ticket_flow_core::InMemoryDagEngine;
use ticket_flow_core::LogicalClock;
use ticket_flow_core::NewTicket;
use ticket_flow_core::PipelineBuilder;
use ticket_flow_core::Procedure;
use ticket_flow_core::ProcedureError;
use ticket_flow_core::Registry;
use ticket_flow_core::ResourceId;
use ticket_flow_core::SnapshotParams;
use ticket_flow_core::TicketFilter;
use ticket_flow_core::TicketFlowManager;
use ticket_flow_core::TicketStatus;
use ticket_flow_core::TicketType;
use ticket_flow_store_sqlite::SqliteStoreConfig;
use ticket_flow_store_sqlite::SqliteTicketStore;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

type SqliteManager = TicketFlowManager<SqliteTicketStore, Arc<InMemoryDagEngine>, LogicalClock>;

struct Resize;

impl Procedure for Resize {
    fn resources(&self, payload: &Value) -> Result<Vec<ResourceId>, ProcedureError> {
        payload
            .get("instance")
            .and_then(Value::as_str)
            .map(|instance| vec![ResourceId::new(instance)])
            .ok_or_else(|| ProcedureError::Validation("instance is required".to_string()))
    }

    fn plan(&self, _payload: &Value, builder: &mut PipelineBuilder) -> Result<(), ProcedureError> {
        builder.add_act(ActSpec::new("resize", "resize instance", "succeed", json!({})))?;
        Ok(())
    }
}

fn registry() -> Registry {
    Registry::builder()
        .procedure("resize", Resize)
        .param_builder("snapshot", SnapshotParams::new())
        .ticket_type("instance-resize", vec![
            FlowTemplate::new("reserve", FlowKind::Reservation, "snapshot").procedure("resize"),
            FlowTemplate::new("resize", FlowKind::Dag, "snapshot").procedure("resize"),
        ])
        .build()
        .unwrap()
}

fn manager(path: &Path, engine: Arc<InMemoryDagEngine>) -> SqliteManager {
    let store = SqliteTicketStore::new(SqliteStoreConfig::for_path(path)).unwrap();
    TicketFlowManager::new(registry(), store, engine, LogicalClock::new())
}

fn resize(instance: &str) -> NewTicket {
    NewTicket {
        ticket_type: TicketType::new("instance-resize"),
        requester: "bob".to_string(),
        business_id: 3,
        payload: json!({"instance": instance}),
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn ticket_progress_survives_store_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tickets.db");
    let engine = Arc::new(InMemoryDagEngine::new());

    let first = manager(&path, Arc::clone(&engine));
    let view = first.create(resize("i-1")).unwrap();
    assert_eq!(view.flows[0].status, FlowStatus::Succeeded);
    assert_eq!(view.flows[1].status, FlowStatus::Running);
    drop(first);

    engine.drive_all().unwrap();
    let second = manager(&path, engine);
    let view = second.run_next_flow(view.ticket.id).unwrap();
    assert_eq!(view.status, TicketStatus::Succeeded);
    assert!(second.list_tickets(TicketFilter::Open).unwrap().is_empty());
    let holders = second.holders(&ResourceId::new("i-1")).unwrap();
    assert_eq!(holders.len(), 2);
    assert!(holders.iter().all(|holder| !holder.is_active()));
}

#[test]
fn conflicting_ticket_waits_on_durable_lock() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tickets.db");
    let engine = Arc::new(InMemoryDagEngine::new());
    let manager = manager(&path, Arc::clone(&engine));

    let holder = manager.create(resize("i-2")).unwrap();
    let waiter = manager.create(resize("i-2")).unwrap();
    assert_eq!(waiter.status, TicketStatus::Running);
    let error = waiter.flows[0].error.as_ref().unwrap();
    assert_eq!(error.code, FlowErrorCode::ExclusionConflict);

    engine.drive_all().unwrap();
    assert_eq!(manager.run_next_flow(holder.ticket.id).unwrap().status, TicketStatus::Succeeded);
    let view = manager.reconcile_ticket(waiter.ticket.id).unwrap();
    assert_eq!(view.flows[0].status, FlowStatus::Succeeded);
    assert_eq!(view.flows[1].status, FlowStatus::Running);
}
