// crates/ticket-flow-core/tests/exclusion.rs
// ============================================================================
// Module: Resource Exclusion Tests
// Description: Mutual exclusion of resources across concurrent tickets.
// Purpose: Ensure at most one ticket acts on a resource at a time.
// Dependencies: ticket-flow-core, proptest, serde_json
// ============================================================================
//! ## Overview
//! Starts many tickets against one cluster from separate threads and checks
//! that exactly one gets past submission, that losers wait in the
//! exclusion-conflict state, and that locks are released once the holding
//! flow ends. A failed flow that resumes, through a node operation or on the
//! engine's own, must win its resources back first.

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

mod common;

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::thread;

use proptest::prelude::*;
use serde_json::Value;
use serde_json::json;
use ticket_flow_core::AcquireOutcome;
use ticket_flow_core::DagEngine;
use ticket_flow_core::EngineState;
use ticket_flow_core::FlowDraft;
use ticket_flow_core::FlowErrorCode;
use ticket_flow_core::FlowKind;
use ticket_flow_core::FlowStatus;
use ticket_flow_core::InMemoryTicketStore;
use ticket_flow_core::ManagerError;
use ticket_flow_core::NodeId;
use ticket_flow_core::OperateRecordStore;
use ticket_flow_core::ResourceId;
use ticket_flow_core::RetryPolicy;
use ticket_flow_core::TicketDraft;
use ticket_flow_core::TicketId;
use ticket_flow_core::TicketStatus;
use ticket_flow_core::TicketStore;
use ticket_flow_core::TicketView;
use ticket_flow_core::Timestamp;
use ticket_flow_core::runtime::ExclusionCheck;

use crate::common::TestManager;
use crate::common::cluster_switch_registry;
use crate::common::manager;
use crate::common::request;
use crate::common::switch_request;

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

fn draft(resource_hint: &str) -> TicketDraft {
    TicketDraft {
        request: switch_request(resource_hint),
        flows: vec![FlowDraft {
            name: "pre-check".to_string(),
            kind: FlowKind::Dag,
            procedure: Some("pre-check".into()),
            retry_policy: RetryPolicy::Manual,
            payload: Value::Null,
            callbacks: ticket_flow_core::CallbackRefs::default(),
        }],
        created_at: Timestamp::Logical(1),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn concurrent_tickets_never_share_a_resource(tickets in 2usize..8) {
        let manager = Arc::new(manager(cluster_switch_registry(counter())));
        let workers: Vec<_> = (0..tickets)
            .map(|_| {
                let manager = Arc::clone(&manager);
                thread::spawn(move || manager.create(switch_request("shared")).unwrap())
            })
            .collect();
        let views: Vec<TicketView> = workers.into_iter().map(|worker| worker.join().unwrap()).collect();

        let submitted: Vec<&TicketView> = views.iter().filter(|view| view.flows[0].handle.is_some()).collect();
        prop_assert_eq!(submitted.len(), 1);
        for view in views.iter().filter(|view| view.flows[0].handle.is_none()) {
            let error = view.flows[0].error.as_ref().unwrap();
            prop_assert_eq!(error.code, FlowErrorCode::ExclusionConflict);
            prop_assert_eq!(view.status, TicketStatus::Running);
        }

        let holders = manager.holders(&ResourceId::new("shared")).unwrap();
        prop_assert_eq!(holders.len(), 1);
        prop_assert_eq!(holders[0].record.ticket_id, submitted[0].ticket.id);
        prop_assert_eq!(manager.locked_tickets(), 0);
    }
}

#[test]
fn lock_moves_to_waiting_ticket_after_holder_finishes() {
    let manager = manager(cluster_switch_registry(counter()));
    let first = manager.create(switch_request("shared")).unwrap();
    let second = manager.create(switch_request("shared")).unwrap();
    assert_eq!(second.flows[0].error.as_ref().unwrap().code, FlowErrorCode::ExclusionConflict);

    let second = manager.reconcile_ticket(second.ticket.id).unwrap();
    assert_eq!(second.flows[0].status, FlowStatus::Failed);
    assert_eq!(second.flows[0].attempts, 0);

    manager.engine().drive_all().unwrap();
    let first = manager.run_next_flow(first.ticket.id).unwrap();
    assert_eq!(first.flows[0].status, FlowStatus::Succeeded);

    let second = manager.reconcile_ticket(second.ticket.id).unwrap();
    assert_eq!(second.flows[0].status, FlowStatus::Running);
    assert!(second.flows[0].handle.is_some());
    assert_eq!(second.flows[0].attempts, 1);

    let first = manager.approve(first.ticket.id, first.flows[1].id, "bob").unwrap();
    assert_eq!(first.flows[2].error.as_ref().unwrap().code, FlowErrorCode::ExclusionConflict);
    assert_eq!(first.status, TicketStatus::Running);
}

#[test]
fn same_ticket_reenters_its_own_resources() {
    let manager = manager(cluster_switch_registry(counter()));
    let view = manager.create(switch_request("cluster-9")).unwrap();
    manager.engine().drive_all().unwrap();
    let view = manager.run_next_flow(view.ticket.id).unwrap();
    let view = manager.approve(view.ticket.id, view.flows[1].id, "bob").unwrap();
    assert_eq!(view.flows[2].status, FlowStatus::Running);
    let holders = manager.holders(&ResourceId::new("cluster-9")).unwrap();
    assert_eq!(holders.len(), 1);
    assert_eq!(holders[0].record.flow_id, view.flows[2].id);
}

#[test]
fn failed_flow_releases_its_resources() {
    let manager = manager(cluster_switch_registry(counter()));
    let first = manager
        .create(request("cluster-switch", json!({"cluster_id": "shared", "check_component": "fail"})))
        .unwrap();
    manager.engine().drive_all().unwrap();
    let first = manager.run_next_flow(first.ticket.id).unwrap();
    assert_eq!(first.status, TicketStatus::Failed);

    let second = manager.create(switch_request("shared")).unwrap();
    assert_eq!(second.flows[0].status, FlowStatus::Running);
}

/// Fails `shared` for a first ticket, then lets a second ticket take it.
fn failed_holder_and_new_owner() -> (TestManager, TicketView, TicketView) {
    let manager = manager(cluster_switch_registry(counter()));
    let first = manager
        .create(request("cluster-switch", json!({"cluster_id": "shared", "check_component": "fail"})))
        .unwrap();
    manager.engine().drive_all().unwrap();
    let first = manager.run_next_flow(first.ticket.id).unwrap();
    assert_eq!(first.flows[0].status, FlowStatus::Failed);
    let second = manager.create(switch_request("shared")).unwrap();
    assert_eq!(second.flows[0].status, FlowStatus::Running);
    (manager, first, second)
}

#[test]
fn node_operation_cannot_resume_a_flow_whose_resource_was_taken() {
    let (manager, first, second) = failed_holder_and_new_owner();
    let root = first.flows[0].handle.clone().unwrap();

    let err = manager.retry_node(first.ticket.id, &NodeId::new("health")).unwrap_err();
    assert!(matches!(err, ManagerError::NotAllowed(message) if message.contains("shared")));
    let err = manager.skip_node(first.ticket.id, &NodeId::new("health")).unwrap_err();
    assert!(matches!(err, ManagerError::NotAllowed(_)));

    assert_eq!(manager.engine().tree_state(&root).unwrap().state, EngineState::Failed);
    let first = manager.update_ticket_status(first.ticket.id).unwrap();
    assert_eq!(first.flows[0].status, FlowStatus::Failed);
    let holders = manager.holders(&ResourceId::new("shared")).unwrap();
    assert_eq!(holders.len(), 1);
    assert_eq!(holders[0].record.ticket_id, second.ticket.id);
}

#[test]
fn node_operation_resumes_a_failed_flow_once_the_resource_is_free() {
    let (manager, first, second) = failed_holder_and_new_owner();
    manager.revoke(second.ticket.id).unwrap();

    let first = manager.retry_node(first.ticket.id, &NodeId::new("health")).unwrap();
    assert_eq!(first.flows[0].status, FlowStatus::Running);
    let holders = manager.holders(&ResourceId::new("shared")).unwrap();
    assert_eq!(holders.len(), 1);
    assert_eq!(holders[0].record.ticket_id, first.ticket.id);
}

#[test]
fn engine_resume_of_a_failed_flow_does_not_bypass_the_claim() {
    let (manager, first, second) = failed_holder_and_new_owner();
    let root = first.flows[0].handle.clone().unwrap();
    manager.engine().retry_node(&root, &NodeId::new("health")).unwrap();

    let first = manager.run_next_flow(first.ticket.id).unwrap();
    assert_eq!(first.flows[0].status, FlowStatus::Failed);
    assert_eq!(first.flows[0].error.as_ref().unwrap().code, FlowErrorCode::ExclusionConflict);
    let holders = manager.holders(&ResourceId::new("shared")).unwrap();
    assert_eq!(holders.len(), 1);
    assert_eq!(holders[0].record.ticket_id, second.ticket.id);

    let first = manager.reconcile_ticket(first.ticket.id).unwrap();
    assert_eq!(first.flows[0].status, FlowStatus::Failed);
    assert!(first.flows[0].handle.is_none());
    assert_eq!(manager.engine().tree_state(&root).unwrap().state, EngineState::Revoked);
}

#[test]
fn lock_table_only_holds_tickets_in_flight() {
    let manager = manager(cluster_switch_registry(counter()));
    let view = manager.create(switch_request("cluster-4")).unwrap();
    assert_eq!(manager.locked_tickets(), 0);
    manager.engine().drive_all().unwrap();
    manager.run_next_flow(view.ticket.id).unwrap();
    manager.reconcile_ticket(view.ticket.id).unwrap();
    manager.revoke(view.ticket.id).unwrap();
    assert_eq!(manager.locked_tickets(), 0);
    assert!(manager.revoke(TicketId::from_raw(99).unwrap()).is_err());
    assert_eq!(manager.locked_tickets(), 0);
}

#[test]
fn conflicting_claim_writes_nothing() {
    let store = InMemoryTicketStore::new();
    let (_, holder_flows) = store.create_ticket(&draft("a")).unwrap();
    let (_, waiting_flows) = store.create_ticket(&draft("b")).unwrap();
    let check = ExclusionCheck::new(&store);

    let held = ResourceId::new("db-1");
    let free = ResourceId::new("db-2");
    let outcome = check.acquire(&holder_flows[0], vec![held.clone()], Timestamp::Logical(2)).unwrap();
    assert_eq!(outcome, AcquireOutcome::Acquired);

    let outcome =
        check.acquire(&waiting_flows[0], vec![free.clone(), held.clone()], Timestamp::Logical(3)).unwrap();
    match outcome {
        AcquireOutcome::Conflict {
            holder,
        } => {
            assert_eq!(holder.resource_id, held);
            assert_eq!(holder.flow_id, holder_flows[0].id);
        }
        AcquireOutcome::Acquired => panic!("expected conflict"),
    }
    assert!(store.records_for(&free).unwrap().is_empty());
}

#[test]
fn flows_without_resources_acquire_trivially() {
    let store = InMemoryTicketStore::new();
    let (_, flows) = store.create_ticket(&draft("a")).unwrap();
    let outcome = ExclusionCheck::new(&store).acquire(&flows[0], Vec::new(), Timestamp::Logical(2)).unwrap();
    assert_eq!(outcome, AcquireOutcome::Acquired);
}
