// crates/ticket-flow-core/tests/registry.rs
// ============================================================================
// Module: Registry Tests
// Description: Start-up validation of procedures, hooks and ticket types.
// Purpose: Ensure unknown tags are rejected before any ticket is created.
// Dependencies: ticket-flow-core, serde_json
// ============================================================================
//! ## Overview
//! The registry resolves every tag a ticket template names. These tests
//! check that bad templates fail at `build()` rather than at dispatch time.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only assertions and helpers are permitted."
)]

mod common;

use serde_json::json;
use ticket_flow_core::FlowKind;
use ticket_flow_core::FlowParamBuilder;
use ticket_flow_core::FlowTemplate;
use ticket_flow_core::ParamBuilderId;
use ticket_flow_core::RegistryError;
use ticket_flow_core::SnapshotParams;
use ticket_flow_core::TicketType;

use crate::common::PreCheck;
use crate::common::base_registry;
use crate::common::request;

#[test]
fn templates_resolve_registered_tags() {
    let registry = base_registry()
        .ticket_type("spot-check", vec![FlowTemplate::new("check", FlowKind::Dag, "snapshot").procedure("pre-check")])
        .build()
        .unwrap();
    let templates = registry.templates(&TicketType::new("spot-check")).unwrap();
    assert_eq!(templates.len(), 1);
    assert!(registry.param_builder(&ParamBuilderId::new("snapshot")).is_ok());
    assert_eq!(registry.ticket_types().count(), 1);
}

#[test]
fn unknown_procedure_is_rejected() {
    let err = base_registry()
        .ticket_type("spot-check", vec![FlowTemplate::new("check", FlowKind::Dag, "snapshot").procedure("nope")])
        .build()
        .unwrap_err();
    assert!(matches!(err, RegistryError::UnknownProcedure(_)));
}

#[test]
fn unknown_param_builder_is_rejected() {
    let err = base_registry()
        .ticket_type("spot-check", vec![FlowTemplate::new("check", FlowKind::Dag, "missing").procedure("pre-check")])
        .build()
        .unwrap_err();
    assert!(matches!(err, RegistryError::UnknownParamBuilder(_)));
}

#[test]
fn unknown_callback_is_rejected() {
    let err = base_registry()
        .ticket_type("spot-check", vec![
            FlowTemplate::new("check", FlowKind::Dag, "snapshot").procedure("pre-check").post_callback("ghost"),
        ])
        .build()
        .unwrap_err();
    assert!(matches!(err, RegistryError::UnknownCallback(_)));
}

#[test]
fn engine_kinds_need_a_procedure_and_pause_must_not_have_one() {
    let err = base_registry()
        .ticket_type("spot-check", vec![FlowTemplate::new("check", FlowKind::Dag, "snapshot")])
        .build()
        .unwrap_err();
    assert!(matches!(err, RegistryError::InvalidTemplate { .. }));

    let err = base_registry()
        .ticket_type("spot-check", vec![FlowTemplate::new("wait", FlowKind::Pause, "snapshot").procedure("pre-check")])
        .build()
        .unwrap_err();
    assert!(matches!(err, RegistryError::InvalidTemplate { .. }));
}

#[test]
fn empty_templates_and_duplicates_are_rejected() {
    let err = base_registry().ticket_type("spot-check", Vec::new()).build().unwrap_err();
    assert!(matches!(err, RegistryError::EmptyTemplate(_)));

    let err = base_registry().procedure("pre-check", PreCheck).build().unwrap_err();
    assert!(matches!(err, RegistryError::Duplicate(_)));
}

#[test]
fn snapshot_params_overlay_fixed_keys() {
    let params = SnapshotParams::new().with("mode", json!("switch"));
    let payload = params.build(&request("spot-check", json!({"cluster_id": "c1"}))).unwrap();
    assert_eq!(payload, json!({"cluster_id": "c1", "mode": "switch"}));
    assert!(params.build(&request("spot-check", json!([1, 2]))).is_err());
}
