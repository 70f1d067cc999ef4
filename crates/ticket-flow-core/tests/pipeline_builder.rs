// crates/ticket-flow-core/tests/pipeline_builder.rs
// ============================================================================
// Module: Pipeline Builder Tests
// Description: Composition, identifier uniqueness and context threading.
// Purpose: Ensure builders produce well-formed trees and never execute on submit.
// Dependencies: ticket-flow-core, proptest, serde_json
// ============================================================================
//! ## Overview
//! Builds pipelines with every composition form, checks the description the
//! engine receives, and checks that submission leaves every node unstarted.

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

use std::collections::BTreeSet;

use proptest::prelude::*;
use serde_json::json;
use ticket_flow_core::ActSpec;
use ticket_flow_core::BuildError;
use ticket_flow_core::ContextError;
use ticket_flow_core::DagEngine;
use ticket_flow_core::EngineState;
use ticket_flow_core::InMemoryDagEngine;
use ticket_flow_core::NodeId;
use ticket_flow_core::PipelineBuilder;
use ticket_flow_core::PipelineNode;
use ticket_flow_core::SubBuilder;

fn act(id: &str) -> ActSpec {
    ActSpec::new(id, format!("step {id}"), "succeed", json!({}))
}

fn set_act(id: &str, key: &str, value: i64) -> ActSpec {
    ActSpec::new(id, format!("step {id}"), "succeed", json!({"set": {key: value}}))
}

fn node(id: &str) -> NodeId {
    NodeId::new(id)
}

// ============================================================================
// SECTION: Composition
// ============================================================================

#[test]
fn builder_composes_every_node_form() {
    let mut left = SubBuilder::new("left", "left branch");
    left.add_act(act("left-1")).unwrap().add_act(act("left-2")).unwrap();
    let mut right = SubBuilder::new("right", "right branch");
    right.add_act(act("right-1")).unwrap();
    let mut tail = SubBuilder::new("tail", "tail");
    tail.add_act(act("tail-1")).unwrap();

    let mut builder = PipelineBuilder::new("root", "switch");
    builder
        .add_act(act("prepare"))
        .unwrap()
        .add_parallel_acts("fan", vec![act("fan-a"), act("fan-b")])
        .unwrap()
        .add_parallel_sub_pipeline("branches", vec![left.build().unwrap(), right.build().unwrap()])
        .unwrap()
        .add_sub_pipeline(tail.build().unwrap())
        .unwrap();
    assert_eq!(builder.len(), 4);
    let spec = builder.build().unwrap();

    assert!(matches!(spec.nodes[1], PipelineNode::ParallelActs { .. }));
    assert!(matches!(spec.nodes[2], PipelineNode::ParallelSubPipelines { .. }));
    assert!(matches!(spec.nodes[3], PipelineNode::SubPipeline(_)));
    assert_eq!(spec.edges(), vec![
        (node("prepare"), node("fan")),
        (node("fan"), node("branches")),
        (node("branches"), node("tail")),
        (node("left-1"), node("left-2")),
    ]);
    let ids = spec.node_ids();
    assert_eq!(ids.first(), Some(&node("root")));
    assert_eq!(ids.len(), 13);
}

#[test]
fn empty_pipeline_is_rejected() {
    let builder = PipelineBuilder::new("root", "empty");
    assert!(builder.is_empty());
    assert_eq!(builder.build().unwrap_err(), BuildError::Empty(node("root")));
}

#[test]
fn empty_parallel_group_is_rejected() {
    let mut builder = PipelineBuilder::new("root", "empty group");
    let err = builder.add_parallel_acts("fan", Vec::new()).unwrap_err();
    assert_eq!(err, BuildError::EmptyParallelGroup(node("fan")));
    assert!(builder.is_empty());
}

#[test]
fn duplicate_ids_across_nesting_levels_are_rejected() {
    let mut sub = SubBuilder::new("sub", "nested");
    sub.add_act(act("shared")).unwrap();
    let mut builder = PipelineBuilder::new("root", "dupes");
    builder.add_act(act("shared")).unwrap();
    let err = builder.add_sub_pipeline(sub.build().unwrap()).unwrap_err();
    assert_eq!(err, BuildError::DuplicateNode(node("shared")));
    assert_eq!(builder.len(), 1);

    let err = builder.add_parallel_acts("fan", vec![act("x"), act("x")]).unwrap_err();
    assert_eq!(err, BuildError::DuplicateNode(node("x")));
    builder.add_act(act("x")).unwrap();
}

// ============================================================================
// SECTION: Context
// ============================================================================

#[test]
fn sub_builder_context_merges_into_parent() {
    let mut sub = SubBuilder::new("sub", "nested");
    sub.context_mut().insert("replicas", &3_u32).unwrap();
    sub.add_act(act("inner")).unwrap();
    let mut builder = PipelineBuilder::new("root", "ctx");
    builder.context_mut().insert("cluster", &"c1").unwrap();
    builder.add_sub_pipeline(sub.build().unwrap()).unwrap();
    assert_eq!(builder.context().get::<u32>("replicas").unwrap(), Some(3));
    assert_eq!(builder.context().get::<String>("cluster").unwrap(), Some("c1".to_string()));
}

#[test]
fn conflicting_context_keys_fail_without_partial_state() {
    let mut sub = SubBuilder::new("sub", "nested");
    sub.context_mut().insert("cluster", &"c2").unwrap();
    sub.add_act(act("inner")).unwrap();
    let mut builder = PipelineBuilder::new("root", "ctx");
    builder.context_mut().insert("cluster", &"c1").unwrap();
    let err = builder.add_sub_pipeline(sub.build().unwrap()).unwrap_err();
    assert_eq!(err, BuildError::Context(ContextError::Conflict("cluster".to_string())));
    assert!(builder.is_empty());
    builder.add_act(act("inner")).unwrap();
}

#[test]
fn context_written_by_a_step_is_visible_after_it_runs() {
    let engine = InMemoryDagEngine::new();
    let mut builder = PipelineBuilder::new("root", "ctx");
    builder.add_act(set_act("allocate", "instance_id", 42)).unwrap().add_act(act("attach")).unwrap();
    let submitted = builder.run(&engine).unwrap();
    assert_eq!(engine.context(&submitted.handle).unwrap().get_value("instance_id"), None);
    engine.drive(&submitted.handle).unwrap();
    let context = engine.context(&submitted.handle).unwrap();
    assert_eq!(context.get::<i64>("instance_id").unwrap(), Some(42));
}

// ============================================================================
// SECTION: Submission
// ============================================================================

#[test]
fn submission_leaves_every_node_unstarted() {
    let engine = InMemoryDagEngine::new();
    let mut sub = SubBuilder::new("sub", "nested");
    sub.add_act(act("inner")).unwrap();
    let mut builder = PipelineBuilder::new("root", "submit");
    builder
        .add_act(act("first"))
        .unwrap()
        .add_parallel_acts("fan", vec![act("fan-a"), act("fan-b")])
        .unwrap()
        .add_sub_pipeline(sub.build().unwrap())
        .unwrap();
    let submitted = builder.run(&engine).unwrap();
    let tree = engine.tree_state(&submitted.handle).unwrap();
    assert!(tree.is_untouched());
    let ids: BTreeSet<NodeId> = submitted.spec.node_ids().into_iter().collect();
    let reported: BTreeSet<NodeId> = tree.nodes.keys().cloned().collect();
    assert_eq!(ids, reported);

    assert_eq!(engine.drive(&submitted.handle).unwrap(), EngineState::Finished);
}

#[test]
fn unknown_component_is_rejected_on_submit() {
    let engine = InMemoryDagEngine::new();
    let mut builder = PipelineBuilder::new("root", "bad");
    builder.add_act(ActSpec::new("only", "only", "teleport", json!({}))).unwrap();
    let err = builder.run(&engine).unwrap_err();
    assert!(matches!(err, BuildError::Submit(_)));
}

proptest! {
    #[test]
    fn node_ids_are_unique_or_rejected(ids in prop::collection::vec("[a-d]{1,2}", 1..12)) {
        let mut builder = PipelineBuilder::new("root", "prop");
        let mut accepted = BTreeSet::new();
        for id in &ids {
            let result = builder.add_act(act(id));
            if id == "root" || accepted.contains(id) {
                prop_assert!(result.is_err());
            } else {
                prop_assert!(result.is_ok());
                accepted.insert(id.clone());
            }
        }
        let spec = builder.build().unwrap();
        let listed = spec.node_ids();
        let unique: BTreeSet<&NodeId> = listed.iter().collect();
        prop_assert_eq!(unique.len(), listed.len());
        prop_assert_eq!(listed.len(), accepted.len() + 1);
    }
}
