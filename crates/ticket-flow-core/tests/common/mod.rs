// crates/ticket-flow-core/tests/common/mod.rs
// ============================================================================
// Module: Ticket Flow Test Fixtures
// Description: Shared procedures, hooks and registries for integration tests.
// Purpose: Build the cluster-switch ticket type against the in-memory backends.
// Dependencies: ticket-flow-core, serde_json
// ============================================================================
//! ## Overview
//! The `cluster-switch` ticket type runs a DAG pre-check, waits for approval,
//! then runs the switch DAG. Payload keys steer the in-memory engine:
//! `check_component` and `switch_component` pick the component (`succeed`,
//! `fail` or `suspend`) for the respective step.

#![allow(dead_code, reason = "Each test binary uses a different subset of fixtures.")]
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only fixtures are permitted to panic."
)]

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use serde_json::Value;
use serde_json::json;
use ticket_flow_core::ActSpec;
use ticket_flow_core::CallbackError;
use ticket_flow_core::FlowKind;
use ticket_flow_core::FlowTemplate;
use ticket_flow_core::InMemoryDagEngine;
use ticket_flow_core::InMemoryTicketStore;
use ticket_flow_core::LogicalClock;
use ticket_flow_core::NewTicket;
use ticket_flow_core::PipelineBuilder;
use ticket_flow_core::PostCallback;
use ticket_flow_core::PostCallbackInput;
use ticket_flow_core::PreCallback;
use ticket_flow_core::Procedure;
use ticket_flow_core::ProcedureError;
use ticket_flow_core::Registry;
use ticket_flow_core::RegistryBuilder;
use ticket_flow_core::ResourceId;
use ticket_flow_core::SnapshotParams;
use ticket_flow_core::Ticket;
use ticket_flow_core::TicketFlowManager;
use ticket_flow_core::TicketType;

/// Manager over the in-memory backends.
pub type TestManager = TicketFlowManager<InMemoryTicketStore, InMemoryDagEngine, LogicalClock>;

/// Reads the cluster id every cluster procedure acts on.
fn cluster_id(payload: &Value) -> Result<ResourceId, ProcedureError> {
    payload
        .get("cluster_id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(ResourceId::new)
        .ok_or_else(|| ProcedureError::Validation("cluster_id is required".to_string()))
}

/// Reads a component override from the payload.
fn component<'a>(payload: &'a Value, key: &str) -> &'a str {
    payload.get(key).and_then(Value::as_str).unwrap_or("succeed")
}

/// Single-step health check of the cluster.
pub struct PreCheck;

impl Procedure for PreCheck {
    fn resources(&self, payload: &Value) -> Result<Vec<ResourceId>, ProcedureError> {
        Ok(vec![cluster_id(payload)?])
    }

    fn plan(&self, payload: &Value, builder: &mut PipelineBuilder) -> Result<(), ProcedureError> {
        builder.add_act(ActSpec::new(
            "health",
            "check cluster health",
            component(payload, "check_component"),
            json!({"set": {"health_ok": true}}),
        ))?;
        Ok(())
    }
}

/// Drains both replicas in parallel, then switches the primary.
pub struct Switch;

impl Procedure for Switch {
    fn resources(&self, payload: &Value) -> Result<Vec<ResourceId>, ProcedureError> {
        Ok(vec![cluster_id(payload)?])
    }

    fn plan(&self, payload: &Value, builder: &mut PipelineBuilder) -> Result<(), ProcedureError> {
        builder.add_parallel_acts(
            "drain",
            vec![
                ActSpec::new("drain-a", "drain replica a", "succeed", json!({})),
                ActSpec::new("drain-b", "drain replica b", "succeed", json!({})),
            ],
        )?;
        builder.add_act(ActSpec::new(
            "switch",
            "switch primary",
            component(payload, "switch_component"),
            json!({}),
        ))?;
        Ok(())
    }
}

/// Post hook that counts its calls and stamps the next payload.
pub struct RecordCheck {
    /// Successful calls.
    pub fired: Arc<AtomicUsize>,
}

impl PostCallback for RecordCheck {
    fn call(&self, input: PostCallbackInput<'_>) -> Result<(), CallbackError> {
        self.fired.fetch_add(1, Ordering::SeqCst);
        if let Some(Value::Object(next)) = input.next_payload {
            next.insert("checked_by_flow".to_string(), json!(input.current.id.get()));
        }
        Ok(())
    }
}

/// Post hook that fails on its first call only.
pub struct FlakyHook {
    /// Calls seen, failed or not.
    pub calls: Arc<AtomicUsize>,
}

impl PostCallback for FlakyHook {
    fn call(&self, _input: PostCallbackInput<'_>) -> Result<(), CallbackError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(CallbackError("inventory unavailable".to_string()));
        }
        Ok(())
    }
}

/// Pre hook that pins the pre-check component and stamps the requester.
pub struct PinCheck {
    /// Component the pre-check must use.
    pub component: &'static str,
}

impl PreCallback for PinCheck {
    fn call(&self, ticket: &Ticket, payload: &mut Value) -> Result<(), CallbackError> {
        let Value::Object(fields) = payload else {
            return Err(CallbackError("payload is not an object".to_string()));
        };
        fields.insert("check_component".to_string(), json!(self.component));
        fields.insert("stamped_by".to_string(), json!(ticket.requester));
        Ok(())
    }
}

/// Pre hook that always refuses.
pub struct ClosedWindow;

impl PreCallback for ClosedWindow {
    fn call(&self, _ticket: &Ticket, _payload: &mut Value) -> Result<(), CallbackError> {
        Err(CallbackError("change window closed".to_string()))
    }
}

/// Registry builder with procedures and params registered, no ticket types.
pub fn base_registry() -> RegistryBuilder {
    Registry::builder()
        .procedure("pre-check", PreCheck)
        .procedure("switch", Switch)
        .param_builder("snapshot", SnapshotParams::new())
}

/// The `cluster-switch` templates with the given post hook on the pre-check.
pub fn cluster_switch_templates(post: &str) -> Vec<FlowTemplate> {
    vec![
        FlowTemplate::new("pre-check", FlowKind::Dag, "snapshot").procedure("pre-check").post_callback(post),
        FlowTemplate::new("approval", FlowKind::Pause, "snapshot"),
        FlowTemplate::new("execute-switch", FlowKind::Dag, "snapshot").procedure("switch"),
    ]
}

/// Registry with `cluster-switch`; `fired` counts post hook calls.
pub fn cluster_switch_registry(fired: Arc<AtomicUsize>) -> Registry {
    base_registry()
        .post_callback("record-check", RecordCheck {
            fired,
        })
        .ticket_type("cluster-switch", cluster_switch_templates("record-check"))
        .build()
        .unwrap()
}

/// Manager over fresh in-memory backends.
pub fn manager(registry: Registry) -> TestManager {
    TicketFlowManager::new(registry, InMemoryTicketStore::new(), InMemoryDagEngine::new(), LogicalClock::new())
}

/// Ticket request with the given payload.
pub fn request(ticket_type: &str, payload: Value) -> NewTicket {
    NewTicket {
        ticket_type: TicketType::new(ticket_type),
        requester: "alice".to_string(),
        business_id: 7,
        payload,
    }
}

/// `cluster-switch` request against one cluster.
pub fn switch_request(cluster: &str) -> NewTicket {
    request("cluster-switch", json!({"cluster_id": cluster}))
}
