// crates/ticket-flow-engine-http/tests/http_engine_unit.rs
// ============================================================================
// Module: HTTP DAG Engine Unit Tests
// Description: REST mapping and error classification for the engine client.
// Purpose: Validate requests, replies and failure mapping against a local server.
// Dependencies: ticket-flow-core, ticket-flow-engine-http, tiny_http
// ============================================================================

//! ## Overview
//! Each test starts a `tiny_http` server that answers a scripted sequence of
//! replies and records what the client sent:
//! - Request method, path and body per operation
//! - Status-code mapping (`404`, other non-2xx)
//! - Oversized and undecodable bodies
//! - Connection failures and submission through the manager

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

use std::io::Read;
use std::net::TcpListener;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread;

use serde_json::Value;
use serde_json::json;
use ticket_flow_core::ActSpec;
use ticket_flow_core::BuildContext;
use ticket_flow_core::DagEngine;
use ticket_flow_core::EngineError;
use ticket_flow_core::EngineState;
use ticket_flow_core::FlowErrorCode;
use ticket_flow_core::FlowKind;
use ticket_flow_core::FlowTemplate;
use ticket_flow_core::InMemoryTicketStore;
use ticket_flow_core::LogicalClock;
use ticket_flow_core::NewTicket;
use ticket_flow_core::NodeId;
use ticket_flow_core::PipelineBuilder;
use ticket_flow_core::PipelineNode;
use ticket_flow_core::PipelineSpec;
use ticket_flow_core::Procedure;
use ticket_flow_core::ProcedureError;
use ticket_flow_core::Registry;
use ticket_flow_core::ResourceId;
use ticket_flow_core::RootHandle;
use ticket_flow_core::SnapshotParams;
use ticket_flow_core::TicketFlowManager;
use ticket_flow_core::TicketStatus;
use ticket_flow_core::TicketType;
use ticket_flow_engine_http::HttpDagEngine;
use ticket_flow_engine_http::HttpEngineConfig;
use ticket_flow_engine_http::HttpEngineError;
use tiny_http::Header;
use tiny_http::Response;
use tiny_http::Server;

// ============================================================================
// SECTION: Test Helpers
// ============================================================================

/// Request seen by the scripted server.
#[derive(Debug, Clone)]
struct Seen {
    method: String,
    path: String,
    body: String,
}

/// Serves `replies` in order, one per request, then stops.
fn scripted(replies: Vec<(u16, String)>) -> (String, Arc<Mutex<Vec<Seen>>>, thread::JoinHandle<()>) {
    let server = Server::http("127.0.0.1:0").unwrap();
    let addr = server.server_addr().to_ip().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let handle = thread::spawn(move || {
        for (status, body) in replies {
            let mut request = server.recv().unwrap();
            let mut sent = String::new();
            request.as_reader().read_to_string(&mut sent).unwrap();
            log.lock().unwrap().push(Seen {
                method: request.method().to_string(),
                path: request.url().to_string(),
                body: sent,
            });
            let header = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]).unwrap();
            let response = Response::from_string(body).with_status_code(status).with_header(header);
            let _ = request.respond(response);
        }
    });
    (format!("http://{addr}"), seen, handle)
}

fn engine(base_url: &str) -> HttpDagEngine {
    HttpDagEngine::new(&HttpEngineConfig {
        base_url: base_url.to_string(),
        timeout_ms: 5_000,
        ..HttpEngineConfig::default()
    })
    .unwrap()
}

fn two_step_pipeline() -> PipelineSpec {
    PipelineSpec {
        id: NodeId::new("flow-1-attempt-1"),
        name: "pre-check".to_string(),
        nodes: vec![
            PipelineNode::Act(ActSpec::new("ping", "ping", "succeed", json!({}))),
            PipelineNode::Act(ActSpec::new("report", "report", "succeed", json!({}))),
        ],
        context: BuildContext::default(),
    }
}

fn tree_json(root: &str, state: &str) -> String {
    json!({
        "root": root,
        "state": state,
        "nodes": {
            "ping": {"state": "finished", "attempts": 1},
            "report": {"state": state, "error": "disk full", "attempts": 1}
        }
    })
    .to_string()
}

fn root() -> RootHandle {
    RootHandle::new("root-7")
}

// ============================================================================
// SECTION: REST Mapping
// ============================================================================

#[test]
fn submit_posts_pipeline_with_edges() {
    let (base, seen, handle) = scripted(vec![(200, r#"{"root":"root-7"}"#.to_string())]);
    let handle_root = engine(&base).submit(&two_step_pipeline()).unwrap();
    handle.join().unwrap();
    assert_eq!(handle_root, root());

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].method, "POST");
    assert_eq!(seen[0].path, "/pipelines");
    let body: Value = serde_json::from_str(&seen[0].body).unwrap();
    assert_eq!(body["pipeline"]["id"], "flow-1-attempt-1");
    assert_eq!(body["edges"], json!([["ping", "report"]]));
}

#[test]
fn tree_state_is_decoded() {
    let (base, seen, handle) = scripted(vec![(200, tree_json("root-7", "failed"))]);
    let tree = engine(&base).tree_state(&root()).unwrap();
    handle.join().unwrap();
    assert_eq!(seen.lock().unwrap()[0].path, "/pipelines/root-7/tree");
    assert_eq!(tree.state, EngineState::Failed);
    let (node, error) = tree.first_failure().unwrap();
    assert_eq!(node, &NodeId::new("report"));
    assert_eq!(error, Some("disk full"));
}

#[test]
fn tree_for_another_root_is_a_protocol_error() {
    let (base, _, handle) = scripted(vec![(200, tree_json("root-8", "running"))]);
    let err = engine(&base).tree_state(&root()).unwrap_err();
    handle.join().unwrap();
    assert!(matches!(err, EngineError::Protocol(_)));
}

#[test]
fn node_operations_escape_identifiers() {
    let (base, seen, handle) = scripted(vec![
        (204, String::new()),
        (204, String::new()),
        (204, String::new()),
        (200, String::new()),
        (200, r#"{"lines":["started","waiting"]}"#.to_string()),
    ]);
    let engine = engine(&format!("{base}/api/"));
    let node = NodeId::new("drain/a b");
    engine.retry_node(&root(), &node).unwrap();
    engine.skip_node(&root(), &node).unwrap();
    engine.force_fail_node(&root(), &node).unwrap();
    engine.callback_node(&root(), &node, &json!({"approved": true})).unwrap();
    let lines = engine.node_logs(&root(), &node).unwrap();
    handle.join().unwrap();

    assert_eq!(lines, vec!["started".to_string(), "waiting".to_string()]);
    let seen = seen.lock().unwrap();
    let paths: Vec<&str> = seen.iter().map(|request| request.path.as_str()).collect();
    assert_eq!(paths, vec![
        "/api/pipelines/root-7/nodes/drain%2Fa%20b/retry",
        "/api/pipelines/root-7/nodes/drain%2Fa%20b/skip",
        "/api/pipelines/root-7/nodes/drain%2Fa%20b/force_fail",
        "/api/pipelines/root-7/nodes/drain%2Fa%20b/callback",
        "/api/pipelines/root-7/nodes/drain%2Fa%20b/logs",
    ]);
    assert_eq!(seen[4].method, "GET");
    let payload: Value = serde_json::from_str(&seen[3].body).unwrap();
    assert_eq!(payload, json!({"approved": true}));
}

#[test]
fn revoke_reports_engine_confirmation() {
    let (base, seen, handle) = scripted(vec![(200, r#"{"revoked":false}"#.to_string())]);
    assert!(!engine(&base).revoke(&root()).unwrap());
    handle.join().unwrap();
    assert_eq!(seen.lock().unwrap()[0].path, "/pipelines/root-7/revoke");
}

// ============================================================================
// SECTION: Error Mapping
// ============================================================================

#[test]
fn status_codes_map_to_engine_errors() {
    let (base, _, handle) = scripted(vec![
        (404, r#"{"error":"no such root"}"#.to_string()),
        (409, r#"{"error":"node is not failed"}"#.to_string()),
        (503, String::new()),
    ]);
    let engine = engine(&base);
    let missing = engine.tree_state(&root()).unwrap_err();
    let refused = engine.retry_node(&root(), &NodeId::new("ping")).unwrap_err();
    let unavailable = engine.revoke(&root()).unwrap_err();
    handle.join().unwrap();

    assert!(matches!(missing, EngineError::NotFound(ref message) if message.contains("no such root")));
    assert!(matches!(refused, EngineError::Rejected(ref message) if message.contains("409")));
    assert!(matches!(unavailable, EngineError::Rejected(ref message) if message.contains("empty body")));
}

#[test]
fn undecodable_reply_is_a_protocol_error() {
    let (base, _, handle) = scripted(vec![(200, "not json".to_string())]);
    let err = engine(&base).submit(&two_step_pipeline()).unwrap_err();
    handle.join().unwrap();
    assert!(matches!(err, EngineError::Protocol(_)));
    assert!(err.is_unreachable());
}

#[test]
fn oversized_reply_is_rejected() {
    let (base, _, handle) = scripted(vec![(200, format!(r#"{{"lines":["{}"]}}"#, "x".repeat(512)))]);
    let engine = HttpDagEngine::new(&HttpEngineConfig {
        base_url: base,
        max_response_bytes: 128,
        ..HttpEngineConfig::default()
    })
    .unwrap();
    let err = engine.node_logs(&root(), &NodeId::new("ping")).unwrap_err();
    handle.join().unwrap();
    assert!(matches!(err, EngineError::Protocol(ref message) if message.contains("exceeds")));
}

#[test]
fn refused_connection_is_unreachable() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let err = engine(&format!("http://{addr}")).tree_state(&root()).unwrap_err();
    assert!(matches!(err, EngineError::Unreachable(_)));
}

#[test]
fn invalid_configs_are_rejected() {
    for base_url in ["ftp://engine", "not a url", "mailto:ops@example.com", "http://engine/?q=1"] {
        let err = HttpDagEngine::new(&HttpEngineConfig {
            base_url: base_url.to_string(),
            ..HttpEngineConfig::default()
        })
        .unwrap_err();
        assert!(matches!(err, HttpEngineError::InvalidConfig(_)), "{base_url}");
    }
    let err = HttpDagEngine::new(&HttpEngineConfig {
        timeout_ms: 0,
        ..HttpEngineConfig::default()
    })
    .unwrap_err();
    assert!(matches!(err, HttpEngineError::InvalidConfig(_)));
}

// ============================================================================
// SECTION: Manager Integration
// ============================================================================

struct Ping;

impl Procedure for Ping {
    fn resources(&self, _payload: &Value) -> Result<Vec<ResourceId>, ProcedureError> {
        Ok(vec![ResourceId::new("cluster-9")])
    }

    fn plan(&self, _payload: &Value, builder: &mut PipelineBuilder) -> Result<(), ProcedureError> {
        builder.add_act(ActSpec::new("ping", "ping", "succeed", json!({})))?;
        Ok(())
    }
}

#[test]
fn manager_records_unreachable_engine_on_submit() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let registry = Registry::builder()
        .procedure("ping", Ping)
        .param_builder("snapshot", SnapshotParams::new())
        .ticket_type("ping", vec![FlowTemplate::new("ping", FlowKind::Dag, "snapshot").procedure("ping")])
        .build()
        .unwrap();
    let manager = TicketFlowManager::new(
        registry,
        InMemoryTicketStore::new(),
        engine(&format!("http://{addr}")),
        LogicalClock::new(),
    );
    let view = manager
        .create(NewTicket {
            ticket_type: TicketType::new("ping"),
            requester: "carol".to_string(),
            business_id: 1,
            payload: json!({}),
        })
        .unwrap();
    assert_eq!(view.status, TicketStatus::Failed);
    let error = view.flows[0].error.as_ref().unwrap();
    assert_eq!(error.code, FlowErrorCode::EngineUnreachable);
    assert!(view.flows[0].handle.is_none());
}
