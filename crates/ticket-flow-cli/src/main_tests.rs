// crates/ticket-flow-cli/src/main_tests.rs
// ============================================================================
// Module: CLI Main Tests
// Description: Argument parsing, store resolution and read commands.
// Purpose: Ensure operator commands resolve inputs and fail closed.
// Dependencies: ticket-flow-cli main helpers, tempfile
// ============================================================================

//! ## Overview
//! Exercises the command functions directly against a temporary `SQLite`
//! store seeded through the manager with a reservation followed by a pause,
//! so no engine is contacted.

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
    reason = "Test-only output and panic-based assertions are permitted."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::num::NonZeroU64;
use std::path::Path;
use std::path::PathBuf;

use clap::Parser;
use serde_json::Value;
use serde_json::json;
use tempfile::TempDir;
use ticket_flow_config::StoreType;
use ticket_flow_config::TicketFlowConfig;
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
use ticket_flow_core::TicketFlowManager;
use ticket_flow_core::TicketId;
use ticket_flow_core::TicketStore;
use ticket_flow_core::TicketType;
use ticket_flow_store_sqlite::SqliteStoreConfig;
use ticket_flow_store_sqlite::SqliteTicketStore;

use super::Cli;
use super::Commands;
use super::EngineLocationArgs;
use super::NodeCommand;
use super::OperateListCommand;
use super::StoreLocationArgs;
use super::TicketCommand;
use super::TicketListCommand;
use super::TicketRevokeCommand;
use super::TicketShowCommand;
use super::command_operate_list;
use super::command_ticket_list;
use super::command_ticket_revoke;
use super::command_ticket_show;
use super::parse_payload;
use super::resolve_store_config;

// ============================================================================
// SECTION: Helpers
// ============================================================================

struct Lease;

impl Procedure for Lease {
    fn resources(&self, payload: &Value) -> Result<Vec<ResourceId>, ProcedureError> {
        Ok(vec![ResourceId::new(payload["vip"].as_str().unwrap_or("vip-0"))])
    }

    fn plan(&self, _payload: &Value, _builder: &mut PipelineBuilder) -> Result<(), ProcedureError> {
        Ok(())
    }
}

fn seed(path: &Path) {
    let registry = Registry::builder()
        .procedure("lease", Lease)
        .param_builder("snapshot", SnapshotParams::new())
        .ticket_type("vip-lease", vec![
            FlowTemplate::new("lease", FlowKind::Reservation, "snapshot").procedure("lease"),
            FlowTemplate::new("hold", FlowKind::Pause, "snapshot"),
        ])
        .build()
        .unwrap();
    let store = SqliteTicketStore::new(SqliteStoreConfig::for_path(path)).unwrap();
    let manager = TicketFlowManager::new(registry, store, InMemoryDagEngine::new(), LogicalClock::new());
    manager
        .create(NewTicket {
            ticket_type: TicketType::new("vip-lease"),
            requester: "dana".to_string(),
            business_id: 1,
            payload: json!({"vip": "vip-9"}),
        })
        .unwrap();
}

fn location(path: &Path) -> StoreLocationArgs {
    StoreLocationArgs {
        store_path: Some(path.to_path_buf()),
    }
}

// ============================================================================
// SECTION: Parsing
// ============================================================================

#[test]
fn parses_node_callback_arguments() {
    let cli = Cli::try_parse_from([
        "ticket-flow",
        "--config",
        "ops.toml",
        "node",
        "callback",
        "root-1",
        "approve",
        "--payload",
        "{\"ok\":true}",
        "--engine-url",
        "http://engine:9000",
    ])
    .unwrap();
    assert_eq!(cli.config, Some(PathBuf::from("ops.toml")));
    let Commands::Node {
        command: NodeCommand::Callback(callback),
    } = cli.command
    else {
        panic!("expected node callback");
    };
    assert_eq!(callback.target.root, "root-1");
    assert_eq!(callback.target.node, "approve");
    assert_eq!(callback.target.engine.engine_url.as_deref(), Some("http://engine:9000"));
}

#[test]
fn parses_ticket_revoke_arguments() {
    let cli = Cli::try_parse_from(["ticket-flow", "ticket", "revoke", "3", "--terminate", "--store-path", "t.db"])
        .unwrap();
    let Commands::Ticket {
        command: TicketCommand::Revoke(revoke),
    } = cli.command
    else {
        panic!("expected ticket revoke");
    };
    assert_eq!(revoke.ticket_id.get(), 3);
    assert!(revoke.terminate);
    assert_eq!(revoke.location.store_path, Some(PathBuf::from("t.db")));
}

#[test]
fn rejects_zero_ticket_id() {
    assert!(Cli::try_parse_from(["ticket-flow", "ticket", "show", "0"]).is_err());
}

#[test]
fn payload_must_be_json_within_limit() {
    assert_eq!(parse_payload("{\"a\":1}").unwrap(), json!({"a": 1}));
    assert!(parse_payload("not json").is_err());
    let oversized = format!("\"{}\"", "x".repeat(300 * 1024));
    let err = parse_payload(&oversized).unwrap_err();
    assert!(err.to_string().contains("exceeds"));
}

// ============================================================================
// SECTION: Store Resolution
// ============================================================================

#[test]
fn store_path_overrides_memory_config() {
    let config = TicketFlowConfig::default();
    let resolved = resolve_store_config(&config, &location(Path::new("direct.db"))).unwrap();
    assert_eq!(resolved.path, PathBuf::from("direct.db"));
    assert_eq!(resolved.busy_timeout_ms, config.store.busy_timeout_ms);
}

#[test]
fn memory_config_without_store_path_is_rejected() {
    let config = TicketFlowConfig::default();
    assert_eq!(config.store.store_type, StoreType::Memory);
    let err = resolve_store_config(&config, &StoreLocationArgs::default()).unwrap_err();
    assert!(err.to_string().contains("require a sqlite store"));
}

// ============================================================================
// SECTION: Read Commands
// ============================================================================

#[test]
fn read_commands_succeed_against_seeded_store() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tickets.db");
    seed(&path);

    let list = TicketListCommand {
        location: location(&path),
        open: false,
    };
    assert!(command_ticket_list(None, &list).is_ok());

    let show = TicketShowCommand {
        location: location(&path),
        engine: EngineLocationArgs::default(),
        ticket_id: NonZeroU64::MIN,
    };
    assert!(command_ticket_show(None, &show).is_ok());

    let operate = OperateListCommand {
        location: location(&path),
        resource_id: "vip-9".to_string(),
    };
    assert!(command_operate_list(None, &operate).is_ok());
}

#[test]
fn show_unknown_ticket_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tickets.db");
    seed(&path);
    let show = TicketShowCommand {
        location: location(&path),
        engine: EngineLocationArgs::default(),
        ticket_id: NonZeroU64::new(42).unwrap(),
    };
    let err = command_ticket_show(None, &show).unwrap_err();
    assert!(err.to_string().contains("ticket show failed"));
}

// ============================================================================
// SECTION: Revoke Command
// ============================================================================

fn revoke_command(path: &Path, ticket_id: NonZeroU64) -> TicketRevokeCommand {
    TicketRevokeCommand {
        location: location(path),
        engine: EngineLocationArgs::default(),
        ticket_id,
        terminate: false,
    }
}

#[test]
fn revoke_cancels_the_waiting_flow() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tickets.db");
    seed(&path);

    assert!(command_ticket_revoke(None, &revoke_command(&path, NonZeroU64::MIN)).is_ok());

    let store = SqliteTicketStore::new(SqliteStoreConfig::for_path(&path)).unwrap();
    let flows = store.load_flows(TicketId::new(NonZeroU64::MIN)).unwrap();
    assert_eq!(flows[0].status, FlowStatus::Succeeded);
    assert_eq!(flows[1].status, FlowStatus::Revoked);
}

#[test]
fn revoke_unknown_ticket_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tickets.db");
    seed(&path);
    let err = command_ticket_revoke(None, &revoke_command(&path, NonZeroU64::new(42).unwrap())).unwrap_err();
    assert!(err.to_string().contains("ticket revoke failed"));
}
