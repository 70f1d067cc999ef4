// crates/ticket-flow-cli/src/main.rs
// ============================================================================
// Module: Ticket Flow CLI Entry Point
// Description: Command dispatcher for ticket inspection, revoke and node operations.
// Purpose: Give operators access to tickets and control over engine nodes.
// Dependencies: clap, ticket-flow-core, ticket-flow-config, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Ticket and operate-record commands read the `SQLite` store named by the
//! config (or `--store-path`). `ticket revoke` cancels a ticket through the
//! manager, revoking its engine root. Node commands talk to the DAG engine
//! directly by root handle. Output is JSON on stdout; logs go to stderr.
//!
//! Ticket creation, advancement and flow-level node operations need the
//! host's procedure registry, so they live in the embedding service, not
//! here. The service picks up node changes on its next refresh; a resumed
//! root whose flow lost its resources stays failed there and is revoked by
//! the next retry.

// ============================================================================
// SECTION: Modules
// ============================================================================

#[cfg(test)]
mod main_tests;

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::num::NonZeroU64;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use ticket_flow_cli::logging::init_logging;
use ticket_flow_config::StoreType;
use ticket_flow_config::TicketFlowConfig;
use ticket_flow_core::DagEngine;
use ticket_flow_core::NodeId;
use ticket_flow_core::OperateRecordView;
use ticket_flow_core::Registry;
use ticket_flow_core::ResourceId;
use ticket_flow_core::RootHandle;
use ticket_flow_core::SystemClock;
use ticket_flow_core::TicketFilter;
use ticket_flow_core::TicketFlowManager;
use ticket_flow_core::TicketId;
use ticket_flow_core::TicketStatus;
use ticket_flow_engine_http::HttpDagEngine;
use ticket_flow_store_sqlite::SqliteStoreConfig;
use ticket_flow_store_sqlite::SqliteTicketStore;
use tracing::debug;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Maximum size of a `--payload` argument for node callbacks.
const MAX_CALLBACK_PAYLOAD_BYTES: usize = 256 * 1024;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "ticket-flow", version, disable_help_subcommand = true)]
struct Cli {
    /// Optional config file path (defaults to ticket-flow.toml or env override).
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Configuration utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Ticket inspection.
    Ticket {
        /// Selected ticket subcommand.
        #[command(subcommand)]
        command: TicketCommand,
    },
    /// Operate-record inspection.
    Operate {
        /// Selected operate subcommand.
        #[command(subcommand)]
        command: OperateCommand,
    },
    /// DAG engine node operations.
    Node {
        /// Selected node subcommand.
        #[command(subcommand)]
        command: NodeCommand,
    },
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Validate a ticket-flow configuration file.
    Validate,
}

/// Ticket subcommands.
#[derive(Subcommand, Debug)]
enum TicketCommand {
    /// List tickets with their derived status.
    List(TicketListCommand),
    /// Show a ticket with its flows and engine trees.
    Show(TicketShowCommand),
    /// Revoke a ticket's current flow and every later flow.
    Revoke(TicketRevokeCommand),
}

/// Operate-record subcommands.
#[derive(Subcommand, Debug)]
enum OperateCommand {
    /// List records held on a resource.
    List(OperateListCommand),
}

/// Node subcommands.
#[derive(Subcommand, Debug)]
enum NodeCommand {
    /// Re-run a failed node.
    Retry(NodeTarget),
    /// Mark a failed node finished without running it.
    Skip(NodeTarget),
    /// Mark a running or suspended node failed.
    ForceFail(NodeTarget),
    /// Resume a suspended node with operator data.
    Callback(NodeCallbackCommand),
    /// Print a node's log lines.
    Logs(NodeTarget),
}

/// Store location inputs.
#[derive(Args, Debug, Clone, Default)]
struct StoreLocationArgs {
    /// Optional direct `SQLite` store path (overrides config).
    #[arg(long = "store-path", value_name = "PATH")]
    store_path: Option<PathBuf>,
}

/// Engine location inputs.
#[derive(Args, Debug, Clone, Default)]
struct EngineLocationArgs {
    /// Optional engine base URL (overrides config).
    #[arg(long = "engine-url", value_name = "URL")]
    engine_url: Option<String>,
}

/// Arguments for `ticket list`.
#[derive(Args, Debug)]
struct TicketListCommand {
    /// Store location settings.
    #[command(flatten)]
    location: StoreLocationArgs,
    /// Only tickets with a pending, running or failed flow.
    #[arg(long)]
    open: bool,
}

/// Arguments for `ticket show`.
#[derive(Args, Debug)]
struct TicketShowCommand {
    /// Store location settings.
    #[command(flatten)]
    location: StoreLocationArgs,
    /// Engine location settings.
    #[command(flatten)]
    engine: EngineLocationArgs,
    /// Ticket identifier.
    #[arg(value_name = "TICKET_ID")]
    ticket_id: NonZeroU64,
}

/// Arguments for `ticket revoke`.
#[derive(Args, Debug)]
struct TicketRevokeCommand {
    /// Store location settings.
    #[command(flatten)]
    location: StoreLocationArgs,
    /// Engine location settings.
    #[command(flatten)]
    engine: EngineLocationArgs,
    /// Ticket identifier.
    #[arg(value_name = "TICKET_ID")]
    ticket_id: NonZeroU64,
    /// End the current flow terminated even when the engine confirms the revoke.
    #[arg(long)]
    terminate: bool,
}

/// Arguments for `operate list`.
#[derive(Args, Debug)]
struct OperateListCommand {
    /// Store location settings.
    #[command(flatten)]
    location: StoreLocationArgs,
    /// Resource identifier.
    #[arg(value_name = "RESOURCE_ID")]
    resource_id: String,
}

/// Root and node addressed by a node command.
#[derive(Args, Debug)]
struct NodeTarget {
    /// Engine location settings.
    #[command(flatten)]
    engine: EngineLocationArgs,
    /// Engine root handle.
    #[arg(value_name = "ROOT")]
    root: String,
    /// Node identifier.
    #[arg(value_name = "NODE")]
    node: String,
}

/// Arguments for `node callback`.
#[derive(Args, Debug)]
struct NodeCallbackCommand {
    /// Addressed node.
    #[command(flatten)]
    target: NodeTarget,
    /// JSON payload handed to the suspended node.
    #[arg(long, value_name = "JSON")]
    payload: String,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    const fn new(message: String) -> Self {
        Self {
            message,
        }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
fn run(cli: Cli) -> CliResult<ExitCode> {
    let config_path = cli.config;
    match cli.command {
        Commands::Config {
            command: ConfigCommand::Validate,
        } => command_config_validate(config_path),
        Commands::Ticket {
            command,
        } => match command {
            TicketCommand::List(command) => command_ticket_list(config_path, &command),
            TicketCommand::Show(command) => command_ticket_show(config_path, &command),
            TicketCommand::Revoke(command) => command_ticket_revoke(config_path, &command),
        },
        Commands::Operate {
            command: OperateCommand::List(command),
        } => command_operate_list(config_path, &command),
        Commands::Node {
            command,
        } => command_node(config_path, command),
    }
}

// ============================================================================
// SECTION: Config Command
// ============================================================================

/// Executes the config validation command.
fn command_config_validate(config_path: Option<PathBuf>) -> CliResult<ExitCode> {
    let _config = load_config(config_path)?;
    write_stdout_line("config ok").map_err(|err| CliError::new(output_error("stdout", &err)))?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Ticket Commands
// ============================================================================

/// Manager used by ticket commands; its registry is empty.
type ReadManager = TicketFlowManager<SqliteTicketStore, HttpDagEngine, SystemClock>;

/// One row of `ticket list`.
#[derive(Debug, Serialize)]
struct TicketListEntry {
    /// Ticket identifier.
    ticket_id: TicketId,
    /// Ticket type label.
    ticket_type: String,
    /// Derived status.
    status: TicketStatus,
    /// Failure or best-effort summary.
    summary: Option<String>,
}

/// Executes `ticket list`.
fn command_ticket_list(config_path: Option<PathBuf>, command: &TicketListCommand) -> CliResult<ExitCode> {
    let config = load_config_for_store(config_path, &command.location)?;
    let manager = open_manager(&config, &command.location, &EngineLocationArgs::default())?;
    let filter = if command.open { TicketFilter::Open } else { TicketFilter::All };
    let ids = manager.list_tickets(filter).map_err(|err| CliError::new(format!("ticket list failed: {err}")))?;
    let mut entries = Vec::with_capacity(ids.len());
    for ticket_id in ids {
        let view = manager
            .update_ticket_status(ticket_id)
            .map_err(|err| CliError::new(format!("ticket {ticket_id} unreadable: {err}")))?;
        entries.push(TicketListEntry {
            ticket_id,
            ticket_type: view.ticket.ticket_type.as_str().to_string(),
            status: view.status,
            summary: view.summary,
        });
    }
    write_json(&entries)?;
    Ok(ExitCode::SUCCESS)
}

/// Executes `ticket show`.
fn command_ticket_show(config_path: Option<PathBuf>, command: &TicketShowCommand) -> CliResult<ExitCode> {
    let config = load_config_for_store(config_path, &command.location)?;
    let manager = open_manager(&config, &command.location, &command.engine)?;
    let tree = manager
        .tree_state(TicketId::new(command.ticket_id))
        .map_err(|err| CliError::new(format!("ticket show failed: {err}")))?;
    write_json(&tree)?;
    Ok(ExitCode::SUCCESS)
}

/// Executes `ticket revoke`.
fn command_ticket_revoke(config_path: Option<PathBuf>, command: &TicketRevokeCommand) -> CliResult<ExitCode> {
    let config = load_config_for_store(config_path, &command.location)?;
    let manager = open_manager(&config, &command.location, &command.engine)?;
    let ticket_id = TicketId::new(command.ticket_id);
    let outcome = if command.terminate { manager.terminate(ticket_id) } else { manager.revoke(ticket_id) };
    let view = outcome.map_err(|err| CliError::new(format!("ticket revoke failed: {err}")))?;
    write_json(&view)?;
    Ok(ExitCode::SUCCESS)
}

/// Executes `operate list`.
fn command_operate_list(config_path: Option<PathBuf>, command: &OperateListCommand) -> CliResult<ExitCode> {
    let config = load_config_for_store(config_path, &command.location)?;
    let manager = open_manager(&config, &command.location, &EngineLocationArgs::default())?;
    let resource_id = ResourceId::new(command.resource_id.clone());
    let holders: Vec<OperateRecordView> = manager
        .holders(&resource_id)
        .map_err(|err| CliError::new(format!("operate list failed: {err}")))?;
    write_json(&holders)?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Node Commands
// ============================================================================

/// Acknowledgement printed by mutating node commands.
#[derive(Debug, Serialize)]
struct NodeAck<'a> {
    /// Engine root handle.
    root: &'a str,
    /// Node identifier.
    node: &'a str,
    /// Operation performed.
    operation: &'a str,
}

/// Dispatches node subcommands.
fn command_node(config_path: Option<PathBuf>, command: NodeCommand) -> CliResult<ExitCode> {
    let (target, operation) = match &command {
        NodeCommand::Retry(target) => (target, "retry"),
        NodeCommand::Skip(target) => (target, "skip"),
        NodeCommand::ForceFail(target) => (target, "force_fail"),
        NodeCommand::Callback(callback) => (&callback.target, "callback"),
        NodeCommand::Logs(target) => (target, "logs"),
    };
    let config = load_config(config_path)?;
    let engine = open_engine(&config, &target.engine)?;
    let root = RootHandle::new(target.root.clone());
    let node = NodeId::new(target.node.clone());
    debug!(root = %root, node = %node, operation, "node command");
    let outcome = match &command {
        NodeCommand::Retry(_) => engine.retry_node(&root, &node),
        NodeCommand::Skip(_) => engine.skip_node(&root, &node),
        NodeCommand::ForceFail(_) => engine.force_fail_node(&root, &node),
        NodeCommand::Callback(callback) => {
            let payload = parse_payload(&callback.payload)?;
            engine.callback_node(&root, &node, &payload)
        }
        NodeCommand::Logs(_) => {
            let lines = engine
                .node_logs(&root, &node)
                .map_err(|err| CliError::new(format!("node logs failed: {err}")))?;
            for line in lines {
                write_stdout_line(&line).map_err(|err| CliError::new(output_error("stdout", &err)))?;
            }
            return Ok(ExitCode::SUCCESS);
        }
    };
    outcome.map_err(|err| CliError::new(format!("node {operation} failed: {err}")))?;
    write_json(&NodeAck {
        root: &target.root,
        node: &target.node,
        operation,
    })?;
    Ok(ExitCode::SUCCESS)
}

/// Parses a callback payload with a size limit.
fn parse_payload(raw: &str) -> CliResult<Value> {
    if raw.len() > MAX_CALLBACK_PAYLOAD_BYTES {
        return Err(CliError::new(format!(
            "callback payload exceeds {MAX_CALLBACK_PAYLOAD_BYTES} bytes"
        )));
    }
    serde_json::from_str(raw).map_err(|err| CliError::new(format!("callback payload is not json: {err}")))
}

// ============================================================================
// SECTION: Wiring
// ============================================================================

/// Loads config and installs logging.
fn load_config(config_path: Option<PathBuf>) -> CliResult<TicketFlowConfig> {
    let config = TicketFlowConfig::load(config_path.as_deref())
        .map_err(|err| CliError::new(format!("failed to load config: {err}")))?;
    init_logging(&config.logging).map_err(|err| CliError::new(err.to_string()))?;
    Ok(config)
}

/// Loads config unless a direct store path makes it optional.
fn load_config_for_store(
    config_path: Option<PathBuf>,
    location: &StoreLocationArgs,
) -> CliResult<TicketFlowConfig> {
    if location.store_path.is_some() && config_path.is_none() {
        let config = TicketFlowConfig::default();
        init_logging(&config.logging).map_err(|err| CliError::new(err.to_string()))?;
        return Ok(config);
    }
    load_config(config_path)
}

/// Resolves the `SQLite` store config from arguments and config.
fn resolve_store_config(config: &TicketFlowConfig, location: &StoreLocationArgs) -> CliResult<SqliteStoreConfig> {
    if let Some(store_path) = &location.store_path {
        return Ok(SqliteStoreConfig {
            path: store_path.clone(),
            busy_timeout_ms: config.store.busy_timeout_ms,
            journal_mode: config.store.journal_mode,
            sync_mode: config.store.sync_mode,
        });
    }
    if config.store.store_type == StoreType::Memory {
        return Err(CliError::new(
            "ticket commands require a sqlite store (set store.type or --store-path)".to_string(),
        ));
    }
    config.store.sqlite().ok_or_else(|| CliError::new("store.path is not set".to_string()))
}

/// Builds the engine client from arguments and config.
fn open_engine(config: &TicketFlowConfig, location: &EngineLocationArgs) -> CliResult<HttpDagEngine> {
    let mut engine = config.engine.clone();
    if let Some(url) = &location.engine_url {
        engine.base_url.clone_from(url);
    }
    HttpDagEngine::new(&engine).map_err(|err| CliError::new(format!("engine client: {err}")))
}

/// Opens a manager over the `SQLite` store and HTTP engine.
fn open_manager(
    config: &TicketFlowConfig,
    location: &StoreLocationArgs,
    engine: &EngineLocationArgs,
) -> CliResult<ReadManager> {
    let store_config = resolve_store_config(config, location)?;
    let store = SqliteTicketStore::new(store_config).map_err(|err| CliError::new(format!("failed to open store: {err}")))?;
    let engine = open_engine(config, engine)?;
    let registry = Registry::builder().build().map_err(|err| CliError::new(err.to_string()))?;
    Ok(TicketFlowManager::new(registry, store, engine, SystemClock))
}

// ============================================================================
// SECTION: Output Helpers
// ============================================================================

/// Writes pretty JSON to stdout.
fn write_json<T: Serialize>(value: &T) -> CliResult<()> {
    let mut bytes =
        serde_json::to_vec_pretty(value).map_err(|err| CliError::new(format!("failed to render json: {err}")))?;
    bytes.push(b'\n');
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&bytes).map_err(|err| CliError::new(output_error("stdout", &err)))
}

/// Writes a single line to stdout.
fn write_stdout_line(message: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(&mut stdout, "{message}")
}

/// Writes a single line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr().lock();
    writeln!(&mut stderr, "{message}")
}

/// Formats an output error message.
fn output_error(stream: &str, error: &std::io::Error) -> String {
    format!("failed to write to {stream}: {error}")
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}
