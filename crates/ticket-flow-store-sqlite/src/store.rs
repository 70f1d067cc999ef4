// crates/ticket-flow-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Ticket Store
// Description: Durable TicketStore and OperateRecordStore backed by SQLite.
// Purpose: Persist tickets, flows and operate records with transactional saves.
// Dependencies: ticket-flow-core, rusqlite, serde, serde_json, thiserror, tracing
// ============================================================================

//! ## Overview
//! Tickets and flows are stored as JSON documents next to the few columns the
//! store queries on (ticket id, flow position, flow status). Operate records
//! are plain rows keyed by `(flow_id, resource_id)`.
//!
//! Operate-record acquisition runs in one `IMMEDIATE` transaction: the write
//! lock is taken before the holder scan, so two processes sharing the same
//! database file cannot both pass the check for one resource.
//!
//! Loads verify that each document matches the row it was read from and fail
//! closed on mismatch.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;

use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::TransactionBehavior;
use rusqlite::params;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use ticket_flow_core::AcquireOutcome;
use ticket_flow_core::ExclusionHolder;
use ticket_flow_core::FlowId;
use ticket_flow_core::FlowRecord;
use ticket_flow_core::FlowStatus;
use ticket_flow_core::OperateClaim;
use ticket_flow_core::OperateRecord;
use ticket_flow_core::OperateRecordStore;
use ticket_flow_core::OperateRecordView;
use ticket_flow_core::ResourceId;
use ticket_flow_core::StoreError;
use ticket_flow_core::Ticket;
use ticket_flow_core::TicketDraft;
use ticket_flow_core::TicketFilter;
use ticket_flow_core::TicketId;
use ticket_flow_core::TicketStore;
use ticket_flow_core::Timestamp;
use tracing::debug;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Current schema version.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout in milliseconds.
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum size of a stored ticket or flow document.
pub const MAX_RECORD_BYTES: usize = 4 * 1024 * 1024;

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `journal_mode` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// WAL journal mode.
    #[default]
    Wal,
    /// Delete journal mode.
    Delete,
}

impl SqliteStoreMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `synchronous` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode.
    #[default]
    Full,
    /// Normal synchronous mode.
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` ticket store.
///
/// # Invariants
/// - `path` must resolve to a file path (not a directory).
/// - `busy_timeout_ms` is interpreted as milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

impl SqliteStoreConfig {
    /// Builds a config with default pragmas for a database path.
    #[must_use]
    pub fn for_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
        }
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
///
/// # Invariants
/// - Error messages avoid embedding ticket payloads.
#[derive(Debug, Error, Clone)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Stored data failed integrity checks.
    #[error("sqlite store corruption: {0}")]
    Corrupt(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid store data.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
    /// Referenced ticket or flow does not exist.
    #[error("sqlite store object not found: {0}")]
    NotFound(String),
    /// Document exceeded the size limit.
    #[error("sqlite store payload too large: {actual_bytes} bytes (max {max_bytes})")]
    TooLarge {
        /// Maximum allowed bytes.
        max_bytes: usize,
        /// Actual payload size in bytes.
        actual_bytes: usize,
    },
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) => Self::Io(message),
            SqliteStoreError::Db(message) => Self::Store(message),
            SqliteStoreError::Corrupt(message) => Self::Corrupt(message),
            SqliteStoreError::VersionMismatch(message) => Self::VersionMismatch(message),
            SqliteStoreError::Invalid(message) => Self::Invalid(message),
            SqliteStoreError::NotFound(message) => Self::NotFound(message),
            SqliteStoreError::TooLarge {
                max_bytes,
                actual_bytes,
            } => Self::Invalid(format!(
                "document exceeds size limit: {actual_bytes} bytes (max {max_bytes})"
            )),
        }
    }
}

impl From<rusqlite::Error> for SqliteStoreError {
    fn from(error: rusqlite::Error) -> Self {
        Self::Db(error.to_string())
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed ticket and operate-record store.
///
/// # Invariants
/// - Connection access is serialized through a mutex.
/// - Every multi-row write runs inside one transaction.
#[derive(Clone)]
pub struct SqliteTicketStore {
    /// Store configuration.
    config: SqliteStoreConfig,
    /// Shared connection.
    connection: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteTicketStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteTicketStore").field("path", &self.config.path).finish_non_exhaustive()
    }
}

impl SqliteTicketStore {
    /// Opens an `SQLite`-backed ticket store, creating the schema if needed.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// initialized.
    pub fn new(config: SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        validate_store_path(&config.path)?;
        ensure_parent_dir(&config.path)?;
        let mut connection = open_connection(&config)?;
        initialize_schema(&mut connection)?;
        debug!(path = %config.path.display(), "opened sqlite ticket store");
        Ok(Self {
            config,
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Returns the store configuration.
    #[must_use]
    pub const fn config(&self) -> &SqliteStoreConfig {
        &self.config
    }

    /// Locks the connection, mapping poisoning to a store error.
    fn lock(&self) -> Result<MutexGuard<'_, Connection>, SqliteStoreError> {
        self.connection
            .lock()
            .map_err(|_| SqliteStoreError::Io("sqlite connection mutex poisoned".to_string()))
    }

    /// Inserts a ticket and its flows in one transaction.
    fn insert_ticket(
        &self,
        draft: &TicketDraft,
    ) -> Result<(Ticket, Vec<FlowRecord>), SqliteStoreError> {
        if draft.flows.is_empty() {
            return Err(SqliteStoreError::Invalid("ticket requires at least one flow".to_string()));
        }
        let mut guard = self.lock()?;
        let tx = guard.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let ticket_id = next_id(&tx, "SELECT COALESCE(MAX(ticket_id), 0) FROM tickets")
            .and_then(|raw| {
                TicketId::from_raw(raw)
                    .ok_or_else(|| SqliteStoreError::Invalid("ticket id overflow".to_string()))
            })?;
        let first_flow = next_id(&tx, "SELECT COALESCE(MAX(flow_id), 0) FROM flows")?;
        let mut flows = Vec::with_capacity(draft.flows.len());
        for (offset, flow) in draft.flows.iter().enumerate() {
            let flow_id = u64::try_from(offset)
                .ok()
                .and_then(|offset| first_flow.checked_add(offset))
                .and_then(FlowId::from_raw)
                .ok_or_else(|| SqliteStoreError::Invalid("flow id overflow".to_string()))?;
            let position = u32::try_from(offset)
                .map_err(|_| SqliteStoreError::Invalid("too many flows".to_string()))?;
            flows.push(FlowRecord::from_draft(
                flow_id,
                ticket_id,
                position,
                flow.clone(),
                draft.created_at,
            ));
        }
        let ticket = Ticket {
            id: ticket_id,
            ticket_type: draft.request.ticket_type.clone(),
            requester: draft.request.requester.clone(),
            business_id: draft.request.business_id,
            flow_ids: flows.iter().map(|flow| flow.id).collect(),
            payload: draft.request.payload.clone(),
            created_at: draft.created_at,
        };
        tx.execute(
            "INSERT INTO tickets (ticket_id, ticket_json, created_at_json) VALUES (?1, ?2, ?3)",
            params![
                to_sql_id(ticket_id.get())?,
                encode_document(&ticket)?,
                encode_text(&ticket.created_at)?
            ],
        )?;
        for flow in &flows {
            tx.execute(
                "INSERT INTO flows (flow_id, ticket_id, position, status, flow_json) VALUES (?1, \
                 ?2, ?3, ?4, ?5)",
                params![
                    to_sql_id(flow.id.get())?,
                    to_sql_id(ticket_id.get())?,
                    flow.position,
                    flow.status.as_str(),
                    encode_document(flow)?
                ],
            )?;
        }
        tx.commit()?;
        drop(guard);
        debug!(ticket_id = %ticket.id, flows = flows.len(), "persisted ticket");
        Ok((ticket, flows))
    }

    /// Loads one ticket document.
    fn select_ticket(&self, ticket_id: TicketId) -> Result<Option<Ticket>, SqliteStoreError> {
        let guard = self.lock()?;
        let bytes: Option<Vec<u8>> = guard
            .query_row(
                "SELECT ticket_json FROM tickets WHERE ticket_id = ?1",
                params![to_sql_id(ticket_id.get())?],
                |row| row.get(0),
            )
            .optional()?;
        drop(guard);
        let Some(bytes) = bytes else {
            return Ok(None);
        };
        let ticket: Ticket = decode_document(&bytes)?;
        if ticket.id != ticket_id {
            return Err(SqliteStoreError::Corrupt(format!(
                "ticket row {ticket_id} holds document for ticket {}",
                ticket.id
            )));
        }
        Ok(Some(ticket))
    }

    /// Loads a ticket's flow documents ordered by position.
    fn select_flows(&self, ticket_id: TicketId) -> Result<Vec<FlowRecord>, SqliteStoreError> {
        let guard = self.lock()?;
        let mut statement = guard.prepare(
            "SELECT flow_id, status, flow_json FROM flows WHERE ticket_id = ?1 ORDER BY position",
        )?;
        let rows = statement
            .query_map(params![to_sql_id(ticket_id.get())?], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, Vec<u8>>(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        drop(statement);
        drop(guard);
        rows.into_iter()
            .map(|(row_id, status, bytes)| {
                let flow: FlowRecord = decode_document(&bytes)?;
                if flow.id.get() != from_sql_id(row_id)? || flow.ticket_id != ticket_id {
                    return Err(SqliteStoreError::Corrupt(format!(
                        "flow row {row_id} holds document for flow {}",
                        flow.id
                    )));
                }
                if parse_status(&status)? != flow.status {
                    return Err(SqliteStoreError::Corrupt(format!(
                        "flow {} status column disagrees with document",
                        flow.id
                    )));
                }
                Ok(flow)
            })
            .collect()
    }

    /// Updates existing flows in one transaction.
    fn update_flows(&self, flows: &[FlowRecord]) -> Result<(), SqliteStoreError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction_with_behavior(TransactionBehavior::Immediate)?;
        for flow in flows {
            let owner: Option<i64> = tx
                .query_row(
                    "SELECT ticket_id FROM flows WHERE flow_id = ?1",
                    params![to_sql_id(flow.id.get())?],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(owner) = owner else {
                return Err(SqliteStoreError::NotFound(format!("flow {}", flow.id)));
            };
            if from_sql_id(owner)? != flow.ticket_id.get() {
                return Err(SqliteStoreError::Invalid(format!("flow {} changed owner", flow.id)));
            }
            tx.execute(
                "UPDATE flows SET status = ?2, flow_json = ?3 WHERE flow_id = ?1",
                params![to_sql_id(flow.id.get())?, flow.status.as_str(), encode_document(flow)?],
            )?;
        }
        tx.commit()?;
        drop(guard);
        Ok(())
    }

    /// Lists ticket identifiers matching a filter.
    fn select_ticket_ids(&self, filter: TicketFilter) -> Result<Vec<TicketId>, SqliteStoreError> {
        let sql = match filter {
            TicketFilter::All => "SELECT ticket_id FROM tickets ORDER BY ticket_id",
            TicketFilter::Open => {
                "SELECT DISTINCT ticket_id FROM flows WHERE status IN ('pending', 'running', \
                 'failed') ORDER BY ticket_id"
            }
        };
        let guard = self.lock()?;
        let mut statement = guard.prepare(sql)?;
        let raw = statement
            .query_map(params![], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        drop(statement);
        drop(guard);
        raw.into_iter()
            .map(|value| {
                TicketId::from_raw(from_sql_id(value)?)
                    .ok_or_else(|| SqliteStoreError::Corrupt("zero ticket id".to_string()))
            })
            .collect()
    }

    /// Runs the exclusion check and record upsert in one immediate transaction.
    fn acquire_records(&self, claim: &OperateClaim) -> Result<AcquireOutcome, SqliteStoreError> {
        let resources: BTreeSet<&ResourceId> = claim.resources.iter().collect();
        let ticket_id = to_sql_id(claim.ticket_id.get())?;
        let flow_id = to_sql_id(claim.flow_id.get())?;
        let mut guard = self.lock()?;
        let tx = guard.transaction_with_behavior(TransactionBehavior::Immediate)?;
        for resource_id in &resources {
            if let Some(holder) = find_holder(&tx, resource_id, ticket_id)? {
                // Dropping the transaction rolls back; nothing was written.
                return Ok(AcquireOutcome::Conflict {
                    holder,
                });
            }
        }
        let claimed_at = encode_text(&claim.claimed_at)?;
        for resource_id in resources {
            tx.execute(
                "INSERT INTO operate_records (resource_id, ticket_id, flow_id, created_at_json) \
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (flow_id, resource_id) DO UPDATE SET created_at_json = \
                 excluded.created_at_json",
                params![resource_id.as_str(), ticket_id, flow_id, claimed_at],
            )?;
        }
        tx.commit()?;
        drop(guard);
        Ok(AcquireOutcome::Acquired)
    }

    /// Lists records for a resource joined with flow status.
    fn select_records(
        &self,
        resource_id: &ResourceId,
    ) -> Result<Vec<OperateRecordView>, SqliteStoreError> {
        let guard = self.lock()?;
        let mut statement = guard.prepare(
            "SELECT o.ticket_id, o.flow_id, o.created_at_json, f.status
             FROM operate_records o
             LEFT JOIN flows f ON f.flow_id = o.flow_id
             WHERE o.resource_id = ?1
             ORDER BY o.rowid",
        )?;
        let rows = statement
            .query_map(params![resource_id.as_str()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        drop(statement);
        drop(guard);
        rows.into_iter()
            .map(|(ticket_id, flow_id, created_at, status)| {
                let flow_id = parse_flow_id(flow_id)?;
                let Some(status) = status else {
                    return Err(SqliteStoreError::Corrupt(format!(
                        "operate record references missing flow {flow_id}"
                    )));
                };
                Ok(OperateRecordView {
                    record: OperateRecord {
                        resource_id: resource_id.clone(),
                        ticket_id: parse_ticket_id(ticket_id)?,
                        flow_id,
                        created_at: decode_text::<Timestamp>(&created_at)?,
                    },
                    flow_status: parse_status(&status)?,
                })
            })
            .collect()
    }

    /// Verifies the store can execute a simple SQL statement.
    fn check_connection(&self) -> Result<(), SqliteStoreError> {
        let guard = self.lock()?;
        guard.query_row("SELECT 1", params![], |row| row.get::<_, i64>(0))?;
        drop(guard);
        Ok(())
    }
}

impl TicketStore for SqliteTicketStore {
    fn create_ticket(&self, draft: &TicketDraft) -> Result<(Ticket, Vec<FlowRecord>), StoreError> {
        self.insert_ticket(draft).map_err(StoreError::from)
    }

    fn load_ticket(&self, ticket_id: TicketId) -> Result<Option<Ticket>, StoreError> {
        self.select_ticket(ticket_id).map_err(StoreError::from)
    }

    fn load_flows(&self, ticket_id: TicketId) -> Result<Vec<FlowRecord>, StoreError> {
        self.select_flows(ticket_id).map_err(StoreError::from)
    }

    fn save_flows(&self, flows: &[FlowRecord]) -> Result<(), StoreError> {
        self.update_flows(flows).map_err(StoreError::from)
    }

    fn list_tickets(&self, filter: TicketFilter) -> Result<Vec<TicketId>, StoreError> {
        self.select_ticket_ids(filter).map_err(StoreError::from)
    }

    fn readiness(&self) -> Result<(), StoreError> {
        self.check_connection().map_err(StoreError::from)
    }
}

impl OperateRecordStore for SqliteTicketStore {
    fn acquire(&self, claim: &OperateClaim) -> Result<AcquireOutcome, StoreError> {
        self.acquire_records(claim).map_err(StoreError::from)
    }

    fn records_for(&self, resource_id: &ResourceId) -> Result<Vec<OperateRecordView>, StoreError> {
        self.select_records(resource_id).map_err(StoreError::from)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Ensures the parent directory for the store exists.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Err(SqliteStoreError::Io("store path missing parent directory".to_string()));
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
}

/// Validates store paths for safety limits.
fn validate_store_path(path: &Path) -> Result<(), SqliteStoreError> {
    if path.as_os_str().is_empty() {
        return Err(SqliteStoreError::Invalid("store path must not be empty".to_string()));
    }
    if path.display().to_string().len() > MAX_TOTAL_PATH_LENGTH {
        return Err(SqliteStoreError::Invalid("store path exceeds length limit".to_string()));
    }
    for component in path.components() {
        if component.as_os_str().to_string_lossy().len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(SqliteStoreError::Invalid(
                "store path contains an overlong component".to_string(),
            ));
        }
    }
    if path.is_dir() {
        return Err(SqliteStoreError::Invalid(
            "store path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

/// Opens an `SQLite` connection with the configured pragmas.
fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags)?;
    connection.execute_batch("PRAGMA foreign_keys = ON;")?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))?;
    connection.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
    Ok(connection)
}

/// Initializes the schema or validates the existing version.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS tickets (
                    ticket_id INTEGER PRIMARY KEY,
                    ticket_json BLOB NOT NULL,
                    created_at_json TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS flows (
                    flow_id INTEGER PRIMARY KEY,
                    ticket_id INTEGER NOT NULL REFERENCES tickets(ticket_id) ON DELETE CASCADE,
                    position INTEGER NOT NULL,
                    status TEXT NOT NULL,
                    flow_json BLOB NOT NULL,
                    UNIQUE (ticket_id, position)
                );
                CREATE INDEX IF NOT EXISTS idx_flows_status ON flows (status, ticket_id);
                CREATE TABLE IF NOT EXISTS operate_records (
                    resource_id TEXT NOT NULL,
                    ticket_id INTEGER NOT NULL,
                    flow_id INTEGER NOT NULL REFERENCES flows(flow_id) ON DELETE CASCADE,
                    created_at_json TEXT NOT NULL,
                    PRIMARY KEY (flow_id, resource_id)
                );
                CREATE INDEX IF NOT EXISTS idx_operate_records_resource
                    ON operate_records (resource_id, ticket_id);",
            )?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "unsupported schema version: {value}"
            )));
        }
    }
    tx.commit()?;
    Ok(())
}

/// Returns the first holder of a resource owned by another ticket's active flow.
fn find_holder(
    tx: &Transaction<'_>,
    resource_id: &ResourceId,
    ticket_id: i64,
) -> Result<Option<ExclusionHolder>, SqliteStoreError> {
    let mut statement = tx.prepare(
        "SELECT o.ticket_id, o.flow_id, f.status
         FROM operate_records o
         LEFT JOIN flows f ON f.flow_id = o.flow_id
         WHERE o.resource_id = ?1 AND o.ticket_id != ?2
         ORDER BY o.rowid",
    )?;
    let rows = statement
        .query_map(params![resource_id.as_str(), ticket_id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, Option<String>>(2)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    for (holder_ticket, holder_flow, status) in rows {
        let flow_id = parse_flow_id(holder_flow)?;
        let Some(status) = status else {
            return Err(SqliteStoreError::Corrupt(format!(
                "operate record references missing flow {flow_id}"
            )));
        };
        if !parse_status(&status)?.is_terminal() {
            return Ok(Some(ExclusionHolder {
                resource_id: resource_id.clone(),
                ticket_id: parse_ticket_id(holder_ticket)?,
                flow_id,
            }));
        }
    }
    Ok(None)
}

/// Returns the next identifier after the maximum selected by `sql`.
fn next_id(tx: &Transaction<'_>, sql: &str) -> Result<u64, SqliteStoreError> {
    let current: i64 = tx.query_row(sql, params![], |row| row.get(0))?;
    from_sql_id(current)?
        .checked_add(1)
        .ok_or_else(|| SqliteStoreError::Invalid("identifier overflow".to_string()))
}

/// Converts an identifier to its SQL representation.
fn to_sql_id(value: u64) -> Result<i64, SqliteStoreError> {
    i64::try_from(value).map_err(|_| SqliteStoreError::Invalid(format!("id {value} out of range")))
}

/// Converts a stored identifier back to its raw value.
fn from_sql_id(value: i64) -> Result<u64, SqliteStoreError> {
    u64::try_from(value).map_err(|_| SqliteStoreError::Corrupt(format!("negative id {value}")))
}

/// Parses a stored ticket identifier.
fn parse_ticket_id(value: i64) -> Result<TicketId, SqliteStoreError> {
    TicketId::from_raw(from_sql_id(value)?)
        .ok_or_else(|| SqliteStoreError::Corrupt("zero ticket id".to_string()))
}

/// Parses a stored flow identifier.
fn parse_flow_id(value: i64) -> Result<FlowId, SqliteStoreError> {
    FlowId::from_raw(from_sql_id(value)?)
        .ok_or_else(|| SqliteStoreError::Corrupt("zero flow id".to_string()))
}

/// Parses a stored flow status label.
fn parse_status(label: &str) -> Result<FlowStatus, SqliteStoreError> {
    FlowStatus::parse(label)
        .ok_or_else(|| SqliteStoreError::Corrupt(format!("unknown flow status: {label}")))
}

/// Serializes a document, enforcing the size limit.
fn encode_document<T: Serialize>(value: &T) -> Result<Vec<u8>, SqliteStoreError> {
    let bytes =
        serde_json::to_vec(value).map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
    if bytes.len() > MAX_RECORD_BYTES {
        return Err(SqliteStoreError::TooLarge {
            max_bytes: MAX_RECORD_BYTES,
            actual_bytes: bytes.len(),
        });
    }
    Ok(bytes)
}

/// Deserializes a stored document, enforcing the size limit.
fn decode_document<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, SqliteStoreError> {
    if bytes.len() > MAX_RECORD_BYTES {
        return Err(SqliteStoreError::TooLarge {
            max_bytes: MAX_RECORD_BYTES,
            actual_bytes: bytes.len(),
        });
    }
    serde_json::from_slice(bytes).map_err(|err| SqliteStoreError::Corrupt(err.to_string()))
}

/// Serializes a small value into a text column.
fn encode_text<T: Serialize>(value: &T) -> Result<String, SqliteStoreError> {
    serde_json::to_string(value).map_err(|err| SqliteStoreError::Invalid(err.to_string()))
}

/// Deserializes a small value from a text column.
fn decode_text<T: DeserializeOwned>(text: &str) -> Result<T, SqliteStoreError> {
    serde_json::from_str(text).map_err(|err| SqliteStoreError::Corrupt(err.to_string()))
}
