// crates/ticket-flow-core/src/core/time.rs
// ============================================================================
// Module: Ticket Flow Time Model
// Description: Timestamp values recorded on tickets, flows and operate records.
// Purpose: Keep time an explicit input so orchestration stays replayable in tests.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! The orchestration core never reads the wall clock itself. Timestamps come
//! from a [`crate::interfaces::Clock`] supplied by the host, which lets tests
//! drive logical time.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Time Values
// ============================================================================

/// Timestamp recorded on orchestration records.
///
/// # Invariants
/// - Values are supplied by a clock; no monotonicity is enforced here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Timestamp {
    /// Unix epoch milliseconds.
    UnixMillis(i64),
    /// Logical tick used by deterministic hosts and tests.
    Logical(u64),
}

impl Timestamp {
    /// Returns the timestamp as unix milliseconds when available.
    #[must_use]
    pub const fn as_unix_millis(&self) -> Option<i64> {
        match self {
            Self::UnixMillis(value) => Some(*value),
            Self::Logical(_) => None,
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnixMillis(value) => write!(f, "{value}ms"),
            Self::Logical(value) => write!(f, "t{value}"),
        }
    }
}
