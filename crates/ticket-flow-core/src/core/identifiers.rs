// crates/ticket-flow-core/src/core/identifiers.rs
// ============================================================================
// Module: Ticket Flow Identifiers
// Description: Opaque identifiers for tickets, flows, resources and registry tags.
// Purpose: Provide strongly typed, serializable identifiers with stable wire forms.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Tickets and flows carry store-assigned numeric identifiers that are always
//! non-zero. Everything else (resources, engine handles, registry tags) is an
//! opaque string. Registry tags replace the dotted "module.function" strings
//! that business procedures and callbacks are addressed by: a tag only has
//! meaning once resolved against the process-wide registry.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::num::NonZeroU64;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Numeric Identifiers
// ============================================================================

/// Ticket identifier assigned by the ticket store.
///
/// # Invariants
/// - Always >= 1 (non-zero, 1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(NonZeroU64);

impl TicketId {
    /// Creates a new ticket identifier from a non-zero value.
    #[must_use]
    pub const fn new(id: NonZeroU64) -> Self {
        Self(id)
    }

    /// Creates a ticket identifier from a raw value (returns `None` if zero).
    #[must_use]
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    /// Returns the raw identifier value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.get().fmt(f)
    }
}

/// Flow identifier assigned by the ticket store.
///
/// # Invariants
/// - Always >= 1 (non-zero, 1-based).
/// - Unique across all tickets, not only within one ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowId(NonZeroU64);

impl FlowId {
    /// Creates a new flow identifier from a non-zero value.
    #[must_use]
    pub const fn new(id: NonZeroU64) -> Self {
        Self(id)
    }

    /// Creates a flow identifier from a raw value (returns `None` if zero).
    #[must_use]
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    /// Returns the raw identifier value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.get().fmt(f)
    }
}

// ============================================================================
// SECTION: String Identifiers
// ============================================================================

/// Declares an opaque string identifier with the shared accessor surface.
macro_rules! string_identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_identifier!(
    /// Resource identifier (cluster or instance) guarded by the exclusion check.
    ResourceId
);

string_identifier!(
    /// Node identifier inside a pipeline; unique across the whole pipeline tree.
    NodeId
);

string_identifier!(
    /// Opaque root handle returned by the DAG engine on submission.
    RootHandle
);

string_identifier!(
    /// Ticket type tag resolved against the ticket-type registry.
    TicketType
);

string_identifier!(
    /// Business procedure tag resolved against the procedure registry.
    ProcedureId
);

string_identifier!(
    /// Flow param builder tag resolved against the registry.
    ParamBuilderId
);

string_identifier!(
    /// Pre/post callback tag resolved against the registry.
    CallbackId
);

string_identifier!(
    /// Engine component tag executed by a leaf action.
    ComponentId
);
