// crates/ticket-flow-core/src/runtime/clock.rs
// ============================================================================
// Module: Clocks
// Description: Wall-clock and logical clock implementations.
// Purpose: Supply timestamps to the orchestration runtime.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! [`SystemClock`] is the production clock. [`LogicalClock`] ticks by one on
//! every read so tests get distinct, ordered timestamps.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use crate::core::Timestamp;
use crate::interfaces::Clock;

// ============================================================================
// SECTION: Clocks
// ============================================================================

/// Wall clock reporting unix milliseconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        Timestamp::UnixMillis(i64::try_from(now.as_millis()).unwrap_or(i64::MAX))
    }
}

/// Logical clock advancing by one tick per read.
#[derive(Debug, Default)]
pub struct LogicalClock {
    /// Last tick handed out.
    tick: AtomicU64,
}

impl LogicalClock {
    /// Creates a clock starting at tick 1.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            tick: AtomicU64::new(0),
        }
    }
}

impl Clock for LogicalClock {
    fn now(&self) -> Timestamp {
        Timestamp::Logical(self.tick.fetch_add(1, Ordering::SeqCst) + 1)
    }
}
