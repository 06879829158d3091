//! Per-connection outbound sequence counter.
//!
//! Every envelope a connection emits, whatever its category, takes its number
//! from one counter. The state machine owns it and hands clones to the
//! heartbeat monitor so PINGs interleave with control and data traffic without
//! ever reusing a number.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared monotonic counter; clones draw from the same sequence
#[derive(Debug, Clone, Default)]
pub struct SequenceCounter {
    last: Arc<AtomicU64>,
}

impl SequenceCounter {
    /// Counter whose first number is 1
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next number
    pub fn next(&self) -> u64 {
        self.last.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Last number handed out, zero before the first
    pub fn last(&self) -> u64 {
        self.last.load(Ordering::SeqCst)
    }

    /// Start again from 1
    pub fn reset(&self) {
        self.last.store(0, Ordering::SeqCst);
    }
}
