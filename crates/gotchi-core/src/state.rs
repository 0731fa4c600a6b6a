//! Evolving vitals shared between the periodic task and the status device.
//!
//! # Invariants
//!
//! - `hunger` and `boredom` start at zero and only ever grow
//! - Increments saturate at `u64::MAX` instead of wrapping
//! - The periodic task is the only writer
//!
//! # Thread Safety
//!
//! Each counter is an `AtomicU64`, so a concurrent `render()` never observes a
//! torn value. A reader racing an `advance()` may see the old value, or see
//! `hunger` already bumped while `boredom` is not yet.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::task::PeriodicWork;

/// Point-in-time copy of the vitals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vitals {
    /// Ticks since the service started
    pub hunger: u64,
    /// Ticks since the service started
    pub boredom: u64,
}

impl fmt::Display for Vitals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hunger={} boredom={}", self.hunger, self.boredom)
    }
}

/// Holder of the two monotonically increasing counters
#[derive(Debug, Default)]
pub struct StateStore {
    hunger: AtomicU64,
    boredom: AtomicU64,
}

impl StateStore {
    /// Create a store with both counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment both counters by one, saturating at the maximum
    pub fn advance(&self) {
        saturating_increment(&self.hunger);
        saturating_increment(&self.boredom);
    }

    /// Read both counters
    pub fn vitals(&self) -> Vitals {
        Vitals {
            hunger: self.hunger.load(Ordering::Acquire),
            boredom: self.boredom.load(Ordering::Acquire),
        }
    }

    /// Human-readable status line
    pub fn render(&self) -> String {
        format!("{}\n", self.vitals())
    }
}

impl PeriodicWork for StateStore {
    fn fire(&self) {
        self.advance();
    }
}

fn saturating_increment(counter: &AtomicU64) {
    // Err only means the closure returned None, i.e. already at u64::MAX.
    let _ = counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |value| {
        value.checked_add(1)
    });
}
