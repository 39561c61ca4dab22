//! Core type definitions for the simulation engine.
//!
//! This module defines the fundamental identifier and time types used
//! throughout the crate.

use serde::{Deserialize, Serialize};

/// Unique identifier for a cell within its graph.
///
/// Cell ids are caller-chosen strings, matching the keys of the `devices`
/// map in the circuit description schema.
pub type CellId = String;

/// Unique identifier for a wire within its graph.
pub type WireId = String;

/// Unique identifier for a graph in the engine's arena.
///
/// The root graph always has id 0; nested subcircuit graphs get fresh ids
/// from the engine.
pub type GraphId = u32;

/// Port identifier type.
///
/// Ports are named per cell kind, e.g. `"in1"`, `"out"`, `"clk"`.
pub type PortId = String;

/// Unique identifier for a registered monitor.
pub type MonitorId = u64;

/// Unique identifier for a registered alarm.
pub type AlarmId = u64;

/// Discrete simulation time as a wrapping 32-bit counter.
///
/// All tick arithmetic wraps modulo 2^32; ordering between pending ticks is
/// decided by wrapping distance from the scheduler's current tick, so the
/// counter can run indefinitely.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tick(pub u32);

impl Tick {
    /// The initial tick.
    pub const ZERO: Tick = Tick(0);

    /// Returns the tick `delay` steps after this one, wrapping on overflow.
    #[inline]
    pub fn offset(self, delay: u32) -> Tick {
        Tick(self.0.wrapping_add(delay))
    }

    /// Returns the immediately following tick.
    #[inline]
    pub fn next(self) -> Tick {
        self.offset(1)
    }

    /// Wrapping distance from `base` to `self`.
    ///
    /// A pending tick is "due sooner" than another when its distance from
    /// the current tick is smaller.
    #[inline]
    pub fn distance_from(self, base: Tick) -> u32 {
        self.0.wrapping_sub(base.0)
    }
}

impl std::fmt::Display for Tick {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
