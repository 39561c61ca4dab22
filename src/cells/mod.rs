//! The cell semantics catalog, one file per cell family.
//!
//! Each module exposes the parameter structs referenced by
//! [`CellKind`](crate::cell::CellKind) together with the port declarations
//! and evaluation functions for its family.

pub mod arith;
pub mod bus;
pub mod dff;
pub mod fsm;
pub mod gates;
pub mod memory;
pub mod misc;
pub mod mux;
