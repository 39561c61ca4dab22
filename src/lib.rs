//! # Digilog
//!
//! A hierarchical digital logic simulator with tri-state signals and a
//! delay-aware discrete-event scheduler.
//!
//! ## Design Principles
//!
//! - **Tri-State Logic**: Every wire bit is `0`, `1` or undefined (`x`),
//!   and the undefined value flows through gates, arithmetic and storage
//!   with well-defined semantics (`0 & x = 0`, `1 | x = 1`, undefined
//!   controls never assert).
//! - **Delay-Aware Scheduling**: Each cell carries a propagation delay in
//!   ticks; evaluation is driven by a coalescing event queue, so a cell
//!   whose inputs change several times within one tick evaluates once.
//! - **Hierarchy Without Cost**: Subcircuit boundaries are synchronous,
//!   zero-delay forwarders, so splitting a design into nested circuits
//!   does not change its timing.
//! - **Two Engines, One Behavior**: The in-process [`Simulation`] and the
//!   threaded [`WorkerEngine`] expose the same operations and settle to
//!   the same values at the same ticks.
//!
//! ## Quick Start
//!
//! ```rust
//! use digilog::{Simulation, Endpoint, Signal, CellKind};
//! use digilog::cells::gates::GateParams;
//! use digilog::cell::IoParams;
//!
//! let mut sim = Simulation::new();
//! let g = sim.add_graph();
//! sim.add_cell(g, "a", CellKind::Input(IoParams { bits: 1, net: None }), 0, None)?;
//! sim.add_cell(g, "inv", CellKind::Not(GateParams { bits: 1 }), 1, None)?;
//! sim.add_cell(g, "q", CellKind::Output(IoParams { bits: 1, net: None }), 0, None)?;
//! sim.add_wire(g, "w1", Endpoint::new("a", "out"), Endpoint::new("inv", "in"), None)?;
//! sim.add_wire(g, "w2", Endpoint::new("inv", "out"), Endpoint::new("q", "in"), None)?;
//!
//! sim.set_input(g, "a", Signal::zeros(1))?;
//! sim.step_next();
//! assert_eq!(sim.get_output(g, "q")?, Signal::ones(1));
//! # Ok::<(), digilog::SimError>(())
//! ```
//!
//! ## Circuit Descriptions
//!
//! Circuits can be loaded from and saved to a YAML/JSON schema:
//!
//! ```rust,ignore
//! let desc = digilog::schema::CircuitDesc::from_file("adder.yaml")?;
//! let (mut sim, root) = desc.build()?;
//! ```

pub mod cell;
pub mod cells;
pub mod engine;
pub mod error;
pub mod event;
pub mod graph;
pub mod monitor;
pub mod schema;
pub mod signal;
pub mod types;
pub mod worker;

// Re-export commonly used types
pub use cell::{Cell, CellKind, CellNotification, EvalOutput, Port, PortDir, SignalMap};
pub use engine::{ParamPatch, Simulation};
pub use error::{SimError, SimResult};
pub use event::SimEvent;
pub use graph::{Endpoint, Graph, Wire};
pub use monitor::{AlarmSpec, MonitorSpec};
pub use schema::{CircuitDesc, ConnectorDesc, DeviceDesc, SchemaError};
pub use signal::{Bit, Signal};
pub use types::{AlarmId, CellId, GraphId, MonitorId, PortId, Tick, WireId};
pub use worker::{Reply, WorkerEngine};

/// Initialize the tracing subscriber for logging.
///
/// Call this at the start of your program to enable logging.
pub fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .ok();
}
