//! Engine error types.
//!
//! API misuse (unknown ids, wrong cell kinds, width mismatches on direct
//! accessors) fails loudly with a [`SimError`]. Structural inconsistencies
//! discovered while the simulation runs (mismatched wire widths) are reported
//! as warnings through the event stream instead, see the engine module.

use thiserror::Error;

use crate::types::{CellId, GraphId, PortId, WireId};

/// Errors returned by the simulation engine API.
#[derive(Debug, Error)]
pub enum SimError {
    /// No graph with this id exists in the arena.
    #[error("unknown graph {0}")]
    UnknownGraph(GraphId),

    /// The addressed cell does not exist in the graph.
    #[error("graph {graph}: unknown cell {cell:?}")]
    UnknownCell { graph: GraphId, cell: CellId },

    /// The addressed wire does not exist in the graph.
    #[error("graph {graph}: unknown wire {wire:?}")]
    UnknownWire { graph: GraphId, wire: WireId },

    /// The cell has no port with this id.
    #[error("graph {graph}: cell {cell:?} has no port {port:?}")]
    UnknownPort {
        graph: GraphId,
        cell: CellId,
        port: PortId,
    },

    /// A cell with this id already exists in the graph.
    #[error("graph {graph}: duplicate cell id {cell:?}")]
    DuplicateCell { graph: GraphId, cell: CellId },

    /// A wire with this id already exists in the graph.
    #[error("graph {graph}: duplicate wire id {wire:?}")]
    DuplicateWire { graph: GraphId, wire: WireId },

    /// The input port is already driven by another wire; fan-in is exclusive.
    #[error("graph {graph}: input {cell:?}.{port:?} is already driven")]
    PortAlreadyDriven {
        graph: GraphId,
        cell: CellId,
        port: PortId,
    },

    /// A wire endpoint does not have the required direction.
    #[error("graph {graph}: {cell:?}.{port:?} has the wrong direction for this wire end")]
    WrongPortDirection {
        graph: GraphId,
        cell: CellId,
        port: PortId,
    },

    /// `set_input` was called on a cell that is not an input pseudo-cell.
    #[error("graph {graph}: cell {cell:?} is not an input")]
    NotAnInput { graph: GraphId, cell: CellId },

    /// `get_output` was called on a cell that is not an output pseudo-cell.
    #[error("graph {graph}: cell {cell:?} is not an output")]
    NotAnOutput { graph: GraphId, cell: CellId },

    /// A signal passed to a direct accessor has the wrong width.
    #[error("signal width {got} does not match expected width {want}")]
    WidthMismatch { want: usize, got: usize },

    /// The parameter patch does not apply to this cell kind.
    #[error("graph {graph}: parameter does not apply to cell {cell:?}")]
    InvalidParam { graph: GraphId, cell: CellId },

    /// A start-class command was issued while the worker is already running.
    #[error("simulation is already running")]
    AlreadyRunning,

    /// The worker thread is gone; no further commands can be served.
    #[error("worker disconnected")]
    WorkerDisconnected,

    /// The worker reported a command failure.
    #[error("worker error: {0}")]
    Remote(String),
}

/// Convenience alias for engine results.
pub type SimResult<T> = Result<T, SimError>;
