//! The typed simulation event stream.
//!
//! Every observable change in the engine is surfaced as a [`SimEvent`].
//! Events are buffered on the engine and drained by the caller; the worker
//! layer batches them into its `Update` replies.

use serde::{Deserialize, Serialize};

use crate::signal::Signal;
use crate::types::{AlarmId, CellId, GraphId, MonitorId, PortId, Tick, WireId};

/// An observable change in the simulation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SimEvent {
    CellAdded {
        graph: GraphId,
        cell: CellId,
    },
    CellRemoved {
        graph: GraphId,
        cell: CellId,
    },
    WireAdded {
        graph: GraphId,
        wire: WireId,
    },
    WireRemoved {
        graph: GraphId,
        wire: WireId,
    },
    /// An input port of a cell took a new value.
    InputSignalsChanged {
        graph: GraphId,
        cell: CellId,
        port: PortId,
        value: Signal,
    },
    /// An output port of a cell took a new value.
    OutputSignalsChanged {
        graph: GraphId,
        cell: CellId,
        port: PortId,
        value: Signal,
    },
    ParamChanged {
        graph: GraphId,
        cell: CellId,
    },
    /// A memory word changed through a write port.
    MemoryChanged {
        graph: GraphId,
        cell: CellId,
        addr: usize,
        value: Signal,
    },
    /// An FSM moved to a new state.
    FsmStateChanged {
        graph: GraphId,
        cell: CellId,
        state: usize,
    },
    MonitorTriggered {
        monitor: MonitorId,
        tick: Tick,
        value: Signal,
    },
    AlarmReached {
        alarm: AlarmId,
        tick: Tick,
    },
    /// A structural inconsistency was detected; the simulation will not run
    /// while warnings are outstanding.
    Warning {
        graph: GraphId,
        message: String,
    },
}
