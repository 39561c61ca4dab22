//! Circuit graphs: cells, wires and connectivity indexes.
//!
//! Graphs live in the engine's arena and refer to their enclosing
//! subcircuit instance with a non-owning `(graph, cell)` back-reference, so
//! the hierarchy forms no ownership cycle. A `Graph` is a mechanical
//! container; the engine performs validation, event emission and signal
//! propagation on top of it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::cell::Cell;
use crate::types::{CellId, GraphId, PortId, WireId};

/// One end of a wire.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub cell: CellId,
    pub port: PortId,
}

impl Endpoint {
    pub fn new(cell: impl Into<CellId>, port: impl Into<PortId>) -> Endpoint {
        Endpoint {
            cell: cell.into(),
            port: port.into(),
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.cell, self.port)
    }
}

/// A connection from an output port to an input port.
///
/// Width must match both endpoints; a mismatched wire is kept in the graph
/// but flagged and never carries values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Wire {
    pub id: WireId,
    pub from: Endpoint,
    pub to: Endpoint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip)]
    pub warned: bool,
}

/// A single level of the circuit hierarchy.
#[derive(Debug, Default)]
pub struct Graph {
    cells: HashMap<CellId, Cell>,
    wires: HashMap<WireId, Wire>,
    /// Output endpoint → wires it drives.
    fanout: HashMap<Endpoint, Vec<WireId>>,
    /// Input endpoint → the single wire driving it.
    fanin: HashMap<Endpoint, WireId>,
    /// The subcircuit instance this graph implements, if any.
    pub(crate) parent: Option<(GraphId, CellId)>,
    /// Whether per-change signal events are emitted for this graph.
    pub(crate) observed: bool,
    /// Outstanding warnings, including those bubbled up from nested graphs.
    pub(crate) warnings: u32,
}

impl Graph {
    pub fn new() -> Graph {
        Graph::default()
    }

    pub fn parent(&self) -> Option<&(GraphId, CellId)> {
        self.parent.as_ref()
    }

    pub fn is_observed(&self) -> bool {
        self.observed
    }

    pub fn warnings(&self) -> u32 {
        self.warnings
    }

    pub fn cell(&self, id: &str) -> Option<&Cell> {
        self.cells.get(id)
    }

    pub fn cell_mut(&mut self, id: &str) -> Option<&mut Cell> {
        self.cells.get_mut(id)
    }

    pub fn wire(&self, id: &str) -> Option<&Wire> {
        self.wires.get(id)
    }

    pub fn cells(&self) -> impl Iterator<Item = &Cell> {
        self.cells.values()
    }

    pub fn wires(&self) -> impl Iterator<Item = &Wire> {
        self.wires.values()
    }

    pub fn contains_cell(&self, id: &str) -> bool {
        self.cells.contains_key(id)
    }

    pub fn contains_wire(&self, id: &str) -> bool {
        self.wires.contains_key(id)
    }

    /// The wire driving an input endpoint, if any.
    pub fn driver(&self, endpoint: &Endpoint) -> Option<&Wire> {
        self.fanin.get(endpoint).and_then(|id| self.wires.get(id))
    }

    /// The wires driven by an output endpoint.
    pub fn fan_out(&self, endpoint: &Endpoint) -> Vec<&Wire> {
        self.fanout
            .get(endpoint)
            .into_iter()
            .flatten()
            .filter_map(|id| self.wires.get(id))
            .collect()
    }

    /// Inserts a validated cell.
    pub(crate) fn insert_cell(&mut self, cell: Cell) {
        self.cells.insert(cell.id.clone(), cell);
    }

    /// Inserts a validated wire, updating the connectivity indexes.
    pub(crate) fn insert_wire(&mut self, wire: Wire) {
        self.fanout
            .entry(wire.from.clone())
            .or_default()
            .push(wire.id.clone());
        self.fanin.insert(wire.to.clone(), wire.id.clone());
        self.wires.insert(wire.id.clone(), wire);
    }

    pub(crate) fn remove_wire(&mut self, id: &str) -> Option<Wire> {
        let wire = self.wires.remove(id)?;
        if let Some(list) = self.fanout.get_mut(&wire.from) {
            list.retain(|w| w != id);
            if list.is_empty() {
                self.fanout.remove(&wire.from);
            }
        }
        self.fanin.remove(&wire.to);
        Some(wire)
    }

    /// Removes a cell and its incident wires atomically, returning the cell
    /// and the removed wires.
    pub(crate) fn remove_cell(&mut self, id: &str) -> Option<(Cell, Vec<Wire>)> {
        let cell = self.cells.remove(id)?;
        let incident: Vec<WireId> = self
            .wires
            .values()
            .filter(|w| w.from.cell == id || w.to.cell == id)
            .map(|w| w.id.clone())
            .collect();
        let wires = incident
            .iter()
            .filter_map(|w| self.remove_wire(w))
            .collect();
        Some((cell, wires))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellKind;
    use crate::cells::gates::GateParams;

    fn gate(id: &str) -> Cell {
        Cell::new(id, CellKind::And(GateParams { bits: 1 }), 1)
    }

    fn wire(id: &str, from: (&str, &str), to: (&str, &str)) -> Wire {
        Wire {
            id: id.into(),
            from: Endpoint::new(from.0, from.1),
            to: Endpoint::new(to.0, to.1),
            name: None,
            warned: false,
        }
    }

    #[test]
    fn test_connectivity_indexes() {
        let mut g = Graph::new();
        g.insert_cell(gate("a"));
        g.insert_cell(gate("b"));
        g.insert_wire(wire("w1", ("a", "out"), ("b", "in1")));
        g.insert_wire(wire("w2", ("a", "out"), ("b", "in2")));

        let out = Endpoint::new("a", "out");
        assert_eq!(g.fan_out(&out).len(), 2);
        assert_eq!(
            g.driver(&Endpoint::new("b", "in1")).map(|w| w.id.as_str()),
            Some("w1")
        );

        g.remove_wire("w1");
        assert_eq!(g.fan_out(&out).len(), 1);
        assert!(g.driver(&Endpoint::new("b", "in1")).is_none());
    }

    #[test]
    fn test_remove_cell_drops_incident_wires() {
        let mut g = Graph::new();
        g.insert_cell(gate("a"));
        g.insert_cell(gate("b"));
        g.insert_cell(gate("c"));
        g.insert_wire(wire("w1", ("a", "out"), ("b", "in1")));
        g.insert_wire(wire("w2", ("b", "out"), ("c", "in1")));

        let (_, wires) = g.remove_cell("b").unwrap();
        assert_eq!(wires.len(), 2);
        assert!(g.wires().next().is_none());
        assert!(g.fan_out(&Endpoint::new("a", "out")).is_empty());
    }
}
