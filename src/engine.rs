//! The simulation engine: graph arena, delay-aware scheduler and hierarchy
//! boundary synchronization.
//!
//! # Scheduling model
//!
//! The engine keeps one evaluation queue for all graphs. Entries are keyed
//! by `(graph, cell)` and grouped into per-tick buckets; enqueueing a cell
//! snapshots its current input signals, and a second enqueue of the same
//! cell for the same tick simply overwrites the snapshot, so a cell is
//! evaluated at most once per tick no matter how many of its inputs
//! changed. [`Simulation::step_next`] jumps the clock to the earliest
//! pending tick and drains its bucket until it is empty, including entries
//! added during the drain by zero-delay cells, so combinational chains
//! fully stabilize within one call.
//!
//! # Hierarchy
//!
//! Subcircuit boundaries are synchronous: driving an input port of a
//! subcircuit instance immediately drives the matching Input pseudo-cell
//! of the inner graph, and a change arriving at an inner Output pseudo-cell
//! immediately appears on the instance's output port and fans out in the
//! parent, within the same call. Unchanged values are not forwarded.
//! Input, Output and Subcircuit cells never enter the evaluation queue.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cell::{Cell, CellKind, CellNotification, SignalMap};
use crate::error::{SimError, SimResult};
use crate::event::SimEvent;
use crate::graph::{Endpoint, Graph, Wire};
use crate::monitor::{AlarmSpec, MonitorSpec};
use crate::signal::Signal;
use crate::types::{AlarmId, CellId, GraphId, MonitorId, PortId, Tick, WireId};

/// A closed set of mutable cell parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "param", rename_all = "snake_case")]
pub enum ParamPatch {
    /// Propagation delay in ticks (the half period for clock generators).
    Propagation { value: u32 },
    /// The driven value of a constant cell; width must be unchanged.
    Constant { value: Signal },
    /// One word of a memory.
    MemoryWord { addr: usize, value: Signal },
    /// The whole table of a LUT.
    LutTable { table: Vec<Signal> },
}

enum Forward {
    /// Inner Output cell changed; surface it on the parent instance.
    ToParent(GraphId, CellId),
    /// Subcircuit instance input changed; drive the inner Input cell.
    Inward(GraphId, CellId),
    /// Ordinary evaluable cell; schedule it.
    Schedule,
    None,
}

/// The in-process simulation engine.
pub struct Simulation {
    graphs: HashMap<GraphId, Graph>,
    next_graph: GraphId,
    tick: Tick,
    /// Per-tick buckets of coalesced input snapshots.
    queue: HashMap<u32, HashMap<(GraphId, CellId), SignalMap>>,
    events: Vec<SimEvent>,
    monitors: HashMap<MonitorId, MonitorSpec>,
    next_monitor: MonitorId,
    alarms: HashMap<AlarmId, AlarmSpec>,
    next_alarm: AlarmId,
    stop_requested: bool,
}

impl Default for Simulation {
    fn default() -> Simulation {
        Simulation::new()
    }
}

impl Simulation {
    pub fn new() -> Simulation {
        Simulation {
            graphs: HashMap::new(),
            next_graph: 0,
            tick: Tick::ZERO,
            queue: HashMap::new(),
            events: Vec::new(),
            monitors: HashMap::new(),
            next_monitor: 0,
            alarms: HashMap::new(),
            next_alarm: 0,
            stop_requested: false,
        }
    }

    /// The current simulation time.
    pub fn tick(&self) -> Tick {
        self.tick
    }

    /// True while any evaluation is still queued.
    pub fn has_pending_events(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Drains the buffered event stream.
    pub fn take_events(&mut self) -> Vec<SimEvent> {
        std::mem::take(&mut self.events)
    }

    /// True when a monitor, alarm or warning asked a running simulation to
    /// stop since the flag was last taken.
    pub fn take_stop_request(&mut self) -> bool {
        std::mem::replace(&mut self.stop_requested, false)
    }

    /// True while any warning is outstanding anywhere in the hierarchy.
    /// A simulation with outstanding warnings must not be kept running.
    pub fn has_warnings(&self) -> bool {
        self.graphs
            .values()
            .filter(|g| g.parent.is_none())
            .any(|g| g.warnings > 0)
    }

    // ---- graphs ----------------------------------------------------------

    /// Adds an empty graph to the arena and returns its id.
    pub fn add_graph(&mut self) -> GraphId {
        let id = self.next_graph;
        self.next_graph += 1;
        self.graphs.insert(id, Graph::new());
        id
    }

    pub fn graph(&self, gid: GraphId) -> SimResult<&Graph> {
        self.graphs.get(&gid).ok_or(SimError::UnknownGraph(gid))
    }

    /// Enables or disables per-change signal events for a graph.
    pub fn observe_graph(&mut self, gid: GraphId, observed: bool) -> SimResult<()> {
        let graph = self
            .graphs
            .get_mut(&gid)
            .ok_or(SimError::UnknownGraph(gid))?;
        graph.observed = observed;
        Ok(())
    }

    // ---- structure -------------------------------------------------------

    /// Places a cell. Evaluable cells are scheduled once so sources
    /// (constants, clocks) start driving and combinational cells settle
    /// against their seeded inputs.
    pub fn add_cell(
        &mut self,
        gid: GraphId,
        id: impl Into<CellId>,
        kind: CellKind,
        propagation: u32,
        label: Option<String>,
    ) -> SimResult<()> {
        let id = id.into();
        let graph = self.graphs.get(&gid).ok_or(SimError::UnknownGraph(gid))?;
        if graph.contains_cell(&id) {
            return Err(SimError::DuplicateCell { graph: gid, cell: id });
        }
        let mut cell = Cell::new(id.clone(), kind, propagation);
        cell.label = label;

        // Bind an inner graph to its new instance before insertion.
        let mut boundary_outputs = Vec::new();
        if let CellKind::Subcircuit(sp) = &cell.kind {
            let inner = sp.graph;
            let inner_graph = self
                .graphs
                .get_mut(&inner)
                .ok_or(SimError::UnknownGraph(inner))?;
            inner_graph.parent = Some((gid, id.clone()));
            for (port, inner_cell) in &sp.iomap {
                if let Some(c) = inner_graph.cell(inner_cell) {
                    if let CellKind::Output(_) = c.kind {
                        if let Some(v) = c.input_signals.get("in") {
                            boundary_outputs.push((port.clone(), v.clone()));
                        }
                    }
                }
            }
        }

        let evaluable = cell.kind.is_evaluable();
        if let Some(graph) = self.graphs.get_mut(&gid) {
            graph.insert_cell(cell);
        }
        self.events.push(SimEvent::CellAdded {
            graph: gid,
            cell: id.clone(),
        });
        debug!(graph = gid, cell = %id, "cell added");
        // Pull the inner graph's current boundary values onto the instance.
        for (port, value) in boundary_outputs {
            self.set_output_value(gid, id.clone(), port, value);
        }
        if evaluable {
            self.enqueue(gid, id);
        }
        Ok(())
    }

    /// Removes a cell and its incident wires atomically. Subcircuit
    /// instances take their whole inner graph tree with them.
    pub fn remove_cell(&mut self, gid: GraphId, cid: &str) -> SimResult<()> {
        let graph = self
            .graphs
            .get_mut(&gid)
            .ok_or(SimError::UnknownGraph(gid))?;
        let (cell, wires) = graph.remove_cell(cid).ok_or_else(|| SimError::UnknownCell {
            graph: gid,
            cell: cid.to_string(),
        })?;
        let warned = wires.iter().filter(|w| w.warned).count();
        for w in &wires {
            self.events.push(SimEvent::WireRemoved {
                graph: gid,
                wire: w.id.clone(),
            });
        }
        for _ in 0..warned {
            self.clear_warning(gid);
        }
        for bucket in self.queue.values_mut() {
            bucket.remove(&(gid, cid.to_string()));
        }
        self.queue.retain(|_, b| !b.is_empty());
        if let CellKind::Subcircuit(sp) = &cell.kind {
            // The inner graph's counter aggregates every warning raised in
            // the subtree; those bubbled onto this graph and its ancestors
            // and leave with the subtree.
            let nested_warnings = self
                .graphs
                .get(&sp.graph)
                .map(|g| g.warnings)
                .unwrap_or(0);
            self.remove_graph_tree(sp.graph);
            for _ in 0..nested_warnings {
                self.clear_warning(gid);
            }
        }
        self.events.push(SimEvent::CellRemoved {
            graph: gid,
            cell: cid.to_string(),
        });
        Ok(())
    }

    fn remove_graph_tree(&mut self, gid: GraphId) {
        let Some(graph) = self.graphs.remove(&gid) else {
            return;
        };
        let nested: Vec<GraphId> = graph
            .cells()
            .filter_map(|c| match &c.kind {
                CellKind::Subcircuit(sp) => Some(sp.graph),
                _ => None,
            })
            .collect();
        for bucket in self.queue.values_mut() {
            bucket.retain(|(g, _), _| *g != gid);
        }
        self.queue.retain(|_, b| !b.is_empty());
        for inner in nested {
            self.remove_graph_tree(inner);
        }
    }

    /// Connects an output port to an input port.
    ///
    /// A width mismatch is not an error: the wire is placed but flagged,
    /// never carries values, and raises a warning that bubbles to the root
    /// and keeps the simulation from running until the wire is removed.
    pub fn add_wire(
        &mut self,
        gid: GraphId,
        id: impl Into<WireId>,
        from: Endpoint,
        to: Endpoint,
        name: Option<String>,
    ) -> SimResult<()> {
        let id = id.into();
        let graph = self.graphs.get(&gid).ok_or(SimError::UnknownGraph(gid))?;
        if graph.contains_wire(&id) {
            return Err(SimError::DuplicateWire { graph: gid, wire: id });
        }
        let from_port = Self::endpoint_port(graph, gid, &from)?;
        let to_port = Self::endpoint_port(graph, gid, &to)?;
        if from_port.dir != crate::cell::PortDir::Output {
            return Err(SimError::WrongPortDirection {
                graph: gid,
                cell: from.cell,
                port: from.port,
            });
        }
        if to_port.dir != crate::cell::PortDir::Input {
            return Err(SimError::WrongPortDirection {
                graph: gid,
                cell: to.cell,
                port: to.port,
            });
        }
        if graph.driver(&to).is_some() {
            return Err(SimError::PortAlreadyDriven {
                graph: gid,
                cell: to.cell,
                port: to.port,
            });
        }

        let mismatched = from_port.bits != to_port.bits;
        let wire = Wire {
            id: id.clone(),
            from: from.clone(),
            to: to.clone(),
            name,
            warned: mismatched,
        };
        if let Some(graph) = self.graphs.get_mut(&gid) {
            graph.insert_wire(wire);
        }
        self.events.push(SimEvent::WireAdded {
            graph: gid,
            wire: id.clone(),
        });

        if mismatched {
            self.raise_warning(
                gid,
                format!(
                    "wire {id:?} connects {from} ({} bits) to {to} ({} bits)",
                    from_port.bits, to_port.bits
                ),
            );
            return Ok(());
        }

        // Propagate the source's current value through the new wire.
        let value = self
            .graphs
            .get(&gid)
            .and_then(|g| g.cell(&from.cell))
            .and_then(|c| c.output_signals.get(&from.port))
            .cloned();
        if let Some(value) = value {
            self.set_cell_input(gid, to.cell, to.port, value);
        }
        Ok(())
    }

    pub fn remove_wire(&mut self, gid: GraphId, wid: &str) -> SimResult<()> {
        let graph = self
            .graphs
            .get_mut(&gid)
            .ok_or(SimError::UnknownGraph(gid))?;
        let wire = graph.remove_wire(wid).ok_or_else(|| SimError::UnknownWire {
            graph: gid,
            wire: wid.to_string(),
        })?;
        if wire.warned {
            self.clear_warning(gid);
        }
        self.events.push(SimEvent::WireRemoved {
            graph: gid,
            wire: wid.to_string(),
        });
        Ok(())
    }

    fn endpoint_port(
        graph: &Graph,
        gid: GraphId,
        ep: &Endpoint,
    ) -> SimResult<crate::cell::Port> {
        let cell = graph.cell(&ep.cell).ok_or_else(|| SimError::UnknownCell {
            graph: gid,
            cell: ep.cell.clone(),
        })?;
        cell.port(&ep.port).ok_or_else(|| SimError::UnknownPort {
            graph: gid,
            cell: ep.cell.clone(),
            port: ep.port.clone(),
        })
    }

    // ---- signals ---------------------------------------------------------

    /// Drives an Input pseudo-cell.
    pub fn set_input(&mut self, gid: GraphId, cid: &str, value: Signal) -> SimResult<()> {
        let graph = self.graphs.get(&gid).ok_or(SimError::UnknownGraph(gid))?;
        let cell = graph.cell(cid).ok_or_else(|| SimError::UnknownCell {
            graph: gid,
            cell: cid.to_string(),
        })?;
        let CellKind::Input(p) = &cell.kind else {
            return Err(SimError::NotAnInput {
                graph: gid,
                cell: cid.to_string(),
            });
        };
        if value.width() != p.bits {
            return Err(SimError::WidthMismatch {
                want: p.bits,
                got: value.width(),
            });
        }
        self.set_output_value(gid, cid.to_string(), "out".into(), value);
        Ok(())
    }

    /// Reads an Output pseudo-cell.
    pub fn get_output(&self, gid: GraphId, cid: &str) -> SimResult<Signal> {
        let graph = self.graphs.get(&gid).ok_or(SimError::UnknownGraph(gid))?;
        let cell = graph.cell(cid).ok_or_else(|| SimError::UnknownCell {
            graph: gid,
            cell: cid.to_string(),
        })?;
        let CellKind::Output(_) = &cell.kind else {
            return Err(SimError::NotAnOutput {
                graph: gid,
                cell: cid.to_string(),
            });
        };
        cell.input_signals
            .get("in")
            .cloned()
            .ok_or_else(|| SimError::UnknownPort {
                graph: gid,
                cell: cid.to_string(),
                port: "in".into(),
            })
    }

    /// The current value of any output port.
    pub fn output_signal(&self, gid: GraphId, cid: &str, port: &str) -> SimResult<Signal> {
        let graph = self.graphs.get(&gid).ok_or(SimError::UnknownGraph(gid))?;
        let cell = graph.cell(cid).ok_or_else(|| SimError::UnknownCell {
            graph: gid,
            cell: cid.to_string(),
        })?;
        cell.output_signals
            .get(port)
            .cloned()
            .ok_or_else(|| SimError::UnknownPort {
                graph: gid,
                cell: cid.to_string(),
                port: port.to_string(),
            })
    }

    /// The current value of any input port.
    pub fn input_signal(&self, gid: GraphId, cid: &str, port: &str) -> SimResult<Signal> {
        let graph = self.graphs.get(&gid).ok_or(SimError::UnknownGraph(gid))?;
        let cell = graph.cell(cid).ok_or_else(|| SimError::UnknownCell {
            graph: gid,
            cell: cid.to_string(),
        })?;
        cell.input_signals
            .get(port)
            .cloned()
            .ok_or_else(|| SimError::UnknownPort {
                graph: gid,
                cell: cid.to_string(),
                port: port.to_string(),
            })
    }

    /// Applies a parameter patch and reschedules the cell.
    pub fn change_param(&mut self, gid: GraphId, cid: &str, patch: ParamPatch) -> SimResult<()> {
        let mut memory_change = None;
        {
            let graph = self
                .graphs
                .get_mut(&gid)
                .ok_or(SimError::UnknownGraph(gid))?;
            let cell = graph.cell_mut(cid).ok_or_else(|| SimError::UnknownCell {
                graph: gid,
                cell: cid.to_string(),
            })?;
            let invalid = || SimError::InvalidParam {
                graph: gid,
                cell: cid.to_string(),
            };
            match patch {
                ParamPatch::Propagation { value } => cell.propagation = value,
                ParamPatch::Constant { value } => {
                    let CellKind::Constant(p) = &mut cell.kind else {
                        return Err(invalid());
                    };
                    if value.width() != p.constant.width() {
                        return Err(SimError::WidthMismatch {
                            want: p.constant.width(),
                            got: value.width(),
                        });
                    }
                    p.constant = value;
                }
                ParamPatch::MemoryWord { addr, value } => {
                    let CellKind::Memory(p) = &mut cell.kind else {
                        return Err(invalid());
                    };
                    if addr >= p.word_count() {
                        return Err(invalid());
                    }
                    if value.width() != p.bits {
                        return Err(SimError::WidthMismatch {
                            want: p.bits,
                            got: value.width(),
                        });
                    }
                    p.prepare();
                    p.memdata[addr] = value.clone();
                    memory_change = Some((addr, value));
                }
                ParamPatch::LutTable { table } => {
                    let CellKind::Lut(p) = &mut cell.kind else {
                        return Err(invalid());
                    };
                    p.table = table;
                }
            }
            cell.kind.prepare();
        }
        self.events.push(SimEvent::ParamChanged {
            graph: gid,
            cell: cid.to_string(),
        });
        if let Some((addr, value)) = memory_change {
            self.events.push(SimEvent::MemoryChanged {
                graph: gid,
                cell: cid.to_string(),
                addr,
                value,
            });
        }
        self.enqueue(gid, cid.to_string());
        Ok(())
    }

    // ---- monitors & alarms ----------------------------------------------

    /// Registers a monitor and returns its id.
    pub fn monitor(&mut self, spec: MonitorSpec) -> MonitorId {
        let id = self.next_monitor;
        self.next_monitor += 1;
        self.monitors.insert(id, spec);
        id
    }

    /// Deregisters a monitor; a stale id is a silent no-op.
    pub fn unmonitor(&mut self, id: MonitorId) {
        self.monitors.remove(&id);
    }

    /// Registers an alarm for a future tick and returns its id.
    pub fn alarm(&mut self, tick: Tick, stop_on_alarm: bool) -> AlarmId {
        let id = self.next_alarm;
        self.next_alarm += 1;
        self.alarms.insert(id, AlarmSpec {
            tick,
            stop_on_alarm,
        });
        id
    }

    /// Deregisters an alarm; a stale id is a silent no-op.
    pub fn unalarm(&mut self, id: AlarmId) {
        self.alarms.remove(&id);
    }

    fn check_monitors(&mut self, gid: GraphId, cid: &str, port: &str, value: &Signal) {
        if self.monitors.is_empty() {
            return;
        }
        let hits: Vec<(MonitorId, bool, bool)> = self
            .monitors
            .iter()
            .filter(|(_, m)| m.graph == gid && m.cell == cid && m.port == port && m.matches(value))
            .map(|(id, m)| (*id, m.one_shot, m.stop_on_trigger))
            .collect();
        for (id, one_shot, stop) in hits {
            self.events.push(SimEvent::MonitorTriggered {
                monitor: id,
                tick: self.tick,
                value: value.clone(),
            });
            if one_shot {
                self.monitors.remove(&id);
            }
            if stop {
                self.stop_requested = true;
            }
        }
    }

    /// Fires every alarm in the inclusive wrapped interval `[old, target]`.
    /// Alarms inside a jumped-over interval fire even though no bucket
    /// existed at their tick.
    fn fire_alarms(&mut self, old: Tick, target: Tick) {
        if self.alarms.is_empty() {
            return;
        }
        let span = target.distance_from(old);
        let due: Vec<AlarmId> = self
            .alarms
            .iter()
            .filter(|(_, a)| a.tick.distance_from(old) <= span)
            .map(|(id, _)| *id)
            .collect();
        for id in due {
            if let Some(alarm) = self.alarms.remove(&id) {
                self.events.push(SimEvent::AlarmReached {
                    alarm: id,
                    tick: alarm.tick,
                });
                if alarm.stop_on_alarm {
                    self.stop_requested = true;
                }
            }
        }
    }

    // ---- warnings --------------------------------------------------------

    fn raise_warning(&mut self, gid: GraphId, message: String) {
        warn!(graph = gid, message = %message, "circuit warning");
        self.events.push(SimEvent::Warning {
            graph: gid,
            message,
        });
        self.stop_requested = true;
        let mut next = Some(gid);
        while let Some(id) = next {
            let Some(graph) = self.graphs.get_mut(&id) else {
                break;
            };
            graph.warnings += 1;
            next = graph.parent.as_ref().map(|(p, _)| *p);
        }
    }

    fn clear_warning(&mut self, gid: GraphId) {
        let mut next = Some(gid);
        while let Some(id) = next {
            let Some(graph) = self.graphs.get_mut(&id) else {
                break;
            };
            graph.warnings = graph.warnings.saturating_sub(1);
            next = graph.parent.as_ref().map(|(p, _)| *p);
        }
    }

    // ---- scheduling ------------------------------------------------------

    /// Snapshots a cell's inputs into the bucket `propagation` ticks ahead,
    /// replacing any snapshot already queued there for the same cell.
    fn enqueue(&mut self, gid: GraphId, cid: CellId) {
        let Some(graph) = self.graphs.get(&gid) else {
            return;
        };
        let Some(cell) = graph.cell(&cid) else {
            return;
        };
        if !cell.kind.is_evaluable() {
            return;
        }
        let at = self.tick.offset(cell.propagation);
        let snapshot = cell.input_signals.clone();
        self.queue
            .entry(at.0)
            .or_default()
            .insert((gid, cid), snapshot);
    }

    /// Like `enqueue` but at least one tick ahead; used for self-requested
    /// re-evaluation so a zero-delay clock cannot spin the drain loop.
    fn enqueue_reschedule(&mut self, gid: GraphId, cid: CellId) {
        let Some(graph) = self.graphs.get(&gid) else {
            return;
        };
        let Some(cell) = graph.cell(&cid) else {
            return;
        };
        let at = self.tick.offset(cell.propagation.max(1));
        let snapshot = cell.input_signals.clone();
        self.queue
            .entry(at.0)
            .or_default()
            .insert((gid, cid), snapshot);
    }

    fn earliest_pending(&self) -> Option<Tick> {
        self.queue
            .keys()
            .map(|k| Tick(*k))
            .min_by_key(|t| t.distance_from(self.tick))
    }

    /// Advances directly to the earliest pending tick, fully stabilizes it
    /// and leaves the clock one past it. With an empty queue this degrades
    /// to a single idle tick. Returns the tick that was processed.
    pub fn step_next(&mut self) -> Tick {
        let old = self.tick;
        let target = self.earliest_pending().unwrap_or(old);
        self.fire_alarms(old, target);
        self.tick = target;
        self.drain_bucket(target);
        self.tick = target.next();
        target
    }

    /// Advances by exactly one tick, draining the current bucket if one is
    /// due. Returns the tick that was processed.
    pub fn step(&mut self) -> Tick {
        let old = self.tick;
        self.fire_alarms(old, old);
        self.drain_bucket(old);
        self.tick = old.next();
        old
    }

    /// Runs `step_next` until the queue settles, a stop is requested, or
    /// the step budget runs out. Returns true when the queue is empty.
    pub fn run_until_stable(&mut self, budget: u32) -> bool {
        for _ in 0..budget {
            if !self.has_pending_events() || self.stop_requested {
                break;
            }
            self.step_next();
        }
        !self.has_pending_events()
    }

    fn drain_bucket(&mut self, at: Tick) {
        loop {
            let entry = match self.queue.get_mut(&at.0) {
                None => return,
                Some(bucket) => {
                    let key = bucket.keys().next().cloned();
                    match key {
                        None => None,
                        Some(key) => bucket.remove_entry(&key),
                    }
                }
            };
            match entry {
                None => {
                    self.queue.remove(&at.0);
                    return;
                }
                Some(((gid, cid), snapshot)) => self.evaluate_cell(gid, cid, snapshot),
            }
        }
    }

    fn evaluate_cell(&mut self, gid: GraphId, cid: CellId, snapshot: SignalMap) {
        let (outputs, reschedule, notifications) = {
            let Some(graph) = self.graphs.get_mut(&gid) else {
                return;
            };
            let Some(cell) = graph.cell_mut(&cid) else {
                return;
            };
            let result = cell.kind.evaluate(&snapshot);
            (result.outputs, result.reschedule, result.notifications)
        };
        // Self-rescheduling happens before outputs land, so input-driven
        // coalescing can still override the snapshot.
        if reschedule {
            self.enqueue_reschedule(gid, cid.clone());
        }
        for note in notifications {
            let event = match note {
                CellNotification::MemoryWrite { addr, value, .. } => SimEvent::MemoryChanged {
                    graph: gid,
                    cell: cid.clone(),
                    addr,
                    value,
                },
                CellNotification::FsmState { state } => SimEvent::FsmStateChanged {
                    graph: gid,
                    cell: cid.clone(),
                    state,
                },
            };
            self.events.push(event);
        }
        for (port, value) in outputs {
            self.set_output_value(gid, cid.clone(), port, value);
        }
    }

    // ---- propagation core ------------------------------------------------

    /// Stores a new output value and fans it out; unchanged values are
    /// dropped here, which is what keeps boundary forwarding echo-free.
    fn set_output_value(&mut self, gid: GraphId, cid: CellId, port: PortId, value: Signal) {
        let (observed, targets) = {
            let Some(graph) = self.graphs.get_mut(&gid) else {
                return;
            };
            let observed = graph.observed;
            let Some(cell) = graph.cell_mut(&cid) else {
                return;
            };
            if cell.output_signals.get(&port) == Some(&value) {
                return;
            }
            cell.output_signals.insert(port.clone(), value.clone());
            let ep = Endpoint::new(cid.clone(), port.clone());
            let targets: Vec<Endpoint> = graph
                .fan_out(&ep)
                .into_iter()
                .filter(|w| !w.warned)
                .map(|w| w.to.clone())
                .collect();
            (observed, targets)
        };
        if observed {
            self.events.push(SimEvent::OutputSignalsChanged {
                graph: gid,
                cell: cid.clone(),
                port: port.clone(),
                value: value.clone(),
            });
        }
        self.check_monitors(gid, &cid, &port, &value);
        for target in targets {
            self.set_cell_input(gid, target.cell, target.port, value.clone());
        }
    }

    /// Stores a new input value and reacts per cell kind: evaluable cells
    /// get scheduled, boundary pseudo-cells forward synchronously.
    fn set_cell_input(&mut self, gid: GraphId, cid: CellId, port: PortId, value: Signal) {
        let (observed, forward) = {
            let Some(graph) = self.graphs.get_mut(&gid) else {
                return;
            };
            let observed = graph.observed;
            let parent = graph.parent.clone();
            let Some(cell) = graph.cell_mut(&cid) else {
                return;
            };
            if cell.input_signals.get(&port) == Some(&value) {
                return;
            }
            cell.input_signals.insert(port.clone(), value.clone());
            let forward = match &cell.kind {
                CellKind::Output(_) => match parent {
                    Some((pg, pc)) => Forward::ToParent(pg, pc),
                    None => Forward::None,
                },
                CellKind::Subcircuit(sp) => match sp.iomap.get(&port) {
                    Some(inner_cell) => Forward::Inward(sp.graph, inner_cell.clone()),
                    None => Forward::None,
                },
                CellKind::Input(_) => Forward::None,
                _ => Forward::Schedule,
            };
            (observed, forward)
        };
        if observed {
            self.events.push(SimEvent::InputSignalsChanged {
                graph: gid,
                cell: cid.clone(),
                port: port.clone(),
                value: value.clone(),
            });
        }
        self.check_monitors(gid, &cid, &port, &value);
        match forward {
            Forward::ToParent(pgid, pcid) => self.forward_to_parent(pgid, pcid, cid, value),
            Forward::Inward(inner_gid, inner_cid) => {
                self.set_output_value(inner_gid, inner_cid, "out".into(), value)
            }
            Forward::Schedule => self.enqueue(gid, cid),
            Forward::None => {}
        }
    }

    /// An inner Output pseudo-cell changed; surface the value on the
    /// matching output port of the parent's subcircuit instance.
    fn forward_to_parent(
        &mut self,
        pgid: GraphId,
        pcid: CellId,
        inner_output: CellId,
        value: Signal,
    ) {
        let port = {
            let Some(graph) = self.graphs.get(&pgid) else {
                return;
            };
            let Some(cell) = graph.cell(&pcid) else {
                return;
            };
            let CellKind::Subcircuit(sp) = &cell.kind else {
                return;
            };
            match sp.reverse_iomap.get(&inner_output) {
                Some(port) => port.clone(),
                None => return,
            }
        };
        self.set_output_value(pgid, pcid, port, value);
    }
}
