//! Message-passing worker engine.
//!
//! The worker owns a mirrored [`Simulation`] on a dedicated OS thread and
//! is driven exclusively through its mailbox, so command order is the
//! execution order and both engines are observationally equivalent per
//! settled tick. [`WorkerEngine`] is the controlling handle: every command
//! carries a request id, acknowledgements are routed back to the blocked
//! caller through a pending-request map, and unsolicited replies (updates,
//! monitor hits, alarms, state-change triggers) arrive on a separate
//! receiver.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cell::CellKind;
use crate::engine::{ParamPatch, Simulation};
use crate::error::{SimError, SimResult};
use crate::event::SimEvent;
use crate::graph::Endpoint;
use crate::monitor::MonitorSpec;
use crate::schema::{default_propagation, subcircuit_binding, CircuitDesc, DeviceDesc};
use crate::signal::Signal;
use crate::types::{AlarmId, CellId, GraphId, MonitorId, Tick, WireId};

/// A command sent to the worker. Every command carries the caller's
/// request id, echoed in the acknowledgement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    AddGraph {
        rid: u64,
        #[serde(default)]
        observe: bool,
    },
    AddGate {
        rid: u64,
        graph: GraphId,
        id: CellId,
        device: DeviceDesc,
        /// Definition for `$subcircuit` devices.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subcircuit: Option<CircuitDesc>,
    },
    AddLink {
        rid: u64,
        graph: GraphId,
        id: WireId,
        from: Endpoint,
        to: Endpoint,
    },
    RemoveGate {
        rid: u64,
        graph: GraphId,
        id: CellId,
    },
    RemoveLink {
        rid: u64,
        graph: GraphId,
        id: WireId,
    },
    ChangeParam {
        rid: u64,
        graph: GraphId,
        id: CellId,
        patch: ParamPatch,
    },
    ChangeInput {
        rid: u64,
        graph: GraphId,
        id: CellId,
        value: Signal,
    },
    /// Advance by exactly one tick.
    UpdateGates { rid: u64 },
    /// Advance to the earliest pending tick and stabilize it.
    UpdateGatesNext { rid: u64 },
    /// Run tick by tick, emitting an update per tick.
    Start { rid: u64 },
    /// Run by jumping between pending ticks until stable.
    StartFast { rid: u64 },
    Stop { rid: u64 },
    Ping { rid: u64 },
    ObserveGraph { rid: u64, graph: GraphId },
    UnobserveGraph { rid: u64, graph: GraphId },
    Monitor { rid: u64, spec: MonitorSpec },
    Unmonitor { rid: u64, monitor: MonitorId },
    Alarm {
        rid: u64,
        tick: Tick,
        #[serde(default)]
        stop_on_alarm: bool,
    },
    Unalarm { rid: u64, alarm: AlarmId },
}

/// The payload of a successful acknowledgement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AckValue {
    None,
    Graph { graph: GraphId },
    Tick { tick: Tick },
    Monitor { monitor: MonitorId },
    Alarm { alarm: AlarmId },
}

/// A reply from the worker: either the acknowledgement of one command or
/// an unsolicited notification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum Reply {
    Ack {
        rid: u64,
        value: AckValue,
    },
    Error {
        rid: u64,
        message: String,
    },
    /// Batched engine events after a processed tick or structural change.
    Update {
        tick: Tick,
        has_pending: bool,
        changes: Vec<SimEvent>,
    },
    MonitorValue {
        monitor: MonitorId,
        tick: Tick,
        value: Signal,
    },
    AlarmReached {
        alarm: AlarmId,
        tick: Tick,
    },
    /// An FSM changed state.
    GateTrigger {
        graph: GraphId,
        gate: CellId,
        state: usize,
    },
    /// A memory word changed.
    GateSet {
        graph: GraphId,
        gate: CellId,
        addr: usize,
        value: Signal,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RunMode {
    Step,
    Fast,
}

/// Pace of a periodic (non-fast) run between mailbox polls.
const STEP_INTERVAL: Duration = Duration::from_millis(10);

impl RunMode {
    fn poll_timeout(self) -> Duration {
        match self {
            RunMode::Step => STEP_INTERVAL,
            RunMode::Fast => Duration::ZERO,
        }
    }
}

struct Worker {
    sim: Simulation,
    rx: Receiver<Command>,
    tx: Sender<Reply>,
    running: Option<RunMode>,
}

impl Worker {
    fn run(mut self) {
        loop {
            let cmd = if let Some(mode) = self.running {
                match self.rx.recv_timeout(mode.poll_timeout()) {
                    Ok(c) => Some(c),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => return,
                }
            } else {
                match self.rx.recv() {
                    Ok(c) => Some(c),
                    Err(_) => return,
                }
            };
            let alive = match cmd {
                Some(c) => self.handle(c),
                None => self.pump(),
            };
            if !alive {
                return;
            }
        }
    }

    /// One running-mode iteration: advance, flush, auto-stop when asked to
    /// or when a fast run settles.
    fn pump(&mut self) -> bool {
        let Some(mode) = self.running else {
            return true;
        };
        let had_pending = self.sim.has_pending_events();
        match mode {
            RunMode::Step => {
                self.sim.step();
            }
            RunMode::Fast => {
                self.sim.step_next();
            }
        }
        let stop = self.sim.take_stop_request() || self.sim.has_warnings();
        let stable = !self.sim.has_pending_events();
        // Ticks that merely idled (nothing was scheduled) send no update.
        if !self.flush_events(had_pending) {
            return false;
        }
        if stop || (mode == RunMode::Fast && stable) {
            debug!(tick = %self.sim.tick(), "worker run stopped");
            self.running = None;
        }
        true
    }

    /// Drains the engine's event buffer into replies. Monitor, alarm and
    /// state-change events become dedicated replies; everything else is
    /// batched into one `Update`.
    fn flush_events(&mut self, always_update: bool) -> bool {
        let mut changes = Vec::new();
        for event in self.sim.take_events() {
            let reply = match event {
                SimEvent::MonitorTriggered {
                    monitor,
                    tick,
                    value,
                } => Reply::MonitorValue {
                    monitor,
                    tick,
                    value,
                },
                SimEvent::AlarmReached { alarm, tick } => Reply::AlarmReached { alarm, tick },
                SimEvent::FsmStateChanged { graph, cell, state } => Reply::GateTrigger {
                    graph,
                    gate: cell,
                    state,
                },
                SimEvent::MemoryChanged {
                    graph,
                    cell,
                    addr,
                    value,
                } => Reply::GateSet {
                    graph,
                    gate: cell,
                    addr,
                    value,
                },
                other => {
                    changes.push(other);
                    continue;
                }
            };
            if self.tx.send(reply).is_err() {
                return false;
            }
        }
        if always_update || !changes.is_empty() {
            let update = Reply::Update {
                tick: self.sim.tick(),
                has_pending: self.sim.has_pending_events(),
                changes,
            };
            if self.tx.send(update).is_err() {
                return false;
            }
        }
        true
    }

    fn handle(&mut self, cmd: Command) -> bool {
        let rid = command_rid(&cmd);
        let result = self.dispatch(cmd);
        let reply = match result {
            Ok(value) => Reply::Ack { rid, value },
            Err(err) => Reply::Error {
                rid,
                message: err.to_string(),
            },
        };
        if self.tx.send(reply).is_err() {
            return false;
        }
        self.flush_events(false)
    }

    fn dispatch(&mut self, cmd: Command) -> SimResult<AckValue> {
        match cmd {
            Command::AddGraph { observe, .. } => {
                let graph = self.sim.add_graph();
                if observe {
                    self.sim.observe_graph(graph, true)?;
                }
                Ok(AckValue::Graph { graph })
            }
            Command::AddGate {
                graph,
                id,
                device,
                subcircuit,
                ..
            } => {
                let propagation = device
                    .propagation
                    .unwrap_or_else(|| default_propagation(&device.kind));
                let kind = match &device.kind {
                    CellKind::Subcircuit(sp) => {
                        let desc = subcircuit.as_ref().ok_or_else(|| {
                            SimError::Remote(format!(
                                "subcircuit definition missing for type {:?}",
                                sp.celltype
                            ))
                        })?;
                        let inner = self.sim.add_graph();
                        desc.instantiate(&mut self.sim, inner)
                            .map_err(|e| SimError::Remote(e.to_string()))?;
                        CellKind::Subcircuit(subcircuit_binding(&sp.celltype, inner, desc))
                    }
                    other => other.clone(),
                };
                self.sim
                    .add_cell(graph, id, kind, propagation, device.label.clone())?;
                Ok(AckValue::None)
            }
            Command::AddLink {
                graph,
                id,
                from,
                to,
                ..
            } => {
                self.sim.add_wire(graph, id, from, to, None)?;
                Ok(AckValue::None)
            }
            Command::RemoveGate { graph, id, .. } => {
                self.sim.remove_cell(graph, &id)?;
                Ok(AckValue::None)
            }
            Command::RemoveLink { graph, id, .. } => {
                self.sim.remove_wire(graph, &id)?;
                Ok(AckValue::None)
            }
            Command::ChangeParam {
                graph, id, patch, ..
            } => {
                self.sim.change_param(graph, &id, patch)?;
                Ok(AckValue::None)
            }
            Command::ChangeInput {
                graph, id, value, ..
            } => {
                self.sim.set_input(graph, &id, value)?;
                Ok(AckValue::None)
            }
            Command::UpdateGates { .. } => {
                if self.running.is_some() {
                    return Err(SimError::AlreadyRunning);
                }
                let tick = self.sim.step();
                Ok(AckValue::Tick { tick })
            }
            Command::UpdateGatesNext { .. } => {
                if self.running.is_some() {
                    return Err(SimError::AlreadyRunning);
                }
                let tick = self.sim.step_next();
                Ok(AckValue::Tick { tick })
            }
            Command::Start { .. } => {
                if self.running.is_some() {
                    return Err(SimError::AlreadyRunning);
                }
                self.running = Some(RunMode::Step);
                Ok(AckValue::None)
            }
            Command::StartFast { .. } => {
                if self.running.is_some() {
                    return Err(SimError::AlreadyRunning);
                }
                self.running = Some(RunMode::Fast);
                Ok(AckValue::None)
            }
            Command::Stop { .. } => {
                self.running = None;
                Ok(AckValue::Tick {
                    tick: self.sim.tick(),
                })
            }
            Command::Ping { .. } => Ok(AckValue::Tick {
                tick: self.sim.tick(),
            }),
            Command::ObserveGraph { graph, .. } => {
                self.sim.observe_graph(graph, true)?;
                Ok(AckValue::None)
            }
            Command::UnobserveGraph { graph, .. } => {
                self.sim.observe_graph(graph, false)?;
                Ok(AckValue::None)
            }
            Command::Monitor { spec, .. } => Ok(AckValue::Monitor {
                monitor: self.sim.monitor(spec),
            }),
            Command::Unmonitor { monitor, .. } => {
                self.sim.unmonitor(monitor);
                Ok(AckValue::None)
            }
            Command::Alarm {
                tick,
                stop_on_alarm,
                ..
            } => Ok(AckValue::Alarm {
                alarm: self.sim.alarm(tick, stop_on_alarm),
            }),
            Command::Unalarm { alarm, .. } => {
                self.sim.unalarm(alarm);
                Ok(AckValue::None)
            }
        }
    }
}

fn command_rid(cmd: &Command) -> u64 {
    match cmd {
        Command::AddGraph { rid, .. }
        | Command::AddGate { rid, .. }
        | Command::AddLink { rid, .. }
        | Command::RemoveGate { rid, .. }
        | Command::RemoveLink { rid, .. }
        | Command::ChangeParam { rid, .. }
        | Command::ChangeInput { rid, .. }
        | Command::UpdateGates { rid }
        | Command::UpdateGatesNext { rid }
        | Command::Start { rid }
        | Command::StartFast { rid }
        | Command::Stop { rid }
        | Command::Ping { rid }
        | Command::ObserveGraph { rid, .. }
        | Command::UnobserveGraph { rid, .. }
        | Command::Monitor { rid, .. }
        | Command::Unmonitor { rid, .. }
        | Command::Alarm { rid, .. }
        | Command::Unalarm { rid, .. } => *rid,
    }
}

type PendingMap = Arc<Mutex<HashMap<u64, Sender<Result<AckValue, String>>>>>;

/// Blocking handle to a worker thread.
///
/// Commands are acknowledged synchronously; unsolicited replies are
/// available on [`WorkerEngine::events`]. Dropping the handle shuts the
/// worker down.
pub struct WorkerEngine {
    tx: Option<Sender<Command>>,
    pending: PendingMap,
    events_rx: Receiver<Reply>,
    next_rid: AtomicU64,
    worker: Option<JoinHandle<()>>,
    router: Option<JoinHandle<()>>,
}

impl WorkerEngine {
    /// Spawns the worker thread and its reply router.
    pub fn spawn() -> WorkerEngine {
        let (cmd_tx, cmd_rx) = unbounded::<Command>();
        let (reply_tx, reply_rx) = unbounded::<Reply>();
        let (event_tx, event_rx) = unbounded::<Reply>();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let worker = thread::spawn(move || {
            Worker {
                sim: Simulation::new(),
                rx: cmd_rx,
                tx: reply_tx,
                running: None,
            }
            .run()
        });

        let router_pending = pending.clone();
        let router = thread::spawn(move || {
            while let Ok(reply) = reply_rx.recv() {
                match reply {
                    Reply::Ack { rid, value } => {
                        if let Some(tx) = router_pending.lock().remove(&rid) {
                            let _ = tx.send(Ok(value));
                        }
                    }
                    Reply::Error { rid, message } => {
                        if let Some(tx) = router_pending.lock().remove(&rid) {
                            let _ = tx.send(Err(message));
                        }
                    }
                    other => {
                        // The caller may have dropped the event receiver;
                        // keep routing acknowledgements regardless.
                        let _ = event_tx.send(other);
                    }
                }
            }
        });

        WorkerEngine {
            tx: Some(cmd_tx),
            pending,
            events_rx: event_rx,
            next_rid: AtomicU64::new(0),
            worker: Some(worker),
            router: Some(router),
        }
    }

    /// Receiver of unsolicited replies: updates, monitor values, alarms
    /// and state-change triggers.
    pub fn events(&self) -> &Receiver<Reply> {
        &self.events_rx
    }

    fn request(&self, make: impl FnOnce(u64) -> Command) -> SimResult<AckValue> {
        let rid = self.next_rid.fetch_add(1, Ordering::Relaxed);
        let (ack_tx, ack_rx) = bounded(1);
        self.pending.lock().insert(rid, ack_tx);
        let sender = self.tx.as_ref().ok_or(SimError::WorkerDisconnected)?;
        if sender.send(make(rid)).is_err() {
            self.pending.lock().remove(&rid);
            return Err(SimError::WorkerDisconnected);
        }
        match ack_rx.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => {
                if message == SimError::AlreadyRunning.to_string() {
                    Err(SimError::AlreadyRunning)
                } else {
                    Err(SimError::Remote(message))
                }
            }
            Err(_) => Err(SimError::WorkerDisconnected),
        }
    }

    fn expect_none(value: AckValue) -> SimResult<()> {
        match value {
            AckValue::None => Ok(()),
            other => Err(SimError::Remote(format!("unexpected ack {other:?}"))),
        }
    }

    fn expect_tick(value: AckValue) -> SimResult<Tick> {
        match value {
            AckValue::Tick { tick } => Ok(tick),
            other => Err(SimError::Remote(format!("unexpected ack {other:?}"))),
        }
    }

    pub fn add_graph(&self, observe: bool) -> SimResult<GraphId> {
        match self.request(|rid| Command::AddGraph { rid, observe })? {
            AckValue::Graph { graph } => Ok(graph),
            other => Err(SimError::Remote(format!("unexpected ack {other:?}"))),
        }
    }

    pub fn add_gate(
        &self,
        graph: GraphId,
        id: impl Into<CellId>,
        device: DeviceDesc,
        subcircuit: Option<CircuitDesc>,
    ) -> SimResult<()> {
        let id = id.into();
        self.request(|rid| Command::AddGate {
            rid,
            graph,
            id,
            device,
            subcircuit,
        })
        .and_then(Self::expect_none)
    }

    pub fn add_link(
        &self,
        graph: GraphId,
        id: impl Into<WireId>,
        from: Endpoint,
        to: Endpoint,
    ) -> SimResult<()> {
        let id = id.into();
        self.request(|rid| Command::AddLink {
            rid,
            graph,
            id,
            from,
            to,
        })
        .and_then(Self::expect_none)
    }

    pub fn remove_gate(&self, graph: GraphId, id: impl Into<CellId>) -> SimResult<()> {
        let id = id.into();
        self.request(|rid| Command::RemoveGate { rid, graph, id })
            .and_then(Self::expect_none)
    }

    pub fn remove_link(&self, graph: GraphId, id: impl Into<WireId>) -> SimResult<()> {
        let id = id.into();
        self.request(|rid| Command::RemoveLink { rid, graph, id })
            .and_then(Self::expect_none)
    }

    pub fn change_param(
        &self,
        graph: GraphId,
        id: impl Into<CellId>,
        patch: ParamPatch,
    ) -> SimResult<()> {
        let id = id.into();
        self.request(|rid| Command::ChangeParam {
            rid,
            graph,
            id,
            patch,
        })
        .and_then(Self::expect_none)
    }

    pub fn change_input(
        &self,
        graph: GraphId,
        id: impl Into<CellId>,
        value: Signal,
    ) -> SimResult<()> {
        let id = id.into();
        self.request(|rid| Command::ChangeInput {
            rid,
            graph,
            id,
            value,
        })
        .and_then(Self::expect_none)
    }

    /// Advances by exactly one tick; returns the tick that was processed.
    pub fn update_gates(&self) -> SimResult<Tick> {
        self.request(|rid| Command::UpdateGates { rid })
            .and_then(Self::expect_tick)
    }

    /// Advances to the earliest pending tick; returns the tick that was
    /// processed.
    pub fn update_gates_next(&self) -> SimResult<Tick> {
        self.request(|rid| Command::UpdateGatesNext { rid })
            .and_then(Self::expect_tick)
    }

    pub fn start(&self) -> SimResult<()> {
        self.request(|rid| Command::Start { rid })
            .and_then(Self::expect_none)
    }

    pub fn start_fast(&self) -> SimResult<()> {
        self.request(|rid| Command::StartFast { rid })
            .and_then(Self::expect_none)
    }

    /// Stops a running simulation; returns the current tick. Stopping an
    /// idle worker is a no-op.
    pub fn stop(&self) -> SimResult<Tick> {
        self.request(|rid| Command::Stop { rid })
            .and_then(Self::expect_tick)
    }

    /// Round-trips through the mailbox; returns the worker's current tick.
    pub fn ping(&self) -> SimResult<Tick> {
        self.request(|rid| Command::Ping { rid })
            .and_then(Self::expect_tick)
    }

    pub fn observe_graph(&self, graph: GraphId) -> SimResult<()> {
        self.request(|rid| Command::ObserveGraph { rid, graph })
            .and_then(Self::expect_none)
    }

    pub fn unobserve_graph(&self, graph: GraphId) -> SimResult<()> {
        self.request(|rid| Command::UnobserveGraph { rid, graph })
            .and_then(Self::expect_none)
    }

    pub fn monitor(&self, spec: MonitorSpec) -> SimResult<MonitorId> {
        match self.request(|rid| Command::Monitor { rid, spec })? {
            AckValue::Monitor { monitor } => Ok(monitor),
            other => Err(SimError::Remote(format!("unexpected ack {other:?}"))),
        }
    }

    pub fn unmonitor(&self, monitor: MonitorId) -> SimResult<()> {
        self.request(|rid| Command::Unmonitor { rid, monitor })
            .and_then(Self::expect_none)
    }

    pub fn alarm(&self, tick: Tick, stop_on_alarm: bool) -> SimResult<AlarmId> {
        match self.request(|rid| Command::Alarm {
            rid,
            tick,
            stop_on_alarm,
        })? {
            AckValue::Alarm { alarm } => Ok(alarm),
            other => Err(SimError::Remote(format!("unexpected ack {other:?}"))),
        }
    }

    pub fn unalarm(&self, alarm: AlarmId) -> SimResult<()> {
        self.request(|rid| Command::Unalarm { rid, alarm })
            .and_then(Self::expect_none)
    }

    /// Replays a whole circuit description into the worker, returning the
    /// root graph id. Subcircuit definitions ride along with their
    /// instances.
    pub fn load_circuit(&self, desc: &CircuitDesc) -> SimResult<GraphId> {
        let graph = self.add_graph(false)?;
        for (id, device) in &desc.devices {
            let subcircuit = match &device.kind {
                CellKind::Subcircuit(sp) => {
                    let mut def = desc
                        .subcircuits
                        .get(&sp.celltype)
                        .cloned()
                        .ok_or_else(|| {
                            SimError::Remote(format!(
                                "unknown subcircuit type {:?}",
                                sp.celltype
                            ))
                        })?;
                    // Nested instances may reference sibling definitions.
                    for (name, sub) in &desc.subcircuits {
                        def.subcircuits
                            .entry(name.clone())
                            .or_insert_with(|| sub.clone());
                    }
                    Some(def)
                }
                _ => None,
            };
            self.add_gate(graph, id.clone(), device.clone(), subcircuit)?;
        }
        for (i, conn) in desc.connectors.iter().enumerate() {
            let wire_id = conn.name.clone().unwrap_or_else(|| format!("w{i}"));
            self.add_link(
                graph,
                wire_id,
                Endpoint::new(conn.from.id.clone(), conn.from.port.clone()),
                Endpoint::new(conn.to.id.clone(), conn.to.port.clone()),
            )?;
        }
        Ok(graph)
    }
}

impl Drop for WorkerEngine {
    fn drop(&mut self) {
        // Closing the command channel makes the worker loop exit; the
        // router follows once the reply channel closes.
        self.tx = None;
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.router.take() {
            let _ = handle.join();
        }
    }
}
