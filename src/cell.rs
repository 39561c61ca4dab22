//! Cell data model and evaluation contract.
//!
//! A [`Cell`] is a placed circuit element: an id, a [`CellKind`] carrying the
//! kind-specific parameters and state, a propagation delay in ticks, and the
//! current signal value of every declared port. The engine keeps the
//! invariant that each declared port always has a signal entry at its
//! declared width.
//!
//! [`CellKind`] is a closed sum over the whole cell catalog. Its serde
//! representation is tagged with the schema device type (`"$and"`, `"$dff"`,
//! ...), so the same type backs both the runtime model and the circuit
//! description format. Transient run state inside the kinds is `serde(skip)`
//! and rebuilt by [`CellKind::prepare`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::cells::arith::{ArithOp, ArithParams, CompareOp, CompareParams};
use crate::cells::arith::{ShiftDir, ShiftParams, UnaryArithOp, UnaryArithParams};
use crate::cells::bus::{BusGroupParams, BusSliceParams, BusUngroupParams, ExtendParams};
use crate::cells::dff::DffParams;
use crate::cells::fsm::FsmParams;
use crate::cells::gates::{BinaryOp, GateParams};
use crate::cells::memory::MemoryParams;
use crate::cells::misc::{ClockParams, ConstantParams, LutParams};
use crate::cells::mux::MuxParams;
use crate::cells::{arith, bus, gates, misc, mux};
use crate::signal::Signal;
use crate::types::{CellId, GraphId, PortId};

/// Port direction, from the cell's point of view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortDir {
    Input,
    Output,
}

/// A declared port of a cell.
///
/// The optional `tag` is documentation-only markup (clock/polarity hints for
/// front ends); the engine never interprets it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub id: PortId,
    pub dir: PortDir,
    pub bits: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl Port {
    pub fn input(id: impl Into<PortId>, bits: usize) -> Port {
        Port {
            id: id.into(),
            dir: PortDir::Input,
            bits,
            tag: None,
        }
    }

    pub fn output(id: impl Into<PortId>, bits: usize) -> Port {
        Port {
            id: id.into(),
            dir: PortDir::Output,
            bits,
            tag: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Port {
        self.tag = Some(tag.into());
        self
    }
}

/// Port-id keyed signal map, the currency of cell evaluation.
pub type SignalMap = HashMap<PortId, Signal>;

/// Reads a port signal out of a snapshot, falling back to all-undefined at
/// the given width when absent.
pub fn port_signal(map: &SignalMap, port: &str, bits: usize) -> Signal {
    map.get(port)
        .cloned()
        .unwrap_or_else(|| Signal::undefined(bits))
}

/// A state mutation that outer layers must observe.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CellNotification {
    /// A memory word changed, through a write port.
    MemoryWrite {
        port: usize,
        addr: usize,
        value: Signal,
    },
    /// An FSM moved to a new state.
    FsmState { state: usize },
}

/// The result of one cell evaluation.
#[derive(Clone, Debug, Default)]
pub struct EvalOutput {
    /// New values for (a subset of) the output ports.
    pub outputs: SignalMap,
    /// When set, the cell asks to be evaluated again after its own
    /// propagation delay (used by clock generators).
    pub reschedule: bool,
    /// State mutations to surface as events.
    pub notifications: Vec<CellNotification>,
}

impl EvalOutput {
    /// An evaluation result with a single output port.
    pub fn single(port: impl Into<PortId>, value: Signal) -> EvalOutput {
        let mut outputs = SignalMap::new();
        outputs.insert(port.into(), value);
        EvalOutput {
            outputs,
            ..EvalOutput::default()
        }
    }

    /// An evaluation result with no outputs.
    pub fn empty() -> EvalOutput {
        EvalOutput::default()
    }

    pub fn with_reschedule(mut self) -> EvalOutput {
        self.reschedule = true;
        self
    }
}

/// Parameters of the input/output pseudo-cells.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IoParams {
    pub bits: usize,
    /// Optional net label; overrides the device id as the subcircuit port
    /// name when the circuit is used as a subcircuit definition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net: Option<String>,
}

/// Parameters and runtime wiring of a subcircuit instance.
///
/// Only `celltype` is part of the interchange schema; the graph binding and
/// the port↔boundary-cell map are filled in when the instance is built.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SubcircuitParams {
    pub celltype: String,
    #[serde(skip)]
    pub graph: GraphId,
    /// External port id → boundary Input/Output cell id in the inner graph.
    #[serde(skip)]
    pub iomap: HashMap<PortId, CellId>,
    #[serde(skip)]
    pub ports: Vec<Port>,
    /// Reverse of `iomap`, rebuilt by `prepare`.
    #[serde(skip)]
    pub reverse_iomap: HashMap<CellId, PortId>,
}

/// The closed cell catalog.
///
/// Each variant holds its parameter struct from the `cells` module tree; the
/// serde tag doubles as the schema device type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CellKind {
    #[serde(rename = "$input")]
    Input(IoParams),
    #[serde(rename = "$output")]
    Output(IoParams),
    #[serde(rename = "$subcircuit")]
    Subcircuit(SubcircuitParams),

    #[serde(rename = "$not")]
    Not(GateParams),
    #[serde(rename = "$repeater")]
    Repeater(GateParams),
    #[serde(rename = "$and")]
    And(GateParams),
    #[serde(rename = "$or")]
    Or(GateParams),
    #[serde(rename = "$xor")]
    Xor(GateParams),
    #[serde(rename = "$nand")]
    Nand(GateParams),
    #[serde(rename = "$nor")]
    Nor(GateParams),
    #[serde(rename = "$xnor")]
    Xnor(GateParams),

    #[serde(rename = "$reduce_and")]
    ReduceAnd(GateParams),
    #[serde(rename = "$reduce_or")]
    ReduceOr(GateParams),
    #[serde(rename = "$reduce_xor")]
    ReduceXor(GateParams),
    #[serde(rename = "$reduce_nand")]
    ReduceNand(GateParams),
    #[serde(rename = "$reduce_nor")]
    ReduceNor(GateParams),
    #[serde(rename = "$reduce_xnor")]
    ReduceXnor(GateParams),

    #[serde(rename = "$neg")]
    Neg(UnaryArithParams),
    #[serde(rename = "$pos")]
    Pos(UnaryArithParams),
    #[serde(rename = "$add")]
    Add(ArithParams),
    #[serde(rename = "$sub")]
    Sub(ArithParams),
    #[serde(rename = "$mul")]
    Mul(ArithParams),
    #[serde(rename = "$div")]
    Div(ArithParams),
    #[serde(rename = "$mod")]
    Mod(ArithParams),
    #[serde(rename = "$pow")]
    Pow(ArithParams),

    #[serde(rename = "$lt")]
    Lt(CompareParams),
    #[serde(rename = "$le")]
    Le(CompareParams),
    #[serde(rename = "$eq")]
    Eq(CompareParams),
    #[serde(rename = "$ne")]
    Ne(CompareParams),
    #[serde(rename = "$ge")]
    Ge(CompareParams),
    #[serde(rename = "$gt")]
    Gt(CompareParams),

    #[serde(rename = "$shl")]
    ShiftLeft(ShiftParams),
    #[serde(rename = "$shr")]
    ShiftRight(ShiftParams),

    #[serde(rename = "$mux")]
    Mux(MuxParams),
    #[serde(rename = "$mux1hot")]
    Mux1Hot(MuxParams),

    #[serde(rename = "$busslice")]
    BusSlice(BusSliceParams),
    #[serde(rename = "$busgroup")]
    BusGroup(BusGroupParams),
    #[serde(rename = "$busungroup")]
    BusUngroup(BusUngroupParams),
    #[serde(rename = "$zeroextend")]
    ZeroExtend(ExtendParams),
    #[serde(rename = "$signextend")]
    SignExtend(ExtendParams),

    #[serde(rename = "$constant")]
    Constant(ConstantParams),
    #[serde(rename = "$dff")]
    Dff(DffParams),
    #[serde(rename = "$mem")]
    Memory(MemoryParams),
    #[serde(rename = "$fsm")]
    Fsm(FsmParams),
    #[serde(rename = "$clock")]
    Clock(ClockParams),
    #[serde(rename = "$lut")]
    Lut(LutParams),
}

impl CellKind {
    /// The schema device type tag of this kind.
    pub fn type_name(&self) -> &'static str {
        match self {
            CellKind::Input(_) => "$input",
            CellKind::Output(_) => "$output",
            CellKind::Subcircuit(_) => "$subcircuit",
            CellKind::Not(_) => "$not",
            CellKind::Repeater(_) => "$repeater",
            CellKind::And(_) => "$and",
            CellKind::Or(_) => "$or",
            CellKind::Xor(_) => "$xor",
            CellKind::Nand(_) => "$nand",
            CellKind::Nor(_) => "$nor",
            CellKind::Xnor(_) => "$xnor",
            CellKind::ReduceAnd(_) => "$reduce_and",
            CellKind::ReduceOr(_) => "$reduce_or",
            CellKind::ReduceXor(_) => "$reduce_xor",
            CellKind::ReduceNand(_) => "$reduce_nand",
            CellKind::ReduceNor(_) => "$reduce_nor",
            CellKind::ReduceXnor(_) => "$reduce_xnor",
            CellKind::Neg(_) => "$neg",
            CellKind::Pos(_) => "$pos",
            CellKind::Add(_) => "$add",
            CellKind::Sub(_) => "$sub",
            CellKind::Mul(_) => "$mul",
            CellKind::Div(_) => "$div",
            CellKind::Mod(_) => "$mod",
            CellKind::Pow(_) => "$pow",
            CellKind::Lt(_) => "$lt",
            CellKind::Le(_) => "$le",
            CellKind::Eq(_) => "$eq",
            CellKind::Ne(_) => "$ne",
            CellKind::Ge(_) => "$ge",
            CellKind::Gt(_) => "$gt",
            CellKind::ShiftLeft(_) => "$shl",
            CellKind::ShiftRight(_) => "$shr",
            CellKind::Mux(_) => "$mux",
            CellKind::Mux1Hot(_) => "$mux1hot",
            CellKind::BusSlice(_) => "$busslice",
            CellKind::BusGroup(_) => "$busgroup",
            CellKind::BusUngroup(_) => "$busungroup",
            CellKind::ZeroExtend(_) => "$zeroextend",
            CellKind::SignExtend(_) => "$signextend",
            CellKind::Constant(_) => "$constant",
            CellKind::Dff(_) => "$dff",
            CellKind::Memory(_) => "$mem",
            CellKind::Fsm(_) => "$fsm",
            CellKind::Clock(_) => "$clock",
            CellKind::Lut(_) => "$lut",
        }
    }

    /// True when the kind participates in scheduled evaluation.
    ///
    /// Input, Output and Subcircuit are boundary pseudo-cells; their signals
    /// are forwarded synchronously by the engine and they never enter the
    /// evaluation queue.
    pub fn is_evaluable(&self) -> bool {
        !matches!(
            self,
            CellKind::Input(_) | CellKind::Output(_) | CellKind::Subcircuit(_)
        )
    }

    /// The declared ports of this kind.
    pub fn ports(&self) -> Vec<Port> {
        match self {
            CellKind::Input(p) => vec![Port::output("out", p.bits)],
            CellKind::Output(p) => vec![Port::input("in", p.bits)],
            CellKind::Subcircuit(p) => p.ports.clone(),

            CellKind::Not(p) | CellKind::Repeater(p) => gates::unary_ports(p),
            CellKind::And(p)
            | CellKind::Or(p)
            | CellKind::Xor(p)
            | CellKind::Nand(p)
            | CellKind::Nor(p)
            | CellKind::Xnor(p) => gates::binary_ports(p),
            CellKind::ReduceAnd(p)
            | CellKind::ReduceOr(p)
            | CellKind::ReduceXor(p)
            | CellKind::ReduceNand(p)
            | CellKind::ReduceNor(p)
            | CellKind::ReduceXnor(p) => gates::reduce_ports(p),

            CellKind::Neg(p) | CellKind::Pos(p) => arith::unary_ports(p),
            CellKind::Add(p)
            | CellKind::Sub(p)
            | CellKind::Mul(p)
            | CellKind::Div(p)
            | CellKind::Mod(p)
            | CellKind::Pow(p) => arith::binary_ports(p),
            CellKind::Lt(p)
            | CellKind::Le(p)
            | CellKind::Eq(p)
            | CellKind::Ne(p)
            | CellKind::Ge(p)
            | CellKind::Gt(p) => arith::compare_ports(p),
            CellKind::ShiftLeft(p) | CellKind::ShiftRight(p) => arith::shift_ports(p),

            CellKind::Mux(p) => mux::mux_ports(p),
            CellKind::Mux1Hot(p) => mux::mux1hot_ports(p),

            CellKind::BusSlice(p) => bus::slice_ports(p),
            CellKind::BusGroup(p) => bus::group_ports(p),
            CellKind::BusUngroup(p) => bus::ungroup_ports(p),
            CellKind::ZeroExtend(p) | CellKind::SignExtend(p) => bus::extend_ports(p),

            CellKind::Constant(p) => misc::constant_ports(p),
            CellKind::Dff(p) => p.ports(),
            CellKind::Memory(p) => p.ports(),
            CellKind::Fsm(p) => p.ports(),
            CellKind::Clock(_) => misc::clock_ports(),
            CellKind::Lut(p) => misc::lut_ports(p),
        }
    }

    /// Rebuilds derived caches and transient state after construction or
    /// deserialization (memory sizing, FSM transition index, register
    /// initial values).
    pub fn prepare(&mut self) {
        match self {
            CellKind::Subcircuit(p) => {
                p.reverse_iomap = p
                    .iomap
                    .iter()
                    .map(|(port, cell)| (cell.clone(), port.clone()))
                    .collect();
            }
            CellKind::Dff(p) => p.prepare(),
            CellKind::Memory(p) => p.prepare(),
            CellKind::Fsm(p) => p.prepare(),
            _ => {}
        }
    }

    /// Evaluates the cell on a snapshot of its inputs.
    ///
    /// Pure for combinational kinds; stateful kinds (Dff, Memory, Fsm,
    /// Clock) update their internal state here. Input/Output/Subcircuit are
    /// never evaluated and return no outputs.
    pub fn evaluate(&mut self, inputs: &SignalMap) -> EvalOutput {
        match self {
            CellKind::Input(_) | CellKind::Output(_) | CellKind::Subcircuit(_) => {
                EvalOutput::empty()
            }

            CellKind::Not(p) => gates::eval_not(p, inputs),
            CellKind::Repeater(p) => gates::eval_repeater(p, inputs),
            CellKind::And(p) => gates::eval_binary(BinaryOp::And, p, inputs),
            CellKind::Or(p) => gates::eval_binary(BinaryOp::Or, p, inputs),
            CellKind::Xor(p) => gates::eval_binary(BinaryOp::Xor, p, inputs),
            CellKind::Nand(p) => gates::eval_binary(BinaryOp::Nand, p, inputs),
            CellKind::Nor(p) => gates::eval_binary(BinaryOp::Nor, p, inputs),
            CellKind::Xnor(p) => gates::eval_binary(BinaryOp::Xnor, p, inputs),
            CellKind::ReduceAnd(p) => gates::eval_reduce(BinaryOp::And, p, inputs),
            CellKind::ReduceOr(p) => gates::eval_reduce(BinaryOp::Or, p, inputs),
            CellKind::ReduceXor(p) => gates::eval_reduce(BinaryOp::Xor, p, inputs),
            CellKind::ReduceNand(p) => gates::eval_reduce(BinaryOp::Nand, p, inputs),
            CellKind::ReduceNor(p) => gates::eval_reduce(BinaryOp::Nor, p, inputs),
            CellKind::ReduceXnor(p) => gates::eval_reduce(BinaryOp::Xnor, p, inputs),

            CellKind::Neg(p) => arith::eval_unary(UnaryArithOp::Neg, p, inputs),
            CellKind::Pos(p) => arith::eval_unary(UnaryArithOp::Pos, p, inputs),
            CellKind::Add(p) => arith::eval_binary(ArithOp::Add, p, inputs),
            CellKind::Sub(p) => arith::eval_binary(ArithOp::Sub, p, inputs),
            CellKind::Mul(p) => arith::eval_binary(ArithOp::Mul, p, inputs),
            CellKind::Div(p) => arith::eval_binary(ArithOp::Div, p, inputs),
            CellKind::Mod(p) => arith::eval_binary(ArithOp::Mod, p, inputs),
            CellKind::Pow(p) => arith::eval_binary(ArithOp::Pow, p, inputs),
            CellKind::Lt(p) => arith::eval_compare(CompareOp::Lt, p, inputs),
            CellKind::Le(p) => arith::eval_compare(CompareOp::Le, p, inputs),
            CellKind::Eq(p) => arith::eval_compare(CompareOp::Eq, p, inputs),
            CellKind::Ne(p) => arith::eval_compare(CompareOp::Ne, p, inputs),
            CellKind::Ge(p) => arith::eval_compare(CompareOp::Ge, p, inputs),
            CellKind::Gt(p) => arith::eval_compare(CompareOp::Gt, p, inputs),
            CellKind::ShiftLeft(p) => arith::eval_shift(ShiftDir::Left, p, inputs),
            CellKind::ShiftRight(p) => arith::eval_shift(ShiftDir::Right, p, inputs),

            CellKind::Mux(p) => mux::eval_mux(p, inputs),
            CellKind::Mux1Hot(p) => mux::eval_mux1hot(p, inputs),

            CellKind::BusSlice(p) => bus::eval_slice(p, inputs),
            CellKind::BusGroup(p) => bus::eval_group(p, inputs),
            CellKind::BusUngroup(p) => bus::eval_ungroup(p, inputs),
            CellKind::ZeroExtend(p) => bus::eval_extend(p, inputs, false),
            CellKind::SignExtend(p) => bus::eval_extend(p, inputs, true),

            CellKind::Constant(p) => misc::eval_constant(p),
            CellKind::Dff(p) => p.evaluate(inputs),
            CellKind::Memory(p) => p.evaluate(inputs),
            CellKind::Fsm(p) => p.evaluate(inputs),
            CellKind::Clock(p) => misc::eval_clock(p),
            CellKind::Lut(p) => misc::eval_lut(p, inputs),
        }
    }
}

/// A placed cell: kind plus identity, delay and current port signals.
#[derive(Clone, Debug)]
pub struct Cell {
    pub id: CellId,
    pub kind: CellKind,
    /// Propagation delay in ticks. For clock generators this is the half
    /// period.
    pub propagation: u32,
    /// Display label from the circuit description, preserved for export.
    pub label: Option<String>,
    pub input_signals: SignalMap,
    pub output_signals: SignalMap,
}

impl Cell {
    /// Builds a cell, preparing the kind and seeding every declared port
    /// with an all-undefined signal at its width.
    pub fn new(id: impl Into<CellId>, mut kind: CellKind, propagation: u32) -> Cell {
        kind.prepare();
        let mut input_signals = SignalMap::new();
        let mut output_signals = SignalMap::new();
        for port in kind.ports() {
            let value = Signal::undefined(port.bits);
            match port.dir {
                PortDir::Input => input_signals.insert(port.id, value),
                PortDir::Output => output_signals.insert(port.id, value),
            };
        }
        Cell {
            id: id.into(),
            kind,
            propagation,
            label: None,
            input_signals,
            output_signals,
        }
    }

    /// Looks up the declared port with the given id.
    pub fn port(&self, id: &str) -> Option<Port> {
        self.kind.ports().into_iter().find(|p| p.id == id)
    }
}
