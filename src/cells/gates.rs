//! Boolean gates: unary, binary bitwise and reductions.

use serde::{Deserialize, Serialize};

use crate::cell::{port_signal, EvalOutput, Port, SignalMap};
use crate::signal::{Bit, Signal};

/// Width parameter shared by all plain gates.
///
/// For bitwise gates this is the width of every port; for reductions it is
/// the width of the input (the output is always a single bit).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateParams {
    pub bits: usize,
}

/// Binary boolean operators, also used as reduction operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    And,
    Or,
    Xor,
    Nand,
    Nor,
    Xnor,
}

impl BinaryOp {
    fn apply(self, a: Bit, b: Bit) -> Bit {
        match self {
            BinaryOp::And => a.and(b),
            BinaryOp::Or => a.or(b),
            BinaryOp::Xor => a.xor(b),
            BinaryOp::Nand => a.and(b).not(),
            BinaryOp::Nor => a.or(b).not(),
            BinaryOp::Xnor => a.xor(b).not(),
        }
    }

    /// The non-negated core operator and whether the result is inverted,
    /// used to fold reductions without negating at every step.
    fn core(self) -> (BinaryOp, bool) {
        match self {
            BinaryOp::Nand => (BinaryOp::And, true),
            BinaryOp::Nor => (BinaryOp::Or, true),
            BinaryOp::Xnor => (BinaryOp::Xor, true),
            op => (op, false),
        }
    }
}

pub fn unary_ports(p: &GateParams) -> Vec<Port> {
    vec![Port::input("in", p.bits), Port::output("out", p.bits)]
}

pub fn binary_ports(p: &GateParams) -> Vec<Port> {
    vec![
        Port::input("in1", p.bits),
        Port::input("in2", p.bits),
        Port::output("out", p.bits),
    ]
}

pub fn reduce_ports(p: &GateParams) -> Vec<Port> {
    vec![Port::input("in", p.bits), Port::output("out", 1)]
}

pub fn eval_not(p: &GateParams, inputs: &SignalMap) -> EvalOutput {
    EvalOutput::single("out", port_signal(inputs, "in", p.bits).not())
}

pub fn eval_repeater(p: &GateParams, inputs: &SignalMap) -> EvalOutput {
    EvalOutput::single("out", port_signal(inputs, "in", p.bits))
}

pub fn eval_binary(op: BinaryOp, p: &GateParams, inputs: &SignalMap) -> EvalOutput {
    let a = port_signal(inputs, "in1", p.bits);
    let b = port_signal(inputs, "in2", p.bits);
    let bits = a
        .bits()
        .iter()
        .zip(b.bits().iter())
        .map(|(x, y)| op.apply(*x, *y))
        .collect();
    EvalOutput::single("out", Signal::from_bits(bits))
}

pub fn eval_reduce(op: BinaryOp, p: &GateParams, inputs: &SignalMap) -> EvalOutput {
    let input = port_signal(inputs, "in", p.bits);
    let (core, negate) = op.core();
    let identity = match core {
        BinaryOp::And => Bit::One,
        _ => Bit::Zero,
    };
    let mut acc = input.reduce(identity, |a, b| core.apply(a, b));
    if negate {
        acc = acc.not();
    }
    EvalOutput::single("out", Signal::bit(acc))
}
