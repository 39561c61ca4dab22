//! Constant sources, clock generators and lookup tables.

use serde::{Deserialize, Serialize};

use crate::cell::{port_signal, EvalOutput, Port, SignalMap};
use crate::cells::arith::UnaryBits;
use crate::signal::{Bit, Signal};

/// A constant driver; evaluated once when placed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConstantParams {
    pub constant: Signal,
}

/// A free-running square wave generator.
///
/// The half period is the cell's propagation delay: every evaluation toggles
/// the output level and asks the scheduler for a re-evaluation one delay
/// later.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClockParams {
    #[serde(skip)]
    pub level: Bit,
}

/// A combinational lookup table addressed by the input value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LutParams {
    pub bits: UnaryBits,
    /// Table entries, one per input value starting at zero. Entries are
    /// `out`-bit signals; missing or out-of-range lookups read undefined.
    pub table: Vec<Signal>,
}

pub fn constant_ports(p: &ConstantParams) -> Vec<Port> {
    vec![Port::output("out", p.constant.width())]
}

pub fn clock_ports() -> Vec<Port> {
    vec![Port::output("out", 1)]
}

pub fn lut_ports(p: &LutParams) -> Vec<Port> {
    vec![
        Port::input("in", p.bits.input),
        Port::output("out", p.bits.out),
    ]
}

pub fn eval_constant(p: &ConstantParams) -> EvalOutput {
    EvalOutput::single("out", p.constant.clone())
}

pub fn eval_clock(p: &mut ClockParams) -> EvalOutput {
    p.level = p.level.not();
    EvalOutput::single("out", Signal::bit(p.level)).with_reschedule()
}

pub fn eval_lut(p: &LutParams, inputs: &SignalMap) -> EvalOutput {
    let addr = port_signal(inputs, "in", p.bits.input);
    let out = addr
        .to_address()
        .and_then(|i| p.table.get(i))
        .cloned()
        .unwrap_or_else(|| Signal::undefined(p.bits.out));
    EvalOutput::single("out", out)
}
