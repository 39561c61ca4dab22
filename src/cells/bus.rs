//! Bus reshaping cells: slice, group, ungroup, width extension.
//!
//! These are pure bit rearrangements and default to zero propagation delay
//! when placed.

use serde::{Deserialize, Serialize};

use crate::cell::{port_signal, EvalOutput, Port, SignalMap};
use crate::cells::arith::UnaryBits;
use crate::signal::Signal;

/// The bit range a slice extracts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceRange {
    /// First (lowest) extracted bit position.
    pub first: usize,
    /// Number of extracted bits.
    pub count: usize,
    /// Width of the sliced input.
    pub total: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusSliceParams {
    pub slice: SliceRange,
}

/// Widths of the grouped inputs, `in0` lowest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusGroupParams {
    pub groups: Vec<usize>,
}

/// Widths of the ungrouped outputs, `out0` lowest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusUngroupParams {
    pub groups: Vec<usize>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendParams {
    pub extend: UnaryBits,
}

pub fn slice_ports(p: &BusSliceParams) -> Vec<Port> {
    vec![
        Port::input("in", p.slice.total),
        Port::output("out", p.slice.count),
    ]
}

pub fn group_ports(p: &BusGroupParams) -> Vec<Port> {
    let mut ports: Vec<Port> = p
        .groups
        .iter()
        .enumerate()
        .map(|(i, bits)| Port::input(format!("in{i}"), *bits))
        .collect();
    ports.push(Port::output("out", p.groups.iter().sum()));
    ports
}

pub fn ungroup_ports(p: &BusUngroupParams) -> Vec<Port> {
    let mut ports = vec![Port::input("in", p.groups.iter().sum())];
    ports.extend(
        p.groups
            .iter()
            .enumerate()
            .map(|(i, bits)| Port::output(format!("out{i}"), *bits)),
    );
    ports
}

pub fn extend_ports(p: &ExtendParams) -> Vec<Port> {
    vec![
        Port::input("in", p.extend.input),
        Port::output("out", p.extend.out),
    ]
}

pub fn eval_slice(p: &BusSliceParams, inputs: &SignalMap) -> EvalOutput {
    let input = port_signal(inputs, "in", p.slice.total);
    EvalOutput::single("out", input.slice(p.slice.first, p.slice.count))
}

pub fn eval_group(p: &BusGroupParams, inputs: &SignalMap) -> EvalOutput {
    let mut out = Signal::zeros(0);
    for (i, bits) in p.groups.iter().enumerate() {
        let part = port_signal(inputs, &format!("in{i}"), *bits);
        out = out.concat(&part);
    }
    EvalOutput::single("out", out)
}

pub fn eval_ungroup(p: &BusUngroupParams, inputs: &SignalMap) -> EvalOutput {
    let total = p.groups.iter().sum();
    let input = port_signal(inputs, "in", total);
    let mut result = EvalOutput::empty();
    let mut lo = 0;
    for (i, bits) in p.groups.iter().enumerate() {
        result
            .outputs
            .insert(format!("out{i}"), input.slice(lo, *bits));
        lo += bits;
    }
    result
}

pub fn eval_extend(p: &ExtendParams, inputs: &SignalMap, signed: bool) -> EvalOutput {
    let input = port_signal(inputs, "in", p.extend.input);
    let out = if signed {
        input.sign_extend(p.extend.out)
    } else {
        input.zero_extend(p.extend.out)
    };
    EvalOutput::single("out", out)
}
