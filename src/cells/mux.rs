//! Multiplexers: binary-select and one-hot.

use serde::{Deserialize, Serialize};

use crate::cell::{port_signal, EvalOutput, Port, SignalMap};
use crate::signal::{Bit, Signal};

/// Data and select widths of a multiplexer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuxBits {
    /// Width of every data input and of the output.
    #[serde(rename = "in")]
    pub data: usize,
    /// Width of the select input. A binary mux has `2^sel` data inputs, a
    /// one-hot mux has `sel` data inputs.
    pub sel: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuxParams {
    pub bits: MuxBits,
}

fn data_ports(p: &MuxParams, count: usize) -> Vec<Port> {
    let mut ports = Vec::with_capacity(count + 2);
    ports.push(Port::input("sel", p.bits.sel));
    for i in 0..count {
        ports.push(Port::input(format!("in{i}"), p.bits.data));
    }
    ports.push(Port::output("out", p.bits.data));
    ports
}

pub fn mux_ports(p: &MuxParams) -> Vec<Port> {
    data_ports(p, 1usize << p.bits.sel)
}

pub fn mux1hot_ports(p: &MuxParams) -> Vec<Port> {
    data_ports(p, p.bits.sel)
}

pub fn eval_mux(p: &MuxParams, inputs: &SignalMap) -> EvalOutput {
    let sel = port_signal(inputs, "sel", p.bits.sel);
    let Some(idx) = sel.to_address() else {
        return EvalOutput::single("out", Signal::undefined(p.bits.data));
    };
    EvalOutput::single(
        "out",
        port_signal(inputs, &format!("in{idx}"), p.bits.data),
    )
}

pub fn eval_mux1hot(p: &MuxParams, inputs: &SignalMap) -> EvalOutput {
    let sel = port_signal(inputs, "sel", p.bits.sel);
    if !sel.is_fully_defined() {
        return EvalOutput::single("out", Signal::undefined(p.bits.data));
    }
    let asserted: Vec<usize> = sel
        .bits()
        .iter()
        .enumerate()
        .filter(|(_, b)| **b == Bit::One)
        .map(|(i, _)| i)
        .collect();
    let out = match asserted.as_slice() {
        [] => Signal::zeros(p.bits.data),
        [i] => port_signal(inputs, &format!("in{i}"), p.bits.data),
        _ => Signal::undefined(p.bits.data),
    };
    EvalOutput::single("out", out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(s: &str) -> Signal {
        Signal::parse(s).unwrap()
    }

    fn mux_inputs(sel: &str, data: &[&str]) -> SignalMap {
        let mut m = SignalMap::new();
        m.insert("sel".into(), sig(sel));
        for (i, d) in data.iter().enumerate() {
            m.insert(format!("in{i}"), sig(d));
        }
        m
    }

    #[test]
    fn test_mux_selects_by_index() {
        let p = MuxParams {
            bits: MuxBits { data: 2, sel: 2 },
        };
        let m = mux_inputs("10", &["00", "01", "10", "11"]);
        assert_eq!(eval_mux(&p, &m).outputs["out"], sig("10"));
    }

    #[test]
    fn test_mux_undefined_select() {
        let p = MuxParams {
            bits: MuxBits { data: 2, sel: 2 },
        };
        let m = mux_inputs("1x", &["00", "01", "10", "11"]);
        assert_eq!(eval_mux(&p, &m).outputs["out"], sig("xx"));
    }

    #[test]
    fn test_mux1hot() {
        let p = MuxParams {
            bits: MuxBits { data: 2, sel: 3 },
        };
        // exactly one bit set picks that input
        let m = mux_inputs("010", &["00", "11", "01"]);
        assert_eq!(eval_mux1hot(&p, &m).outputs["out"], sig("11"));
        // no bit set yields all zeros
        let m = mux_inputs("000", &["00", "11", "01"]);
        assert_eq!(eval_mux1hot(&p, &m).outputs["out"], sig("00"));
        // multiple asserted or undefined select yields undefined
        let m = mux_inputs("011", &["00", "11", "01"]);
        assert_eq!(eval_mux1hot(&p, &m).outputs["out"], sig("xx"));
        let m = mux_inputs("0x0", &["00", "11", "01"]);
        assert_eq!(eval_mux1hot(&p, &m).outputs["out"], sig("xx"));
    }
}
