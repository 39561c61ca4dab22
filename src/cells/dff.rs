//! D flip-flops with optional enable and resets.
//!
//! Edge detection keeps the previously seen clock sample; an edge requires
//! a defined inactive-to-active transition, so undefined clock samples never
//! latch. Undefined enable or reset levels count as not asserted. The
//! asynchronous reset has absolute priority over everything clocked.

use serde::{Deserialize, Serialize};

use crate::cell::{port_signal, EvalOutput, Port, SignalMap};
use crate::signal::{Bit, Signal};

fn default_true() -> bool {
    true
}

/// Active levels of the control inputs. A control port exists only when its
/// polarity is configured.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DffPolarity {
    /// Clock edge: `true` = rising, `false` = falling.
    #[serde(default = "default_true")]
    pub clock: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arst: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub srst: Option<bool>,
}

impl Default for DffPolarity {
    fn default() -> DffPolarity {
        DffPolarity {
            clock: true,
            enable: None,
            arst: None,
            srst: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DffParams {
    pub bits: usize,
    #[serde(default)]
    pub polarity: DffPolarity,
    /// Register value before the first latch; defaults to all-undefined.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial: Option<Signal>,
    /// Value loaded by the async reset; defaults to all-zero.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arst_value: Option<Signal>,
    /// Value loaded by the sync reset; defaults to all-zero.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub srst_value: Option<Signal>,
    /// When set, the sync reset is only honored while the enable is
    /// asserted; otherwise the sync reset is checked before the enable.
    #[serde(default)]
    pub enable_srst: bool,

    #[serde(skip)]
    pub state: Signal,
    #[serde(skip)]
    pub last_clk: Bit,
}

/// True when a one-bit control signal is at its active level. Undefined
/// levels never assert.
fn asserted(level: &Signal, polarity: bool) -> bool {
    level.is_level(Bit::from(polarity))
}

impl DffParams {
    pub fn new(bits: usize) -> DffParams {
        DffParams {
            bits,
            polarity: DffPolarity::default(),
            initial: None,
            arst_value: None,
            srst_value: None,
            enable_srst: false,
            state: Signal::undefined(bits),
            last_clk: Bit::X,
        }
    }

    pub fn ports(&self) -> Vec<Port> {
        let mut ports = vec![
            Port::input("in", self.bits),
            Port::input("clk", 1).with_tag("clock"),
        ];
        if self.polarity.enable.is_some() {
            ports.push(Port::input("en", 1));
        }
        if self.polarity.arst.is_some() {
            ports.push(Port::input("arst", 1));
        }
        if self.polarity.srst.is_some() {
            ports.push(Port::input("srst", 1));
        }
        ports.push(Port::output("out", self.bits));
        ports
    }

    /// Rebuilds the register after construction or deserialization; keeps
    /// live state intact when the width already matches.
    pub fn prepare(&mut self) {
        if self.state.width() != self.bits {
            self.state = self
                .initial
                .clone()
                .unwrap_or_else(|| Signal::undefined(self.bits));
            self.last_clk = Bit::X;
        }
    }

    pub fn evaluate(&mut self, inputs: &SignalMap) -> EvalOutput {
        if let Some(ap) = self.polarity.arst {
            if asserted(&port_signal(inputs, "arst", 1), ap) {
                self.last_clk = port_signal(inputs, "clk", 1).get(0);
                self.state = self
                    .arst_value
                    .clone()
                    .unwrap_or_else(|| Signal::zeros(self.bits));
                return EvalOutput::single("out", self.state.clone());
            }
        }

        let clk = port_signal(inputs, "clk", 1).get(0);
        let prev = self.last_clk;
        self.last_clk = clk;

        let active = Bit::from(self.polarity.clock);
        let edge = prev == active.not() && clk == active;
        if edge {
            let enabled = match self.polarity.enable {
                Some(ep) => asserted(&port_signal(inputs, "en", 1), ep),
                None => true,
            };
            let srst = match self.polarity.srst {
                Some(sp) => asserted(&port_signal(inputs, "srst", 1), sp),
                None => false,
            };
            let srst_value = self
                .srst_value
                .clone()
                .unwrap_or_else(|| Signal::zeros(self.bits));
            if self.enable_srst {
                if enabled {
                    self.state = if srst {
                        srst_value
                    } else {
                        port_signal(inputs, "in", self.bits)
                    };
                }
            } else if srst {
                self.state = srst_value;
            } else if enabled {
                self.state = port_signal(inputs, "in", self.bits);
            }
        }

        EvalOutput::single("out", self.state.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(s: &str) -> Signal {
        Signal::parse(s).unwrap()
    }

    fn step(p: &mut DffParams, pairs: &[(&str, &str)]) -> Signal {
        let mut m = SignalMap::new();
        for (k, v) in pairs {
            m.insert((*k).into(), sig(v));
        }
        p.evaluate(&m).outputs["out"].clone()
    }

    #[test]
    fn test_latches_on_rising_edge_only() {
        let mut p = DffParams::new(2);
        p.prepare();
        assert_eq!(step(&mut p, &[("in", "11"), ("clk", "0")]), sig("xx"));
        assert_eq!(step(&mut p, &[("in", "11"), ("clk", "1")]), sig("11"));
        // high clock without a new edge holds
        assert_eq!(step(&mut p, &[("in", "00"), ("clk", "1")]), sig("11"));
        assert_eq!(step(&mut p, &[("in", "00"), ("clk", "0")]), sig("11"));
        assert_eq!(step(&mut p, &[("in", "00"), ("clk", "1")]), sig("00"));
    }

    #[test]
    fn test_undefined_clock_never_edges() {
        let mut p = DffParams::new(1);
        p.prepare();
        step(&mut p, &[("in", "1"), ("clk", "0")]);
        assert_eq!(step(&mut p, &[("in", "1"), ("clk", "x")]), sig("x"));
        // x -> 1 is not a defined inactive-to-active transition
        assert_eq!(step(&mut p, &[("in", "1"), ("clk", "1")]), sig("x"));
        step(&mut p, &[("in", "1"), ("clk", "0")]);
        assert_eq!(step(&mut p, &[("in", "1"), ("clk", "1")]), sig("1"));
    }

    #[test]
    fn test_falling_edge_polarity() {
        let mut p = DffParams::new(1);
        p.polarity.clock = false;
        p.prepare();
        step(&mut p, &[("in", "1"), ("clk", "1")]);
        assert_eq!(step(&mut p, &[("in", "1"), ("clk", "0")]), sig("1"));
    }

    #[test]
    fn test_async_reset_has_priority() {
        let mut p = DffParams::new(2);
        p.polarity.arst = Some(true);
        p.arst_value = Some(sig("10"));
        p.prepare();
        step(&mut p, &[("in", "11"), ("clk", "0"), ("arst", "0")]);
        // reset wins over a simultaneous latching edge
        assert_eq!(
            step(&mut p, &[("in", "11"), ("clk", "1"), ("arst", "1")]),
            sig("10")
        );
        // undefined reset level does not assert
        step(&mut p, &[("in", "11"), ("clk", "0"), ("arst", "x")]);
        assert_eq!(
            step(&mut p, &[("in", "11"), ("clk", "1"), ("arst", "x")]),
            sig("11")
        );
    }

    #[test]
    fn test_enable_gates_latching() {
        let mut p = DffParams::new(1);
        p.polarity.enable = Some(true);
        p.initial = Some(sig("0"));
        p.prepare();
        step(&mut p, &[("in", "1"), ("clk", "0"), ("en", "0")]);
        assert_eq!(step(&mut p, &[("in", "1"), ("clk", "1"), ("en", "0")]), sig("0"));
        step(&mut p, &[("in", "1"), ("clk", "0"), ("en", "1")]);
        assert_eq!(step(&mut p, &[("in", "1"), ("clk", "1"), ("en", "1")]), sig("1"));
    }

    #[test]
    fn test_srst_before_enable() {
        // enable_srst = false: the sync reset fires even while disabled
        let mut p = DffParams::new(2);
        p.polarity.enable = Some(true);
        p.polarity.srst = Some(true);
        p.srst_value = Some(sig("01"));
        p.initial = Some(sig("11"));
        p.prepare();
        step(&mut p, &[("in", "10"), ("clk", "0"), ("en", "0"), ("srst", "1")]);
        assert_eq!(
            step(&mut p, &[("in", "10"), ("clk", "1"), ("en", "0"), ("srst", "1")]),
            sig("01")
        );
    }

    #[test]
    fn test_srst_gated_by_enable() {
        // enable_srst = true: the sync reset is ignored while disabled
        let mut p = DffParams::new(2);
        p.polarity.enable = Some(true);
        p.polarity.srst = Some(true);
        p.srst_value = Some(sig("01"));
        p.initial = Some(sig("11"));
        p.enable_srst = true;
        p.prepare();
        step(&mut p, &[("in", "10"), ("clk", "0"), ("en", "0"), ("srst", "1")]);
        assert_eq!(
            step(&mut p, &[("in", "10"), ("clk", "1"), ("en", "0"), ("srst", "1")]),
            sig("11")
        );
        // and honored once enabled
        step(&mut p, &[("in", "10"), ("clk", "0"), ("en", "1"), ("srst", "1")]);
        assert_eq!(
            step(&mut p, &[("in", "10"), ("clk", "1"), ("en", "1"), ("srst", "1")]),
            sig("01")
        );
    }
}
