//! Table-driven finite state machines.
//!
//! Transitions are matched against the current state and the control input;
//! undefined bits in a transition pattern are don't-cares, while undefined
//! input bits only match don't-care pattern positions. On a clock edge the
//! first matching table row (in table order) decides the next state. The
//! combinational output merges the output patterns of every matching row by
//! bitwise agreement: positions where all rows agree keep their value,
//! disagreeing positions read undefined.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::cell::{port_signal, CellNotification, EvalOutput, Port, SignalMap};
use crate::cells::arith::UnaryBits;
use crate::signal::{Bit, Signal};

fn default_true() -> bool {
    true
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsmPolarity {
    #[serde(default = "default_true")]
    pub clock: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arst: Option<bool>,
}

impl Default for FsmPolarity {
    fn default() -> FsmPolarity {
        FsmPolarity {
            clock: true,
            arst: None,
        }
    }
}

/// One row of the transition table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FsmTransition {
    pub state_in: usize,
    /// Input pattern; undefined bits are don't-cares.
    pub ctrl_in: Signal,
    pub state_out: usize,
    /// Output pattern contributed while this row matches.
    pub ctrl_out: Signal,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FsmParams {
    pub bits: UnaryBits,
    pub states: usize,
    #[serde(default)]
    pub init_state: usize,
    #[serde(default)]
    pub polarity: FsmPolarity,
    pub trans_table: Vec<FsmTransition>,

    #[serde(skip)]
    current: Option<usize>,
    #[serde(skip)]
    last_clk: Bit,
    /// Table row indices grouped by source state, rebuilt by `prepare`.
    #[serde(skip)]
    rows_by_state: HashMap<usize, Vec<usize>>,
}

impl FsmParams {
    pub fn new(bits: UnaryBits, states: usize, trans_table: Vec<FsmTransition>) -> FsmParams {
        FsmParams {
            bits,
            states,
            init_state: 0,
            polarity: FsmPolarity::default(),
            trans_table,
            current: None,
            last_clk: Bit::X,
            rows_by_state: HashMap::new(),
        }
    }

    pub fn ports(&self) -> Vec<Port> {
        let mut ports = vec![Port::input("clk", 1).with_tag("clock")];
        if self.polarity.arst.is_some() {
            ports.push(Port::input("arst", 1));
        }
        ports.push(Port::input("in", self.bits.input));
        ports.push(Port::output("out", self.bits.out));
        ports
    }

    /// The current state register.
    pub fn state(&self) -> usize {
        self.current.unwrap_or(self.init_state)
    }

    pub fn prepare(&mut self) {
        if self.current.is_none() {
            self.current = Some(self.init_state);
            self.last_clk = Bit::X;
        }
        self.rows_by_state.clear();
        for (i, row) in self.trans_table.iter().enumerate() {
            self.rows_by_state
                .entry(row.state_in)
                .or_default()
                .push(i);
        }
    }

    fn pattern_matches(pattern: &Signal, input: &Signal) -> bool {
        pattern
            .bits()
            .iter()
            .enumerate()
            .all(|(i, p)| match p {
                Bit::X => true,
                _ => input.bits().get(i) == Some(p),
            })
    }

    fn matching_rows(&self, state: usize, input: &Signal) -> Vec<&FsmTransition> {
        self.rows_by_state
            .get(&state)
            .into_iter()
            .flatten()
            .map(|i| &self.trans_table[*i])
            .filter(|row| Self::pattern_matches(&row.ctrl_in, input))
            .collect()
    }

    fn merged_output(&self, state: usize, input: &Signal) -> Signal {
        let rows = self.matching_rows(state, input);
        let mut merged: Option<Signal> = None;
        for row in rows {
            let pattern = row.ctrl_out.zero_extend(self.bits.out);
            merged = Some(match merged {
                None => pattern,
                Some(acc) => {
                    let bits = acc
                        .bits()
                        .iter()
                        .zip(pattern.bits().iter())
                        .map(|(a, b)| if a == b { *a } else { Bit::X })
                        .collect();
                    Signal::from_bits(bits)
                }
            });
        }
        merged.unwrap_or_else(|| Signal::undefined(self.bits.out))
    }

    pub fn evaluate(&mut self, inputs: &SignalMap) -> EvalOutput {
        let input = port_signal(inputs, "in", self.bits.input);
        let clk = port_signal(inputs, "clk", 1).get(0);
        let mut result = EvalOutput::empty();

        let arst = self
            .polarity
            .arst
            .map(|ap| port_signal(inputs, "arst", 1).is_level(Bit::from(ap)))
            .unwrap_or(false);
        if arst {
            self.last_clk = clk;
            if self.state() != self.init_state {
                self.current = Some(self.init_state);
                result.notifications.push(CellNotification::FsmState {
                    state: self.init_state,
                });
            }
        } else {
            let prev = self.last_clk;
            self.last_clk = clk;
            let active = Bit::from(self.polarity.clock);
            if prev == active.not() && clk == active {
                let next = self
                    .matching_rows(self.state(), &input)
                    .first()
                    .map(|row| row.state_out);
                if let Some(next) = next {
                    if next != self.state() {
                        self.current = Some(next);
                        result
                            .notifications
                            .push(CellNotification::FsmState { state: next });
                    }
                }
            }
        }

        // The output logic sees the post-transition state of this cycle.
        result
            .outputs
            .insert("out".into(), self.merged_output(self.state(), &input));
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(s: &str) -> Signal {
        Signal::parse(s).unwrap()
    }

    fn row(state_in: usize, ctrl_in: &str, state_out: usize, ctrl_out: &str) -> FsmTransition {
        FsmTransition {
            state_in,
            ctrl_in: sig(ctrl_in),
            state_out,
            ctrl_out: sig(ctrl_out),
        }
    }

    fn toggle_fsm() -> FsmParams {
        let mut p = FsmParams {
            bits: UnaryBits { input: 1, out: 1 },
            states: 2,
            init_state: 0,
            polarity: FsmPolarity {
                clock: true,
                arst: Some(true),
            },
            trans_table: vec![
                row(0, "1", 1, "0"),
                row(0, "0", 0, "0"),
                row(1, "1", 0, "1"),
                row(1, "0", 1, "1"),
            ],
            current: None,
            last_clk: Bit::X,
            rows_by_state: HashMap::new(),
        };
        p.prepare();
        p
    }

    fn eval(p: &mut FsmParams, clk: &str, arst: &str, input: &str) -> EvalOutput {
        let mut m = SignalMap::new();
        m.insert("clk".into(), sig(clk));
        m.insert("arst".into(), sig(arst));
        m.insert("in".into(), sig(input));
        p.evaluate(&m)
    }

    #[test]
    fn test_transitions_on_edge() {
        let mut p = toggle_fsm();
        let out = eval(&mut p, "0", "0", "1");
        assert_eq!(out.outputs["out"], sig("0"));
        let out = eval(&mut p, "1", "0", "1");
        assert_eq!(p.state(), 1);
        // output reflects the state after the transition
        assert_eq!(out.outputs["out"], sig("1"));
        assert_eq!(
            out.notifications,
            vec![CellNotification::FsmState { state: 1 }]
        );
        // no edge, no transition
        let out = eval(&mut p, "1", "0", "1");
        assert_eq!(p.state(), 1);
        assert!(out.notifications.is_empty());
        assert_eq!(out.outputs["out"], sig("1"));
    }

    #[test]
    fn test_async_reset_to_initial_state() {
        let mut p = toggle_fsm();
        eval(&mut p, "0", "0", "1");
        eval(&mut p, "1", "0", "1");
        assert_eq!(p.state(), 1);
        let out = eval(&mut p, "1", "1", "0");
        assert_eq!(p.state(), 0);
        assert_eq!(
            out.notifications,
            vec![CellNotification::FsmState { state: 0 }]
        );
    }

    #[test]
    fn test_first_match_wins_and_outputs_merge() {
        let mut p = FsmParams {
            bits: UnaryBits { input: 2, out: 2 },
            states: 3,
            init_state: 0,
            polarity: FsmPolarity::default(),
            trans_table: vec![
                // both rows match input 11; the first decides the state
                row(0, "1x", 1, "10"),
                row(0, "x1", 2, "11"),
            ],
            current: None,
            last_clk: Bit::X,
            rows_by_state: HashMap::new(),
        };
        p.prepare();
        let mut m = SignalMap::new();
        m.insert("clk".into(), sig("0"));
        m.insert("in".into(), sig("11"));
        // before the edge both rows still match state 0: outputs merge,
        // agreeing on the high bit and disagreeing on the low one
        let out = p.evaluate(&m);
        assert_eq!(out.outputs["out"], sig("1x"));
        m.insert("clk".into(), sig("1"));
        let out = p.evaluate(&m);
        assert_eq!(p.state(), 1);
        assert_eq!(
            out.notifications,
            vec![CellNotification::FsmState { state: 1 }]
        );
        // state 1 has no rows: output reads undefined
        assert_eq!(out.outputs["out"], sig("xx"));
    }

    #[test]
    fn test_undefined_input_fails_defined_pattern_bits() {
        let mut p = toggle_fsm();
        eval(&mut p, "0", "0", "x");
        let out = eval(&mut p, "1", "0", "x");
        // no row matches: the state holds and the output is undefined
        assert_eq!(p.state(), 0);
        assert_eq!(out.outputs["out"], sig("x"));
    }
}
