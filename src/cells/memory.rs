//! Random-access memory with configurable read and write ports.
//!
//! A memory holds `words` words of `bits` bits, addressed by `abits`-bit
//! addresses. Write ports may be clocked or asynchronous and carry a
//! per-bit enable mask; read ports are combinational or clocked, with a
//! per-write-port transparency/collision policy deciding what a clocked
//! read returns when the same address is written in the same cycle.
//!
//! Undefined or out-of-range addresses read undefined and turn writes into
//! no-ops. Word writes are surfaced as explicit change notifications.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::cell::{port_signal, CellNotification, EvalOutput, Port, SignalMap};
use crate::signal::{Bit, Signal};

/// A boolean policy applied either uniformly or per write port.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortFlag {
    Uniform(bool),
    PerPort(Vec<bool>),
}

impl Default for PortFlag {
    fn default() -> PortFlag {
        PortFlag::Uniform(false)
    }
}

impl PortFlag {
    pub fn get(&self, port: usize) -> bool {
        match self {
            PortFlag::Uniform(v) => *v,
            PortFlag::PerPort(v) => v.get(port).copied().unwrap_or(false),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadPortParams {
    /// Clock edge polarity; absent means a combinational read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clock_polarity: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_polarity: Option<bool>,
    /// Async reset of the read register (clocked reads only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arst_polarity: Option<bool>,
    /// Value the async reset loads; defaults to all-undefined.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arst_value: Option<Signal>,
    /// Same-cycle write to the read address shows the new value.
    #[serde(default)]
    pub transparent: PortFlag,
    /// Same-cycle write to the read address reads undefined.
    #[serde(default)]
    pub collision: PortFlag,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WritePortParams {
    /// Clock edge polarity; absent means the port writes whenever enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clock_polarity: Option<bool>,
    /// Per-bit enable; the enable port is as wide as a word (a one-bit
    /// enable broadcasts to the whole word).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_polarity: Option<bool>,
}

#[derive(Clone, Debug, PartialEq)]
struct ReadState {
    last_clk: Bit,
    out: Signal,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemoryParams {
    /// Word width.
    pub bits: usize,
    /// Address width.
    pub abits: usize,
    /// Word count; defaults to 2^abits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub words: Option<usize>,
    #[serde(default)]
    pub rdports: Vec<ReadPortParams>,
    #[serde(default)]
    pub wrports: Vec<WritePortParams>,
    /// Memory contents, bit-exact; sized by `prepare`.
    #[serde(default)]
    pub memdata: Vec<Signal>,

    #[serde(skip)]
    rd_state: Vec<ReadState>,
    #[serde(skip)]
    wr_last_clk: Vec<Bit>,
}

impl MemoryParams {
    pub fn new(bits: usize, abits: usize) -> MemoryParams {
        MemoryParams {
            bits,
            abits,
            words: None,
            rdports: Vec::new(),
            wrports: Vec::new(),
            memdata: Vec::new(),
            rd_state: Vec::new(),
            wr_last_clk: Vec::new(),
        }
    }

    pub fn word_count(&self) -> usize {
        self.words.unwrap_or(1usize << self.abits)
    }

    pub fn ports(&self) -> Vec<Port> {
        let mut ports = Vec::new();
        for (k, rp) in self.rdports.iter().enumerate() {
            ports.push(Port::input(format!("rd{k}addr"), self.abits));
            if rp.clock_polarity.is_some() {
                ports.push(Port::input(format!("rd{k}clk"), 1).with_tag("clock"));
            }
            if rp.enable_polarity.is_some() {
                ports.push(Port::input(format!("rd{k}en"), 1));
            }
            if rp.arst_polarity.is_some() {
                ports.push(Port::input(format!("rd{k}arst"), 1));
            }
            ports.push(Port::output(format!("rd{k}data"), self.bits));
        }
        for (k, wp) in self.wrports.iter().enumerate() {
            ports.push(Port::input(format!("wr{k}addr"), self.abits));
            ports.push(Port::input(format!("wr{k}data"), self.bits));
            if wp.clock_polarity.is_some() {
                ports.push(Port::input(format!("wr{k}clk"), 1).with_tag("clock"));
            }
            if wp.enable_polarity.is_some() {
                ports.push(Port::input(format!("wr{k}en"), self.bits));
            }
        }
        ports
    }

    /// Sizes the contents and the per-port state. Existing words keep their
    /// value; words of the wrong width are replaced by undefined.
    pub fn prepare(&mut self) {
        let words = self.word_count();
        self.memdata.resize(words, Signal::undefined(self.bits));
        for word in &mut self.memdata {
            if word.width() != self.bits {
                *word = Signal::undefined(self.bits);
            }
        }
        if self.rd_state.len() != self.rdports.len() {
            self.rd_state = self
                .rdports
                .iter()
                .map(|_| ReadState {
                    last_clk: Bit::X,
                    out: Signal::undefined(self.bits),
                })
                .collect();
        }
        if self.wr_last_clk.len() != self.wrports.len() {
            self.wr_last_clk = vec![Bit::X; self.wrports.len()];
        }
    }

    fn address(&self, inputs: &SignalMap, port: &str) -> Option<usize> {
        port_signal(inputs, port, self.abits)
            .to_address()
            .filter(|a| *a < self.word_count())
    }

    pub fn evaluate(&mut self, inputs: &SignalMap) -> EvalOutput {
        let mut result = EvalOutput::empty();

        // Writes first; clocked reads that need the pre-write value get it
        // from the old-word record.
        let mut old_words: HashMap<usize, Signal> = HashMap::new();
        let mut written: HashMap<usize, Vec<usize>> = HashMap::new();
        for k in 0..self.wrports.len() {
            let wp = self.wrports[k].clone();
            let fire = match wp.clock_polarity {
                Some(cp) => {
                    let clk = port_signal(inputs, &format!("wr{k}clk"), 1).get(0);
                    let prev = self.wr_last_clk[k];
                    self.wr_last_clk[k] = clk;
                    let active = Bit::from(cp);
                    prev == active.not() && clk == active
                }
                None => true,
            };
            if !fire {
                continue;
            }
            let Some(addr) = self.address(inputs, &format!("wr{k}addr")) else {
                continue;
            };
            let data = port_signal(inputs, &format!("wr{k}data"), self.bits);
            let mask = self.write_mask(inputs, k, wp.enable_polarity);
            if !mask.iter().any(|m| *m) {
                continue;
            }
            let old = self.memdata[addr].clone();
            let mut new = old.clone();
            for (i, enabled) in mask.iter().enumerate() {
                if *enabled {
                    new.set(i, data.get(i));
                }
            }
            old_words.entry(addr).or_insert_with(|| old.clone());
            written.entry(addr).or_default().push(k);
            if new != old {
                result.notifications.push(CellNotification::MemoryWrite {
                    port: k,
                    addr,
                    value: new.clone(),
                });
            }
            self.memdata[addr] = new;
        }

        for k in 0..self.rdports.len() {
            let rp = self.rdports[k].clone();
            let name = format!("rd{k}data");
            let addr = self.address(inputs, &format!("rd{k}addr"));
            match rp.clock_polarity {
                None => {
                    // Combinational reads see post-write contents.
                    let out = addr
                        .map(|a| self.memdata[a].clone())
                        .unwrap_or_else(|| Signal::undefined(self.bits));
                    result.outputs.insert(name, out);
                }
                Some(cp) => {
                    let arst = rp
                        .arst_polarity
                        .map(|ap| {
                            port_signal(inputs, &format!("rd{k}arst"), 1)
                                .is_level(Bit::from(ap))
                        })
                        .unwrap_or(false);
                    if arst {
                        self.rd_state[k].last_clk =
                            port_signal(inputs, &format!("rd{k}clk"), 1).get(0);
                        self.rd_state[k].out = rp
                            .arst_value
                            .clone()
                            .unwrap_or_else(|| Signal::undefined(self.bits));
                        result.outputs.insert(name, self.rd_state[k].out.clone());
                        continue;
                    }
                    let clk = port_signal(inputs, &format!("rd{k}clk"), 1).get(0);
                    let prev = self.rd_state[k].last_clk;
                    self.rd_state[k].last_clk = clk;
                    let active = Bit::from(cp);
                    let edge = prev == active.not() && clk == active;
                    let enabled = match rp.enable_polarity {
                        Some(ep) => {
                            port_signal(inputs, &format!("rd{k}en"), 1).is_level(Bit::from(ep))
                        }
                        None => true,
                    };
                    if edge && enabled {
                        let value = match addr {
                            None => Signal::undefined(self.bits),
                            Some(a) => match written.get(&a) {
                                None => self.memdata[a].clone(),
                                Some(ports) => {
                                    if ports.iter().any(|w| rp.collision.get(*w)) {
                                        Signal::undefined(self.bits)
                                    } else if ports.iter().any(|w| rp.transparent.get(*w)) {
                                        self.memdata[a].clone()
                                    } else {
                                        old_words[&a].clone()
                                    }
                                }
                            },
                        };
                        self.rd_state[k].out = value;
                    }
                    result.outputs.insert(name, self.rd_state[k].out.clone());
                }
            }
        }

        result
    }

    fn write_mask(
        &self,
        inputs: &SignalMap,
        port: usize,
        enable_polarity: Option<bool>,
    ) -> Vec<bool> {
        match enable_polarity {
            None => vec![true; self.bits],
            Some(ep) => {
                let active = Bit::from(ep);
                let en = port_signal(inputs, &format!("wr{port}en"), self.bits);
                if en.width() == 1 {
                    vec![en.get(0) == active; self.bits]
                } else {
                    (0..self.bits)
                        .map(|i| i < en.width() && en.get(i) == active)
                        .collect()
                }
            }
        }
    }
}
