//! Integration tests for circuit descriptions.
//!
//! These tests verify:
//! - Building and running circuits with stateful devices from YAML
//! - Exporting a live simulation back into a description
//! - Round-tripping hierarchy and memory contents through export

use digilog::cells::memory::MemoryParams;
use digilog::engine::ParamPatch;
use digilog::{schema, CellKind, CircuitDesc, Signal};

fn sig(s: &str) -> Signal {
    Signal::parse(s).unwrap()
}

/// Four words of read-only storage behind an asynchronous read port.
const ROM_YAML: &str = r#"
devices:
  addr: { type: "$input", bits: 2 }
  rom:
    type: "$mem"
    bits: 4
    abits: 2
    rdports: [{}]
    memdata: ["0001", "0010", "0100", "1000"]
  data: { type: "$output", bits: 4 }
connectors:
  - from: { id: addr, port: out }
    to: { id: rom, port: rd0addr }
  - from: { id: rom, port: rd0data }
    to: { id: data, port: in }
"#;

const WRAPPED_INVERTER_YAML: &str = r#"
devices:
  x: { type: "$input", bits: 1 }
  u1: { type: "$subcircuit", celltype: inv }
  y: { type: "$output", bits: 1 }
connectors:
  - from: { id: x, port: out }
    to: { id: u1, port: a }
  - from: { id: u1, port: b }
    to: { id: y, port: in }
subcircuits:
  inv:
    devices:
      a: { type: "$input", bits: 1 }
      n: { type: "$not", bits: 1 }
      b: { type: "$output", bits: 1 }
    connectors:
      - from: { id: a, port: out }
        to: { id: n, port: in }
      - from: { id: n, port: out }
        to: { id: b, port: in }
"#;

#[test]
fn test_rom_reads_through_async_port() {
    let desc = CircuitDesc::from_yaml(ROM_YAML).unwrap();
    let (mut sim, root) = desc.build().unwrap();
    sim.run_until_stable(16);

    for (addr, word) in [("00", "0001"), ("01", "0010"), ("10", "0100"), ("11", "1000")] {
        sim.set_input(root, "addr", sig(addr)).unwrap();
        sim.run_until_stable(16);
        assert_eq!(sim.get_output(root, "data").unwrap(), sig(word));
    }

    // an undefined address reads undefined
    sim.set_input(root, "addr", sig("1x")).unwrap();
    sim.run_until_stable(16);
    assert_eq!(sim.get_output(root, "data").unwrap(), sig("xxxx"));
}

#[test]
fn test_export_preserves_patched_memory_contents() {
    let desc = CircuitDesc::from_yaml(ROM_YAML).unwrap();
    let (mut sim, root) = desc.build().unwrap();
    sim.run_until_stable(16);

    sim.change_param(
        root,
        "rom",
        ParamPatch::MemoryWord {
            addr: 1,
            value: sig("1111"),
        },
    )
    .unwrap();
    sim.run_until_stable(16);

    let exported = schema::export(&sim, root).unwrap();
    let rom = &exported.devices["rom"];
    let CellKind::Memory(MemoryParams { memdata, .. }) = &rom.kind else {
        panic!("rom exported as a different kind");
    };
    assert_eq!(memdata[1], sig("1111"));

    // the exported description rebuilds into the patched behavior
    let (mut sim2, root2) = exported.build().unwrap();
    sim2.run_until_stable(16);
    sim2.set_input(root2, "addr", sig("01")).unwrap();
    sim2.run_until_stable(16);
    assert_eq!(sim2.get_output(root2, "data").unwrap(), sig("1111"));
}

#[test]
fn test_export_hoists_subcircuit_definitions() {
    let desc = CircuitDesc::from_yaml(WRAPPED_INVERTER_YAML).unwrap();
    let (sim, root) = desc.build().unwrap();

    let exported = schema::export(&sim, root).unwrap();
    assert!(exported.subcircuits.contains_key("inv"));
    assert_eq!(exported.devices.len(), 3);
    assert_eq!(exported.subcircuits["inv"].devices.len(), 3);

    // the round-tripped description still works
    let (mut sim2, root2) = exported.build().unwrap();
    sim2.run_until_stable(16);
    sim2.set_input(root2, "x", sig("0")).unwrap();
    sim2.run_until_stable(16);
    assert_eq!(sim2.get_output(root2, "y").unwrap(), sig("1"));
}

#[test]
fn test_export_preserves_device_labels() {
    let yaml = r#"
devices:
  i: { type: "$input", bits: 1 }
  n: { type: "$not", bits: 1, label: "front inverter" }
  o: { type: "$output", bits: 1 }
connectors:
  - from: { id: i, port: out }
    to: { id: n, port: in }
  - from: { id: n, port: out }
    to: { id: o, port: in }
"#;
    let desc = CircuitDesc::from_yaml(yaml).unwrap();
    let (sim, root) = desc.build().unwrap();

    let exported = schema::export(&sim, root).unwrap();
    assert_eq!(
        exported.devices["n"].label.as_deref(),
        Some("front inverter")
    );
    assert_eq!(exported.devices["i"].label, None);
}

#[test]
fn test_yaml_round_trip_is_stable() {
    let desc = CircuitDesc::from_yaml(WRAPPED_INVERTER_YAML).unwrap();
    let text = desc.to_yaml().unwrap();
    let back = CircuitDesc::from_yaml(&text).unwrap();
    assert_eq!(back, desc);
}
