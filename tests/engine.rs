//! Integration tests for the in-process simulation engine.
//!
//! These tests verify end-to-end behavior including:
//! - Coalesced evaluation and deterministic settling
//! - Zero-delay stabilization within a single tick
//! - Registers driven by an external clock input
//! - Monitor and alarm lifecycles
//! - Width-mismatch warnings and their cleanup

use digilog::cell::IoParams;
use digilog::cells::dff::DffParams;
use digilog::cells::gates::GateParams;
use digilog::cells::misc::ClockParams;
use digilog::{CellKind, Endpoint, MonitorSpec, Signal, SimEvent, Simulation, Tick};

// ============================================================================
// Circuit Builders
// ============================================================================

fn sig(s: &str) -> Signal {
    Signal::parse(s).unwrap()
}

fn input(bits: usize) -> CellKind {
    CellKind::Input(IoParams { bits, net: None })
}

fn output(bits: usize) -> CellKind {
    CellKind::Output(IoParams { bits, net: None })
}

/// a, b --and--> q with a one-tick gate delay.
fn and_circuit() -> (Simulation, u32) {
    let mut sim = Simulation::new();
    let g = sim.add_graph();
    sim.add_cell(g, "a", input(1), 0, None).unwrap();
    sim.add_cell(g, "b", input(1), 0, None).unwrap();
    sim.add_cell(g, "and", CellKind::And(GateParams { bits: 1 }), 1, None)
        .unwrap();
    sim.add_cell(g, "q", output(1), 0, None).unwrap();
    sim.add_wire(g, "w1", Endpoint::new("a", "out"), Endpoint::new("and", "in1"), None)
        .unwrap();
    sim.add_wire(g, "w2", Endpoint::new("b", "out"), Endpoint::new("and", "in2"), None)
        .unwrap();
    sim.add_wire(g, "w3", Endpoint::new("and", "out"), Endpoint::new("q", "in"), None)
        .unwrap();
    (sim, g)
}

/// d, clk --dff--> q with a manually driven clock input.
fn dff_circuit() -> (Simulation, u32) {
    let mut sim = Simulation::new();
    let g = sim.add_graph();
    sim.add_cell(g, "d", input(1), 0, None).unwrap();
    sim.add_cell(g, "clk", input(1), 0, None).unwrap();
    sim.add_cell(g, "ff", CellKind::Dff(DffParams::new(1)), 1, None)
        .unwrap();
    sim.add_cell(g, "q", output(1), 0, None).unwrap();
    sim.add_wire(g, "w1", Endpoint::new("d", "out"), Endpoint::new("ff", "in"), None)
        .unwrap();
    sim.add_wire(g, "w2", Endpoint::new("clk", "out"), Endpoint::new("ff", "clk"), None)
        .unwrap();
    sim.add_wire(g, "w3", Endpoint::new("ff", "out"), Endpoint::new("q", "in"), None)
        .unwrap();
    (sim, g)
}

// ============================================================================
// Settling and Coalescing
// ============================================================================

#[test]
fn test_two_input_changes_evaluate_gate_once() {
    let (mut sim, g) = and_circuit();
    sim.take_events();

    sim.set_input(g, "a", sig("1")).unwrap();
    sim.set_input(g, "b", sig("1")).unwrap();
    sim.step_next();

    let gate_evals = sim
        .take_events()
        .into_iter()
        .filter(|e| {
            matches!(
                e,
                SimEvent::OutputSignalsChanged { cell, .. } if cell == "and"
            )
        })
        .count();
    assert_eq!(gate_evals, 1);
    assert_eq!(sim.get_output(g, "q").unwrap(), sig("1"));
}

#[test]
fn test_identical_runs_settle_to_identical_values() {
    let run = || {
        let (mut sim, g) = and_circuit();
        sim.set_input(g, "a", sig("1")).unwrap();
        sim.set_input(g, "b", sig("0")).unwrap();
        sim.run_until_stable(16);
        sim.set_input(g, "b", sig("1")).unwrap();
        sim.run_until_stable(16);
        (sim.get_output(g, "q").unwrap(), sim.tick())
    };
    assert_eq!(run(), run());
}

#[test]
fn test_zero_delay_chain_settles_in_one_step() {
    let mut sim = Simulation::new();
    let g = sim.add_graph();
    sim.add_cell(g, "i", input(1), 0, None).unwrap();
    for k in 0..4 {
        sim.add_cell(g, format!("r{k}"), CellKind::Repeater(GateParams { bits: 1 }), 0, None)
            .unwrap();
    }
    sim.add_cell(g, "o", output(1), 0, None).unwrap();
    sim.add_wire(g, "w0", Endpoint::new("i", "out"), Endpoint::new("r0", "in"), None)
        .unwrap();
    for k in 0..3 {
        sim.add_wire(
            g,
            format!("w{}", k + 1),
            Endpoint::new(format!("r{k}"), "out"),
            Endpoint::new(format!("r{}", k + 1), "in"),
            None,
        )
        .unwrap();
    }
    sim.add_wire(g, "w4", Endpoint::new("r3", "out"), Endpoint::new("o", "in"), None)
        .unwrap();

    sim.set_input(g, "i", sig("1")).unwrap();
    sim.step_next();

    assert_eq!(sim.get_output(g, "o").unwrap(), sig("1"));
    assert!(!sim.has_pending_events());
    assert_eq!(sim.tick(), Tick(1));
}

#[test]
fn test_run_until_stable_reports_free_running_clock() {
    let mut sim = Simulation::new();
    let g = sim.add_graph();
    sim.add_cell(g, "clk", CellKind::Clock(ClockParams::default()), 1, None)
        .unwrap();
    assert!(!sim.run_until_stable(10));

    let (mut sim2, _) = and_circuit();
    assert!(sim2.run_until_stable(10));
}

// ============================================================================
// Registers
// ============================================================================

#[test]
fn test_dff_captures_on_rising_edge_only() {
    let (mut sim, g) = dff_circuit();

    sim.set_input(g, "clk", sig("0")).unwrap();
    sim.set_input(g, "d", sig("1")).unwrap();
    sim.run_until_stable(16);
    // data changed while the clock was low; nothing captured yet
    assert_eq!(sim.get_output(g, "q").unwrap(), sig("x"));

    sim.set_input(g, "clk", sig("1")).unwrap();
    sim.run_until_stable(16);
    assert_eq!(sim.get_output(g, "q").unwrap(), sig("1"));

    // data changes with the clock held high do not pass through
    sim.set_input(g, "d", sig("0")).unwrap();
    sim.run_until_stable(16);
    assert_eq!(sim.get_output(g, "q").unwrap(), sig("1"));

    sim.set_input(g, "clk", sig("0")).unwrap();
    sim.run_until_stable(16);
    sim.set_input(g, "clk", sig("1")).unwrap();
    sim.run_until_stable(16);
    assert_eq!(sim.get_output(g, "q").unwrap(), sig("0"));
}

#[test]
fn test_undefined_clock_sample_is_not_an_edge() {
    let (mut sim, g) = dff_circuit();

    sim.set_input(g, "clk", sig("0")).unwrap();
    sim.set_input(g, "d", sig("1")).unwrap();
    sim.run_until_stable(16);

    sim.set_input(g, "clk", sig("x")).unwrap();
    sim.run_until_stable(16);
    assert_eq!(sim.get_output(g, "q").unwrap(), sig("x"));

    // x -> 1 is not a 0 -> 1 transition either
    sim.set_input(g, "clk", sig("1")).unwrap();
    sim.run_until_stable(16);
    assert_eq!(sim.get_output(g, "q").unwrap(), sig("x"));
}

// ============================================================================
// Monitors
// ============================================================================

#[test]
fn test_one_shot_monitor_fires_once_and_deregisters() {
    let (mut sim, g) = and_circuit();
    sim.monitor(
        MonitorSpec::new(g, "and", "out")
            .with_trigger_values(vec![sig("1")])
            .one_shot(),
    );
    sim.take_events();

    sim.set_input(g, "a", sig("1")).unwrap();
    sim.set_input(g, "b", sig("1")).unwrap();
    sim.run_until_stable(16);
    let hits = sim
        .take_events()
        .into_iter()
        .filter(|e| matches!(e, SimEvent::MonitorTriggered { .. }))
        .count();
    assert_eq!(hits, 1);

    // drop to 0 and back to 1: the monitor is gone
    sim.set_input(g, "a", sig("0")).unwrap();
    sim.run_until_stable(16);
    sim.set_input(g, "a", sig("1")).unwrap();
    sim.run_until_stable(16);
    assert!(!sim
        .take_events()
        .iter()
        .any(|e| matches!(e, SimEvent::MonitorTriggered { .. })));
}

#[test]
fn test_stop_on_trigger_requests_stop() {
    let (mut sim, g) = and_circuit();
    sim.monitor(
        MonitorSpec::new(g, "q", "in")
            .with_trigger_values(vec![sig("1")])
            .stop_on_trigger(),
    );
    assert!(!sim.take_stop_request());

    sim.set_input(g, "a", sig("1")).unwrap();
    sim.set_input(g, "b", sig("1")).unwrap();
    sim.step_next();
    assert!(sim.take_stop_request());
    // the flag is consumed by the read
    assert!(!sim.take_stop_request());
}

// ============================================================================
// Alarms
// ============================================================================

#[test]
fn test_alarm_fires_inside_a_jumped_interval() {
    let mut sim = Simulation::new();
    let g = sim.add_graph();
    // the clock's first evaluation is queued five ticks out
    sim.add_cell(g, "clk", CellKind::Clock(ClockParams::default()), 5, None)
        .unwrap();
    let alarm = sim.alarm(Tick(3), true);
    sim.take_events();

    let processed = sim.step_next();
    assert_eq!(processed, Tick(5));
    assert!(sim
        .take_events()
        .iter()
        .any(|e| matches!(e, SimEvent::AlarmReached { alarm: a, tick } if *a == alarm && *tick == Tick(3))));
    assert!(sim.take_stop_request());
}

#[test]
fn test_cancelled_alarm_never_fires() {
    let (mut sim, g) = and_circuit();
    let alarm = sim.alarm(Tick(2), false);
    sim.unalarm(alarm);
    sim.set_input(g, "a", sig("1")).unwrap();
    sim.run_until_stable(16);
    for _ in 0..4 {
        sim.step();
    }
    assert!(!sim
        .take_events()
        .iter()
        .any(|e| matches!(e, SimEvent::AlarmReached { .. })));
}

// ============================================================================
// Warnings
// ============================================================================

#[test]
fn test_width_mismatch_warns_and_blocks_until_removed() {
    let mut sim = Simulation::new();
    let g = sim.add_graph();
    sim.add_cell(g, "wide", input(2), 0, None).unwrap();
    sim.add_cell(g, "narrow", CellKind::Not(GateParams { bits: 1 }), 1, None)
        .unwrap();
    sim.add_wire(g, "bad", Endpoint::new("wide", "out"), Endpoint::new("narrow", "in"), None)
        .unwrap();

    assert!(sim.has_warnings());
    assert!(sim.take_stop_request());
    assert!(sim
        .take_events()
        .iter()
        .any(|e| matches!(e, SimEvent::Warning { .. })));

    // the flagged wire never carries a value
    sim.set_input(g, "wide", sig("11")).unwrap();
    sim.run_until_stable(16);
    assert_eq!(sim.input_signal(g, "narrow", "in").unwrap(), sig("x"));

    sim.remove_wire(g, "bad").unwrap();
    assert!(!sim.has_warnings());
}
