//! Monitors and alarms.
//!
//! A monitor watches one port of one cell; an alarm watches the clock.
//! Registration hands out numeric ids; deregistering a stale id is a silent
//! no-op.

use serde::{Deserialize, Serialize};

use crate::signal::Signal;
use crate::types::{CellId, GraphId, PortId, Tick};

/// What a monitor watches and how it reacts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MonitorSpec {
    pub graph: GraphId,
    pub cell: CellId,
    pub port: PortId,
    /// When set, the monitor only triggers when the port takes one of
    /// these values; otherwise it triggers on every change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_values: Option<Vec<Signal>>,
    /// Deregister after the first trigger.
    #[serde(default)]
    pub one_shot: bool,
    /// Ask a running simulation to stop when triggered.
    #[serde(default)]
    pub stop_on_trigger: bool,
}

impl MonitorSpec {
    pub fn new(graph: GraphId, cell: impl Into<CellId>, port: impl Into<PortId>) -> MonitorSpec {
        MonitorSpec {
            graph,
            cell: cell.into(),
            port: port.into(),
            trigger_values: None,
            one_shot: false,
            stop_on_trigger: false,
        }
    }

    pub fn with_trigger_values(mut self, values: Vec<Signal>) -> MonitorSpec {
        self.trigger_values = Some(values);
        self
    }

    pub fn one_shot(mut self) -> MonitorSpec {
        self.one_shot = true;
        self
    }

    pub fn stop_on_trigger(mut self) -> MonitorSpec {
        self.stop_on_trigger = true;
        self
    }

    /// Whether a new port value fires this monitor.
    pub fn matches(&self, value: &Signal) -> bool {
        match &self.trigger_values {
            None => true,
            Some(values) => values.iter().any(|v| v == value),
        }
    }
}

/// A registered point in simulated time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmSpec {
    pub tick: Tick,
    /// Ask a running simulation to stop when the tick is reached.
    #[serde(default)]
    pub stop_on_alarm: bool,
}
