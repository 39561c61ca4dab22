//! The circuit description schema: loading, validation, instantiation and
//! export.
//!
//! A [`CircuitDesc`] is the interchange format for whole circuits: a map of
//! devices, a list of connectors and a library of named subcircuit
//! definitions. Device entries reuse the serde representation of
//! [`CellKind`], so the `type` tag is the device type (`"$and"`,
//! `"$subcircuit"`, ...) and memory contents, LUT tables and constant
//! values serialize bit-exact as binary strings.
//!
//! Descriptions load from YAML or JSON (auto-detected by file extension),
//! validate structurally, [`build`](CircuitDesc::build) into a running
//! [`Simulation`] and round-trip back out through [`export`].

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::cell::{CellKind, PortDir, SubcircuitParams};
use crate::engine::Simulation;
use crate::error::SimError;
use crate::graph::Endpoint;
use crate::types::{GraphId, PortId};

/// Errors from loading, validating or instantiating a circuit description.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("unknown circuit file format: {0}")]
    UnknownFormat(String),
    #[error("build error: {0}")]
    Build(#[from] SimError),
}

/// One device entry: the cell kind plus placement metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceDesc {
    #[serde(flatten)]
    pub kind: CellKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Propagation delay override; defaults per kind when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub propagation: Option<u32>,
}

impl DeviceDesc {
    pub fn new(kind: CellKind) -> DeviceDesc {
        DeviceDesc {
            kind,
            label: None,
            propagation: None,
        }
    }
}

/// One end of a connector: device id plus port name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRef {
    pub id: String,
    pub port: String,
}

impl PortRef {
    pub fn new(id: impl Into<String>, port: impl Into<String>) -> PortRef {
        PortRef {
            id: id.into(),
            port: port.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConnectorDesc {
    pub from: PortRef,
    pub to: PortRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A complete circuit description.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CircuitDesc {
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceDesc>,
    #[serde(default)]
    pub connectors: Vec<ConnectorDesc>,
    /// Named subcircuit definitions available to `$subcircuit` devices in
    /// this description and below.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub subcircuits: BTreeMap<String, CircuitDesc>,
}

/// The default propagation delay of a device kind: boundary and pure
/// bus-reshaping cells switch with zero delay, everything else takes one
/// tick.
pub fn default_propagation(kind: &CellKind) -> u32 {
    match kind {
        CellKind::Input(_)
        | CellKind::Output(_)
        | CellKind::Subcircuit(_)
        | CellKind::Constant(_)
        | CellKind::BusSlice(_)
        | CellKind::BusGroup(_)
        | CellKind::BusUngroup(_)
        | CellKind::ZeroExtend(_)
        | CellKind::SignExtend(_) => 0,
        _ => 1,
    }
}

impl CircuitDesc {
    /// Parses a YAML circuit description.
    pub fn from_yaml(text: &str) -> Result<CircuitDesc, SchemaError> {
        let desc: CircuitDesc = serde_yaml::from_str(text)?;
        desc.validate()?;
        Ok(desc)
    }

    /// Parses a JSON circuit description.
    pub fn from_json(text: &str) -> Result<CircuitDesc, SchemaError> {
        let desc: CircuitDesc = serde_json::from_str(text)?;
        desc.validate()?;
        Ok(desc)
    }

    /// Loads a circuit description, picking the format by file extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<CircuitDesc, SchemaError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => CircuitDesc::from_yaml(&text),
            Some("json") => CircuitDesc::from_json(&text),
            _ => Err(SchemaError::UnknownFormat(path.display().to_string())),
        }
    }

    pub fn to_yaml(&self) -> Result<String, SchemaError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn to_json(&self) -> Result<String, SchemaError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Structural validation: connector endpoints must name existing
    /// devices and every `$subcircuit` must resolve to a definition in
    /// scope.
    pub fn validate(&self) -> Result<(), SchemaError> {
        self.validate_scoped(&HashMap::new())
    }

    fn validate_scoped(&self, outer: &HashMap<&str, &CircuitDesc>) -> Result<(), SchemaError> {
        let library = self.library(outer);
        for (id, device) in &self.devices {
            if id.is_empty() {
                return Err(SchemaError::Validation("empty device id".into()));
            }
            if let CellKind::Subcircuit(sp) = &device.kind {
                if !library.contains_key(sp.celltype.as_str()) {
                    return Err(SchemaError::Validation(format!(
                        "device {id:?}: unknown subcircuit type {:?}",
                        sp.celltype
                    )));
                }
            }
        }
        for conn in &self.connectors {
            for end in [&conn.from, &conn.to] {
                if !self.devices.contains_key(&end.id) {
                    return Err(SchemaError::Validation(format!(
                        "connector references unknown device {:?}",
                        end.id
                    )));
                }
            }
        }
        for sub in self.subcircuits.values() {
            sub.validate_scoped(&library)?;
        }
        Ok(())
    }

    fn library<'a>(
        &'a self,
        outer: &HashMap<&'a str, &'a CircuitDesc>,
    ) -> HashMap<&'a str, &'a CircuitDesc> {
        let mut library = outer.clone();
        for (name, sub) in &self.subcircuits {
            library.insert(name.as_str(), sub);
        }
        library
    }

    /// Instantiates the description into a fresh engine, returning it with
    /// the root graph id.
    pub fn build(&self) -> Result<(Simulation, GraphId), SchemaError> {
        self.validate()?;
        let mut sim = Simulation::new();
        let root = sim.add_graph();
        self.instantiate_into(&mut sim, root, &HashMap::new())?;
        debug!(devices = self.devices.len(), "circuit built");
        Ok((sim, root))
    }

    /// Instantiates this description's devices and connectors into an
    /// existing graph.
    pub fn instantiate(&self, sim: &mut Simulation, gid: GraphId) -> Result<(), SchemaError> {
        self.validate()?;
        self.instantiate_into(sim, gid, &HashMap::new())
    }

    fn instantiate_into(
        &self,
        sim: &mut Simulation,
        gid: GraphId,
        outer: &HashMap<&str, &CircuitDesc>,
    ) -> Result<(), SchemaError> {
        let library = self.library(outer);
        for (id, device) in &self.devices {
            let propagation = device
                .propagation
                .unwrap_or_else(|| default_propagation(&device.kind));
            let kind = match &device.kind {
                CellKind::Subcircuit(sp) => {
                    let inner_desc = library
                        .get(sp.celltype.as_str())
                        .copied()
                        .ok_or_else(|| {
                            SchemaError::Validation(format!(
                                "unknown subcircuit type {:?}",
                                sp.celltype
                            ))
                        })?;
                    let inner_gid = sim.add_graph();
                    inner_desc.instantiate_into(sim, inner_gid, &library)?;
                    CellKind::Subcircuit(subcircuit_binding(
                        &sp.celltype,
                        inner_gid,
                        inner_desc,
                    ))
                }
                other => other.clone(),
            };
            sim.add_cell(gid, id.clone(), kind, propagation, device.label.clone())?;
        }
        for (i, conn) in self.connectors.iter().enumerate() {
            let wire_id = conn.name.clone().unwrap_or_else(|| format!("w{i}"));
            sim.add_wire(
                gid,
                wire_id,
                Endpoint::new(conn.from.id.clone(), conn.from.port.clone()),
                Endpoint::new(conn.to.id.clone(), conn.to.port.clone()),
                conn.name.clone(),
            )?;
        }
        Ok(())
    }
}

/// Derives the boundary binding of a subcircuit instance from the Input and
/// Output devices of its definition. The external port name is the device's
/// `net` label when present, the device id otherwise.
pub(crate) fn subcircuit_binding(
    celltype: &str,
    inner_gid: GraphId,
    inner_desc: &CircuitDesc,
) -> SubcircuitParams {
    let mut params = SubcircuitParams {
        celltype: celltype.to_string(),
        graph: inner_gid,
        ..SubcircuitParams::default()
    };
    for (id, device) in &inner_desc.devices {
        let (dir, bits, net) = match &device.kind {
            CellKind::Input(p) => (PortDir::Input, p.bits, p.net.clone()),
            CellKind::Output(p) => (PortDir::Output, p.bits, p.net.clone()),
            _ => continue,
        };
        let port: PortId = net.unwrap_or_else(|| id.clone());
        params.iomap.insert(port.clone(), id.clone());
        params.ports.push(crate::cell::Port {
            id: port,
            dir,
            bits,
            tag: None,
        });
    }
    params
}

/// Exports a simulation back into a circuit description, recursively
/// hoisting subcircuit definitions into the root `subcircuits` library.
pub fn export(sim: &Simulation, root: GraphId) -> Result<CircuitDesc, SimError> {
    let mut subcircuits = BTreeMap::new();
    let mut desc = export_graph(sim, root, &mut subcircuits)?;
    desc.subcircuits = subcircuits;
    Ok(desc)
}

fn export_graph(
    sim: &Simulation,
    gid: GraphId,
    subcircuits: &mut BTreeMap<String, CircuitDesc>,
) -> Result<CircuitDesc, SimError> {
    let graph = sim.graph(gid)?;
    let mut desc = CircuitDesc::default();
    for cell in graph.cells() {
        if let CellKind::Subcircuit(sp) = &cell.kind {
            if !subcircuits.contains_key(&sp.celltype) {
                // Reserve the slot first so instance cycles cannot recurse.
                subcircuits.insert(sp.celltype.clone(), CircuitDesc::default());
                let inner = export_graph(sim, sp.graph, subcircuits)?;
                subcircuits.insert(sp.celltype.clone(), inner);
            }
        }
        desc.devices.insert(
            cell.id.clone(),
            DeviceDesc {
                kind: cell.kind.clone(),
                label: cell.label.clone(),
                propagation: Some(cell.propagation),
            },
        );
    }
    let mut connectors: Vec<ConnectorDesc> = graph
        .wires()
        .map(|w| ConnectorDesc {
            from: PortRef::new(w.from.cell.clone(), w.from.port.clone()),
            to: PortRef::new(w.to.cell.clone(), w.to.port.clone()),
            name: w.name.clone(),
        })
        .collect();
    connectors.sort_by(|a, b| (&a.from.id, &a.from.port, &a.to.id, &a.to.port)
        .cmp(&(&b.from.id, &b.from.port, &b.to.id, &b.to.port)));
    desc.connectors = connectors;
    Ok(desc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::Signal;

    const HALF_ADDER_YAML: &str = r#"
devices:
  a: { type: "$input", bits: 1 }
  b: { type: "$input", bits: 1 }
  s: { type: "$output", bits: 1 }
  c: { type: "$output", bits: 1 }
  x1: { type: "$xor", bits: 1 }
  a1: { type: "$and", bits: 1 }
connectors:
  - from: { id: a, port: out }
    to: { id: x1, port: in1 }
  - from: { id: b, port: out }
    to: { id: x1, port: in2 }
  - from: { id: a, port: out }
    to: { id: a1, port: in1 }
  - from: { id: b, port: out }
    to: { id: a1, port: in2 }
  - from: { id: x1, port: out }
    to: { id: s, port: in }
  - from: { id: a1, port: out }
    to: { id: c, port: in }
"#;

    #[test]
    fn test_yaml_load_and_build() {
        let desc = CircuitDesc::from_yaml(HALF_ADDER_YAML).unwrap();
        assert_eq!(desc.devices.len(), 6);
        let (mut sim, root) = desc.build().unwrap();
        sim.run_until_stable(16);
        sim.set_input(root, "a", Signal::parse("1").unwrap()).unwrap();
        sim.set_input(root, "b", Signal::parse("1").unwrap()).unwrap();
        sim.run_until_stable(16);
        assert_eq!(sim.get_output(root, "s").unwrap(), Signal::parse("0").unwrap());
        assert_eq!(sim.get_output(root, "c").unwrap(), Signal::parse("1").unwrap());
    }

    #[test]
    fn test_validation_catches_dangling_connector() {
        let text = r#"
devices:
  a: { type: "$input", bits: 1 }
connectors:
  - from: { id: a, port: out }
    to: { id: missing, port: in }
"#;
        let err = CircuitDesc::from_yaml(text).unwrap_err();
        assert!(matches!(err, SchemaError::Validation(_)));
    }

    #[test]
    fn test_validation_catches_unknown_subcircuit() {
        let text = r#"
devices:
  u1: { type: "$subcircuit", celltype: nowhere }
"#;
        let err = CircuitDesc::from_yaml(text).unwrap_err();
        assert!(matches!(err, SchemaError::Validation(_)));
    }

    #[test]
    fn test_json_roundtrip_preserves_contents() {
        let desc = CircuitDesc::from_yaml(HALF_ADDER_YAML).unwrap();
        let json = desc.to_json().unwrap();
        let back = CircuitDesc::from_json(&json).unwrap();
        assert_eq!(back, desc);
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let err = CircuitDesc::from_file("circuit.toml").unwrap_err();
        assert!(matches!(
            err,
            SchemaError::UnknownFormat(_) | SchemaError::Io(_)
        ));
    }
}
