//! Hierarchical analysis over parsed circuits.
//!
//! The analyzer flattens subcircuit instances into a single scoped
//! netlist, classifies components (including leaf subcircuits standing in
//! for primitives), detects design roots, and indexes model usage.
//!
//! Analysis never mutates the source circuit: flattening produces a
//! brand-new [`Circuit`] built from clones, so several analyzers may run
//! over the same circuit as long as each has its own instance (the
//! unresolved-reference registry is per-instance state).

#[cfg(test)]
mod tests;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::{self, Display};

use arcstr::ArcStr;
use itertools::Itertools;
use thiserror::Error;

use crate::{is_ground, Circuit, Component, ComponentKind, Subckt};

/// The default bound on instance-expansion depth.
///
/// A subcircuit that directly or mutually instantiates itself would
/// otherwise recurse forever; real designs stay far below this.
pub const DEFAULT_MAX_DEPTH: usize = 128;

/// An error arising from hierarchical analysis.
#[derive(Debug, Error)]
pub enum AnalyzerError {
    /// The requested top cell is not defined in the netlist.
    #[error("top cell `{0}` not found in netlist")]
    UnknownTopCell(ArcStr),
    /// Instance expansion exceeded the recursion limit.
    ///
    /// Almost always means the subcircuit hierarchy contains a cycle.
    #[error("recursion limit ({limit}) exceeded while expanding `{path}`")]
    RecursionLimit {
        /// The instance path at which the limit was hit.
        path: String,
        /// The limit in effect.
        limit: usize,
    },
}

/// The result of a hierarchical analysis operation.
pub type AnalyzerResult<T> = Result<T, AnalyzerError>;

/// The classification assigned to a component by [`Analyzer::classify`].
///
/// Non-instance components classify as their own kind. Instances of
/// leaf/black-box subcircuits may classify as device primitives based on
/// name and parameter heuristics; everything else classifies as
/// [`ComponentClass::SubcktInstance`].
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum ComponentClass {
    /// A resistor.
    Resistor,
    /// A capacitor.
    Capacitor,
    /// An inductor.
    Inductor,
    /// A MOSFET, real or inferred from a leaf instance.
    Mosfet,
    /// A BJT, real or inferred from a leaf instance.
    Bjt,
    /// A diode, real or inferred from a leaf instance.
    Diode,
    /// A voltage source.
    VoltageSource,
    /// A current source.
    CurrentSource,
    /// A structural subcircuit instance or an unclassified black box.
    SubcktInstance,
}

impl Display for ComponentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Resistor => "Resistor",
            Self::Capacitor => "Capacitor",
            Self::Inductor => "Inductor",
            Self::Mosfet => "Mosfet",
            Self::Bjt => "Bjt",
            Self::Diode => "Diode",
            Self::VoltageSource => "VoltageSource",
            Self::CurrentSource => "CurrentSource",
            Self::SubcktInstance => "SubcktInstance",
        };
        write!(f, "{name}")
    }
}

/// Analyzes the subcircuit hierarchy of a [`Circuit`].
#[derive(Debug)]
pub struct Analyzer<'a> {
    circuit: &'a Circuit,
    top_cell: Option<ArcStr>,
    max_depth: usize,
    unresolved: BTreeSet<ArcStr>,
}

impl<'a> Analyzer<'a> {
    /// Creates an analyzer over the given circuit.
    ///
    /// If `top_cell` is given, that subcircuit's body is analyzed as the
    /// design root; the call fails if no such subcircuit is defined.
    pub fn new(circuit: &'a Circuit, top_cell: Option<&str>) -> AnalyzerResult<Self> {
        if let Some(name) = top_cell {
            if circuit.subckt(name).is_none() {
                return Err(AnalyzerError::UnknownTopCell(ArcStr::from(name)));
            }
        }
        Ok(Self {
            circuit,
            top_cell: top_cell.map(ArcStr::from),
            max_depth: DEFAULT_MAX_DEPTH,
            unresolved: BTreeSet::new(),
        })
    }

    /// Overrides the instance-expansion depth limit.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Subcircuit names that were referenced but never defined, collected
    /// across all flattening operations run on this analyzer.
    pub fn unresolved_subckts(&self) -> &BTreeSet<ArcStr> {
        &self.unresolved
    }

    /// Determines the root component list.
    ///
    /// Priority: explicit top-cell override, then the circuit's own
    /// top-level components, then an auto-detected top cell, then empty.
    fn root_components(&self) -> AnalyzerResult<Vec<Component>> {
        if let Some(name) = &self.top_cell {
            let subckt = self
                .circuit
                .subckt(name)
                .ok_or_else(|| AnalyzerError::UnknownTopCell(name.clone()))?;
            return Ok(subckt.components.clone());
        }
        if !self.circuit.components.is_empty() {
            return Ok(self.circuit.components.clone());
        }
        Ok(self
            .find_top_cell()
            .map(|subckt| subckt.components.clone())
            .unwrap_or_default())
    }

    /// Names of subcircuits never instantiated by another subcircuit,
    /// sorted.
    ///
    /// The reference graph is static and one level deep; top-level
    /// instances do not disqualify a root.
    pub fn top_cells(&self) -> Vec<ArcStr> {
        let referenced: BTreeSet<&str> = self
            .circuit
            .subcircuits
            .values()
            .flat_map(|subckt| subckt.components.iter())
            .filter_map(|c| c.instance_child().map(ArcStr::as_str))
            .collect();
        self.circuit
            .subcircuits
            .keys()
            .filter(|name| !referenced.contains(name.as_str()))
            .cloned()
            .sorted()
            .collect()
    }

    /// Finds the design root when the circuit has no top-level components.
    ///
    /// A unique root wins outright. Multiple roots tie-break on the
    /// lexicographically smallest name, which is arbitrary but
    /// deterministic.
    pub fn find_top_cell(&self) -> Option<&'a Subckt> {
        let roots = self.top_cells();
        self.circuit.subckt(roots.first()?)
    }

    /// Classifies a component.
    pub fn classify(&self, component: &Component) -> ComponentClass {
        let child = match &component.kind {
            ComponentKind::Res { .. } => return ComponentClass::Resistor,
            ComponentKind::Cap { .. } => return ComponentClass::Capacitor,
            ComponentKind::Ind { .. } => return ComponentClass::Inductor,
            ComponentKind::Mos { .. } => return ComponentClass::Mosfet,
            ComponentKind::Bjt { .. } => return ComponentClass::Bjt,
            ComponentKind::Diode { .. } => return ComponentClass::Diode,
            ComponentKind::Vsource { .. } => return ComponentClass::VoltageSource,
            ComponentKind::Isource { .. } => return ComponentClass::CurrentSource,
            ComponentKind::Instance { child } => child,
        };
        if let Some(subckt) = self.circuit.subckt(child) {
            if !subckt.is_blackbox() {
                return ComponentClass::SubcktInstance;
            }
        }
        // Leaf or unresolved: infer a primitive from the referenced name.
        let name = child.to_lowercase();
        if (name.contains("fet") || name.contains("mos"))
            && component.params.contains_key_ignore_case("w")
            && component.params.contains_key_ignore_case("l")
        {
            return ComponentClass::Mosfet;
        }
        if name.contains("bjt") || name.contains("npn") || name.contains("pnp") {
            return ComponentClass::Bjt;
        }
        if name.contains("diode") {
            return ComponentClass::Diode;
        }
        ComponentClass::SubcktInstance
    }

    /// Classification counts over the root component list, without
    /// flattening.
    pub fn stats(&self) -> AnalyzerResult<BTreeMap<ComponentClass, usize>> {
        let roots = self.root_components()?;
        Ok(self.count_classes(roots.iter()))
    }

    /// Classification counts over the flattened circuit.
    pub fn hierarchical_stats(&mut self) -> AnalyzerResult<BTreeMap<ComponentClass, usize>> {
        let flat = self.flatten()?;
        Ok(self.count_classes(flat.components.iter()))
    }

    fn count_classes<'b>(
        &self,
        components: impl Iterator<Item = &'b Component>,
    ) -> BTreeMap<ComponentClass, usize> {
        let mut counts = BTreeMap::new();
        for component in components {
            *counts.entry(self.classify(component)).or_insert(0) += 1;
        }
        counts
    }

    /// The number of transistors (MOSFETs plus BJTs) in the flattened
    /// circuit.
    pub fn transistor_count(&mut self) -> AnalyzerResult<usize> {
        let flat = self.flatten()?;
        Ok(flat
            .components
            .iter()
            .filter(|c| {
                matches!(
                    self.classify(c),
                    ComponentClass::Mosfet | ComponentClass::Bjt
                )
            })
            .count())
    }

    /// Flattens the hierarchy into a new circuit.
    ///
    /// Every structural instance is recursively replaced by its body.
    /// Component names are prefixed with the dot-joined instance path.
    /// Nodes resolve through three rules in order: a port name maps to
    /// the bound actual node, ground literals normalize to `0`, and any
    /// other net is renamed to `instancePath.netName` so that separate
    /// instantiations of the same subcircuit never share a net.
    ///
    /// Instances of undefined or empty (black-box) subcircuits are copied
    /// as opaque leaves with their nodes untouched; undefined references
    /// are additionally recorded on [`Analyzer::unresolved_subckts`].
    pub fn flatten(&mut self) -> AnalyzerResult<Circuit> {
        let mut flat = Circuit::new(arcstr::format!("{}_flat", self.circuit.name));
        flat.models = self.circuit.models.clone();
        let roots = self.root_components()?;
        self.flatten_into(&roots, "", 0, &mut flat)?;
        Ok(flat)
    }

    fn flatten_into(
        &mut self,
        components: &[Component],
        path: &str,
        depth: usize,
        out: &mut Circuit,
    ) -> AnalyzerResult<()> {
        let circuit = self.circuit;
        for component in components {
            let Some(child) = component.instance_child() else {
                out.add_component(reparent(component, path));
                continue;
            };
            let subckt = match circuit.subckt(child) {
                None => {
                    self.unresolved.insert(child.clone());
                    out.add_component(reparent(component, path));
                    continue;
                }
                Some(subckt) if subckt.is_blackbox() => {
                    out.add_component(reparent(component, path));
                    continue;
                }
                Some(subckt) => subckt,
            };
            let instance_path = join_path(path, &component.name);
            if depth >= self.max_depth {
                return Err(AnalyzerError::RecursionLimit {
                    path: instance_path.to_string(),
                    limit: self.max_depth,
                });
            }
            // Bind ports to actuals positionally. If the two lists differ
            // in length, excess entries on either side are dropped.
            let bindings: HashMap<&str, &ArcStr> = subckt
                .ports
                .iter()
                .map(ArcStr::as_str)
                .zip(component.nodes.iter())
                .collect();
            let mut body = subckt.components.clone();
            for sub in &mut body {
                for node in &mut sub.nodes {
                    if let Some(&actual) = bindings.get(node.as_str()) {
                        *node = actual.clone();
                    } else if is_ground(node.as_str()) {
                        *node = arcstr::literal!("0");
                    } else {
                        let renamed = arcstr::format!("{instance_path}.{node}");
                        *node = renamed;
                    }
                }
            }
            self.flatten_into(&body, &instance_path, depth + 1, out)?;
        }
        Ok(())
    }

    /// Model usage counts over the flattened circuit.
    ///
    /// Components with a model reference count under the model name.
    /// Surviving instances (necessarily leaves) count under the
    /// referenced subcircuit name, which stands in for a device model in
    /// CDL-extracted netlists.
    pub fn model_usage(&mut self) -> AnalyzerResult<BTreeMap<ArcStr, usize>> {
        let flat = self.flatten()?;
        let mut usage = BTreeMap::new();
        for component in &flat.components {
            let key = match (component.model(), component.instance_child()) {
                (Some(model), _) => model,
                (None, Some(child)) => child,
                (None, None) => continue,
            };
            *usage.entry(key.clone()).or_insert(0) += 1;
        }
        Ok(usage)
    }

    /// Names of subcircuits whose direct body references the given model,
    /// sorted and duplicate-free.
    ///
    /// The scan is one level deep. A match among the circuit's own
    /// top-level components records the circuit's name.
    pub fn subckts_using_model(&self, model: &str) -> Vec<ArcStr> {
        let uses = |components: &[Component]| {
            components
                .iter()
                .any(|c| c.model().is_some_and(|m| m.as_str() == model))
        };
        let mut found = BTreeSet::new();
        for subckt in self.circuit.subcircuits.values() {
            if uses(&subckt.components) {
                found.insert(subckt.name.clone());
            }
        }
        if uses(&self.circuit.components) {
            found.insert(self.circuit.name.clone());
        }
        found.into_iter().collect()
    }

    /// Renders the hierarchy as an ASCII tree restricted to
    /// subcircuit-instance edges.
    pub fn hierarchy_tree(&self) -> AnalyzerResult<String> {
        let roots = self.root_components()?;
        let root_name = self.top_cell.as_ref().unwrap_or(&self.circuit.name);
        let mut out = String::new();
        out.push_str(root_name);
        out.push('\n');
        self.tree_level(&roots, "", root_name, 0, &mut out)?;
        Ok(out)
    }

    fn tree_level(
        &self,
        components: &[Component],
        prefix: &str,
        path: &str,
        depth: usize,
        out: &mut String,
    ) -> AnalyzerResult<()> {
        let instances: Vec<_> = components
            .iter()
            .filter_map(|c| c.instance_child().map(|child| (c, child)))
            .sorted_by_key(|(c, _)| c.name.clone())
            .collect();
        let count = instances.len();
        for (i, (instance, child)) in instances.into_iter().enumerate() {
            let last = i + 1 == count;
            out.push_str(prefix);
            out.push_str(if last { "└── " } else { "├── " });
            out.push_str(&format!("{} ({})\n", instance.name, child));
            if let Some(subckt) = self.circuit.subckt(child) {
                let child_path = join_path(path, &instance.name);
                if depth >= self.max_depth {
                    return Err(AnalyzerError::RecursionLimit {
                        path: child_path.to_string(),
                        limit: self.max_depth,
                    });
                }
                let child_prefix = format!("{prefix}{}", if last { "    " } else { "│   " });
                self.tree_level(&subckt.components, &child_prefix, &child_path, depth + 1, out)?;
            }
        }
        Ok(())
    }
}

/// Copies a component, prefixing its name with the enclosing instance
/// path. Nodes are left untouched.
fn reparent(component: &Component, path: &str) -> Component {
    let mut copy = component.clone();
    copy.name = join_path(path, &component.name);
    copy
}

fn join_path(path: &str, name: &str) -> ArcStr {
    if path.is_empty() {
        ArcStr::from(name)
    } else {
        arcstr::format!("{path}.{name}")
    }
}
