//! SPICE/CDL netlist data model and hierarchical analysis.
//!
//! This crate parses analog/mixed-signal netlists written in SPICE-family
//! dialects (including CDL and HSPICE conventions) into a typed circuit
//! representation, then analyzes the subcircuit hierarchy: flattening
//! instances into a single scoped netlist, classifying components
//! (including leaf subcircuits standing in for transistors and diodes),
//! and indexing model usage for LVS-style verification workflows.
//!
//! Parameter values and device values are retained as literal strings.
//! They are never evaluated arithmetically.
#![warn(missing_docs)]

pub mod analyzer;
pub mod diagnostics;
pub mod parser;


use arcstr::ArcStr;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use unicase::UniCase;

/// The canonical name of the global ground net.
pub const GROUND: &str = "0";

/// Returns `true` if the given node name denotes the global ground net.
///
/// The literal `0` and any case variant of `GND` both denote ground.
pub fn is_ground(node: &str) -> bool {
    node == GROUND || UniCase::new(node) == UniCase::new("GND")
}

/// The root of a parsed netlist.
#[derive(Debug, Default, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Circuit {
    /// The name of the circuit.
    pub name: ArcStr,
    /// Components defined at the top level, in source order.
    pub components: Vec<Component>,
    /// Subcircuit definitions, keyed by name.
    ///
    /// Names are expected to be unique. A redefinition replaces the
    /// earlier definition (last wins) and is reported via `tracing`.
    pub subcircuits: IndexMap<ArcStr, Subckt>,
    /// Model definitions, keyed by name.
    pub models: IndexMap<ArcStr, Model>,
    /// Parameters declared with `.PARAM` at the top level.
    ///
    /// Values are literal strings and may contain unevaluated expressions.
    pub parameters: IndexMap<ArcStr, ArcStr>,
    /// Paths referenced by `.INCLUDE`/`.LIB` statements, recorded verbatim
    /// in source order.
    pub includes: Vec<ArcStr>,
}

impl Circuit {
    /// Creates a new, empty circuit with the given name.
    pub fn new(name: impl Into<ArcStr>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Appends a component to the top level of the circuit.
    pub fn add_component(&mut self, component: Component) {
        self.components.push(component);
    }

    /// Adds a subcircuit definition.
    ///
    /// If a definition with the same name already exists, the new one
    /// replaces it.
    pub fn add_subckt(&mut self, subckt: Subckt) {
        let name = subckt.name.clone();
        if self.subcircuits.insert(name.clone(), subckt).is_some() {
            tracing::warn!(name=%name, "duplicate subcircuit definition; the last one found will be used");
        }
    }

    /// Adds a model definition.
    pub fn add_model(&mut self, model: Model) {
        self.models.insert(model.name.clone(), model);
    }

    /// Looks up a subcircuit definition by name.
    pub fn subckt(&self, name: &str) -> Option<&Subckt> {
        self.subcircuits.get(name)
    }

    /// Looks up a model definition by name.
    pub fn model(&self, name: &str) -> Option<&Model> {
        self.models.get(name)
    }
}

/// A subcircuit definition.
#[derive(Debug, Default, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Subckt {
    /// The subcircuit name.
    pub name: ArcStr,
    /// The external interface, in declaration order.
    ///
    /// Instances bind actual nodes to these ports positionally.
    pub ports: Vec<ArcStr>,
    /// The body of the subcircuit, in source order.
    ///
    /// An empty body marks a black-box primitive (e.g. a transistor whose
    /// real definition lives outside the netlist) and is never expanded.
    pub components: Vec<Component>,
    /// Parameter defaults declared inline on the `.SUBCKT` line.
    pub parameters: IndexMap<ArcStr, ArcStr>,
}

impl Subckt {
    /// Creates a new subcircuit with the given name and no ports.
    pub fn new(name: impl Into<ArcStr>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Returns `true` if this subcircuit has no body.
    pub fn is_blackbox(&self) -> bool {
        self.components.is_empty()
    }

    /// Appends a component to the subcircuit body.
    pub fn add_component(&mut self, component: Component) {
        self.components.push(component);
    }
}

/// A circuit component.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Component {
    /// The instance name, e.g. `R1` or `Xinv0`.
    pub name: ArcStr,
    /// The nodes this component connects to, in positional order.
    pub nodes: Vec<ArcStr>,
    /// Trailing `key=value` parameters.
    pub params: Params,
    /// The kind-specific payload.
    pub kind: ComponentKind,
}

impl Component {
    /// Returns the model referenced by this component, if it has one.
    pub fn model(&self) -> Option<&ArcStr> {
        match &self.kind {
            ComponentKind::Mos { model }
            | ComponentKind::Bjt { model }
            | ComponentKind::Diode { model } => Some(model),
            _ => None,
        }
    }

    /// Returns the referenced subcircuit name if this is an instance.
    pub fn instance_child(&self) -> Option<&ArcStr> {
        match &self.kind {
            ComponentKind::Instance { child } => Some(child),
            _ => None,
        }
    }

    /// Returns `true` if this component is a subcircuit instance.
    pub fn is_instance(&self) -> bool {
        matches!(self.kind, ComponentKind::Instance { .. })
    }
}

/// The closed set of component kinds.
///
/// Values are literal strings from the source netlist.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum ComponentKind {
    /// A resistor (declared with an `R`).
    Res {
        /// The resistance value.
        value: ArcStr,
    },
    /// A capacitor (declared with a `C`).
    Cap {
        /// The capacitance value.
        value: ArcStr,
    },
    /// An inductor (declared with an `L`).
    Ind {
        /// The inductance value.
        value: ArcStr,
    },
    /// A MOSFET (declared with an `M`).
    Mos {
        /// The name of the associated MOSFET model.
        model: ArcStr,
    },
    /// A bipolar junction transistor (declared with a `Q`).
    Bjt {
        /// The name of the associated BJT model.
        model: ArcStr,
    },
    /// A diode (declared with a `D`).
    Diode {
        /// The name of the associated diode model.
        model: ArcStr,
    },
    /// A voltage source (declared with a `V`).
    Vsource {
        /// The DC value.
        dc: ArcStr,
        /// The AC value, if one was given.
        ac: Option<ArcStr>,
    },
    /// A current source (declared with an `I`).
    Isource {
        /// The DC value.
        dc: ArcStr,
    },
    /// An instance of a subcircuit (declared with an `X`).
    Instance {
        /// The name of the instantiated subcircuit.
        child: ArcStr,
    },
}

/// A `.MODEL` definition.
///
/// Models are descriptive only; they are never expanded.
#[derive(Debug, Default, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Model {
    /// The model name.
    pub name: ArcStr,
    /// The model type tag, e.g. `nmos`.
    pub model_type: ArcStr,
    /// Model parameters.
    pub parameters: IndexMap<ArcStr, ArcStr>,
}

/// Component parameter values.
#[derive(Debug, Default, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Params {
    values: IndexMap<ArcStr, ArcStr>,
    extra: Vec<ArcStr>,
}

impl Params {
    /// Creates a new, empty parameter set.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a key-value pair into the parameter set.
    pub fn insert(&mut self, k: impl Into<ArcStr>, v: impl Into<ArcStr>) {
        self.values.insert(k.into(), v.into());
    }

    /// Gets the value corresponding to the given key.
    pub fn get(&self, k: &str) -> Option<&ArcStr> {
        self.values.get(k)
    }

    /// Returns `true` if a key matching `k` case-insensitively is present.
    pub fn contains_key_ignore_case(&self, k: &str) -> bool {
        let k = UniCase::new(k);
        self.values.keys().any(|key| UniCase::new(key.as_str()) == k)
    }

    /// Records a positional token that carried no `=`.
    pub fn push_extra(&mut self, token: impl Into<ArcStr>) {
        self.extra.push(token.into());
    }

    /// The positional tokens that carried no `=`, in source order.
    pub fn extra(&self) -> &[ArcStr] {
        &self.extra
    }

    /// An iterator over all key-value pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&ArcStr, &ArcStr)> {
        self.values.iter()
    }

    /// The number of key-value pairs.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if there are no key-value pairs and no extra tokens.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.extra.is_empty()
    }
}
