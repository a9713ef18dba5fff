use std::collections::BTreeSet;

use arcstr::ArcStr;
use itertools::Itertools;
use test_log::test;

use super::*;
use crate::is_ground;
use crate::parser::Parser;

fn parse(text: &str) -> crate::Circuit {
    Parser::parse("top", text).circuit
}

#[test]
fn stats_counts_top_level_components() {
    let circuit = parse("M1 d g s b nmos\nR1 1 0 1k\n");
    let analyzer = Analyzer::new(&circuit, None).unwrap();
    let stats = analyzer.stats().unwrap();
    assert_eq!(stats[&ComponentClass::Mosfet], 1);
    assert_eq!(stats[&ComponentClass::Resistor], 1);
}

#[test]
fn flatten_binds_ports_and_prefixes_names() {
    let circuit = parse(".subckt inv in out\nM1 out in 0 0 nmos\n.ends\n\nX1 a b inv\n");
    let mut analyzer = Analyzer::new(&circuit, None).unwrap();
    let flat = analyzer.flatten().unwrap();

    assert_eq!(flat.components.len(), 1);
    let m1 = &flat.components[0];
    assert_eq!(m1.name, "X1.M1");
    // out -> b, in -> a, ground stays ground.
    assert_eq!(m1.nodes, vec!["b", "a", "0", "0"]);
}

#[test]
fn flatten_renames_internal_nets_per_instance() {
    let circuit = parse(
        ".subckt leaf p1 p2\nR1 p1 p2 100\n.ends\n\n.subckt branch a b\nX1 a mid leaf\nX2 mid b leaf\n.ends\n\nXtop in out branch\n",
    );
    let mut analyzer = Analyzer::new(&circuit, None).unwrap();
    let flat = analyzer.flatten().unwrap();

    assert_eq!(flat.components.len(), 2);
    let names: Vec<_> = flat.components.iter().map(|c| c.name.clone()).sorted().collect();
    assert_eq!(names, vec!["Xtop.X1.R1", "Xtop.X2.R1"]);

    // `a` binds to the external `in`; `mid` is internal to the branch
    // instance and is scoped under its path.
    let r1 = flat.components.iter().find(|c| c.name == "Xtop.X1.R1").unwrap();
    assert_eq!(r1.nodes, vec!["in", "Xtop.mid"]);
    let r2 = flat.components.iter().find(|c| c.name == "Xtop.X2.R1").unwrap();
    assert_eq!(r2.nodes, vec!["Xtop.mid", "out"]);
}

#[test]
fn sibling_instances_get_disjoint_nets() {
    let circuit = parse(
        ".subckt cell a\nR1 a internal 1k\nC1 internal 0 1p\n.ends\n\nX1 n1 cell\nX2 n2 cell\n",
    );
    let mut analyzer = Analyzer::new(&circuit, None).unwrap();
    let flat = analyzer.flatten().unwrap();

    let nets = |prefix: &str| -> BTreeSet<ArcStr> {
        flat.components
            .iter()
            .filter(|c| c.name.starts_with(prefix))
            .flat_map(|c| c.nodes.iter().cloned())
            .filter(|n| !is_ground(n) && !n.starts_with('n'))
            .collect()
    };
    let x1_nets = nets("X1.");
    let x2_nets = nets("X2.");
    assert!(!x1_nets.is_empty());
    assert!(x1_nets.is_disjoint(&x2_nets));
}

#[test]
fn ground_normalizes_at_any_depth() {
    let circuit = parse(
        ".subckt leaf a\nR1 a GND 1k\n.ends\n\n.subckt mid p\nX1 p leaf\nC1 p gnd 1p\n.ends\n\nXtop n mid\n",
    );
    let mut analyzer = Analyzer::new(&circuit, None).unwrap();
    let flat = analyzer.flatten().unwrap();

    for component in &flat.components {
        let grounds: Vec<_> = component
            .nodes
            .iter()
            .filter(|n| is_ground(n.as_str()))
            .collect();
        assert!(grounds.iter().all(|n| n.as_str() == "0"));
        assert_eq!(grounds.len(), 1, "{} should touch ground once", component.name);
    }
}

#[test]
fn empty_subckt_is_preserved_as_leaf() {
    let circuit = parse(
        ".subckt nfet d g s b\n* Empty leaf cell\n.ends\n\n.subckt top\nX1 1 2 3 0 nfet\n.ends\n",
    );
    let mut analyzer = Analyzer::new(&circuit, None).unwrap();

    let flat = analyzer.flatten().unwrap();
    assert_eq!(flat.components.len(), 1);
    assert_eq!(flat.components[0].instance_child().unwrap(), "nfet");
    assert_eq!(flat.components[0].nodes, vec!["1", "2", "3", "0"]);

    let stats = analyzer.hierarchical_stats().unwrap();
    assert_eq!(stats[&ComponentClass::SubcktInstance], 1);

    let usage = analyzer.model_usage().unwrap();
    assert_eq!(usage["nfet"], 1);
    assert!(analyzer.unresolved_subckts().is_empty());
}

#[test]
fn unresolved_reference_is_kept_and_recorded() {
    let circuit = parse("X1 a b mystery\nR1 a 0 1k\n");
    let mut analyzer = Analyzer::new(&circuit, None).unwrap();
    let flat = analyzer.flatten().unwrap();

    assert_eq!(flat.components.len(), 2);
    assert_eq!(flat.components[0].name, "X1");
    assert!(analyzer.unresolved_subckts().contains("mystery"));
}

#[test]
fn hierarchical_stats_three_levels() {
    let circuit = parse(
        ".subckt leaf a b\nR1 a b 100\n.ends\n\n.subckt sub x y\nX1 x mid leaf\nR2 mid y 200\n.ends\n\nXtop 1 0 sub\n",
    );
    let mut analyzer = Analyzer::new(&circuit, None).unwrap();

    let stats = analyzer.stats().unwrap();
    assert_eq!(stats.get(&ComponentClass::SubcktInstance), Some(&1));
    assert_eq!(stats.get(&ComponentClass::Resistor), None);

    let h_stats = analyzer.hierarchical_stats().unwrap();
    assert_eq!(h_stats.get(&ComponentClass::Resistor), Some(&2));
    assert_eq!(h_stats.get(&ComponentClass::SubcktInstance), None);
}

#[test]
fn leaf_instances_classify_by_heuristics() {
    let circuit = parse(
        ".subckt nfet d g s b\n.ends\n\n.subckt pmos_hvt d g s b\n.ends\n\n.subckt my_bjt c b e\n.ends\n\n.subckt esd_diode n p\n.ends\n\n.subckt simple_block a b\nR1 a b 100\n.ends\n\n.subckt top\nX1 1 2 3 0 nfet W=1u L=0.1u\nX2 1 2 3 0 pmos_hvt w=2u l=0.2u\nX3 1 2 3 0 nfet M=2\nX4 1 2 3 my_bjt\nX5 1 2 esd_diode\nX6 1 2 simple_block\nM1 1 2 3 0 nfet_model\n.ends\n",
    );
    let mut analyzer = Analyzer::new(&circuit, None).unwrap();
    let stats = analyzer.hierarchical_stats().unwrap();

    // X1, X2 (leaf fets with W/L) and the real M1.
    assert_eq!(stats[&ComponentClass::Mosfet], 3);
    assert_eq!(stats[&ComponentClass::Bjt], 1);
    assert_eq!(stats[&ComponentClass::Diode], 1);
    // X3 has a fet name but no W/L, so it stays an instance; X6 is
    // structural and flattens into its resistor.
    assert_eq!(stats[&ComponentClass::SubcktInstance], 1);
    assert_eq!(stats[&ComponentClass::Resistor], 1);
}

#[test]
fn classification_is_idempotent() {
    let circuit = parse(".subckt nfet d g s b\n.ends\nX1 1 2 3 0 nfet W=1u L=0.1u\n");
    let analyzer = Analyzer::new(&circuit, None).unwrap();
    let component = &circuit.components[0];
    assert_eq!(analyzer.classify(component), ComponentClass::Mosfet);
    assert_eq!(analyzer.classify(component), ComponentClass::Mosfet);
}

#[test]
fn flatten_is_deterministic() {
    let text = ".subckt inv in out\nM1 out in 0 0 nmos\n.ends\nX1 a b inv\nX2 b c inv\n";
    let circuit = parse(text);
    let mut a1 = Analyzer::new(&circuit, None).unwrap();
    let mut a2 = Analyzer::new(&circuit, None).unwrap();
    assert_eq!(a1.flatten().unwrap(), a2.flatten().unwrap());
}

#[test]
fn model_usage_counts_flattened_references() {
    let circuit = parse(
        ".model nmos_vtg nmos\n.model pmos_vtg pmos\n\n.subckt inv in out\nM1 out in 0 0 nmos_vtg\nM2 out in 1 1 pmos_vtg\n.ends\n\nX1 a b inv\nX2 b c inv\n",
    );
    let mut analyzer = Analyzer::new(&circuit, None).unwrap();
    let usage = analyzer.model_usage().unwrap();
    assert_eq!(usage["nmos_vtg"], 2);
    assert_eq!(usage["pmos_vtg"], 2);
}

#[test]
fn subckts_using_model_scans_one_level() {
    let circuit = parse(
        ".subckt inv in out\nM1 out in 0 0 nmos_vtg\n.ends\n\n.subckt buf in out\nX1 in mid inv\nX2 mid out inv\n.ends\n\nM9 a b c d nmos_vtg\n",
    );
    let analyzer = Analyzer::new(&circuit, None).unwrap();
    // `buf` only reaches the model through `inv`, so it does not match;
    // the top-level M9 records the circuit's own name.
    assert_eq!(analyzer.subckts_using_model("nmos_vtg"), vec!["inv", "top"]);
    assert!(analyzer.subckts_using_model("no_such_model").is_empty());
}

#[test]
fn top_cells_are_roots_of_the_reference_graph() {
    let circuit = parse(
        ".subckt leaf a\nR1 a 0 1k\n.ends\n\n.subckt mid p\nX1 p leaf\n.ends\n\n.subckt zroot q\nX1 q mid\n.ends\n\n.subckt aroot q\nX1 q mid\n.ends\n",
    );
    let analyzer = Analyzer::new(&circuit, None).unwrap();
    assert_eq!(analyzer.top_cells(), vec!["aroot", "zroot"]);
    // Multi-root tie-break picks the lexicographically smallest.
    assert_eq!(analyzer.find_top_cell().unwrap().name, "aroot");
}

#[test]
fn auto_detected_top_cell_feeds_flatten() {
    let circuit = parse(".subckt only a\nR1 a 0 1k\n.ends\n");
    let mut analyzer = Analyzer::new(&circuit, None).unwrap();
    let flat = analyzer.flatten().unwrap();
    assert_eq!(flat.components.len(), 1);
    assert_eq!(flat.components[0].name, "R1");
}

#[test]
fn explicit_top_cell_overrides_top_level() {
    let circuit = parse(".subckt blk a\nC1 a 0 1p\n.ends\nR1 x 0 1k\n");
    let mut analyzer = Analyzer::new(&circuit, Some("blk")).unwrap();
    let flat = analyzer.flatten().unwrap();
    assert_eq!(flat.components.len(), 1);
    assert_eq!(flat.components[0].name, "C1");
}

#[test]
fn unknown_top_cell_fails_construction() {
    let circuit = parse("R1 1 0 1k\n");
    let err = Analyzer::new(&circuit, Some("nope")).unwrap_err();
    match err {
        AnalyzerError::UnknownTopCell(name) => assert_eq!(name, "nope"),
        _ => panic!("match failed"),
    }
}

#[test]
fn cyclic_hierarchy_hits_recursion_limit() {
    let circuit = parse(".subckt ring a\nX1 a ring\n.ends\nXtop n ring\n");
    let mut analyzer = Analyzer::new(&circuit, None).unwrap().with_max_depth(8);
    let err = analyzer.flatten().unwrap_err();
    match err {
        AnalyzerError::RecursionLimit { limit, .. } => assert_eq!(limit, 8),
        _ => panic!("match failed"),
    }
}

#[test]
fn port_arity_mismatch_is_tolerated() {
    // Two ports, one bound node: the unbound port's net stays internal.
    let circuit = parse(".subckt pair a b\nR1 a b 1k\n.ends\nX1 n pair\n");
    let mut analyzer = Analyzer::new(&circuit, None).unwrap();
    let flat = analyzer.flatten().unwrap();
    assert_eq!(flat.components.len(), 1);
    assert_eq!(flat.components[0].nodes, vec!["n", "X1.b"]);
}

#[test]
fn transistor_count_spans_mos_and_bjt() {
    let circuit = parse(
        ".subckt amp in out\nM1 out in 0 0 nmos\nQ1 out in 0 bjt_npn\nR1 in out 1k\n.ends\nX1 a b amp\n",
    );
    let mut analyzer = Analyzer::new(&circuit, None).unwrap();
    assert_eq!(analyzer.transistor_count().unwrap(), 2);
}

#[test]
fn hierarchy_tree_renders_instance_edges() {
    let circuit = parse(
        ".subckt leaf a\nR1 a 0 1k\n.ends\n\n.subckt branch p\nX1 p leaf\nX2 p leaf\n.ends\n\nXtop n branch\n",
    );
    let analyzer = Analyzer::new(&circuit, None).unwrap();
    let tree = analyzer.hierarchy_tree().unwrap();
    assert_eq!(
        tree,
        "top\n\
         └── Xtop (branch)\n    \
             ├── X1 (leaf)\n    \
             └── X2 (leaf)\n"
    );
}

#[test]
fn flattened_leaf_keeps_node_count() {
    let circuit = parse(".subckt wrap a b c\nD1 a b dmod\n.ends\nX1 x y z wrap\n");
    let mut analyzer = Analyzer::new(&circuit, None).unwrap();
    let flat = analyzer.flatten().unwrap();
    assert_eq!(flat.components.len(), 1);
    let d1 = &flat.components[0];
    assert_eq!(d1.name, "X1.D1");
    assert_eq!(d1.nodes.len(), 2);
}
