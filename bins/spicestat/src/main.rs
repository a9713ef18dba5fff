use anyhow::Context;
use clap::Parser as ClapParser;
use netlist::analyzer::Analyzer;
use netlist::parser::Parser;
use std::path::PathBuf;

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    spicestat(args)
}

/// Arguments to [`spicestat`].
#[derive(ClapParser)]
#[command(
    version,
    about,
    long_about = "Parse a SPICE/CDL netlist and report structural statistics"
)]
pub struct Args {
    /// The path to the input netlist.
    file: PathBuf,
    /// Print component statistics, top-level and flattened.
    #[arg(long)]
    stats: bool,
    /// Flatten the hierarchy and print the resulting components.
    #[arg(long)]
    flatten: bool,
    /// Count transistors (MOS + BJT) in the flattened circuit.
    #[arg(long)]
    count_transistors: bool,
    /// Count usage of each device model in the flattened circuit.
    #[arg(long)]
    model_usage: bool,
    /// Find all subcircuits that directly use the given model.
    #[arg(long, value_name = "MODEL_NAME")]
    find_model: Option<String>,
    /// Print the hierarchy tree (subcircuit instances only).
    #[arg(long)]
    tree: bool,
    /// List subcircuits never instantiated by another subcircuit.
    #[arg(long)]
    list_top_cells: bool,
    /// The subcircuit to analyze as the design root.
    #[arg(long, value_name = "TOP_CELL_NAME")]
    top_cell: Option<String>,
}

/// Parse the given netlist and print the selected reports.
pub fn spicestat(args: Args) -> anyhow::Result<()> {
    println!("parsing {:?}...", &args.file);
    let parsed = Parser::parse_file(&args.file).with_context(|| "Failed to parse input netlist.")?;
    for issue in parsed.issues.iter() {
        eprintln!("{issue}");
    }
    println!("parsed circuit: {}", parsed.circuit.name);

    let mut analyzer = Analyzer::new(&parsed.circuit, args.top_cell.as_deref())
        .with_context(|| "Failed to construct analyzer.")?;

    if args.stats {
        println!("\n--- Component Statistics (Top Level) ---");
        let stats = analyzer.stats().with_context(|| "Failed to compute statistics.")?;
        for (class, count) in &stats {
            println!("{class}: {count}");
        }

        println!("\n--- Component Statistics (Hierarchical/Flattened) ---");
        let stats = analyzer
            .hierarchical_stats()
            .with_context(|| "Failed to compute hierarchical statistics.")?;
        for (class, count) in &stats {
            println!("{class}: {count}");
        }
    }

    if args.count_transistors {
        let count = analyzer
            .transistor_count()
            .with_context(|| "Failed to count transistors.")?;
        println!("\nTotal transistors (flattened): {count}");
    }

    if args.model_usage {
        println!("\n--- Model Usage (Flattened) ---");
        let usage = analyzer
            .model_usage()
            .with_context(|| "Failed to compute model usage.")?;
        for (model, count) in &usage {
            println!("{model}: {count}");
        }

        if !analyzer.unresolved_subckts().is_empty() {
            println!("\n[WARNING] The following subcircuits were instantiated but never defined (treated as black boxes):");
            for name in analyzer.unresolved_subckts() {
                println!("  - {name}");
            }
            println!("  (Statistics may be incomplete if they contain devices.)");
        }
    }

    if let Some(ref model) = args.find_model {
        println!("\n--- Subcircuits using model '{model}' ---");
        let subckts = analyzer.subckts_using_model(model);
        if subckts.is_empty() {
            println!("No subcircuits found using this model.");
        } else {
            for name in subckts {
                println!("{name}");
            }
        }
    }

    if args.tree {
        println!("\n--- Circuit Hierarchy ---");
        let tree = analyzer
            .hierarchy_tree()
            .with_context(|| "Failed to render hierarchy.")?;
        print!("{tree}");
    }

    if args.list_top_cells {
        println!("\n--- Top Cells (Roots of Hierarchy) ---");
        let roots = analyzer.top_cells();
        if roots.is_empty() {
            println!("No subcircuits found (flat design).");
        } else {
            for root in roots {
                println!("{root}");
            }
        }
    }

    if args.flatten {
        println!("\n--- Flattened Netlist Components ---");
        let flat = analyzer
            .flatten()
            .with_context(|| "Failed to flatten the hierarchy.")?;
        for component in &flat.components {
            let nodes = component
                .nodes
                .iter()
                .map(|n| n.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            println!("{} {}", component.name, nodes);
        }
    }

    Ok(())
}
