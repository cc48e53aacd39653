//! OpenSHS command-line entry point.
//!
//! ```bash
//! openshs <structure.xyz> [output_dir]
//! ```
//!
//! Reads a starting structure, loads `./openshs.cfg` when present, builds
//! the external evaluator and runs the search to completion. The evaluator
//! command comes from the configuration (`evaluator_command`) and is invoked
//! as `<command> <input_file> <output_file>` per evaluation.

use log::info;
use openshs::evaluator::ExternalEvaluator;
use openshs::{config, io, workflow};
use std::env;
use std::path::Path;
use std::process;

fn print_usage() {
    eprintln!("Usage: openshs <structure.xyz> [output_dir]");
    eprintln!();
    eprintln!("Explores the potential-energy surface around the given structure,");
    eprintln!("writing unique equilibrium structures, transition states and");
    eprintln!("per-path trajectories into the output directory (default: ./shs_run).");
}

fn main() {
    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Stdout)
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage();
        process::exit(if args.len() < 2 { 1 } else { 0 });
    }

    let structure_path = Path::new(&args[1]);
    let out_dir = args
        .get(2)
        .map(String::as_str)
        .unwrap_or("./shs_run")
        .to_string();

    let (charges, coords) = match io::read_xyz(structure_path) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("Error: cannot read {}: {}", structure_path.display(), e);
            process::exit(1);
        }
    };
    info!(
        "read {} atoms from {}",
        charges.len(),
        structure_path.display()
    );

    let cfg = match config::SearchConfig::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error: bad configuration: {}", e);
            process::exit(1);
        }
    };

    let evaluator = ExternalEvaluator::new(cfg.evaluator_command.clone(), &out_dir, charges);

    match workflow::run(&evaluator, &coords, &cfg, Path::new(&out_dir)) {
        Ok(summary) => {
            println!(
                "Search finished: {} equilibrium structures, {} transition states.",
                summary.equilibrium_structures.len(),
                summary.transition_states.len()
            );
        }
        Err(e) => {
            eprintln!("Error: search aborted: {}", e);
            process::exit(1);
        }
    }
}
