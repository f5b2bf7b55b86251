//! Command-line front-end for super-instruction selection.

use clap::{Parser, Subcommand};
use opfuse_catalog::{build_catalog, load_blocks, CatalogError};
use opfuse_engine::{branch_and_bound, staged_search, SelectionProblem};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
enum CliError {
    #[error("failed to load block catalog: {0}")]
    Catalog(#[from] CatalogError),
}

#[derive(Parser)]
#[command(name = "opfuse", version)]
#[command(about = "Super-instruction selection for bytecode workloads", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Select the super-instruction set with the highest workload savings
    Select {
        /// SQLite database with basic-block frequencies
        #[arg(long, value_name = "FILE")]
        block_db: PathBuf,

        /// Maximum number of super instructions to select
        #[arg(long, default_value = "5")]
        budget: usize,

        /// Number of evaluator threads (0 = all available)
        #[arg(long, default_value = "0")]
        workers: usize,

        /// Discard blocks longer than this many opcodes
        #[arg(long, default_value = "100")]
        max_block_len: usize,

        /// Solve budgets 1..=budget in order, reusing smaller solutions
        #[arg(long)]
        staged: bool,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let filter = if matches!(&cli.command, Commands::Select { verbose: true, .. }) {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();

    let result = match cli.command {
        Commands::Select {
            block_db,
            budget,
            workers,
            max_block_len,
            staged,
            ..
        } => cmd_select(&block_db, budget, workers, max_block_len, staged),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn cmd_select(
    block_db: &Path,
    budget: usize,
    workers: usize,
    max_block_len: usize,
    staged: bool,
) -> Result<(), CliError> {
    let workers = if workers == 0 {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    } else {
        workers
    };

    println!("Loading block infos from {} ...", block_db.display());
    let blocks = load_blocks(block_db, max_block_len)?;
    println!("Loaded {} blocks", blocks.len());

    println!("Creating super-instruction index ...");
    let catalog = build_catalog(&blocks);
    println!("Indexed {} super instructions", catalog.index.len());

    let mut problem = SelectionProblem::from_catalog(catalog, budget);
    let selection = if staged {
        staged_search(&mut problem, workers)
    } else {
        branch_and_bound(&mut problem, workers)
    };

    println!();
    println!("----------------------");
    println!("Best instruction set:");
    if selection.set.is_empty() {
        println!("  <no super instructions>");
    }
    for pos in 0..selection.set.size() {
        println!("  {}", problem.index.get(selection.set.at(pos)));
    }
    println!("Expected savings: {}", selection.savings);

    Ok(())
}
