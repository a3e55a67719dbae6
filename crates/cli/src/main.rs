//! Biocluster CLI - cluster GBIF occurrence exports
//!
//! Reads `occurrence.txt` / `multimedia.txt`, runs the clustering pipeline and
//! writes the layout and labels as JSON.

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use rayon::ThreadPoolBuilder;
use std::process::ExitCode;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

mod commands;

use commands::run::RunCommand;

#[derive(Parser)]
#[command(
    name = "biocluster",
    version,
    about = "Unsupervised clustering of biodiversity occurrence records",
    long_about = "Join GBIF occurrences with their media links, standardize the numeric\n\
                  features, pick a cluster count by silhouette sweep and cluster with\n\
                  k-means, agglomerative merging or DBSCAN. Every record also gets a\n\
                  2-D layout position for plotting.",
    after_help = "EXAMPLES:\n  \
                  # List strategies and the parameters they read\n  \
                  biocluster algorithms\n\n  \
                  # k-means with the cluster count chosen automatically\n  \
                  biocluster run --occurrences occurrence.txt --multimedia multimedia.txt --algorithm kmeans\n\n  \
                  # DBSCAN on coordinates only\n  \
                  biocluster run --occurrences occurrence.txt --algorithm dbscan \\\n      \
                  --columns decimalLatitude,decimalLongitude --params '{\"eps\": 0.3}'"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Cluster an occurrence export and write the result as JSON
    Run(RunCommand),

    /// List clustering strategies
    Algorithms,
}

fn main() -> Result<ExitCode> {
    // Size the rayon pool from the environment so batch runs can share a host
    if let Ok(threads_str) = std::env::var("BIOCLUSTER_THREADS") {
        if let Ok(num_threads) = threads_str.parse::<usize>() {
            ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .build_global()
                .ok(); // Ignore error if already initialized
        }
    }

    let cli = Cli::parse();

    let log_level = match &cli.command {
        Commands::Algorithms => Level::WARN,
        _ => {
            if cli.verbose {
                Level::DEBUG
            } else {
                Level::INFO
            }
        }
    };

    // Logs go to stderr; stdout carries the JSON result
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    match cli.command {
        Commands::Run(cmd) => cmd.execute(),
        Commands::Algorithms => {
            commands::algorithms::list_algorithms();
            Ok(ExitCode::SUCCESS)
        }
    }
}
