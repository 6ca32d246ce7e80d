//! Photocloud
//!
//! Turns photographs into colored PLY point clouds.
//!
//! - `photocloud run`: reconstruct images (or re-serve a PLY) through the task orchestrator
//! - `photocloud inspect`: summarize a PLY file

mod app;

use clap::{Parser, Subcommand};
use photocloud_recon::DepthModel;
use std::path::PathBuf;

/// Photocloud - 3D point clouds from ordinary photographs
#[derive(Parser, Debug)]
#[command(name = "photocloud")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconstruct a point cloud from images, or store a PLY upload
    Run(RunArgs),
    /// Print the header summary and bounds of a PLY file
    Inspect {
        /// PLY file to read
        file: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Image files, directories of images, or a single PLY file
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Copy the finished artifact to this .ply path
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Depth model (small, hybrid, large)
    #[arg(short, long)]
    model: Option<DepthModel>,

    /// Skip structure from motion and always use monocular depth
    #[arg(long)]
    no_sfm: bool,

    /// JSON service configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write ASCII instead of binary PLY
    #[arg(long)]
    ascii: bool,

    /// Directory for task artifacts
    #[arg(long)]
    storage_dir: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    let result = match args.command {
        Command::Run(run) => app::run(app::RunOptions {
            inputs: run.inputs,
            output: run.output,
            model: run.model,
            no_sfm: run.no_sfm,
            config: run.config,
            ascii: run.ascii,
            storage_dir: run.storage_dir,
        }),
        Command::Inspect { file } => app::inspect(&file),
    };

    if let Err(e) = result {
        eprintln!("photocloud error: {}", e);
        std::process::exit(1);
    }
}
