//! bookforge CLI
//!
//! Runs the publication pipeline for one book config. Exit status: 0 on
//! success, 2 on configuration or validation failure, 1 on stage or storage
//! failure (resumable with `--resume`).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;

use bookforge::pipeline::{ExistingRunPolicy, Pipeline, RunOptions};
use bookforge::{load_config, PipelineError};

#[derive(Parser)]
#[command(name = "bookforge")]
#[command(version)]
#[command(about = "Automated book publication pipeline with pluggable AI backends")]
struct Cli {
    /// Book configuration YAML file
    #[arg(short, long)]
    config: PathBuf,

    /// Resume a previous run, skipping completed stages
    #[arg(short, long)]
    resume: bool,

    /// Run with mock backends (no external services required)
    #[arg(short, long)]
    mock: bool,

    /// Directory for run outputs and the cumulative cost file
    #[arg(long, default_value = "output", env = "BOOKFORGE_OUTPUT_DIR")]
    output_dir: PathBuf,

    /// Refuse to overwrite an already-completed run instead of starting over
    #[arg(long)]
    keep_existing: bool,
}

const EXIT_STAGE_FAILURE: u8 = 1;
const EXIT_CONFIG_FAILURE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{} {}", "config error:".red().bold(), err);
            return ExitCode::from(EXIT_CONFIG_FAILURE);
        }
    };

    if cli.mock {
        println!("{}", "running with mock backends".yellow());
    }

    let options = RunOptions {
        resume: cli.resume,
        mock: cli.mock,
        output_root: cli.output_dir.clone(),
        on_existing: if cli.keep_existing {
            ExistingRunPolicy::Reject
        } else {
            ExistingRunPolicy::Overwrite
        },
        ..RunOptions::default()
    };

    let mut pipeline = match Pipeline::new(config, options) {
        Ok(pipeline) => pipeline,
        Err(err) => {
            eprintln!("{} {}", "config error:".red().bold(), err);
            return ExitCode::from(EXIT_CONFIG_FAILURE);
        }
    };

    match pipeline.run().await {
        Ok(manifest) => {
            println!();
            println!("{}", "book generated".green().bold());
            println!(
                "{} {}",
                "manifest:".cyan(),
                pipeline.paths().manifest().display()
            );
            println!(
                "{} ${:.4}",
                "estimated cost:".cyan(),
                manifest.cost.total_cost_usd
            );
            if !manifest.quality_check.passed {
                println!("{}", "quality warnings:".yellow().bold());
                for warning in &manifest.quality_check.warnings {
                    println!("  - {warning}");
                }
            }
            ExitCode::SUCCESS
        }
        Err(PipelineError::Config(err)) => {
            eprintln!("{} {}", "config error:".red().bold(), err);
            ExitCode::from(EXIT_CONFIG_FAILURE)
        }
        Err(PipelineError::Stage { stage, source }) => {
            eprintln!("{} {stage} stage failed: {source}", "error:".red().bold());
            eprintln!(
                "completed artifacts are preserved; re-run with {} to continue from here",
                "--resume".bold()
            );
            ExitCode::from(EXIT_STAGE_FAILURE)
        }
        Err(err) => {
            eprintln!("{} {}", "error:".red().bold(), err);
            ExitCode::from(EXIT_STAGE_FAILURE)
        }
    }
}
