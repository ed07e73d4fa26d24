// ========================================================================================
//
//                       The stage orchestrator for pdx-classifier
//
// ========================================================================================
//
// This binary is a thin conductor over the library. It parses the command line,
// loads and validates the pipeline config, runs the requested stage (or all three
// in order) and turns the outcome into an exit code.
//
// Every stage persists its outputs, so each subcommand can be re-run on its own:
//
// 1.  `apply`    - expression matrix + classifiers -> classifier_scores.tsv
// 2.  `evaluate` - scores + annotations -> metrics, curves, distributions, figures
// 3.  `explore`  - scores + annotations -> outlier and variant tables
// 4.  `run`      - 1, 2 and 3 in order, halting at the first failure

use clap::{Parser, Subcommand};
use pdx_classifier::config::PipelineConfig;
use pdx_classifier::evaluate;
use pdx_classifier::explore;
use pdx_classifier::pipeline;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Instant;

// ========================================================================================
//                          Command-line interface definition
// ========================================================================================

#[derive(Parser)]
#[command(
    name = "pdx-classifier",
    version,
    about = "Apply pretrained Ras and TP53 classifiers to PDX expression data and evaluate the predictions"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Score every sample with every classifier (outputs: classifier_scores.tsv)")]
    Apply {
        #[arg(long, default_value = "pipeline.toml")]
        config: PathBuf,
    },
    #[command(about = "Compute AUROC, AUPR, t-tests, distributions and figures")]
    Evaluate {
        #[arg(long, default_value = "pipeline.toml")]
        config: PathBuf,
    },
    #[command(about = "Tabulate outlier samples and per-variant score summaries")]
    Explore {
        #[arg(long, default_value = "pipeline.toml")]
        config: PathBuf,
    },
    #[command(about = "Run apply, evaluate and explore in order")]
    Run {
        #[arg(long, default_value = "pipeline.toml")]
        config: PathBuf,
    },
}

// ========================================================================================
//                            Main orchestration logic
// ========================================================================================

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let start_time = Instant::now();
    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Apply { config } => with_config(config, apply_command),
        Commands::Evaluate { config } => with_config(config, evaluate_command),
        Commands::Explore { config } => with_config(config, explore_command),
        Commands::Run { config } => with_config(config, |c| {
            apply_command(c)?;
            evaluate_command(c)?;
            explore_command(c)
        }),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
    eprintln!("> Finished in {:.2?}", start_time.elapsed());
}

fn with_config<F>(path: &Path, command: F) -> Result<(), Box<dyn Error>>
where
    F: FnOnce(&PipelineConfig) -> Result<(), Box<dyn Error>>,
{
    eprintln!("> Loading pipeline config: {}", path.display());
    let config = PipelineConfig::load(path)?;
    command(&config)
}

fn apply_command(config: &PipelineConfig) -> Result<(), Box<dyn Error>> {
    let outcome = pipeline::run_apply_stage(config)?;
    eprintln!(
        "> Scored {} samples with {} classifiers. Results: {}",
        outcome.scores.num_samples(),
        outcome.scores.classifiers.len(),
        config.output.results_dir.display()
    );
    Ok(())
}

fn evaluate_command(config: &PipelineConfig) -> Result<(), Box<dyn Error>> {
    let report = evaluate::run_evaluation_stage(config)?;
    eprintln!(
        "> Evaluated {} classifiers. Figures: {}",
        report.classifiers.len(),
        config.output.figures_dir.display()
    );
    Ok(())
}

fn explore_command(config: &PipelineConfig) -> Result<(), Box<dyn Error>> {
    let report = explore::run_exploration_stage(config)?;
    eprintln!(
        "> Found {} outlier samples across {} variant groups.",
        report.outliers.len(),
        report.variant_summary.len()
    );
    Ok(())
}
