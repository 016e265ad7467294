use anyhow::Context;
use clap::Parser;
use dotenv::dotenv;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use gantry_rs::cicd::pipeline::{run_pipeline, PipelineError};
use gantry_rs::cicd::state::{self, keys};
use gantry_rs::cicd::{PipelineConfig, ProcessRunner};
use gantry_rs::graph::State;

#[derive(Parser, Debug)]
#[command(author, version, about = "CI/CD pipeline for terraform, docker, and helm artifacts", long_about = None)]
struct Args {
    /// Paths to scan for infrastructure files
    #[arg(required = true)]
    paths: Vec<String>,

    /// Maximum auto-fix attempts per category (default: 3)
    #[arg(long)]
    max_fix_attempts: Option<u32>,

    /// Run validations only, skip the release chain
    #[arg(long)]
    dry_run: bool,

    /// Optional YAML config file
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();
    let code = match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            2
        }
    };
    std::process::exit(code);
}

async fn run(args: Args) -> anyhow::Result<i32> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(limit) = args.max_fix_attempts {
        config.max_fix_attempts = limit;
    }
    if args.dry_run {
        config.dry_run = true;
    }

    println!("scanning paths: {}", args.paths.join(", "));
    println!("max fix attempts: {}", config.max_fix_attempts);
    if config.dry_run {
        println!("dry run: validations only");
    }

    let runner = Arc::new(ProcessRunner::new(Duration::from_secs(
        config.command_timeout_secs,
    )));

    let code = match run_pipeline(&args.paths, &config, runner).await {
        Ok(final_state) => {
            print_summary(&final_state);
            if state::status(&final_state) == "success" {
                0
            } else {
                1
            }
        }
        Err(PipelineError::Run(run_error)) => {
            eprintln!("execution aborted: {}", run_error);
            print_summary(&run_error.state);
            1
        }
        Err(e) => {
            // Structural defects surface before anything executes.
            eprintln!("{}", e);
            2
        }
    };
    Ok(code)
}

fn print_summary(state: &State) {
    println!();
    println!("status: {}", state::status(state));

    let images: Vec<String> = state.get_as(keys::DOCKER_IMAGES_BUILT).unwrap_or_default();
    if !images.is_empty() {
        println!("docker images built:");
        for image in &images {
            println!("  - {}", image);
        }
    }

    let charts: Vec<String> = state.get_as(keys::HELM_CHARTS_RELEASED).unwrap_or_default();
    if !charts.is_empty() {
        println!("helm charts released:");
        for chart in &charts {
            println!("  - {}", chart);
        }
    }

    let applied = state
        .get(keys::TERRAFORM_APPLIED)
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    println!("terraform applied: {}", applied);

    if let Some(message) = state.get(keys::ERROR_MESSAGE).and_then(|v| v.as_str()) {
        println!("error: {}", message);
    }
}
