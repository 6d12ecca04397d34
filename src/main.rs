// Followup - LoRA fine-tuning of small chat models to ask clinical follow-up questions
// Main entry point

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use followup::cli::Tester;
use followup::config::constants::{DEFAULT_ADAPTER_DIR, TRAIN_JSONL_FILE};
use followup::config::{load_config, ExecutionTarget};
use followup::generators::{DistinctQuestionSampler, FollowUpModel};
use followup::models::DevicePolicy;
use followup::training::{prepare_corpus, run_training};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ~/.followup/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Force CPU even when an accelerator is available
    #[arg(long, global = true)]
    cpu: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build the SFT corpus (JSONL) from a dialogue CSV
    Prepare {
        input: PathBuf,

        #[arg(short, long, default_value = TRAIN_JSONL_FILE)]
        output: PathBuf,
    },
    /// Fine-tune a LoRA adapter on a dialogue CSV or a prepared JSONL corpus
    Train {
        input: PathBuf,

        #[arg(short, long, default_value = DEFAULT_ADAPTER_DIR)]
        output: PathBuf,
    },
    /// Chat with a trained adapter
    Chat {
        #[arg(default_value = DEFAULT_ADAPTER_DIR)]
        adapter_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let mut config = load_config(cli.config.as_deref())?;
    if cli.cpu {
        config.device = ExecutionTarget::Cpu;
    }

    match cli.command {
        Commands::Prepare { input, output } => {
            let count = prepare_corpus(&input, &output, &config)?;
            println!("Wrote {} examples to {}", count, output.display());
        }
        Commands::Train { input, output } => {
            let policy = DevicePolicy::detect(config.device)?;
            let report = run_training(&input, &output, &config, &policy)?;
            println!(
                "Saved adapter to {} ({} steps, final loss {:.4})",
                output.display(),
                report.global_step,
                report.final_loss().unwrap_or(0.0)
            );
        }
        Commands::Chat { adapter_dir } => {
            let policy = DevicePolicy::detect(config.device)?;
            let model = FollowUpModel::open(&adapter_dir, &config, &policy)?;
            let sampler = DistinctQuestionSampler::new(config.generation.clone());
            Tester::new(model, sampler).run()?;
        }
    }

    Ok(())
}
