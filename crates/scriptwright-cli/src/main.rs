//! Scriptwright Command Line Interface
//!
//! Usage:
//!   scriptwright generate <topic> --scenes 24   - Generate a script
//!   scriptwright health                         - Show provider key health
//!
//! Provider keys are read from the environment (`OPENAI_API_KEY`,
//! `OPENAI_API_KEY_1`, ... per configured provider).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use scriptwright_lib::core::billing::InMemoryLedger;
use scriptwright_lib::core::credentials::CredentialPool;
use scriptwright_lib::core::jobs::{GenerateJobRequest, JobResult, ScriptService};
use scriptwright_lib::core::settings::{PipelineSettings, SettingsManager};

#[derive(Parser)]
#[command(name = "scriptwright")]
#[command(about = "Batch video script generation across AI providers")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    settings: Option<PathBuf>,

    /// Also write logs to this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a script
    Generate {
        /// What the video is about
        topic: String,
        /// Number of scenes
        #[arg(short = 'n', long, default_value = "12")]
        scenes: u32,
        /// Scenes per batch after the first
        #[arg(short, long)]
        batch_size: Option<u32>,
        /// Provider to try first
        #[arg(short, long)]
        provider: Option<String>,
        /// Idempotency key for billing
        #[arg(short = 'k', long)]
        job_key: Option<String>,
        /// Narration tone
        #[arg(long)]
        tone: Option<String>,
        /// Narration language
        #[arg(long)]
        language: Option<String>,
        /// Credits available to the local ledger
        #[arg(long, default_value = "10000")]
        credits: u64,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show configured providers and key health
    Health {
        /// Send a health-check request to every provider
        #[arg(long)]
        probe: bool,
    },
}

fn load_settings(path: Option<PathBuf>) -> PipelineSettings {
    let manager = match path {
        Some(path) => Some(SettingsManager::from_file(path)),
        None => SettingsManager::default_location(),
    };
    match manager {
        Some(manager) => manager.load(),
        None => {
            warn!("No config directory available, using default settings");
            PipelineSettings::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    scriptwright_lib::init_logging(cli.log_dir.as_deref());

    let settings = load_settings(cli.settings);
    let pool = Arc::new(CredentialPool::from_source(&settings.credential_source()));

    match cli.command {
        Commands::Generate {
            topic,
            scenes,
            batch_size,
            provider,
            job_key,
            tone,
            language,
            credits,
            json,
        } => {
            let ledger = Arc::new(InMemoryLedger::new(credits));
            let service = ScriptService::from_settings(&settings, pool, ledger)
                .context("Failed to set up providers")?;

            let cancel = CancellationToken::new();
            let on_ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, finishing the current batch");
                    on_ctrl_c.cancel();
                }
            });

            let request = GenerateJobRequest {
                topic,
                total_scenes: scenes,
                scenes_per_batch: batch_size,
                preferred_provider: provider,
                job_key,
                tone,
                language,
                seconds_per_scene: None,
            };

            let result = service
                .generate(request, &cancel)
                .await
                .map_err(|e| anyhow::anyhow!(e.to_user_message()))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_result(&result);
            }

            if result.scenes.is_empty() && !result.cancelled {
                bail!("No scenes were generated");
            }
        }
        Commands::Health { probe } => {
            let service = ScriptService::from_settings(
                &settings,
                pool,
                Arc::new(InMemoryLedger::new(0)),
            )?;
            let health = service.health();
            info!(providers = health.len(), "Provider health");

            println!("{:<12} {:<8} {:<17} {:<28} {:>5}", "PROVIDER", "FAMILY", "TIER", "MODEL", "KEYS");
            for entry in health {
                println!(
                    "{:<12} {:<8} {:<17} {:<28} {:>2}/{:<2}",
                    entry.provider,
                    entry.family.to_string(),
                    entry.tier.to_string(),
                    entry.model,
                    entry.available(),
                    entry.total
                );
            }

            if probe {
                println!();
                for (provider, outcome) in service.gateway().probe().await {
                    match outcome {
                        Ok(()) => println!("{:<12} ok", provider),
                        Err(e) => println!("{:<12} {}", provider, e.to_user_message()),
                    }
                }
            }
        }
    }

    Ok(())
}

fn print_result(result: &JobResult) {
    if let Some(title) = &result.title {
        println!("# {}\n", title);
    }
    for scene in &result.scenes {
        if scene.title.is_empty() {
            println!("## Scene {}", scene.scene_number);
        } else {
            println!("## Scene {}: {}", scene.scene_number, scene.title);
        }
        println!("{}", scene.narration);
        if !scene.image_prompt.is_empty() {
            println!("[image] {}", scene.image_prompt);
        }
        println!();
    }

    println!(
        "{} of {} scenes, {} tokens",
        result.scenes.len(),
        result.requested_units,
        result.usage.total_tokens
    );
    if result.degraded {
        for batch in result.batches.iter().filter(|b| b.error.is_some()) {
            println!(
                "skipped scenes {}: {}",
                batch.range,
                batch.error.as_deref().unwrap_or_default()
            );
        }
    }
    if result.cancelled {
        println!("cancelled before all batches ran");
    }
}
