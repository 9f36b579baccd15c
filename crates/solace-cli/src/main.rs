//! `solace` command-line tool.
//!
//! Loads the runtime configuration and exercises it without the chat
//! front-end: validate settings, run one generation through a profile,
//! count tokens, check the model catalogues, or print the health report.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use solace_core::{ChatMessage, Conversation};
use solace_runtime::{Gateway, HealthChecker, ModelOutcome, ProviderRegistry, SolaceConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(
    name = "solace",
    version,
    about = "Solace AI gateway: check config, run generations, report health"
)]
struct Cli {
    /// YAML config file; defaults plus environment when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration and show the resolved profiles
    CheckConfig,

    /// Run one generation through a profile
    Generate {
        #[arg(short, long, default_value = "dialogue")]
        profile: String,

        #[arg(long)]
        prompt: String,

        /// System instruction for the model
        #[arg(long)]
        system: Option<String>,
    },

    /// Count prompt tokens with a profile's primary provider
    CountTokens {
        #[arg(short, long, default_value = "dialogue")]
        profile: String,

        #[arg(long)]
        prompt: String,
    },

    /// Check that every routed model is offered by its provider
    VerifyModels,

    /// Show provider breaker states
    Health,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .context("invalid --log-level")?;
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config = load_config(cli.config.as_ref())?;
    let registry = ProviderRegistry::with_defaults();

    match cli.command {
        Commands::CheckConfig => check_config(&config, &registry, cli.json),
        Commands::Generate {
            profile,
            prompt,
            system,
        } => generate(&config, &registry, &profile, prompt, system, cli.json).await,
        Commands::CountTokens { profile, prompt } => {
            count_tokens(&config, &registry, &profile, prompt).await
        }
        Commands::VerifyModels => verify_models(&config, &registry, cli.json).await,
        Commands::Health => health(&config, &registry, cli.json).await,
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<SolaceConfig> {
    match path {
        Some(path) => SolaceConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => SolaceConfig::from_env().context("invalid configuration"),
    }
}

fn check_config(config: &SolaceConfig, registry: &ProviderRegistry, json: bool) -> Result<ExitCode> {
    for (kind, description) in registry.descriptions() {
        tracing::debug!(kind, description, "Provider type available");
    }

    let mut problems = 0;
    for (name, provider) in &config.providers {
        match registry.validate(&provider.kind, &provider.settings) {
            Ok(()) => tracing::info!(provider = %name, kind = %provider.kind, "Provider settings ok"),
            Err(err) => {
                problems += 1;
                tracing::error!(provider = %name, kind = %provider.kind, error = %err, "Provider settings invalid");
            }
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(config)?);
    } else {
        print!("{}", serde_yaml::to_string(config)?);
    }

    Ok(if problems == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn generate(
    config: &SolaceConfig,
    registry: &ProviderRegistry,
    profile: &str,
    prompt: String,
    system: Option<String>,
    json: bool,
) -> Result<ExitCode> {
    let gateway = Gateway::from_config(config, registry)?;
    let orchestrator = gateway.profile(profile)?;

    let mut conversation = Conversation::new(vec![ChatMessage::user(prompt)]);
    if let Some(system) = system {
        conversation = conversation.with_system_instruction(system);
    }

    let outcome = orchestrator.generate(&conversation).await;
    gateway.shutdown().await;

    match outcome {
        Ok(generation) => {
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "text": generation.text,
                        "provider": generation.provider,
                        "model": generation.model,
                        "fell_back": generation.fell_back,
                        "usage": generation.usage,
                    }))?
                );
            } else {
                println!("{}", generation.text);
                eprintln!(
                    "[{}/{}{}, {} tokens]",
                    generation.provider,
                    generation.model,
                    if generation.fell_back { ", fallback" } else { "" },
                    generation.usage.total()
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            tracing::error!(error = %err, "Generation failed");
            println!("{}", err.user_message());
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn count_tokens(
    config: &SolaceConfig,
    registry: &ProviderRegistry,
    profile: &str,
    prompt: String,
) -> Result<ExitCode> {
    let gateway = Gateway::from_config(config, registry)?;
    let tokens = gateway
        .profile(profile)?
        .count_tokens(&Conversation::from_prompt(prompt))
        .await
        .context("token count failed")?;
    gateway.shutdown().await;

    println!("{}", tokens);
    Ok(ExitCode::SUCCESS)
}

async fn verify_models(config: &SolaceConfig, registry: &ProviderRegistry, json: bool) -> Result<ExitCode> {
    let gateway = Gateway::from_config(config, registry)?;
    let checks = gateway.verify_models().await;
    gateway.shutdown().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&checks)?);
    } else {
        for check in &checks {
            let line = match &check.outcome {
                ModelOutcome::Available => "all routed models available".to_string(),
                ModelOutcome::Missing { models } => format!("missing {}", models.join(", ")),
                ModelOutcome::Unlisted { reachable: true } => "no catalogue, reachable".to_string(),
                ModelOutcome::Unlisted { reachable: false } => "no catalogue, unreachable".to_string(),
                ModelOutcome::Unverified { error } => format!("not verified: {}", error),
            };
            println!("{}: {}", check.provider, line);
        }
    }

    Ok(if checks.iter().any(|c| c.is_missing()) {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

async fn health(config: &SolaceConfig, registry: &ProviderRegistry, json: bool) -> Result<ExitCode> {
    let gateway = Gateway::from_config(config, registry)?;

    // no store is attached here, so the database shows as unknown
    let report = HealthChecker::new(None)
        .with_breakers(gateway.breakers().values().cloned())
        .check()
        .await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.render());
    }
    Ok(ExitCode::SUCCESS)
}
