mod backend;
mod config;
mod engine;
mod instrumentation;
mod normalize;
mod prompts;
mod types;

use std::io::Write as _;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use backend::{GeminiBackend, LocalBackend, ModelTarget, Router};
use config::Config;
use engine::{GenerateOptions, LlmEngine, LoadProgress, OllamaRuntime, Phase, SamplingOptions};
use instrumentation::{RunLogger, RunRecord};
use types::ProjectDetails;

#[derive(Parser)]
#[command(
    name = "tech-scout",
    about = "Strategic technology scouting over hosted and local models"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Model identifier; gemini-prefixed ids use the hosted backend,
    /// everything else the local runtime
    #[arg(short, long, global = true)]
    model: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// SWOT-analyze a technology topic
    Analyze {
        /// The topic to analyze
        topic: String,
    },
    /// Assess a project proposal
    Evaluate {
        #[arg(long)]
        title: String,
        #[arg(long)]
        technology: String,
        #[arg(long)]
        market: String,
        #[arg(long)]
        description: String,
    },
    /// Generate venture opportunity concepts
    Ideate {
        #[arg(long, default_value = "All")]
        technology: String,
        #[arg(long, default_value = "All")]
        industry: String,
        /// Strategic context to steer the concepts
        #[arg(long, default_value = "")]
        context: String,
    },
    /// Stream a free-form completion token by token (local models only)
    Chat {
        /// The prompt to send
        prompt: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let engine = LlmEngine::init(Box::new(OllamaRuntime::new(&config.ollama_url)));
    engine.on_load_progress(|progress| match progress {
        LoadProgress::Message(detail) => eprintln!("{detail}"),
        LoadProgress::Download {
            status,
            completed: Some(completed),
            total: Some(total),
        } => eprintln!("  {status}: {completed}/{total} bytes"),
        LoadProgress::Download { status, .. } => eprintln!("  {status}"),
        LoadProgress::Ready => eprintln!("Model ready."),
    });

    let options = GenerateOptions {
        system_prompt: None,
        sampling: SamplingOptions {
            max_new_tokens: config.max_new_tokens,
            temperature: config.temperature,
            top_k: config.top_k,
        },
    };
    let router = Router::new(
        GeminiBackend::new(config.gemini_api_key.clone(), &config.gemini_base_url),
        LocalBackend::new(engine.clone(), options.clone()),
    );
    let run_logger = RunLogger::new(&config.log_dir)?;
    let model = cli
        .model
        .clone()
        .unwrap_or_else(|| config.default_model.clone());

    match cli.command {
        Commands::Analyze { topic } => {
            let started = Instant::now();
            let result = router.analyze(&topic, &model).await;
            report("analyze", &model, started, result, &run_logger)?;
        }
        Commands::Evaluate {
            title,
            technology,
            market,
            description,
        } => {
            let details = ProjectDetails {
                title,
                technology,
                market,
                description,
            };
            let started = Instant::now();
            let result = router.evaluate(&details, &model).await;
            report("evaluate", &model, started, result, &run_logger)?;
        }
        Commands::Ideate {
            technology,
            industry,
            context,
        } => {
            let started = Instant::now();
            let result = router
                .generate_opportunities(&technology, &industry, &context, &model)
                .await;
            report("ideate", &model, started, result, &run_logger)?;
        }
        Commands::Chat { prompt } => {
            // Chat is local-only, so an unset --model falls back to the
            // configured local model rather than the hosted default.
            let model = cli.model.unwrap_or_else(|| config.local_model.clone());
            if ModelTarget::resolve(&model) == ModelTarget::Hosted {
                anyhow::bail!(
                    "chat streams through the local runtime; pass a non-hosted model with --model"
                );
            }
            let started = Instant::now();
            let result = match engine.load_model(&model).await {
                Ok(()) => {
                    engine
                        .stream(
                            &prompt,
                            Box::new(|update| match update.phase {
                                Phase::Thinking => {
                                    eprint!("{}", update.text);
                                    let _ = std::io::stderr().flush();
                                }
                                Phase::Answering => {
                                    print!("{}", update.text);
                                    let _ = std::io::stdout().flush();
                                }
                            }),
                            &options,
                        )
                        .await
                }
                Err(e) => Err(e),
            };
            println!();

            let outcome = describe_outcome(&result);
            let record = RunRecord::new(
                "chat",
                &model,
                ModelTarget::resolve(&model).label(),
                started.elapsed().as_millis() as u64,
                &outcome,
            );
            run_logger.write(&record)?;
            eprintln!("{}", record.summary());
            result?;
        }
    }

    Ok(())
}

// Logs the run record regardless of outcome, then prints the result as pretty
// JSON or propagates the failure.
fn report<T, E>(
    operation: &str,
    model: &str,
    started: Instant,
    result: Result<T, E>,
    run_logger: &RunLogger,
) -> Result<()>
where
    T: Serialize,
    E: std::error::Error + Send + Sync + 'static,
{
    let outcome = describe_outcome(&result);
    let record = RunRecord::new(
        operation,
        model,
        ModelTarget::resolve(model).label(),
        started.elapsed().as_millis() as u64,
        &outcome,
    );
    run_logger.write(&record)?;

    let value = result?;
    println!(
        "{}",
        serde_json::to_string_pretty(&value).context("Failed to render result")?
    );
    eprintln!("{}", record.summary());
    Ok(())
}

fn describe_outcome<T, E: std::fmt::Display>(result: &Result<T, E>) -> String {
    match result {
        Ok(_) => "ok".to_string(),
        Err(e) => format!("error: {e}"),
    }
}
