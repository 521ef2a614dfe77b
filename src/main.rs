//! docrelay - document extraction router.
//!
//! Routes uploaded documents to external content-understanding providers
//! (multimodal models and OCR) via classification, priority routing, and
//! cascading or racing execution.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use console::style;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use docrelay::config::Config;
use docrelay::engine::{ExecutionEngine, ExecutionMode, ProcessError};
use docrelay::metrics::{spawn_collector, LogSink};
use docrelay::provider::ProviderPool;
use docrelay::warm::WarmSessionManager;

#[derive(Parser)]
#[command(
    name = "docrelay",
    version,
    about = "Document extraction router with multi-provider orchestration"
)]
struct Cli {
    /// Path to a config file (defaults to docrelay.toml in the working dir).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract text from a document.
    Process {
        /// Path to the document.
        file: PathBuf,

        /// Declared MIME type; re-derived from content when it disagrees.
        #[arg(long, default_value = "application/octet-stream")]
        mime: String,

        /// Industry tag forwarded to downstream consolidation.
        #[arg(long, default_value = "")]
        industry: String,

        /// Race all warm providers instead of cascading.
        #[arg(long)]
        race: bool,

        /// Skip the startup warming pass.
        #[arg(long)]
        no_warm: bool,
    },
    /// Show provider availability and warmth.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "docrelay=debug"
    } else {
        "docrelay=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load(cli.config.as_deref());
    let pool = Arc::new(ProviderPool::from_config(&config));
    let warm = WarmSessionManager::new(pool.clone(), config.warm.clone());

    match cli.command {
        Commands::Process {
            file,
            mime,
            industry,
            race,
            no_warm,
        } => {
            if !no_warm {
                warm.start_warming().await;
            }

            let (metrics, _collector) = spawn_collector(Arc::new(LogSink));
            let engine =
                ExecutionEngine::new(pool, warm.clone(), metrics, config.engine.clone());
            let mode = if race {
                ExecutionMode::Race
            } else {
                ExecutionMode::Cascade
            };

            let outcome = engine.process(&file, &mime, &industry, mode).await;
            warm.shutdown();

            match outcome {
                Ok(result) => {
                    println!(
                        "  {} Extracted via {} (confidence {:.2}, {} attempt{})",
                        style("✓").green(),
                        style(result.provider_used).cyan(),
                        result.confidence,
                        result.attempt_log.len(),
                        if result.attempt_log.len() == 1 { "" } else { "s" }
                    );
                    println!("{}", result.text);
                    Ok(())
                }
                Err(ProcessError::AllProvidersExhausted { attempts }) => {
                    eprintln!("  {} All providers exhausted:", style("✗").red());
                    for attempt in &attempts {
                        eprintln!(
                            "    {} {:?} after {}ms{}",
                            attempt.provider,
                            attempt.outcome,
                            attempt.elapsed_ms,
                            attempt
                                .error
                                .as_deref()
                                .map(|e| format!(": {}", e))
                                .unwrap_or_default()
                        );
                    }
                    anyhow::bail!("extraction failed on every provider")
                }
                Err(e) => Err(e.into()),
            }
        }
        Commands::Status => {
            warm.start_warming().await;

            println!("Providers:");
            for provider in pool.handles() {
                let id = provider.id();
                let (mark, state) = if !provider.is_available() {
                    (style("✗").red(), "unavailable".to_string())
                } else if warm.is_warm(id) {
                    let pinged = warm
                        .last_ping(id)
                        .map(|t| format!(", last ping {}", t.format("%H:%M:%S")))
                        .unwrap_or_default();
                    (style("✓").green(), format!("warm{}", pinged))
                } else {
                    (style("○").yellow(), "cold".to_string())
                };
                println!("  {} {:<10} {}", mark, id.to_string(), state);
                if !provider.is_available() {
                    for line in provider.availability_hint().lines() {
                        println!("      {}", style(line).dim());
                    }
                }
            }

            warm.shutdown();
            Ok(())
        }
    }
}
