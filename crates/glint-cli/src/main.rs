use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use glint_adapters::{SourcePayload, SourceSpec};
use glint_pipeline::config::PipelineConfig;
use glint_pipeline::IngestPipeline;
use glint_scoring::backend::{HttpBackend, ScoreBackend};
use glint_scoring::rescore::RescoreManager;
use glint_scoring::rules::RuleScorer;
use glint_scoring::ScoreChain;
use glint_storage::Store;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "glint")]
#[command(about = "Graduate listing intake & triage")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Ingest a batch of raw listing payloads and score the survivors.
    Ingest {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        profile: PathBuf,
        /// JSON file of payload batches produced by the scrapers.
        #[arg(long)]
        payloads: PathBuf,
        #[arg(long, default_value = "glint.db")]
        db: PathBuf,
    },
    /// Detect a profile change and rescore the borderline band.
    Rescore {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        profile: PathBuf,
        #[arg(long, default_value = "glint.db")]
        db: PathBuf,
    },
    /// Create or update the database schema.
    Migrate {
        #[arg(long, default_value = "glint.db")]
        db: PathBuf,
    },
}

/// One scraper's output: its source spec plus the raw records it extracted.
#[derive(Debug, Deserialize)]
struct PayloadBatch {
    source: SourceSpec,
    payloads: Vec<SourcePayload>,
}

fn database_url(path: &Path) -> String {
    format!("sqlite://{}?mode=rwc", path.display())
}

fn build_chain(config: &PipelineConfig) -> Result<Arc<ScoreChain>> {
    let mut backends: Vec<Arc<dyn ScoreBackend>> = Vec::new();
    for backend_config in config.backend_configs()? {
        backends.push(Arc::new(HttpBackend::new(backend_config)?));
    }
    Ok(Arc::new(ScoreChain::new(
        backends,
        config.per_backend_inflight,
        config.backoff_policy(),
        RuleScorer::new(&config.rules)?,
    )))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Ingest { config, profile, payloads, db } => {
            let config = PipelineConfig::load(&config)?;
            let profile = std::fs::read_to_string(&profile)
                .with_context(|| format!("reading profile {}", profile.display()))?;
            let batches: Vec<PayloadBatch> = serde_json::from_str(
                &std::fs::read_to_string(&payloads)
                    .with_context(|| format!("reading payloads {}", payloads.display()))?,
            )
            .with_context(|| format!("parsing payloads {}", payloads.display()))?;

            let store = Store::connect(&database_url(&db)).await?;
            store.ensure_schema().await?;
            let chain = build_chain(&config)?;

            // profile changes are handled before intake so the rescore pass
            // sees the previous version
            let rescorer =
                RescoreManager::new(store.clone(), chain.clone(), config.rescore_config());
            let rescored = rescorer.on_profile_change(&profile).await?;
            if rescored > 0 {
                println!("rescored {rescored} borderline listings");
            }

            let pipeline = IngestPipeline::new(&config, store, chain)?;
            let shutdown = CancellationToken::new();
            let signal_token = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    signal_token.cancel();
                }
            });

            let batches: Vec<(SourceSpec, Vec<SourcePayload>)> =
                batches.into_iter().map(|batch| (batch.source, batch.payloads)).collect();
            let summary = pipeline.run(&batches, &profile, &shutdown).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Rescore { config, profile, db } => {
            let config = PipelineConfig::load(&config)?;
            let profile = std::fs::read_to_string(&profile)
                .with_context(|| format!("reading profile {}", profile.display()))?;
            let store = Store::connect(&database_url(&db)).await?;
            store.ensure_schema().await?;
            let chain = build_chain(&config)?;
            let rescorer = RescoreManager::new(store, chain, config.rescore_config());
            let rescored = rescorer.on_profile_change(&profile).await?;
            println!("rescored {rescored} listings");
        }
        Commands::Migrate { db } => {
            let store = Store::connect(&database_url(&db)).await?;
            store.ensure_schema().await?;
            println!("schema ready at {}", db.display());
        }
    }

    Ok(())
}
