use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tracery_common::EngineConfig;
use tracery_engine::{bootstrap, CycleRunner};
use tracery_store::{
    migrate, LinkStore, ObservationStore, PgLinkStore, PgObservationStore, PgProfileStore,
    ProfileStore,
};

/// Run one link-discovery and adaptive-learning cycle over the
/// observation store, then exit. Scheduling is external (cron, systemd
/// timer); the cursor makes back-to-back runs idempotent.
#[derive(Parser)]
#[command(name = "tracery-engine")]
struct Cli {
    /// Print the cycle stats as JSON on stdout.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("tracery_engine=info".parse()?)
                .add_directive("tracery_store=info".parse()?),
        )
        .init();

    info!("Tracery engine starting...");

    let cli = Cli::parse();
    let config = EngineConfig::from_env();
    let database_url = config
        .database_url
        .clone()
        .context("DATABASE_URL is required")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("connecting to Postgres")?;
    migrate(&pool).await?;

    let observations: Arc<dyn ObservationStore> = Arc::new(PgObservationStore::new(pool.clone()));
    let links: Arc<dyn LinkStore> = Arc::new(PgLinkStore::new(pool.clone()));
    let profiles: Arc<dyn ProfileStore> = Arc::new(PgProfileStore::new(pool.clone()));

    // First run on a fresh store: seed the vocabulary so the content
    // scorer has something to match before mining takes over.
    if profiles.vocabulary().await?.is_empty() {
        info!("Empty vocabulary, seeding defaults");
        profiles
            .replace_vocabulary(bootstrap::seed_vocabulary())
            .await?;
    }

    let gazetteer = match std::env::var("TRACERY_GAZETTEER") {
        Ok(path) => bootstrap::gazetteer_from_json(&path)?,
        Err(_) => bootstrap::default_gazetteer(),
    };

    let runner = CycleRunner::new(
        observations,
        links,
        profiles,
        config.correlation.clone(),
        gazetteer,
        config.cold_start_lookback_days,
    );
    let stats = runner.run(Utc::now()).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    }
    info!(cycle = stats.cycle, "Engine run complete");
    Ok(())
}
