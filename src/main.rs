use anyhow::{Context, Result};
use autodiscover::config;
use autodiscover::db;
use autodiscover::evaluate::RelevancyScorer;
use autodiscover::fetcher::HttpFetcher;
use autodiscover::pipeline::{Pipeline, PipelineSettings};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(author, version, about = "Discover new sites linked from recent posts")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Run discovery once and exit instead of repeating on the configured interval
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;
    info!("opened database connection");

    let fetcher = HttpFetcher::from_config(&cfg.fetch).context("failed to build http client")?;
    let pipeline = Pipeline::new(
        pool.clone(),
        Arc::new(fetcher),
        RelevancyScorer::new(&cfg.discovery.keywords),
        PipelineSettings::from_config(&cfg),
    );

    if args.once {
        pipeline.run().await;
        pool.close().await;
        return Ok(());
    }

    let every = cfg.run_interval();
    info!(?every, "starting ticker to automatically discover new sites");
    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(?err, "could not listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };
    pipeline.run_every(every, shutdown).await;

    pool.close().await;
    Ok(())
}
