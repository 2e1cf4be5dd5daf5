use std::{str::FromStr, time::Duration};

use clap::{Parser, Subcommand};
use tracing_subscriber::{
    EnvFilter, Layer as _, filter::Directive, layer::SubscriberExt,
    util::SubscriberInitExt as _,
};
use uuid::Uuid;

use self::{
    extract::{pdf::PopplerRasterizer, tesseract::TesseractExtractor},
    llm::OpenAiCompatClient,
    prelude::*,
    store::{JobStore as _, PgJobStore},
    workers::{ocr::OcrWorker, parse::ParseWorker},
};

mod config;
mod cost;
mod extract;
mod llm;
mod model;
mod parse;
mod prelude;
mod preprocess;
mod process_util;
mod snapshot;
mod storage;
mod store;
mod workers;

/// Turn uploaded menu images into structured, priced menu data.
#[derive(Debug, Parser)]
#[clap(
    version,
    author,
    after_help = r#"
Environment Variables:
  - DATABASE_URL: PostgreSQL connection string for the job database.
  - LLM_MODEL: Model used for menu extraction.
  - LLM_API_BASE (optional): OpenAI-compatible API base URL.
  - LLM_API_KEY (optional): Bearer token for the LLM API.
  - STORAGE_BASE_URL or STORAGE_ROOT: Where uploaded menus live.
  - STORAGE_AUTH_TOKEN (optional): Bearer token for HTTP storage.

  These variables may be set in a standard `.env` file.
"#
)]
struct Opts {
    #[clap(subcommand)]
    subcmd: Cmd,
}

/// The subcommands we support.
#[derive(Debug, Subcommand)]
enum Cmd {
    /// Run both pipeline workers until interrupted.
    Run(WorkerOpts),
    /// Run only the OCR worker.
    OcrWorker(WorkerOpts),
    /// Run only the structured-parsing worker.
    ParseWorker(WorkerOpts),
    /// Reset a failed document so the pipeline picks it up again.
    Retry {
        /// The menu document to retry.
        menu_id: Uuid,
    },
    /// Recompute the competitive snapshot for one market.
    Recompute {
        city: String,
        cuisine_type: String,
    },
    /// Apply any outstanding database migrations.
    Migrate,
}

/// Shared flags for the worker subcommands.
#[derive(Debug, Parser)]
struct WorkerOpts {
    /// Seconds between OCR queue polls.
    #[clap(long, default_value_t = 2)]
    ocr_poll_secs: u64,

    /// Seconds between parsing queue polls.
    #[clap(long, default_value_t = 5)]
    parse_poll_secs: u64,
}

/// Our entry point, which can return an error. [`anyhow::Result`] will
/// automatically print a nice error message with optional backtrace.
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing.
    let directive = Directive::from_str("info").expect("built-in directive should be valid");
    let env_filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(env_filter);
    tracing_subscriber::registry().with(subscriber).init();

    real_main().await
}

/// Our real entry point.
#[instrument(level = "debug", name = "main", skip_all)]
async fn real_main() -> Result<()> {
    // Load environment variables from a `.env` file, if it exists.
    dotenvy::dotenv().ok();

    let opts = Opts::parse();
    debug!("Parsed options: {:?}", opts);

    match &opts.subcmd {
        Cmd::Run(worker_opts) => run_workers(worker_opts, true, true).await,
        Cmd::OcrWorker(worker_opts) => run_workers(worker_opts, true, false).await,
        Cmd::ParseWorker(worker_opts) => run_workers(worker_opts, false, true).await,
        Cmd::Retry { menu_id } => cmd_retry(*menu_id).await,
        Cmd::Recompute { city, cuisine_type } => cmd_recompute(city, cuisine_type).await,
        Cmd::Migrate => cmd_migrate().await,
    }
}

async fn connect_store() -> Result<Arc<PgJobStore>> {
    let pool = store::connect(&config::database_url()?).await?;
    Ok(Arc::new(PgJobStore::new(pool)))
}

/// Run the selected workers until Ctrl-C.
async fn run_workers(opts: &WorkerOpts, run_ocr: bool, run_parse: bool) -> Result<()> {
    let job_store = connect_store().await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl-C: {:#}", err);
        }
        info!("shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    let mut handles = Vec::new();
    if run_ocr {
        let worker = OcrWorker::new(
            job_store.clone(),
            storage::storage_from_config(config::StorageConfig::from_env()?)?,
            Arc::new(TesseractExtractor::new()),
            Arc::new(PopplerRasterizer::new()),
            Duration::from_secs(opts.ocr_poll_secs),
        );
        let shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            workers::run(&worker, shutdown).await;
        }));
    }
    if run_parse {
        let llm: Arc<dyn llm::LlmClient> =
            Arc::new(OpenAiCompatClient::new(config::LlmConfig::from_env()?)?);
        let worker = ParseWorker::new(
            job_store.clone(),
            llm,
            Duration::from_secs(opts.parse_poll_secs),
        );
        let shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            workers::run(&worker, shutdown).await;
        }));
    }

    for handle in handles {
        handle.await.context("worker task panicked")?;
    }
    Ok(())
}

async fn cmd_retry(menu_id: Uuid) -> Result<()> {
    let job_store = connect_store().await?;
    job_store.retry(menu_id).await?;
    info!(id = %menu_id, "document reset for reprocessing");
    Ok(())
}

async fn cmd_recompute(city: &str, cuisine_type: &str) -> Result<()> {
    let job_store = connect_store().await?;
    snapshot::recompute(job_store.as_ref(), city, cuisine_type).await
}

async fn cmd_migrate() -> Result<()> {
    let pool = store::connect(&config::database_url()?).await?;
    store::run_migrations(&pool).await?;
    info!("migrations applied");
    Ok(())
}
