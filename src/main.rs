use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

mod analytics;
mod config;
mod dashboard;
mod db;
mod error;
mod logging;
mod merge;
mod models;
mod normalize;
mod pipeline;
mod queue;
mod report;
mod sla;
mod store;
mod table;

use config::{AppConfig, StoreBackend};
use dashboard::{ConsolidatedQuery, Dashboard, RecordFilter, SortField};
use db::PgDocumentStore;
use error::PipelineError;
use models::{JobRecord, UploadKind};
use pipeline::Pipeline;
use queue::WorkerPool;
use store::{DocumentStore, MemoryStore, Repositories};

#[derive(Parser)]
#[command(name = "sla-reconciler")]
#[command(about = "Reconciles carrier delivery exports and reports SLA compliance", long_about = None)]
struct Cli {
    /// Overrides WORKER_COUNT for this run
    #[arg(long, global = true)]
    workers: Option<usize>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the document store schema
    InitDb,
    /// Register an input export
    Upload {
        #[arg(long, value_enum)]
        kind: UploadKind,
        #[arg(long)]
        file: PathBuf,
    },
    /// Create a job from two registered uploads and run it
    Start {
        #[arg(long)]
        mother: String,
        #[arg(long)]
        loose: String,
    },
    /// Upload both exports, run the job and print its KPIs
    Process {
        #[arg(long)]
        mother: PathBuf,
        #[arg(long)]
        loose: PathBuf,
    },
    /// Show a job's status and progress
    Status { job: Uuid },
    /// Show the log entries recorded for a job
    Logs { job: Uuid },
    /// Headline SLA metrics for the latest job
    Overview,
    /// Delay breakdowns for the latest job
    Delays,
    /// Per-seller SLA metrics for the latest job
    Sellers,
    /// Per-zone and per-postal-code SLA metrics for the latest job
    Zones,
    /// Persisted rankings for a job (latest when omitted)
    Rankings {
        #[arg(long)]
        job: Option<Uuid>,
    },
    /// Daily SLA trend over a filtered slice of the latest job
    SlaPerformance {
        #[arg(long)]
        start_date: Option<NaiveDate>,
        #[arg(long)]
        end_date: Option<NaiveDate>,
        #[arg(long)]
        zone: Option<String>,
        #[arg(long)]
        seller: Option<String>,
        #[arg(long)]
        cost_center: Option<String>,
    },
    /// Compare the two most recent completed jobs
    Historical,
    /// Distinct filter values for the latest job
    Filters,
    /// Paginated record listing for a job
    Consolidated {
        #[arg(long)]
        job: Uuid,
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
        page: u32,
        #[arg(long, default_value_t = 50, value_parser = clap::value_parser!(u32).range(1..=1000))]
        page_size: u32,
        #[arg(long, value_enum)]
        sort_by: Option<SortField>,
        #[arg(long)]
        seller: Option<String>,
        #[arg(long)]
        zone: Option<String>,
    },
    /// SLA difference between two jobs
    Compare { first: Uuid, second: Uuid },
    /// Generate a markdown report for a job (latest when omitted)
    Report {
        #[arg(long)]
        job: Option<Uuid>,
        #[arg(long, default_value = "sla-report.md")]
        out: PathBuf,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn open_store(config: &AppConfig) -> anyhow::Result<Arc<dyn DocumentStore>> {
    match config.backend {
        StoreBackend::Postgres => {
            let store = PgDocumentStore::connect(&config.store)
                .await
                .context("failed to connect to Postgres")?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
    }
}

/// Runs one job on a fresh worker pool and waits for it to settle.
async fn run_job(pipeline: &Arc<Pipeline>, workers: usize, job: &JobRecord) -> anyhow::Result<JobRecord> {
    let pool = WorkerPool::start(Arc::clone(pipeline), workers);
    pool.enqueue(job.id)?;
    pool.shutdown().await;

    pipeline
        .repos()
        .job(job.id)
        .await?
        .ok_or_else(|| PipelineError::JobNotFound(job.id).into())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = AppConfig::from_env()?;
    logging::init_logging();
    if let Some(workers) = cli.workers {
        if workers == 0 {
            bail!("--workers must be at least 1");
        }
        config.workers = workers;
    }

    if let Commands::InitDb = cli.command {
        if config.backend != StoreBackend::Postgres {
            bail!("init-db requires STORE_BACKEND=postgres");
        }
        let store = PgDocumentStore::connect(&config.store)
            .await
            .context("failed to connect to Postgres")?;
        store.init_db().await?;
        println!("Schema ready.");
        return Ok(());
    }

    let repos = Repositories::new(open_store(&config).await?);
    let pipeline = Arc::new(Pipeline::new(repos.clone(), config.pipeline.clone()));
    let dashboard = Dashboard::new(repos.clone());

    match cli.command {
        Commands::InitDb => {}
        Commands::Upload { kind, file } => {
            let upload = pipeline.register_upload(kind, &file).await?;
            print_json(&upload)?;
        }
        Commands::Start { mother, loose } => {
            let job = pipeline.submit(&mother, &loose).await?;
            let job = run_job(&pipeline, config.workers, &job).await?;
            print_json(&job)?;
        }
        Commands::Process { mother, loose } => {
            let mother = pipeline.register_upload(UploadKind::Mother, &mother).await?;
            let loose = pipeline.register_upload(UploadKind::Loose, &loose).await?;
            let job = pipeline.submit(&mother.id, &loose.id).await?;
            let job = run_job(&pipeline, config.workers, &job).await?;
            info!(job_id = %job.id, status = ?job.status, "processing finished");
            print_json(&job)?;
            if let Some(kpis) = repos.kpis(job.id).await? {
                print_json(&kpis)?;
            }
        }
        Commands::Status { job } => {
            let job = repos.job(job).await?.ok_or(PipelineError::JobNotFound(job))?;
            print_json(&job)?;
        }
        Commands::Logs { job } => {
            print_json(&repos.logs(job).await?)?;
        }
        Commands::Overview => {
            let records = dashboard.latest_records().await?;
            print_json(&dashboard::overview(&records))?;
        }
        Commands::Delays => {
            let records = dashboard.latest_records().await?;
            print_json(&dashboard::delays(&records))?;
        }
        Commands::Sellers => {
            let records = dashboard.latest_records().await?;
            print_json(&dashboard::sellers(&records))?;
        }
        Commands::Zones => {
            let records = dashboard.latest_records().await?;
            print_json(&dashboard::zones(&records))?;
        }
        Commands::Rankings { job } => {
            let job_id = match job {
                Some(job_id) => dashboard.job(job_id).await?.id,
                None => dashboard.latest_job().await?.id,
            };
            let set = dashboard.ranking_set(job_id).await?;
            print_json(&dashboard::rankings(&set))?;
        }
        Commands::SlaPerformance {
            start_date,
            end_date,
            zone,
            seller,
            cost_center,
        } => {
            let filter = RecordFilter {
                start_date,
                end_date,
                zone,
                seller,
                cost_center,
            };
            let records = dashboard.latest_records().await?;
            print_json(&dashboard::sla_performance(&records, &filter))?;
        }
        Commands::Historical => {
            print_json(&dashboard.historical().await?)?;
        }
        Commands::Filters => {
            let records = dashboard.latest_records().await?;
            print_json(&dashboard::filter_options(&records))?;
        }
        Commands::Consolidated {
            job,
            page,
            page_size,
            sort_by,
            seller,
            zone,
        } => {
            let query = ConsolidatedQuery {
                page: page as usize,
                page_size: page_size as usize,
                sort_by,
                seller,
                zone,
            };
            let records = dashboard.records(job).await?;
            print_json(&dashboard::consolidated(&records, &query))?;
        }
        Commands::Compare { first, second } => {
            print_json(&dashboard.compare(first, second).await?)?;
        }
        Commands::Report { job, out } => {
            let job = match job {
                Some(job_id) => dashboard.job(job_id).await?,
                None => dashboard.latest_job().await?,
            };
            let records = dashboard.records(job.id).await?;
            let kpis = dashboard.kpis(job.id).await?;
            let rankings = dashboard.ranking_set(job.id).await?;
            let report = report::build_report(&job, &records, &kpis, &rankings);
            tokio::fs::write(&out, report)
                .await
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
