//! renderq CLI: run the scheduler, or queue and inspect jobs.

use clap::{Parser, Subcommand};
use renderq::artifacts::ArtifactStore;
use renderq::clock::{Clock, SystemClock};
use renderq::config::{Config, LogFormat};
use renderq::db::Db;
use renderq::engine::{ClassParts, Scheduler, SchedulerParts};
use renderq::error::Error;
use renderq::intake::Intake;
use renderq::model::{Job, JobId, Lifecycle};
use renderq::processor::{BatchProcessor, ConvertProcessor};
use renderq::renderer::HttpRenderer;
use renderq::telemetry::{TelemetryConfig, init_telemetry};
use secrecy::ExposeSecret;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "renderq", about = "Document conversion job scheduler")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the pollers, worker pools and sweepers until Ctrl-C
    Serve,
    /// Queue a document for conversion
    Submit {
        /// Document to upload
        path: PathBuf,
        /// File name to record instead of the path's own
        #[arg(long)]
        name: Option<String>,
    },
    /// Queue a zip of finished conversions
    Batch {
        /// Conversion job IDs, in archive order
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Show a conversion or batch job
    Show {
        /// Job ID (full UUID)
        id: String,
        /// Print the job as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Serve => cmd_serve(config).await,
        Command::Submit { path, name } => cmd_submit(&intake(&config).await?, path, name).await,
        Command::Batch { ids } => cmd_batch(&intake(&config).await?, ids).await,
        Command::Show { id, json } => cmd_show(&intake(&config).await?, id, json).await,
    }
}

async fn intake(config: &Config) -> anyhow::Result<Intake> {
    let db = Db::connect(config.database_url.expose_secret()).await?;
    db.migrate().await?;
    let artifacts = ArtifactStore::new(config.uploads_dir.clone());
    artifacts.ensure_root().await?;
    Ok(Intake::new(
        db.conversions(),
        db.batches(),
        artifacts,
        Arc::new(SystemClock),
    ))
}

async fn cmd_serve(config: Config) -> anyhow::Result<()> {
    let telemetry = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "renderq".to_string(),
        log_level: config.log_level.clone(),
        json: config.log_format == LogFormat::Json,
    })?;
    tracing::info!(otlp = telemetry.exporting(), "telemetry ready");
    config.log_summary();

    let db = Db::connect(config.database_url.expose_secret()).await?;
    db.migrate().await?;
    db.health_check().await?;

    let artifacts = ArtifactStore::new(config.uploads_dir.clone());
    artifacts.ensure_root().await?;

    let renderer = HttpRenderer::new(&config.renderer_url, config.renderer_kind)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let scheduler = Scheduler::start(SchedulerParts {
        conversions: ClassParts {
            store: Arc::new(db.conversions()),
            processor: Arc::new(ConvertProcessor::new(artifacts.clone(), Arc::new(renderer))),
            settings: config.convert_settings(),
        },
        batches: ClassParts {
            store: Arc::new(db.batches()),
            processor: Arc::new(BatchProcessor::new(artifacts.clone())),
            settings: config.batch_settings(),
        },
        artifacts,
        clock,
        sweep: config.sweep_settings()?,
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    scheduler.shutdown().await;
    Ok(())
}

async fn cmd_submit(intake: &Intake, path: PathBuf, name: Option<String>) -> anyhow::Result<()> {
    let job = intake.submit_conversion(&path, name.as_deref()).await?;
    println!("Queued conversion {} ({}, {} bytes)", job.id, job.file_name, job.file_size);
    Ok(())
}

async fn cmd_batch(intake: &Intake, ids: Vec<String>) -> anyhow::Result<()> {
    let ids = ids
        .iter()
        .map(|s| s.parse())
        .collect::<Result<Vec<JobId>, _>>()?;
    let job = intake.submit_batch(&ids).await?;
    println!("Queued batch {} ({} entries)", job.id, job.entries.len());
    for entry in &job.entries {
        println!("  {}  {}", entry.id, entry.file_name);
    }
    Ok(())
}

async fn cmd_show(intake: &Intake, id: String, json: bool) -> anyhow::Result<()> {
    let id: JobId = id.parse()?;

    match intake.conversion(id).await {
        Ok(job) if json => {
            println!("{}", serde_json::to_string_pretty(&job)?);
            return Ok(());
        }
        Ok(job) => {
            print_lifecycle(&job);
            println!("File:       {}", job.file_name);
            println!("Size:       {} bytes", job.file_size);
            return Ok(());
        }
        Err(Error::NotFound(_)) => {}
        Err(e) => return Err(e.into()),
    }

    let job = intake.batch(id).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&job)?);
        return Ok(());
    }
    print_lifecycle(&job);
    println!("Entries:    {}", job.entries.len());
    for entry in &job.entries {
        println!("  {}  {}", entry.id, entry.file_name);
    }
    Ok(())
}

fn print_lifecycle<J: Job>(job: &J) {
    let Lifecycle {
        status,
        created_at,
        finished_at,
        error,
        deleted,
    } = job.lifecycle();

    println!("ID:         {}", job.id());
    println!("Class:      {}", J::KIND);
    println!("Status:     {status}");
    println!("Created:    {created_at}");
    if let Some(finished) = finished_at {
        println!("Finished:   {finished}");
    }
    if let Some(error) = error {
        println!("Error:      {error}");
    }
    println!("Deleted:    {}", if *deleted { "yes" } else { "no" });
}
