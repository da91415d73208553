//! Attache CLI: run the attachment pipeline over local files.
//!
//! Configuration comes from the environment (see `Config::from_env`).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use attache_cli::{file_name, guess_mime_type, init_tracing, upload_key, FileReport, CLI_ROOM};
use attache_core::models::{JobCategory, JobPayload, MessageUpdate, ProcessingStatus};
use attache_core::Config;
use attache_processing::ProcessorRegistry;
use attache_storage::open_storage;
use attache_worker::{
    JobQueue, QueueConfig, ResultSink, TracingResultSink, WorkerPool, WorkerPoolConfig,
};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "attache", about = "Chat attachment processing pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process files through the pipeline and print the outcome of each
    Process {
        /// Files to process
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Override the detected category (image, video, audio, document, model3d)
        #[arg(long)]
        category: Option<JobCategory>,
        /// Worker count (defaults to WORKER_COUNT)
        #[arg(long)]
        workers: Option<usize>,
        /// Give up waiting after this many seconds
        #[arg(long, default_value = "600")]
        wait_secs: u64,
    },
    /// Print job counts from a queue snapshot
    Stats {
        /// Snapshot file (defaults to QUEUE_SNAPSHOT_PATH)
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Process {
            files,
            category,
            workers,
            wait_secs,
        } => process(&config, files, category, workers, Duration::from_secs(wait_secs)).await,
        Commands::Stats { snapshot } => {
            let path = snapshot
                .or_else(|| config.queue_snapshot_path.clone())
                .context("No snapshot path given and QUEUE_SNAPSHOT_PATH is unset")?;
            let queue = JobQueue::load_or_new(QueueConfig::from(&config), &path).await?;
            println!("{}", serde_json::to_string_pretty(&queue.stats())?);
            Ok(())
        }
    }
}

async fn process(
    config: &Config,
    files: Vec<PathBuf>,
    category: Option<JobCategory>,
    workers: Option<usize>,
    wait: Duration,
) -> anyhow::Result<()> {
    let storage = open_storage(config).await?;
    let queue = Arc::new(match &config.queue_snapshot_path {
        Some(path) => JobQueue::load_or_new(QueueConfig::from(config), path).await?,
        None => JobQueue::new(QueueConfig::from(config)),
    });

    let sink: Arc<dyn ResultSink> = Arc::new(TracingResultSink);
    let pending = MessageUpdate::status(ProcessingStatus::Pending);

    let mut submitted = Vec::with_capacity(files.len());
    for path in &files {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let filename = file_name(path);
        let mime_type = guess_mime_type(&filename);
        let job_category = category.unwrap_or_else(|| JobCategory::detect(mime_type, &filename));
        let stored = storage.put(&upload_key(CLI_ROOM, &filename), data).await?;

        let message_id = uuid::Uuid::new_v4().to_string();
        let job_id = queue.enqueue(
            job_category,
            JobPayload {
                message_id: message_id.clone(),
                room_id: CLI_ROOM.to_string(),
                source_locator: stored.locator,
                original_filename: filename.clone(),
                mime_type: mime_type.to_string(),
            },
        );
        sink.update_message(&message_id, &pending).await?;
        tracing::info!(%job_id, file = %filename, category = %job_category, "Submitted");
        submitted.push((job_id, filename, job_category, message_id));
    }

    let mut pool_config = WorkerPoolConfig::from(config);
    if let Some(workers) = workers {
        pool_config.worker_count = workers.max(1);
    }
    let pool = WorkerPool::start(
        queue.clone(),
        Arc::new(ProcessorRegistry::with_defaults(config)),
        storage.adapter(),
        sink,
        pool_config,
    );

    if tokio::time::timeout(wait, pool.wait_idle()).await.is_err() {
        tracing::warn!(wait_secs = wait.as_secs(), "Stopped waiting with jobs still pending");
    }
    pool.shutdown().await;

    let reports: Vec<FileReport> = submitted
        .into_iter()
        .map(|(job_id, file, category, message_id)| FileReport {
            file,
            category,
            message_id,
            status: queue.job_status(job_id),
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&reports)?);
    Ok(())
}
