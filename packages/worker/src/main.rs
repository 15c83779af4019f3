//! audio-worker: runs the audio processing engine against local files.
//!
//! Configuration comes from the environment (`AUDIO_*`, `STORAGE_*`, `S3_*`,
//! `FFMPEG_PATH`, `FFPROBE_PATH`, `AUDIO_DB_*`); logging from `RUST_LOG`.

mod backfill;
mod cli;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use audio_core::{EngineConfig, Job, JobEvent, JobMetadata, JobStatus};
use clap::Parser;
use codec::{EncodeSettings, FfmpegTranscoder};
use db::{AudioPost, DbConfig, DbError, PostRepository};
use processing::{JobQueue, Pipeline};
use storage::Storage;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::backfill::Backfill;
use crate::cli::{Args, Commands};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("audio-worker failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ExitCode, BoxError> {
    let config = EngineConfig::from_env()?;
    let transcoder = FfmpegTranscoder::new(encode_settings(&config), config.stage_timeout());

    let version = match transcoder.verify().await {
        Ok(version) => version,
        Err(e) => {
            error!("ffmpeg/ffprobe unavailable, refusing to start: {}", e);
            return Ok(ExitCode::FAILURE);
        }
    };
    info!("Transcoder ready: {}", version);

    match args.command {
        Commands::Check => {
            println!("{version}");
            Ok(ExitCode::SUCCESS)
        }
        Commands::Process {
            files,
            owner,
            post,
            title,
            wait_secs,
            compact,
        } => {
            let jobs = process(config, transcoder, &files, owner, post, title, wait_secs).await?;
            let all_complete = jobs.iter().all(|j| j.status() == JobStatus::Complete);

            let rendered = if compact {
                serde_json::to_string(&jobs)?
            } else {
                serde_json::to_string_pretty(&jobs)?
            };
            println!("{rendered}");

            Ok(if all_complete {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::BackfillWaveforms { dry_run } => {
            tokio::fs::create_dir_all(&config.work_dir).await?;
            let posts = PostRepository::new(db::init(&DbConfig::from_env()).await?);
            let storage = Storage::from_env().await?;

            let report = Backfill {
                posts: &posts,
                storage: &storage,
                transcoder: &transcoder,
                work_dir: &config.work_dir,
                width: config.waveform_width,
                height: config.waveform_height,
            }
            .run(dry_run)
            .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);

            Ok(if report.failed == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

async fn process(
    config: EngineConfig,
    transcoder: FfmpegTranscoder,
    files: &[PathBuf],
    owner: String,
    post: Option<String>,
    title: Option<String>,
    wait_secs: u64,
) -> Result<Vec<Job>, BoxError> {
    tokio::fs::create_dir_all(&config.work_dir).await?;

    let posts = PostRepository::new(db::init(&DbConfig::from_env()).await?);
    if let Some(post_id) = &post {
        ensure_post(&posts, post_id, &owner, title).await?;
    }

    let storage = Storage::from_env().await?;
    info!("Storage backend: {}", storage.kind_str());

    let pipeline = Pipeline::builder(Arc::new(transcoder), Arc::new(storage), Arc::new(posts))
        .config(&config)
        .on_complete(Arc::new(|post_id| info!("Post {} has processed audio", post_id)))
        .build();
    let queue = JobQueue::new(config.clone(), pipeline);
    let event_log = tokio::spawn(log_events(queue.subscribe()));
    queue.start();

    let mut ids = Vec::with_capacity(files.len());
    for file in files {
        let filename = file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| format!("not a file path: {}", file.display()))?
            .to_string();
        let staged = stage_input(file, &config.work_dir).await?;

        match queue.submit(owner.clone(), post.clone(), &staged, filename, JobMetadata::new()) {
            Ok(job) => {
                info!("Submitted {} as job {}", file.display(), job.id);
                ids.push(job.id);
            }
            Err(e) => {
                warn!("Could not submit {}: {}", file.display(), e);
                let _ = tokio::fs::remove_file(&staged).await;
            }
        }
    }

    let waited = queue.wait_for_jobs(&ids, Duration::from_secs(wait_secs)).await;
    queue.shutdown().await;

    if let Err(e) = waited {
        warn!("{}", e);
    }
    let stats = queue.stats();
    info!(
        "Finished {} of {} jobs: {} complete, {} failed",
        stats.finished(),
        stats.finished() + stats.active(),
        stats.complete,
        stats.failed
    );
    event_log.abort();

    Ok(ids
        .iter()
        .filter_map(|id| queue.get_status(*id).ok())
        .collect())
}

async fn log_events(mut events: broadcast::Receiver<JobEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => debug!(at = %event.timestamp(), "{}", event.description()),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                debug!("Event log lagged, missed {} events", missed)
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Copy `input` into the work dir; the queue deletes the copy once the job ends.
async fn stage_input(input: &Path, work_dir: &Path) -> Result<PathBuf, BoxError> {
    let ext = input.extension().and_then(|e| e.to_str()).unwrap_or("bin");
    let staged = work_dir.join(format!("upload-{}.{}", audio_core::JobId::new(), ext));
    tokio::fs::copy(input, &staged).await?;
    Ok(staged)
}

async fn ensure_post(
    posts: &PostRepository,
    post_id: &str,
    owner: &str,
    title: Option<String>,
) -> Result<(), BoxError> {
    match posts.get(post_id).await {
        Ok(_) => Ok(()),
        Err(DbError::NotFound(_)) => {
            let mut post = AudioPost::new(post_id, owner);
            if let Some(title) = title {
                post = post.with_title(title);
            }
            posts.create(&post).await?;
            info!("Created post {}", post_id);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn encode_settings(config: &EngineConfig) -> EncodeSettings {
    EncodeSettings {
        sample_rate: config.sample_rate,
        channels: config.channels.channel_count(),
        bitrate_kbps: config.bitrate_kbps,
        ..EncodeSettings::default()
    }
}
