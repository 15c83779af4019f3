//! Per-job driver that sequences the codec stages, uploads and persistence.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use audio_core::{EngineConfig, Job, JobResult, JobStatus};
use bytes::Bytes;
use codec::{AudioInfo, Transcoder, Waveform};
use futures_util::FutureExt;

use crate::cleanup::TempFiles;
use crate::error::PipelineError;
use crate::ports::{ArtifactStore, ResultStore};

/// Called with the related-entity id once per successfully completed job.
pub type CompletionCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Pipeline knobs derived from [`EngineConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub work_dir: PathBuf,
    pub waveform_width: u32,
    pub waveform_height: u32,
    pub job_timeout: Duration,
}

impl From<&EngineConfig> for PipelineSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            work_dir: config.work_dir.clone(),
            waveform_width: config.waveform_width,
            waveform_height: config.waveform_height,
            job_timeout: config.job_timeout(),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

/// Builder for [`Pipeline`]. The callback can only be set here, so it is fixed
/// before any worker runs.
pub struct PipelineBuilder {
    transcoder: Arc<dyn Transcoder>,
    artifacts: Arc<dyn ArtifactStore>,
    results: Arc<dyn ResultStore>,
    on_complete: Option<CompletionCallback>,
    settings: PipelineSettings,
}

impl PipelineBuilder {
    /// Take work dir, waveform size and job timeout from `config`.
    pub fn config(mut self, config: &EngineConfig) -> Self {
        self.settings = PipelineSettings::from(config);
        self
    }

    pub fn settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Invoke `callback` after each successful job that has a related-entity id.
    pub fn on_complete(mut self, callback: CompletionCallback) -> Self {
        self.on_complete = Some(callback);
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            transcoder: self.transcoder,
            artifacts: self.artifacts,
            results: self.results,
            on_complete: self.on_complete,
            settings: self.settings,
        }
    }
}

/// Runs one job end to end. Shared read-only by all workers.
pub struct Pipeline {
    transcoder: Arc<dyn Transcoder>,
    artifacts: Arc<dyn ArtifactStore>,
    results: Arc<dyn ResultStore>,
    on_complete: Option<CompletionCallback>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn builder(
        transcoder: Arc<dyn Transcoder>,
        artifacts: Arc<dyn ArtifactStore>,
        results: Arc<dyn ResultStore>,
    ) -> PipelineBuilder {
        PipelineBuilder {
            transcoder,
            artifacts,
            results,
            on_complete: None,
            settings: PipelineSettings::default(),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Process `job` within the job timeout.
    ///
    /// On failure the related entity is marked failed (best effort). A panic
    /// in a collaborator fails the job instead of unwinding into the worker.
    /// The job's temporary files are gone by the time this returns.
    pub async fn run(&self, job: &Job) -> Result<JobResult, PipelineError> {
        let timeout = self.settings.job_timeout;
        let guarded = AssertUnwindSafe(self.process(job)).catch_unwind();
        let outcome = match tokio::time::timeout(timeout, guarded).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(panic)) => Err(PipelineError::Panicked(panic_message(panic.as_ref()))),
            Err(_) => Err(PipelineError::Timeout(timeout)),
        };

        if outcome.is_err() {
            self.propagate_status(job, JobStatus::Failed).await;
        }
        outcome
    }

    async fn process(&self, job: &Job) -> Result<JobResult, PipelineError> {
        let mut temp = TempFiles::new();
        temp.track(&job.source_path);

        self.propagate_status(job, JobStatus::Processing).await;

        let output = self.output_path(job);
        temp.track(&output);
        self.transcoder
            .normalize(&job.source_path, &output)
            .await
            .map_err(PipelineError::Transcode)?;

        let waveform = self.render_waveform(job, &output).await;
        let info = self.probe(job, &output).await;

        let audio = tokio::fs::read(&output)
            .await
            .map_err(|source| PipelineError::ReadOutput {
                path: output.clone(),
                source,
            })?;
        let bytes = audio.len();

        let upload_name = self.upload_name(job);
        let uploaded = self
            .artifacts
            .upload_audio(Bytes::from(audio), &job.owner_id, &upload_name)
            .await
            .map_err(|source| PipelineError::Upload { bytes, source })?;

        let waveform_url = match waveform {
            Some(waveform) => {
                let svg = Bytes::from(waveform.svg.into_bytes());
                match self.artifacts.upload_waveform(svg, &uploaded.key).await {
                    Ok(url) => Some(url),
                    Err(e) => {
                        tracing::warn!("Job {}: waveform upload failed, continuing without: {}", job.id, e);
                        None
                    }
                }
            }
            None => None,
        };

        let result = JobResult {
            audio_url: uploaded.url,
            waveform_url,
            duration_secs: info.map_or(0.0, |i| i.duration_secs),
            file_size: uploaded.size,
            sample_rate: info.and_then(|i| i.sample_rate),
        };

        if let Some(related_id) = &job.related_id {
            self.results
                .save_result(related_id, &result)
                .await
                .map_err(|source| PipelineError::Persist {
                    related_id: related_id.clone(),
                    source,
                })?;
        }

        Ok(result)
    }

    async fn render_waveform(&self, job: &Job, audio: &Path) -> Option<Waveform> {
        let rendered = match self.transcoder.waveform_samples(audio).await {
            Ok(samples) => Waveform::generate(
                &samples,
                self.settings.waveform_width,
                self.settings.waveform_height,
            ),
            Err(e) => Err(e),
        };

        match rendered {
            Ok(waveform) => Some(waveform),
            Err(e) => {
                tracing::warn!("Job {}: waveform generation failed, continuing without: {}", job.id, e);
                None
            }
        }
    }

    async fn probe(&self, job: &Job, audio: &Path) -> Option<AudioInfo> {
        match self.transcoder.probe(audio).await {
            Ok(info) => Some(info),
            Err(e) => {
                tracing::warn!("Job {}: duration probe failed, defaulting to 0: {}", job.id, e);
                None
            }
        }
    }

    /// Best effort: a failure here is logged and never fails the job.
    async fn propagate_status(&self, job: &Job, status: JobStatus) {
        let Some(related_id) = &job.related_id else {
            return;
        };
        let update = AssertUnwindSafe(self.results.set_status(related_id, status)).catch_unwind();
        let error = match update.await {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(panic) => panic_message(panic.as_ref()),
        };
        tracing::warn!(
            "Job {}: failed to mark {} as {}: {}",
            job.id,
            related_id,
            status,
            error
        );
    }

    /// Hand the related-entity id to the completion callback on the blocking pool.
    pub(crate) fn notify_completed(&self, job: &Job) {
        let (Some(callback), Some(related_id)) = (&self.on_complete, &job.related_id) else {
            return;
        };
        let callback = Arc::clone(callback);
        let related_id = related_id.clone();
        tokio::task::spawn_blocking(move || callback(related_id));
    }

    fn output_path(&self, job: &Job) -> PathBuf {
        self.settings.work_dir.join(format!(
            "{}-normalized.{}",
            job.id,
            self.transcoder.output_extension()
        ))
    }

    fn upload_name(&self, job: &Job) -> String {
        let stem = Path::new(&job.filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("audio");
        format!("{}.{}", stem, self.transcoder.output_extension())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
