//! Job domain types for audio processing work items.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique identifier for a job, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller-supplied key/value bag (musical key, tempo, ...). Passed through untouched.
pub type JobMetadata = serde_json::Map<String, serde_json::Value>;

/// Current status of a job in its lifecycle.
///
/// `Pending -> Processing -> (Complete | Failed)`. The last two are terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is waiting for a worker.
    #[default]
    Pending,
    /// Job was dequeued and is running through the pipeline.
    Processing,
    /// Job finished and its result is available.
    Complete,
    /// Job failed; the error message says why.
    Failed,
}

impl JobStatus {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }

    /// Get a simple status string for display and persistence.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a successfully processed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    /// Public URL of the normalized, encoded audio.
    pub audio_url: String,
    /// Public URL of the rendered waveform, absent if rendering or upload degraded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waveform_url: Option<String>,
    /// Duration in seconds; zero when the probe failed.
    pub duration_secs: f64,
    /// Size of the processed audio in bytes.
    pub file_size: u64,
    /// Sample rate reported by the probe, if it succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
}

/// A job represents one uploaded file travelling through the pipeline.
///
/// Lifecycle fields are private: they only move through [`Job::start`],
/// [`Job::complete`] and [`Job::fail`], which enforce the state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for this job.
    pub id: JobId,
    /// User that uploaded the audio.
    pub owner_id: String,
    /// Entity (e.g. a post) whose persisted record receives the outcome.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_id: Option<String>,
    /// Temporary source file. Deleted by the pipeline once the job ends.
    pub source_path: PathBuf,
    /// Filename as uploaded.
    pub filename: String,
    /// Caller metadata.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: JobMetadata,
    status: JobStatus,
    /// When the job was submitted.
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<JobResult>,
}

impl Job {
    /// Create a new pending job.
    pub fn new(
        owner_id: impl Into<String>,
        related_id: Option<String>,
        source_path: impl Into<PathBuf>,
        filename: impl Into<String>,
        metadata: JobMetadata,
    ) -> Self {
        Self {
            id: JobId::new(),
            owner_id: owner_id.into(),
            related_id,
            source_path: source_path.into(),
            filename: filename.into(),
            metadata,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            error: None,
            result: None,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Set exactly once, on entering a terminal state.
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn result(&self) -> Option<&JobResult> {
        self.result.as_ref()
    }

    /// Move `Pending -> Processing`. Returns `false` if the job was not pending.
    pub fn start(&mut self) -> bool {
        if self.status != JobStatus::Pending {
            return false;
        }
        self.status = JobStatus::Processing;
        true
    }

    /// Move `Processing -> Complete`. Returns `false` and leaves the job untouched otherwise.
    pub fn complete(&mut self, result: JobResult) -> bool {
        if self.status != JobStatus::Processing {
            return false;
        }
        self.status = JobStatus::Complete;
        self.completed_at = Some(Utc::now());
        self.result = Some(result);
        true
    }

    /// Move `Processing -> Failed`. Returns `false` and leaves the job untouched otherwise.
    pub fn fail(&mut self, error: impl Into<String>) -> bool {
        if self.status != JobStatus::Processing {
            return false;
        }
        self.status = JobStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error = Some(error.into());
        true
    }
}
