//! Error types for the queue and the per-job pipeline.

use std::path::PathBuf;
use std::time::Duration;

use audio_core::JobId;
use codec::CodecError;

use crate::ports::BoxError;

/// Errors returned synchronously by queue operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue full: {capacity} jobs already waiting")]
    QueueFull { capacity: usize },

    #[error("queue is stopped")]
    Stopped,

    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("timed out waiting for {pending} job(s) to finish")]
    WaitTimeout { pending: usize },
}

/// Fatal stage failures. The `Display` text becomes the failed job's error message.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("transcode stage failed: {0}")]
    Transcode(#[source] CodecError),

    #[error("reading processed audio {} failed: {source}", .path.display())]
    ReadOutput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("audio upload stage failed ({bytes} bytes): {source}")]
    Upload {
        bytes: usize,
        #[source]
        source: BoxError,
    },

    #[error("persist stage failed for {related_id}: {source}")]
    Persist {
        related_id: String,
        #[source]
        source: BoxError,
    },

    #[error("processing timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("processing panicked: {0}")]
    Panicked(String),
}
