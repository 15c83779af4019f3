//! Background processing of uploaded audio.
//!
//! # Architecture
//!
//! - `JobQueue` - Accepts submissions, owns the status table, runs the worker pool
//! - `Pipeline` - Per-job driver: normalize, waveform, probe, upload, persist
//! - `ResultStore` / `ArtifactStore` - Ports to the persistence and object-storage collaborators
//!
//! # Usage
//!
//! ```ignore
//! use processing::{JobQueue, Pipeline};
//!
//! let pipeline = Pipeline::builder(transcoder, artifacts, results)
//!     .config(&config)
//!     .on_complete(Arc::new(|post_id| reindex(post_id)))
//!     .build();
//! let queue = JobQueue::new(config, pipeline);
//! queue.start();
//!
//! let job = queue.submit("u1", Some("p1".into()), "/tmp/upload.wav", "take.wav", Default::default())?;
//! let finished = queue.wait_for_completion(job.id, Duration::from_secs(60)).await?;
//! ```

mod cleanup;
mod error;
mod pipeline;
mod ports;
mod queue;

pub use error::{PipelineError, QueueError};
pub use pipeline::{CompletionCallback, Pipeline, PipelineBuilder, PipelineSettings};
pub use ports::{ArtifactStore, BoxError, PortFuture, ResultStore, UploadedObject};
pub use queue::{JobQueue, QueueStats, StatusUpdate};

/// Re-export core types for convenience.
pub use audio_core::{EngineConfig, Job, JobEvent, JobId, JobMetadata, JobResult, JobStatus};
