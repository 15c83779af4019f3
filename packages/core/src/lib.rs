//! Core domain types for the audio processing engine.
//!
//! This crate contains shared types used across all packages:
//! - Job and JobStatus for work items
//! - JobResult for the artifacts a finished job produced
//! - Events for real-time updates
//! - EngineConfig for queue and pipeline tuning

mod config;
mod events;
mod job;

pub use config::{ChannelLayout, ConfigError, EngineConfig, MAX_WORKERS, default_worker_count};
pub use events::JobEvent;
pub use job::{Job, JobId, JobMetadata, JobResult, JobStatus};
