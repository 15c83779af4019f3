//! Engine configuration for the queue and the pipeline it drives.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Upper bound on concurrent workers. Each worker runs its own ffmpeg process.
pub const MAX_WORKERS: usize = 8;

/// Available CPU parallelism, capped at [`MAX_WORKERS`].
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .clamp(1, MAX_WORKERS)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Output channel layout of the normalized audio.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelLayout {
    Mono,
    #[default]
    Stereo,
}

impl ChannelLayout {
    pub fn channel_count(self) -> u8 {
        match self {
            ChannelLayout::Mono => 1,
            ChannelLayout::Stereo => 2,
        }
    }
}

impl FromStr for ChannelLayout {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mono" | "1" => Ok(ChannelLayout::Mono),
            "stereo" | "2" => Ok(ChannelLayout::Stereo),
            other => Err(ConfigError::Invalid(format!(
                "unsupported channel layout {other} (expected mono|stereo)"
            ))),
        }
    }
}

/// Configuration for queue behavior and encoding targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of concurrent workers.
    pub workers: usize,
    /// Slots in the bounded work channel. Submissions beyond this fail fast.
    pub queue_capacity: usize,
    /// Slots in the completion-notification channel. Notifications beyond this are dropped.
    pub completion_buffer: usize,
    /// Budget for one job's whole pipeline (seconds).
    pub job_timeout_secs: u64,
    /// Budget for each external transcoder invocation (seconds).
    pub stage_timeout_secs: u64,
    /// Directory for intermediate output files.
    pub work_dir: PathBuf,
    /// Waveform canvas width in pixels; also the number of peak buckets.
    pub waveform_width: u32,
    /// Waveform canvas height in pixels.
    pub waveform_height: u32,
    /// Output channel layout.
    pub channels: ChannelLayout,
    /// Output bitrate in kbps.
    pub bitrate_kbps: u32,
    /// Output sample rate in Hz.
    pub sample_rate: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: default_worker_count(),
            queue_capacity: 100,
            completion_buffer: 100,
            job_timeout_secs: 600,
            stage_timeout_secs: 300,
            work_dir: std::env::temp_dir(),
            waveform_width: 400,
            waveform_height: 100,
            channels: ChannelLayout::Stereo,
            bitrate_kbps: 128,
            sample_rate: 44_100,
        }
    }
}

impl EngineConfig {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    /// Set the worker count (at least one).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set the work channel capacity (at least one).
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set the completion notification buffer (at least one).
    pub fn with_completion_buffer(mut self, buffer: usize) -> Self {
        self.completion_buffer = buffer.max(1);
        self
    }

    /// Set the intermediate-file directory.
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    /// Set the per-job timeout.
    pub fn with_job_timeout(mut self, secs: u64) -> Self {
        self.job_timeout_secs = secs;
        self
    }

    /// Build a config from environment variables, falling back to defaults.
    ///
    /// - `AUDIO_WORKERS` (capped at [`MAX_WORKERS`])
    /// - `AUDIO_QUEUE_CAPACITY`, `AUDIO_COMPLETION_BUFFER`
    /// - `AUDIO_JOB_TIMEOUT_SECS`, `AUDIO_STAGE_TIMEOUT_SECS`
    /// - `AUDIO_WORK_DIR`
    /// - `AUDIO_WAVEFORM_WIDTH`, `AUDIO_WAVEFORM_HEIGHT`
    /// - `AUDIO_CHANNELS` (`mono|stereo`), `AUDIO_BITRATE_KBPS`
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Some(workers) = parse_env::<usize>("AUDIO_WORKERS")? {
            cfg.workers = workers.clamp(1, MAX_WORKERS);
        }
        if let Some(capacity) = parse_env::<usize>("AUDIO_QUEUE_CAPACITY")? {
            cfg.queue_capacity = capacity.max(1);
        }
        if let Some(buffer) = parse_env::<usize>("AUDIO_COMPLETION_BUFFER")? {
            cfg.completion_buffer = buffer.max(1);
        }
        if let Some(secs) = parse_env("AUDIO_JOB_TIMEOUT_SECS")? {
            cfg.job_timeout_secs = secs;
        }
        if let Some(secs) = parse_env("AUDIO_STAGE_TIMEOUT_SECS")? {
            cfg.stage_timeout_secs = secs;
        }
        if let Some(dir) = env_string("AUDIO_WORK_DIR") {
            cfg.work_dir = PathBuf::from(dir);
        }
        if let Some(width) = parse_env::<u32>("AUDIO_WAVEFORM_WIDTH")? {
            cfg.waveform_width = width.max(1);
        }
        if let Some(height) = parse_env::<u32>("AUDIO_WAVEFORM_HEIGHT")? {
            cfg.waveform_height = height.max(1);
        }
        if let Some(channels) = env_string("AUDIO_CHANNELS") {
            cfg.channels = channels.parse()?;
        }
        if let Some(kbps) = parse_env("AUDIO_BITRATE_KBPS")? {
            cfg.bitrate_kbps = kbps;
        }

        Ok(cfg)
    }
}

fn env_string(var_name: &str) -> Option<String> {
    let v = std::env::var(var_name).ok()?;
    let trimmed = v.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_env<T: FromStr>(var_name: &str) -> Result<Option<T>, ConfigError> {
    match env_string(var_name) {
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(format!("invalid value for {var_name}={v}"))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_mastering_targets() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.queue_capacity, 100);
        assert_eq!(cfg.waveform_width, 400);
        assert_eq!(cfg.waveform_height, 100);
        assert_eq!(cfg.sample_rate, 44_100);
        assert_eq!(cfg.bitrate_kbps, 128);
        assert!((1..=MAX_WORKERS).contains(&cfg.workers));
    }

    #[test]
    fn channel_layout_parses() -> Result<(), ConfigError> {
        assert_eq!("Mono".parse::<ChannelLayout>()?, ChannelLayout::Mono);
        assert_eq!("2".parse::<ChannelLayout>()?.channel_count(), 2);
        assert!("surround".parse::<ChannelLayout>().is_err());
        Ok(())
    }

    #[test]
    fn builders_clamp_to_one() {
        let cfg = EngineConfig::default()
            .with_workers(0)
            .with_queue_capacity(0)
            .with_completion_buffer(0);
        assert_eq!(cfg.workers, 1);
        assert_eq!(cfg.queue_capacity, 1);
        assert_eq!(cfg.completion_buffer, 1);
    }

    #[test]
    fn partial_json_uses_defaults() -> Result<(), serde_json::Error> {
        let cfg: EngineConfig = serde_json::from_str(r#"{"workers": 2, "channels": "mono"}"#)?;
        assert_eq!(cfg.workers, 2);
        assert_eq!(cfg.channels, ChannelLayout::Mono);
        assert_eq!(cfg.job_timeout_secs, 600);
        Ok(())
    }
}
