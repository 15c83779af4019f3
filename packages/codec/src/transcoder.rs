//! Transcoder port and its ffmpeg implementation.

use std::ffi::OsString;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::args::{self, EncodeSettings};
use crate::error::stderr_tail;
use crate::probe::{AudioInfo, parse_probe_output};
use crate::waveform::decode_f32le;
use crate::CodecError;

/// Future type for transcoder operations.
pub type CodecFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CodecError>> + Send + 'a>>;

/// The external transcoder, as seen by the pipeline.
///
/// Implement this to replace ffmpeg (tests use an in-process fake).
pub trait Transcoder: Send + Sync + 'static {
    /// Loudness-normalize `input` and encode it into `output`.
    fn normalize<'a>(&'a self, input: &'a Path, output: &'a Path) -> CodecFuture<'a, ()>;

    /// Decode `input` to mono samples at the waveform sample rate.
    fn waveform_samples<'a>(&'a self, input: &'a Path) -> CodecFuture<'a, Vec<f32>>;

    /// Read duration and sample rate of `input`.
    fn probe<'a>(&'a self, input: &'a Path) -> CodecFuture<'a, AudioInfo>;

    /// Extension of files produced by [`Transcoder::normalize`].
    fn output_extension(&self) -> &str {
        "mp3"
    }
}

/// Transcoder backed by the `ffmpeg` and `ffprobe` binaries.
///
/// Every invocation is bounded by `stage_timeout`; the child is killed when
/// the timeout fires or the calling future is dropped.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg_path: String,
    ffprobe_path: String,
    settings: EncodeSettings,
    stage_timeout: Duration,
}

impl FfmpegTranscoder {
    /// Create a transcoder using `FFMPEG_PATH` / `FFPROBE_PATH`, or the binaries on `PATH`.
    pub fn new(settings: EncodeSettings, stage_timeout: Duration) -> Self {
        Self {
            ffmpeg_path: std::env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),
            ffprobe_path: std::env::var("FFPROBE_PATH").unwrap_or_else(|_| "ffprobe".to_string()),
            settings,
            stage_timeout,
        }
    }

    /// Create with explicit binary paths.
    pub fn with_paths(
        ffmpeg_path: impl Into<String>,
        ffprobe_path: impl Into<String>,
        settings: EncodeSettings,
        stage_timeout: Duration,
    ) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
            settings,
            stage_timeout,
        }
    }

    pub fn settings(&self) -> &EncodeSettings {
        &self.settings
    }

    /// Check that both binaries can be launched and ffmpeg has the configured
    /// encoder. Returns ffmpeg's version line.
    ///
    /// Meant to run once at startup, not per job.
    pub async fn verify(&self) -> Result<String, CodecError> {
        let version = self
            .run("ffmpeg version check", &self.ffmpeg_path, vec!["-version".into()])
            .await?;
        self.run("ffprobe version check", &self.ffprobe_path, vec!["-version".into()])
            .await?;

        let encoders = self
            .run(
                "encoder check",
                &self.ffmpeg_path,
                vec!["-hide_banner".into(), "-encoders".into()],
            )
            .await?;
        if !lists_encoder(&String::from_utf8_lossy(&encoders), &self.settings.encoder) {
            return Err(CodecError::EncoderUnavailable {
                encoder: self.settings.encoder.clone(),
            });
        }

        Ok(String::from_utf8_lossy(&version)
            .lines()
            .next()
            .unwrap_or_default()
            .to_string())
    }

    async fn run(
        &self,
        stage: &'static str,
        program: &str,
        args: Vec<OsString>,
    ) -> Result<Vec<u8>, CodecError> {
        tracing::debug!("{}: {} {:?}", stage, program, args);

        let mut cmd = Command::new(program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.stage_timeout, cmd.output()).await {
            Ok(result) => result.map_err(|source| CodecError::Spawn {
                program: program.to_string(),
                source,
            })?,
            Err(_) => {
                return Err(CodecError::Timeout {
                    stage,
                    timeout: self.stage_timeout,
                });
            }
        };

        if !output.status.success() {
            return Err(CodecError::Failed {
                stage,
                status: output.status.to_string(),
                stderr: stderr_tail(&output.stderr),
            });
        }

        Ok(output.stdout)
    }
}

/// Whether `ffmpeg -encoders` output names `encoder` (second column of a listing row).
fn lists_encoder(listing: &str, encoder: &str) -> bool {
    listing
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .any(|name| name == encoder)
}

impl Transcoder for FfmpegTranscoder {
    fn normalize<'a>(&'a self, input: &'a Path, output: &'a Path) -> CodecFuture<'a, ()> {
        Box::pin(async move {
            let args = args::normalize_args(input, output, &self.settings);
            self.run("normalize", &self.ffmpeg_path, args).await?;
            Ok(())
        })
    }

    fn waveform_samples<'a>(&'a self, input: &'a Path) -> CodecFuture<'a, Vec<f32>> {
        Box::pin(async move {
            let stdout = self
                .run("waveform extraction", &self.ffmpeg_path, args::waveform_args(input))
                .await?;
            let samples = decode_f32le(&stdout);
            if samples.is_empty() {
                return Err(CodecError::NoSamples {
                    bytes: stdout.len(),
                });
            }
            Ok(samples)
        })
    }

    fn probe<'a>(&'a self, input: &'a Path) -> CodecFuture<'a, AudioInfo> {
        Box::pin(async move {
            let stdout = self
                .run("probe", &self.ffprobe_path, args::probe_args(input))
                .await?;
            parse_probe_output(&stdout)
        })
    }

    fn output_extension(&self) -> &str {
        &self.settings.extension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let transcoder = FfmpegTranscoder::with_paths(
            "/nonexistent/ffmpeg",
            "/nonexistent/ffprobe",
            EncodeSettings::default(),
            Duration::from_secs(5),
        );

        let err = transcoder.verify().await;
        assert!(matches!(err, Err(CodecError::Spawn { .. })));

        let err = transcoder
            .normalize(Path::new("/tmp/in.wav"), Path::new("/tmp/out.mp3"))
            .await;
        match err {
            Err(CodecError::Spawn { program, .. }) => assert_eq!(program, "/nonexistent/ffmpeg"),
            other => panic!("expected spawn error, got {other:?}"),
        }
    }

    #[test]
    fn finds_encoder_in_listing() {
        let listing = "\
Encoders:
 V..... = Video
 ------
 A....D aac                  AAC (Advanced Audio Coding)
 A....D libmp3lame           libmp3lame MP3 (MPEG audio layer 3) (codec mp3)
";
        assert!(lists_encoder(listing, "libmp3lame"));
        assert!(lists_encoder(listing, "aac"));
        assert!(!lists_encoder(listing, "libopus"));
        assert!(!lists_encoder(listing, "MP3"));
    }

    #[test]
    fn extension_follows_settings() {
        let settings = EncodeSettings {
            encoder: "aac".into(),
            extension: "m4a".into(),
            ..EncodeSettings::default()
        };
        let transcoder = FfmpegTranscoder::with_paths("ffmpeg", "ffprobe", settings, Duration::from_secs(1));
        assert_eq!(transcoder.output_extension(), "m4a");
    }
}
