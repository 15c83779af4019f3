//! Command-line builders for the three transcoder invocations.
//!
//! Kept separate from process spawning so the exact flags can be asserted in tests.

use std::ffi::OsString;
use std::path::Path;

/// Integrated loudness target (streaming standard).
pub const TARGET_LUFS: f64 = -14.0;
/// True-peak ceiling.
pub const TRUE_PEAK_DBTP: f64 = -1.0;
/// Loudness range target.
pub const LOUDNESS_RANGE_LU: f64 = 7.0;
/// Sample rate used when extracting waveform samples.
pub const WAVEFORM_SAMPLE_RATE: u32 = 4_000;

/// Encoding targets for the normalized output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeSettings {
    pub sample_rate: u32,
    pub channels: u8,
    pub bitrate_kbps: u32,
    /// ffmpeg audio encoder name.
    pub encoder: String,
    /// File extension of the encoded output.
    pub extension: String,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
            bitrate_kbps: 128,
            encoder: "libmp3lame".to_string(),
            extension: "mp3".to_string(),
        }
    }
}

/// The `loudnorm` filter with the fixed mastering defaults.
pub fn loudnorm_filter() -> String {
    format!("loudnorm=I={TARGET_LUFS}:TP={TRUE_PEAK_DBTP}:LRA={LOUDNESS_RANGE_LU}")
}

fn base_args() -> Vec<OsString> {
    ["-hide_banner", "-nostats", "-loglevel", "error"]
        .into_iter()
        .map(OsString::from)
        .collect()
}

/// ffmpeg arguments: normalize loudness and re-encode `input` into `output`.
pub fn normalize_args(input: &Path, output: &Path, settings: &EncodeSettings) -> Vec<OsString> {
    let mut args = vec![OsString::from("-y")];
    args.extend(base_args());
    args.push("-i".into());
    args.push(input.into());
    args.push("-vn".into());
    args.push("-map_metadata".into());
    args.push("0".into());
    args.push("-af".into());
    args.push(loudnorm_filter().into());
    args.push("-ar".into());
    args.push(settings.sample_rate.to_string().into());
    args.push("-ac".into());
    args.push(settings.channels.to_string().into());
    args.push("-c:a".into());
    args.push(settings.encoder.as_str().into());
    args.push("-b:a".into());
    args.push(format!("{}k", settings.bitrate_kbps).into());
    args.push(output.into());
    args
}

/// ffmpeg arguments: decode `input` to mono little-endian f32 samples on stdout.
pub fn waveform_args(input: &Path) -> Vec<OsString> {
    let mut args = base_args();
    args.push("-i".into());
    args.push(input.into());
    args.push("-vn".into());
    args.push("-ac".into());
    args.push("1".into());
    args.push("-ar".into());
    args.push(WAVEFORM_SAMPLE_RATE.to_string().into());
    args.push("-f".into());
    args.push("f32le".into());
    args.push("-acodec".into());
    args.push("pcm_f32le".into());
    args.push("pipe:1".into());
    args
}

/// ffprobe arguments: container duration and first audio stream sample rate as JSON.
pub fn probe_args(input: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        "-v",
        "error",
        "-select_streams",
        "a:0",
        "-show_entries",
        "format=duration:stream=sample_rate",
        "-of",
        "json",
    ]
    .into_iter()
    .map(OsString::from)
    .collect();
    args.push(input.into());
    args
}
