//! Codec pipeline for uploaded audio.
//!
//! Stateless building blocks the processing queue drives for every job:
//! - loudness normalization and re-encode (`Transcoder::normalize`)
//! - low-rate sample extraction and waveform rendering (`waveform`)
//! - duration and sample-rate probing (`Transcoder::probe`)
//!
//! The external tool sits behind the [`Transcoder`] trait so tests can swap
//! in a fake; [`FfmpegTranscoder`] is the production implementation.

pub mod args;
mod error;
mod probe;
mod transcoder;
pub mod waveform;

pub use args::EncodeSettings;
pub use error::CodecError;
pub use probe::{AudioInfo, parse_probe_output};
pub use transcoder::{CodecFuture, FfmpegTranscoder, Transcoder};
pub use waveform::Waveform;
