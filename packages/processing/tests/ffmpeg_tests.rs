//! Runs the pipeline against the real ffmpeg/ffprobe binaries.
//!
//! Skipped (passes trivially) when the binaries cannot be launched.

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use codec::{EncodeSettings, FfmpegTranscoder, Transcoder, Waveform};
use common::{MemoryArtifacts, MemoryResults};
use processing::{EngineConfig, JobMetadata, JobQueue, JobStatus, Pipeline};

const SAMPLE_RATE: u32 = 44_100;

/// Write a mono 16-bit PCM WAV holding `secs` of a 440 Hz tone at `amplitude`.
///
/// An amplitude of zero writes digital silence.
fn write_wav(path: &Path, secs: u32, amplitude: f32) -> std::io::Result<()> {
    let samples = SAMPLE_RATE * secs;
    let data_len = samples * 2;

    let mut wav = Vec::with_capacity(44 + data_len as usize);
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVEfmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes());
    wav.extend_from_slice(&SAMPLE_RATE.to_le_bytes());
    wav.extend_from_slice(&(SAMPLE_RATE * 2).to_le_bytes());
    wav.extend_from_slice(&2u16.to_le_bytes());
    wav.extend_from_slice(&16u16.to_le_bytes());
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());
    for n in 0..samples {
        let t = n as f32 / SAMPLE_RATE as f32;
        let sample = ((t * 440.0 * std::f32::consts::TAU).sin() * amplitude) as i16;
        wav.extend_from_slice(&sample.to_le_bytes());
    }

    std::fs::write(path, wav)
}

async fn ffmpeg_available(transcoder: &FfmpegTranscoder) -> bool {
    match transcoder.verify().await {
        Ok(version) => {
            eprintln!("using {version}");
            true
        }
        Err(e) => {
            eprintln!("skipping: {e}");
            false
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn two_second_tone_is_normalized_and_measured() -> Result<(), Box<dyn std::error::Error>> {
    let transcoder = FfmpegTranscoder::new(EncodeSettings::default(), Duration::from_secs(60));
    if !ffmpeg_available(&transcoder).await {
        return Ok(());
    }

    let dir = tempfile::tempdir()?;
    let source = dir.path().join("tone.wav");
    write_wav(&source, 2, 8_000.0)?;

    let artifacts = Arc::new(MemoryArtifacts::default());
    let results = Arc::new(MemoryResults::default());
    let config = EngineConfig::default().with_workers(1).with_work_dir(dir.path());
    let pipeline = Pipeline::builder(Arc::new(transcoder), artifacts.clone(), results.clone())
        .config(&config)
        .build();
    let queue = JobQueue::new(config, pipeline);
    queue.start();

    let job = queue.submit("u1", Some("p1".into()), &source, "tone.wav", JobMetadata::new())?;
    let done = queue.wait_for_completion(job.id, Duration::from_secs(120)).await?;
    queue.shutdown().await;

    assert_eq!(done.status(), JobStatus::Complete, "{:?}", done.error());
    let result = done.result().ok_or("missing result")?;
    assert!(
        (result.duration_secs - 2.0).abs() <= 0.1,
        "duration was {}",
        result.duration_secs
    );
    assert_eq!(result.sample_rate, Some(SAMPLE_RATE));
    assert!(result.file_size > 0);
    assert!(result.waveform_url.is_some());
    assert_eq!(artifacts.object_count(), 2);
    assert!(results.saved("p1").is_some());
    assert!(std::fs::read_dir(dir.path())?.next().is_none());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn two_seconds_of_silence_complete_with_a_flat_waveform() -> Result<(), Box<dyn std::error::Error>> {
    let transcoder = Arc::new(FfmpegTranscoder::new(
        EncodeSettings::default(),
        Duration::from_secs(60),
    ));
    if !ffmpeg_available(&transcoder).await {
        return Ok(());
    }

    let dir = tempfile::tempdir()?;
    let source = dir.path().join("silence.wav");
    write_wav(&source, 2, 0.0)?;

    let samples = transcoder.waveform_samples(&source).await?;
    assert!(!samples.is_empty());
    let flat = Waveform::generate(&samples, 100, 40)?;
    assert!(flat.peaks.iter().all(|p| *p == 0.0));

    let artifacts = Arc::new(MemoryArtifacts::default());
    let results = Arc::new(MemoryResults::default());
    let config = EngineConfig::default().with_workers(1).with_work_dir(dir.path());
    let pipeline = Pipeline::builder(transcoder, artifacts.clone(), results.clone())
        .config(&config)
        .build();
    let queue = JobQueue::new(config, pipeline);
    queue.start();

    let job = queue.submit("u1", Some("p1".into()), &source, "silence.wav", JobMetadata::new())?;
    let done = queue.wait_for_completion(job.id, Duration::from_secs(120)).await?;
    queue.shutdown().await;

    assert_eq!(done.status(), JobStatus::Complete, "{:?}", done.error());
    let result = done.result().ok_or("missing result")?;
    assert!(
        (result.duration_secs - 2.0).abs() <= 0.1,
        "duration was {}",
        result.duration_secs
    );
    assert!(result.file_size > 0);
    assert!(results.saved("p1").is_some());
    assert!(std::fs::read_dir(dir.path())?.next().is_none());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn garbage_input_fails_the_transcode() -> Result<(), Box<dyn std::error::Error>> {
    let transcoder = FfmpegTranscoder::new(EncodeSettings::default(), Duration::from_secs(60));
    if !ffmpeg_available(&transcoder).await {
        return Ok(());
    }

    let dir = tempfile::tempdir()?;
    let source = dir.path().join("noise.wav");
    std::fs::write(&source, b"definitely not audio")?;
    let output = dir.path().join("out.mp3");

    let err = transcoder.normalize(&source, &output).await;
    assert!(err.is_err());
    Ok(())
}
