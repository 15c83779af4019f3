#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use codec::{AudioInfo, CodecError, CodecFuture, Transcoder};
use parking_lot::Mutex;
use processing::{
    ArtifactStore, CompletionCallback, EngineConfig, JobQueue, JobResult, JobStatus, Pipeline,
    PortFuture, ResultStore, UploadedObject,
};

/// In-process stand-in for ffmpeg.
///
/// `normalize` copies the input to the output (so a missing source fails the
/// way a real decoder would), after an optional delay.
pub struct FakeTranscoder {
    pub delay: Duration,
    pub fail_normalize: bool,
    pub fail_probe: bool,
    pub fail_waveform: bool,
    pub duration_secs: f64,
    pub active: AtomicUsize,
    pub peak: AtomicUsize,
}

impl Default for FakeTranscoder {
    fn default() -> Self {
        Self {
            delay: Duration::ZERO,
            fail_normalize: false,
            fail_probe: false,
            fail_waveform: false,
            duration_secs: 2.0,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }
}

impl FakeTranscoder {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Highest number of concurrent `normalize` calls observed.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Transcoder for FakeTranscoder {
    fn normalize<'a>(&'a self, input: &'a Path, output: &'a Path) -> CodecFuture<'a, ()> {
        Box::pin(async move {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let outcome = async {
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                if self.fail_normalize {
                    return Err(CodecError::Failed {
                        stage: "normalize",
                        status: "exit status: 1".into(),
                        stderr: "Invalid data found when processing input".into(),
                    });
                }
                let data = tokio::fs::read(input).await?;
                tokio::fs::write(output, data).await?;
                Ok(())
            }
            .await;

            self.active.fetch_sub(1, Ordering::SeqCst);
            outcome
        })
    }

    fn waveform_samples<'a>(&'a self, _input: &'a Path) -> CodecFuture<'a, Vec<f32>> {
        Box::pin(async move {
            if self.fail_waveform {
                return Err(CodecError::NoSamples { bytes: 0 });
            }
            Ok((0..4000).map(|i| ((i as f32) / 100.0).sin() * 0.5).collect())
        })
    }

    fn probe<'a>(&'a self, _input: &'a Path) -> CodecFuture<'a, AudioInfo> {
        Box::pin(async move {
            if self.fail_probe {
                return Err(CodecError::Probe("missing format section".into()));
            }
            Ok(AudioInfo {
                duration_secs: self.duration_secs,
                sample_rate: Some(44_100),
            })
        })
    }
}

/// Records status updates and results per related id.
#[derive(Default)]
pub struct MemoryResults {
    pub fail_save: bool,
    statuses: Mutex<Vec<(String, JobStatus)>>,
    saved: Mutex<HashMap<String, JobResult>>,
}

impl MemoryResults {
    pub fn failing() -> Self {
        Self {
            fail_save: true,
            ..Self::default()
        }
    }

    pub fn statuses_for(&self, related_id: &str) -> Vec<JobStatus> {
        self.statuses
            .lock()
            .iter()
            .filter(|(id, _)| id == related_id)
            .map(|(_, status)| *status)
            .collect()
    }

    pub fn is_untouched(&self) -> bool {
        self.statuses.lock().is_empty() && self.saved.lock().is_empty()
    }

    pub fn saved(&self, related_id: &str) -> Option<JobResult> {
        self.saved.lock().get(related_id).cloned()
    }
}

impl ResultStore for MemoryResults {
    fn set_status<'a>(&'a self, related_id: &'a str, status: JobStatus) -> PortFuture<'a, ()> {
        Box::pin(async move {
            self.statuses.lock().push((related_id.to_string(), status));
            Ok(())
        })
    }

    fn save_result<'a>(&'a self, related_id: &'a str, result: &'a JobResult) -> PortFuture<'a, ()> {
        Box::pin(async move {
            if self.fail_save {
                return Err("database unavailable".into());
            }
            self.saved.lock().insert(related_id.to_string(), result.clone());
            Ok(())
        })
    }
}

/// Keeps uploads in memory; either upload kind can be made to fail.
#[derive(Default)]
pub struct MemoryArtifacts {
    pub fail_audio: bool,
    pub fail_waveform: bool,
    /// The next audio upload panics instead of returning.
    pub panic_next_audio: AtomicBool,
    pub objects: Mutex<HashMap<String, Bytes>>,
}

impl MemoryArtifacts {
    pub fn panicking_once() -> Self {
        Self {
            panic_next_audio: AtomicBool::new(true),
            ..Self::default()
        }
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().len()
    }
}

impl ArtifactStore for MemoryArtifacts {
    fn upload_audio<'a>(
        &'a self,
        bytes: Bytes,
        owner_id: &'a str,
        filename: &'a str,
    ) -> PortFuture<'a, UploadedObject> {
        Box::pin(async move {
            if self.panic_next_audio.swap(false, Ordering::SeqCst) {
                panic!("storage client poisoned");
            }
            if self.fail_audio {
                return Err("bucket rejected upload".into());
            }
            let key = format!("audio/{}/{}", owner_id, filename);
            let size = bytes.len() as u64;
            self.objects.lock().insert(key.clone(), bytes);
            Ok(UploadedObject {
                url: format!("memory://test/{}", key),
                key,
                size,
            })
        })
    }

    fn upload_waveform<'a>(&'a self, bytes: Bytes, related_key: &'a str) -> PortFuture<'a, String> {
        Box::pin(async move {
            if self.fail_waveform {
                return Err("bucket rejected waveform".into());
            }
            let key = format!("waveforms/{}.svg", related_key);
            self.objects.lock().insert(key.clone(), bytes);
            Ok(format!("memory://test/{}", key))
        })
    }
}

/// Everything a queue test needs, sharing one temp work dir.
pub struct Harness {
    pub queue: JobQueue,
    pub transcoder: Arc<FakeTranscoder>,
    pub artifacts: Arc<MemoryArtifacts>,
    pub results: Arc<MemoryResults>,
    pub dir: tempfile::TempDir,
}

impl Harness {
    /// Write a fake upload into the work dir and return its path.
    pub fn source_file(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, b"RIFF....WAVEfmt fake audio payload").expect("write source");
        path
    }

    /// Files left behind in the work dir.
    pub fn leftover_files(&self) -> Vec<PathBuf> {
        std::fs::read_dir(self.dir.path())
            .expect("read work dir")
            .filter_map(|e| e.ok().map(|e| e.path()))
            .collect()
    }
}

pub struct HarnessBuilder {
    config: EngineConfig,
    transcoder: FakeTranscoder,
    artifacts: MemoryArtifacts,
    results: MemoryResults,
    callback: Option<CompletionCallback>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default().with_workers(2).with_job_timeout(30),
            transcoder: FakeTranscoder::default(),
            artifacts: MemoryArtifacts::default(),
            results: MemoryResults::default(),
            callback: None,
        }
    }

    pub fn config(mut self, f: impl FnOnce(EngineConfig) -> EngineConfig) -> Self {
        self.config = f(self.config);
        self
    }

    pub fn transcoder(mut self, transcoder: FakeTranscoder) -> Self {
        self.transcoder = transcoder;
        self
    }

    pub fn artifacts(mut self, artifacts: MemoryArtifacts) -> Self {
        self.artifacts = artifacts;
        self
    }

    pub fn results(mut self, results: MemoryResults) -> Self {
        self.results = results;
        self
    }

    pub fn on_complete(mut self, callback: CompletionCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn build(self) -> Harness {
        let dir = tempfile::tempdir().expect("create work dir");
        let config = self.config.with_work_dir(dir.path());

        let transcoder = Arc::new(self.transcoder);
        let artifacts = Arc::new(self.artifacts);
        let results = Arc::new(self.results);

        let mut builder = Pipeline::builder(transcoder.clone(), artifacts.clone(), results.clone())
            .config(&config);
        if let Some(callback) = self.callback {
            builder = builder.on_complete(callback);
        }

        Harness {
            queue: JobQueue::new(config, builder.build()),
            transcoder,
            artifacts,
            results,
            dir,
        }
    }
}

/// Default harness: two workers, fast fake stages.
pub fn harness() -> Harness {
    HarnessBuilder::new().build()
}
