//! Regenerate waveforms for posts whose audio was processed without one.

use std::path::Path;

use codec::{Transcoder, Waveform};
use db::{AudioPost, PostRepository};
use serde::Serialize;
use storage::Storage;
use tracing::{info, warn};

use crate::BoxError;

/// Outcome of one backfill run.
#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct BackfillReport {
    pub candidates: usize,
    pub updated: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub post_ids: Vec<String>,
}

pub struct Backfill<'a> {
    pub posts: &'a PostRepository,
    pub storage: &'a Storage,
    pub transcoder: &'a dyn Transcoder,
    pub work_dir: &'a Path,
    pub width: u32,
    pub height: u32,
}

impl Backfill<'_> {
    /// With `dry_run`, only list the posts that would be updated.
    pub async fn run(&self, dry_run: bool) -> Result<BackfillReport, BoxError> {
        let candidates = self.posts.list_missing_waveforms().await?;
        let mut report = BackfillReport {
            candidates: candidates.len(),
            ..BackfillReport::default()
        };

        if candidates.is_empty() {
            info!("No posts need a waveform");
            return Ok(report);
        }
        info!("Found {} posts without waveforms", candidates.len());

        if dry_run {
            report.post_ids = candidates.into_iter().map(|p| p.post_id).collect();
            return Ok(report);
        }

        for (i, post) in candidates.iter().enumerate() {
            match self.backfill_post(post).await {
                Ok(url) => {
                    info!("[{}/{}] Post {}: {}", i + 1, report.candidates, post.post_id, url);
                    report.updated += 1;
                    report.post_ids.push(post.post_id.clone());
                }
                Err(e) => {
                    warn!("[{}/{}] Post {} failed: {}", i + 1, report.candidates, post.post_id, e);
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    async fn backfill_post(&self, post: &AudioPost) -> Result<String, BoxError> {
        let audio_url = post.audio_url.as_deref().ok_or("post has no audio url")?;
        let key = self
            .storage
            .key_for_url(audio_url)
            .ok_or_else(|| format!("audio url {audio_url} is not served by this storage"))?;

        let audio = self.storage.get_bytes(&key).await?;
        let ext = Path::new(&key)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin");
        let local = self.work_dir.join(format!("backfill-{}.{}", post.post_id, ext));
        tokio::fs::write(&local, &audio).await?;

        let samples = self.transcoder.waveform_samples(&local).await;
        if let Err(e) = tokio::fs::remove_file(&local).await {
            warn!("Failed to remove {:?}: {}", local, e);
        }

        let waveform = Waveform::generate(&samples?, self.width, self.height)?;
        let uploaded = self
            .storage
            .upload_waveform(waveform.svg.into_bytes().into(), &key)
            .await?;
        self.posts.set_waveform_url(&post.post_id, &uploaded.url).await?;

        Ok(uploaded.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audio_core::JobResult;
    use codec::{AudioInfo, CodecError, CodecFuture};
    use db::DbConfig;
    use storage::StorageConfig;

    struct ToneSamples;

    impl Transcoder for ToneSamples {
        fn normalize<'a>(&'a self, _input: &'a Path, _output: &'a Path) -> CodecFuture<'a, ()> {
            Box::pin(async { Ok(()) })
        }

        fn waveform_samples<'a>(&'a self, input: &'a Path) -> CodecFuture<'a, Vec<f32>> {
            Box::pin(async move {
                let bytes = tokio::fs::read(input).await?;
                if bytes.is_empty() {
                    return Err(CodecError::NoSamples { bytes: 0 });
                }
                Ok((0..800).map(|i| (i as f32 * 0.05).sin()).collect())
            })
        }

        fn probe<'a>(&'a self, _input: &'a Path) -> CodecFuture<'a, AudioInfo> {
            Box::pin(async {
                Ok(AudioInfo {
                    duration_secs: 1.0,
                    sample_rate: None,
                })
            })
        }
    }

    #[tokio::test]
    async fn fills_in_missing_waveforms() -> Result<(), BoxError> {
        let dir = tempfile::tempdir()?;
        let posts = PostRepository::new(db::init(&DbConfig::memory()).await?);
        let storage = Storage::new(StorageConfig::memory()).await?;

        let audio = storage.upload_audio("ID3 data".into(), "u1", "a.mp3").await?;
        posts.create(&AudioPost::new("p1", "u1")).await?;
        posts
            .save_audio_result(
                "p1",
                &JobResult {
                    audio_url: audio.url.clone(),
                    waveform_url: None,
                    duration_secs: 1.0,
                    file_size: audio.size,
                    sample_rate: None,
                },
            )
            .await?;

        let backfill = Backfill {
            posts: &posts,
            storage: &storage,
            transcoder: &ToneSamples,
            work_dir: dir.path(),
            width: 100,
            height: 40,
        };

        let planned = backfill.run(true).await?;
        assert_eq!(planned.candidates, 1);
        assert_eq!(planned.updated, 0);
        assert_eq!(planned.post_ids, vec!["p1".to_string()]);
        assert!(posts.get("p1").await?.waveform_url.is_none());

        let report = backfill.run(false).await?;
        assert_eq!(report.updated, 1);
        assert_eq!(report.failed, 0);

        let post = posts.get("p1").await?;
        let url = post.waveform_url.ok_or("waveform not set")?;
        let key = storage.key_for_url(&url).ok_or("foreign url")?;
        assert!(key.starts_with("waveforms/u1/"));
        let svg = storage.get_bytes(&key).await?;
        assert!(svg.starts_with(b"<svg"));

        assert!(std::fs::read_dir(dir.path())?.next().is_none());
        assert_eq!(backfill.run(false).await?, BackfillReport::default());
        Ok(())
    }
}
