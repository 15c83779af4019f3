//! Ports to the collaborators the pipeline reports to.
//!
//! Both traits return boxed futures so they can be held as trait objects and
//! replaced by fakes in tests.

use std::future::Future;
use std::pin::Pin;

use audio_core::{JobResult, JobStatus};
use bytes::Bytes;
use db::PostRepository;
use storage::Storage;

pub use storage::UploadedObject;

/// Error type shared by port implementations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Future type for port operations.
pub type PortFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BoxError>> + Send + 'a>>;

/// Persistence collaborator, keyed by the job's related-entity id.
pub trait ResultStore: Send + Sync + 'static {
    /// Record the processing status on the related entity.
    fn set_status<'a>(&'a self, related_id: &'a str, status: JobStatus) -> PortFuture<'a, ()>;

    /// Record the result fields on the related entity and mark it complete.
    fn save_result<'a>(&'a self, related_id: &'a str, result: &'a JobResult)
    -> PortFuture<'a, ()>;
}

/// Object-storage collaborator.
pub trait ArtifactStore: Send + Sync + 'static {
    /// Store processed audio under a fresh key for `owner_id`.
    fn upload_audio<'a>(
        &'a self,
        bytes: Bytes,
        owner_id: &'a str,
        filename: &'a str,
    ) -> PortFuture<'a, UploadedObject>;

    /// Store a waveform image alongside the audio stored at `related_key`. Returns its URL.
    fn upload_waveform<'a>(&'a self, bytes: Bytes, related_key: &'a str)
    -> PortFuture<'a, String>;
}

impl ResultStore for PostRepository {
    fn set_status<'a>(&'a self, related_id: &'a str, status: JobStatus) -> PortFuture<'a, ()> {
        Box::pin(async move {
            self.update_audio_status(related_id, status).await?;
            Ok(())
        })
    }

    fn save_result<'a>(
        &'a self,
        related_id: &'a str,
        result: &'a JobResult,
    ) -> PortFuture<'a, ()> {
        Box::pin(async move {
            self.save_audio_result(related_id, result).await?;
            Ok(())
        })
    }
}

impl ArtifactStore for Storage {
    fn upload_audio<'a>(
        &'a self,
        bytes: Bytes,
        owner_id: &'a str,
        filename: &'a str,
    ) -> PortFuture<'a, UploadedObject> {
        Box::pin(async move { Ok(Storage::upload_audio(self, bytes, owner_id, filename).await?) })
    }

    fn upload_waveform<'a>(
        &'a self,
        bytes: Bytes,
        related_key: &'a str,
    ) -> PortFuture<'a, String> {
        Box::pin(async move {
            let uploaded = Storage::upload_waveform(self, bytes, related_key).await?;
            Ok(uploaded.url)
        })
    }
}
