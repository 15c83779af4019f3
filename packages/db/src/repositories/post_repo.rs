//! Post repository: the persisted side of audio processing.

use audio_core::{JobResult, JobStatus};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{Database, DbError};

/// A post as stored in the `post` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioPost {
    pub post_id: String,
    pub owner_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub audio_status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waveform_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    pub created_at: String,
    pub updated_at: String,
}

impl AudioPost {
    /// A fresh post whose audio has not been processed yet.
    pub fn new(post_id: impl Into<String>, owner_id: impl Into<String>) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            post_id: post_id.into(),
            owner_id: owner_id.into(),
            title: None,
            audio_status: JobStatus::Pending,
            audio_url: None,
            waveform_url: None,
            duration_secs: None,
            sample_rate: None,
            file_size: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Set the title for this post.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Repository for post persistence operations.
#[derive(Clone)]
pub struct PostRepository {
    db: Database,
}

impl PostRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a new post.
    pub async fn create(&self, post: &AudioPost) -> Result<AudioPost, DbError> {
        let record: Option<AudioPost> = self
            .db
            .create(("post", post.post_id.clone()))
            .content(post.clone())
            .await?;

        record.ok_or_else(|| DbError::Query("Failed to create post".into()))
    }

    /// Get a post by ID.
    pub async fn get(&self, post_id: &str) -> Result<AudioPost, DbError> {
        let record: Option<AudioPost> = self.db.select(("post", post_id.to_string())).await?;

        record.ok_or_else(|| DbError::NotFound(format!("Post not found: {}", post_id)))
    }

    /// Update the processing status of a post's audio.
    pub async fn update_audio_status(
        &self,
        post_id: &str,
        status: JobStatus,
    ) -> Result<AudioPost, DbError> {
        let record: Option<AudioPost> = self
            .db
            .update(("post", post_id.to_string()))
            .merge(serde_json::json!({
                "audio_status": status,
                "updated_at": Utc::now().to_rfc3339(),
            }))
            .await?;

        record.ok_or_else(|| DbError::NotFound(format!("Post not found: {}", post_id)))
    }

    /// Store the processed artifacts on a post and mark its audio complete.
    ///
    /// Absent optional fields (waveform URL, sample rate) are left unset rather than nulled.
    pub async fn save_audio_result(
        &self,
        post_id: &str,
        result: &JobResult,
    ) -> Result<AudioPost, DbError> {
        let mut fields = serde_json::Map::new();
        fields.insert("audio_status".into(), serde_json::json!(JobStatus::Complete));
        fields.insert("audio_url".into(), serde_json::json!(result.audio_url));
        fields.insert("duration_secs".into(), serde_json::json!(result.duration_secs));
        fields.insert("file_size".into(), serde_json::json!(result.file_size));
        fields.insert("updated_at".into(), serde_json::json!(Utc::now().to_rfc3339()));
        if let Some(url) = &result.waveform_url {
            fields.insert("waveform_url".into(), serde_json::json!(url));
        }
        if let Some(rate) = result.sample_rate {
            fields.insert("sample_rate".into(), serde_json::json!(rate));
        }

        let record: Option<AudioPost> = self
            .db
            .update(("post", post_id.to_string()))
            .merge(serde_json::Value::Object(fields))
            .await?;

        record.ok_or_else(|| DbError::NotFound(format!("Post not found: {}", post_id)))
    }

    /// List posts whose audio is in the given status.
    pub async fn list_by_status(&self, status: JobStatus) -> Result<Vec<AudioPost>, DbError> {
        let mut response = self
            .db
            .query("SELECT * FROM post WHERE audio_status = $status ORDER BY created_at ASC")
            .bind(("status", status.as_str()))
            .await?;

        let posts: Vec<AudioPost> = response.take(0)?;
        Ok(posts)
    }

    /// Completed posts that have audio but no waveform, oldest first.
    pub async fn list_missing_waveforms(&self) -> Result<Vec<AudioPost>, DbError> {
        let mut response = self
            .db
            .query(
                "SELECT * FROM post WHERE audio_status = $status \
                 AND audio_url != NONE AND waveform_url = NONE ORDER BY created_at ASC",
            )
            .bind(("status", JobStatus::Complete.as_str()))
            .await?;

        let posts: Vec<AudioPost> = response.take(0)?;
        Ok(posts)
    }

    /// Attach a waveform URL to an existing post.
    pub async fn set_waveform_url(&self, post_id: &str, url: &str) -> Result<AudioPost, DbError> {
        let record: Option<AudioPost> = self
            .db
            .update(("post", post_id.to_string()))
            .merge(serde_json::json!({
                "waveform_url": url,
                "updated_at": Utc::now().to_rfc3339(),
            }))
            .await?;

        record.ok_or_else(|| DbError::NotFound(format!("Post not found: {}", post_id)))
    }

    /// Delete a post.
    pub async fn delete(&self, post_id: &str) -> Result<(), DbError> {
        let _: Option<AudioPost> = self.db.delete(("post", post_id.to_string())).await?;

        Ok(())
    }
}
