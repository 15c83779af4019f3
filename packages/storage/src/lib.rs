//! Object storage for processed audio and waveform artifacts.
//!
//! Goal:
//! - S3-compatible storage in production/staging
//! - On-disk storage for local dev
//! - In-memory storage for tests
//!
//! A thin wrapper around `object_store`'s S3, local filesystem and in-memory
//! backends. Keys are laid out as `audio/<owner>/<ulid>.<ext>` and
//! `waveforms/<owner>/<ulid>.svg`.

use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use object_store::ObjectStore;
use object_store::ObjectStoreExt;
use object_store::path::Path;
use ulid::Ulid;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid storage config: {0}")]
    InvalidConfig(String),

    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object_store error: {0}")]
    ObjectStore(#[from] object_store::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    S3,
    Filesystem,
    Memory,
}

impl StorageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageKind::S3 => "s3",
            StorageKind::Filesystem => "filesystem",
            StorageKind::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub allow_http: bool,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub virtual_hosted_style: bool,
}

impl S3Config {
    /// Where objects of this bucket are publicly reachable when no explicit base is configured.
    fn default_base_url(&self) -> String {
        match self.endpoint.as_deref() {
            Some(endpoint) => format!("{}/{}", endpoint.trim_end_matches('/'), self.bucket),
            None => format!("https://{}.s3.{}.amazonaws.com", self.bucket, self.region),
        }
    }
}

#[derive(Debug, Clone)]
pub enum StorageBackendConfig {
    S3(S3Config),
    Filesystem { root: PathBuf },
    Memory,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackendConfig,
    /// Optional key prefix applied to all object keys.
    pub prefix: Option<String>,
    /// Base URL artifacts are served from (e.g. a CDN). Defaults per backend.
    pub public_url: Option<String>,
}

impl StorageConfig {
    pub fn memory() -> Self {
        Self {
            backend: StorageBackendConfig::Memory,
            prefix: None,
            public_url: None,
        }
    }

    pub fn filesystem(root: impl Into<PathBuf>) -> Self {
        Self {
            backend: StorageBackendConfig::Filesystem { root: root.into() },
            prefix: None,
            public_url: None,
        }
    }

    pub fn s3(cfg: S3Config) -> Self {
        Self {
            backend: StorageBackendConfig::S3(cfg),
            prefix: None,
            public_url: None,
        }
    }

    /// Set the public base URL.
    pub fn with_public_url(mut self, url: impl Into<String>) -> Self {
        self.public_url = Some(url.into());
        self
    }

    /// Build a config from environment variables.
    ///
    /// Selection rules:
    /// - If `STORAGE_BACKEND` is set: use it (`s3`, `filesystem`, `memory`)
    /// - Otherwise: default to filesystem (`./data/object_store`)
    ///
    /// S3 env vars (S3-compatible):
    /// - `S3_BUCKET` (required when backend is `s3`)
    /// - `AWS_REGION` (default: `us-east-1`)
    /// - `S3_ENDPOINT` (optional, e.g. `http://localhost:9000`)
    /// - `S3_ALLOW_HTTP` (`true`/`false`, default: auto true if endpoint is http://)
    /// - `S3_VIRTUAL_HOSTED_STYLE` (`true`/`false`, default: false)
    /// - `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, `AWS_SESSION_TOKEN` (optional)
    ///
    /// Filesystem env vars:
    /// - `STORAGE_FS_ROOT` (default: `./data/object_store`)
    ///
    /// Common:
    /// - `STORAGE_PREFIX` (optional, e.g. `uploads/`)
    /// - `STORAGE_PUBLIC_URL` (optional, e.g. `https://cdn.example.com`)
    pub fn from_env() -> Result<Self, StorageError> {
        let backend = std::env::var("STORAGE_BACKEND").ok();
        let prefix = std::env::var("STORAGE_PREFIX").ok().and_then(non_empty);
        let public_url = std::env::var("STORAGE_PUBLIC_URL").ok().and_then(non_empty);

        let cfg = match backend.as_deref() {
            Some("s3") => Self::s3(read_s3_config()?),
            Some("filesystem") | Some("fs") | None => Self::filesystem(fs_root_from_env()),
            Some("memory") | Some("mem") => Self::memory(),
            Some(other) => {
                return Err(StorageError::InvalidConfig(format!(
                    "unsupported STORAGE_BACKEND={other} (expected s3|filesystem|memory)"
                )));
            }
        };

        Ok(Self {
            prefix,
            public_url,
            ..cfg
        })
    }
}

/// Where an uploaded artifact landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedObject {
    pub url: String,
    /// Object key, without the storage prefix.
    pub key: String,
    pub size: u64,
}

#[derive(Clone)]
pub struct Storage {
    kind: StorageKind,
    store: Arc<dyn ObjectStore>,
    prefix: Option<String>,
    base_url: String,
}

impl Storage {
    pub fn kind(&self) -> StorageKind {
        self.kind
    }

    pub fn kind_str(&self) -> &'static str {
        self.kind.as_str()
    }

    pub async fn new(cfg: StorageConfig) -> Result<Self, StorageError> {
        let (kind, store, default_base) = match cfg.backend {
            StorageBackendConfig::S3(s3) => {
                let base = s3.default_base_url();
                (StorageKind::S3, Arc::new(build_s3(s3).await?) as _, base)
            }
            StorageBackendConfig::Filesystem { root } => {
                ensure_dir(&root)?;
                let fs = object_store::local::LocalFileSystem::new_with_prefix(&root)?;
                let base = format!("file://{}", root.display());
                (StorageKind::Filesystem, Arc::new(fs) as _, base)
            }
            StorageBackendConfig::Memory => {
                let mem = object_store::memory::InMemory::new();
                (StorageKind::Memory, Arc::new(mem) as _, "memory://local".to_string())
            }
        };

        let base_url = cfg
            .public_url
            .and_then(non_empty)
            .unwrap_or(default_base)
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            kind,
            store,
            prefix: cfg.prefix.and_then(non_empty),
            base_url,
        })
    }

    pub async fn from_env() -> Result<Self, StorageError> {
        Self::new(StorageConfig::from_env()?).await
    }

    fn to_path(&self, key: &str) -> Result<Path, StorageError> {
        let key = key.trim_start_matches('/');
        if key.is_empty() {
            return Err(StorageError::InvalidKey(
                "object key must not be empty".to_string(),
            ));
        }

        let joined = match self.prefix.as_deref() {
            Some(prefix) => {
                let prefix = prefix.trim_matches('/');
                if prefix.is_empty() {
                    key.to_string()
                } else {
                    format!("{prefix}/{key}")
                }
            }
            None => key.to_string(),
        };

        Ok(Path::from(joined))
    }

    /// Public URL of the object stored under `key`.
    pub fn url_for(&self, key: &str) -> Result<String, StorageError> {
        let path = self.to_path(key)?;
        Ok(format!("{}/{}", self.base_url, path))
    }

    /// Inverse of [`Storage::url_for`]: the key behind a URL this storage handed out.
    pub fn key_for_url(&self, url: &str) -> Option<String> {
        let path = url.strip_prefix(self.base_url.as_str())?.strip_prefix('/')?;
        let key = match self.prefix.as_deref().map(|p| p.trim_matches('/')) {
            Some(prefix) if !prefix.is_empty() => path.strip_prefix(prefix)?.strip_prefix('/')?,
            _ => path,
        };
        (!key.is_empty()).then(|| key.to_string())
    }

    pub async fn put_bytes(&self, key: &str, bytes: Bytes) -> Result<(), StorageError> {
        let path = self.to_path(key)?;
        self.store
            .put(&path, object_store::PutPayload::from(bytes))
            .await?;
        Ok(())
    }

    pub async fn get_bytes(&self, key: &str) -> Result<Bytes, StorageError> {
        let path = self.to_path(key)?;
        let res = self.store.get(&path).await?;
        Ok(res.bytes().await?)
    }

    /// Store processed audio under `audio/<owner>/<fresh id>.<ext>`.
    ///
    /// The extension is taken from `filename`; the rest of the name is not used.
    pub async fn upload_audio(
        &self,
        bytes: Bytes,
        owner_id: &str,
        filename: &str,
    ) -> Result<UploadedObject, StorageError> {
        let owner = key_segment(owner_id);
        if owner.is_empty() {
            return Err(StorageError::InvalidKey("owner id must not be empty".into()));
        }
        let ext = FsPath::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(key_segment)
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| "bin".to_string());

        let key = format!("audio/{owner}/{}.{ext}", Ulid::new());
        self.upload(key, bytes).await
    }

    /// Store a waveform image next to the audio object it was rendered from.
    ///
    /// `audio/<owner>/<id>.mp3` maps to `waveforms/<owner>/<id>.svg`.
    pub async fn upload_waveform(
        &self,
        bytes: Bytes,
        related_key: &str,
    ) -> Result<UploadedObject, StorageError> {
        let without_ext = FsPath::new(related_key.trim_start_matches('/')).with_extension("");
        let without_ext = without_ext.to_string_lossy();
        let stem: &str = without_ext
            .strip_prefix("audio/")
            .unwrap_or(without_ext.as_ref());
        if stem.is_empty() {
            return Err(StorageError::InvalidKey(format!(
                "cannot derive waveform key from {related_key:?}"
            )));
        }

        let key = format!("waveforms/{stem}.svg");
        self.upload(key, bytes).await
    }

    async fn upload(&self, key: String, bytes: Bytes) -> Result<UploadedObject, StorageError> {
        let size = bytes.len() as u64;
        self.put_bytes(&key, bytes).await?;
        let url = self.url_for(&key)?;
        tracing::debug!("Uploaded {} bytes to {}", size, key);
        Ok(UploadedObject { url, key, size })
    }
}

/// Restrict a user-supplied value to characters safe inside one key segment.
fn key_segment(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn ensure_dir(root: &FsPath) -> Result<(), StorageError> {
    std::fs::create_dir_all(root)?;
    Ok(())
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn fs_root_from_env() -> PathBuf {
    std::env::var("STORAGE_FS_ROOT")
        .ok()
        .and_then(non_empty)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("./data/object_store"))
}

fn parse_bool_env(var_name: &str) -> Result<Option<bool>, StorageError> {
    let v = match std::env::var(var_name) {
        Ok(v) => v,
        Err(std::env::VarError::NotPresent) => return Ok(None),
        Err(e) => {
            return Err(StorageError::InvalidConfig(format!(
                "failed reading {var_name}: {e}"
            )));
        }
    };

    let normalized = v.trim().to_ascii_lowercase();
    let parsed = match normalized.as_str() {
        "1" | "true" | "yes" | "y" => true,
        "0" | "false" | "no" | "n" => false,
        _ => {
            return Err(StorageError::InvalidConfig(format!(
                "invalid boolean for {var_name}={v} (expected true/false)"
            )));
        }
    };
    Ok(Some(parsed))
}

fn read_s3_config() -> Result<S3Config, StorageError> {
    let bucket = std::env::var("S3_BUCKET")
        .ok()
        .and_then(non_empty)
        .ok_or_else(|| {
            StorageError::InvalidConfig("S3_BUCKET is required for s3 backend".into())
        })?;

    let region = std::env::var("AWS_REGION")
        .ok()
        .and_then(non_empty)
        .unwrap_or_else(|| "us-east-1".to_string());

    let endpoint = std::env::var("S3_ENDPOINT").ok().and_then(non_empty);
    let allow_http = match parse_bool_env("S3_ALLOW_HTTP")? {
        Some(v) => v,
        None => endpoint
            .as_deref()
            .is_some_and(|e| e.trim_start().to_ascii_lowercase().starts_with("http://")),
    };

    let virtual_hosted_style = parse_bool_env("S3_VIRTUAL_HOSTED_STYLE")?.unwrap_or(false);

    let access_key_id = std::env::var("AWS_ACCESS_KEY_ID").ok().and_then(non_empty);
    let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
        .ok()
        .and_then(non_empty);
    let session_token = std::env::var("AWS_SESSION_TOKEN").ok().and_then(non_empty);

    Ok(S3Config {
        bucket,
        region,
        endpoint,
        allow_http,
        access_key_id,
        secret_access_key,
        session_token,
        virtual_hosted_style,
    })
}

async fn build_s3(cfg: S3Config) -> Result<object_store::aws::AmazonS3, StorageError> {
    let mut builder = object_store::aws::AmazonS3Builder::new()
        .with_bucket_name(cfg.bucket)
        .with_region(cfg.region)
        .with_virtual_hosted_style_request(cfg.virtual_hosted_style);

    if let Some(endpoint) = cfg.endpoint {
        builder = builder.with_endpoint(endpoint);
    }
    if cfg.allow_http {
        builder = builder.with_allow_http(true);
    }
    if let Some(access_key_id) = cfg.access_key_id {
        builder = builder.with_access_key_id(access_key_id);
    }
    if let Some(secret_access_key) = cfg.secret_access_key {
        builder = builder.with_secret_access_key(secret_access_key);
    }
    if let Some(session_token) = cfg.session_token {
        builder = builder.with_token(session_token);
    }

    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;

    #[tokio::test]
    async fn audio_upload_is_keyed_by_owner() -> Result<(), StorageError> {
        let storage = Storage::new(StorageConfig::memory()).await?;
        let uploaded = storage
            .upload_audio(Bytes::from_static(b"ID3fake"), "u1", "My Song.WAV")
            .await?;

        assert!(uploaded.key.starts_with("audio/u1/"));
        assert!(uploaded.key.ends_with(".WAV"));
        assert_eq!(uploaded.size, 7);
        assert_eq!(uploaded.url, format!("memory://local/{}", uploaded.key));
        assert_eq!(storage.get_bytes(&uploaded.key).await?, Bytes::from_static(b"ID3fake"));
        Ok(())
    }

    #[tokio::test]
    async fn fresh_key_per_upload() -> Result<(), StorageError> {
        let storage = Storage::new(StorageConfig::memory()).await?;
        let a = storage.upload_audio(Bytes::from("a"), "u1", "x.mp3").await?;
        let b = storage.upload_audio(Bytes::from("b"), "u1", "x.mp3").await?;
        assert_ne!(a.key, b.key);
        Ok(())
    }

    #[tokio::test]
    async fn waveform_sits_next_to_audio() -> Result<(), StorageError> {
        let storage = Storage::new(
            StorageConfig::memory().with_public_url("https://cdn.example.com/"),
        )
        .await?;
        let waveform = storage
            .upload_waveform(Bytes::from("<svg/>"), "audio/u1/01ABC.mp3")
            .await?;
        assert_eq!(waveform.key, "waveforms/u1/01ABC.svg");
        assert_eq!(waveform.url, "https://cdn.example.com/waveforms/u1/01ABC.svg");
        Ok(())
    }

    #[tokio::test]
    async fn urls_map_back_to_keys() -> Result<(), StorageError> {
        let mut cfg = StorageConfig::memory().with_public_url("https://cdn.example.com");
        cfg.prefix = Some("uploads".to_string());
        let storage = Storage::new(cfg).await?;

        let uploaded = storage.upload_audio(Bytes::from("a"), "u1", "a.mp3").await?;
        assert_eq!(storage.key_for_url(&uploaded.url), Some(uploaded.key));
        assert_eq!(storage.key_for_url("https://elsewhere.example.com/uploads/audio/x.mp3"), None);
        assert_eq!(storage.key_for_url("https://cdn.example.com/other/audio/x.mp3"), None);
        Ok(())
    }

    #[tokio::test]
    async fn owner_id_is_sanitized() -> Result<(), StorageError> {
        let storage = Storage::new(StorageConfig::memory()).await?;
        let uploaded = storage
            .upload_audio(Bytes::from("a"), "../evil/owner", "noext")
            .await?;
        assert!(uploaded.key.starts_with("audio/___evil_owner/"));
        assert!(uploaded.key.ends_with(".bin"));

        let err = storage.upload_audio(Bytes::from("a"), "  ", "a.mp3").await;
        assert!(matches!(err, Err(StorageError::InvalidKey(_))));
        Ok(())
    }

    #[tokio::test]
    async fn filesystem_round_trip_with_prefix() -> Result<(), StorageError> {
        let dir = tempfile::tempdir()?;
        let mut cfg = StorageConfig::filesystem(dir.path());
        cfg.prefix = Some("uploads/".to_string());
        let storage = Storage::new(cfg).await?;

        let uploaded = storage.upload_audio(Bytes::from("pcm"), "u9", "t.mp3").await?;
        assert!(uploaded.url.contains("/uploads/audio/u9/"));
        assert!(dir.path().join("uploads").join(&uploaded.key).exists());
        assert_eq!(storage.get_bytes(&uploaded.key).await?, Bytes::from("pcm"));
        Ok(())
    }
}
