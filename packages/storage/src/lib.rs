//! Object storage for render sources, frames, composites and worker logs.
//!
//! Backends:
//! - S3-compatible storage in production/staging
//! - On-disk storage for local dev
//! - In-memory storage for tests
//!
//! A [`Storage`] can be narrowed to a key prefix with [`Storage::scoped`], which is
//! how the render farm models its buckets, and can publish [`ObjectCreated`]
//! notifications for every successful write.

use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use object_store::ObjectStore;
use object_store::ObjectStoreExt;
use object_store::path::Path;
use tokio::sync::broadcast;

/// Number of deletes issued concurrently by [`Storage::delete_many`].
const DELETE_CONCURRENCY: usize = 16;

const DEFAULT_FS_ROOT: &str = "./data/object_store";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid storage config: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object_store error: {0}")]
    ObjectStore(#[from] object_store::Error),
}

impl StorageError {
    /// Check if the error reports a missing object.
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::ObjectStore(object_store::Error::NotFound { .. }) => true,
            StorageError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// Notification published after an object was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectCreated {
    /// Key relative to the publishing storage's prefix.
    pub key: String,
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
}

impl StorageConfig {
    pub fn memory() -> Self {
        Self {
            backend: StorageBackendConfig::Memory,
            prefix: None,
        }
    }

    pub fn filesystem(root: impl Into<PathBuf>) -> Self {
        Self {
            backend: StorageBackendConfig::Filesystem { root: root.into() },
            prefix: None,
        }
    }

    pub fn s3(cfg: S3Config) -> Self {
        Self {
            backend: StorageBackendConfig::S3(cfg),
            prefix: None,
        }
    }

    /// Build a config from environment variables.
    ///
    /// `STORAGE_BACKEND` picks `s3`, `filesystem` (alias `fs`) or `memory`;
    /// unset means filesystem under `STORAGE_FS_ROOT` (default
    /// `./data/object_store`). `STORAGE_PREFIX` nests every key. See
    /// [`S3Config::from_env`] for the S3 variables.
    pub fn from_env() -> Result<Self, StorageError> {
        let cfg = match env_var("STORAGE_BACKEND").as_deref() {
            Some("s3") => Self::s3(S3Config::from_env()?),
            Some("memory" | "mem") => Self::memory(),
            None | Some("filesystem" | "fs") => Self::filesystem(
                env_var("STORAGE_FS_ROOT").unwrap_or_else(|| DEFAULT_FS_ROOT.to_string()),
            ),
            Some(other) => {
                return Err(StorageError::InvalidConfig(format!(
                    "unsupported STORAGE_BACKEND={other} (expected s3|filesystem|memory)"
                )));
            }
        };

        Ok(Self {
            prefix: env_var("STORAGE_PREFIX"),
            ..cfg
        })
    }
}

impl S3Config {
    /// Read an S3-compatible target from the environment.
    ///
    /// `S3_BUCKET` is required. `AWS_REGION` defaults to `us-east-1`.
    /// `S3_ALLOW_HTTP` defaults to true only for an `http://` `S3_ENDPOINT`.
    /// Static credentials come from the usual `AWS_*` variables when present.
    pub fn from_env() -> Result<Self, StorageError> {
        let bucket = env_var("S3_BUCKET").ok_or_else(|| {
            StorageError::InvalidConfig("S3_BUCKET is required for s3 backend".into())
        })?;
        let endpoint = env_var("S3_ENDPOINT");
        let plain_http = endpoint
            .as_deref()
            .is_some_and(|e| e.to_ascii_lowercase().starts_with("http://"));

        Ok(Self {
            bucket,
            region: env_var("AWS_REGION").unwrap_or_else(|| "us-east-1".into()),
            allow_http: env_flag("S3_ALLOW_HTTP")?.unwrap_or(plain_http),
            virtual_hosted_style: env_flag("S3_VIRTUAL_HOSTED_STYLE")?.unwrap_or(false),
            endpoint,
            access_key_id: env_var("AWS_ACCESS_KEY_ID"),
            secret_access_key: env_var("AWS_SECRET_ACCESS_KEY"),
            session_token: env_var("AWS_SESSION_TOKEN"),
        })
    }
}

#[derive(Clone)]
pub struct Storage {
    kind: StorageKind,
    store: Arc<dyn ObjectStore>,
    prefix: Option<String>,
    notify: Option<broadcast::Sender<ObjectCreated>>,
}

impl Storage {
    pub fn kind(&self) -> StorageKind {
        self.kind
    }

    pub fn kind_str(&self) -> &'static str {
        self.kind.as_str()
    }

    pub async fn new(cfg: StorageConfig) -> Result<Self, StorageError> {
        let (kind, store) = match cfg.backend {
            StorageBackendConfig::S3(s3) => (StorageKind::S3, Arc::new(build_s3(s3)?) as _),
            StorageBackendConfig::Filesystem { root } => {
                ensure_dir(&root)?;
                let fs = object_store::local::LocalFileSystem::new_with_prefix(&root)?;
                (StorageKind::Filesystem, Arc::new(fs) as _)
            }
            StorageBackendConfig::Memory => {
                let mem = object_store::memory::InMemory::new();
                (StorageKind::Memory, Arc::new(mem) as _)
            }
        };

        tracing::info!("Object storage ready: {}", kind.as_str());

        Ok(Self {
            kind,
            store,
            prefix: cfg.prefix.and_then(non_empty),
            notify: None,
        })
    }

    /// Narrow this storage to a key prefix nested under the current one.
    ///
    /// The scoped storage shares the backend but not the notification channel.
    pub fn scoped(&self, prefix: &str) -> Self {
        let prefix = prefix.trim_matches('/');
        let joined = match self.prefix.as_deref().map(|p| p.trim_matches('/')) {
            Some(current) if !current.is_empty() => format!("{current}/{prefix}"),
            _ => prefix.to_string(),
        };
        Self {
            kind: self.kind,
            store: self.store.clone(),
            prefix: non_empty(joined),
            notify: None,
        }
    }

    /// Publish an [`ObjectCreated`] notification after every successful write.
    pub fn with_notifications(mut self, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        self.notify = Some(tx);
        self
    }

    /// Subscribe to creation notifications, if enabled.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<ObjectCreated>> {
        self.notify.as_ref().map(|tx| tx.subscribe())
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub async fn from_env() -> Result<Self, StorageError> {
        Self::new(StorageConfig::from_env()?).await
    }

    fn to_path(&self, key: &str) -> Result<Path, StorageError> {
        let key = key.trim_start_matches('/');
        if key.is_empty() {
            return Err(StorageError::InvalidConfig(
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

    pub async fn put_bytes(&self, key: &str, bytes: Bytes) -> Result<(), StorageError> {
        let path = self.to_path(key)?;
        self.store
            .put(&path, object_store::PutPayload::from(bytes))
            .await?;

        if let Some(ref tx) = self.notify {
            // No subscribers is fine.
            let _ = tx.send(ObjectCreated {
                key: key.trim_start_matches('/').to_string(),
            });
        }
        Ok(())
    }

    pub async fn get_bytes(&self, key: &str) -> Result<Bytes, StorageError> {
        let path = self.to_path(key)?;
        let res = self.store.get(&path).await?;
        Ok(res.bytes().await?)
    }

    /// Fetch an object, mapping a missing key to `None`.
    pub async fn get_optional(&self, key: &str) -> Result<Option<Bytes>, StorageError> {
        match self.get_bytes(key).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.to_path(key)?;
        match self.store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.to_path(key)?;
        self.store.delete(&path).await?;
        Ok(())
    }

    /// Best-effort bulk delete.
    ///
    /// Every key is attempted; missing objects count as deleted. Returns the
    /// keys that could not be removed together with their errors.
    pub async fn delete_many<I>(&self, keys: I) -> Vec<(String, StorageError)>
    where
        I: IntoIterator<Item = String>,
    {
        futures_util::stream::iter(keys)
            .map(|key| async move {
                let result = self.delete(&key).await;
                (key, result)
            })
            .buffer_unordered(DELETE_CONCURRENCY)
            .filter_map(|(key, result)| async move {
                match result {
                    Err(e) if !e.is_not_found() => Some((key, e)),
                    _ => None,
                }
            })
            .collect()
            .await
    }

    /// Upload a local file under `key`.
    pub async fn put_file(&self, key: &str, source: &FsPath) -> Result<(), StorageError> {
        let bytes = tokio::fs::read(source).await?;
        self.put_bytes(key, Bytes::from(bytes)).await
    }

    /// Download `key` into a local file, replacing any existing file.
    pub async fn get_file(&self, key: &str, target: &FsPath) -> Result<(), StorageError> {
        let bytes = self.get_bytes(key).await?;
        tokio::fs::write(target, &bytes).await?;
        Ok(())
    }
}

fn ensure_dir(root: &FsPath) -> Result<(), StorageError> {
    std::fs::create_dir_all(root)?;
    Ok(())
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// A set, non-blank environment variable.
fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(non_empty)
}

fn env_flag(name: &str) -> Result<Option<bool>, StorageError> {
    let Some(raw) = env_var(name) else {
        return Ok(None);
    };
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" => Ok(Some(true)),
        "0" | "false" | "no" | "n" => Ok(Some(false)),
        _ => Err(StorageError::InvalidConfig(format!(
            "invalid boolean for {name}={raw} (expected true/false)"
        ))),
    }
}

fn build_s3(cfg: S3Config) -> Result<object_store::aws::AmazonS3, StorageError> {
    let builder = object_store::aws::AmazonS3Builder::new()
        .with_bucket_name(cfg.bucket)
        .with_region(cfg.region)
        .with_allow_http(cfg.allow_http)
        .with_virtual_hosted_style_request(cfg.virtual_hosted_style);

    let builder = [
        (cfg.endpoint, object_store::aws::AmazonS3ConfigKey::Endpoint),
        (cfg.access_key_id, object_store::aws::AmazonS3ConfigKey::AccessKeyId),
        (cfg.secret_access_key, object_store::aws::AmazonS3ConfigKey::SecretAccessKey),
        (cfg.session_token, object_store::aws::AmazonS3ConfigKey::Token),
    ]
    .into_iter()
    .fold(builder, |builder, (value, key)| match value {
        Some(value) => builder.with_config(key, value),
        None => builder,
    });

    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;

    #[tokio::test]
    async fn in_memory_round_trip() -> Result<(), StorageError> {
        let storage = Storage::new(StorageConfig::memory()).await?;
        storage.put_bytes("hello.txt", Bytes::from("hi")).await?;
        let got = storage.get_bytes("hello.txt").await?;
        assert_eq!(got, Bytes::from("hi"));
        assert!(storage.exists("hello.txt").await?);
        assert!(!storage.exists("missing.txt").await?);
        assert!(storage.get_optional("missing.txt").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn filesystem_file_transfer() -> Result<(), StorageError> {
        let dir = tempfile::tempdir()?;
        let storage = Storage::new(StorageConfig::filesystem(dir.path().join("store"))).await?;

        let source = dir.path().join("scene.blend");
        tokio::fs::write(&source, b"blend-data").await?;
        storage.put_file("scene.blend", &source).await?;

        let target = dir.path().join("copy.blend");
        storage.get_file("scene.blend", &target).await?;
        assert_eq!(tokio::fs::read(&target).await?, b"blend-data");

        let missing = storage.get_file("nope.blend", &target).await;
        assert!(missing.is_err_and(|e| e.is_not_found()));
        Ok(())
    }

    #[tokio::test]
    async fn scoped_storage_shares_the_backend() -> Result<(), StorageError> {
        let root = Storage::new(StorageConfig::memory()).await?;
        let frames = root.scoped("frames");
        frames.put_bytes("scene0001.png", Bytes::from("f")).await?;

        assert!(root.exists("frames/scene0001.png").await?);
        assert!(!root.scoped("renders").exists("scene0001.png").await?);
        assert_eq!(frames.prefix(), Some("frames"));
        assert_eq!(frames.scoped("nested").prefix(), Some("frames/nested"));
        Ok(())
    }

    #[tokio::test]
    async fn notifications_report_relative_keys() -> Result<(), StorageError> {
        let root = Storage::new(StorageConfig::memory()).await?;
        let renders = root.scoped("renders").with_notifications(8);
        let mut rx = renders.subscribe().expect("notifications enabled");

        renders.put_bytes("scene.mp4", Bytes::from("video")).await?;
        let event = rx.recv().await.expect("event published");
        assert_eq!(event.key, "scene.mp4");

        assert!(root.subscribe().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn delete_many_ignores_missing_objects() -> Result<(), StorageError> {
        let storage = Storage::new(StorageConfig::memory()).await?;
        for i in 1..=3 {
            storage
                .put_bytes(&format!("scene{i:04}.png"), Bytes::from("f"))
                .await?;
        }

        let failed = storage
            .delete_many((1..=5).map(|i| format!("scene{i:04}.png")))
            .await;
        assert!(failed.is_empty());
        assert!(!storage.exists("scene0002.png").await?);
        Ok(())
    }
}
