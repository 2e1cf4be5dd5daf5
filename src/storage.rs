//! Object storage, consumed through a narrow interface.
//!
//! The pipeline persists object *keys*, never public URLs. What serves those
//! keys is a deployment concern: an HTTP(S) object store in production, or a
//! plain directory in development and tests.

use std::time::Duration;

use tokio::fs;

use crate::{config::StorageConfig, prelude::*};

/// Timeout for a single storage operation.
const STORAGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Download and upload menu documents by key.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Download the object at `key` into `dest_dir`, returning the local
    /// path. The caller owns `dest_dir` and its cleanup.
    async fn download(&self, key: &str, dest_dir: &Path) -> Result<PathBuf>;

    /// Upload `bytes` under `key`, returning the key.
    async fn upload(&self, key: &str, bytes: &[u8]) -> Result<String>;
}

/// The local filename for a downloaded object: the last path segment of the
/// key, so the extension survives for document-kind detection.
fn local_filename(key: &str) -> Result<String> {
    key.rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .map(|name| name.to_owned())
        .ok_or_else(|| anyhow!("object key {:?} has no filename component", key))
}

/// Build the configured [`ObjectStorage`] backend.
pub fn storage_from_config(config: StorageConfig) -> Result<Arc<dyn ObjectStorage>> {
    match config {
        StorageConfig::Http {
            base_url,
            auth_token,
        } => Ok(Arc::new(HttpObjectStorage::new(base_url, auth_token)?)),
        StorageConfig::Fs { root } => Ok(Arc::new(FsObjectStorage::new(root))),
    }
}

/// [`ObjectStorage`] over a plain HTTP(S) object store.
pub struct HttpObjectStorage {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpObjectStorage {
    pub fn new(base_url: String, auth_token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(STORAGE_TIMEOUT)
            .build()
            .context("failed to build storage HTTP client")?;
        Ok(Self {
            client,
            base_url,
            auth_token,
        })
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), key)
    }
}

#[async_trait]
impl ObjectStorage for HttpObjectStorage {
    #[instrument(level = "debug", skip_all, fields(key = %key))]
    async fn download(&self, key: &str, dest_dir: &Path) -> Result<PathBuf> {
        let mut request = self.client.get(self.object_url(key));
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("failed to download object {:?}", key))?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("storage returned status {} for {:?}", status, key));
        }
        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("failed to read object body for {:?}", key))?;
        if bytes.is_empty() {
            return Err(anyhow!("object {:?} is empty", key));
        }

        let dest = dest_dir.join(local_filename(key)?);
        fs::write(&dest, &bytes)
            .await
            .with_context(|| format!("failed to write {:?}", dest.display()))?;
        Ok(dest)
    }

    #[instrument(level = "debug", skip_all, fields(key = %key))]
    async fn upload(&self, key: &str, bytes: &[u8]) -> Result<String> {
        let mut request = self
            .client
            .put(self.object_url(key))
            .body(bytes.to_owned());
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("failed to upload object {:?}", key))?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("storage returned status {} for {:?}", status, key));
        }
        Ok(key.to_owned())
    }
}

/// [`ObjectStorage`] backed by a local directory.
pub struct FsObjectStorage {
    root: PathBuf,
}

impl FsObjectStorage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Resolve a key under the root. Keys are plain relative paths; parent
    /// components or an absolute key would escape the root, so both are
    /// rejected.
    fn object_path(&self, key: &str) -> Result<PathBuf> {
        use std::path::Component;

        let relative = Path::new(key);
        let escapes = relative.is_absolute()
            || relative
                .components()
                .any(|part| !matches!(part, Component::Normal(_)));
        if escapes {
            return Err(anyhow!("object key {:?} is not a plain relative path", key));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStorage for FsObjectStorage {
    async fn download(&self, key: &str, dest_dir: &Path) -> Result<PathBuf> {
        let source = self.object_path(key)?;
        let dest = dest_dir.join(local_filename(key)?);
        fs::copy(&source, &dest)
            .await
            .with_context(|| format!("failed to copy object {:?}", source.display()))?;
        Ok(dest)
    }

    async fn upload(&self, key: &str, bytes: &[u8]) -> Result<String> {
        let dest = self.object_path(key)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {:?}", parent.display()))?;
        }
        fs::write(&dest, bytes)
            .await
            .with_context(|| format!("failed to write object {:?}", dest.display()))?;
        Ok(key.to_owned())
    }
}
