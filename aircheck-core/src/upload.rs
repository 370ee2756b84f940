use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::{Credentials, UploadSection};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("io error reading {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("archive rejected upload: {0}")]
    Rejected(String),
}

pub type UploadResult<T> = std::result::Result<T, UploadError>;

/// One archive item: its unique identifier plus the metadata recorded
/// alongside the file.
#[derive(Debug, Clone)]
pub struct ArchiveItem {
    pub identifier: String,
    pub filename: String,
    pub mediatype: String,
    pub title: String,
    pub creator: String,
    pub collection: Option<String>,
}

/// Where a successful upload ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub download_url: String,
    pub identifier: String,
}

#[async_trait::async_trait]
pub trait ArchiveStore: Send + Sync {
    async fn put_file(&self, item: &ArchiveItem, file: &Path) -> UploadResult<()>;
}

/// Internet Archive S3-compatible store: one PUT per file with the item
/// metadata carried in `x-archive-meta-*` headers.
pub struct S3ArchiveStore {
    client: Client,
    endpoint: String,
    credentials: Credentials,
}

impl S3ArchiveStore {
    pub fn new(endpoint: String, credentials: Credentials) -> UploadResult<Self> {
        let client = Client::builder().user_agent("aircheck/0.1").build()?;
        Ok(Self {
            client,
            endpoint,
            credentials,
        })
    }
}

#[async_trait::async_trait]
impl ArchiveStore for S3ArchiveStore {
    async fn put_file(&self, item: &ArchiveItem, file: &Path) -> UploadResult<()> {
        let body = tokio::fs::read(file)
            .await
            .map_err(|source| UploadError::Io {
                source,
                path: file.to_path_buf(),
            })?;
        let url = format!(
            "{}/{}/{}",
            self.endpoint.trim_end_matches('/'),
            item.identifier,
            item.filename
        );
        let mut request = self
            .client
            .put(&url)
            .header(
                "authorization",
                format!(
                    "LOW {}:{}",
                    self.credentials.access_key, self.credentials.secret_key
                ),
            )
            .header("x-amz-auto-make-bucket", "1")
            .header("x-archive-meta-mediatype", &item.mediatype)
            .header("x-archive-meta-title", &item.title)
            .header("x-archive-meta-creator", &item.creator);
        if let Some(collection) = &item.collection {
            request = request.header("x-archive-meta-collection", collection);
        }
        let response = request.body(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(UploadError::Rejected(format!(
                "HTTP {status}: {}",
                detail.trim()
            )));
        }
        Ok(())
    }
}

/// Retries a fixed number of times with a fixed pause between attempts.
/// Exhausting every attempt is an expected outcome, not an error: the
/// caller records the sentinel result and the day still ends cleanly.
pub struct ArchiveUploader {
    store: Arc<dyn ArchiveStore>,
    section: UploadSection,
    retry_delay: Duration,
}

impl ArchiveUploader {
    pub fn new(store: Arc<dyn ArchiveStore>, section: UploadSection) -> Self {
        let retry_delay = Duration::from_secs(section.retry_delay_seconds);
        Self {
            store,
            section,
            retry_delay,
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Builds the item for one recording session.
    pub fn item_for(&self, file: &Path, timestamp: &str) -> ArchiveItem {
        let filename = file
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| file.to_string_lossy().to_string());
        ArchiveItem {
            identifier: format!("{}-{}", self.section.item_prefix, timestamp),
            title: filename.clone(),
            filename,
            mediatype: self.section.mediatype.clone(),
            creator: self.section.creator.clone(),
            collection: self.section.collection.clone(),
        }
    }

    pub async fn upload(&self, file: &Path, item: ArchiveItem) -> Option<UploadReceipt> {
        let attempts = self.section.max_attempts.max(1);
        info!(
            file = %file.display(),
            identifier = %item.identifier,
            "uploading to archive"
        );
        for attempt in 1..=attempts {
            match self.store.put_file(&item, file).await {
                Ok(()) => {
                    let receipt = UploadReceipt {
                        download_url: format!(
                            "https://archive.org/download/{}/{}",
                            item.identifier, item.filename
                        ),
                        identifier: item.identifier.clone(),
                    };
                    info!(url = %receipt.download_url, "upload finished");
                    return Some(receipt);
                }
                Err(err) => {
                    warn!(attempt, error = %err, "upload attempt failed");
                    if attempt < attempts {
                        sleep(self.retry_delay).await;
                    }
                }
            }
        }
        warn!(attempts, "all upload attempts failed");
        None
    }
}
